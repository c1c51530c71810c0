//! BDD step definitions for the volume lifecycle.

use std::collections::HashMap;
use std::future::Future;

use ovhvol::VolumeStatus;
use ovhvol::test_support::{GatewayCall, HostCall};
use ovhvol::volume::CreateOptions;
use rstest_bdd_macros::{given, then, when};
use tokio::runtime::Runtime;

use super::test_helpers::{
    DEFAULT_REGION, DEFAULT_TYPE, LifecycleOutcome, LifecycleWorld, OTHER_ID, SELF_ID,
};

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error("runtime setup failed: {0}")]
    Runtime(String),
    #[error("assertion failed: {0}")]
    Assertion(String),
}

fn block_on<F: Future>(future: F) -> Result<F::Output, StepError> {
    let runtime = Runtime::new().map_err(|err| StepError::Runtime(err.to_string()))?;
    Ok(runtime.block_on(future))
}

fn ensure(condition: bool, message: impl FnOnce() -> String) -> Result<(), StepError> {
    if condition {
        Ok(())
    } else {
        Err(StepError::Assertion(message()))
    }
}

#[given("an empty project")]
fn empty_project(lifecycle_world: &LifecycleWorld) {
    assert!(
        lifecycle_world.gateway.volume("data1").is_none(),
        "fresh project should hold no volumes"
    );
}

#[given("a volume \"{name}\" with status \"{status}\"")]
fn volume_with_status(lifecycle_world: &LifecycleWorld, name: String, status: String) {
    lifecycle_world
        .gateway
        .insert_volume(&name, VolumeStatus::from(status.as_str()), &[]);
}

#[given("a volume \"{name}\" attached to another instance")]
fn volume_attached_elsewhere(lifecycle_world: &LifecycleWorld, name: String) {
    lifecycle_world
        .gateway
        .insert_volume(&name, VolumeStatus::InUse, &[OTHER_ID]);
}

#[given("a volume \"{name}\" attached to this instance")]
fn volume_attached_here(lifecycle_world: &LifecycleWorld, name: String) {
    lifecycle_world
        .gateway
        .insert_volume(&name, VolumeStatus::InUse, &[SELF_ID]);
}

#[given("a volume \"{name}\" that is still being created")]
fn volume_still_creating(lifecycle_world: &LifecycleWorld, name: String) {
    lifecycle_world
        .gateway
        .insert_volume(&name, VolumeStatus::Creating, &[]);
    lifecycle_world
        .gateway
        .transition_after_lookup(&name, VolumeStatus::Available);
}

#[given("the attached device appears as \"{device}\"")]
fn device_appears(lifecycle_world: &LifecycleWorld, device: String) {
    lifecycle_world.host.attach_device(device);
}

#[given("the device already carries \"{filesystem}\"")]
fn device_has_filesystem(lifecycle_world: &LifecycleWorld, filesystem: String) {
    lifecycle_world.host.set_filesystem(Some(&filesystem));
}

#[given("the tracking directory for \"{name}\" is present")]
fn tracking_present(lifecycle_world: &LifecycleWorld, name: String) {
    lifecycle_world
        .host
        .mark_tracked(LifecycleWorld::mount_path(&name));
}

#[when("volume \"{name}\" is created with size \"{size}\"")]
fn create_volume(
    lifecycle_world: &LifecycleWorld,
    name: String,
    size: String,
) -> Result<LifecycleOutcome, StepError> {
    let orchestrator = lifecycle_world.orchestrator();
    let options = CreateOptions::from(HashMap::from([(String::from("size"), size)]));
    let result = block_on(async { orchestrator.create(&name, &options).await })?;
    Ok(LifecycleOutcome {
        results: vec![result.map(|()| String::new()).map_err(|err| err.to_string())],
    })
}

#[when("volume \"{name}\" is mounted")]
fn mount_volume(
    lifecycle_world: &LifecycleWorld,
    name: String,
) -> Result<LifecycleOutcome, StepError> {
    let orchestrator = lifecycle_world.orchestrator();
    let result = block_on(async { orchestrator.mount(&name).await })?;
    Ok(LifecycleOutcome {
        results: vec![result.map(String::from).map_err(|err| err.to_string())],
    })
}

#[when("volume \"{name}\" is mounted twice")]
fn mount_volume_twice(
    lifecycle_world: &LifecycleWorld,
    name: String,
) -> Result<LifecycleOutcome, StepError> {
    let orchestrator = lifecycle_world.orchestrator();
    let (first, second) = block_on(async {
        let first = orchestrator.mount(&name).await;
        let second = orchestrator.mount(&name).await;
        (first, second)
    })?;
    Ok(LifecycleOutcome {
        results: [first, second]
            .into_iter()
            .map(|result| result.map(String::from).map_err(|err| err.to_string()))
            .collect(),
    })
}

#[when("volume \"{name}\" is unmounted")]
fn unmount_volume(
    lifecycle_world: &LifecycleWorld,
    name: String,
) -> Result<LifecycleOutcome, StepError> {
    let orchestrator = lifecycle_world.orchestrator();
    let result = block_on(async { orchestrator.unmount(&name).await })?;
    Ok(LifecycleOutcome {
        results: vec![result.map(|()| String::new()).map_err(|err| err.to_string())],
    })
}

#[when("volume \"{name}\" is removed")]
fn remove_volume(
    lifecycle_world: &LifecycleWorld,
    name: String,
) -> Result<LifecycleOutcome, StepError> {
    let orchestrator = lifecycle_world.orchestrator();
    let result = block_on(async { orchestrator.remove(&name).await })?;
    Ok(LifecycleOutcome {
        results: vec![result.map(|()| String::new()).map_err(|err| err.to_string())],
    })
}

#[then("the operation succeeds")]
fn operation_succeeds(lifecycle_outcome: &LifecycleOutcome) -> Result<(), StepError> {
    match lifecycle_outcome.results.as_slice() {
        [] => Err(StepError::Assertion(String::from("no operation was run"))),
        results => results.iter().try_for_each(|result| {
            result.as_ref().map(|_| ()).map_err(|message| {
                StepError::Assertion(format!("expected success, got: {message}"))
            })
        }),
    }
}

#[then("the operation fails with \"{fragment}\"")]
fn operation_fails(
    lifecycle_outcome: &LifecycleOutcome,
    fragment: String,
) -> Result<(), StepError> {
    let Some(Err(message)) = lifecycle_outcome.results.last() else {
        return Err(StepError::Assertion(format!(
            "expected a failure, got {:?}",
            lifecycle_outcome.results
        )));
    };
    ensure(message.contains(&fragment), || {
        format!("error should mention '{fragment}': {message}")
    })
}

#[then("the remote create call used size {size} with the default type and region")]
fn create_call_used_defaults(lifecycle_world: &LifecycleWorld, size: u32) -> Result<(), StepError> {
    let mutations = lifecycle_world.gateway.mutations();
    let [GatewayCall::CreateVolume(spec)] = mutations.as_slice() else {
        return Err(StepError::Assertion(format!(
            "expected a single create call, got {mutations:?}"
        )));
    };
    ensure(
        spec.size == size && spec.volume_type == DEFAULT_TYPE && spec.region == DEFAULT_REGION,
        || format!("unexpected create spec {spec:?}"),
    )
}

#[then("the tracking directory for \"{name}\" exists")]
fn tracking_exists(lifecycle_world: &LifecycleWorld, name: String) -> Result<(), StepError> {
    let path = LifecycleWorld::mount_path(&name);
    ensure(lifecycle_world.host.is_tracked(&path), || {
        format!("{path} should be tracked")
    })
}

#[then("no remote mutation was issued")]
fn no_remote_mutation(lifecycle_world: &LifecycleWorld) -> Result<(), StepError> {
    let mutations = lifecycle_world.gateway.mutations();
    ensure(mutations.is_empty(), || {
        format!("expected no mutations, got {mutations:?}")
    })
}

#[then("no local work was performed")]
fn no_local_work(lifecycle_world: &LifecycleWorld) -> Result<(), StepError> {
    let calls = lifecycle_world.host.calls();
    ensure(calls.is_empty(), || {
        format!("expected no host calls, got {calls:?}")
    })
}

#[then("both mounts return the mount path of \"{name}\"")]
fn both_mounts_return_path(
    lifecycle_outcome: &LifecycleOutcome,
    name: String,
) -> Result<(), StepError> {
    let expected = LifecycleWorld::mount_path(&name).into_string();
    let paths = lifecycle_outcome
        .results
        .iter()
        .filter_map(|result| result.as_ref().ok())
        .collect::<Vec<_>>();
    ensure(
        paths.len() == 2 && paths.iter().all(|path| **path == expected),
        || format!("expected two mounts at {expected}, got {:?}", lifecycle_outcome.results),
    )
}

#[then("exactly {count} attach call was issued")]
fn attach_calls(lifecycle_world: &LifecycleWorld, count: usize) -> Result<(), StepError> {
    let attaches = lifecycle_world
        .gateway
        .calls()
        .into_iter()
        .filter(|call| matches!(call, GatewayCall::AttachVolume { .. }))
        .count();
    ensure(attaches == count, || {
        format!("expected {count} attach calls, got {attaches}")
    })
}

#[then("no filesystem was formatted")]
fn nothing_formatted(lifecycle_world: &LifecycleWorld) -> Result<(), StepError> {
    let formats = lifecycle_world
        .host
        .count_calls(|call| matches!(call, HostCall::Format { .. }));
    ensure(formats == 0, || format!("expected no format, got {formats}"))
}

#[then("nothing was mounted")]
fn nothing_mounted(lifecycle_world: &LifecycleWorld) -> Result<(), StepError> {
    let mounts = lifecycle_world
        .host
        .count_calls(|call| matches!(call, HostCall::Mount { .. }));
    ensure(mounts == 0, || format!("expected no mount, got {mounts}"))
}

#[then("the volume list was read {count} times before attaching")]
fn lookups_before_attach(lifecycle_world: &LifecycleWorld, count: usize) -> Result<(), StepError> {
    let calls = lifecycle_world.gateway.calls();
    let before_attach = calls
        .iter()
        .take_while(|call| !matches!(call, GatewayCall::AttachVolume { .. }))
        .filter(|call| matches!(call, GatewayCall::ListVolumes))
        .count();
    ensure(before_attach == count, || {
        format!("expected {count} lookups before attach, got {before_attach} in {calls:?}")
    })
}
