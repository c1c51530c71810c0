//! BDD scenarios for the volume lifecycle.

use rstest_bdd_macros::scenario;

use super::test_helpers::{LifecycleOutcome, LifecycleWorld, lifecycle_outcome, lifecycle_world};

#[scenario(
    path = "tests/features/lifecycle.feature",
    name = "Create a volume in an empty project"
)]
fn scenario_create_in_empty_project(
    lifecycle_world: LifecycleWorld,
    lifecycle_outcome: LifecycleOutcome,
) {
    drop((lifecycle_world, lifecycle_outcome));
}

#[scenario(
    path = "tests/features/lifecycle.feature",
    name = "Reuse an available volume on create"
)]
fn scenario_reuse_available_volume(
    lifecycle_world: LifecycleWorld,
    lifecycle_outcome: LifecycleOutcome,
) {
    drop((lifecycle_world, lifecycle_outcome));
}

#[scenario(
    path = "tests/features/lifecycle.feature",
    name = "Refuse to create over a volume attached elsewhere"
)]
fn scenario_create_conflict(
    lifecycle_world: LifecycleWorld,
    lifecycle_outcome: LifecycleOutcome,
) {
    drop((lifecycle_world, lifecycle_outcome));
}

#[scenario(
    path = "tests/features/lifecycle.feature",
    name = "Refuse to mount a volume attached elsewhere"
)]
fn scenario_mount_conflict(
    lifecycle_world: LifecycleWorld,
    lifecycle_outcome: LifecycleOutcome,
) {
    drop((lifecycle_world, lifecycle_outcome));
}

#[scenario(
    path = "tests/features/lifecycle.feature",
    name = "Unmount of an absent mount is a no-op"
)]
fn scenario_unmount_noop(
    lifecycle_world: LifecycleWorld,
    lifecycle_outcome: LifecycleOutcome,
) {
    drop((lifecycle_world, lifecycle_outcome));
}

#[scenario(
    path = "tests/features/lifecycle.feature",
    name = "Mounting twice attaches once"
)]
fn scenario_attach_once(
    lifecycle_world: LifecycleWorld,
    lifecycle_outcome: LifecycleOutcome,
) {
    drop((lifecycle_world, lifecycle_outcome));
}

#[scenario(
    path = "tests/features/lifecycle.feature",
    name = "Device never appears"
)]
fn scenario_device_timeout(
    lifecycle_world: LifecycleWorld,
    lifecycle_outcome: LifecycleOutcome,
) {
    drop((lifecycle_world, lifecycle_outcome));
}

#[scenario(
    path = "tests/features/lifecycle.feature",
    name = "Existing filesystem is never reformatted"
)]
fn scenario_format_on_demand(
    lifecycle_world: LifecycleWorld,
    lifecycle_outcome: LifecycleOutcome,
) {
    drop((lifecycle_world, lifecycle_outcome));
}

#[scenario(
    path = "tests/features/lifecycle.feature",
    name = "Mount waits once for a volume still being created"
)]
fn scenario_creating_recheck(
    lifecycle_world: LifecycleWorld,
    lifecycle_outcome: LifecycleOutcome,
) {
    drop((lifecycle_world, lifecycle_outcome));
}

#[scenario(
    path = "tests/features/lifecycle.feature",
    name = "Refuse to remove a volume in use"
)]
fn scenario_remove_in_use(
    lifecycle_world: LifecycleWorld,
    lifecycle_outcome: LifecycleOutcome,
) {
    drop((lifecycle_world, lifecycle_outcome));
}
