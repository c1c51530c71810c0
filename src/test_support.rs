//! Test support utilities shared across unit and integration tests.
//!
//! The doubles here record every call and keep their state behind
//! `Arc<Mutex<_>>`, so clones handed to the code under test stay observable
//! from the test body and satisfy the `Send + Sync` bounds of the
//! orchestrator.

use std::collections::{BTreeSet, VecDeque};
use std::env;
use std::ffi::OsString;
use std::net::IpAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;

use crate::host::{
    CommandOutput, CommandRunner, DevicePattern, FsType, HostError, HostFuture, HostOps,
    UnmountOutcome,
};
use crate::volume::{
    GatewayFuture, Instance, InstanceIp, Volume, VolumeGateway, VolumeSpec, VolumeStatus,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn yield_turns(turns: u32) {
    for _ in 0..turns {
        tokio::task::yield_now().await;
    }
}

/// Scripted command runner that returns pre-seeded outputs in FIFO order.
///
/// Used to drive deterministic command outcomes without spawning processes.
#[derive(Clone, Debug, Default)]
pub struct ScriptedRunner {
    responses: Arc<Mutex<VecDeque<CommandOutput>>>,
    invocations: Arc<Mutex<Vec<CommandInvocation>>>,
}

/// Records a single invocation made through [`ScriptedRunner`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandInvocation {
    /// Program name as passed to the runner.
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<OsString>,
}

impl CommandInvocation {
    /// Returns a shell-like command string for assertions.
    #[must_use]
    pub fn command_string(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(self.program.clone());
        parts.extend(
            self.args
                .iter()
                .map(|arg| arg.to_string_lossy().into_owned()),
        );
        parts.join(" ")
    }
}

impl ScriptedRunner {
    /// Creates a new runner with no queued responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of all invocations recorded so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<CommandInvocation> {
        lock(&self.invocations).clone()
    }

    /// Pushes a successful exit status.
    pub fn push_success(&self) {
        self.push_output(Some(0), "", "");
    }

    /// Pushes a specific exit code with empty output.
    pub fn push_exit_code(&self, code: i32) {
        self.push_output(Some(code), "", "");
    }

    /// Pushes an explicit command output response.
    pub fn push_output(
        &self,
        code: Option<i32>,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) {
        lock(&self.responses).push_back(CommandOutput {
            code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        });
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, HostError> {
        lock(&self.invocations).push(CommandInvocation {
            program: program.to_owned(),
            args: args.to_vec(),
        });
        lock(&self.responses)
            .pop_front()
            .ok_or_else(|| HostError::Spawn {
                program: program.to_owned(),
                message: String::from("no scripted response available"),
            })
    }
}

/// Error raised by [`MemoryGateway`] when a failure has been injected.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("simulated {operation} failure")]
pub struct MemoryGatewayError {
    /// Gateway operation that was configured to fail.
    pub operation: String,
}

/// A gateway call recorded by [`MemoryGateway`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum GatewayCall {
    /// `list_volumes` was called.
    ListVolumes,
    /// `create_volume` was called with the given spec.
    CreateVolume(VolumeSpec),
    /// `delete_volume` was called for the volume id.
    DeleteVolume(String),
    /// `attach_volume` was called.
    AttachVolume {
        /// Volume identifier.
        volume_id: String,
        /// Instance identifier.
        instance_id: String,
    },
    /// `detach_volume` was called.
    DetachVolume {
        /// Volume identifier.
        volume_id: String,
        /// Instance identifier.
        instance_id: String,
    },
    /// `list_instances` was called.
    ListInstances,
}

impl GatewayCall {
    /// Returns `true` for calls that change remote state.
    #[must_use]
    pub const fn is_mutation(&self) -> bool {
        matches!(
            self,
            Self::CreateVolume(_)
                | Self::DeleteVolume(_)
                | Self::AttachVolume { .. }
                | Self::DetachVolume { .. }
        )
    }
}

#[derive(Debug, Default)]
struct GatewayState {
    volumes: Vec<Volume>,
    instances: Vec<Instance>,
    calls: Vec<GatewayCall>,
    failing: BTreeSet<String>,
    pending_transitions: Vec<(String, VolumeStatus)>,
    lookup_yields: u32,
    next_id: u32,
}

impl GatewayState {
    fn record(&mut self, call: GatewayCall, operation: &str) -> Result<(), MemoryGatewayError> {
        self.calls.push(call);
        if self.failing.contains(operation) {
            return Err(MemoryGatewayError {
                operation: operation.to_owned(),
            });
        }
        Ok(())
    }

    fn volume_mut(
        &mut self,
        volume_id: &str,
        operation: &str,
    ) -> Result<&mut Volume, MemoryGatewayError> {
        self.volumes
            .iter_mut()
            .find(|volume| volume.id == volume_id)
            .ok_or_else(|| MemoryGatewayError {
                operation: format!("{operation} of unknown volume {volume_id}"),
            })
    }
}

/// In-memory [`VolumeGateway`] modelling the provider's attach semantics.
///
/// Attaching moves a volume to `in-use` with the instance in `attachedTo`;
/// detaching returns it to `available`.
#[derive(Clone, Debug, Default)]
pub struct MemoryGateway {
    state: Arc<Mutex<GatewayState>>,
}

impl MemoryGateway {
    /// Creates an empty project.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a volume with the given status and attachments and returns its id.
    pub fn insert_volume(&self, name: &str, status: VolumeStatus, attached_to: &[&str]) -> String {
        let mut state = lock(&self.state);
        let id = synthetic_volume_id(state.next_id);
        state.next_id += 1;
        state.volumes.push(Volume {
            id: id.clone(),
            name: name.to_owned(),
            description: String::new(),
            attached_to: attached_to.iter().map(|&instance| instance.to_owned()).collect(),
            status,
            size: 10,
            volume_type: String::from("classic"),
            region: String::from("GRA7"),
        });
        id
    }

    /// Seeds an instance owning `ips`.
    pub fn insert_instance(&self, id: &str, ips: &[IpAddr]) {
        lock(&self.state).instances.push(Instance {
            id: id.to_owned(),
            name: id.to_owned(),
            status: String::from("ACTIVE"),
            region: String::from("GRA7"),
            ip_addresses: ips
                .iter()
                .map(|ip| InstanceIp {
                    ip: ip.to_string(),
                    ip_type: String::from("public"),
                    version: if ip.is_ipv4() { 4 } else { 6 },
                })
                .collect(),
        });
    }

    /// Makes `operation` (for example `"attach_volume"`) fail from now on.
    pub fn fail(&self, operation: &str) {
        lock(&self.state).failing.insert(operation.to_owned());
    }

    /// Changes the status of `name` right after the next `list_volumes` call
    /// has taken its snapshot.
    pub fn transition_after_lookup(&self, name: &str, status: VolumeStatus) {
        lock(&self.state)
            .pending_transitions
            .push((name.to_owned(), status));
    }

    /// Makes every `list_volumes` call hand control back to the scheduler
    /// `turns` times before returning, so concurrent callers can interleave.
    pub fn yield_on_lookup(&self, turns: u32) {
        lock(&self.state).lookup_yields = turns;
    }

    /// Returns the current state of the volume called `name`.
    #[must_use]
    pub fn volume(&self, name: &str) -> Option<Volume> {
        lock(&self.state)
            .volumes
            .iter()
            .find(|volume| volume.name == name)
            .cloned()
    }

    /// Returns every recorded call.
    #[must_use]
    pub fn calls(&self) -> Vec<GatewayCall> {
        lock(&self.state).calls.clone()
    }

    /// Returns only the recorded calls that change remote state.
    #[must_use]
    pub fn mutations(&self) -> Vec<GatewayCall> {
        lock(&self.state)
            .calls
            .iter()
            .filter(|call| call.is_mutation())
            .cloned()
            .collect()
    }

    /// Counts recorded `list_volumes` calls.
    #[must_use]
    pub fn lookup_count(&self) -> usize {
        lock(&self.state)
            .calls
            .iter()
            .filter(|call| matches!(call, GatewayCall::ListVolumes))
            .count()
    }
}

fn synthetic_volume_id(seed: u32) -> String {
    format!("{seed:08x}-5c1d-4e0b-9a7f-{seed:012x}")
}

impl VolumeGateway for MemoryGateway {
    type Error = MemoryGatewayError;

    fn list_volumes(&self) -> GatewayFuture<'_, Vec<Volume>, Self::Error> {
        Box::pin(async move {
            let (snapshot, turns) = {
                let mut state = lock(&self.state);
                state.record(GatewayCall::ListVolumes, "list_volumes")?;
                let volumes = state.volumes.clone();
                let transitions = std::mem::take(&mut state.pending_transitions);
                for (name, status) in transitions {
                    if let Some(volume) =
                        state.volumes.iter_mut().find(|volume| volume.name == name)
                    {
                        volume.status = status;
                    }
                }
                (volumes, state.lookup_yields)
            };
            yield_turns(turns).await;
            Ok(snapshot)
        })
    }

    fn create_volume<'a>(&'a self, spec: &'a VolumeSpec) -> GatewayFuture<'a, Volume, Self::Error> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            state.record(GatewayCall::CreateVolume(spec.clone()), "create_volume")?;
            let volume = Volume {
                id: synthetic_volume_id(state.next_id),
                name: spec.name.clone(),
                description: spec.description.clone(),
                attached_to: Vec::new(),
                status: VolumeStatus::Available,
                size: spec.size,
                volume_type: spec.volume_type.clone(),
                region: spec.region.clone(),
            };
            state.next_id += 1;
            state.volumes.push(volume.clone());
            Ok(volume)
        })
    }

    fn delete_volume<'a>(&'a self, volume_id: &'a str) -> GatewayFuture<'a, (), Self::Error> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            state.record(GatewayCall::DeleteVolume(volume_id.to_owned()), "delete_volume")?;
            state.volumes.retain(|volume| volume.id != volume_id);
            Ok(())
        })
    }

    fn attach_volume<'a>(
        &'a self,
        volume_id: &'a str,
        instance_id: &'a str,
    ) -> GatewayFuture<'a, Volume, Self::Error> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            let call = GatewayCall::AttachVolume {
                volume_id: volume_id.to_owned(),
                instance_id: instance_id.to_owned(),
            };
            state.record(call, "attach_volume")?;
            let volume = state.volume_mut(volume_id, "attach")?;
            volume.status = VolumeStatus::InUse;
            volume.attached_to = vec![instance_id.to_owned()];
            Ok(volume.clone())
        })
    }

    fn detach_volume<'a>(
        &'a self,
        volume_id: &'a str,
        instance_id: &'a str,
    ) -> GatewayFuture<'a, Volume, Self::Error> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            let call = GatewayCall::DetachVolume {
                volume_id: volume_id.to_owned(),
                instance_id: instance_id.to_owned(),
            };
            state.record(call, "detach_volume")?;
            let volume = state.volume_mut(volume_id, "detach")?;
            volume.status = VolumeStatus::Available;
            volume.attached_to.retain(|id| id != instance_id);
            Ok(volume.clone())
        })
    }

    fn list_instances(&self) -> GatewayFuture<'_, Vec<Instance>, Self::Error> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            state.record(GatewayCall::ListInstances, "list_instances")?;
            Ok(state.instances.clone())
        })
    }
}

/// A host operation recorded by [`RecordingHost`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum HostCall {
    /// A device wait was requested.
    WaitForDevice {
        /// Rendered device pattern.
        pattern: String,
        /// Maximum number of attempts requested.
        max_attempts: u32,
    },
    /// The filesystem on the device was probed.
    Probe(Utf8PathBuf),
    /// The device was formatted.
    Format {
        /// Device path.
        device: Utf8PathBuf,
        /// Filesystem type requested.
        fs_type: FsType,
    },
    /// The device was mounted.
    Mount {
        /// Device path.
        device: Utf8PathBuf,
        /// Mount path.
        mount_path: Utf8PathBuf,
    },
    /// The path was unmounted.
    Unmount(Utf8PathBuf),
    /// The mount table was consulted for the path.
    IsMounted(Utf8PathBuf),
    /// A tracking directory was created.
    CreateTrackingDir(Utf8PathBuf),
    /// A tracking directory was removed.
    RemoveTrackingDir(Utf8PathBuf),
}

#[derive(Debug, Default)]
struct HostState {
    device: Option<Utf8PathBuf>,
    filesystem: Option<String>,
    mounted: BTreeSet<Utf8PathBuf>,
    tracking_dirs: BTreeSet<Utf8PathBuf>,
    failures: Vec<(HostFailure, HostError)>,
    device_wait_yields: u32,
    calls: Vec<HostCall>,
}

impl HostState {
    fn failure(&self, kind: HostFailure) -> Option<HostError> {
        self.failures
            .iter()
            .find(|(candidate, _)| *candidate == kind)
            .map(|(_, err)| err.clone())
    }
}

/// Host operations that [`RecordingHost`] can be told to fail.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum HostFailure {
    /// `format_filesystem` fails.
    Format,
    /// `mount` fails.
    Mount,
    /// `unmount` fails.
    Unmount,
    /// `is_mounted` fails.
    IsMounted,
    /// `create_tracking_dir` fails.
    CreateTrackingDir,
    /// `remove_tracking_dir` fails.
    RemoveTrackingDir,
}

/// In-memory [`HostOps`] implementation that records every call.
///
/// Mounting adds the path to an in-memory mount set, formatting sets the
/// probed filesystem, and unmounting a path outside the set reports
/// [`UnmountOutcome::NotMounted`].
#[derive(Clone, Debug, Default)]
pub struct RecordingHost {
    state: Arc<Mutex<HostState>>,
}

impl RecordingHost {
    /// Creates a host with no device, no filesystem and no mounts.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every device wait resolve to `device`.
    pub fn attach_device(&self, device: impl Into<Utf8PathBuf>) {
        lock(&self.state).device = Some(device.into());
    }

    /// Makes every device wait hand control back to the scheduler `turns`
    /// times before resolving.
    pub fn yield_on_device_wait(&self, turns: u32) {
        lock(&self.state).device_wait_yields = turns;
    }

    /// Sets the filesystem reported by probes.
    pub fn set_filesystem(&self, filesystem: Option<&str>) {
        lock(&self.state).filesystem = filesystem.map(str::to_owned);
    }

    /// Marks `path` as having an active mount.
    pub fn mark_mounted(&self, path: impl Into<Utf8PathBuf>) {
        lock(&self.state).mounted.insert(path.into());
    }

    /// Marks `path` as an existing tracking directory.
    pub fn mark_tracked(&self, path: impl Into<Utf8PathBuf>) {
        lock(&self.state).tracking_dirs.insert(path.into());
    }

    /// Makes the given operation fail with `error` from now on.
    pub fn fail(&self, operation: HostFailure, error: HostError) {
        lock(&self.state).failures.push((operation, error));
    }

    /// Returns every recorded call.
    #[must_use]
    pub fn calls(&self) -> Vec<HostCall> {
        lock(&self.state).calls.clone()
    }

    /// Returns `true` when `path` is currently a tracking directory.
    #[must_use]
    pub fn is_tracked(&self, path: &Utf8Path) -> bool {
        lock(&self.state).tracking_dirs.contains(path)
    }

    /// Returns `true` when `path` currently has an active mount.
    #[must_use]
    pub fn has_mount(&self, path: &Utf8Path) -> bool {
        lock(&self.state).mounted.contains(path)
    }

    /// Counts recorded calls matching `predicate`.
    #[must_use]
    pub fn count_calls(&self, predicate: impl Fn(&HostCall) -> bool) -> usize {
        lock(&self.state)
            .calls
            .iter()
            .filter(|call| predicate(call))
            .count()
    }
}

impl HostOps for RecordingHost {
    fn wait_for_device<'a>(
        &'a self,
        pattern: &'a DevicePattern,
        max_attempts: u32,
    ) -> HostFuture<'a, Option<Utf8PathBuf>> {
        Box::pin(async move {
            let (device, turns) = {
                let mut state = lock(&self.state);
                state.calls.push(HostCall::WaitForDevice {
                    pattern: pattern.to_string(),
                    max_attempts,
                });
                (state.device.clone(), state.device_wait_yields)
            };
            yield_turns(turns).await;
            device
        })
    }

    fn probe_filesystem(&self, device: &Utf8Path) -> Option<String> {
        let mut state = lock(&self.state);
        state.calls.push(HostCall::Probe(device.to_path_buf()));
        state.filesystem.clone()
    }

    fn format_filesystem(&self, device: &Utf8Path, fs_type: FsType) -> Result<(), HostError> {
        let mut state = lock(&self.state);
        state.calls.push(HostCall::Format {
            device: device.to_path_buf(),
            fs_type,
        });
        if let Some(err) = state.failure(HostFailure::Format) {
            return Err(err);
        }
        state.filesystem = Some(fs_type.as_str().to_owned());
        Ok(())
    }

    fn mount(&self, device: &Utf8Path, mount_path: &Utf8Path) -> Result<(), HostError> {
        let mut state = lock(&self.state);
        state.calls.push(HostCall::Mount {
            device: device.to_path_buf(),
            mount_path: mount_path.to_path_buf(),
        });
        if let Some(err) = state.failure(HostFailure::Mount) {
            return Err(err);
        }
        state.mounted.insert(mount_path.to_path_buf());
        Ok(())
    }

    fn unmount(&self, mount_path: &Utf8Path) -> Result<UnmountOutcome, HostError> {
        let mut state = lock(&self.state);
        state.calls.push(HostCall::Unmount(mount_path.to_path_buf()));
        if let Some(err) = state.failure(HostFailure::Unmount) {
            return Err(err);
        }
        if state.mounted.remove(mount_path) {
            Ok(UnmountOutcome::Unmounted)
        } else {
            Ok(UnmountOutcome::NotMounted)
        }
    }

    fn is_mounted(&self, mount_path: &Utf8Path) -> Result<bool, HostError> {
        let mut state = lock(&self.state);
        state.calls.push(HostCall::IsMounted(mount_path.to_path_buf()));
        if let Some(err) = state.failure(HostFailure::IsMounted) {
            return Err(err);
        }
        Ok(state.mounted.contains(mount_path))
    }

    fn create_tracking_dir(&self, path: &Utf8Path) -> Result<(), HostError> {
        let mut state = lock(&self.state);
        state.calls.push(HostCall::CreateTrackingDir(path.to_path_buf()));
        if let Some(err) = state.failure(HostFailure::CreateTrackingDir) {
            return Err(err);
        }
        state.tracking_dirs.insert(path.to_path_buf());
        Ok(())
    }

    fn remove_tracking_dir(&self, path: &Utf8Path) -> Result<(), HostError> {
        let mut state = lock(&self.state);
        state.calls.push(HostCall::RemoveTrackingDir(path.to_path_buf()));
        if let Some(err) = state.failure(HostFailure::RemoveTrackingDir) {
            return Err(err);
        }
        state.tracking_dirs.remove(path);
        Ok(())
    }
}

/// Global mutex used to serialise environment mutation in tests.
pub static ENV_LOCK: tokio::sync::Mutex<()> = tokio::sync::Mutex::const_new(());

/// Guard that holds the env mutex and restores variables on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: tokio::sync::MutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets multiple environment variables and clears `removed`, holding a
    /// global mutex until the guard drops.
    pub async fn set_vars(pairs: &[(&str, &str)], removed: &[&str]) -> Self {
        let guard = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(pairs.len() + removed.len());
        for (key, value) in pairs {
            previous.push(((*key).to_owned(), env::var_os(key)));
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`.
            unsafe { env::set_var(key, value) };
        }
        for key in removed {
            previous.push(((*key).to_owned(), env::var_os(key)));
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`.
            unsafe { env::remove_var(key) };
        }

        Self {
            previous,
            _guard: guard,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, old) in self.previous.iter().rev() {
            // SAFETY: Environment mutation is serialised by holding `_guard`.
            unsafe {
                match old {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }
    }
}
