//! Shared fixtures for lifecycle BDD scenarios.

use std::time::Duration;

use camino::Utf8PathBuf;
use ovhvol::host::FsType;
use ovhvol::test_support::{MemoryGateway, RecordingHost};
use ovhvol::volume::VolumeDefaults;
use ovhvol::{LifecycleContext, LifecycleOrchestrator, LifecycleSettings};
use rstest::fixture;

pub const SELF_ID: &str = "inst-self";
pub const OTHER_ID: &str = "inst-other";
pub const MOUNT_ROOT: &str = "/var/lib/ovhvol/mount";
pub const DEFAULT_REGION: &str = "GRA7";
pub const DEFAULT_TYPE: &str = "classic";

/// Remote project and local host shared by the steps of one scenario.
#[derive(Clone, Debug, Default)]
pub struct LifecycleWorld {
    pub gateway: MemoryGateway,
    pub host: RecordingHost,
}

impl LifecycleWorld {
    pub fn orchestrator(&self) -> LifecycleOrchestrator<MemoryGateway, RecordingHost> {
        let context = LifecycleContext {
            mount_root: Utf8PathBuf::from(MOUNT_ROOT),
            instance_id: String::from(SELF_ID),
            defaults: VolumeDefaults {
                region: String::from(DEFAULT_REGION),
                size_gib: 10,
                volume_type: String::from(DEFAULT_TYPE),
            },
            filesystem: FsType::Ext4,
            device_directory: Utf8PathBuf::from("/dev/disk/by-id"),
            device_prefix: String::from("virtio-"),
        };
        LifecycleOrchestrator::new(self.gateway.clone(), self.host.clone(), context).with_settings(
            LifecycleSettings {
                creating_recheck_delay: Duration::ZERO,
                device_attempts: 3,
            },
        )
    }

    pub fn mount_path(name: &str) -> Utf8PathBuf {
        Utf8PathBuf::from(MOUNT_ROOT).join(name)
    }
}

/// Results of the operations run by the `When` step, in order. `Ok` holds
/// the mount path for Mount and an empty string otherwise.
#[derive(Clone, Debug, Default)]
pub struct LifecycleOutcome {
    pub results: Vec<Result<String, String>>,
}

#[fixture]
pub fn lifecycle_world() -> LifecycleWorld {
    LifecycleWorld::default()
}

#[fixture]
pub fn lifecycle_outcome() -> LifecycleOutcome {
    LifecycleOutcome::default()
}
