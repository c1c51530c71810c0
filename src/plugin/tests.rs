//! Router and socket tests for the plugin protocol.

use std::os::unix::fs::PermissionsExt;
use std::time::Duration;

use axum::body::Body;
use axum::http::Request;
use rstest::{fixture, rstest};
use serde_json::{Value, json};
use tempfile::TempDir;
use tower::ServiceExt;

use super::*;
use crate::host::{FsType, HostError};
use crate::lifecycle::{LifecycleContext, LifecycleSettings};
use crate::test_support::{GatewayCall, HostFailure, MemoryGateway, RecordingHost};
use crate::volume::{VolumeDefaults, VolumeStatus};

const SELF_ID: &str = "inst-self";

struct Plugin {
    gateway: MemoryGateway,
    host: RecordingHost,
    router: Router,
}

impl Plugin {
    async fn call(&self, path: &str, body: &str) -> (StatusCode, Option<String>, Value) {
        let request = Request::post(path)
            .header(header::CONTENT_TYPE, PLUGIN_CONTENT_TYPE)
            .body(Body::from(body.to_owned()))
            .unwrap_or_else(|err| panic!("request should build: {err}"));
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .unwrap_or_else(|err| panic!("router should respond: {err}"));
        let status = response.status();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap_or_else(|err| panic!("body should be readable: {err}"));
        let value = serde_json::from_slice(&bytes)
            .unwrap_or_else(|err| panic!("body should be JSON: {err}"));
        (status, content_type, value)
    }
}

#[fixture]
fn plugin() -> Plugin {
    let gateway = MemoryGateway::new();
    let host = RecordingHost::new();
    let context = LifecycleContext {
        mount_root: Utf8PathBuf::from("/mnt/ovh"),
        instance_id: String::from(SELF_ID),
        defaults: VolumeDefaults {
            region: String::from("GRA7"),
            size_gib: 10,
            volume_type: String::from("classic"),
        },
        filesystem: FsType::Ext4,
        device_directory: Utf8PathBuf::from("/dev/disk/by-id"),
        device_prefix: String::from("virtio-"),
    };
    let orchestrator = LifecycleOrchestrator::new(gateway.clone(), host.clone(), context)
        .with_settings(LifecycleSettings {
            creating_recheck_delay: Duration::ZERO,
            device_attempts: 2,
        });
    Plugin {
        gateway,
        host,
        router: router(Arc::new(orchestrator)),
    }
}

#[rstest]
#[tokio::test]
async fn activate_advertises_volume_driver(plugin: Plugin) {
    let (status, content_type, body) = plugin.call("/Plugin.Activate", "").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(content_type.as_deref(), Some(PLUGIN_CONTENT_TYPE));
    assert_eq!(body, json!({"Implements": ["VolumeDriver"]}));
}

#[rstest]
#[tokio::test]
async fn capabilities_report_global_scope(plugin: Plugin) {
    let (_, _, body) = plugin.call("/VolumeDriver.Capabilities", "{}").await;

    assert_eq!(body, json!({"Capabilities": {"Scope": "global"}}));
}

#[rstest]
#[tokio::test]
async fn create_passes_options_through(plugin: Plugin) {
    let (status, _, body) = plugin
        .call(
            "/VolumeDriver.Create",
            r#"{"Name":"data1","Opts":{"size":"25","type":"high-speed"}}"#,
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({}));
    let mutations = plugin.gateway.mutations();
    let [GatewayCall::CreateVolume(spec)] = mutations.as_slice() else {
        panic!("expected one create call, got {mutations:?}");
    };
    assert_eq!(spec.size, 25);
    assert_eq!(spec.volume_type, "high-speed");
    assert!(plugin.host.is_tracked(Utf8Path::new("/mnt/ovh/data1")));
}

#[rstest]
#[tokio::test]
async fn create_accepts_null_options(plugin: Plugin) {
    let (_, _, body) = plugin
        .call("/VolumeDriver.Create", r#"{"Name":"data1","Opts":null}"#)
        .await;

    assert_eq!(body, json!({}));
}

#[rstest]
#[tokio::test]
async fn lifecycle_errors_are_reported_in_err(plugin: Plugin) {
    plugin
        .gateway
        .insert_volume("data1", VolumeStatus::InUse, &["inst-other"]);

    let (status, _, body) = plugin
        .call("/VolumeDriver.Remove", r#"{"Name":"data1"}"#)
        .await;

    assert_eq!(status, StatusCode::OK);
    let err = body.get("Err").and_then(Value::as_str).unwrap_or_default();
    assert!(err.contains("cannot delete volume while in in-use state"), "{err}");
}

#[rstest]
#[tokio::test]
async fn mount_returns_mountpoint(plugin: Plugin) {
    plugin
        .gateway
        .insert_volume("data1", VolumeStatus::Available, &[]);
    plugin.host.attach_device("/dev/vdb");

    let (_, _, body) = plugin
        .call("/VolumeDriver.Mount", r#"{"Name":"data1","ID":"abc123"}"#)
        .await;

    assert_eq!(body, json!({"Mountpoint": "/mnt/ovh/data1"}));
}

#[rstest]
#[tokio::test]
async fn mount_failure_omits_mountpoint(plugin: Plugin) {
    plugin
        .gateway
        .insert_volume("data1", VolumeStatus::Available, &[]);
    plugin.host.attach_device("/dev/vdb");
    plugin.host.fail(
        HostFailure::Mount,
        HostError::CommandFailure {
            program: String::from("mount"),
            status: Some(32),
            status_text: String::from("32"),
            output: String::from("wrong fs type"),
        },
    );

    let (_, _, body) = plugin
        .call("/VolumeDriver.Mount", r#"{"Name":"data1","ID":"abc123"}"#)
        .await;

    assert!(body.get("Mountpoint").is_none(), "{body}");
    let err = body.get("Err").and_then(Value::as_str).unwrap_or_default();
    assert!(err.contains("wrong fs type"), "{err}");
}

#[rstest]
#[tokio::test]
async fn unmount_of_unmounted_volume_succeeds(plugin: Plugin) {
    plugin
        .gateway
        .insert_volume("data1", VolumeStatus::InUse, &[SELF_ID]);

    let (_, _, body) = plugin
        .call("/VolumeDriver.Unmount", r#"{"Name":"data1","ID":"abc123"}"#)
        .await;

    assert_eq!(body, json!({}));
    assert!(plugin.gateway.mutations().is_empty());
}

#[rstest]
#[tokio::test]
async fn path_is_reported_for_unknown_volume(plugin: Plugin) {
    let (_, _, body) = plugin
        .call("/VolumeDriver.Path", r#"{"Name":"ghost"}"#)
        .await;

    assert_eq!(body, json!({"Mountpoint": "/mnt/ovh/ghost"}));
    assert!(plugin.gateway.calls().is_empty());
}

#[rstest]
#[tokio::test]
async fn get_describes_volume_or_reports_absence(plugin: Plugin) {
    plugin
        .gateway
        .insert_volume("data1", VolumeStatus::Available, &[]);

    let (_, _, found) = plugin
        .call("/VolumeDriver.Get", r#"{"Name":"data1"}"#)
        .await;
    let (_, _, missing) = plugin
        .call("/VolumeDriver.Get", r#"{"Name":"ghost"}"#)
        .await;

    assert_eq!(
        found,
        json!({"Volume": {
            "Name": "data1",
            "Mountpoint": "/mnt/ovh/data1",
            "Status": {"status": "available"}
        }})
    );
    assert_eq!(missing, json!({"Err": "volume ghost not found"}));
}

#[rstest]
#[tokio::test]
async fn list_returns_every_volume(plugin: Plugin) {
    plugin
        .gateway
        .insert_volume("data1", VolumeStatus::Available, &[]);
    plugin
        .gateway
        .insert_volume("data2", VolumeStatus::InUse, &[SELF_ID]);

    let (_, _, body) = plugin.call("/VolumeDriver.List", "").await;

    let names = body
        .get("Volumes")
        .and_then(Value::as_array)
        .map(|volumes| {
            volumes
                .iter()
                .filter_map(|volume| volume.get("Name").and_then(Value::as_str))
                .map(str::to_owned)
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();
    assert_eq!(names, vec!["data1", "data2"]);
}

#[rstest]
#[case("/VolumeDriver.Create", "not json")]
#[case("/VolumeDriver.Mount", r#"{"ID":"abc"}"#)]
#[case("/VolumeDriver.Remove", "")]
#[tokio::test]
async fn malformed_body_is_rejected(plugin: Plugin, #[case] path: &str, #[case] body: &str) {
    let (status, _, response) = plugin.call(path, body).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    let err = response
        .get("Err")
        .and_then(Value::as_str)
        .unwrap_or_default();
    assert!(err.starts_with("malformed request body"), "{err}");
    assert!(plugin.gateway.calls().is_empty());
}

fn current_group() -> String {
    nix::unistd::Group::from_gid(nix::unistd::getegid())
        .ok()
        .flatten()
        .map(|group| group.name)
        .unwrap_or_else(|| panic!("current group should resolve"))
}

#[rstest]
#[tokio::test]
async fn bind_replaces_stale_socket() {
    let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let root = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf())
        .unwrap_or_else(|err| panic!("utf8 temp path: {}", err.display()));
    let socket = SocketSettings {
        path: root.join("plugins").join("ovh.sock"),
        group: current_group(),
    };
    std::fs::create_dir_all(root.join("plugins"))
        .unwrap_or_else(|err| panic!("create dir: {err}"));
    std::fs::write(&socket.path, b"stale").unwrap_or_else(|err| panic!("stale file: {err}"));

    let listener = bind_socket(&socket).unwrap_or_else(|err| panic!("bind should succeed: {err}"));

    let metadata = std::fs::metadata(&socket.path).unwrap_or_else(|err| panic!("stat: {err}"));
    assert_eq!(metadata.permissions().mode() & 0o777, 0o660);
    assert!(!metadata.is_file(), "stale regular file should be replaced");
    drop(listener);
}

#[rstest]
#[tokio::test]
async fn bind_rejects_unknown_group() {
    let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let root = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf())
        .unwrap_or_else(|err| panic!("utf8 temp path: {}", err.display()));
    let socket = SocketSettings {
        path: root.join("ovh.sock"),
        group: String::from("ovhvol-no-such-group"),
    };

    let err = bind_socket(&socket).expect_err("unknown group should fail");

    assert!(matches!(err, PluginError::Group { .. }), "{err:?}");
}
