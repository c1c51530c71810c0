//! Docker volume plugin protocol served over a Unix socket.
//!
//! Every endpoint is a `POST` carrying JSON. Lifecycle failures are reported
//! as HTTP 200 with a non-empty `Err` field, as Docker expects; only a body
//! that cannot be decoded is answered with 400.

use std::fmt::Display;
use std::os::unix::fs::PermissionsExt;
use std::sync::Arc;

use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::net::UnixListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::host::HostOps;
use crate::lifecycle::LifecycleOrchestrator;
use crate::volume::{CreateOptions, VolumeGateway};

mod types;

pub use types::{
    ActivateResponse, CapabilitiesBody, CapabilitiesResponse, CreateRequest, ErrResponse,
    GetResponse, ListResponse, MountRequest, MountpointResponse, NameRequest, VolumeDescriptor,
};

/// Content type of every plugin response.
pub const PLUGIN_CONTENT_TYPE: &str = "application/vnd.docker.plugins.v1.2+json";

/// Default socket Docker discovers the plugin through.
pub const DEFAULT_SOCKET_PATH: &str = "/run/docker/plugins/ovh.sock";

const SOCKET_MODE: u32 = 0o660;

/// Errors raised while serving the plugin socket.
#[derive(Debug, Error)]
pub enum PluginError {
    /// Raised when the socket cannot be prepared or bound.
    #[error("failed to prepare socket {path}: {message}")]
    Socket {
        /// Socket path.
        path: Utf8PathBuf,
        /// Operating system error string.
        message: String,
    },
    /// Raised when the socket group cannot be resolved or applied.
    #[error("failed to hand socket to group {group}: {message}")]
    Group {
        /// Requested group name.
        group: String,
        /// Failure detail.
        message: String,
    },
    /// Raised when the HTTP server stops with an error.
    #[error("plugin server failed: {0}")]
    Serve(String),
}

/// Shared orchestrator handle used as router state.
pub type SharedOrchestrator<G, H> = Arc<LifecycleOrchestrator<G, H>>;

/// JSON response tagged with the plugin content type.
#[derive(Clone, Debug)]
pub struct PluginJson<T>(pub T);

impl<T: Serialize> IntoResponse for PluginJson<T> {
    fn into_response(self) -> Response {
        match serde_json::to_vec(&self.0) {
            Ok(body) => ([(header::CONTENT_TYPE, PLUGIN_CONTENT_TYPE)], body).into_response(),
            Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response(),
        }
    }
}

/// Rejection for request bodies that do not decode.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("malformed request body: {0}")]
pub struct BadRequest(String);

impl IntoResponse for BadRequest {
    fn into_response(self) -> Response {
        let body = ErrResponse {
            err: self.to_string(),
        };
        (StatusCode::BAD_REQUEST, PluginJson(body)).into_response()
    }
}

fn decode<T: DeserializeOwned>(body: &Bytes) -> Result<T, BadRequest> {
    serde_json::from_slice(body).map_err(|err| {
        warn!(error = %err, "rejecting malformed plugin request");
        BadRequest(err.to_string())
    })
}

fn report<E: Display>(operation: &'static str, name: &str, err: &E) -> String {
    error!(operation, volume = name, error = %err, "lifecycle operation failed");
    err.to_string()
}

/// Builds the plugin router around a shared orchestrator.
pub fn router<G, H>(orchestrator: SharedOrchestrator<G, H>) -> Router
where
    G: VolumeGateway + Send + Sync + 'static,
    H: HostOps + Send + Sync + 'static,
{
    Router::new()
        .route("/Plugin.Activate", post(activate))
        .route("/VolumeDriver.Create", post(create::<G, H>))
        .route("/VolumeDriver.Remove", post(remove::<G, H>))
        .route("/VolumeDriver.Mount", post(mount::<G, H>))
        .route("/VolumeDriver.Unmount", post(unmount::<G, H>))
        .route("/VolumeDriver.Path", post(path::<G, H>))
        .route("/VolumeDriver.Get", post(get::<G, H>))
        .route("/VolumeDriver.List", post(list::<G, H>))
        .route("/VolumeDriver.Capabilities", post(capabilities::<G, H>))
        .layer(TraceLayer::new_for_http())
        .with_state(orchestrator)
}

async fn activate() -> PluginJson<ActivateResponse> {
    PluginJson(ActivateResponse::default())
}

async fn create<G, H>(
    State(orchestrator): State<SharedOrchestrator<G, H>>,
    body: Bytes,
) -> Result<PluginJson<ErrResponse>, BadRequest>
where
    G: VolumeGateway + Send + Sync + 'static,
    H: HostOps + Send + Sync + 'static,
{
    let request: CreateRequest = decode(&body)?;
    let options = CreateOptions::from(request.opts.unwrap_or_default());
    let err = match orchestrator.create(&request.name, &options).await {
        Ok(()) => String::new(),
        Err(err) => report("create", &request.name, &err),
    };
    Ok(PluginJson(ErrResponse { err }))
}

async fn remove<G, H>(
    State(orchestrator): State<SharedOrchestrator<G, H>>,
    body: Bytes,
) -> Result<PluginJson<ErrResponse>, BadRequest>
where
    G: VolumeGateway + Send + Sync + 'static,
    H: HostOps + Send + Sync + 'static,
{
    let request: NameRequest = decode(&body)?;
    let err = match orchestrator.remove(&request.name).await {
        Ok(()) => String::new(),
        Err(err) => report("remove", &request.name, &err),
    };
    Ok(PluginJson(ErrResponse { err }))
}

async fn mount<G, H>(
    State(orchestrator): State<SharedOrchestrator<G, H>>,
    body: Bytes,
) -> Result<PluginJson<MountpointResponse>, BadRequest>
where
    G: VolumeGateway + Send + Sync + 'static,
    H: HostOps + Send + Sync + 'static,
{
    let request: MountRequest = decode(&body)?;
    let response = match orchestrator.mount(&request.name).await {
        Ok(path) => MountpointResponse {
            mountpoint: path.into_string(),
            err: String::new(),
        },
        Err(err) => MountpointResponse {
            mountpoint: String::new(),
            err: report("mount", &request.name, &err),
        },
    };
    Ok(PluginJson(response))
}

async fn unmount<G, H>(
    State(orchestrator): State<SharedOrchestrator<G, H>>,
    body: Bytes,
) -> Result<PluginJson<ErrResponse>, BadRequest>
where
    G: VolumeGateway + Send + Sync + 'static,
    H: HostOps + Send + Sync + 'static,
{
    let request: MountRequest = decode(&body)?;
    let err = match orchestrator.unmount(&request.name).await {
        Ok(()) => String::new(),
        Err(err) => report("unmount", &request.name, &err),
    };
    Ok(PluginJson(ErrResponse { err }))
}

async fn path<G, H>(
    State(orchestrator): State<SharedOrchestrator<G, H>>,
    body: Bytes,
) -> Result<PluginJson<MountpointResponse>, BadRequest>
where
    G: VolumeGateway + Send + Sync + 'static,
    H: HostOps + Send + Sync + 'static,
{
    let request: NameRequest = decode(&body)?;
    Ok(PluginJson(MountpointResponse {
        mountpoint: orchestrator.path(&request.name).into_string(),
        err: String::new(),
    }))
}

async fn get<G, H>(
    State(orchestrator): State<SharedOrchestrator<G, H>>,
    body: Bytes,
) -> Result<PluginJson<GetResponse>, BadRequest>
where
    G: VolumeGateway + Send + Sync + 'static,
    H: HostOps + Send + Sync + 'static,
{
    let request: NameRequest = decode(&body)?;
    let response = match orchestrator.get(&request.name).await {
        Ok(info) => GetResponse {
            volume: Some(info.into()),
            err: String::new(),
        },
        Err(err) => GetResponse {
            volume: None,
            err: report("get", &request.name, &err),
        },
    };
    Ok(PluginJson(response))
}

async fn list<G, H>(
    State(orchestrator): State<SharedOrchestrator<G, H>>,
) -> PluginJson<ListResponse>
where
    G: VolumeGateway + Send + Sync + 'static,
    H: HostOps + Send + Sync + 'static,
{
    let response = match orchestrator.list().await {
        Ok(volumes) => ListResponse {
            volumes: volumes.into_iter().map(VolumeDescriptor::from).collect(),
            err: String::new(),
        },
        Err(err) => ListResponse {
            volumes: Vec::new(),
            err: report("list", "*", &err),
        },
    };
    PluginJson(response)
}

async fn capabilities<G, H>(
    State(orchestrator): State<SharedOrchestrator<G, H>>,
) -> PluginJson<CapabilitiesResponse>
where
    G: VolumeGateway + Send + Sync + 'static,
    H: HostOps + Send + Sync + 'static,
{
    PluginJson(orchestrator.capabilities().into())
}

/// Socket location and ownership.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SocketSettings {
    /// Socket path.
    pub path: Utf8PathBuf,
    /// Group that owns the socket.
    pub group: String,
}

/// Binds the socket, hands it to the configured group, and serves the
/// plugin until Ctrl-C. The socket file is removed on shutdown.
///
/// # Errors
///
/// Returns [`PluginError::Socket`] when the socket cannot be bound,
/// [`PluginError::Group`] when the group is unknown or cannot be applied,
/// and [`PluginError::Serve`] when the server fails.
pub async fn serve<G, H>(
    socket: &SocketSettings,
    orchestrator: SharedOrchestrator<G, H>,
) -> Result<(), PluginError>
where
    G: VolumeGateway + Send + Sync + 'static,
    H: HostOps + Send + Sync + 'static,
{
    let listener = bind_socket(socket)?;
    info!(socket = %socket.path, group = %socket.group, "serving Docker volume plugin");

    let served = axum::serve(listener, router(orchestrator))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| PluginError::Serve(err.to_string()));

    if let Err(err) = remove_stale_socket(&socket.path) {
        warn!(error = %err, "could not remove socket on shutdown");
    }
    served
}

/// Removes any stale socket, binds a new one, and applies mode `0660` and
/// the configured group.
///
/// # Errors
///
/// Returns [`PluginError::Socket`] or [`PluginError::Group`].
pub fn bind_socket(socket: &SocketSettings) -> Result<UnixListener, PluginError> {
    let socket_error = |message: String| PluginError::Socket {
        path: socket.path.clone(),
        message,
    };

    if let Some(parent) = socket.path.parent().filter(|dir| !dir.as_str().is_empty()) {
        Dir::create_ambient_dir_all(parent, ambient_authority())
            .map_err(|err| socket_error(err.to_string()))?;
    }
    remove_stale_socket(&socket.path)?;

    let listener = UnixListener::bind(socket.path.as_std_path())
        .map_err(|err| socket_error(err.to_string()))?;
    std::fs::set_permissions(
        socket.path.as_std_path(),
        std::fs::Permissions::from_mode(SOCKET_MODE),
    )
    .map_err(|err| socket_error(err.to_string()))?;
    apply_group(&socket.path, &socket.group)?;
    Ok(listener)
}

fn remove_stale_socket(path: &Utf8Path) -> Result<(), PluginError> {
    let socket_error = |message: String| PluginError::Socket {
        path: path.to_path_buf(),
        message,
    };
    let parent = path
        .parent()
        .filter(|dir| !dir.as_str().is_empty())
        .unwrap_or_else(|| Utf8Path::new("."));
    let dir = Dir::open_ambient_dir(parent, ambient_authority())
        .map_err(|err| socket_error(err.to_string()))?;
    let Some(name) = path.file_name() else {
        return Err(socket_error(String::from("socket path has no file name")));
    };
    match dir.remove_file(name) {
        Ok(()) => {
            info!(socket = %path, "removed stale socket");
            Ok(())
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(socket_error(err.to_string())),
    }
}

fn apply_group(path: &Utf8Path, group: &str) -> Result<(), PluginError> {
    let group_error = |message: String| PluginError::Group {
        group: group.to_owned(),
        message,
    };
    let entry = nix::unistd::Group::from_name(group)
        .map_err(|errno| group_error(errno.desc().to_owned()))?
        .ok_or_else(|| group_error(String::from("no such group")))?;
    nix::unistd::chown(path.as_std_path(), None, Some(entry.gid))
        .map_err(|errno| group_error(errno.desc().to_owned()))
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

#[cfg(test)]
mod tests;
