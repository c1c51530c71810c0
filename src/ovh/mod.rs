//! OVH Public Cloud implementation of the volume gateway.
//!
//! Requests are signed with the application secret and consumer key as the
//! OVH API expects. The local clock can be aligned with the API clock once
//! at startup through [`OvhGateway::sync_clock`].

mod error;
mod signing;

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use reqwest::Method;
use serde::Serialize;
use serde::de::{DeserializeOwned, IgnoredAny};
use tracing::{debug, warn};

use crate::volume::{GatewayFuture, Instance, Volume, VolumeGateway, VolumeSpec};

pub use error::OvhGatewayError;
pub use signing::{SignatureInput, endpoint_aliases, resolve_endpoint};

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// API credentials issued by OVH.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct OvhCredentials {
    /// Application key (`X-Ovh-Application`).
    pub application_key: String,
    /// Application secret used for signing.
    pub application_secret: String,
    /// Consumer key (`X-Ovh-Consumer`).
    pub consumer_key: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AttachmentRequest<'a> {
    instance_id: &'a str,
}

#[derive(serde::Deserialize)]
struct ApiMessage {
    message: Option<String>,
}

/// [`VolumeGateway`] over the OVH HTTP API for one cloud project.
#[derive(Debug)]
pub struct OvhGateway {
    client: reqwest::Client,
    base_url: String,
    project_id: String,
    credentials: OvhCredentials,
    clock_delta: AtomicI64,
}

impl OvhGateway {
    /// Builds a gateway for `project_id` against `endpoint`, which may be an
    /// alias such as `ovh-eu` or a literal base URL.
    ///
    /// # Errors
    ///
    /// Returns [`OvhGatewayError::Config`] when the endpoint is unknown, a
    /// credential is empty, or the HTTP client cannot be built.
    pub fn new(
        endpoint: &str,
        credentials: OvhCredentials,
        project_id: impl Into<String>,
    ) -> Result<Self, OvhGatewayError> {
        let project_id = project_id.into();
        for (name, value) in [
            ("application key", &credentials.application_key),
            ("application secret", &credentials.application_secret),
            ("consumer key", &credentials.consumer_key),
            ("project id", &project_id),
        ] {
            if value.trim().is_empty() {
                return Err(OvhGatewayError::Config(format!("{name} must not be empty")));
            }
        }

        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|err| OvhGatewayError::Config(err.to_string()))?;

        Ok(Self {
            client,
            base_url: resolve_endpoint(endpoint)?,
            project_id,
            credentials,
            clock_delta: AtomicI64::new(0),
        })
    }

    /// Base URL requests are sent to.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Reads the API clock once and offsets later request timestamps by the
    /// difference to the local clock. A failure leaves timestamps unadjusted.
    pub async fn sync_clock(&self) {
        let url = format!("{}/auth/time", self.base_url);
        let server_time = async {
            let response = self.client.get(&url).send().await?.error_for_status()?;
            response.json::<i64>().await
        };
        match server_time.await {
            Ok(remote) => {
                let delta = remote.saturating_sub(unix_now());
                self.clock_delta.store(delta, Ordering::Relaxed);
                debug!(delta, "synchronised with OVH API clock");
            }
            Err(err) => warn!(error = %err, "could not read OVH API time; using local clock"),
        }
    }

    fn timestamp(&self) -> i64 {
        unix_now().saturating_add(self.clock_delta.load(Ordering::Relaxed))
    }

    fn project_path(&self, suffix: &str) -> String {
        format!("/cloud/project/{}{suffix}", self.project_id)
    }

    async fn call<B, T>(
        &self,
        method: Method,
        path: &str,
        payload: Option<&B>,
    ) -> Result<T, OvhGatewayError>
    where
        B: Serialize + Sync + ?Sized,
        T: DeserializeOwned,
    {
        let url = format!("{}{path}", self.base_url);
        let body = match payload {
            Some(value) => {
                serde_json::to_string(value).map_err(|err| OvhGatewayError::Encode {
                    path: path.to_owned(),
                    message: err.to_string(),
                })?
            }
            None => String::new(),
        };
        let timestamp = self.timestamp();
        let signature = SignatureInput {
            application_secret: &self.credentials.application_secret,
            consumer_key: &self.credentials.consumer_key,
            method: method.as_str(),
            url: &url,
            body: &body,
            timestamp,
        }
        .sign();

        debug!(%method, path, "sending OVH request");
        let transport = |err: reqwest::Error| OvhGatewayError::Transport {
            method: method.to_string(),
            path: path.to_owned(),
            message: err.to_string(),
        };

        let mut request = self
            .client
            .request(method.clone(), &url)
            .header("X-Ovh-Application", &self.credentials.application_key)
            .header("X-Ovh-Consumer", &self.credentials.consumer_key)
            .header("X-Ovh-Timestamp", timestamp.to_string())
            .header("X-Ovh-Signature", signature);
        if payload.is_some() {
            request = request
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(body);
        }

        let response = request.send().await.map_err(transport)?;
        let status = response.status();
        let bytes = response.bytes().await.map_err(transport)?;
        debug!(%method, path, status = status.as_u16(), "received OVH response");

        if !status.is_success() {
            return Err(OvhGatewayError::Api {
                status: status.as_u16(),
                path: path.to_owned(),
                message: api_message(&bytes),
            });
        }

        let content: &[u8] = if bytes.is_empty() { b"null" } else { &bytes };
        serde_json::from_slice(content).map_err(|err| OvhGatewayError::Decode {
            path: path.to_owned(),
            message: err.to_string(),
        })
    }
}

fn api_message(body: &[u8]) -> String {
    serde_json::from_slice::<ApiMessage>(body)
        .ok()
        .and_then(|parsed| parsed.message)
        .unwrap_or_else(|| String::from_utf8_lossy(body).trim().to_owned())
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| {
            i64::try_from(elapsed.as_secs()).unwrap_or(i64::MAX)
        })
}

impl VolumeGateway for OvhGateway {
    type Error = OvhGatewayError;

    fn list_volumes(&self) -> GatewayFuture<'_, Vec<Volume>, Self::Error> {
        Box::pin(async move {
            let path = self.project_path("/volume");
            self.call::<(), _>(Method::GET, &path, None).await
        })
    }

    fn create_volume<'a>(&'a self, spec: &'a VolumeSpec) -> GatewayFuture<'a, Volume, Self::Error> {
        Box::pin(async move {
            debug!(
                name = %spec.name,
                size = spec.size,
                volume_type = %spec.volume_type,
                "creating volume"
            );
            let path = self.project_path("/volume");
            self.call(Method::POST, &path, Some(spec)).await
        })
    }

    fn delete_volume<'a>(&'a self, volume_id: &'a str) -> GatewayFuture<'a, (), Self::Error> {
        Box::pin(async move {
            let path = self.project_path(&format!("/volume/{volume_id}"));
            self.call::<(), IgnoredAny>(Method::DELETE, &path, None)
                .await
                .map(|_| ())
        })
    }

    fn attach_volume<'a>(
        &'a self,
        volume_id: &'a str,
        instance_id: &'a str,
    ) -> GatewayFuture<'a, Volume, Self::Error> {
        Box::pin(async move {
            let path = self.project_path(&format!("/volume/{volume_id}/attach"));
            let payload = AttachmentRequest { instance_id };
            self.call(Method::POST, &path, Some(&payload)).await
        })
    }

    fn detach_volume<'a>(
        &'a self,
        volume_id: &'a str,
        instance_id: &'a str,
    ) -> GatewayFuture<'a, Volume, Self::Error> {
        Box::pin(async move {
            let path = self.project_path(&format!("/volume/{volume_id}/detach"));
            let payload = AttachmentRequest { instance_id };
            self.call(Method::POST, &path, Some(&payload)).await
        })
    }

    fn list_instances(&self) -> GatewayFuture<'_, Vec<Instance>, Self::Error> {
        Box::pin(async move {
            let path = self.project_path("/instance");
            self.call::<(), _>(Method::GET, &path, None).await
        })
    }
}
