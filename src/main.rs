//! Binary entry point for the `ovhvol` Docker volume plugin.

use std::io::{self, Write};
use std::process;
use std::sync::Arc;

use cap_std::{ambient_authority, fs_utf8::Dir};
use clap::Parser;
use thiserror::Error;
use tracing::info;

use ovhvol::config::{ConfigError, PluginConfig};
use ovhvol::host::{HostError, LocalHost, local_addresses};
use ovhvol::identity::{IdentityError, resolve_instance_id};
use ovhvol::lifecycle::LifecycleOrchestrator;
use ovhvol::ovh::{OvhGateway, OvhGatewayError};
use ovhvol::plugin::{self, PluginError};
use ovhvol::telemetry::{self, TelemetryError};

mod cli;

use cli::{Cli, ServeCommand};

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),
    #[error("OVH API setup failed: {0}")]
    Gateway(#[from] OvhGatewayError),
    #[error("failed to read local addresses: {0}")]
    Host(#[from] HostError),
    #[error(transparent)]
    Identity(#[from] IdentityError),
    #[error("failed to create mount root {path}: {message}")]
    MountRoot { path: String, message: String },
    #[error(transparent)]
    Plugin(#[from] PluginError),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let exit_code = match dispatch(cli).await {
        Ok(()) => 0,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

async fn dispatch(cli: Cli) -> Result<(), CliError> {
    match cli {
        Cli::Serve(command) => serve(&command).await,
    }
}

async fn serve(command: &ServeCommand) -> Result<(), CliError> {
    let config = PluginConfig::load(command.config.as_deref())?;
    config.validate()?;
    telemetry::init(command.debug)?;

    let gateway = OvhGateway::new(&config.endpoint, config.credentials(), &config.project_id)?;
    gateway.sync_clock().await;

    let addresses = local_addresses()?;
    let instance_id =
        resolve_instance_id(&gateway, config.configured_server_id(), &addresses).await?;

    let context = config.lifecycle_context(&instance_id)?;
    Dir::create_ambient_dir_all(&context.mount_root, ambient_authority()).map_err(|err| {
        CliError::MountRoot {
            path: context.mount_root.to_string(),
            message: err.to_string(),
        }
    })?;
    info!(
        instance_id = %instance_id,
        mount_root = %context.mount_root,
        api = gateway.base_url(),
        "plugin ready"
    );

    let orchestrator =
        LifecycleOrchestrator::new(gateway, LocalHost::with_process_runner(), context)
            .with_settings(config.lifecycle_settings());
    plugin::serve(&config.socket_settings(), Arc::new(orchestrator)).await?;
    Ok(())
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "ovhvol: {err}").ok();
}
