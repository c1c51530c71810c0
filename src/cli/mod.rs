//! Command-line interface definitions for the `ovhvol` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use camino::Utf8PathBuf;
use clap::Parser;

/// Top-level CLI for the `ovhvol` binary.
#[derive(Debug, Parser)]
#[command(
    name = "ovhvol",
    version,
    about = "Docker volume plugin backed by OVH Public Cloud block storage",
    arg_required_else_help = true
)]
pub(crate) enum Cli {
    /// Serve the Docker volume plugin socket.
    #[command(name = "serve", about = "Serve the Docker volume plugin socket")]
    Serve(ServeCommand),
}

/// Arguments for the `ovhvol serve` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct ServeCommand {
    /// Log at debug level unless `RUST_LOG` says otherwise.
    #[arg(long)]
    pub(crate) debug: bool,
    /// Read settings from this file instead of the discovered `ovhvol.toml`.
    #[arg(long, value_name = "PATH")]
    pub(crate) config: Option<Utf8PathBuf>,
}
