//! Per-volume tracking directories under the mount root.
//!
//! A directory at `mount_root/<name>` marks a volume as tracked by this host.

use std::io;

use camino::Utf8Path;
use cap_std::{ambient_authority, fs_utf8::Dir};
use tracing::{debug, warn};

use super::HostError;

/// Creates the tracking directory at `path`. The parent must exist; an
/// existing directory is accepted.
///
/// # Errors
///
/// Returns [`HostError::Io`] when the parent cannot be opened or the
/// directory cannot be created.
pub fn create_tracking_dir(path: &Utf8Path) -> Result<(), HostError> {
    let (dir, name) = open_parent(path)?;
    match dir.create_dir(name) {
        Ok(()) => {
            debug!(%path, "created tracking directory");
            Ok(())
        }
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists && dir.is_dir(name) => {
            debug!(%path, "tracking directory already present");
            Ok(())
        }
        Err(err) => Err(HostError::io(path, &err)),
    }
}

/// Removes the (empty) tracking directory at `path`; a missing directory is
/// accepted.
///
/// # Errors
///
/// Returns [`HostError::Io`] when the directory exists but cannot be
/// removed, for example because a filesystem is still mounted on it.
pub fn remove_tracking_dir(path: &Utf8Path) -> Result<(), HostError> {
    let (dir, name) = open_parent(path)?;
    match dir.remove_dir(name) {
        Ok(()) => {
            debug!(%path, "removed tracking directory");
            Ok(())
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            warn!(%path, "tracking directory already absent");
            Ok(())
        }
        Err(err) => Err(HostError::io(path, &err)),
    }
}

fn open_parent(path: &Utf8Path) -> Result<(Dir, &str), HostError> {
    let parent = path.parent().unwrap_or_else(|| Utf8Path::new("."));
    let name = path.file_name().ok_or_else(|| HostError::Io {
        path: path.to_path_buf(),
        message: String::from("tracking path is missing a directory name"),
    })?;
    let dir = Dir::open_ambient_dir(parent, ambient_authority())
        .map_err(|err| HostError::io(parent, &err))?;
    Ok((dir, name))
}
