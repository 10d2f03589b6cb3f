//! Resolves the on-disk layout for one running container instance
//! (spec.md §4.B.2, §6).
//!
//! The spec treats "locate the instance directory for this container id"
//! as a delegated instance registry lookup (spec.md §1) without specifying
//! its storage. [`InstanceLocator`] is the seam a real registry would plug
//! into; [`InstanceDir`] is the filesystem-backed default used standalone,
//! namespacing every socket, log, and state file this crate writes under
//! `<socket_dir_path>/<cid>/`, mirroring how `Pinns::pin_dir` roots a
//! container's pinned namespaces under one directory keyed by id.

use crate::error::SupervisorError;
use dyn_clone::{clone_trait_object, DynClone};
use getset::Getters;
use std::{
    fmt::Debug,
    path::{Path, PathBuf},
};

/// Where one container instance's sockets, log, state file and pid file
/// live. Implementations stand in for the delegated instance registry
/// (spec.md §1, §4.B "locate the instance directory for this container id").
pub trait InstanceLocator: Debug + DynClone + Send + Sync {
    fn attach_socket(&self) -> PathBuf;
    fn control_socket(&self) -> PathBuf;
    fn state_file(&self) -> PathBuf;
    /// Default log path when the caller doesn't configure one explicitly
    /// (spec.md §4.B.4, §6: `<instance-dir>/<id>.log`).
    fn default_log_path(&self) -> PathBuf;
    /// Create the instance directory (and parents) if it doesn't already
    /// exist.
    fn ensure(&self) -> Result<(), SupervisorError>;
}

clone_trait_object!(InstanceLocator);

/// The filesystem-backed default: instance dir = `<socket_dir_path>/<id>`.
#[derive(Clone, Debug, Getters)]
pub struct InstanceDir {
    #[get = "pub"]
    root: PathBuf,
    #[get = "pub"]
    id: String,
}

impl InstanceDir {
    pub fn new(socket_dir_path: &Path, id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            root: socket_dir_path.join(&id),
            id,
        }
    }
}

impl InstanceLocator for InstanceDir {
    fn attach_socket(&self) -> PathBuf {
        self.root.join("attach.sock")
    }

    fn control_socket(&self) -> PathBuf {
        self.root.join("control.sock")
    }

    fn state_file(&self) -> PathBuf {
        self.root.join("state.json")
    }

    fn default_log_path(&self) -> PathBuf {
        self.root.join(format!("{}.log", self.id))
    }

    fn ensure(&self) -> Result<(), SupervisorError> {
        std::fs::create_dir_all(&self.root).map_err(|e| SupervisorError::Socket {
            path: self.root.display().to_string(),
            source: e,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn paths_are_namespaced_by_id() {
        let dir = InstanceDir::new(Path::new("/run/ocimon"), "abc123");
        assert_eq!(dir.attach_socket(), PathBuf::from("/run/ocimon/abc123/attach.sock"));
        assert_eq!(dir.control_socket(), PathBuf::from("/run/ocimon/abc123/control.sock"));
        assert_eq!(dir.state_file(), PathBuf::from("/run/ocimon/abc123/state.json"));
        assert_eq!(dir.default_log_path(), PathBuf::from("/run/ocimon/abc123/abc123.log"));
    }

    #[test]
    fn ensure_creates_root() {
        let base = tempdir().expect("tempdir");
        let dir = InstanceDir::new(base.path(), "xyz");
        dir.ensure().expect("ensure");
        assert!(dir.root().is_dir());
    }
}
