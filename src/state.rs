//! Container State persistence (spec.md §3, §6).

use crate::error::{Result, SupervisorError};
use getset::{Getters, Setters};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, fs, path::Path};
use strum::{AsRefStr, Display, EnumString};

/// Well-known annotation keys clients depend on (spec.md §6). The exact
/// strings must be stable across versions.
pub const ANNOTATION_ATTACH_SOCKET: &str = "io.ociruntime.attach-socket";
pub const ANNOTATION_CONTROL_SOCKET: &str = "io.ociruntime.control-socket";

const OCI_VERSION: &str = "1.0.2";

#[derive(AsRefStr, Clone, Copy, Debug, Display, EnumString, Eq, Hash, PartialEq, PartialOrd, Ord)]
#[strum(serialize_all = "lowercase")]
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
/// `status` advances monotonically in this order (spec.md §3, §8).
pub enum Status {
    Creating,
    Created,
    Running,
    Stopped,
}

#[derive(Clone, Debug, Getters, Setters, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
/// OCI runtime-spec "State" shape (spec.md §6).
pub struct ContainerState {
    oci_version: String,

    #[getset(get = "pub")]
    id: String,

    #[getset(get = "pub", set = "pub")]
    status: Status,

    #[getset(get = "pub", set = "pub")]
    pid: Option<i32>,

    #[getset(get = "pub")]
    bundle: String,

    #[getset(get = "pub", set = "pub", get_mut = "pub")]
    annotations: HashMap<String, String>,
}

impl ContainerState {
    /// Construct the initial `creating` state. `pid` is unset until a
    /// status of `created` or later is published (spec.md §3 invariant).
    pub fn new(id: impl Into<String>, bundle: impl Into<String>) -> Self {
        Self {
            oci_version: OCI_VERSION.to_string(),
            id: id.into(),
            status: Status::Creating,
            pid: None,
            bundle: bundle.into(),
            annotations: HashMap::new(),
        }
    }

    /// Advance to `next`, enforcing the total order and the pid-before-created
    /// invariant from spec.md §3.
    pub fn advance(&mut self, next: Status) -> Result<()> {
        if next <= self.status {
            return Err(SupervisorError::State(format!(
                "cannot move status from {} to {}",
                self.status, next
            ))
            .into());
        }
        if next >= Status::Created && self.pid.is_none() {
            return Err(SupervisorError::State(
                "pid must be set before status reaches created".into(),
            )
            .into());
        }
        self.status = next;
        Ok(())
    }

    /// Persist the state as JSON at `path`, creating parent directories as
    /// needed. Called before the handshake byte that releases the next
    /// lifecycle step is sent (spec.md §5 ordering guarantee).
    pub fn persist(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| SupervisorError::State(format!("create state dir: {}", e)))?;
        }
        let json = serde_json::to_vec_pretty(self)
            .map_err(|e| SupervisorError::State(format!("serialize state: {}", e)))?;
        fs::write(path, json).map_err(|e| SupervisorError::State(format!("write state: {}", e)))?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let bytes =
            fs::read(path).map_err(|e| SupervisorError::State(format!("read state: {}", e)))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| SupervisorError::State(format!("parse state: {}", e)).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn status_order_is_total() {
        assert!(Status::Creating < Status::Created);
        assert!(Status::Created < Status::Running);
        assert!(Status::Running < Status::Stopped);
    }

    #[test]
    fn advance_rejects_backwards_and_repeat() {
        let mut state = ContainerState::new("abc", "/bundle");
        state.set_pid(Some(1234));
        state.advance(Status::Created).expect("advance to created");
        assert!(state.advance(Status::Created).is_err());
        assert!(state.advance(Status::Creating).is_err());
    }

    #[test]
    fn advance_requires_pid_before_created() {
        let mut state = ContainerState::new("abc", "/bundle");
        let err = state.advance(Status::Created).unwrap_err();
        assert!(err.to_string().contains("pid must be set"));
    }

    #[test]
    fn persist_then_load_roundtrips() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("state.json");

        let mut state = ContainerState::new("abc", "/bundle");
        state.set_pid(Some(42));
        state.advance(Status::Created).expect("advance");
        state
            .annotations_mut()
            .insert(ANNOTATION_ATTACH_SOCKET.to_string(), "/run/abc/attach.sock".into());
        state.persist(&path).expect("persist");

        let loaded = ContainerState::load(&path).expect("load");
        assert_eq!(loaded.id(), "abc");
        assert_eq!(loaded.status(), &Status::Created);
        assert_eq!(loaded.pid(), &Some(42));
        assert_eq!(
            loaded.annotations().get(ANNOTATION_ATTACH_SOCKET),
            Some(&"/run/abc/attach.sock".to_string())
        );
    }
}
