//! Lifecycle hook execution (spec.md §4.A.3, §4.B.1/§4.B.3).
//!
//! `prestart` and the two `poststart`/`poststop` phases each run a list of
//! external processes, in order, fed the container `State` JSON on stdin.
//! The runner is a boxed, cloneable trait object so tests can substitute a
//! fake without touching `tokio::process::Command`, mirroring how
//! `sandbox::Pinns` abstracts its own process execution behind `ExecCommand`.

use crate::{error::SupervisorError, process_spec::HookSpec, state::ContainerState};
use async_trait::async_trait;
use dyn_clone::{clone_trait_object, DynClone};
use std::{fmt::Debug, time::Duration};
use tokio::{
    io::AsyncWriteExt,
    process::Command,
    time::timeout,
};

#[async_trait]
pub trait HookRunner: Debug + DynClone + Send + Sync {
    async fn run(&self, hook: &HookSpec, state: &ContainerState) -> Result<(), SupervisorError>;
}

clone_trait_object!(HookRunner);

/// Default runner: spawns `hook.path` with `hook.args`/`hook.env`, writes the
/// state JSON to its stdin, and waits for exit (optionally bounded by
/// `hook.timeout` seconds). A non-zero exit or timeout is an error.
#[derive(Clone, Debug, Default)]
pub struct ProcessHookRunner;

#[async_trait]
impl HookRunner for ProcessHookRunner {
    async fn run(&self, hook: &HookSpec, state: &ContainerState) -> Result<(), SupervisorError> {
        let payload = serde_json::to_vec(state)
            .map_err(|e| SupervisorError::PrestartHook(format!("serialize state: {}", e)))?;

        let mut child = Command::new(&hook.path)
            .args(&hook.args)
            .env_clear()
            .envs(hook.env.iter().filter_map(|kv| kv.split_once('=')))
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::piped())
            .spawn()
            .map_err(|e| {
                SupervisorError::PrestartHook(format!("spawn {}: {}", hook.path.display(), e))
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(&payload)
                .await
                .map_err(|e| SupervisorError::PrestartHook(format!("write state: {}", e)))?;
        }

        let wait = child.wait_with_output();
        let output = match hook.timeout {
            Some(secs) => timeout(Duration::from_secs(secs as u64), wait)
                .await
                .map_err(|_| {
                    SupervisorError::PrestartHook(format!(
                        "{} timed out after {}s",
                        hook.path.display(),
                        secs
                    ))
                })?,
            None => wait.await,
        }
        .map_err(|e| SupervisorError::PrestartHook(format!("wait {}: {}", hook.path.display(), e)))?;

        if !output.status.success() {
            return Err(SupervisorError::PrestartHook(format!(
                "{} exited with {}: {}",
                hook.path.display(),
                output.status,
                String::from_utf8_lossy(&output.stderr)
            )));
        }

        Ok(())
    }
}

/// Run every hook in `hooks` sequentially, stopping at the first failure.
/// Each phase's hooks run in declaration order (spec.md §4.B.1).
pub async fn run_phase(
    runner: &dyn HookRunner,
    hooks: &[HookSpec],
    state: &ContainerState,
) -> Result<(), SupervisorError> {
    for hook in hooks {
        runner.run(hook, state).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process_spec::HookSpec;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Debug, Default)]
    struct RecordingRunner {
        calls: Arc<Mutex<Vec<String>>>,
        fail_on: Option<String>,
    }

    #[async_trait]
    impl HookRunner for RecordingRunner {
        async fn run(&self, hook: &HookSpec, _state: &ContainerState) -> Result<(), SupervisorError> {
            let name = hook.path.display().to_string();
            self.calls.lock().unwrap().push(name.clone());
            if self.fail_on.as_deref() == Some(name.as_str()) {
                return Err(SupervisorError::PrestartHook(format!("{} failed", name)));
            }
            Ok(())
        }
    }

    fn hook(path: &str) -> HookSpec {
        HookSpec {
            path: path.into(),
            args: vec![],
            env: vec![],
            timeout: None,
        }
    }

    #[tokio::test]
    async fn runs_hooks_in_order() {
        let runner = RecordingRunner::default();
        let hooks = vec![hook("/a"), hook("/b"), hook("/c")];
        let state = ContainerState::new("id", "/bundle");

        run_phase(&runner, &hooks, &state).await.expect("run_phase");
        assert_eq!(*runner.calls.lock().unwrap(), vec!["/a", "/b", "/c"]);
    }

    #[tokio::test]
    async fn stops_at_first_failure() {
        let runner = RecordingRunner {
            calls: Arc::new(Mutex::new(Vec::new())),
            fail_on: Some("/b".to_string()),
        };
        let hooks = vec![hook("/a"), hook("/b"), hook("/c")];
        let state = ContainerState::new("id", "/bundle");

        let err = run_phase(&runner, &hooks, &state).await.unwrap_err();
        assert!(err.to_string().contains("/b failed"));
        assert_eq!(*runner.calls.lock().unwrap(), vec!["/a", "/b"]);
    }

    #[tokio::test]
    async fn empty_phase_is_noop() {
        let runner = RecordingRunner::default();
        let state = ContainerState::new("id", "/bundle");
        run_phase(&runner, &[], &state).await.expect("run_phase");
        assert!(runner.calls.lock().unwrap().is_empty());
    }
}
