//! Reads the subset of an OCI bundle's `config.json` this crate needs to
//! build a [`ProcessSpec`] (spec.md §3, §4.A). Namespace, mount, cgroup and
//! other runtime-spec sections are the surrounding runtime's job — this
//! crate only cares about the payload process description.

use crate::{
    error::{ConfigError, Result},
    process_spec::{HookSpec as RunnerHookSpec, HookSet, ProcessSpecBuilder, RlimitSpec},
};
use serde::Deserialize;
use std::{fs, path::Path};

#[derive(Debug, Deserialize)]
pub struct BundleConfig {
    #[serde(rename = "ociVersion")]
    pub oci_version: String,
    pub process: BundleProcess,
    #[serde(default)]
    pub hooks: Option<BundleHooks>,
}

#[derive(Debug, Deserialize)]
pub struct BundleProcess {
    #[serde(default)]
    pub terminal: bool,
    pub cwd: String,
    pub args: Vec<String>,
    #[serde(default)]
    pub env: Vec<String>,
    #[serde(default)]
    pub rlimits: Vec<BundleRlimit>,
}

#[derive(Debug, Deserialize)]
pub struct BundleRlimit {
    #[serde(rename = "type")]
    pub typ: String,
    pub soft: u64,
    pub hard: u64,
}

#[derive(Debug, Default, Deserialize)]
pub struct BundleHooks {
    #[serde(default)]
    pub prestart: Vec<BundleHook>,
    #[serde(default)]
    pub poststart: Vec<BundleHook>,
    #[serde(default)]
    pub poststop: Vec<BundleHook>,
}

#[derive(Debug, Deserialize)]
pub struct BundleHook {
    pub path: std::path::PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: Vec<String>,
    pub timeout: Option<i64>,
}

impl BundleConfig {
    pub fn load(bundle_dir: &Path) -> Result<Self> {
        let path = bundle_dir.join("config.json");
        let bytes = fs::read(&path).map_err(ConfigError::Io)?;
        serde_json::from_slice(&bytes).map_err(|e| ConfigError::BundleParse(e.to_string()).into())
    }

    /// Build a [`crate::process_spec::ProcessSpec`] from this bundle,
    /// layering in the empty-process/pure-exec flags the CLI config
    /// contributes (spec.md §4.A.3, §4.A.6). `force_terminal` is the CLI
    /// `--terminal` override: it can turn a non-terminal bundle into a
    /// terminal one, never the reverse, mirroring `conmon`'s own
    /// `--terminal` flag layered on top of `config.json`.
    pub fn into_process_spec_builder(
        self,
        empty_process: bool,
        pure_exec: bool,
        force_terminal: bool,
    ) -> ProcessSpecBuilder {
        let hooks = self.hooks.unwrap_or_default();
        ProcessSpecBuilder::default()
            .cwd(std::path::PathBuf::from(self.process.cwd))
            .args(self.process.args)
            .env(self.process.env)
            .rlimits(
                self.process
                    .rlimits
                    .into_iter()
                    .map(|r| RlimitSpec {
                        typ: r.typ,
                        soft: r.soft,
                        hard: r.hard,
                    })
                    .collect::<Vec<_>>(),
            )
            .terminal(self.process.terminal || force_terminal)
            .hooks(HookSet {
                prestart: hooks.prestart.into_iter().map(convert_hook).collect(),
                poststart: hooks.poststart.into_iter().map(convert_hook).collect(),
                poststop: hooks.poststop.into_iter().map(convert_hook).collect(),
            })
            .empty_process(empty_process)
            .pure_exec(pure_exec)
    }
}

fn convert_hook(hook: BundleHook) -> RunnerHookSpec {
    RunnerHookSpec {
        path: hook.path,
        args: hook.args,
        env: hook.env,
        timeout: hook.timeout.map(|t| t.max(0) as u32),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write_config(dir: &Path, json: &str) {
        fs::write(dir.join("config.json"), json).expect("write config.json");
    }

    #[test]
    fn loads_minimal_bundle() {
        let dir = tempdir().expect("tempdir");
        write_config(
            dir.path(),
            r#"{
                "ociVersion": "1.0.2",
                "process": { "cwd": "/", "args": ["/bin/true"] }
            }"#,
        );

        let cfg = BundleConfig::load(dir.path()).expect("load");
        assert_eq!(cfg.oci_version, "1.0.2");
        assert_eq!(cfg.process.args, vec!["/bin/true"]);
        assert!(!cfg.process.terminal);
    }

    #[test]
    fn builds_process_spec_with_hooks_and_rlimits() {
        let dir = tempdir().expect("tempdir");
        write_config(
            dir.path(),
            r#"{
                "ociVersion": "1.0.2",
                "process": {
                    "cwd": "/",
                    "args": ["/bin/sh"],
                    "env": ["PATH=/usr/bin"],
                    "rlimits": [{"type": "RLIMIT_NOFILE", "soft": 1024, "hard": 2048}]
                },
                "hooks": {
                    "prestart": [{"path": "/hooks/pre.sh"}]
                }
            }"#,
        );

        let cfg = BundleConfig::load(dir.path()).expect("load");
        let spec = cfg
            .into_process_spec_builder(false, false, false)
            .validate()
            .expect("validate");
        assert_eq!(spec.rlimits().len(), 1);
        assert_eq!(spec.hooks().prestart.len(), 1);
    }

    #[test]
    fn missing_config_json_is_an_error() {
        let dir = tempdir().expect("tempdir");
        assert!(BundleConfig::load(dir.path()).is_err());
    }
}
