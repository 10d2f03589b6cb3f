//! The Process Spec data model (spec.md §3) plus its validation rules.

use crate::error::{ConfigError, Result};
use derive_builder::Builder;
use getset::Getters;
use serde::{Deserialize, Serialize};
use std::{collections::HashSet, path::PathBuf};

#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
/// One `{type, soft, hard}` rlimit entry.
pub struct RlimitSpec {
    #[serde(rename = "type")]
    pub typ: String,
    pub soft: u64,
    pub hard: u64,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
/// Hooks grouped by lifecycle phase. A missing (null) phase is a no-op.
pub struct HookSpec {
    pub path: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: Vec<String>,
    pub timeout: Option<u32>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct HookSet {
    #[serde(default)]
    pub prestart: Vec<HookSpec>,
    #[serde(default)]
    pub poststart: Vec<HookSpec>,
    #[serde(default)]
    pub poststop: Vec<HookSpec>,
}

#[derive(Builder, Clone, Debug, Getters)]
#[builder(pattern = "owned", setter(into), build_fn(error = "ConfigError"))]
/// Caller-supplied inputs describing the payload process to launch.
pub struct ProcessSpec {
    #[get = "pub"]
    cwd: PathBuf,

    #[get = "pub"]
    args: Vec<String>,

    #[get = "pub"]
    env: Vec<String>,

    #[get = "pub"]
    #[builder(default)]
    rlimits: Vec<RlimitSpec>,

    #[get = "pub"]
    #[builder(default)]
    terminal: bool,

    #[get = "pub"]
    #[builder(default)]
    hooks: HookSet,

    #[get = "pub"]
    #[builder(default)]
    /// Pause-only container: the Launcher never execs a payload (spec.md §4.A.3).
    empty_process: bool,

    #[get = "pub"]
    #[builder(default)]
    /// Skip supervisor handshake coordination entirely (spec.md §4.A.6).
    pure_exec: bool,
}

impl ProcessSpecBuilder {
    /// Validate cwd/args/rlimits per spec.md §8's boundary behaviors, normalizing
    /// an empty cwd to `/` and rejecting anything non-absolute or relative.
    pub fn validate(self) -> Result<ProcessSpec> {
        let mut built = self.build()?;

        let cwd_str = built.cwd.to_string_lossy().into_owned();
        if cwd_str.is_empty() {
            built.cwd = PathBuf::from("/");
        } else if !built.cwd.is_absolute() {
            return Err(ConfigError::CwdNotAbsolute(cwd_str).into());
        }

        if built.args.is_empty() && !built.empty_process {
            return Err(ConfigError::EmptyArgs.into());
        }

        check_no_duplicate_rlimits(&built.rlimits)?;

        Ok(built)
    }
}

/// Each rlimit type may appear at most once (spec.md §3, §8 scenario 6).
fn check_no_duplicate_rlimits(rlimits: &[RlimitSpec]) -> Result<()> {
    let mut seen = HashSet::new();
    for rlimit in rlimits {
        if !seen.insert(rlimit.typ.clone()) {
            return Err(ConfigError::DuplicateRlimit(rlimit.typ.clone()).into());
        }
    }
    Ok(())
}

/// Resolve the first `PATH=` entry in an ordered `KEY=VALUE` env list, per
/// spec.md §4.A.4 ("the first `PATH=` entry wins").
pub fn find_path_env(env: &[String]) -> Option<&str> {
    env.iter()
        .find_map(|kv| kv.strip_prefix("PATH=").filter(|v| !v.is_empty()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(cwd: &str, args: Vec<&str>) -> ProcessSpecBuilder {
        ProcessSpecBuilder::default()
            .cwd(PathBuf::from(cwd))
            .args(args.into_iter().map(String::from).collect::<Vec<_>>())
            .env(Vec::<String>::new())
    }

    #[test]
    fn empty_cwd_becomes_root() {
        let built = spec("", vec!["/bin/true"]).validate().expect("validate");
        assert_eq!(built.cwd(), &PathBuf::from("/"));
    }

    #[test]
    fn relative_cwd_rejected() {
        let err = spec("relative/path", vec!["/bin/true"])
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("absolute"));
    }

    #[test]
    fn empty_args_rejected() {
        let err = spec("/", vec![]).validate().unwrap_err();
        assert!(err.to_string().contains("must not be empty"));
    }

    #[test]
    fn empty_process_allows_empty_args() {
        let built = ProcessSpecBuilder::default()
            .cwd(PathBuf::from("/"))
            .args(Vec::<String>::new())
            .env(Vec::<String>::new())
            .empty_process(true)
            .validate()
            .expect("validate");
        assert!(built.args().is_empty());
    }

    #[test]
    fn duplicate_rlimit_rejected() {
        let rlimits = vec![
            RlimitSpec {
                typ: "RLIMIT_NOFILE".into(),
                soft: 1024,
                hard: 2048,
            },
            RlimitSpec {
                typ: "RLIMIT_NOFILE".into(),
                soft: 2048,
                hard: 4096,
            },
        ];
        let err = spec("/", vec!["/bin/true"])
            .rlimits(rlimits)
            .validate()
            .unwrap_err();
        assert_eq!(err.to_string(), "RLIMIT_NOFILE was already set");
    }

    #[test]
    fn path_env_first_wins() {
        let env = vec![
            "PATH=/first/bin".to_string(),
            "PATH=/second/bin".to_string(),
        ];
        assert_eq!(find_path_env(&env), Some("/first/bin"));
    }

    #[test]
    fn path_env_missing_is_none() {
        let env = vec!["HOME=/root".to_string()];
        assert_eq!(find_path_env(&env), None);
    }
}
