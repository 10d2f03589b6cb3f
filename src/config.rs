//! Configuration related structures.
use clap::Parser;
use derive_builder::Builder;
use getset::{CopyGetters, Getters};
use log::LevelFilter;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

macro_rules! prefix {
    () => {
        "OCIMON_"
    };
}

#[derive(Builder, Parser, CopyGetters, Getters, Debug, Deserialize, Serialize)]
#[builder(default, pattern = "owned", setter(into, strip_option))]
#[serde(rename_all = "kebab-case")]
#[clap(after_help("More info at: https://github.com/cri-o/containrs"))]
/// ocimon - a container process lifecycle monitor for OCI runtimes
pub struct Config {
    #[get_copy = "pub"]
    #[clap(
        default_value("info"),
        env(concat!(prefix!(), "LOG_LEVEL")),
        long("log-level"),
        possible_values(&["trace", "debug", "info", "warn", "error", "off"]),
        short('l'),
        value_name("LEVEL")
    )]
    /// The logging level of this process (not the container's own log records).
    log_level: LevelFilter,

    #[get = "pub"]
    #[clap(env(concat!(prefix!(), "BUNDLE")), long("bundle"), short('b'))]
    /// Location of the OCI bundle directory holding `config.json`.
    bundle: Option<PathBuf>,

    #[get = "pub"]
    #[clap(
        env(concat!(prefix!(), "CID")),
        long("cid"),
        short('c'),
        value_name("ID")
    )]
    /// Identifier of the container.
    cid: String,

    #[get = "pub"]
    #[clap(
        env(concat!(prefix!(), "PIDFILE")),
        long("container-pidfile"),
        short('p'),
        value_name("PATH")
    )]
    /// Path to write the decimal payload pid to, mode 0644.
    container_pidfile: Option<PathBuf>,

    #[get = "pub"]
    #[clap(
        env(concat!(prefix!(), "LOG_PATH")),
        long("log-path"),
        value_name("PATH")
    )]
    /// Log file path. Defaults to `<instance-dir>/<id>.log` when unset.
    log_path: Option<PathBuf>,

    #[get = "pub"]
    #[clap(
        default_value("kubernetes"),
        env(concat!(prefix!(), "LOG_FORMAT")),
        long("log-format"),
        possible_values(&["kubernetes", "json"]),
        value_name("FORMAT")
    )]
    /// Name of the registered log record formatter.
    log_format: String,

    #[get = "pub"]
    #[clap(
        default_value("/run/ocimon"),
        env(concat!(prefix!(), "SOCKET_DIR_PATH")),
        long("socket-dir-path"),
        value_name("PATH")
    )]
    /// Base directory under which `<cid>/attach.sock` and `<cid>/control.sock` are created.
    socket_dir_path: PathBuf,

    #[get_copy = "pub"]
    #[clap(env(concat!(prefix!(), "TERMINAL")), long("terminal"), short('t'))]
    /// Allocate a pseudo-TTY for the payload process.
    terminal: bool,

    #[get_copy = "pub"]
    #[clap(env(concat!(prefix!(), "SYNC")), long("sync"))]
    /// Pure-exec mode: skip the handshake coordination entirely.
    sync: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;

    fn builder() -> ConfigBuilder {
        ConfigBuilder::default().cid("test-container")
    }

    #[test]
    fn default_log_level_is_info() {
        let c = builder().build().expect("build config");
        assert_eq!(c.log_level(), LevelFilter::Info);
    }

    #[test]
    fn default_log_format_is_kubernetes() {
        let c = builder().build().expect("build config");
        assert_eq!(c.log_format(), "kubernetes");
    }

    #[test]
    fn build_config_overrides() {
        let c = builder()
            .log_level(LevelFilter::Warn)
            .socket_dir_path("/some/path")
            .terminal(true)
            .build()
            .expect("build config");

        assert_eq!(c.log_level(), LevelFilter::Warn);
        assert_eq!(&c.socket_dir_path().display().to_string(), "/some/path");
        assert!(c.terminal());
    }
}
