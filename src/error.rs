//! Structured error types for each component of the runtime core.

use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Top level error type tying together every component's error enum.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Launcher(#[from] LauncherError),

    #[error(transparent)]
    Supervisor(#[from] SupervisorError),

    #[error(transparent)]
    Handshake(#[from] HandshakeError),

    #[error(transparent)]
    Stream(#[from] StreamError),

    #[error(transparent)]
    Control(#[from] ControlError),
}

/// Config-phase errors: fail before any observable side effect.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cwd must be an absolute path, got {0:?}")]
    CwdNotAbsolute(String),

    #[error("args must not be empty")]
    EmptyArgs,

    #[error("{0} was already set")]
    DuplicateRlimit(String),

    #[error("unknown log format {0:?}")]
    UnknownLogFormat(String),

    #[error("invalid bundle config.json: {0}")]
    BundleParse(String),

    #[error("config I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("uninitialized field: {0}")]
    Builder(#[from] derive_builder::UninitializedFieldError),
}

/// Errors raised while the Launcher prepares the payload process.
#[derive(Error, Debug)]
pub enum LauncherError {
    #[error("fork() failed: {0}")]
    Fork(nix::Error),

    #[error("failed to change directory to {path}: {source}")]
    Chdir { path: String, source: io::Error },

    #[error("failed to set rlimit {0}")]
    Rlimit(String),

    #[error("failed to resolve {0:?} on PATH: {1}")]
    PathResolution(String, which::Error),

    #[error("file descriptor installation failed: {0}")]
    Fd(String),

    #[error("security configuration failed: {0}")]
    Security(String),

    #[error("exec of {path} failed: {source}")]
    Exec { path: String, source: io::Error },

    #[error("handshake failed during launcher setup: {0}")]
    Handshake(#[from] HandshakeError),
}

/// Errors raised while the Supervisor performs create/start/stop.
#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("prestart hook failed: {0}")]
    PrestartHook(String),

    #[error("failed to create socket {path}: {source}")]
    Socket { path: String, source: io::Error },

    #[error("failed to resolve instance directory for {0:?}")]
    InstanceLookup(String),

    #[error("failed to write pid file {path}: {source}")]
    PidFile { path: String, source: io::Error },

    #[error("failed to open log: {0}")]
    Logger(String),

    #[error(transparent)]
    Handshake(#[from] HandshakeError),

    #[error("state persistence failed: {0}")]
    State(String),

    #[error("uninitialized field: {0}")]
    Builder(#[from] derive_builder::UninitializedFieldError),
}

/// Errors on the handshake byte-stream channel.
#[derive(Error, Debug)]
pub enum HandshakeError {
    #[error("unexpected handshake byte {0:#x}, expected {1:#x}")]
    UnexpectedByte(u8, u8),

    #[error("handshake channel closed unexpectedly")]
    ClosedEarly,

    #[error("handshake I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Errors from the stream multiplexer's background tasks.
#[derive(Error, Debug)]
pub enum StreamError {
    #[error("failed to accept attach connection: {0}")]
    Accept(io::Error),

    #[error("stream I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Errors from the control server.
#[derive(Error, Debug)]
pub enum ControlError {
    #[error("failed to accept control connection: {0}")]
    Accept(io::Error),

    #[error("failed to decode control message: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("control I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Renders a full anyhow-style error chain, colon-joined, innermost last.
///
/// Kept for parity with the driver layer, which still reports setup failures
/// via `anyhow::Context` before they are mapped into the structured types
/// above.
pub fn chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut parts = vec![err.to_string()];
    let mut source = err.source();
    while let Some(s) = source {
        parts.push(s.to_string());
        source = s.source();
    }
    parts.join(": ")
}
