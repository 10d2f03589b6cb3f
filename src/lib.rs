//! Process lifecycle core for OCI container runtimes.
//!
//! This crate owns exactly the create/start/attach/stop lifecycle of one
//! container's payload process: the privileged/unprivileged split across
//! `fork()`, the handshake that orders hook execution against `exec`, the
//! output multiplexer feeding `attach` clients, and the control socket for
//! out-of-band requests like console resize. Namespace and cgroup setup,
//! rootfs preparation, image management, and the CRI/gRPC surface above
//! this layer are out of scope.

pub mod bundle;
pub mod config;
pub mod control;
pub mod driver;
pub mod endpoints;
pub mod error;
pub mod handshake;
pub mod hooks;
pub mod instance;
pub mod launcher;
pub mod logger;
pub mod process_spec;
pub mod rlimit;
pub mod security;
pub mod spawn;
pub mod state;
pub mod stream;
pub mod supervisor;

pub use config::Config;
pub use error::{Error, Result};
