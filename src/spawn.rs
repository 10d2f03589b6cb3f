//! The fork boundary (spec.md §1, §4).
//!
//! Exactly one `fork()` call separates the privileged Supervisor from the
//! in-container Launcher. Everything before this module is pure setup
//! (socket creation, `Config`/`ProcessSpec` construction); everything after
//! it runs in one of the two resulting process images and never returns to
//! a shared call site. `unsafe` is confined to this single function.

use crate::{error::Error, handshake::HandshakeSocket};
use nix::unistd::{fork, ForkResult, Pid};

/// What the calling (pre-fork) process receives back. The Supervisor branch
/// carries the child's pid and its end of the handshake socket; the
/// Launcher branch is never actually returned to a caller — `launcher_fn`
/// is expected to either `exec` or `process::exit` before this function's
/// stack frame unwinds in the child.
pub enum Spawned {
    Supervisor {
        child_pid: Pid,
        supervisor_handshake: HandshakeSocket,
    },
}

/// Fork once. `launcher_fn` runs in the child with its own end of the
/// handshake socket and must not return — the Launcher's job ends in
/// `exec` (success) or `process::exit` (failure), never in unwinding back
/// through Rust call frames shared with the parent.
///
/// # Safety
/// Only async-signal-safe work may happen between `fork()` returning in
/// the child and `launcher_fn` calling `exec`/`exit`: no allocator state
/// from the parent may be assumed consistent, and no other thread exists
/// to race with. `launcher_fn` itself is responsible for honoring this.
pub unsafe fn spawn<F>(launcher_fn: F) -> Result<Spawned, Error>
where
    F: FnOnce(HandshakeSocket) -> !,
{
    let (launcher_sock, supervisor_sock) = HandshakeSocket::pair()?;

    match fork().map_err(crate::error::LauncherError::Fork)? {
        ForkResult::Child => {
            supervisor_sock
                .close()
                .unwrap_or_else(|e| log::warn!("failed to close supervisor handshake end: {}", e));
            launcher_fn(launcher_sock)
        }
        ForkResult::Parent { child } => {
            launcher_sock
                .close()
                .unwrap_or_else(|e| log::warn!("failed to close launcher handshake end: {}", e));
            Ok(Spawned::Supervisor {
                child_pid: child,
                supervisor_handshake: supervisor_sock,
            })
        }
    }
}
