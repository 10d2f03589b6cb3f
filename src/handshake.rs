//! The create/start handshake channel between Supervisor and Launcher
//! (spec.md §5).
//!
//! A single `AF_UNIX` `SOCK_STREAM` pair is created before `fork()` with
//! `nix::sys::socket::socketpair`. Exactly two single-byte signals cross it
//! in each direction over the lifetime of a container: the Launcher sends
//! `READY` once the payload process image is fully prepared (rlimits,
//! cwd, fds, security) and blocked immediately before `exec`, and the
//! Supervisor replies with `START` once `prestart` hooks have run and the
//! state file has been persisted as `created`. The payload never observes
//! either byte — they cross the channel strictly between the two runtime
//! processes.

use crate::error::HandshakeError;
use nix::{
    sys::socket::{socketpair, AddressFamily, SockFlag, SockType},
    unistd::close,
};
use std::os::unix::io::{FromRawFd, RawFd};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::UnixStream,
};

/// Byte sent by the Launcher once it is parked right before `exec`.
pub const READY: u8 = b't';
/// Byte sent by the Supervisor once it is safe for the Launcher to `exec`.
pub const START: u8 = b's';

/// One end of the handshake socket pair. `raw_fd` is retained so the
/// Launcher side can hand the descriptor across `fork()` before tokio's
/// runtime exists in the child.
pub struct HandshakeSocket {
    raw_fd: RawFd,
}

impl HandshakeSocket {
    /// Create a connected pair. Call before `fork()`; each side keeps one
    /// `HandshakeSocket` and closes the other's raw fd.
    pub fn pair() -> Result<(HandshakeSocket, HandshakeSocket), HandshakeError> {
        let (a, b) = socketpair(
            AddressFamily::Unix,
            SockType::Stream,
            None,
            SockFlag::SOCK_CLOEXEC,
        )
        .map_err(|e| HandshakeError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?;
        Ok((HandshakeSocket { raw_fd: a }, HandshakeSocket { raw_fd: b }))
    }

    pub fn raw_fd(&self) -> RawFd {
        self.raw_fd
    }

    /// Close without further use, for the end a process doesn't keep.
    pub fn close(self) -> Result<(), HandshakeError> {
        close(self.raw_fd).map_err(|e| HandshakeError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))
    }

    /// Hand the descriptor to tokio. Only valid once an async runtime is
    /// running, i.e. after the post-fork Launcher/Supervisor split.
    pub fn into_async(self) -> Result<HandshakeChannel, HandshakeError> {
        let fd = self.raw_fd;
        std::mem::forget(self);
        let std_stream = unsafe { std::os::unix::net::UnixStream::from_raw_fd(fd) };
        std_stream
            .set_nonblocking(true)
            .map_err(HandshakeError::Io)?;
        let stream = UnixStream::from_std(std_stream).map_err(HandshakeError::Io)?;
        Ok(HandshakeChannel { stream })
    }
}

/// The async, single-byte-protocol view of a handshake socket half.
pub struct HandshakeChannel {
    stream: UnixStream,
}

impl HandshakeChannel {
    pub async fn send(&mut self, byte: u8) -> Result<(), HandshakeError> {
        self.stream.write_all(&[byte]).await.map_err(HandshakeError::Io)
    }

    /// Read one byte and assert it matches `expected`. `ClosedEarly` signals
    /// the peer exited (e.g. exec or rlimit failure) before signaling.
    pub async fn expect(&mut self, expected: u8) -> Result<(), HandshakeError> {
        let mut buf = [0u8; 1];
        let n = self.stream.read(&mut buf).await.map_err(HandshakeError::Io)?;
        if n == 0 {
            return Err(HandshakeError::ClosedEarly);
        }
        if buf[0] != expected {
            return Err(HandshakeError::UnexpectedByte(buf[0], expected));
        }
        Ok(())
    }

    /// Read one byte without asserting its value. Used by the Supervisor to
    /// detect the advisory post-exec-failure byte (spec.md §9 Open Question
    /// 2): any non-EOF byte observed here after `START` has been sent means
    /// the payload failed to exec and `poststart` must be skipped.
    pub async fn try_read_byte(&mut self) -> Result<Option<u8>, HandshakeError> {
        let mut buf = [0u8; 1];
        match self.stream.read(&mut buf).await.map_err(HandshakeError::Io)? {
            0 => Ok(None),
            _ => Ok(Some(buf[0])),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ready_then_start_roundtrips() {
        let (launcher_sock, supervisor_sock) = HandshakeSocket::pair().expect("pair");
        let mut launcher = launcher_sock.into_async().expect("async");
        let mut supervisor = supervisor_sock.into_async().expect("async");

        launcher.send(READY).await.expect("send ready");
        supervisor.expect(READY).await.expect("expect ready");

        supervisor.send(START).await.expect("send start");
        launcher.expect(START).await.expect("expect start");
    }

    #[tokio::test]
    async fn unexpected_byte_is_reported() {
        let (mut a, mut b) = {
            let (sa, sb) = HandshakeSocket::pair().expect("pair");
            (sa.into_async().expect("async"), sb.into_async().expect("async"))
        };
        a.send(0xFF).await.expect("send");
        let err = b.expect(START).await.unwrap_err();
        assert!(matches!(err, HandshakeError::UnexpectedByte(0xFF, START)));
    }

    #[tokio::test]
    async fn closed_early_reports_distinct_error() {
        let (a, mut b) = {
            let (sa, sb) = HandshakeSocket::pair().expect("pair");
            (sa, sb.into_async().expect("async"))
        };
        a.close().expect("close");
        let err = b.expect(READY).await.unwrap_err();
        assert!(matches!(err, HandshakeError::ClosedEarly));
    }
}
