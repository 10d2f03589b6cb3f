//! Component 4.D — the stream multiplexer (spec.md §4.D).
//!
//! Bridges the payload's stdio to zero or more `attach` clients: output is
//! fanned out live via [`MultiWriter`] and tee'd into the log, and replayed
//! from a [`TerminalBuffer`] scrollback for late joiners in terminal mode;
//! input is pumped back to the payload only in terminal mode.

pub mod attach;
pub mod multiwriter;
pub mod terminal_buffer;

use self::{multiwriter::MultiWriter, terminal_buffer::TerminalBuffer};
use crate::{
    error::StreamError,
    logger::{LogFormatter, ReopenableWriter, Stream as LogStream},
};
use std::{os::unix::io::RawFd, sync::Arc};
use tokio::{
    net::UnixListener,
    sync::{mpsc, Mutex},
    task::JoinHandle,
};

const SCROLLBACK_CAPACITY: usize = 1024 * 1024;

/// Owns the pieces of the multiplexer for one container and the background
/// tasks copying bytes through them.
pub struct StreamMux {
    writers: MultiWriter,
    backlog: Arc<Mutex<TerminalBuffer>>,
}

impl StreamMux {
    pub fn new() -> Self {
        Self {
            writers: MultiWriter::new(),
            backlog: Arc::new(Mutex::new(TerminalBuffer::new(SCROLLBACK_CAPACITY))),
        }
    }

    /// Spawn the accept loop for the attach socket. `stdin_tx` is `Some`
    /// only for terminal-mode containers (spec.md §4.D.3).
    pub fn spawn_attach_listener(
        &self,
        listener: UnixListener,
        stdin_tx: Option<mpsc::Sender<Vec<u8>>>,
        fatal_sink: mpsc::UnboundedSender<StreamError>,
    ) -> JoinHandle<()> {
        let writers = self.writers.clone();
        let backlog = self.backlog.clone();
        tokio::spawn(async move {
            if let Err(e) = attach::accept_loop(listener, writers, backlog, stdin_tx).await {
                let _ = fatal_sink.send(e);
            }
        })
    }

    /// Spawn the copy pump for one stdio stream (stdout always; stderr
    /// additionally in pipe mode, spec.md §4.D). Every chunk is logged
    /// (never dropped), fanned out to attached clients (droppable), and —
    /// when `buffer` is `true` (terminal mode) — retained in the
    /// scrollback. Exits on EOF.
    pub fn spawn_copy_pump(
        &self,
        fd: RawFd,
        tag: LogStream,
        buffer: bool,
        logger: Arc<Mutex<ReopenableWriter>>,
        formatter: Arc<dyn LogFormatter>,
    ) -> JoinHandle<Result<(), StreamError>> {
        let writers = self.writers.clone();
        let backlog = self.backlog.clone();
        tokio::spawn(async move {
            loop {
                let chunk = read_chunk(fd).await?;
                if chunk.is_empty() {
                    return Ok(());
                }
                logger
                    .lock()
                    .await
                    .write(&formatter.format(tag, false, &chunk))
                    .map_err(|e| StreamError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?;
                if buffer {
                    backlog.lock().await.push(&chunk);
                }
                writers.write_all(&chunk).await;
            }
        })
    }

    /// Spawn the client→pty pump for terminal-mode containers: every chunk
    /// received from an attached client is written to the pty master
    /// (spec.md §4.D.3). Exits when every sender is dropped.
    pub fn spawn_stdin_pump(&self, master_fd: RawFd, mut rx: mpsc::Receiver<Vec<u8>>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(chunk) = rx.recv().await {
                if write_chunk(master_fd, chunk).await.is_err() {
                    return;
                }
            }
        })
    }
}

impl Default for StreamMux {
    fn default() -> Self {
        Self::new()
    }
}

async fn read_chunk(fd: RawFd) -> Result<Vec<u8>, StreamError> {
    tokio::task::spawn_blocking(move || {
        let mut buf = vec![0u8; 8192];
        match nix::unistd::read(fd, &mut buf) {
            Ok(n) => {
                buf.truncate(n);
                Ok(buf)
            }
            Err(e) => Err(StreamError::Io(std::io::Error::new(std::io::ErrorKind::Other, e))),
        }
    })
    .await
    .map_err(|e| StreamError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?
}

async fn write_chunk(fd: RawFd, chunk: Vec<u8>) -> Result<(), StreamError> {
    tokio::task::spawn_blocking(move || {
        let mut written = 0;
        while written < chunk.len() {
            let n = nix::unistd::write(fd, &chunk[written..])
                .map_err(|e| StreamError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?;
            written += n;
        }
        Ok(())
    })
    .await
    .map_err(|e| StreamError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::KubernetesFormatter;
    use nix::unistd::{pipe, write};
    use tempfile::tempdir;

    #[tokio::test]
    async fn copy_pump_logs_and_buffers_until_eof() {
        let (read_fd, write_fd) = pipe().expect("pipe");
        write(write_fd, b"hello\n").expect("write");
        nix::unistd::close(write_fd).expect("close write end to trigger EOF after drain");

        let dir = tempdir().expect("tempdir");
        let log_path = dir.path().join("c.log");
        let logger = Arc::new(Mutex::new(ReopenableWriter::open(&log_path).expect("open")));

        let mux = StreamMux::new();
        let handle = mux.spawn_copy_pump(read_fd, LogStream::Stdout, true, logger, Arc::new(KubernetesFormatter));
        handle.await.expect("join").expect("pump");

        assert_eq!(mux.backlog.lock().await.snapshot(), b"hello\n");
        let logged = std::fs::read_to_string(&log_path).expect("read log");
        assert!(logged.contains("stdoutF hello"));
    }
}
