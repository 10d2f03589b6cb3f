//! Accept loop for the `attach.sock` unix socket (spec.md §4.D).
//!
//! Every connection that comes in: gets the current scrollback replayed,
//! is registered with the [`MultiWriter`] for future output, and — in
//! terminal mode only — has its inbound bytes pumped to the payload's
//! stdin (spec.md §4.D.3: pipe-mode containers don't accept attach input).

use crate::{
    error::StreamError,
    stream::{multiwriter::MultiWriter, terminal_buffer::TerminalBuffer},
};
use std::sync::Arc;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{UnixListener, UnixStream},
    sync::Mutex,
};

/// Runs until the listener errors. Intended to be spawned as a background
/// task per container.
pub async fn accept_loop(
    listener: UnixListener,
    writers: MultiWriter,
    backlog: Arc<Mutex<TerminalBuffer>>,
    stdin_tx: Option<tokio::sync::mpsc::Sender<Vec<u8>>>,
) -> Result<(), StreamError> {
    loop {
        let (stream, _addr) = listener.accept().await.map_err(StreamError::Accept)?;
        let writers = writers.clone();
        let backlog = backlog.clone();
        let stdin_tx = stdin_tx.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, writers, backlog, stdin_tx).await {
                log::debug!("attach connection ended: {}", e);
            }
        });
    }
}

async fn handle_connection(
    stream: UnixStream,
    writers: MultiWriter,
    backlog: Arc<Mutex<TerminalBuffer>>,
    stdin_tx: Option<tokio::sync::mpsc::Sender<Vec<u8>>>,
) -> Result<(), StreamError> {
    let (mut read_half, mut write_half) = stream.into_split();

    let snapshot = backlog.lock().await.snapshot();
    if !snapshot.is_empty() {
        write_half.write_all(&snapshot).await.map_err(StreamError::Io)?;
    }
    writers.register(write_half).await;

    if let Some(tx) = stdin_tx {
        let mut buf = [0u8; 4096];
        loop {
            let n = read_half.read(&mut buf).await.map_err(StreamError::Io)?;
            if n == 0 {
                return Ok(());
            }
            if tx.send(buf[..n].to_vec()).await.is_err() {
                return Ok(());
            }
        }
    }

    Ok(())
}
