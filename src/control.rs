//! Component 4.E — the control socket (spec.md §4.E, §6).
//!
//! Each connection carries exactly one JSON object and gets no reply —
//! fields present are applied (resize before reopen, per spec.md §4.E),
//! fields absent mean "no change", and unknown fields are ignored.

use crate::error::ControlError;
use serde::Deserialize;
use std::sync::Arc;
use tokio::{
    io::AsyncReadExt,
    net::UnixListener,
    sync::mpsc::UnboundedSender,
};

#[derive(Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ControlMessage {
    pub console_size: Option<ConsoleSize>,
    pub reopen_log: Option<bool>,
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq)]
pub struct ConsoleSize {
    pub width: u16,
    pub height: u16,
}

/// Handlers the control server dispatches into. Kept as a trait so the
/// Supervisor's real pty/logger state can be wired in without this module
/// depending on their concrete types.
#[async_trait::async_trait]
pub trait ControlHandler: Send + Sync {
    async fn resize_console(&self, width: u16, height: u16) -> Result<(), ControlError>;
    async fn reopen_log(&self) -> Result<(), ControlError>;
}

/// Runs the accept loop until the listener errors, at which point the
/// error is pushed to `fatal_sink` (spec.md §7.5) instead of returned —
/// this task has no caller to propagate to.
pub async fn serve(
    listener: UnixListener,
    handler: impl ControlHandler + 'static,
    fatal_sink: UnboundedSender<ControlError>,
) {
    let handler = Arc::new(handler);
    loop {
        let (stream, _addr) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                let _ = fatal_sink.send(ControlError::Accept(e));
                return;
            }
        };
        let handler = handler.clone();
        let fatal_sink = fatal_sink.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_one(stream, handler.as_ref()).await {
                // A decode error is fatal to the server task per spec.md
                // §4.E/§7.5; an I/O blip on one connection is not.
                if matches!(e, ControlError::Decode(_)) {
                    let _ = fatal_sink.send(e);
                } else {
                    log::debug!("control connection failed: {}", e);
                }
            }
        });
    }
}

async fn handle_one(
    mut stream: tokio::net::UnixStream,
    handler: &(impl ControlHandler + ?Sized),
) -> Result<(), ControlError> {
    let mut buf = Vec::new();
    stream.read_to_end(&mut buf).await.map_err(ControlError::Io)?;

    let message: ControlMessage = serde_json::from_slice(&buf)?;

    if let Some(size) = message.console_size {
        handler.resize_console(size.width, size.height).await?;
    }
    if message.reopen_log == Some(true) {
        handler.reopen_log().await?;
    }
    Ok(())
}
