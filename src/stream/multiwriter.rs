//! Fan-out of the payload's stdout/stderr to every attached client
//! (spec.md §4.D.1, §9 Design Notes).
//!
//! Each sink gets its own bounded queue and writer task; a sink that can't
//! keep up is dropped rather than stalling the payload's copy pump, which
//! must never block on a slow attacher.

use std::sync::Arc;
use tokio::{
    io::AsyncWriteExt,
    net::unix::OwnedWriteHalf,
    sync::{mpsc, Mutex},
};

const SINK_QUEUE_DEPTH: usize = 256;

struct Sink {
    tx: mpsc::Sender<Arc<[u8]>>,
}

/// Thread-safe collection of attach-socket write halves. Cloning is cheap —
/// it shares the same backing list.
#[derive(Clone, Default)]
pub struct MultiWriter {
    sinks: Arc<Mutex<Vec<Sink>>>,
}

impl MultiWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `writer`, spawning a task that drains its queue and writes
    /// to the socket. The task exits (and the sink is pruned on the next
    /// `write_all`) once the write half errors or the queue is dropped.
    pub async fn register(&self, mut writer: OwnedWriteHalf) {
        let (tx, mut rx) = mpsc::channel::<Arc<[u8]>>(SINK_QUEUE_DEPTH);
        tokio::spawn(async move {
            while let Some(chunk) = rx.recv().await {
                if writer.write_all(&chunk).await.is_err() {
                    return;
                }
            }
        });
        self.sinks.lock().await.push(Sink { tx });
    }

    pub async fn len(&self) -> usize {
        self.sinks.lock().await.len()
    }

    /// Hand `data` to every registered sink's queue, pruning any sink whose
    /// queue is full or whose writer task has exited — never awaits an
    /// individual socket write (spec.md §9: "do not let one slow attacher
    /// stall the payload").
    pub async fn write_all(&self, data: &[u8]) {
        let chunk: Arc<[u8]> = Arc::from(data);
        let mut sinks = self.sinks.lock().await;
        let mut i = 0;
        while i < sinks.len() {
            match sinks[i].tx.try_send(chunk.clone()) {
                Ok(()) => i += 1,
                Err(_) => {
                    sinks.swap_remove(i);
                }
            }
        }
    }
}
