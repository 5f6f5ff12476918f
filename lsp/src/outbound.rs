//! Outbound queue and writer task.
//!
//! All senders share one bounded queue; a single writer drains it, so bytes
//! reach the server in enqueue order.

use tokio::io::AsyncWrite;
use tokio::sync::{mpsc, watch};

use crate::codec::FrameWriter;
use crate::error::SendError;
use crate::message::Message;

pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Cloneable handle for enqueueing messages to the writer.
#[derive(Debug, Clone)]
pub struct Outbound {
    tx: mpsc::Sender<Message>,
}

impl Outbound {
    /// Create a queue with the given capacity (at least 1).
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Enqueue without waiting. When the queue is full the message is dropped.
    pub fn enqueue(&self, msg: Message) -> Result<(), SendError> {
        match self.tx.try_send(msg) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(msg)) => {
                tracing::warn!(
                    method = msg.method().unwrap_or("<response>"),
                    "LSP outbound queue full, dropping message"
                );
                Err(SendError::QueueFull)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(SendError::NotRunning),
        }
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Resolves once the stop flag is raised or its owner is gone.
pub(crate) async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// Drain the queue into `writer` until shutdown, queue closure, or a write error.
///
/// The writer is dropped on return, which closes the server's stdin.
pub async fn run_writer<W>(
    mut rx: mpsc::Receiver<Message>,
    writer: W,
    mut shutdown: watch::Receiver<bool>,
) where
    W: AsyncWrite + Unpin,
{
    let mut writer = FrameWriter::new(writer);
    loop {
        let msg = tokio::select! {
            biased;
            () = stopped(&mut shutdown) => {
                // Flush what was queued before the stop so `exit` gets out.
                while let Ok(msg) = rx.try_recv() {
                    if let Err(e) = writer.write_message(&msg).await {
                        tracing::debug!("LSP write error during shutdown: {e}");
                        break;
                    }
                }
                break;
            }
            msg = rx.recv() => match msg {
                Some(msg) => msg,
                None => break,
            },
        };
        if let Err(e) = writer.write_message(&msg).await {
            tracing::warn!("LSP write error: {e}");
            break;
        }
    }
    tracing::debug!("LSP writer stopped");
}
