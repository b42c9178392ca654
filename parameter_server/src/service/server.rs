use std::io;

use comms::{OnoReceiver, OnoSender};
use tokio::io::{AsyncRead, AsyncWrite};

/// A shard service with its optimizer and synchronizer types erased.
///
/// `ServerBuilder` picks both at runtime from the `ServerSpec`, the accept
/// loop only ever sees this trait.
#[async_trait::async_trait]
pub trait Server<R, W>: Send
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// Starts serving one worker connection in the background.
    fn spawn(&mut self, rx: OnoReceiver<R>, tx: OnoSender<W>);

    /// Waits for the next worker session to end, `None` when none are left.
    async fn join_next(&mut self) -> Option<io::Result<()>>;

    /// Aborts every running session.
    async fn shutdown(&mut self);
}
