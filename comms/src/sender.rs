use std::io;

use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::{FrameLen, MAX_FRAME_LEN, Serialize};

/// Writes messages as length prefixed frames.
///
/// The framing bytes are staged in a reusable buffer, a borrowed payload is
/// written after them as is.
pub struct OnoSender<W: AsyncWrite + Unpin> {
    tx: W,
    staging: Vec<u8>,
}

impl<W: AsyncWrite + Unpin> OnoSender<W> {
    pub(super) fn new(tx: W) -> Self {
        Self {
            tx,
            staging: Vec::new(),
        }
    }

    /// Sends `msg` as a single frame and flushes the writer.
    ///
    /// # Arguments
    /// * `msg` - The message to send.
    ///
    /// # Returns
    /// An `InvalidInput` error if the frame is too large, or the writer's error.
    pub async fn send<'a, T: Serialize<'a>>(&mut self, msg: &'a T) -> io::Result<()> {
        const PREFIX: usize = size_of::<FrameLen>();

        self.staging.clear();
        self.staging.extend_from_slice(&[0; PREFIX]);

        let payload = msg.serialize(&mut self.staging)?;
        let body_len = self.staging.len() - PREFIX + payload.map_or(0, <[u8]>::len);

        if body_len > MAX_FRAME_LEN {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("frame of {body_len} bytes exceeds the maximum of {MAX_FRAME_LEN}"),
            ));
        }

        self.staging[..PREFIX].copy_from_slice(&(body_len as FrameLen).to_be_bytes());
        self.tx.write_all(&self.staging).await?;

        if let Some(payload) = payload {
            self.tx.write_all(payload).await?;
        }

        self.tx.flush().await
    }

    /// Closes the writing half, the peer then reads an end of file.
    pub async fn shutdown(&mut self) -> io::Result<()> {
        self.tx.shutdown().await
    }
}
