use std::io;

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::{Deserialize, MAX_FRAME_LEN};

/// Reads length prefixed frames and decodes them.
pub struct OnoReceiver<R: AsyncRead + Unpin> {
    rx: R,
}

impl<R: AsyncRead + Unpin> OnoReceiver<R> {
    pub(super) fn new(rx: R) -> Self {
        Self { rx }
    }

    /// Reads the next frame into `buf` and decodes it.
    ///
    /// `buf` holds words so the frame starts 4 byte aligned, numeric payloads
    /// are then borrowed from it in place.
    ///
    /// # Arguments
    /// * `buf` - Reused across calls, the decoded `T` borrows from it.
    ///
    /// # Returns
    /// The decoded message, `UnexpectedEof` if the peer hung up.
    pub async fn recv_into<'buf, T>(&mut self, buf: &'buf mut Vec<u32>) -> io::Result<T>
    where
        T: Deserialize<'buf>,
    {
        let len = self.rx.read_u64().await? as usize;

        if len > MAX_FRAME_LEN {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("frame of {len} bytes exceeds the maximum of {MAX_FRAME_LEN}"),
            ));
        }

        buf.clear();
        buf.resize(len.div_ceil(size_of::<u32>()), 0);

        let frame = &mut bytemuck::cast_slice_mut::<u32, u8>(buf)[..len];
        self.rx.read_exact(frame).await?;

        T::deserialize(frame)
    }
}
