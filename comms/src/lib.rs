//! Framed messaging between the members of a training cluster.
//!
//! Every frame is a `u64` big endian length followed by a `u32` kind and its
//! body. Tensors travel as raw words after a JSON header.

mod deserialize;
pub mod error;
pub mod key;
pub mod msg;
mod receiver;
mod sender;
mod serialize;
pub mod specs;
pub mod tensor;

use tokio::io::{AsyncRead, AsyncWrite};

pub use deserialize::Deserialize;
pub use error::{KvErr, RemoteErr};
pub use key::{ParameterKey, Rank, ShardId};
pub use receiver::OnoReceiver;
pub use sender::OnoSender;
pub use serialize::Serialize;
pub use tensor::{DType, PushMode, Shape, Tensor, Values};

/// The frame length prefix, sent big endian.
type FrameLen = u64;

/// Frames longer than this are refused on both ends.
const MAX_FRAME_LEN: usize = u32::MAX as usize;

/// Wraps a reader and a writer into the two ends of a framed channel.
///
/// # Arguments
/// * `rx` - Where frames are read from.
/// * `tx` - Where frames are written to.
///
/// # Returns
/// The receiving and sending ends.
pub fn channel<R, W>(rx: R, tx: W) -> (OnoReceiver<R>, OnoSender<W>)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    (OnoReceiver::new(rx), OnoSender::new(tx))
}
