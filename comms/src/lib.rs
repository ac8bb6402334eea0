//! Framing and messages of the actor to learner link, plus the on-disk
//! checkpoint index both sides agree on.

mod align;
mod deserialize;
pub mod index;
pub mod msg;
mod receiver;
mod sender;
mod serialize;

use tokio::io::{AsyncRead, AsyncWrite};

pub use align::Align4;
pub use deserialize::Deserialize;
pub use receiver::FrameReceiver;
pub use sender::FrameSender;
pub use serialize::Serialize;

/// Every frame starts with its length as a big endian `FrameLen`.
type FrameLen = u64;
const FRAME_LEN_SIZE: usize = size_of::<FrameLen>();

/// Wraps the two halves of a connection into a framed channel.
///
/// # Arguments
/// * `rx` - The reading half.
/// * `tx` - The writing half.
///
/// # Returns
/// The receiving and sending ends of the channel.
pub fn channel<R, W>(rx: R, tx: W) -> (FrameReceiver<R>, FrameSender<W>)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    (FrameReceiver::new(rx), FrameSender::new(tx))
}
