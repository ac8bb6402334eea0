use std::io;

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::{Align4, Deserialize, FRAME_LEN_SIZE, FrameLen};

/// Frames larger than this are rejected before allocating for them.
pub const MAX_FRAME_LEN: usize = u32::MAX as usize;

/// Reads length prefixed frames.
pub struct FrameReceiver<R: AsyncRead + Unpin> {
    rx: R,
}

impl<R: AsyncRead + Unpin> FrameReceiver<R> {
    pub(super) fn new(rx: R) -> Self {
        Self { rx }
    }

    /// Reads the next frame into `buf` and decodes it.
    ///
    /// `buf` is grown to fit the frame and reused across calls, the decoded
    /// value borrows from it.
    ///
    /// # Errors
    /// `UnexpectedEof` if the peer closed the connection, `InvalidData` if the
    /// frame is oversized or doesn't decode.
    pub async fn recv_into<'buf, T, B>(&mut self, buf: &'buf mut Vec<B>) -> io::Result<T>
    where
        T: Deserialize<'buf>,
        B: Align4,
    {
        let mut len_buf = [0; FRAME_LEN_SIZE];
        self.rx.read_exact(&mut len_buf).await?;
        let len = FrameLen::from_be_bytes(len_buf) as usize;

        if len > MAX_FRAME_LEN {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("frame of {len} bytes exceeds the {MAX_FRAME_LEN} bytes limit"),
            ));
        }

        buf.resize(len.div_ceil(size_of::<B>()), B::zeroed());

        let bytes: &mut [u8] = bytemuck::cast_slice_mut(buf);
        let frame = &mut bytes[..len];
        self.rx.read_exact(frame).await?;

        T::deserialize(frame)
    }
}
