use std::io;

use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::{FRAME_LEN_SIZE, FrameLen, Serialize};

/// Writes length prefixed frames.
pub struct FrameSender<W>
where
    W: AsyncWrite + Unpin,
{
    tx: W,
    head: Vec<u8>,
}

impl<W: AsyncWrite + Unpin> FrameSender<W> {
    pub(super) fn new(tx: W) -> Self {
        Self {
            tx,
            head: Vec::new(),
        }
    }

    /// Writes `msg` as a single frame and flushes it.
    ///
    /// The serialized head is staged in an internal buffer, the zero copy tail
    /// (a batch's bytes, for instance) goes straight to the writer.
    ///
    /// # Arguments
    /// * `msg` - The message to send.
    pub async fn send<'a, T: Serialize<'a>>(&mut self, msg: &'a T) -> io::Result<()> {
        let Self { tx, head } = self;

        head.clear();
        head.resize(FRAME_LEN_SIZE, 0);

        let tail = msg.serialize(head);
        let body_len = head.len() - FRAME_LEN_SIZE + tail.map_or(0, <[u8]>::len);
        head[..FRAME_LEN_SIZE].copy_from_slice(&(body_len as FrameLen).to_be_bytes());

        tx.write_all(head).await?;
        if let Some(tail) = tail {
            tx.write_all(tail).await?;
        }

        tx.flush().await
    }

    /// Shuts the writer down, the peer reads an EOF next.
    pub async fn shutdown(&mut self) -> io::Result<()> {
        self.tx.shutdown().await
    }
}
