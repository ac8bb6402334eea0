use std::io;

use comms::{
    FrameReceiver, FrameSender,
    msg::{Command, Msg, Payload},
};
use log::{debug, info, warn};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::{
        TcpStream, ToSocketAddrs,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
};

use super::BatchSource;
use crate::error::{ActorErr, Result};

/// What the sender did before it stopped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SenderReport {
    /// Batches the learner acknowledged.
    pub sent: usize,
    /// Whether the learner asked to stop.
    pub stopped_by_learner: bool,
}

/// Ships batches from the dispatch queue to the learner, one at a time.
///
/// Every batch is answered by the learner before the next one goes out, the
/// answer being either an acknowledgement or the stop sentinel.
pub struct BatchSender<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    rx: FrameReceiver<R>,
    tx: FrameSender<W>,
    rx_buf: Vec<u32>,
    tx_buf: Vec<u8>,
}

impl BatchSender<OwnedReadHalf, OwnedWriteHalf> {
    /// Connects to the learner listening at `addr`.
    pub async fn connect<A: ToSocketAddrs>(addr: A) -> io::Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;

        let (rx, tx) = stream.into_split();
        Ok(Self::new(rx, tx))
    }
}

impl<R, W> BatchSender<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// Creates a new `BatchSender` over an already established connection.
    ///
    /// # Arguments
    /// * `rx` - The reading half of the connection to the learner.
    /// * `tx` - The writing half of the connection to the learner.
    pub fn new(rx: R, tx: W) -> Self {
        let (rx, tx) = comms::channel(rx, tx);

        Self {
            rx,
            tx,
            rx_buf: Vec::new(),
            tx_buf: Vec::new(),
        }
    }

    /// Sends batches until the queue runs dry or the learner says stop.
    ///
    /// On a stop reply the source is closed, so the collector's next enqueue
    /// fails and collection winds down. The connection is shut down before
    /// returning in every case.
    ///
    /// # Errors
    /// Any I/O failure, an error reply or a reply that is neither ack nor stop.
    pub async fn run(mut self, mut source: BatchSource) -> Result<SenderReport> {
        let result = self.pump(&mut source).await;

        source.close();
        if let Err(e) = self.tx.shutdown().await {
            debug!("closing the learner connection failed: {e}");
        }

        let report = result?;
        info!(
            sent = report.sent,
            stopped_by_learner = report.stopped_by_learner;
            "sender finished"
        );
        Ok(report)
    }

    async fn pump(&mut self, source: &mut BatchSource) -> Result<SenderReport> {
        let mut report = SenderReport::default();

        while let Some(batch) = source.next().await {
            self.tx_buf.clear();
            batch.encode(&mut self.tx_buf);

            let msg = Msg::Data(Payload::Batch(&self.tx_buf));
            self.tx.send(&msg).await?;

            match self.rx.recv_into(&mut self.rx_buf).await? {
                Msg::Control(Command::Ack) => {
                    report.sent += 1;
                    debug!(sent = report.sent; "learner acknowledged batch");
                }
                Msg::Control(Command::Stop) => {
                    report.sent += 1;
                    report.stopped_by_learner = true;
                    info!(sent = report.sent; "learner requested stop");
                    break;
                }
                Msg::Err(detail) => {
                    warn!("learner replied with an error: {detail}");
                    return Err(ActorErr::Learner(detail.into_owned()));
                }
                other => return Err(ActorErr::Protocol { got: other.kind() }),
            }
        }

        Ok(report)
    }
}
