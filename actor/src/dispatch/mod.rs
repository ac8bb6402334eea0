mod queue;
mod sender;

pub use queue::{Backpressure, BatchSource, Closed, DispatchQueue, Enqueued, dispatch_queue};
pub use sender::{BatchSender, SenderReport};
