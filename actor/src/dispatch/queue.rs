use std::{collections::VecDeque, num::NonZeroUsize, sync::Arc};

use log::warn;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

use crate::rollout::Batch;

/// What `enqueue` does when the queue is at capacity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backpressure {
    /// Wait until the sender makes room.
    #[default]
    Block,
    /// Evict the oldest queued batch.
    DropOldest,
    /// Discard the incoming batch.
    DropNewest,
}

/// Outcome of a successful `enqueue`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    Queued,
    DroppedOldest,
    DroppedNewest,
}

/// The queue was closed, no more batches are accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Closed;

#[derive(Debug)]
struct State {
    batches: VecDeque<Batch>,
    /// No more batches are accepted nor handed out.
    closed: bool,
    /// No more batches are accepted, the queued ones are still handed out.
    finished: bool,
}

#[derive(Debug)]
struct Shared {
    state: Mutex<State>,
    capacity: usize,
    policy: Backpressure,
    not_empty: Notify,
    not_full: Notify,
}

impl Shared {
    fn wake_all(&self) {
        self.not_empty.notify_waiters();
        self.not_full.notify_waiters();
    }
}

/// Creates a bounded FIFO of batches between the collector and the sender.
///
/// # Arguments
/// * `capacity` - Maximum batches held at once.
/// * `policy` - What to do with a batch when the queue is full.
///
/// # Returns
/// The producer and consumer halves.
pub fn dispatch_queue(capacity: NonZeroUsize, policy: Backpressure) -> (DispatchQueue, BatchSource) {
    let shared = Arc::new(Shared {
        state: Mutex::new(State {
            batches: VecDeque::with_capacity(capacity.get()),
            closed: false,
            finished: false,
        }),
        capacity: capacity.get(),
        policy,
        not_empty: Notify::new(),
        not_full: Notify::new(),
    });

    (
        DispatchQueue {
            shared: shared.clone(),
        },
        BatchSource { shared },
    )
}

/// Producer half of the dispatch queue.
///
/// Dropping it finishes the queue: the source still hands out what was queued.
#[derive(Debug)]
pub struct DispatchQueue {
    shared: Arc<Shared>,
}

impl DispatchQueue {
    /// Queues `batch` behind every batch queued before it.
    ///
    /// # Errors
    /// `Closed` once the source stopped consuming or the queue was finished.
    pub async fn enqueue(&self, batch: Batch) -> Result<Enqueued, Closed> {
        let mut batch = Some(batch);

        loop {
            let notified = self.shared.not_full.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.shared.state.lock();

                if state.closed || state.finished {
                    return Err(Closed);
                }

                if state.batches.len() < self.shared.capacity {
                    // SAFETY: `batch` is only taken right before returning.
                    state.batches.push_back(batch.take().unwrap());
                    drop(state);
                    self.shared.not_empty.notify_one();
                    return Ok(Enqueued::Queued);
                }

                match self.shared.policy {
                    Backpressure::Block => {}
                    Backpressure::DropOldest => {
                        state.batches.pop_front();
                        // SAFETY: same as above.
                        state.batches.push_back(batch.take().unwrap());
                        drop(state);
                        warn!(policy = "drop_oldest"; "dispatch queue full, evicted the oldest batch");
                        self.shared.not_empty.notify_one();
                        return Ok(Enqueued::DroppedOldest);
                    }
                    Backpressure::DropNewest => {
                        warn!(policy = "drop_newest"; "dispatch queue full, discarded the new batch");
                        return Ok(Enqueued::DroppedNewest);
                    }
                }
            }

            notified.await;
        }
    }

    /// Batches currently waiting to be sent.
    pub fn len(&self) -> usize {
        self.shared.state.lock().batches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the consumer stopped, further enqueues will fail.
    pub fn is_closed(&self) -> bool {
        let state = self.shared.state.lock();
        state.closed || state.finished
    }

    /// Stops accepting batches, the queued ones are still delivered.
    pub fn finish(&self) {
        self.shared.state.lock().finished = true;
        self.shared.wake_all();
    }

    /// Stops the queue right away, queued batches are discarded.
    pub fn abort(&self) {
        let discarded = {
            let mut state = self.shared.state.lock();
            state.closed = true;
            std::mem::take(&mut state.batches).len()
        };

        if discarded > 0 {
            warn!(discarded = discarded; "dispatch queue aborted with pending batches");
        }

        self.shared.wake_all();
    }
}

impl Drop for DispatchQueue {
    fn drop(&mut self) {
        self.finish();
    }
}

/// Consumer half of the dispatch queue.
///
/// Dropping it closes the queue so the producer stops collecting.
#[derive(Debug)]
pub struct BatchSource {
    shared: Arc<Shared>,
}

impl BatchSource {
    /// Waits for the oldest queued batch.
    ///
    /// # Returns
    /// `None` once the queue is closed, or finished and drained.
    pub async fn next(&mut self) -> Option<Batch> {
        loop {
            let notified = self.shared.not_empty.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.shared.state.lock();

                if state.closed {
                    return None;
                }

                if let Some(batch) = state.batches.pop_front() {
                    drop(state);
                    self.shared.not_full.notify_one();
                    return Some(batch);
                }

                if state.finished {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Stops consuming, the producer's next `enqueue` fails with `Closed`.
    pub fn close(&self) {
        self.shared.state.lock().closed = true;
        self.shared.wake_all();
    }
}

impl Drop for BatchSource {
    fn drop(&mut self) {
        self.close();
    }
}
