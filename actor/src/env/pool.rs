use std::{
    num::NonZeroUsize,
    panic::{self, AssertUnwindSafe},
    sync::mpsc as std_mpsc,
    thread::{self, JoinHandle},
    time::Duration,
};

use log::{debug, warn};
use ndarray::Array2;
use tokio::{
    sync::mpsc,
    time::{self, Instant},
};

use super::{Environment, Transition, WorkerSlot};
use crate::error::{ActorErr, Result, check_len};

const JOIN_POLL: Duration = Duration::from_millis(10);
const JOIN_GRACE: Duration = Duration::from_secs(1);

/// A set of workers stepped in lockstep by the collector.
#[trait_variant::make(WorkerPool: Send)]
pub trait WorkerPoolTemplate {
    /// The observations every worker starts from, one row per worker.
    fn initial_observations(&self) -> Array2<f32>;

    /// The worker slots as left by the last completed step.
    fn shared_slots(&self) -> &[WorkerSlot];

    /// Hands one action to every worker and lets them step.
    ///
    /// # Arguments
    /// * `actions` - One action index per worker.
    fn submit_actions(&mut self, actions: &[usize]) -> Result<()>;

    /// Waits until every worker finished the submitted step.
    ///
    /// # Errors
    /// `BarrierTimeout` if the workers take longer than allowed, `WorkerCrashed`
    /// if one of them died.
    async fn await_completion(&mut self) -> Result<()>;

    /// Terminates every worker.
    async fn stop(&mut self);
}

enum Command {
    Step(Vec<usize>),
    Stop,
}

struct Completion {
    chunk: usize,
    outcome: std::result::Result<Vec<Transition>, usize>,
}

struct Chunk {
    start: usize,
    len: usize,
    commands: std_mpsc::Sender<Command>,
    handle: Option<JoinHandle<()>>,
    stepping: bool,
}

/// Runs environments on OS threads, each thread owning a contiguous chunk.
///
/// Slot contents travel over channels: actions go out with the step command
/// and transitions come back with the completion.
pub struct EnvPool {
    chunks: Vec<Chunk>,
    slots: Vec<WorkerSlot>,
    initial: Array2<f32>,
    completions: mpsc::UnboundedReceiver<Completion>,
    barrier_timeout: Option<Duration>,
    step: usize,
}

impl EnvPool {
    /// Creates a new `EnvPool` and starts its threads.
    ///
    /// # Arguments
    /// * `envs` - The environments, worker `i` drives `envs[i]`.
    /// * `threads` - Maximum threads to spread the environments over.
    /// * `barrier_timeout` - How long `await_completion` waits, `None` is forever.
    ///
    /// # Errors
    /// `ShapeMismatch` if the environments disagree on the observation size, or
    /// an io error if a thread can't be spawned.
    pub fn new(
        mut envs: Vec<Box<dyn Environment>>,
        threads: NonZeroUsize,
        barrier_timeout: Option<Duration>,
    ) -> Result<Self> {
        if envs.is_empty() {
            return Err(ActorErr::Config("the pool needs at least one environment".into()));
        }

        let observations: Vec<_> = envs.iter_mut().map(|env| env.initial_observation()).collect();
        let obs_dim = observations[0].len();
        for obs in &observations {
            check_len("initial observation", obs.len(), obs_dim)?;
        }

        let workers = envs.len();
        let initial = Array2::from_shape_vec((workers, obs_dim), observations.concat())
            .map_err(|e| ActorErr::Config(e.to_string()))?;
        let slots = observations.into_iter().map(WorkerSlot::new).collect();

        let chunk_len = workers.div_ceil(threads.get().min(workers));
        let (done_tx, completions) = mpsc::unbounded_channel();

        let mut chunks = Vec::new();
        let mut envs = envs.into_iter().peekable();
        let mut start = 0;

        while envs.peek().is_some() {
            let group: Vec<_> = envs.by_ref().take(chunk_len).collect();
            let len = group.len();
            let (commands, rx) = std_mpsc::channel();
            let done_tx = done_tx.clone();
            let id = chunks.len();

            let handle = thread::Builder::new()
                .name(format!("env-{id}"))
                .spawn(move || run_chunk(id, start, group, rx, done_tx))?;

            chunks.push(Chunk {
                start,
                len,
                commands,
                handle: Some(handle),
                stepping: false,
            });
            start += len;
        }

        debug!(workers = workers, threads = chunks.len(); "environment pool started");

        Ok(Self {
            chunks,
            slots,
            initial,
            completions,
            barrier_timeout,
            step: 0,
        })
    }

    pub fn workers(&self) -> usize {
        self.slots.len()
    }

    fn pending_workers(&self) -> usize {
        self.chunks
            .iter()
            .filter(|chunk| chunk.stepping)
            .map(|chunk| chunk.len)
            .sum()
    }

    fn first_pending_worker(&self) -> usize {
        self.chunks
            .iter()
            .find(|chunk| chunk.stepping)
            .map(|chunk| chunk.start)
            .unwrap_or_default()
    }

    fn store(&mut self, chunk: usize, transitions: Vec<Transition>) -> Result<()> {
        let Chunk { start, len, .. } = self.chunks[chunk];
        check_len("chunk transitions", transitions.len(), len)?;

        let obs_dim = self.initial.ncols();
        for (slot, transition) in self.slots[start..start + len].iter_mut().zip(transitions) {
            check_len("observation", transition.observation.len(), obs_dim)?;
            slot.observation = transition.observation;
            slot.reward = transition.reward;
            slot.done = transition.done;
        }

        self.chunks[chunk].stepping = false;
        Ok(())
    }
}

impl WorkerPool for EnvPool {
    fn initial_observations(&self) -> Array2<f32> {
        self.initial.clone()
    }

    fn shared_slots(&self) -> &[WorkerSlot] {
        &self.slots
    }

    fn submit_actions(&mut self, actions: &[usize]) -> Result<()> {
        check_len("actions", actions.len(), self.slots.len())?;
        check_len("workers still stepping", self.pending_workers(), 0)?;

        for (slot, &action) in self.slots.iter_mut().zip(actions) {
            slot.action = action;
        }

        for chunk in &mut self.chunks {
            let step = actions[chunk.start..chunk.start + chunk.len].to_vec();
            if chunk.commands.send(Command::Step(step)).is_err() {
                return Err(ActorErr::WorkerCrashed {
                    worker: chunk.start,
                });
            }
            chunk.stepping = true;
        }

        Ok(())
    }

    async fn await_completion(&mut self) -> Result<()> {
        let started = Instant::now();
        let deadline = self.barrier_timeout.map(|timeout| started + timeout);

        while self.pending_workers() > 0 {
            let completion = match deadline {
                Some(deadline) => match time::timeout_at(deadline, self.completions.recv()).await {
                    Ok(completion) => completion,
                    Err(_) => {
                        return Err(ActorErr::BarrierTimeout {
                            step: self.step,
                            waited: started.elapsed(),
                            pending: self.pending_workers(),
                        });
                    }
                },
                None => self.completions.recv().await,
            };

            let Some(Completion { chunk, outcome }) = completion else {
                return Err(ActorErr::WorkerCrashed {
                    worker: self.first_pending_worker(),
                });
            };

            match outcome {
                Ok(transitions) => self.store(chunk, transitions)?,
                Err(worker) => return Err(ActorErr::WorkerCrashed { worker }),
            }
        }

        self.step += 1;
        Ok(())
    }

    async fn stop(&mut self) {
        for chunk in &self.chunks {
            let _ = chunk.commands.send(Command::Stop);
        }

        let deadline = Instant::now() + JOIN_GRACE;

        for chunk in &mut self.chunks {
            let Some(handle) = chunk.handle.take() else {
                continue;
            };

            while !handle.is_finished() && Instant::now() < deadline {
                time::sleep(JOIN_POLL).await;
            }

            if handle.is_finished() {
                if handle.join().is_err() {
                    warn!(worker = chunk.start; "environment thread panicked");
                }
            } else {
                warn!(worker = chunk.start; "environment thread didn't stop, detaching it");
            }
        }

        debug!(steps = self.step; "environment pool stopped");
    }
}

impl Drop for EnvPool {
    fn drop(&mut self) {
        for chunk in &self.chunks {
            let _ = chunk.commands.send(Command::Stop);
        }
    }
}

/// The loop of one environment thread.
fn run_chunk(
    id: usize,
    start: usize,
    mut envs: Vec<Box<dyn Environment>>,
    commands: std_mpsc::Receiver<Command>,
    completions: mpsc::UnboundedSender<Completion>,
) {
    while let Ok(Command::Step(actions)) = commands.recv() {
        let mut transitions = Vec::with_capacity(envs.len());

        for (offset, (env, action)) in envs.iter_mut().zip(actions).enumerate() {
            match panic::catch_unwind(AssertUnwindSafe(|| env.step(action))) {
                Ok(transition) => transitions.push(transition),
                Err(_) => {
                    let _ = completions.send(Completion {
                        chunk: id,
                        outcome: Err(start + offset),
                    });
                    return;
                }
            }
        }

        let completion = Completion {
            chunk: id,
            outcome: Ok(transitions),
        };

        if completions.send(completion).is_err() {
            return;
        }
    }
}
