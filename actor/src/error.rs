use std::{error::Error, fmt, io, time::Duration};

/// The actor module's result type.
pub type Result<T> = std::result::Result<T, ActorErr>;

/// Actor runtime failures, every one of them halts the pipeline.
#[derive(Debug)]
pub enum ActorErr {
    Io(io::Error),
    Config(String),
    /// The policy's forward pass failed, the rollout can't continue.
    Policy(String),
    /// A published checkpoint can never be loaded into this policy.
    Restore {
        id: String,
        detail: String,
    },
    /// Not every worker finished the step within the barrier timeout.
    BarrierTimeout {
        step: usize,
        waited: Duration,
        pending: usize,
    },
    WorkerCrashed {
        worker: usize,
    },
    /// The learner answered with something that isn't a reply.
    Protocol {
        got: &'static str,
    },
    /// The learner answered with an error message.
    Learner(String),
    ShapeMismatch {
        what: &'static str,
        got: usize,
        expected: usize,
    },
}

impl fmt::Display for ActorErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActorErr::Io(e) => write!(f, "io error: {e}"),
            ActorErr::Config(detail) => write!(f, "invalid config: {detail}"),
            ActorErr::Policy(detail) => write!(f, "policy inference failed: {detail}"),
            ActorErr::Restore { id, detail } => {
                write!(f, "checkpoint {id} can't be restored: {detail}")
            }
            ActorErr::BarrierTimeout {
                step,
                waited,
                pending,
            } => write!(
                f,
                "{pending} worker(s) didn't finish step {step} after {waited:?}"
            ),
            ActorErr::WorkerCrashed { worker } => write!(f, "worker {worker} crashed"),
            ActorErr::Protocol { got } => write!(f, "unexpected reply from learner: got {got}"),
            ActorErr::Learner(detail) => write!(f, "learner error: {detail}"),
            ActorErr::ShapeMismatch {
                what,
                got,
                expected,
            } => write!(f, "{what} size mismatch: got {got}, expected {expected}"),
        }
    }
}

impl Error for ActorErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ActorErr::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for ActorErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

/// Boundary conversion for binaries / I/O APIs.
impl From<ActorErr> for io::Error {
    fn from(value: ActorErr) -> Self {
        match value {
            ActorErr::Io(e) => e,
            other => io::Error::new(io::ErrorKind::Other, other),
        }
    }
}

/// Returns a `ShapeMismatch` unless `got == expected`.
pub(crate) fn check_len(what: &'static str, got: usize, expected: usize) -> Result<()> {
    if got == expected {
        Ok(())
    } else {
        Err(ActorErr::ShapeMismatch {
            what,
            got,
            expected,
        })
    }
}
