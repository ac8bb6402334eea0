pub mod actor;
pub mod checkpoint;
pub mod collector;
pub mod config;
pub mod dispatch;
pub mod env;
pub mod error;
pub mod metrics;
pub mod policy;
pub mod reward;
pub mod rollout;

pub use actor::{Actor, ActorReport};
pub use collector::Collector;
pub use config::ActorConfig;
pub use error::{ActorErr, Result};
pub use rollout::{Batch, BatchHeader, RolloutBuffer};
