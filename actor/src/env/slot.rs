/// The per worker cell exchanged between the collector and the pool.
///
/// The collector writes `action` before a step, the worker writes the rest
/// once the step is done. The two never overlap, the barrier alternates them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkerSlot {
    pub observation: Vec<f32>,
    pub reward: f32,
    pub done: bool,
    pub action: usize,
}

impl WorkerSlot {
    pub(super) fn new(observation: Vec<f32>) -> Self {
        Self {
            observation,
            ..Default::default()
        }
    }
}
