//! Per-event pending state: the candidate-reference-timestamp deque and the
//! per-module FIFOs of buffered [`ModuleStorage`].

use std::collections::VecDeque;

use crate::clock::Ts;
use crate::module::ModuleStorage;

/// All pending state for one event index.
#[derive(Debug, Default)]
pub struct PerEventData {
    /// Every timestamp seen from a non-ignored module, in arrival order;
    /// the candidate pool for reference timestamps.
    pub all_timestamps: VecDeque<Ts>,
    /// `module_datas[mi]` is the FIFO of buffered entries for module `mi`.
    pub module_datas: Vec<VecDeque<ModuleStorage>>,
}

impl PerEventData {
    pub fn new(module_count: usize) -> Self {
        PerEventData {
            all_timestamps: VecDeque::new(),
            module_datas: (0..module_count).map(|_| VecDeque::new()).collect(),
        }
    }

    pub fn module_count(&self) -> usize {
        self.module_datas.len()
    }
}
