//! Per-event, per-module counters and the textual debug dump.

use std::fmt::Write as _;

/// Counters for one module within one event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ModuleCounters {
    pub input_hits: u64,
    pub output_hits: u64,
    pub empty_inputs: u64,
    pub discards_age: u64,
    pub stamp_failed: u64,
    pub current_events: u64,
    pub current_mem: u64,
    pub max_events: u64,
    pub max_mem: u64,
}

impl ModuleCounters {
    fn record_push(&mut self, mem_bytes: u64, is_empty: bool, stamp_failed: bool) {
        self.input_hits += 1;
        if is_empty {
            self.empty_inputs += 1;
        }
        if stamp_failed {
            self.stamp_failed += 1;
        }
        self.current_events += 1;
        self.current_mem += mem_bytes;
        self.max_events = self.max_events.max(self.current_events);
        self.max_mem = self.max_mem.max(self.current_mem);
    }

    fn record_pop_matched(&mut self, mem_bytes: u64) {
        self.output_hits += 1;
        self.current_events = self.current_events.saturating_sub(1);
        self.current_mem = self.current_mem.saturating_sub(mem_bytes);
    }

    fn record_pop_aged_out(&mut self, mem_bytes: u64) {
        self.discards_age += 1;
        self.current_events = self.current_events.saturating_sub(1);
        self.current_mem = self.current_mem.saturating_sub(mem_bytes);
    }
}

/// Counters for one event: a per-event recording-failure tally plus one
/// [`ModuleCounters`] per configured module.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventCounters {
    pub recording_failed: u64,
    pub modules: Vec<ModuleCounters>,
}

impl EventCounters {
    pub fn new(module_count: usize) -> Self {
        EventCounters {
            recording_failed: 0,
            modules: vec![ModuleCounters::default(); module_count],
        }
    }
}

/// Snapshot of every event's counters, returned by `get_counters`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuilderCounters {
    pub events: Vec<EventCounters>,
}

pub(crate) struct ModuleAccounting<'a> {
    pub counters: &'a mut ModuleCounters,
}

impl<'a> ModuleAccounting<'a> {
    pub fn push(&mut self, mem_bytes: u64, is_empty: bool, stamp_failed: bool) {
        self.counters.record_push(mem_bytes, is_empty, stamp_failed);
    }

    pub fn pop_matched(&mut self, mem_bytes: u64) {
        self.counters.record_pop_matched(mem_bytes);
    }

    pub fn pop_aged_out(&mut self, mem_bytes: u64) {
        self.counters.record_pop_aged_out(mem_bytes);
    }
}

/// Renders a human-readable snapshot of an event's pending state: up to the
/// first 10 candidate reference timestamps, then up to the first 10
/// per-module queue timestamps for each module.
pub fn debug_dump_event(
    event_index: usize,
    all_timestamps: &std::collections::VecDeque<u32>,
    module_timestamps: &[Vec<Option<u32>>],
) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "event {event_index}:");

    let _ = write!(out, "  candidates:");
    for ts in all_timestamps.iter().take(10) {
        let _ = write!(out, " {ts}");
    }
    let _ = writeln!(out);

    for (mi, stamps) in module_timestamps.iter().enumerate() {
        let _ = write!(out, "  module {mi}:");
        for ts in stamps.iter().take(10) {
            match ts {
                Some(v) => {
                    let _ = write!(out, " {v}");
                }
                None => {
                    let _ = write!(out, " -");
                }
            }
        }
        let _ = writeln!(out);
    }

    out
}
