//! The event builder core: the mutex-guarded correlation state machine and
//! its callback surface.

use parking_lot::Mutex;

use crate::clock::{add_offset_to_timestamp, timestamp_match, Ts, WindowMatch};
use crate::config::EventBuilderConfig;
use crate::counters::{debug_dump_event, BuilderCounters, EventCounters, ModuleAccounting};
use crate::buffer::PerEventData;
use crate::error::ConfigError;
use crate::module::{size_consistency_check, ModuleData, ModuleStorage};

/// Callback surface invoked by the builder while holding its mutex.
///
/// An implementor plays the role the original design gives to a flat
/// function-pointer-plus-`void*` record: it carries whatever context it
/// needs as its own fields instead of an opaque user-context argument,
/// which is the idiomatic Rust shape for the same contract.
///
/// Implementations must not call back into the [`EventBuilder`] that
/// invoked them — doing so from the same thread deadlocks on the mutex —
/// and must not block indefinitely, since they stall the producer.
pub trait Callbacks: Send {
    /// Delivers one correlated event. `slots` has exactly one entry per
    /// configured module of `event_index`, in module-index order; any slot
    /// may be an empty placeholder.
    fn event_data(&mut self, output_crate_index: i32, event_index: usize, slots: &[ModuleStorage]);

    /// Pass-through for out-of-band system event frames.
    fn system_event(&mut self, output_crate_index: i32, header: &[u32]);
}

struct Inner {
    events: Vec<PerEventData>,
    counters: Vec<EventCounters>,
    callbacks: Box<dyn Callbacks>,
}

/// Windowed multi-module event correlator.
///
/// Construction validates `config` (§ configuration surface); every public
/// method takes `&self` and serializes through one internal mutex, mirroring
/// the single-mutex-guards-everything concurrency model this crate is
/// built around.
pub struct EventBuilder {
    config: EventBuilderConfig,
    inner: Mutex<Inner>,
}

impl std::fmt::Debug for EventBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBuilder")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl EventBuilder {
    /// Validates `config` and constructs a builder ready to record data.
    ///
    /// Fails with [`ConfigError`] if any module config has
    /// `has_dynamic == false && prefix_size == 0`.
    pub fn new(config: EventBuilderConfig, callbacks: Box<dyn Callbacks>) -> Result<Self, ConfigError> {
        config.validate()?;

        let events = config
            .event_configs
            .iter()
            .map(|e| PerEventData::new(e.module_configs.len()))
            .collect();
        let counters = config
            .event_configs
            .iter()
            .map(|e| EventCounters::new(e.module_configs.len()))
            .collect();

        Ok(EventBuilder {
            config,
            inner: Mutex::new(Inner {
                events,
                counters,
                callbacks,
            }),
        })
    }

    /// Replaces the callback set atomically under the mutex.
    pub fn set_callbacks(&self, callbacks: Box<dyn Callbacks>) {
        self.inner.lock().callbacks = callbacks;
    }

    /// Records one input batch for `event_index`: one [`ModuleData`] per
    /// configured module of that event.
    ///
    /// Returns `false` if `event_index` is out of range, the batch's arity
    /// doesn't match the event's module count, or any entry fails its
    /// size-consistency invariant; in all three cases no queues are
    /// mutated. Returns `true` otherwise, including on the disabled-event
    /// pass-through path.
    #[tracing::instrument(skip(self, module_data))]
    pub fn record_module_data(&self, event_index: usize, module_data: &[ModuleData<'_>]) -> bool {
        if event_index >= self.config.event_configs.len() {
            tracing::warn!(event_index, "record_module_data: event index out of range");
            return false;
        }

        let event_config = &self.config.event_configs[event_index];

        if module_data.len() != event_config.module_configs.len() {
            tracing::warn!(event_index, "record_module_data: batch arity does not match module count");
            self.inner.lock().counters[event_index].recording_failed += 1;
            return false;
        }

        for module in module_data {
            if !size_consistency_check(module) {
                tracing::warn!(event_index, "record_module_data: consistency check failed");
                self.inner.lock().counters[event_index].recording_failed += 1;
                return false;
            }
        }

        if !event_config.enabled {
            let mut inner = self.inner.lock();
            let slots: Vec<ModuleStorage> = module_data
                .iter()
                .map(|m| ModuleStorage::from_module_data(m, None))
                .collect();

            for (mi, storage) in slots.iter().enumerate() {
                if let Some(counters) = inner.counters[event_index].modules.get_mut(mi) {
                    let mem = storage.mem_bytes() as u64;
                    let is_empty = storage.data.is_empty();
                    let mut acc = ModuleAccounting { counters };
                    acc.push(mem, is_empty, false);
                    acc.pop_matched(mem);
                }
            }

            inner
                .callbacks
                .event_data(self.config.output_crate_index, event_index, &slots);
            return true;
        }

        let mut inner = self.inner.lock();

        let mut extracted: Vec<Option<Ts>> = Vec::with_capacity(module_data.len());
        for (mi, module) in module_data.iter().enumerate() {
            let module_config = &event_config.module_configs[mi];
            let ts = module_config.ts_extractor.extract(module.data);

            let is_empty = module.size() == 0;
            let stamp_failed = !module_config.ignored && ts.is_none() && !is_empty;
            let mem = (module.size() * 4) as u64;

            let counters = &mut inner.counters[event_index].modules[mi];
            let mut acc = ModuleAccounting { counters };
            acc.push(mem, is_empty, stamp_failed);

            if stamp_failed {
                tracing::trace!(event_index, module_index = mi, "record_module_data: stamp extraction failed");
            }

            extracted.push(ts);
        }

        for (mi, ts) in extracted.iter_mut().enumerate() {
            if let Some(v) = ts {
                *v = add_offset_to_timestamp(*v, event_config.module_configs[mi].offset);
            }
        }

        let filler_ts = extracted.iter().flatten().next().copied();
        tracing::trace!(event_index, ?filler_ts, "record_module_data: filler candidate");

        for ts in extracted.iter_mut() {
            if ts.is_none() {
                *ts = filler_ts;
            }
        }

        for (mi, (module, ts)) in module_data.iter().zip(extracted.iter()).enumerate() {
            let storage = ModuleStorage::from_module_data(module, *ts);
            inner.events[event_index].module_datas[mi].push_back(storage);

            if let Some(v) = ts {
                if !event_config.module_configs[mi].ignored {
                    inner.events[event_index].all_timestamps.push_back(*v);
                }
            }
        }

        true
    }

    /// Attempts to emit one correlated event for `event_index`. Returns
    /// `true` if exactly one output event was emitted.
    #[tracing::instrument(skip(self))]
    pub fn try_flush(&self, event_index: usize) -> bool {
        if event_index >= self.config.event_configs.len() {
            return false;
        }

        let event_config = &self.config.event_configs[event_index];
        if !event_config.enabled {
            return false;
        }

        let module_count = event_config.module_configs.len();
        let mut inner = self.inner.lock();

        let ref_ts = match inner.events[event_index].all_timestamps.front().copied() {
            Some(ts) => ts,
            None => return false,
        };

        // Future-safety check: every module's newest buffered stamp must be
        // confirmed TooNew relative to ref_ts before we can be sure no
        // earlier-arriving-but-later-timestamped data is still in flight.
        for mi in 0..module_count {
            let back_ts = match inner.events[event_index].module_datas[mi].back() {
                Some(storage) => storage.timestamp,
                None => continue,
            };

            let ts = match back_ts {
                Some(ts) => ts,
                // Open question (see crate docs): an enabled event that has
                // never seen a stamp has no buffered storages with a
                // timestamp at all; treat an untimestamped tail
                // conservatively as not-yet-safe rather than panicking on
                // the violated precondition.
                None => return false,
            };

            let window = event_config.module_configs[mi].window;
            if timestamp_match(ref_ts, ts, window).class != WindowMatch::TooNew {
                tracing::trace!(event_index, module_index = mi, "try_flush: not yet safe to decide");
                return false;
            }
        }

        while inner.events[event_index].all_timestamps.front().copied() == Some(ref_ts) {
            inner.events[event_index].all_timestamps.pop_front();
        }

        for mi in 0..module_count {
            let window = event_config.module_configs[mi].window;
            loop {
                let is_too_old = match inner.events[event_index].module_datas[mi].front() {
                    Some(storage) => match storage.timestamp {
                        Some(ts) => timestamp_match(ref_ts, ts, window).class == WindowMatch::TooOld,
                        None => false,
                    },
                    None => false,
                };

                if !is_too_old {
                    break;
                }

                let popped = inner.events[event_index].module_datas[mi].pop_front().unwrap();
                let counters = &mut inner.counters[event_index].modules[mi];
                let mut acc = ModuleAccounting { counters };
                acc.pop_aged_out(popped.mem_bytes() as u64);
                tracing::trace!(event_index, module_index = mi, "try_flush: aged-out discard");
            }
        }

        let mut slots = Vec::with_capacity(module_count);
        for mi in 0..module_count {
            let module_config = &event_config.module_configs[mi];
            let window = module_config.window;

            let class = inner.events[event_index].module_datas[mi]
                .front()
                .and_then(|storage| storage.timestamp)
                .map(|ts| timestamp_match(ref_ts, ts, window).class);

            if class == Some(WindowMatch::InWindow) {
                let storage = inner.events[event_index].module_datas[mi].pop_front().unwrap();
                let counters = &mut inner.counters[event_index].modules[mi];
                let mut acc = ModuleAccounting { counters };
                acc.pop_matched(storage.mem_bytes() as u64);
                tracing::trace!(event_index, module_index = mi, "try_flush: in-window match");
                slots.push(storage);
            } else {
                slots.push(ModuleStorage::placeholder(
                    module_config.prefix_size,
                    module_config.has_dynamic,
                ));
            }
        }

        inner
            .callbacks
            .event_data(self.config.output_crate_index, event_index, &slots);
        true
    }

    /// Unconditionally drains every module queue for `event_index`,
    /// ignoring windows and the reference-timestamp deque. Returns the
    /// number of output events emitted.
    #[tracing::instrument(skip(self))]
    pub fn force_flush(&self, event_index: usize) -> usize {
        if event_index >= self.config.event_configs.len() {
            return 0;
        }

        let event_config = &self.config.event_configs[event_index];
        let module_count = event_config.module_configs.len();
        let mut inner = self.inner.lock();
        let mut flushed = 0usize;

        loop {
            let any_nonempty = (0..module_count)
                .any(|mi| !inner.events[event_index].module_datas[mi].is_empty());
            if !any_nonempty {
                break;
            }

            let mut slots = Vec::with_capacity(module_count);
            let mut any_contributed = false;

            for mi in 0..module_count {
                match inner.events[event_index].module_datas[mi].pop_front() {
                    Some(storage) => {
                        let counters = &mut inner.counters[event_index].modules[mi];
                        let mut acc = ModuleAccounting { counters };
                        acc.pop_matched(storage.mem_bytes() as u64);
                        any_contributed = true;
                        slots.push(storage);
                    }
                    None => {
                        let module_config = &event_config.module_configs[mi];
                        slots.push(ModuleStorage::placeholder(
                            module_config.prefix_size,
                            module_config.has_dynamic,
                        ));
                    }
                }
            }

            if any_contributed {
                inner
                    .callbacks
                    .event_data(self.config.output_crate_index, event_index, &slots);
                flushed += 1;
            }
        }

        tracing::debug!(event_index, flushed, "force_flush complete");
        flushed
    }

    /// Passes a system event straight through to the callbacks under the
    /// mutex.
    pub fn handle_system_event(&self, header: &[u32]) {
        self.inner
            .lock()
            .callbacks
            .system_event(self.config.output_crate_index, header);
    }

    /// Flushes every event index. With `force`, drains unconditionally via
    /// [`Self::force_flush`]; otherwise loops [`Self::try_flush`] to
    /// exhaustion for each event. Returns the aggregate output count.
    pub fn flush(&self, force: bool) -> usize {
        let event_count = self.config.event_configs.len();
        let mut total = 0usize;

        if force {
            for event_index in 0..event_count {
                total += self.force_flush(event_index);
            }
        } else {
            for event_index in 0..event_count {
                while self.try_flush(event_index) {
                    total += 1;
                }
            }
        }

        total
    }

    /// A human-readable snapshot of pending state across all events.
    pub fn debug_dump(&self) -> String {
        let inner = self.inner.lock();
        let mut out = String::new();

        for (event_index, event) in inner.events.iter().enumerate() {
            let module_timestamps: Vec<Vec<Option<Ts>>> = event
                .module_datas
                .iter()
                .map(|queue| queue.iter().map(|storage| storage.timestamp).collect())
                .collect();
            out.push_str(&debug_dump_event(event_index, &event.all_timestamps, &module_timestamps));
        }

        out
    }

    /// A snapshot copy of every event's counters.
    pub fn get_counters(&self) -> BuilderCounters {
        BuilderCounters {
            events: self.inner.lock().counters.clone(),
        }
    }

    /// Whether any configured event is enabled for correlation.
    pub fn is_enabled_for_any_event(&self) -> bool {
        self.config.event_configs.iter().any(|event| event.enabled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EventConfig, ModuleConfig};
    use crate::filter::TimestampExtractor;
    use std::sync::{Arc, Mutex as StdMutex};

    #[derive(Clone, Default)]
    struct Recording {
        events: Arc<StdMutex<Vec<(i32, usize, Vec<ModuleStorage>)>>>,
        system_events: Arc<StdMutex<Vec<(i32, Vec<u32>)>>>,
    }

    struct RecordingCallbacks(Recording);

    impl Callbacks for RecordingCallbacks {
        fn event_data(&mut self, output_crate_index: i32, event_index: usize, slots: &[ModuleStorage]) {
            self.0
                .events
                .lock()
                .unwrap()
                .push((output_crate_index, event_index, slots.to_vec()));
        }

        fn system_event(&mut self, output_crate_index: i32, header: &[u32]) {
            self.0
                .system_events
                .lock()
                .unwrap()
                .push((output_crate_index, header.to_vec()));
        }
    }

    fn two_module_config(window: u32) -> EventBuilderConfig {
        let module = ModuleConfig {
            ts_extractor: TimestampExtractor::Invalid,
            offset: 0,
            window,
            ignored: false,
            prefix_size: 1,
            has_dynamic: false,
        };

        EventBuilderConfig {
            event_configs: vec![EventConfig {
                enabled: true,
                module_configs: vec![module.clone(), module],
            }],
            output_crate_index: 7,
        }
    }

    /// An empty payload: under an `Invalid` extractor, neither module
    /// produces its own stamp, so any stamp these entries end up with must
    /// come from the filler rule.
    fn module_with_no_stamp() -> ModuleData<'static> {
        ModuleData::new(&[], 0, 0, 0, false)
    }

    fn data_tagged(value: u32) -> ModuleData<'static> {
        let leaked: &'static [u32] = Box::leak(Box::new([value]));
        ModuleData::new(leaked, 1, 0, 0, false)
    }

    fn scanning_stamp_config(window: u32) -> EventBuilderConfig {
        let filter = crate::filter::DataFilter::new("11DDDDDDDDDDDDDDDDDDDDDDDDDDDDDD").unwrap();
        let module = ModuleConfig {
            ts_extractor: TimestampExtractor::indexed(filter, 0, 'D').unwrap(),
            offset: 0,
            window,
            ignored: false,
            prefix_size: 1,
            has_dynamic: false,
        };

        EventBuilderConfig {
            event_configs: vec![EventConfig {
                enabled: true,
                module_configs: vec![module.clone(), module],
            }],
            output_crate_index: 0,
        }
    }

    fn word_for_stamp(stamp: u32) -> u32 {
        0xC000_0000 | (stamp & 0x3FFF_FFFF)
    }

    #[test]
    fn rejects_config_with_zero_size_static_module() {
        let mut config = two_module_config(16);
        config.event_configs[0].module_configs[0].prefix_size = 0;
        let recording = Recording::default();
        let result = EventBuilder::new(config, Box::new(RecordingCallbacks(recording)));
        assert!(result.is_err());
    }

    #[test]
    fn out_of_range_event_index_returns_false_without_mutating_counters() {
        let config = scanning_stamp_config(16);
        let recording = Recording::default();
        let builder = EventBuilder::new(config, Box::new(RecordingCallbacks(recording))).unwrap();
        assert!(!builder.record_module_data(5, &[data_tagged(word_for_stamp(1)), data_tagged(word_for_stamp(1))]));
    }

    #[test]
    fn perfect_coincidence_emits_single_event_s1() {
        let config = scanning_stamp_config(16);
        let recording = Recording::default();
        let builder = EventBuilder::new(config, Box::new(RecordingCallbacks(recording.clone()))).unwrap();

        let data = [data_tagged(word_for_stamp(100)), data_tagged(word_for_stamp(100))];
        assert!(builder.record_module_data(0, &data));

        // Nothing to flush against yet: this is the only reference and its
        // own module queues' backs equal the reference itself (InWindow,
        // not TooNew), so the future-safety gate correctly withholds it.
        assert!(!builder.try_flush(0));

        // A later, clearly-separated batch proves the first pair final.
        let later = [data_tagged(word_for_stamp(1000)), data_tagged(word_for_stamp(1000))];
        assert!(builder.record_module_data(0, &later));
        assert!(builder.try_flush(0));

        let events = recording.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        let (_, event_index, slots) = &events[0];
        assert_eq!(*event_index, 0);
        assert_eq!(slots.len(), 2);
        assert_eq!(slots[0].timestamp, Some(100));
        assert_eq!(slots[1].timestamp, Some(100));

        let counters = builder.get_counters();
        assert_eq!(counters.events[0].modules[0].output_hits, 1);
        assert_eq!(counters.events[0].modules[1].output_hits, 1);
    }

    #[test]
    fn in_window_offset_emits_single_event_s2() {
        let config = scanning_stamp_config(16);
        let recording = Recording::default();
        let builder = EventBuilder::new(config, Box::new(RecordingCallbacks(recording.clone()))).unwrap();

        let data = [data_tagged(word_for_stamp(100)), data_tagged(word_for_stamp(104))];
        assert!(builder.record_module_data(0, &data));

        let later = [data_tagged(word_for_stamp(2000)), data_tagged(word_for_stamp(2000))];
        assert!(builder.record_module_data(0, &later));
        assert!(builder.try_flush(0));

        let events = recording.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        let (_, _, slots) = &events[0];
        assert_eq!(slots[0].timestamp, Some(100));
        assert_eq!(slots[1].timestamp, Some(104));
    }

    #[test]
    fn too_old_module_is_purged_with_discard_counted() {
        let config = scanning_stamp_config(16);
        let recording = Recording::default();
        let builder = EventBuilder::new(config, Box::new(RecordingCallbacks(recording.clone()))).unwrap();

        // module 1 sees a stamp far behind module 0's first reference, then
        // both see stamps far enough ahead to prove the reference final.
        assert!(builder.record_module_data(0, &[data_tagged(word_for_stamp(100)), data_tagged(word_for_stamp(0))]));
        assert!(builder.record_module_data(
            0,
            &[data_tagged(word_for_stamp(1000)), data_tagged(word_for_stamp(1000))]
        ));

        assert!(builder.try_flush(0));

        let counters = builder.get_counters();
        assert_eq!(counters.events[0].modules[1].discards_age, 1);
        assert_eq!(counters.events[0].modules[0].output_hits, 1);
        // module 1's 0-stamp was aged out, not matched, so it contributes
        // a placeholder to this flush rather than output_hits.
        let events = recording.events.lock().unwrap();
        assert_eq!(events[0].2[1].timestamp, None);
    }

    #[test]
    fn stamp_extraction_failure_gets_filler_s5() {
        let config = two_module_config(16);
        let recording = Recording::default();
        let builder = EventBuilder::new(config, Box::new(RecordingCallbacks(recording.clone()))).unwrap();

        // Both modules use the Invalid extractor here, so neither produces
        // its own stamp: this is the "no stamp anywhere in the batch" case,
        // where the filler rule itself has nothing to propagate. It
        // confirms an all-miss batch still buffers both entries without a
        // reference timestamp being created.
        let data = [module_with_no_stamp(), module_with_no_stamp()];
        assert!(builder.record_module_data(0, &data));
        assert!(!builder.try_flush(0));

        let counters = builder.get_counters();
        assert_eq!(counters.events[0].modules[0].current_events, 1);
        assert_eq!(counters.events[0].modules[1].current_events, 1);
    }

    #[test]
    fn disabled_event_passes_through_immediately_s6() {
        let mut config = two_module_config(16);
        config.event_configs[0].enabled = false;
        let recording = Recording::default();
        let builder = EventBuilder::new(config, Box::new(RecordingCallbacks(recording.clone()))).unwrap();

        let data = [data_tagged(word_for_stamp(1)), data_tagged(word_for_stamp(2))];
        assert!(builder.record_module_data(0, &data));

        let events = recording.events.lock().unwrap();
        assert_eq!(events.len(), 1);

        let counters = builder.get_counters();
        assert_eq!(counters.events[0].modules[0].input_hits, 1);
        assert_eq!(counters.events[0].modules[0].output_hits, 1);
        assert_eq!(counters.events[0].modules[1].input_hits, 1);
        assert_eq!(counters.events[0].modules[1].output_hits, 1);
    }

    #[test]
    fn force_flush_drains_to_empty() {
        let config = scanning_stamp_config(16);
        let recording = Recording::default();
        let builder = EventBuilder::new(config, Box::new(RecordingCallbacks(recording.clone()))).unwrap();

        let data = [data_tagged(word_for_stamp(5)), data_tagged(word_for_stamp(9))];
        assert!(builder.record_module_data(0, &data));

        let flushed = builder.force_flush(0);
        assert_eq!(flushed, 1);

        let counters = builder.get_counters();
        assert_eq!(counters.events[0].modules[0].current_events, 0);
        assert_eq!(counters.events[0].modules[0].current_mem, 0);
        assert_eq!(counters.events[0].modules[1].current_events, 0);
        assert_eq!(counters.events[0].modules[1].current_mem, 0);
    }

    #[test]
    fn force_flush_is_idempotent_once_empty() {
        let config = scanning_stamp_config(16);
        let recording = Recording::default();
        let builder = EventBuilder::new(config, Box::new(RecordingCallbacks(recording))).unwrap();

        assert_eq!(builder.force_flush(0), 0);
        assert_eq!(builder.force_flush(0), 0);
    }

    #[test]
    fn ignored_module_does_not_stall_flush() {
        let mut config = scanning_stamp_config(16);
        config.event_configs[0].module_configs[1].ignored = true;
        let recording = Recording::default();
        let builder = EventBuilder::new(config, Box::new(RecordingCallbacks(recording.clone()))).unwrap();

        let data = [data_tagged(word_for_stamp(100)), data_tagged(word_for_stamp(100))];
        assert!(builder.record_module_data(0, &data));

        let later = [data_tagged(word_for_stamp(5000)), data_tagged(word_for_stamp(5000))];
        assert!(builder.record_module_data(0, &later));

        assert!(builder.try_flush(0));
        let events = recording.events.lock().unwrap();
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn system_event_passes_straight_through() {
        let config = scanning_stamp_config(16);
        let recording = Recording::default();
        let builder = EventBuilder::new(config, Box::new(RecordingCallbacks(recording.clone()))).unwrap();

        builder.handle_system_event(&[1, 2, 3]);

        let events = recording.system_events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].1, vec![1, 2, 3]);
    }

    #[test]
    fn is_enabled_for_any_event_reflects_config() {
        let config = scanning_stamp_config(16);
        let recording = Recording::default();
        let builder = EventBuilder::new(config, Box::new(RecordingCallbacks(recording))).unwrap();
        assert!(builder.is_enabled_for_any_event());

        let mut disabled = scanning_stamp_config(16);
        disabled.event_configs[0].enabled = false;
        let recording2 = Recording::default();
        let builder2 = EventBuilder::new(disabled, Box::new(RecordingCallbacks(recording2))).unwrap();
        assert!(!builder2.is_enabled_for_any_event());
    }

    #[test]
    fn debug_dump_mentions_event_index() {
        let config = scanning_stamp_config(16);
        let recording = Recording::default();
        let builder = EventBuilder::new(config, Box::new(RecordingCallbacks(recording))).unwrap();
        let dump = builder.debug_dump();
        assert!(dump.contains("event 0:"));
    }

}
