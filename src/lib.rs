//! # `mvlc-event-builder`
//!
//! The windowed multi-module event correlation core for a DAQ readout
//! pipeline: given a stream of per-module data batches tagged with
//! independent hardware timestamps, groups the modules that fired together
//! into a single correlated output event per coincidence window, while
//! modules arriving too early or too late are deferred or dropped.
//!
//! This crate is the correlation core only; it does not do network I/O,
//! does not parse raw readout words into per-module slices, and does not
//! persist state across restarts. Those are the job of the DAQ runner that
//! embeds it.
//!
//! Usage is simple:
//! ```
//! use mvlc_event_builder::{
//!     Callbacks, EventBuilder, EventBuilderConfig, EventConfig, ModuleConfig, ModuleData,
//!     TimestampExtractor,
//! };
//!
//! struct PrintCallbacks;
//! impl Callbacks for PrintCallbacks {
//!     fn event_data(&mut self, _crate_index: i32, event_index: usize, slots: &[mvlc_event_builder::ModuleStorage]) {
//!         println!("event {event_index}: {} modules", slots.len());
//!     }
//!     fn system_event(&mut self, _crate_index: i32, _header: &[u32]) {}
//! }
//!
//! let module = ModuleConfig {
//!     ts_extractor: TimestampExtractor::mesytec_default(),
//!     offset: 0,
//!     window: 16,
//!     ignored: false,
//!     prefix_size: 1,
//!     has_dynamic: false,
//! };
//! let config = EventBuilderConfig {
//!     event_configs: vec![EventConfig { enabled: true, module_configs: vec![module] }],
//!     output_crate_index: 0,
//! };
//! let builder = EventBuilder::new(config, Box::new(PrintCallbacks)).unwrap();
//! let word: u32 = 0xC000_0064;
//! builder.record_module_data(0, &[ModuleData::new(&[word], 1, 0, 0, false)]);
//! ```
#![deny(rustdoc::broken_intra_doc_links)]

mod buffer;
mod builder;
mod clock;
mod config;
mod counters;
mod error;
mod filter;
mod module;

pub use buffer::PerEventData;
pub use builder::{Callbacks, EventBuilder};
pub use clock::{add_offset_to_timestamp, timestamp_difference, timestamp_match, Ts, WindowMatch, WindowMatchResult, TS_HALF, TS_MAX};
pub use config::{EventBuilderConfig, EventConfig, ModuleConfig};
pub use counters::{BuilderCounters, EventCounters, ModuleCounters};
pub use error::ConfigError;
pub use filter::{CacheEntry, DataFilter, FilterError, TimestampExtractor};
pub use module::{size_consistency_check, ModuleData, ModuleStorage};
