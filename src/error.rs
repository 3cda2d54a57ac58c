//! Typed, non-panicking error surface for configuration failures.
//!
//! Every other failure mode in this crate (out-of-range event index,
//! consistency failures, extraction failures, no-reference flushes) is
//! expected and reported through return values and counters rather than
//! `Result`, per the construction-vs-runtime split in the crate's error
//! handling design.

/// Fatal, construction-time configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error(
        "event {event_index} module {module_index}: a module with has_dynamic == false must have prefix_size > 0"
    )]
    ZeroSizeStaticModule {
        event_index: usize,
        module_index: usize,
    },
}
