//! Typed configuration surface: `ModuleConfig`, `EventConfig`,
//! `EventBuilderConfig`, and their construction-time validation.
//!
//! These are plain, cloneable, `Debug`-able records. Behind the `serde`
//! feature they additionally derive `Serialize`/`Deserialize` so an
//! external crate-config loader can produce one from YAML, JSON, or
//! whatever format it speaks, without this crate linking against a
//! specific format.

use crate::error::ConfigError;
use crate::filter::TimestampExtractor;

/// Configuration for one module within one event.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ModuleConfig {
    pub ts_extractor: TimestampExtractor,
    pub offset: i32,
    pub window: u32,
    /// Excludes this module's stamps from becoming reference candidates;
    /// its data is still buffered and matched against other modules'
    /// references.
    pub ignored: bool,
    pub prefix_size: u32,
    pub has_dynamic: bool,
}

impl ModuleConfig {
    fn is_well_formed(&self) -> bool {
        self.has_dynamic || self.prefix_size > 0
    }
}

/// Configuration for one event: whether it participates in correlation at
/// all, and the per-module configs within it.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EventConfig {
    /// A disabled event is passed through unchanged: `record_module_data`
    /// forwards directly to the output callback.
    pub enabled: bool,
    pub module_configs: Vec<ModuleConfig>,
}

/// The builder's full configuration, as produced by an external crate
/// config loader.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EventBuilderConfig {
    pub event_configs: Vec<EventConfig>,
    pub output_crate_index: i32,
}

impl EventBuilderConfig {
    /// Validates every module config in every event config, rejecting any
    /// module with `has_dynamic == false && prefix_size == 0`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (event_index, event) in self.event_configs.iter().enumerate() {
            for (module_index, module) in event.module_configs.iter().enumerate() {
                if !module.is_well_formed() {
                    return Err(ConfigError::ZeroSizeStaticModule {
                        event_index,
                        module_index,
                    });
                }
            }
        }
        Ok(())
    }
}
