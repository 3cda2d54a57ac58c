//! Bit-pattern DSL for matching and extracting fields from 32-bit readout
//! words.
//!
//! A pattern is a string of up to 32 characters, read most-significant bit
//! first, built from three kinds of symbols:
//!
//! - `0` / `1` — a literal bit that must match exactly;
//! - any ASCII letter — a "don't care for matching, but captured" bit,
//!   grouped by letter into independent extraction classes;
//! - `_` — pure punctuation, dropped, present only to make long patterns
//!   readable (`"11DD_DDDD_DDDD..."`).
//!
//! Patterns shorter than 32 characters describe the low-order bits of the
//! word; any bits above the pattern's width are don't-care for matching.
//!
//! Unlike a compile-time bit-match macro, [`DataFilter::new`] parses its
//! pattern at runtime, because patterns here are data: they come from a
//! crate config loaded at startup, not literals known when this crate is
//! compiled.

use bitvec::prelude::*;

/// Errors raised while parsing a filter pattern.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FilterError {
    #[error("filter pattern is empty")]
    EmptyPattern,
    #[error("filter pattern {0:?} is longer than 32 significant bits")]
    TooWide(String),
    #[error("filter pattern {pattern:?} contains invalid character {ch:?} at position {pos}")]
    InvalidChar {
        pattern: String,
        ch: char,
        pos: usize,
    },
    #[error("filter has no bits captured for class {0:?}")]
    UnknownClass(char),
}

/// A fixed-width bit-pattern matcher over 32-bit words.
///
/// Behind the `serde` feature this (de)serializes as its pattern string
/// alone; deserialization re-parses and re-validates the pattern via
/// [`DataFilter::new`], so a malformed pattern loaded from an external
/// config fails deserialization with a typed error rather than producing
/// a filter with stale or missing derived state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataFilter {
    pattern: String,
    /// Bits that must match an exact value (`0`/`1` positions).
    care_mask: u32,
    /// Expected value at `care_mask` positions.
    expect: u32,
    /// For each letter class, the word-bit positions it captures, ordered
    /// most-significant first so extraction can right-justify them by
    /// simple left-shift-and-or.
    classes: Vec<(char, Vec<u8>)>,
}

impl DataFilter {
    /// Parses a pattern string into a [`DataFilter`].
    pub fn new(pattern: &str) -> Result<Self, FilterError> {
        let significant: Vec<char> = pattern.chars().filter(|&c| c != '_').collect();

        if significant.is_empty() {
            return Err(FilterError::EmptyPattern);
        }
        if significant.len() > 32 {
            return Err(FilterError::TooWide(pattern.to_string()));
        }

        let width = significant.len();
        let mut care_mask: u32 = 0;
        let mut expect: u32 = 0;
        let mut classes: Vec<(char, Vec<u8>)> = Vec::new();

        for (i, ch) in significant.iter().enumerate() {
            // Position `i` is the (width - 1 - i)'th bit of the word, since
            // the pattern is written most-significant-bit first.
            let bit_pos = (width - 1 - i) as u8;

            match ch {
                '0' => {
                    care_mask |= 1 << bit_pos;
                }
                '1' => {
                    care_mask |= 1 << bit_pos;
                    expect |= 1 << bit_pos;
                }
                c if c.is_ascii_alphabetic() => {
                    match classes.iter_mut().find(|(class, _)| class == c) {
                        Some((_, positions)) => positions.push(bit_pos),
                        None => classes.push((*c, vec![bit_pos])),
                    }
                }
                c => {
                    return Err(FilterError::InvalidChar {
                        pattern: pattern.to_string(),
                        ch: *c,
                        pos: i,
                    })
                }
            }
        }

        Ok(DataFilter {
            pattern: pattern.to_string(),
            care_mask,
            expect,
            classes,
        })
    }

    /// Returns whether `word` satisfies every literal `0`/`1` bit of this
    /// filter. Captured and don't-care bits are ignored.
    pub fn matches(&self, word: u32) -> bool {
        word & self.care_mask == self.expect
    }

    /// Precomputes the extraction positions for `class`, for repeated use
    /// against many words.
    pub fn cache_entry(&self, class: char) -> Result<CacheEntry, FilterError> {
        let positions = self
            .classes
            .iter()
            .find(|(c, _)| *c == class)
            .map(|(_, positions)| positions.clone())
            .ok_or(FilterError::UnknownClass(class))?;

        Ok(CacheEntry { positions })
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }
}

/// Precomputed extraction positions for one letter class of a [`DataFilter`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CacheEntry {
    positions: Vec<u8>,
}

#[cfg(feature = "serde")]
impl serde::Serialize for DataFilter {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.pattern)
    }
}

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for DataFilter {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let pattern = String::deserialize(deserializer)?;
        DataFilter::new(&pattern).map_err(serde::de::Error::custom)
    }
}

impl CacheEntry {
    /// Gathers the bits this entry was built for out of `word`, right
    /// justified, most-significant captured bit first.
    pub fn extract(&self, word: u32) -> u32 {
        let bits = word.view_bits::<Lsb0>();
        let mut out: u32 = 0;
        for &pos in &self.positions {
            out = (out << 1) | bits[pos as usize] as u32;
        }
        out
    }
}

/// `(data, size) -> Option<timestamp>` contract shared by every timestamp
/// extractor. Modeled as a tagged sum rather than a trait object so
/// [`crate::config::ModuleConfig`] stays `Clone + Debug` without boxing.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TimestampExtractor {
    /// Extracts from one specific word of the payload, indexed from the
    /// front if non-negative or from the back if negative.
    Indexed {
        filter: DataFilter,
        cache: CacheEntry,
        index: i32,
    },
    /// Scans the payload from the front and extracts from the first word
    /// that matches.
    Scanning { filter: DataFilter, cache: CacheEntry },
    /// Always fails to produce a timestamp.
    Invalid,
}

impl TimestampExtractor {
    /// Builds an [`TimestampExtractor::Indexed`] extractor.
    pub fn indexed(filter: DataFilter, index: i32, match_char: char) -> Result<Self, FilterError> {
        let cache = filter.cache_entry(match_char)?;
        Ok(TimestampExtractor::Indexed {
            filter,
            cache,
            index,
        })
    }

    /// Builds a [`TimestampExtractor::Scanning`] extractor.
    pub fn scanning(filter: DataFilter, match_char: char) -> Result<Self, FilterError> {
        let cache = filter.cache_entry(match_char)?;
        Ok(TimestampExtractor::Scanning { filter, cache })
    }

    /// The default mesytec readout extractor: a 30-bit timestamp in the
    /// last word of the payload, tagged by two literal high bits.
    pub fn mesytec_default() -> Self {
        let filter =
            DataFilter::new("11DDDDDDDDDDDDDDDDDDDDDDDDDDDDDD").expect("builtin pattern is valid");
        TimestampExtractor::indexed(filter, -1, 'D').expect("builtin pattern has class D")
    }

    /// Extracts a timestamp from `data`, or `None` if no matching word was
    /// found.
    pub fn extract(&self, data: &[u32]) -> Option<u32> {
        match self {
            TimestampExtractor::Indexed {
                filter,
                cache,
                index,
            } => {
                let size = data.len() as i64;
                let idx = if *index >= 0 {
                    *index as i64
                } else {
                    size + *index as i64
                };

                if idx >= 0 && idx < size && filter.matches(data[idx as usize]) {
                    Some(cache.extract(data[idx as usize]))
                } else {
                    None
                }
            }
            TimestampExtractor::Scanning { filter, cache } => data
                .iter()
                .find(|&&word| filter.matches(word))
                .map(|&word| cache.extract(word)),
            TimestampExtractor::Invalid => None,
        }
    }
}
