//! 30-bit modular clock arithmetic and windowed match classification.
//!
//! Module timestamps wrap at `2^30`. All comparisons between two stamps must
//! therefore take the "short way around the ring" rather than a plain
//! subtraction, or a module that is actually just barely ahead of the
//! reference would look like it were hopelessly far behind.

/// A 30-bit hardware clock tick. Values above [`TS_MAX`] never occur; callers
/// that extract a value from raw words are expected to have already masked
/// it down via the extractor's bit pattern.
pub type Ts = u32;

/// Largest representable timestamp; the clock wraps to 0 after this.
pub const TS_MAX: u32 = 0x3FFF_FFFF;

/// Half of [`TS_MAX`], the boundary beyond which "forward" and "backward"
/// differences become ambiguous.
pub const TS_HALF: u32 = TS_MAX >> 1;

/// Applies a signed offset to a timestamp, wrapping within the 30-bit range.
///
/// The addition is carried out in `i64` so that a large negative offset
/// cannot underflow before the mask is applied.
pub fn add_offset_to_timestamp(ts: Ts, offset: i32) -> Ts {
    let wrapped = (ts as i64 + offset as i64) & (TS_MAX as i64);
    wrapped as Ts
}

/// Signed difference `t0 - t1`, chosen to be the shorter way around the
/// 30-bit ring: the result always satisfies `|diff| <= TS_HALF + 1`.
pub fn timestamp_difference(t0: Ts, t1: Ts) -> i64 {
    let mut diff = t0 as i64 - t1 as i64;

    if diff.abs() > TS_HALF as i64 {
        if diff < 0 {
            diff += TS_MAX as i64 + 1;
        } else {
            diff -= TS_MAX as i64 + 1;
        }
    }

    diff
}

/// Classification of a module timestamp relative to a reference timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum WindowMatch {
    /// The module timestamp is behind the reference by more than half the
    /// window: it can never be matched against this or any later reference
    /// and must be discarded.
    TooOld,
    /// The module timestamp is within `window / 2` of the reference.
    InWindow,
    /// The module timestamp is ahead of the reference by more than half the
    /// window: it might still match a future reference, so it is kept.
    TooNew,
}

/// Outcome of [`timestamp_match`]: the classification plus the absolute
/// distance to the reference, for diagnostics. `invscore` of `0` is a
/// perfect match; the higher the value the worse the match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowMatchResult {
    pub class: WindowMatch,
    pub invscore: u32,
}

/// Classifies `ts_mod` relative to `ts_ref` given a full window width.
///
/// `window` is the full width of the acceptance interval; half of it is
/// applied on each side of the reference. The comparison against the
/// half-width is done in floating point to match the reference
/// implementation bit-for-bit on odd window widths (see Open Question in
/// [`crate`] docs).
pub fn timestamp_match(ts_ref: Ts, ts_mod: Ts, window: u32) -> WindowMatchResult {
    let diff = timestamp_difference(ts_ref, ts_mod);
    let invscore = diff.unsigned_abs() as u32;

    if (diff as f64).abs() > window as f64 * 0.5 {
        let class = if diff >= 0 {
            WindowMatch::TooOld
        } else {
            WindowMatch::TooNew
        };
        WindowMatchResult { class, invscore }
    } else {
        WindowMatchResult {
            class: WindowMatch::InWindow,
            invscore,
        }
    }
}
