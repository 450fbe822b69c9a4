//! Bounds propagation: realized parameters of one document become the search
//! bounds of another.
//!
//! A portfolio run picks an operating point (`bot.long`, `bot.short`). Each
//! single-symbol run then searches only around that point: the propagated keys
//! are pinned to the portfolio's values, or widened by a percentage and
//! clamped when a [`Widen`] is given.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::document::schema::{ConfigBody, Side};
use crate::error::{Error, Result};

/// Parameters copied from `bot.{side}` into `optimize.bounds`.
pub const PROPAGATED_KEYS: [&str; 6] = [
    "filter_relative_volume_clip_pct",
    "filter_rolling_window",
    "total_wallet_exposure_limit",
    "unstuck_close_pct",
    "unstuck_loss_allowance_pct",
    "n_positions",
];

/// Closed numeric interval `[lo, hi]` with `lo <= hi`.
///
/// Serialized as a two-element JSON array.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "[f64; 2]", into = "[f64; 2]")]
pub struct Range {
    lo: f64,
    hi: f64,
}

impl Range {
    /// `[0, 0]`: excludes a parameter from the search.
    pub const DISABLED: Range = Range { lo: 0.0, hi: 0.0 };

    pub fn new(lo: f64, hi: f64) -> Option<Self> {
        (lo <= hi).then_some(Self { lo, hi })
    }

    /// Like [`Range::new`], reporting the offending key on failure.
    pub fn checked(key: &str, lo: f64, hi: f64) -> Result<Self> {
        Self::new(lo, hi).ok_or_else(|| Error::InvalidBounds {
            key: key.to_string(),
            lo,
            hi,
        })
    }

    pub fn pinned(value: f64) -> Self {
        Self {
            lo: value,
            hi: value,
        }
    }

    pub fn lo(&self) -> f64 {
        self.lo
    }

    pub fn hi(&self) -> f64 {
        self.hi
    }

    pub fn is_disabled(&self) -> bool {
        self.lo == 0.0 && self.hi == 0.0
    }
}

impl TryFrom<[f64; 2]> for Range {
    type Error = String;

    fn try_from([lo, hi]: [f64; 2]) -> std::result::Result<Self, Self::Error> {
        Range::new(lo, hi).ok_or_else(|| format!("bounds [{lo}, {hi}] have min > max"))
    }
}

impl From<Range> for [f64; 2] {
    fn from(r: Range) -> Self {
        [r.lo, r.hi]
    }
}

impl std::fmt::Display for Range {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {}]", self.lo, self.hi)
    }
}

/// Widening applied around a source value: `±pct`, clamped to `[min, max]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Widen {
    pub pct: f64,
    pub min: f64,
    pub max: f64,
}

/// Derived range for `value`.
///
/// Without `widen` the range is degenerate. With it the range is
/// `[max(min, v·(1−pct)), min(max, v·(1+pct))]`, kept inside `[min, max]`
/// and ordered even for negative values.
pub fn compute_range(value: f64, widen: Option<&Widen>) -> Range {
    let Some(w) = widen else {
        return Range::pinned(value);
    };
    let (floor, ceil) = if w.min <= w.max {
        (w.min, w.max)
    } else {
        (w.max, w.min)
    };
    let a = value * (1.0 - w.pct);
    let b = value * (1.0 + w.pct);
    let lo = a.min(b).clamp(floor, ceil);
    let hi = a.max(b).clamp(floor, ceil);
    Range { lo, hi }
}

/// Pin `dest`'s bounds to `source`'s realized parameters.
pub fn propagate(source: &ConfigBody, dest: &mut ConfigBody) -> usize {
    propagate_with(source, dest, None)
}

/// Copy `source.bot[side][key]` into `dest.optimize.bounds[{side}_{key}]` for
/// every propagated key and side. Returns the number of bounds written.
///
/// No-op when `source` has no `bot` section or `dest` has no `optimize`.
pub fn propagate_with(source: &ConfigBody, dest: &mut ConfigBody, widen: Option<&Widen>) -> usize {
    let (Some(bot), Some(optimize)) = (source.bot.as_ref(), dest.optimize.as_mut()) else {
        return 0;
    };

    let mut written = 0;
    for side in Side::ALL {
        let params = bot.side(side);
        for key in PROPAGATED_KEYS {
            match params.get(key) {
                Some(&value) => {
                    optimize
                        .bounds
                        .insert(side.bound_key(key), compute_range(value, widen));
                    written += 1;
                }
                None => warn!(side = %side, key, "source has no realized value, bound left as is"),
            }
        }
    }
    written
}
