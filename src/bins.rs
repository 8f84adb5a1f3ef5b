//! Coarse time-bin assignment
//!
//! Events are placed in the first bin whose upper threshold they fit under.
//! An event that starts inside a bin but runs past its threshold keeps that
//! bin only if the overshoot is at most a quarter of the threshold value
//! itself (not of the bin width).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Events starting at or after this time fall in the catch-all bin
pub const CATCH_ALL_START_MS: u64 = 300_000;

pub const CATCH_ALL_LABEL: &str = "5+";
pub const UNDEFINED_LABEL: &str = "Undefined";

/// Upper threshold (ms) and label of one bin
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeBin {
    pub threshold_ms: u64,
    pub label: String,
}

impl TimeBin {
    pub fn new(threshold_ms: u64, label: impl Into<String>) -> Self {
        Self {
            threshold_ms,
            label: label.into(),
        }
    }
}

/// One-minute bins over the first five minutes of a task
pub fn minute_bins() -> Vec<TimeBin> {
    ["0-1", "1-2", "2-3", "3-4", "4-5"]
        .iter()
        .enumerate()
        .map(|(i, label)| TimeBin::new((i as u64 + 1) * 60_000, *label))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinAssignment {
    Bin(String),
    CatchAll,
    Undefined,
}

impl BinAssignment {
    pub fn label(&self) -> &str {
        match self {
            BinAssignment::Bin(label) => label,
            BinAssignment::CatchAll => CATCH_ALL_LABEL,
            BinAssignment::Undefined => UNDEFINED_LABEL,
        }
    }
}

impl fmt::Display for BinAssignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Assign an event to a bin; `bins` must be in ascending threshold order.
///
/// With `ini_threshold` set, an event starting before it is not matched
/// against any bin.
pub fn assign_task_bin(
    start_ms: u64,
    end_ms: u64,
    bins: &[TimeBin],
    ini_threshold: Option<u64>,
) -> BinAssignment {
    for bin in bins {
        if ini_threshold.map_or(false, |ini| ini > 0 && start_ms < ini) {
            continue;
        }

        if start_ms <= bin.threshold_ms && end_ms <= bin.threshold_ms {
            return BinAssignment::Bin(bin.label.clone());
        }

        if start_ms <= bin.threshold_ms {
            // overshoot allowed up to 25% of the threshold: end <= 1.25 * threshold
            return if end_ms.saturating_mul(4) <= bin.threshold_ms.saturating_mul(5) {
                BinAssignment::Bin(bin.label.clone())
            } else {
                BinAssignment::Undefined
            };
        }
    }

    if start_ms >= CATCH_ALL_START_MS {
        BinAssignment::CatchAll
    } else {
        BinAssignment::Undefined
    }
}
