//! Live-capture timeseries records.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::color::Color;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Snapshot of one ROI's live log, ready for export.
///
/// `values[i]` was captured at `timestamps[i]`, in seconds since the Unix
/// epoch. The live frame index is the position in the log.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LiveRecord {
    pub name: String,
    pub color: Color,
    pub values: Vec<f32>,
    pub timestamps: Vec<f64>,
}

impl LiveRecord {
    /// Number of captured frames.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Live frame indices `0..len`.
    #[must_use]
    pub fn indices(&self) -> Vec<usize> {
        (0..self.values.len()).collect()
    }
}

/// Current wall-clock time in seconds since the Unix epoch.
#[must_use]
pub fn epoch_seconds(time: SystemTime) -> f64 {
    // clocks set before 1970 report 0
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}
