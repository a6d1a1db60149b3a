//! Fixed-interval epoch arithmetic shared by the aggregators.
//!
//! Epochs are half-open intervals `[start, start + duration)` on a grid
//! shifted by an alignment offset: either the first sample's time (so the
//! first epoch begins exactly at the data) or the wall clock (so epochs land
//! on round multiples of the duration since the UNIX epoch).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum EpochAlignment {
    /// Align the grid to the first sample seen.
    StreamStart,
    /// Align the grid to the UNIX epoch (wall-clock boundaries).
    WallClock,
    /// Align the grid to an explicit offset in seconds.
    Offset(f64),
}

impl EpochAlignment {
    /// The grid offset to add to timestamps before quantizing.
    pub fn resolve(&self, first_time: f64) -> f64 {
        match *self {
            EpochAlignment::StreamStart => -first_time,
            EpochAlignment::WallClock => 0.0,
            EpochAlignment::Offset(offset) => offset,
        }
    }
}

/// Index of the epoch containing `time` on the aligned grid.
pub fn epoch_index(time: f64, offset: f64, duration: f64) -> i64 {
    ((time + offset) / duration).floor() as i64
}

/// Start time of the epoch with the given index.
pub fn epoch_start(index: i64, offset: f64, duration: f64) -> f64 {
    index as f64 * duration - offset
}
