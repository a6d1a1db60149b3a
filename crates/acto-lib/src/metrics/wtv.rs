//! Wear-time validation over 30-minute epochs.
//!
//! Follows the van Hees estimation: non-wear shows as near-zero variation
//! on most axes. Each epoch is split into fixed sub-windows; a sub-window
//! votes non-wear when both the per-axis standard deviation and the
//! per-axis value range sit under their cutoffs on at least `min_axes` of
//! the three axes (strict inequalities). An epoch is classified non-wear
//! when the configured fraction of its non-empty sub-windows vote non-wear;
//! sub-windows that received no samples abstain rather than vote.

use serde::{Deserialize, Serialize};

use crate::epoch::{epoch_index, epoch_start, EpochAlignment};
use crate::signal::{RunningStats, Sample};

pub const AXES: usize = 3;

#[derive(Debug, Clone, Copy)]
pub struct WtvConfig {
    /// Epoch duration in seconds (30 minutes).
    pub epoch_seconds: f64,
    /// Sub-window duration in seconds.
    pub sub_window_seconds: f64,
    /// Non-wear standard-deviation cutoff in g (3 mg).
    pub std_cutoff: f64,
    /// Non-wear range cutoff in g (50 mg).
    pub range_cutoff: f64,
    /// Axes that must sit under a cutoff for a sub-window to vote non-wear.
    pub min_axes: usize,
    /// Fraction of non-empty sub-windows that must vote non-wear for the
    /// epoch to be classified non-wear.
    pub required_fraction: f64,
    pub alignment: EpochAlignment,
}

impl Default for WtvConfig {
    fn default() -> Self {
        Self {
            epoch_seconds: 30.0 * 60.0,
            sub_window_seconds: 60.0,
            std_cutoff: 0.003,
            range_cutoff: 0.050,
            min_axes: 2,
            required_fraction: 1.0,
            alignment: EpochAlignment::StreamStart,
        }
    }
}

impl WtvConfig {
    /// Sub-windows a full epoch contains.
    pub fn sub_windows_per_epoch(&self) -> usize {
        (self.epoch_seconds / self.sub_window_seconds).round() as usize
    }
}

/// One emitted wear-time classification.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WtvEpoch {
    /// Epoch start, seconds since the UNIX epoch.
    pub time: f64,
    /// True when the device was judged worn during this epoch.
    pub worn: bool,
    /// Fewer occupied sub-windows than a full epoch carries.
    pub partial: bool,
    pub sample_count: usize,
    /// Sub-windows that received at least one sample.
    pub occupied_sub_windows: usize,
    /// Occupied sub-windows that voted non-wear.
    pub non_wear_votes: usize,
    /// Whole-epoch per-axis standard deviation, in g.
    pub axis_std: [f64; AXES],
    /// Whole-epoch per-axis value range, in g.
    pub axis_range: [f64; AXES],
}

/// Streaming aggregator: feed samples with `push`, close with `finish`.
/// At most one epoch plus its open sub-window is live at a time.
#[derive(Debug, Clone)]
pub struct WtvAggregator {
    config: WtvConfig,
    offset: Option<f64>,
    epoch: Option<OpenEpoch>,
}

#[derive(Debug, Clone)]
struct OpenEpoch {
    index: i64,
    sample_count: usize,
    occupied_sub_windows: usize,
    non_wear_votes: usize,
    sub_index: Option<i64>,
    sub_stats: [RunningStats; AXES],
    epoch_stats: [RunningStats; AXES],
}

impl OpenEpoch {
    fn new(index: i64) -> Self {
        Self {
            index,
            sample_count: 0,
            occupied_sub_windows: 0,
            non_wear_votes: 0,
            sub_index: None,
            sub_stats: [RunningStats::new(); AXES],
            epoch_stats: [RunningStats::new(); AXES],
        }
    }
}

impl WtvAggregator {
    pub fn new(config: WtvConfig) -> Self {
        Self {
            config,
            offset: None,
            epoch: None,
        }
    }

    /// Add one sample; returns the previous epoch's classification when the
    /// sample crosses a 30-minute boundary.
    pub fn push(&mut self, sample: &Sample) -> Option<WtvEpoch> {
        let offset = match self.offset {
            Some(offset) => offset,
            None => {
                let offset = self.config.alignment.resolve(sample.time);
                self.offset = Some(offset);
                offset
            }
        };
        let index = epoch_index(sample.time, offset, self.config.epoch_seconds);
        let sub_index = epoch_index(sample.time, offset, self.config.sub_window_seconds);

        let mut emitted = None;
        if self.epoch.as_ref().map(|open| open.index) != Some(index) {
            emitted = self.close_epoch();
            self.epoch = Some(OpenEpoch::new(index));
        }

        let config = self.config;
        let open = self.epoch.as_mut().expect("epoch opened above");
        if open.sub_index != Some(sub_index) {
            close_sub_window(open, &config);
            open.sub_index = Some(sub_index);
        }

        for axis in 0..AXES {
            open.sub_stats[axis].add(sample.accel[axis]);
            open.epoch_stats[axis].add(sample.accel[axis]);
        }
        open.sample_count += 1;

        emitted
    }

    /// Classify and emit the final open epoch, if any.
    pub fn finish(&mut self) -> Option<WtvEpoch> {
        self.close_epoch()
    }

    fn close_epoch(&mut self) -> Option<WtvEpoch> {
        let mut open = self.epoch.take()?;
        let config = self.config;
        close_sub_window(&mut open, &config);
        if open.sample_count == 0 {
            return None;
        }

        let offset = self.offset.unwrap_or(0.0);
        let occupied = open.occupied_sub_windows;
        let required = (config.required_fraction * occupied as f64).ceil() as usize;
        let non_wear = occupied > 0 && open.non_wear_votes >= required.max(1);

        let mut axis_std = [0.0; AXES];
        let mut axis_range = [0.0; AXES];
        for axis in 0..AXES {
            axis_std[axis] = open.epoch_stats[axis].stddev();
            axis_range[axis] = open.epoch_stats[axis].range();
        }

        Some(WtvEpoch {
            time: epoch_start(open.index, offset, config.epoch_seconds),
            worn: !non_wear,
            partial: occupied < config.sub_windows_per_epoch(),
            sample_count: open.sample_count,
            occupied_sub_windows: occupied,
            non_wear_votes: open.non_wear_votes,
            axis_std,
            axis_range,
        })
    }
}

/// Fold the open sub-window's statistics into the epoch's vote counts.
fn close_sub_window(open: &mut OpenEpoch, config: &WtvConfig) {
    if open.sub_index.is_none() {
        return;
    }
    let occupied = open.sub_stats.iter().any(|stats| stats.count() > 0);
    if occupied {
        let std_low = open
            .sub_stats
            .iter()
            .filter(|stats| stats.stddev() < config.std_cutoff)
            .count();
        let range_low = open
            .sub_stats
            .iter()
            .filter(|stats| stats.range() < config.range_cutoff)
            .count();
        open.occupied_sub_windows += 1;
        if std_low >= config.min_axes && range_low >= config.min_axes {
            open.non_wear_votes += 1;
        }
    }
    for stats in open.sub_stats.iter_mut() {
        stats.clear();
    }
}

/// Lazy adapter: wear-time classifications from a sample iterator.
pub struct WtvIter<I> {
    samples: I,
    aggregator: WtvAggregator,
    done: bool,
}

impl<I: Iterator<Item = Sample>> Iterator for WtvIter<I> {
    type Item = WtvEpoch;

    fn next(&mut self) -> Option<WtvEpoch> {
        if self.done {
            return None;
        }
        loop {
            match self.samples.next() {
                Some(sample) => {
                    if let Some(epoch) = self.aggregator.push(&sample) {
                        return Some(epoch);
                    }
                }
                None => {
                    self.done = true;
                    return self.aggregator.finish();
                }
            }
        }
    }
}

/// Compute wear-time epochs over any sample source.
pub fn wtv_epochs<I>(samples: I, config: WtvConfig) -> WtvIter<I::IntoIter>
where
    I: IntoIterator<Item = Sample>,
{
    WtvIter {
        samples: samples.into_iter(),
        aggregator: WtvAggregator::new(config),
        done: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    const RATE: f64 = 50.0;

    fn sample_at(time: f64, accel: [f64; 3]) -> Sample {
        Sample {
            time,
            accel,
            gyro: None,
            temperature: None,
        }
    }

    /// Device resting on a table: sub-millig jitter around gravity.
    fn resting(seconds: f64, start: f64, seed: u64) -> Vec<Sample> {
        let mut rng = StdRng::seed_from_u64(seed);
        let count = (seconds * RATE) as usize;
        (0..count)
            .map(|i| {
                let mut jitter = || rng.gen_range(-0.0005..0.0005);
                sample_at(
                    start + i as f64 / RATE,
                    [jitter(), jitter(), 1.0 + jitter()],
                )
            })
            .collect()
    }

    /// Worn device: broad motion on every axis.
    fn moving(seconds: f64, start: f64, seed: u64) -> Vec<Sample> {
        let mut rng = StdRng::seed_from_u64(seed);
        let count = (seconds * RATE) as usize;
        (0..count)
            .map(|i| {
                let mut swing = || rng.gen_range(-0.5..0.5);
                sample_at(
                    start + i as f64 / RATE,
                    [swing(), swing(), 1.0 + swing()],
                )
            })
            .collect()
    }

    #[test]
    fn resting_half_hour_is_non_wear() {
        let samples = resting(1800.0, 0.0, 1);
        let epochs: Vec<_> = wtv_epochs(samples, WtvConfig::default()).collect();
        assert_eq!(epochs.len(), 1);
        let epoch = epochs[0];
        assert!(!epoch.worn);
        assert!(!epoch.partial);
        assert_eq!(epoch.occupied_sub_windows, 30);
        assert_eq!(epoch.non_wear_votes, 30);
        for axis in 0..AXES {
            assert!(epoch.axis_std[axis] < 0.003);
            assert!(epoch.axis_range[axis] < 0.050);
        }
    }

    #[test]
    fn active_half_hour_is_wear() {
        let samples = moving(1800.0, 0.0, 2);
        let epochs: Vec<_> = wtv_epochs(samples, WtvConfig::default()).collect();
        assert_eq!(epochs.len(), 1);
        assert!(epochs[0].worn);
        assert_eq!(epochs[0].non_wear_votes, 0);
    }

    #[test]
    fn single_active_sub_window_flips_the_epoch_to_wear() {
        let mut samples = resting(900.0, 0.0, 3);
        samples.extend(moving(60.0, 900.0, 4));
        samples.extend(resting(840.0, 960.0, 5));
        let epochs: Vec<_> = wtv_epochs(samples, WtvConfig::default()).collect();
        assert_eq!(epochs.len(), 1);
        let epoch = epochs[0];
        assert!(epoch.worn);
        assert_eq!(epoch.occupied_sub_windows, 30);
        assert_eq!(epoch.non_wear_votes, 29);
    }

    #[test]
    fn still_on_two_axes_only_still_votes_non_wear() {
        // Large constant offset on one axis: range/std stay tiny on all
        // three, but motion confined to one axis keeps two axes still.
        let count = (1800.0 * RATE) as usize;
        let samples: Vec<Sample> = (0..count)
            .map(|i| {
                let wobble = 0.2 * (i as f64 * 0.7).sin();
                sample_at(i as f64 / RATE, [wobble, 0.0, 1.0])
            })
            .collect();
        let epochs: Vec<_> = wtv_epochs(samples, WtvConfig::default()).collect();
        assert_eq!(epochs.len(), 1);
        assert!(!epochs[0].worn, "two still axes should classify non-wear");
    }

    #[test]
    fn empty_sub_windows_abstain() {
        // Ten minutes of rest, a twenty-minute gap, then rest again: the
        // gap sub-windows must not count as non-wear votes.
        let mut samples = resting(600.0, 0.0, 6);
        samples.extend(resting(600.0, 1200.0, 7));
        let epochs: Vec<_> = wtv_epochs(samples, WtvConfig::default()).collect();
        assert_eq!(epochs.len(), 1);
        let epoch = epochs[0];
        assert_eq!(epoch.occupied_sub_windows, 20);
        assert_eq!(epoch.non_wear_votes, 20);
        assert!(epoch.partial, "gappy epoch has fewer occupied sub-windows");
        assert!(!epoch.worn);
    }

    #[test]
    fn final_partial_epoch_is_classified_and_flagged() {
        let mut samples = resting(1800.0, 0.0, 8);
        samples.extend(moving(300.0, 1800.0, 9));
        let epochs: Vec<_> = wtv_epochs(samples, WtvConfig::default()).collect();
        assert_eq!(epochs.len(), 2);
        assert!(!epochs[0].worn);
        assert!(!epochs[0].partial);
        assert!(epochs[1].worn);
        assert!(epochs[1].partial);
        assert_eq!(epochs[1].occupied_sub_windows, 5);
    }

    #[test]
    fn wall_clock_alignment_sets_boundaries() {
        let start = 1_600_000_000.0; // not on a 30-minute boundary
        let samples = resting(1800.0, start, 10);
        let config = WtvConfig {
            alignment: EpochAlignment::WallClock,
            ..Default::default()
        };
        let epochs: Vec<_> = wtv_epochs(samples, config).collect();
        assert_eq!(epochs.len(), 2);
        assert_eq!(epochs[0].time % 1800.0, 0.0);
        assert!(epochs[0].partial || epochs[1].partial);
    }

    #[test]
    fn both_criteria_are_required_and_cutoffs_are_strict() {
        // Alternate +/- 3mg on all axes: the sample std lands just above
        // the strict 3mg cutoff while the 6mg range stays far under its
        // 50mg cutoff. The range criterion alone must not produce a
        // non-wear vote, so the epoch is classified worn.
        let mut aggregator = WtvAggregator::new(WtvConfig::default());
        for i in 0..((1800.0 * RATE) as usize) {
            let v = if i % 2 == 0 { 0.003 } else { -0.003 };
            aggregator.push(&sample_at(i as f64 / RATE, [v, v, 1.0 + v]));
        }
        let epoch = aggregator.finish().unwrap();
        assert!(epoch.axis_std.iter().all(|&s| s >= 0.003));
        assert!(epoch.axis_range.iter().all(|&r| r < 0.050));
        assert_eq!(epoch.non_wear_votes, 0);
        assert!(epoch.worn);
    }
}
