//! Signal-vector-magnitude epoch summaries.
//!
//! Consumes a sample stream in fixed, non-overlapping epochs and emits the
//! per-epoch mean of `|sqrt(x^2+y^2+z^2) - 1|` (or a configured variant).
//! Only the open epoch's running sum is held; epochs are emitted as their
//! boundary is crossed and the final open epoch on `finish`.

use serde::{Deserialize, Serialize};

use crate::epoch::{epoch_index, epoch_start, EpochAlignment};
use crate::filter::{Identity, TriaxialFilter};
use crate::signal::Sample;

/// How the magnitude is folded around 1g.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SvmMode {
    /// `abs(svm - 1)`.
    Abs,
    /// `max(svm - 1, 0)`.
    ClampZero,
    /// `svm - 1`, signed.
    Signed,
}

impl SvmMode {
    fn apply(&self, magnitude: f64) -> f64 {
        let centred = magnitude - 1.0;
        match self {
            SvmMode::Abs => centred.abs(),
            SvmMode::ClampZero => centred.max(0.0),
            SvmMode::Signed => centred,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SvmConfig {
    /// Epoch duration in seconds.
    pub epoch_seconds: f64,
    pub alignment: EpochAlignment,
    pub mode: SvmMode,
    /// Nominal sample rate; epochs with fewer than `rate * duration`
    /// samples are flagged partial. `None` disables the flag.
    pub expected_rate: Option<f64>,
}

impl Default for SvmConfig {
    fn default() -> Self {
        Self {
            epoch_seconds: 60.0,
            alignment: EpochAlignment::StreamStart,
            mode: SvmMode::Abs,
            expected_rate: None,
        }
    }
}

/// One emitted epoch summary.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SvmEpoch {
    /// Epoch start, seconds since the UNIX epoch.
    pub time: f64,
    /// Mean folded magnitude over the epoch, in g.
    pub mean_svm: f64,
    pub sample_count: usize,
    /// Fewer samples than the nominal rate predicts for a full epoch.
    pub partial: bool,
}

/// Streaming aggregator: feed samples with `push`, close with `finish`.
pub struct SvmAggregator {
    config: SvmConfig,
    filter: Box<dyn TriaxialFilter>,
    offset: Option<f64>,
    current_index: Option<i64>,
    sum: f64,
    count: usize,
}

impl SvmAggregator {
    pub fn new(config: SvmConfig) -> Self {
        Self::with_filter(config, Box::new(Identity))
    }

    /// Use a pre-magnitude per-axis filter (e.g. a band-pass).
    pub fn with_filter(config: SvmConfig, filter: Box<dyn TriaxialFilter>) -> Self {
        Self {
            config,
            filter,
            offset: None,
            current_index: None,
            sum: 0.0,
            count: 0,
        }
    }

    /// Add one sample; returns the previous epoch's summary when the sample
    /// crosses an epoch boundary.
    pub fn push(&mut self, sample: &Sample) -> Option<SvmEpoch> {
        let offset = match self.offset {
            Some(offset) => offset,
            None => {
                let offset = self.config.alignment.resolve(sample.time);
                self.offset = Some(offset);
                offset
            }
        };
        let index = epoch_index(sample.time, offset, self.config.epoch_seconds);

        let emitted = if self.current_index != Some(index) {
            let emitted = self.close_current();
            self.current_index = Some(index);
            emitted
        } else {
            None
        };

        let [x, y, z] = self.filter.process(sample.accel);
        let magnitude = (x * x + y * y + z * z).sqrt();
        self.sum += self.config.mode.apply(magnitude);
        self.count += 1;

        emitted
    }

    /// Emit the final open epoch, if any.
    pub fn finish(&mut self) -> Option<SvmEpoch> {
        let emitted = self.close_current();
        self.current_index = None;
        emitted
    }

    fn close_current(&mut self) -> Option<SvmEpoch> {
        let index = self.current_index?;
        if self.count == 0 {
            return None;
        }
        let offset = self.offset.unwrap_or(0.0);
        let expected = self
            .config
            .expected_rate
            .map(|rate| (rate * self.config.epoch_seconds).round() as usize);
        let epoch = SvmEpoch {
            time: epoch_start(index, offset, self.config.epoch_seconds),
            mean_svm: self.sum / self.count as f64,
            sample_count: self.count,
            partial: expected.is_some_and(|expected| self.count < expected),
        };
        self.sum = 0.0;
        self.count = 0;
        Some(epoch)
    }
}

/// Lazy adapter: epoch summaries from a sample iterator.
pub struct SvmIter<I> {
    samples: I,
    aggregator: SvmAggregator,
    done: bool,
}

impl<I: Iterator<Item = Sample>> Iterator for SvmIter<I> {
    type Item = SvmEpoch;

    fn next(&mut self) -> Option<SvmEpoch> {
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

/// Compute SVM epochs over any sample source.
pub fn svm_epochs<I>(samples: I, config: SvmConfig) -> SvmIter<I::IntoIter>
where
    I: IntoIterator<Item = Sample>,
{
    SvmIter {
        samples: samples.into_iter(),
        aggregator: SvmAggregator::new(config),
        done: false,
    }
}

/// Compute SVM epochs with a per-axis pre-filter.
pub fn svm_epochs_filtered<I>(
    samples: I,
    config: SvmConfig,
    filter: Box<dyn TriaxialFilter>,
) -> SvmIter<I::IntoIter>
where
    I: IntoIterator<Item = Sample>,
{
    SvmIter {
        samples: samples.into_iter(),
        aggregator: SvmAggregator::with_filter(config, filter),
        done: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_at(time: f64, accel: [f64; 3]) -> Sample {
        Sample {
            time,
            accel,
            gyro: None,
            temperature: None,
        }
    }

    fn constant_gravity(rate: f64, seconds: f64, start: f64) -> Vec<Sample> {
        let count = (rate * seconds) as usize;
        (0..count)
            .map(|i| sample_at(start + i as f64 / rate, [0.0, 0.0, 1.0]))
            .collect()
    }

    #[test]
    fn constant_gravity_yields_zero_mean() {
        let samples = constant_gravity(100.0, 180.0, 1_600_000_000.0);
        let epochs: Vec<_> = svm_epochs(samples, SvmConfig::default()).collect();
        assert_eq!(epochs.len(), 3);
        for epoch in &epochs {
            assert_eq!(epoch.mean_svm, 0.0);
            assert_eq!(epoch.sample_count, 6000);
        }
    }

    #[test]
    fn alternating_two_g_matches_closed_form() {
        // One axis alternating -2g/+2g: |sqrt(4) - 1| = 1 for every sample.
        let rate = 100.0;
        let samples: Vec<Sample> = (0..12_000)
            .map(|i| {
                let sign = if i % 2 == 0 { 2.0 } else { -2.0 };
                sample_at(1000.0 + i as f64 / rate, [sign, 0.0, 0.0])
            })
            .collect();
        let epochs: Vec<_> = svm_epochs(samples, SvmConfig::default()).collect();
        assert_eq!(epochs.len(), 2);
        for epoch in &epochs {
            assert!((epoch.mean_svm - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn epochs_tile_without_overlap_or_gap() {
        let samples = constant_gravity(50.0, 300.0, 123.456);
        let config = SvmConfig::default();
        let epochs: Vec<_> = svm_epochs(samples, config).collect();
        assert!(epochs.len() >= 4);
        for pair in epochs.windows(2) {
            let end = pair[0].time + config.epoch_seconds;
            assert!((end - pair[1].time).abs() < 1e-9);
        }
        // Stream-start alignment: first epoch begins at the first sample.
        assert!((epochs[0].time - 123.456).abs() < 1e-9);
    }

    #[test]
    fn wall_clock_alignment_snaps_boundaries() {
        let start = 1_600_000_030.0;
        let samples = constant_gravity(50.0, 120.0, start);
        let config = SvmConfig {
            alignment: EpochAlignment::WallClock,
            ..Default::default()
        };
        let epochs: Vec<_> = svm_epochs(samples, config).collect();
        assert_eq!(epochs[0].time, 1_600_000_020.0);
        // The first wall-clock epoch only covers its last 50 seconds.
        assert_eq!(epochs[0].sample_count, 50 * 50);
    }

    #[test]
    fn final_partial_epoch_is_flagged() {
        let rate = 100.0;
        let mut samples = constant_gravity(rate, 60.0, 0.0);
        samples.extend(constant_gravity(rate, 10.0, 60.0));
        let config = SvmConfig {
            expected_rate: Some(rate),
            ..Default::default()
        };
        let epochs: Vec<_> = svm_epochs(samples, config).collect();
        assert_eq!(epochs.len(), 2);
        assert!(!epochs[0].partial);
        assert!(epochs[1].partial);
        assert_eq!(epochs[1].sample_count, 1000);
    }

    #[test]
    fn modes_fold_the_magnitude_differently() {
        // 0.5g magnitude: svm - 1 = -0.5.
        let samples: Vec<Sample> = (0..100)
            .map(|i| sample_at(i as f64 / 100.0, [0.5, 0.0, 0.0]))
            .collect();
        let run = |mode: SvmMode| {
            let config = SvmConfig {
                mode,
                ..Default::default()
            };
            svm_epochs(samples.clone(), config).next().unwrap().mean_svm
        };
        assert!((run(SvmMode::Abs) - 0.5).abs() < 1e-12);
        assert!((run(SvmMode::ClampZero) - 0.0).abs() < 1e-12);
        assert!((run(SvmMode::Signed) + 0.5).abs() < 1e-12);
    }

    #[test]
    fn identity_filter_matches_unfiltered() {
        let samples = constant_gravity(100.0, 90.0, 50.0);
        let plain: Vec<_> = svm_epochs(samples.clone(), SvmConfig::default()).collect();
        let filtered: Vec<_> = svm_epochs_filtered(
            samples,
            SvmConfig::default(),
            Box::new(crate::filter::Identity),
        )
        .collect();
        assert_eq!(plain, filtered);
    }

    #[test]
    fn band_pass_filter_suppresses_static_gravity() {
        use crate::filter::BandPass;
        let rate = 100.0;
        let samples = constant_gravity(rate, 120.0, 0.0);
        let config = SvmConfig::default();
        let epochs: Vec<_> =
            svm_epochs_filtered(samples, config, Box::new(BandPass::activity_band(rate)))
                .collect();
        // With gravity filtered out the magnitude sits near zero, so the
        // folded value approaches |0 - 1| = 1.
        let last = epochs.last().unwrap();
        assert!(last.mean_svm > 0.9, "got {}", last.mean_svm);
    }

    #[test]
    fn empty_stream_emits_nothing() {
        let epochs: Vec<_> = svm_epochs(Vec::new(), SvmConfig::default()).collect();
        assert!(epochs.is_empty());
    }
}
