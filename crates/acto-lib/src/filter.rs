//! Optional per-axis pre-filtering for the epoch aggregators.
//!
//! Filters are streaming and stateful; the aggregators apply one before the
//! magnitude computation. `Identity` is the default. `BandPass` reproduces
//! the usual 0.5-20 Hz activity band as a cascade of second-order Butterworth
//! high-pass and low-pass sections per axis.

use std::f64::consts::{FRAC_1_SQRT_2, PI};

pub trait TriaxialFilter {
    /// Filter one triaxial sample, returning the filtered axes.
    fn process(&mut self, axes: [f64; 3]) -> [f64; 3];
    /// Clear internal state (e.g. before reuse on a new recording).
    fn reset(&mut self);
}

/// Pass-through filter.
#[derive(Debug, Clone, Copy, Default)]
pub struct Identity;

impl TriaxialFilter for Identity {
    fn process(&mut self, axes: [f64; 3]) -> [f64; 3] {
        axes
    }

    fn reset(&mut self) {}
}

/// One second-order IIR section, transposed direct form II.
#[derive(Debug, Clone, Copy)]
struct Biquad {
    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,
    z1: f64,
    z2: f64,
}

impl Biquad {
    fn from_coefficients(b0: f64, b1: f64, b2: f64, a0: f64, a1: f64, a2: f64) -> Self {
        Self {
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b2 / a0,
            a1: a1 / a0,
            a2: a2 / a0,
            z1: 0.0,
            z2: 0.0,
        }
    }

    /// Butterworth low-pass (Q = 1/sqrt(2)).
    fn low_pass(sample_rate: f64, cutoff: f64) -> Self {
        let w0 = 2.0 * PI * cutoff / sample_rate;
        let alpha = w0.sin() / (2.0 * FRAC_1_SQRT_2);
        let cos_w0 = w0.cos();
        Self::from_coefficients(
            (1.0 - cos_w0) / 2.0,
            1.0 - cos_w0,
            (1.0 - cos_w0) / 2.0,
            1.0 + alpha,
            -2.0 * cos_w0,
            1.0 - alpha,
        )
    }

    /// Butterworth high-pass (Q = 1/sqrt(2)).
    fn high_pass(sample_rate: f64, cutoff: f64) -> Self {
        let w0 = 2.0 * PI * cutoff / sample_rate;
        let alpha = w0.sin() / (2.0 * FRAC_1_SQRT_2);
        let cos_w0 = w0.cos();
        Self::from_coefficients(
            (1.0 + cos_w0) / 2.0,
            -(1.0 + cos_w0),
            (1.0 + cos_w0) / 2.0,
            1.0 + alpha,
            -2.0 * cos_w0,
            1.0 - alpha,
        )
    }

    fn step(&mut self, x: f64) -> f64 {
        let y = self.b0 * x + self.z1;
        self.z1 = self.b1 * x - self.a1 * y + self.z2;
        self.z2 = self.b2 * x - self.a2 * y;
        y
    }

    fn reset(&mut self) {
        self.z1 = 0.0;
        self.z2 = 0.0;
    }
}

/// Band-pass realized as a high-pass/low-pass Butterworth cascade per axis.
#[derive(Debug, Clone)]
pub struct BandPass {
    sections: [[Biquad; 2]; 3],
}

impl BandPass {
    /// Default activity band used by SVM filtering.
    pub const DEFAULT_LOW_HZ: f64 = 0.5;
    pub const DEFAULT_HIGH_HZ: f64 = 20.0;

    pub fn new(sample_rate: f64, low_cutoff: f64, high_cutoff: f64) -> Self {
        let hp = Biquad::high_pass(sample_rate, low_cutoff);
        let lp = Biquad::low_pass(sample_rate, high_cutoff.min(sample_rate * 0.45));
        Self {
            sections: [[hp, lp]; 3],
        }
    }

    pub fn activity_band(sample_rate: f64) -> Self {
        Self::new(sample_rate, Self::DEFAULT_LOW_HZ, Self::DEFAULT_HIGH_HZ)
    }
}

impl TriaxialFilter for BandPass {
    fn process(&mut self, axes: [f64; 3]) -> [f64; 3] {
        let mut out = [0.0; 3];
        for (axis, chain) in self.sections.iter_mut().enumerate() {
            let mut value = axes[axis];
            for section in chain.iter_mut() {
                value = section.step(value);
            }
            out[axis] = value;
        }
        out
    }

    fn reset(&mut self) {
        for chain in self.sections.iter_mut() {
            for section in chain.iter_mut() {
                section.reset();
            }
        }
    }
}
