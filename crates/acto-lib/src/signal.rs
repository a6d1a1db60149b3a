use serde::{Deserialize, Serialize};

/// One decoded, physically-scaled sensor reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Seconds since the UNIX epoch (UTC), fractional.
    pub time: f64,
    /// Acceleration per axis in g.
    pub accel: [f64; 3],
    /// Angular rate per axis in degrees/second, when the recording has a gyroscope.
    pub gyro: Option<[f64; 3]>,
    /// Device temperature in degrees Celsius, block-granular.
    pub temperature: Option<f64>,
}

/// Event flags reported alongside a data block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventFlags(pub u8);

impl EventFlags {
    pub const RESUME_LOGGING: u8 = 0x01;
    pub const SINGLE_TAP: u8 = 0x02;
    pub const DOUBLE_TAP: u8 = 0x04;

    pub fn is_resume_logging(&self) -> bool {
        self.0 & Self::RESUME_LOGGING != 0
    }
}

/// Per-block side-channel snapshot (light, temperature, battery, events).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AuxSnapshot {
    /// Time of the block's first sample, seconds since the UNIX epoch.
    pub time: f64,
    /// Raw light sensor reading (10-bit ADC units).
    pub light_raw: u16,
    /// Temperature in degrees Celsius.
    pub temperature_c: f64,
    /// Battery level in volts.
    pub battery_volts: f64,
    pub events: EventFlags,
}

impl AuxSnapshot {
    /// Estimated illuminance in lux from the raw light reading.
    pub fn light_lux(&self) -> f64 {
        let log10_lux_times_10_power_3 = (self.light_raw as f64 + 512.0) * 6000.0 / 1024.0;
        10f64.powf(log10_lux_times_10_power_3 / 1000.0)
    }
}

/// Streaming min/max/mean/variance accumulator (Welford's update).
#[derive(Debug, Clone, Copy, Default)]
pub struct RunningStats {
    n: usize,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
}

impl RunningStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn add(&mut self, x: f64) {
        self.n += 1;
        if self.n == 1 {
            self.mean = x;
            self.m2 = 0.0;
            self.min = x;
            self.max = x;
        } else {
            let delta = x - self.mean;
            self.mean += delta / self.n as f64;
            self.m2 += delta * (x - self.mean);
            if x < self.min {
                self.min = x;
            }
            if x > self.max {
                self.max = x;
            }
        }
    }

    pub fn count(&self) -> usize {
        self.n
    }

    pub fn mean(&self) -> f64 {
        if self.n > 0 {
            self.mean
        } else {
            0.0
        }
    }

    /// Sample variance (n - 1 denominator).
    pub fn variance(&self) -> f64 {
        if self.n > 1 {
            self.m2 / (self.n as f64 - 1.0)
        } else {
            0.0
        }
    }

    pub fn stddev(&self) -> f64 {
        self.variance().sqrt()
    }

    pub fn range(&self) -> f64 {
        if self.n > 0 {
            self.max - self.min
        } else {
            0.0
        }
    }
}
