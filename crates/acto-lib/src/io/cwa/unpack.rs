//! Payload expansion: packed raw channel readings to physically-scaled
//! per-axis values.
//!
//! Two encodings exist. The packed form stores a whole triaxial sample in
//! one 32-bit word (three 10-bit fields sharing a 2-bit binary exponent);
//! the interleaved form stores one signed 16-bit value per axis per channel.
//! The format is fixed once per container and selected via a tagged variant.

use thiserror::Error;

use super::block::{DataBlock, PAYLOAD_SIZE};

/// Payload encoding, from the block's axes/packing byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackingFormat {
    /// One 32-bit word per sample: `eezzzzzzzzzzyyyyyyyyyyxxxxxxxxxx`.
    Packed32,
    /// Consecutive little-endian i16 per axis; 3, 6 or 9 channels.
    Interleaved16 { channels: u8 },
}

impl PackingFormat {
    pub fn from_num_axes_bps(num_axes_bps: u8) -> Option<Self> {
        let channels = (num_axes_bps >> 4) & 0x0f;
        let bytes_per_axis = num_axes_bps & 0x0f;
        match (bytes_per_axis, channels) {
            (0, 3) => Some(PackingFormat::Packed32),
            (2, 3) | (2, 6) | (2, 9) => Some(PackingFormat::Interleaved16 { channels }),
            _ => None,
        }
    }

    pub fn bytes_per_sample(&self) -> usize {
        match *self {
            PackingFormat::Packed32 => 4,
            PackingFormat::Interleaved16 { channels } => 2 * channels as usize,
        }
    }

    /// Samples a full payload can hold.
    pub fn samples_per_block(&self) -> usize {
        PAYLOAD_SIZE / self.bytes_per_sample()
    }

    pub fn has_gyro(&self) -> bool {
        matches!(*self, PackingFormat::Interleaved16 { channels } if channels >= 6)
    }

    /// Channel index of the accelerometer X axis.
    fn accel_channel(&self) -> usize {
        match *self {
            PackingFormat::Packed32 => 0,
            PackingFormat::Interleaved16 { channels } if channels >= 6 => 3,
            PackingFormat::Interleaved16 { .. } => 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PackingFault {
    #[error("unsupported axes/packing byte {0:#04x}")]
    UnsupportedFormat(u8),
    #[error("declared count {count} exceeds payload capacity {capacity}")]
    CountMismatch { count: u16, capacity: usize },
    #[error("block declares zero samples")]
    Empty,
}

/// Raw integer readings for one sample before physical scaling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawSample {
    pub accel: [i32; 3],
    pub gyro: Option<[i32; 3]>,
}

/// Scale divisors derived from a block's light word.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScaleSet {
    /// Raw units per g.
    pub accel_unit: f64,
    /// Raw units per degree/second, when a gyroscope is present.
    pub gyro_unit: Option<f64>,
}

impl ScaleSet {
    /// Derive scaling from the block's light word. Packed data always uses
    /// 1g = 256; interleaved data carries a scale exponent in the top bits.
    pub fn from_block(block: &DataBlock, format: PackingFormat) -> Self {
        let accel_unit = match format {
            PackingFormat::Packed32 => 256.0,
            PackingFormat::Interleaved16 { .. } => {
                (1u32 << (8 + ((block.light_word >> 13) & 0x07))) as f64
            }
        };
        let gyro_unit = if format.has_gyro() {
            let code = (block.light_word >> 10) & 0x07;
            let range = if code != 0 { 8000u32 >> code } else { 2000 };
            Some(32768.0 / range as f64)
        } else {
            None
        };
        Self {
            accel_unit,
            gyro_unit,
        }
    }
}

/// Expand one 32-bit packed word into a raw triple. Each 10-bit field is
/// sign-extended and left-shifted by the shared 2-bit exponent.
pub fn decode_packed_word(word: u32) -> [i32; 3] {
    let exponent = word >> 30;
    let shift = 6 - exponent;
    let expand = |bits: u32| -> i32 {
        let positioned = (((bits & 0x3ff) as u16) << 6) as i16;
        (positioned as i32) >> shift
    };
    [expand(word), expand(word >> 10), expand(word >> 20)]
}

/// Unpack a block's payload into raw integer readings. The block's samples
/// are dropped (error) when the declared count cannot fit the payload.
pub fn unpack_raw(block: &DataBlock, format: PackingFormat) -> Result<Vec<RawSample>, PackingFault> {
    let count = block.sample_count as usize;
    if count == 0 {
        return Err(PackingFault::Empty);
    }
    let capacity = format.samples_per_block();
    if count > capacity {
        return Err(PackingFault::CountMismatch {
            count: block.sample_count,
            capacity,
        });
    }

    let payload = &block.payload;
    let mut samples = Vec::with_capacity(count);
    match format {
        PackingFormat::Packed32 => {
            for i in 0..count {
                let offset = i * 4;
                let word = u32::from_le_bytes([
                    payload[offset],
                    payload[offset + 1],
                    payload[offset + 2],
                    payload[offset + 3],
                ]);
                samples.push(RawSample {
                    accel: decode_packed_word(word),
                    gyro: None,
                });
            }
        }
        PackingFormat::Interleaved16 { channels } => {
            let accel_channel = format.accel_channel();
            let stride = 2 * channels as usize;
            let read_triple = |base: usize| -> [i32; 3] {
                let mut triple = [0i32; 3];
                for (axis, value) in triple.iter_mut().enumerate() {
                    let offset = base + 2 * axis;
                    *value =
                        i16::from_le_bytes([payload[offset], payload[offset + 1]]) as i32;
                }
                triple
            };
            for i in 0..count {
                let base = i * stride;
                let accel = read_triple(base + 2 * accel_channel);
                let gyro = format.has_gyro().then(|| read_triple(base));
                samples.push(RawSample { accel, gyro });
            }
        }
    }
    Ok(samples)
}

/// Unpack and scale to physical units (g, degrees/second).
pub fn unpack_scaled(
    block: &DataBlock,
    format: PackingFormat,
    include_gyro: bool,
) -> Result<Vec<([f64; 3], Option<[f64; 3]>)>, PackingFault> {
    let scales = ScaleSet::from_block(block, format);
    let raw = unpack_raw(block, format)?;
    Ok(raw
        .into_iter()
        .map(|sample| {
            let accel = sample.accel.map(|v| v as f64 / scales.accel_unit);
            let gyro = match (include_gyro, sample.gyro, scales.gyro_unit) {
                (true, Some(triple), Some(unit)) => Some(triple.map(|v| v as f64 / unit)),
                _ => None,
            };
            (accel, gyro)
        })
        .collect())
}
