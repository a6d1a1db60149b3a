//! Sector-level decoding: classify a 512-byte window and extract the typed
//! header or data-block record, validating structure and checksum.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::timeline;

pub const SECTOR_SIZE: usize = 512;

/// Data-block payload capacity in bytes.
pub const PAYLOAD_SIZE: usize = 480;

const HEADER_MAGIC: [u8; 2] = *b"MD";
const DATA_MAGIC: [u8; 2] = *b"AX";
const DATA_PACKET_LENGTH: u16 = 508;

/// Why a candidate data block was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BlockFault {
    #[error("sector does not carry a data-block marker")]
    NotDataBlock,
    #[error("declared packet length {0} is not a data block's")]
    BadLength(u16),
    #[error("checksum mismatch (residual {0:#06x})")]
    Checksum(u16),
    #[error("sector shorter than {SECTOR_SIZE} bytes")]
    Short,
}

/// Coarse sector classification by type marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectorKind {
    Header,
    Data,
    Unrecognized,
}

pub fn classify(sector: &[u8]) -> SectorKind {
    if sector.len() < 2 {
        return SectorKind::Unrecognized;
    }
    match [sector[0], sector[1]] {
        HEADER_MAGIC => SectorKind::Header,
        DATA_MAGIC => SectorKind::Data,
        _ => SectorKind::Unrecognized,
    }
}

/// 16-bit word-wise sum of the sector; a valid data block sums to zero.
pub fn sector_checksum(sector: &[u8]) -> u16 {
    let mut sum = 0u16;
    for pair in sector.chunks_exact(2) {
        sum = sum.wrapping_add(u16::from_le_bytes([pair[0], pair[1]]));
    }
    sum
}

fn u16_at(buf: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([buf[offset], buf[offset + 1]])
}

fn i16_at(buf: &[u8], offset: usize) -> i16 {
    i16::from_le_bytes([buf[offset], buf[offset + 1]])
}

fn u32_at(buf: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]])
}

/// Recording device family, from the header's hardware-type byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceType {
    Ax3,
    Ax6,
    Other(u8),
}

/// A device timestamp that may be one of the "always" sentinels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum DeviceTime {
    /// 0x00000000: infinitely in the past.
    AlwaysBefore,
    /// 0xffffffff: infinitely in the future.
    AlwaysAfter,
    /// Seconds since the UNIX epoch.
    At(i64),
    /// The packed field did not encode a real calendar date.
    Invalid,
}

impl DeviceTime {
    fn from_packed(value: u32) -> Self {
        match value {
            0x0000_0000 => DeviceTime::AlwaysBefore,
            0xffff_ffff => DeviceTime::AlwaysAfter,
            _ => match timeline::decode_packed_timestamp(value) {
                Some(seconds) => DeviceTime::At(seconds),
                None => DeviceTime::Invalid,
            },
        }
    }
}

/// Immutable per-recording metadata from the container's single header block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CwaHeader {
    pub device_type: DeviceType,
    pub device_id: u32,
    pub session_id: u32,
    pub logging_start: DeviceTime,
    pub logging_end: DeviceTime,
    pub logging_capacity: u32,
    pub flash_led: u8,
    /// Configured gyroscope range in degrees/second; 0 when accel-only.
    pub gyro_range: u16,
    /// Nominal sample rate in Hz from the rate code.
    pub sample_rate: f64,
    /// Accelerometer range in +/- g.
    pub accel_range: u8,
    pub rate_code: u8,
    pub firmware_revision: u8,
    pub last_change: DeviceTime,
    /// Parsed annotation area: name -> optional value.
    pub metadata: BTreeMap<String, Option<String>>,
    /// Total bytes occupied by the header region (start of first data block).
    pub data_offset: usize,
}

/// Frequency in Hz encoded by a rate code.
pub fn rate_code_frequency(rate_code: u8) -> f64 {
    3200.0 / (1u32 << (15 - (rate_code & 0x0f) as u32)) as f64
}

/// Accelerometer range in +/- g encoded by a rate code.
pub fn rate_code_accel_range(rate_code: u8) -> u8 {
    16 >> (rate_code >> 6)
}

/// Parse the header region. `buf` must hold at least the first sector; the
/// caller supplies the full region once the declared length is known.
pub fn decode_header(buf: &[u8]) -> Option<CwaHeader> {
    if buf.len() < SECTOR_SIZE || buf[0..2] != HEADER_MAGIC {
        return None;
    }
    let packet_length = u16_at(buf, 2);
    if packet_length < 508 {
        return None;
    }
    let data_offset = header_region_size(packet_length);

    let hardware_type = buf[4];
    let device_type = match hardware_type {
        0x00 | 0xff | 0x17 => DeviceType::Ax3,
        0x64 => DeviceType::Ax6,
        other => DeviceType::Other(other),
    };
    let mut device_id = u16_at(buf, 5) as u32;
    let device_id_upper = u16_at(buf, 11);
    if device_id_upper != 0xffff {
        device_id |= (device_id_upper as u32) << 16;
    }
    let sensor_config = buf[35];
    let gyro_range = if sensor_config != 0x00 && sensor_config != 0xff {
        8000u16 >> (sensor_config & 0x0f)
    } else {
        0
    };
    let rate_code = buf[36];

    Some(CwaHeader {
        device_type,
        device_id,
        session_id: u32_at(buf, 7),
        logging_start: DeviceTime::from_packed(u32_at(buf, 13)),
        logging_end: DeviceTime::from_packed(u32_at(buf, 17)),
        logging_capacity: u32_at(buf, 21),
        flash_led: if buf[26] == 0xff { 0 } else { buf[26] },
        gyro_range,
        sample_rate: rate_code_frequency(rate_code),
        accel_range: rate_code_accel_range(rate_code),
        rate_code,
        firmware_revision: buf[41],
        last_change: DeviceTime::from_packed(u32_at(buf, 37)),
        metadata: parse_annotation(&buf[64..512]),
        data_offset,
    })
}

/// Bytes occupied by the header region given the declared packet length.
pub fn header_region_size(packet_length: u16) -> usize {
    (packet_length as usize).div_ceil(SECTOR_SIZE) * SECTOR_SIZE
}

/// One decoded data block: raw fields plus the untouched packed payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataBlock {
    pub session_id: u32,
    pub sequence_id: u32,
    /// Packed RTC timestamp, decoded by the reconciler.
    pub timestamp_packed: u32,
    /// Fractional-second/device-id word; top bit selects the meaning.
    pub fractional_word: u16,
    /// Raw light word: low 10 bits light ADC, upper bits carry scale codes.
    pub light_word: u16,
    pub temperature_raw: u16,
    pub events: u8,
    pub battery_raw: u8,
    pub rate_code: u8,
    /// Top nibble channel count, bottom nibble bytes per axis (0 = packed).
    pub num_axes_bps: u8,
    /// Sample index within the block where the RTC timestamp applies.
    pub timestamp_offset: i16,
    pub sample_count: u16,
    pub payload: [u8; PAYLOAD_SIZE],
}

impl DataBlock {
    pub fn frequency(&self) -> f64 {
        rate_code_frequency(self.rate_code)
    }

    pub fn channels(&self) -> u8 {
        (self.num_axes_bps >> 4) & 0x0f
    }

    pub fn bytes_per_axis(&self) -> u8 {
        self.num_axes_bps & 0x0f
    }

    /// Light ADC value (low 10 bits of the light word).
    pub fn light(&self) -> u16 {
        self.light_word & 0x3ff
    }

    pub fn temperature_c(&self) -> f64 {
        self.temperature_raw as f64 * 75.0 / 256.0 - 50.0
    }

    pub fn battery_volts(&self) -> f64 {
        (self.battery_raw as f64 + 512.0) * 6000.0 / 1024.0 / 1000.0
    }
}

/// Decode one candidate data block, validating marker, length and checksum.
pub fn decode_data_block(sector: &[u8]) -> Result<DataBlock, BlockFault> {
    if sector.len() < SECTOR_SIZE {
        return Err(BlockFault::Short);
    }
    if sector[0..2] != DATA_MAGIC {
        return Err(BlockFault::NotDataBlock);
    }
    let packet_length = u16_at(sector, 2);
    if packet_length != DATA_PACKET_LENGTH {
        return Err(BlockFault::BadLength(packet_length));
    }
    let residual = sector_checksum(&sector[..SECTOR_SIZE]);
    if residual != 0 {
        return Err(BlockFault::Checksum(residual));
    }

    let mut payload = [0u8; PAYLOAD_SIZE];
    payload.copy_from_slice(&sector[30..30 + PAYLOAD_SIZE]);

    Ok(DataBlock {
        fractional_word: u16_at(sector, 4),
        session_id: u32_at(sector, 6),
        sequence_id: u32_at(sector, 10),
        timestamp_packed: u32_at(sector, 14),
        light_word: u16_at(sector, 18),
        temperature_raw: u16_at(sector, 20),
        events: sector[22],
        battery_raw: sector[23],
        rate_code: sector[24],
        num_axes_bps: sector[25],
        timestamp_offset: i16_at(sector, 26),
        sample_count: u16_at(sector, 28),
        payload,
    })
}

/// Shorthand metadata names expanded on parse.
const SHORTHAND: &[(&str, &str)] = &[
    ("_c", "Study Centre"),
    ("_s", "Study Code"),
    ("_i", "Investigator"),
    ("_x", "Exercise Code"),
    ("_v", "Volunteer Num"),
    ("_p", "Body Location"),
    ("_so", "Setup Operator"),
    ("_n", "Notes"),
    ("_b", "Start time"),
    ("_e", "End time"),
    ("_ro", "Recovery Operator"),
    ("_r", "Retrieval Time"),
    ("_co", "Comments"),
    ("_sc", "Subject Code"),
    ("_se", "Sex"),
    ("_h", "Height"),
    ("_w", "Weight"),
    ("_ha", "Handedness"),
];

/// Parse the URL-encoded annotation area into name/value pairs.
fn parse_annotation(area: &[u8]) -> BTreeMap<String, Option<String>> {
    let trimmed_len = area
        .iter()
        .rposition(|&b| b != 0x20 && b != 0x00 && b != 0xff)
        .map_or(0, |pos| pos + 1);
    let text: String = area[..trimmed_len].iter().map(|&b| b as char).collect();

    let mut metadata = BTreeMap::new();
    for pair in text.split('&') {
        let mut parts = pair.splitn(2, '=');
        let name = url_decode(parts.next().unwrap_or(""));
        if name.is_empty() {
            continue;
        }
        let value = parts.next().map(url_decode);
        let name = SHORTHAND
            .iter()
            .find(|(short, _)| *short == name)
            .map_or(name, |(_, long)| (*long).to_string());
        metadata.insert(name, value);
    }
    metadata
}

/// Percent-decoding with '+' treated as space (form encoding).
fn url_decode(input: &str) -> String {
    let mut out = Vec::new();
    let mut nibbles = 0u8;
    let mut value = 0u8;
    for ch in input.chars() {
        if ch == '%' {
            nibbles = 2;
            value = 0;
        } else if nibbles > 0 {
            value = value.wrapping_mul(16);
            match ch {
                'a'..='f' => value += ch as u8 - b'a' + 10,
                'A'..='F' => value += ch as u8 - b'A' + 10,
                '0'..='9' => value += ch as u8 - b'0',
                _ => {}
            }
            nibbles -= 1;
            if nibbles == 0 {
                out.push(value);
            }
        } else if ch == '+' {
            out.push(b' ');
        } else {
            let mut buf = [0u8; 4];
            out.extend_from_slice(ch.encode_utf8(&mut buf).as_bytes());
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}
