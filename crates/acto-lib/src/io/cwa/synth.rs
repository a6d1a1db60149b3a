//! In-memory container synthesis, the inverse of the reader. Used to build
//! recordings with known content for tests and tooling.

use super::block::{rate_code_frequency, PAYLOAD_SIZE, SECTOR_SIZE};
use super::timeline;
use super::unpack::PackingFormat;

/// Builds a byte-exact container: one header region followed by sealed data
/// blocks with auto-incrementing sequence ids.
#[derive(Debug, Clone)]
pub struct ContainerWriter {
    pub session_id: u32,
    pub device_id: u16,
    /// Raw light word; upper bits carry the accel/gyro scale codes.
    pub light_word: u16,
    pub temperature_raw: u16,
    pub battery_raw: u8,
    pub events: u8,
    rate_code: u8,
    packing: PackingFormat,
    next_sequence: u32,
    buf: Vec<u8>,
}

impl ContainerWriter {
    pub fn new(session_id: u32, rate_code: u8, packing: PackingFormat) -> Self {
        let mut writer = Self {
            session_id,
            device_id: 1,
            light_word: 0,
            temperature_raw: 256, // 25 C
            battery_raw: 160,
            events: 0,
            rate_code,
            packing,
            next_sequence: 0,
            buf: Vec::new(),
        };
        writer.write_header();
        writer
    }

    fn num_axes_bps(&self) -> u8 {
        match self.packing {
            PackingFormat::Packed32 => 0x30,
            PackingFormat::Interleaved16 { channels } => (channels << 4) | 0x02,
        }
    }

    fn rate(&self) -> f64 {
        rate_code_frequency(self.rate_code)
    }

    fn write_header(&mut self) {
        let mut header = vec![0u8; 1024];
        header[0..2].copy_from_slice(b"MD");
        header[2..4].copy_from_slice(&1020u16.to_le_bytes());
        header[4] = if self.packing.has_gyro() { 0x64 } else { 0x17 };
        header[5..7].copy_from_slice(&self.device_id.to_le_bytes());
        header[7..11].copy_from_slice(&self.session_id.to_le_bytes());
        header[11..13].copy_from_slice(&0xffffu16.to_le_bytes());
        header[35] = if self.packing.has_gyro() { 0x02 } else { 0x00 };
        header[36] = self.rate_code;
        for byte in header[64..512].iter_mut() {
            *byte = 0xff;
        }
        self.buf.extend_from_slice(&header);
    }

    /// Simulate dropped blocks: the next block's sequence id jumps ahead.
    pub fn skip_sequence(&mut self, dropped: u32) {
        self.next_sequence += dropped;
    }

    /// Append one accel-only data block whose first sample is at
    /// `start_time` (seconds since the UNIX epoch).
    pub fn push_block(&mut self, start_time: f64, accel: &[[f64; 3]]) {
        self.push_block_with_gyro(start_time, accel, &[]);
    }

    /// Append one data block; `gyro` must be empty or the same length as
    /// `accel` and is only encoded for six-channel containers.
    pub fn push_block_with_gyro(&mut self, start_time: f64, accel: &[[f64; 3]], gyro: &[[f64; 3]]) {
        assert!(
            accel.len() <= self.packing.samples_per_block(),
            "{} samples exceed block capacity {}",
            accel.len(),
            self.packing.samples_per_block()
        );
        assert!(gyro.is_empty() || gyro.len() == accel.len());

        let mut sector = [0u8; SECTOR_SIZE];
        sector[0..2].copy_from_slice(b"AX");
        sector[2..4].copy_from_slice(&508u16.to_le_bytes());

        let (whole, fractional_word, timestamp_offset) = self.encode_anchor(start_time);
        sector[4..6].copy_from_slice(&fractional_word.to_le_bytes());
        sector[6..10].copy_from_slice(&self.session_id.to_le_bytes());
        sector[10..14].copy_from_slice(&self.next_sequence.to_le_bytes());
        sector[14..18].copy_from_slice(&timeline::encode_epoch_seconds(whole).to_le_bytes());
        sector[18..20].copy_from_slice(&self.light_word.to_le_bytes());
        sector[20..22].copy_from_slice(&self.temperature_raw.to_le_bytes());
        sector[22] = self.events;
        sector[23] = self.battery_raw;
        sector[24] = self.rate_code;
        sector[25] = self.num_axes_bps();
        sector[26..28].copy_from_slice(&timestamp_offset.to_le_bytes());
        sector[28..30].copy_from_slice(&(accel.len() as u16).to_le_bytes());

        let payload = self.encode_payload(accel, gyro);
        sector[30..30 + PAYLOAD_SIZE].copy_from_slice(&payload);

        let residual = super::block::sector_checksum(&sector);
        let fix = 0u16.wrapping_sub(residual);
        sector[510..512].copy_from_slice(&fix.to_le_bytes());

        self.next_sequence += 1;
        self.buf.extend_from_slice(&sector);
    }

    /// Split the block start into whole seconds, fractional word and the
    /// compensating offset the reader will undo.
    fn encode_anchor(&self, start_time: f64) -> (i64, u16, i16) {
        let whole = start_time.floor() as i64;
        let frac = start_time - whole as f64;
        if frac == 0.0 {
            // Device-id form of the word: no fractional time.
            return (whole, self.device_id & 0x7fff, 0);
        }
        let ticks = (((frac * 65536.0).round() as u32) & !1).min(65_534);
        let shim = ((ticks as u64 * self.rate() as u64) >> 16) as i16;
        let fractional_word = 0x8000 | (ticks >> 1) as u16;
        (whole, fractional_word, -shim)
    }

    fn encode_payload(&self, accel: &[[f64; 3]], gyro: &[[f64; 3]]) -> [u8; PAYLOAD_SIZE] {
        let mut payload = [0u8; PAYLOAD_SIZE];
        match self.packing {
            PackingFormat::Packed32 => {
                for (i, triple) in accel.iter().enumerate() {
                    let raw = triple.map(|g| (g * 256.0).round() as i32);
                    let word = pack_word(raw);
                    payload[i * 4..i * 4 + 4].copy_from_slice(&word.to_le_bytes());
                }
            }
            PackingFormat::Interleaved16 { channels } => {
                let accel_unit = (1u32 << (8 + ((self.light_word >> 13) & 0x07))) as f64;
                let gyro_code = (self.light_word >> 10) & 0x07;
                let gyro_range = if gyro_code != 0 { 8000u32 >> gyro_code } else { 2000 };
                let gyro_unit = 32768.0 / gyro_range as f64;
                let stride = 2 * channels as usize;
                for i in 0..accel.len() {
                    let base = i * stride;
                    let accel_base = if channels >= 6 { base + 6 } else { base };
                    for axis in 0..3 {
                        let raw = (accel[i][axis] * accel_unit).round() as i16;
                        payload[accel_base + 2 * axis..accel_base + 2 * axis + 2]
                            .copy_from_slice(&raw.to_le_bytes());
                    }
                    if channels >= 6 {
                        let triple = gyro.get(i).copied().unwrap_or([0.0; 3]);
                        for axis in 0..3 {
                            let raw = (triple[axis] * gyro_unit).round() as i16;
                            payload[base + 2 * axis..base + 2 * axis + 2]
                                .copy_from_slice(&raw.to_le_bytes());
                        }
                    }
                }
            }
        }
        payload
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }
}

/// Pack a raw triple into the 32-bit word form, choosing the smallest
/// exponent that fits all three fields.
fn pack_word(raw: [i32; 3]) -> u32 {
    let mut exponent = 0u32;
    while exponent < 3 && raw.iter().any(|&v| !(-512..=511).contains(&(v >> exponent))) {
        exponent += 1;
    }
    let field = |v: i32| ((v >> exponent) as u32) & 0x3ff;
    field(raw[0]) | (field(raw[1]) << 10) | (field(raw[2]) << 20) | (exponent << 30)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::cwa::unpack::decode_packed_word;

    #[test]
    fn pack_word_round_trips_small_values() {
        let raw = [100, -100, 256];
        let decoded = decode_packed_word(pack_word(raw));
        assert_eq!(decoded, raw);
    }

    #[test]
    fn pack_word_quantizes_large_values() {
        let raw = [2000, -2000, 0];
        let decoded = decode_packed_word(pack_word(raw));
        // Exponent 2: values quantized to multiples of 4.
        assert_eq!(decoded, [2000, -2000, 0]);
    }

    #[test]
    fn container_starts_with_header_region() {
        let writer = ContainerWriter::new(1, 0x4a, PackingFormat::Packed32);
        let bytes = writer.as_bytes();
        assert_eq!(bytes.len(), 1024);
        assert_eq!(&bytes[0..2], b"MD");
    }

    #[test]
    fn blocks_are_sealed() {
        let mut writer = ContainerWriter::new(1, 0x4a, PackingFormat::Packed32);
        writer.push_block(1_600_000_000.0, &[[0.0, 0.0, 1.0]; 80]);
        let bytes = writer.into_bytes();
        assert_eq!(bytes.len(), 1024 + 512);
        assert_eq!(super::super::block::sector_checksum(&bytes[1024..1536]), 0);
    }
}
