//! Streaming container reader: drives sector decoding, payload unpacking and
//! timestamp reconciliation over a whole input in one forward pass.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use log::{debug, warn};

use crate::signal::{AuxSnapshot, EventFlags, Sample};

use super::block::{self, CwaHeader, DataBlock, SectorKind, SECTOR_SIZE};
use super::timeline::{self, TimestampReconciler};
use super::unpack::{self, PackingFormat};
use super::{DecodeError, Diagnostics};

/// Reader configuration, validated once at open.
#[derive(Debug, Clone, Copy)]
pub struct CwaReaderOptions {
    /// Emit gyroscope triples when the recording has them.
    pub include_gyro: bool,
    /// Attach the block temperature to each sample.
    pub include_temperature: bool,
    /// Anchor disagreement absorbed before trusting the declared value,
    /// in fractions of one sample period.
    pub timestamp_tolerance: f64,
}

impl Default for CwaReaderOptions {
    fn default() -> Self {
        Self {
            include_gyro: true,
            include_temperature: true,
            timestamp_tolerance: 0.5,
        }
    }
}

/// Per-container format, fixed by the first valid data block. Later blocks
/// that disagree are rejected rather than re-interpreted.
#[derive(Debug, Clone, Copy)]
struct ContainerFormat {
    packing: PackingFormat,
    rate_code: u8,
    num_axes_bps: u8,
    rate: f64,
}

/// One decoded block: its samples plus the side-channel snapshot.
#[derive(Debug, Clone)]
pub struct SampleBatch {
    pub samples: Vec<Sample>,
    pub aux: AuxSnapshot,
}

/// Forward-only reader over a .CWA byte source. Restart by reopening.
pub struct CwaReader<R> {
    source: R,
    header: CwaHeader,
    format: Option<ContainerFormat>,
    reconciler: Option<TimestampReconciler>,
    last_sequence: Option<u32>,
    diagnostics: Diagnostics,
    options: CwaReaderOptions,
    pending: Option<SampleBatch>,
    finished: bool,
}

impl CwaReader<BufReader<File>> {
    /// Open a container file with default options.
    pub fn open(path: &Path) -> Result<Self, DecodeError> {
        Self::open_with(path, CwaReaderOptions::default())
    }

    pub fn open_with(path: &Path, options: CwaReaderOptions) -> Result<Self, DecodeError> {
        let file = File::open(path)?;
        Self::from_reader(BufReader::new(file), options)
    }
}

impl<R: Read> CwaReader<R> {
    /// Read and validate the header region, then position at the first
    /// valid data block. Fails when the header is absent/malformed or the
    /// input ends before any decodable data.
    pub fn from_reader(mut source: R, options: CwaReaderOptions) -> Result<Self, DecodeError> {
        let mut first = vec![0u8; SECTOR_SIZE];
        source
            .read_exact(&mut first)
            .map_err(|_| DecodeError::MissingHeader)?;
        if block::classify(&first) != SectorKind::Header {
            return Err(DecodeError::MissingHeader);
        }
        let packet_length = u16::from_le_bytes([first[2], first[3]]);
        let region = block::header_region_size(packet_length);
        let mut buf = first;
        buf.resize(region.max(SECTOR_SIZE), 0);
        source
            .read_exact(&mut buf[SECTOR_SIZE..])
            .map_err(|_| DecodeError::MissingHeader)?;
        let header = block::decode_header(&buf).ok_or(DecodeError::MissingHeader)?;
        debug!(
            "container header: device {:?} id {} session {} nominal {} Hz",
            header.device_type, header.device_id, header.session_id, header.sample_rate
        );

        let mut reader = Self {
            source,
            header,
            format: None,
            reconciler: None,
            last_sequence: None,
            diagnostics: Diagnostics::default(),
            options,
            pending: None,
            finished: false,
        };
        // Eagerly locate the first decodable block so an input with a valid
        // header but no usable data fails at open, not silently at EOF.
        match reader.decode_next() {
            Some(batch) => reader.pending = Some(batch),
            None => return Err(DecodeError::NoValidData),
        }
        Ok(reader)
    }

    pub fn header(&self) -> &CwaHeader {
        &self.header
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    /// Sample rate of the data stream (from the first data block; falls
    /// back to the header's nominal rate).
    pub fn sample_rate(&self) -> f64 {
        self.format
            .map(|format| format.rate)
            .unwrap_or(self.header.sample_rate)
    }

    /// Pull the next decoded block. Faulty blocks are skipped and counted;
    /// `None` means the input is exhausted.
    pub fn next_batch(&mut self) -> Option<SampleBatch> {
        if let Some(batch) = self.pending.take() {
            return Some(batch);
        }
        self.decode_next()
    }

    /// Consume the reader into a flat, lazy sample iterator.
    pub fn into_samples(self) -> Samples<R> {
        Samples {
            reader: self,
            queue: VecDeque::new(),
        }
    }

    fn decode_next(&mut self) -> Option<SampleBatch> {
        if self.finished {
            return None;
        }
        let mut sector = [0u8; SECTOR_SIZE];
        loop {
            if !self.read_sector(&mut sector) {
                self.finished = true;
                return None;
            }
            match block::classify(&sector) {
                SectorKind::Data => match self.decode_data_sector(&sector) {
                    Some(batch) => return Some(batch),
                    None => continue,
                },
                SectorKind::Header => {
                    // A second header mid-stream is not part of the format.
                    self.diagnostics.unrecognized_blocks += 1;
                }
                SectorKind::Unrecognized => {
                    self.diagnostics.unrecognized_blocks += 1;
                }
            }
        }
    }

    /// Read one full sector; flags truncation on a partial tail.
    fn read_sector(&mut self, sector: &mut [u8; SECTOR_SIZE]) -> bool {
        let mut filled = 0;
        while filled < SECTOR_SIZE {
            match self.source.read(&mut sector[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(ref e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!("read error mid-container: {}", e);
                    break;
                }
            }
        }
        if filled == SECTOR_SIZE {
            return true;
        }
        if filled > 0 {
            self.diagnostics.truncated = true;
        }
        false
    }

    fn decode_data_sector(&mut self, sector: &[u8; SECTOR_SIZE]) -> Option<SampleBatch> {
        let data = match block::decode_data_block(sector) {
            Ok(data) => data,
            Err(fault) => {
                debug!("skipping block: {}", fault);
                self.diagnostics.corrupt_blocks += 1;
                return None;
            }
        };

        let format = match self.format {
            Some(format) => {
                if data.num_axes_bps != format.num_axes_bps || data.rate_code != format.rate_code {
                    warn!(
                        "block {} changes format ({:#04x}/{:#04x}); rejected",
                        data.sequence_id, data.num_axes_bps, data.rate_code
                    );
                    self.diagnostics.corrupt_blocks += 1;
                    self.diagnostics.samples_dropped += data.sample_count as u64;
                    return None;
                }
                format
            }
            None => match self.lock_format(&data) {
                Some(format) => format,
                None => {
                    self.diagnostics.corrupt_blocks += 1;
                    return None;
                }
            },
        };

        self.track_sequence(&data);

        let scaled = match unpack::unpack_scaled(&data, format.packing, self.options.include_gyro)
        {
            Ok(scaled) => scaled,
            Err(fault) => {
                debug!("block {}: {}", data.sequence_id, fault);
                self.diagnostics.malformed_blocks += 1;
                self.diagnostics.samples_dropped += data.sample_count as u64;
                return None;
            }
        };

        let timing = match self.reconcile_timing(&data, format.rate, scaled.len()) {
            Some(timing) => timing,
            None => {
                self.diagnostics.corrupt_blocks += 1;
                self.diagnostics.samples_dropped += data.sample_count as u64;
                return None;
            }
        };
        if timing.drifted {
            self.diagnostics.timestamp_drifts += 1;
        }

        let temperature = self
            .options
            .include_temperature
            .then(|| data.temperature_c());
        let samples = scaled
            .into_iter()
            .enumerate()
            .map(|(i, (accel, gyro))| Sample {
                time: timing.sample_time(i),
                accel,
                gyro,
                temperature,
            })
            .collect();
        let aux = AuxSnapshot {
            time: timing.start,
            light_raw: data.light(),
            temperature_c: data.temperature_c(),
            battery_volts: data.battery_volts(),
            events: EventFlags(data.events),
        };
        Some(SampleBatch { samples, aux })
    }

    fn lock_format(&mut self, data: &DataBlock) -> Option<ContainerFormat> {
        let packing = match PackingFormat::from_num_axes_bps(data.num_axes_bps) {
            Some(packing) => packing,
            None => {
                warn!("unsupported packing byte {:#04x}", data.num_axes_bps);
                return None;
            }
        };
        if data.rate_code & 0x0f == 0 {
            warn!("invalid rate code {:#04x}", data.rate_code);
            return None;
        }
        let rate = data.frequency();
        let format = ContainerFormat {
            packing,
            rate_code: data.rate_code,
            num_axes_bps: data.num_axes_bps,
            rate,
        };
        self.format = Some(format);
        self.reconciler = Some(TimestampReconciler::new(
            rate,
            self.options.timestamp_tolerance,
        ));
        debug!("container format locked: {:?} at {} Hz", packing, rate);
        Some(format)
    }

    fn track_sequence(&mut self, data: &DataBlock) {
        if let Some(prev) = self.last_sequence {
            let expected = prev.wrapping_add(1);
            if data.sequence_id > expected {
                debug!(
                    "sequence gap: {} -> {} ({} blocks dropped upstream)",
                    prev,
                    data.sequence_id,
                    data.sequence_id - expected
                );
                self.diagnostics.sequence_gaps += 1;
                if let Some(reconciler) = self.reconciler.as_mut() {
                    reconciler.reset();
                }
            } else if data.sequence_id != expected {
                warn!(
                    "out-of-order sequence id {} after {}; timestamps decide",
                    data.sequence_id, prev
                );
                self.diagnostics.sequence_anomalies += 1;
            }
        }
        self.last_sequence = Some(data.sequence_id);
    }

    fn reconcile_timing(
        &mut self,
        data: &DataBlock,
        rate: f64,
        sample_count: usize,
    ) -> Option<timeline::BlockTiming> {
        let seconds = timeline::decode_packed_timestamp(data.timestamp_packed)?;
        let declared = timeline::declared_block_start(
            seconds,
            data.fractional_word,
            data.timestamp_offset as i32,
            rate,
        );
        let reconciler = self.reconciler.as_mut()?;
        match reconciler.reconcile(declared, sample_count) {
            Ok(timing) => Some(timing),
            Err(fault) => {
                warn!("block {}: {}", data.sequence_id, fault);
                None
            }
        }
    }
}

/// Lazy flat iterator over every sample in a container.
pub struct Samples<R> {
    reader: CwaReader<R>,
    queue: VecDeque<Sample>,
}

impl<R: Read> Samples<R> {
    pub fn header(&self) -> &CwaHeader {
        self.reader.header()
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        self.reader.diagnostics()
    }

    pub fn sample_rate(&self) -> f64 {
        self.reader.sample_rate()
    }

    pub fn into_inner(self) -> CwaReader<R> {
        self.reader
    }
}

impl<R: Read> Iterator for Samples<R> {
    type Item = Sample;

    fn next(&mut self) -> Option<Sample> {
        loop {
            if let Some(sample) = self.queue.pop_front() {
                return Some(sample);
            }
            let batch = self.reader.next_batch()?;
            self.queue.extend(batch.samples);
        }
    }
}
