//! Decoder for block-structured .CWA accelerometer containers.
//!
//! A container is a header region followed by a run of fixed-size 512-byte
//! data blocks, each self-describing and checksum-protected. The reader
//! reconstructs a time-stamped multi-channel sample stream in a single
//! forward pass; faulty blocks are skipped and counted, never fatal.

mod block;
mod reader;
mod synth;
mod timeline;
mod unpack;

pub use block::{
    classify, decode_data_block, decode_header, rate_code_accel_range, rate_code_frequency,
    sector_checksum, BlockFault, CwaHeader, DataBlock, DeviceTime, DeviceType, SectorKind,
    PAYLOAD_SIZE, SECTOR_SIZE,
};
pub use reader::{CwaReader, CwaReaderOptions, SampleBatch, Samples};
pub use synth::ContainerWriter;
pub use timeline::{
    decode_packed_timestamp, encode_epoch_seconds, encode_packed_timestamp, BlockTiming,
    TimestampReconciler, TimingFault,
};
pub use unpack::{
    decode_packed_word, unpack_raw, unpack_scaled, PackingFault, PackingFormat, RawSample,
    ScaleSet,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Fatal decode failures. Everything else is recovered locally and counted
/// in [`Diagnostics`].
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("missing or malformed container header")]
    MissingHeader,
    #[error("container ended before any valid data block")]
    NoValidData,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Counters for faults recovered during a decode. Returned alongside the
/// sample stream so truncation is never silent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostics {
    /// Blocks rejected for checksum/length failures or inconsistent timing.
    pub corrupt_blocks: u64,
    /// Blocks whose payload did not match their declared sample count.
    pub malformed_blocks: u64,
    /// Sectors with an unknown type marker.
    pub unrecognized_blocks: u64,
    /// Sequence-id gaps (dropped blocks upstream of us).
    pub sequence_gaps: u64,
    /// Duplicate or out-of-order sequence ids.
    pub sequence_anomalies: u64,
    /// Blocks whose declared anchor disagreed with the projected time by
    /// more than the tolerance (declared anchor trusted).
    pub timestamp_drifts: u64,
    /// Samples discarded with their rejected blocks.
    pub samples_dropped: u64,
    /// The input ended mid-block.
    pub truncated: bool,
}

impl Diagnostics {
    /// True when the decode recovered from at least one fault.
    pub fn any_faults(&self) -> bool {
        self.corrupt_blocks > 0
            || self.malformed_blocks > 0
            || self.unrecognized_blocks > 0
            || self.sequence_gaps > 0
            || self.sequence_anomalies > 0
            || self.truncated
    }
}
