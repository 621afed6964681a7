//! Frame synchronization, de-escaping, checksum verification, and metadata
//! extraction.
//!
//! # Wire format
//!
//! The payload downlinks fixed 512-byte frames delimited by `0x7E` on both
//! ends, each preceded by a 26-byte bus header carrying the payload-clock
//! timestamp. Inside a frame all reserved bytes are escaped (see
//! [`escape`]), so a delimiter is a valid frame start exactly when the next
//! delimiter sits 511 bytes later.
//!
//! Layout of the de-escaped frame: sync byte, 32-bit big-endian start
//! index, ASCII channel tag, experiment number, then up to 504 payload
//! bytes. The byte count and checksum sit at a fixed distance from the end
//! of the frame; because de-escaping may have consumed bytes, two pad bytes
//! (zero unless the neighbouring field was escape-expanded) tell the
//! decoder how far each field shifted.

pub mod escape;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::timebase;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Transmitted frame size, delimiters included.
pub const FRAME_SIZE: usize = 512;

/// Maximum payload bytes carried by one frame.
pub const DATA_SEGMENT_LENGTH: usize = FRAME_SIZE - 8;

mod offsets {
    /// 32-bit big-endian start index into the channel byte stream.
    pub const START_INDEX: usize = 1;
    /// ASCII channel tag.
    pub const CHANNEL_TAG: usize = 5;
    /// Experiment number.
    pub const EXPERIMENT: usize = 6;
    /// First payload byte.
    pub const PAYLOAD: usize = 7;
    /// Pad probed to detect an escape-expanded checksum field.
    pub const CHECKSUM_PAD: usize = super::FRAME_SIZE - 2;
    /// Pad probed to detect an escape-expanded byte-count field.
    pub const BYTECOUNT_PAD: usize = super::FRAME_SIZE - 4;
    /// Escaped-window byte range summed by the checksum.
    pub const CHECKSUM_RANGE: core::ops::Range<usize> = 2..super::FRAME_SIZE - 3;
}

mod bus_header {
    pub const LEN: usize = 26;
    pub const MESSAGE_LENGTH: usize = 0;
    pub const COMPONENT_ID: usize = 5;
    pub const INTERFACE_ID: usize = 6;
    pub const MESSAGE_ID: usize = 7;
    pub const EPOCH_SECONDS: usize = 8;
    pub const NANOSECONDS: usize = 12;
    pub const REBOOT_COUNT: usize = 16;
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Logical data channel, discriminated by the frame's ASCII tag byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Channel {
    /// `'S'`: survey spectra.
    Survey,
    /// `'E'`: electric-field burst samples.
    EBurst,
    /// `'B'`: magnetic-field burst samples.
    BBurst,
    /// `'G'`: GPS receiver log stream captured during a burst.
    GpsBurst,
    /// `'I'`: system status telemetry.
    Status,
    /// `'L'`: low-rate housekeeping stream.
    LowRate,
}

impl Channel {
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            b'S' => Some(Channel::Survey),
            b'E' => Some(Channel::EBurst),
            b'B' => Some(Channel::BBurst),
            b'G' => Some(Channel::GpsBurst),
            b'I' => Some(Channel::Status),
            b'L' => Some(Channel::LowRate),
            _ => None,
        }
    }

    pub fn tag(&self) -> u8 {
        match self {
            Channel::Survey => b'S',
            Channel::EBurst => b'E',
            Channel::BBurst => b'B',
            Channel::GpsBurst => b'G',
            Channel::Status => b'I',
            Channel::LowRate => b'L',
        }
    }

    /// True for the three channels reassembled by the burst engine.
    pub fn is_burst(&self) -> bool {
        matches!(self, Channel::EBurst | Channel::BBurst | Channel::GpsBurst)
    }
}

/// Bus header preceding each frame in the raw stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusHeader {
    pub message_length: u32,
    pub component_id: u8,
    pub interface_id: u8,
    pub message_id: u8,
    /// Payload-clock seconds since the GPS epoch.
    pub epoch_seconds: u32,
    pub nanoseconds: u32,
    pub reboot_count: u16,
}

/// One de-escaped, checksum-verified unit of telemetry.
///
/// Immutable once produced by the scanner; assemblers consume frames
/// without mutating them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub channel: Channel,
    pub experiment_number: u8,
    /// Offset of this payload in the channel's logical byte stream.
    pub start_index: u32,
    pub payload: Vec<u8>,
    /// Arrival time from the bus header, leap-second corrected.
    pub received_timestamp: DateTime<Utc>,
    pub checksum_ok: bool,
    pub header: BusHeader,
    /// Frame length after de-escaping.
    pub frame_length: usize,
}

impl Frame {
    /// One past the last logical-stream byte this frame fills.
    pub fn end_index(&self) -> usize {
        self.start_index as usize + self.payload.len()
    }
}

/// Per-frame decode failure. Never fatal to a scan: the frame is skipped
/// and counted.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("window at offset {offset} runs past the end of the capture")]
    TruncatedWindow { offset: usize },

    #[error("no bus header precedes the frame at offset {offset}")]
    MissingBusHeader { offset: usize },

    #[error(transparent)]
    Escape(#[from] escape::EscapeError),

    #[error("unknown channel tag 0x{tag:02X}")]
    UnknownChannelTag { tag: u8 },

    #[error("field bytes {start}..{end} out of bounds for de-escaped frame of {len} bytes")]
    FieldOutOfBounds {
        start: usize,
        end: usize,
        len: usize,
    },

    #[error("byte count {bytecount} exceeds the {DATA_SEGMENT_LENGTH}-byte data segment")]
    OversizedPayload { bytecount: u16 },
}

/// Aggregated results of one scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScanCounts {
    /// Delimiter pairs with valid spacing.
    pub windows: usize,
    /// Frames decoded (valid and invalid checksums alike).
    pub decoded: usize,
    /// Windows skipped for sync/escape/field errors.
    pub sync_errors: usize,
    /// Decoded frames whose checksum did not verify.
    pub checksum_failures: usize,
}

#[derive(Debug, Default)]
pub struct ScanResult {
    pub frames: Vec<Frame>,
    pub counts: ScanCounts,
}

// ---------------------------------------------------------------------------
// Scanning
// ---------------------------------------------------------------------------

/// Scan a raw capture buffer for frames.
///
/// Every delimiter byte is considered; a window is accepted only when the
/// following delimiter sits exactly `FRAME_SIZE - 1` bytes later, which
/// rejects delimiter values occurring inside escaped payload data. Frames
/// that fail to decode are skipped and counted; the scan itself never
/// fails.
pub fn scan_frames(raw: &[u8]) -> ScanResult {
    let sync_positions: Vec<usize> = raw
        .iter()
        .enumerate()
        .filter(|(_, &b)| b == escape::SYNC)
        .map(|(i, _)| i)
        .collect();

    let mut result = ScanResult::default();
    for pair in sync_positions.windows(2) {
        if pair[1] - pair[0] != FRAME_SIZE - 1 {
            continue;
        }
        result.counts.windows += 1;
        match decode_window(raw, pair[0]) {
            Ok(frame) => {
                if !frame.checksum_ok {
                    result.counts.checksum_failures += 1;
                    warn!(offset = pair[0], "checksum mismatch, frame excluded from assembly");
                }
                result.counts.decoded += 1;
                result.frames.push(frame);
            }
            Err(err) => {
                result.counts.sync_errors += 1;
                warn!(offset = pair[0], %err, "skipping frame");
            }
        }
    }

    info!(
        windows = result.counts.windows,
        decoded = result.counts.decoded,
        sync_errors = result.counts.sync_errors,
        checksum_failures = result.counts.checksum_failures,
        "frame scan complete"
    );
    result
}

/// Mod-256 checksum over the escaped window bytes `[2, 509)`.
pub fn checksum(window: &[u8]) -> u8 {
    let end = offsets::CHECKSUM_RANGE.end.min(window.len());
    let start = offsets::CHECKSUM_RANGE.start.min(end);
    window[start..end]
        .iter()
        .fold(0u8, |acc, &b| acc.wrapping_add(b))
}

fn decode_window(raw: &[u8], offset: usize) -> Result<Frame, FrameError> {
    if offset + FRAME_SIZE > raw.len() {
        return Err(FrameError::TruncatedWindow { offset });
    }
    if offset < bus_header::LEN {
        return Err(FrameError::MissingBusHeader { offset });
    }
    let window = &raw[offset..offset + FRAME_SIZE];
    let header = decode_bus_header(&raw[offset - bus_header::LEN..offset]);

    // Escape-expansion pads, probed before de-escaping.
    let check_escaped = (window[offsets::CHECKSUM_PAD] != 0) as usize;
    let count_escaped = (window[offsets::BYTECOUNT_PAD] != 0) as usize;
    let checksum_calc = checksum(window);

    let frame = escape::unescape(window)?;
    let len = frame.len();

    let checksum_index = len + check_escaped - 3;
    let bytecount_index = len + check_escaped + count_escaped - 6;
    let received = *frame
        .get(checksum_index)
        .ok_or(FrameError::FieldOutOfBounds {
            start: checksum_index,
            end: checksum_index + 1,
            len,
        })?;
    let bytecount = read_u16_be(&frame, bytecount_index)?;
    if bytecount as usize > DATA_SEGMENT_LENGTH {
        return Err(FrameError::OversizedPayload { bytecount });
    }

    let start_index = read_u32_be(&frame, offsets::START_INDEX)?;
    let tag = *frame
        .get(offsets::CHANNEL_TAG)
        .ok_or(FrameError::FieldOutOfBounds {
            start: offsets::CHANNEL_TAG,
            end: offsets::CHANNEL_TAG + 1,
            len,
        })?;
    let channel = Channel::from_tag(tag).ok_or(FrameError::UnknownChannelTag { tag })?;
    let experiment_number = frame[offsets::EXPERIMENT];

    let payload_end = offsets::PAYLOAD + bytecount as usize;
    if payload_end > len {
        return Err(FrameError::FieldOutOfBounds {
            start: offsets::PAYLOAD,
            end: payload_end,
            len,
        });
    }
    let payload = frame[offsets::PAYLOAD..payload_end].to_vec();

    let checksum_ok = received == checksum_calc;
    debug!(
        channel = ?channel,
        experiment_number,
        start_index,
        bytecount,
        checksum_ok,
        "decoded frame"
    );

    Ok(Frame {
        channel,
        experiment_number,
        start_index,
        payload,
        received_timestamp: timebase::payload_timestamp(header.epoch_seconds, header.nanoseconds),
        checksum_ok,
        header,
        frame_length: len,
    })
}

fn decode_bus_header(bytes: &[u8]) -> BusHeader {
    BusHeader {
        message_length: u32::from_be_bytes(
            bytes[bus_header::MESSAGE_LENGTH..bus_header::MESSAGE_LENGTH + 4]
                .try_into()
                .expect("fixed slice"),
        ),
        component_id: bytes[bus_header::COMPONENT_ID],
        interface_id: bytes[bus_header::INTERFACE_ID],
        message_id: bytes[bus_header::MESSAGE_ID],
        epoch_seconds: u32::from_be_bytes(
            bytes[bus_header::EPOCH_SECONDS..bus_header::EPOCH_SECONDS + 4]
                .try_into()
                .expect("fixed slice"),
        ),
        nanoseconds: u32::from_be_bytes(
            bytes[bus_header::NANOSECONDS..bus_header::NANOSECONDS + 4]
                .try_into()
                .expect("fixed slice"),
        ),
        reboot_count: u16::from_be_bytes(
            bytes[bus_header::REBOOT_COUNT..bus_header::REBOOT_COUNT + 2]
                .try_into()
                .expect("fixed slice"),
        ),
    }
}

#[inline]
fn read_u16_be(data: &[u8], offset: usize) -> Result<u16, FrameError> {
    data.get(offset..offset + 2)
        .map(|b| u16::from_be_bytes([b[0], b[1]]))
        .ok_or(FrameError::FieldOutOfBounds {
            start: offset,
            end: offset + 2,
            len: data.len(),
        })
}

#[inline]
fn read_u32_be(data: &[u8], offset: usize) -> Result<u32, FrameError> {
    data.get(offset..offset + 4)
        .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or(FrameError::FieldOutOfBounds {
            start: offset,
            end: offset + 4,
            len: data.len(),
        })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
