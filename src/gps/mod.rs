//! GPS receiver binary log decoder.
//!
//! The payload embeds raw Novatel-style binary logs, BESTPOS (position)
//! and BESTVEL (velocity), in the survey GPS sub-block and in the
//! reassembled GPS-burst stream. Each log starts with a fixed 5-byte sync
//! sequence followed by a 28-byte header and a fixed-layout body.
//!
//! Logs are decoded wherever their sync sequence appears; a position and a
//! velocity log are merged pairwise (first with first, second with second)
//! into one fix. Regions never filled by a frame cannot match a sync
//! sequence and partially-missing logs decode to whatever halves are
//! readable.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::sparse::SparseBytes;
use crate::timebase;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// BESTPOS log sync sequence.
pub const BESTPOS_SYNC: [u8; 5] = [0xAA, 0x44, 0x12, 0x1C, 0x2A];
/// BESTVEL log sync sequence.
pub const BESTVEL_SYNC: [u8; 5] = [0xAA, 0x44, 0x12, 0x1C, 0x63];

mod offsets {
    /// Log header length; body fields are relative to the header end.
    pub const HEADER_LEN: usize = 28;
    pub const TIME_STATUS: usize = 13;
    pub const WEEK: usize = 14; // LE u16
    pub const MS_OF_WEEK: usize = 16; // LE u32
    pub const RECEIVER_STATUS: usize = 20; // LE u32

    pub mod bestpos {
        pub const SOLUTION_STATUS: usize = 0; // LE u32
        pub const POSITION_TYPE: usize = 4; // LE u32
        pub const LAT: usize = 8; // LE f64
        pub const LON: usize = 16; // LE f64
        pub const ALT: usize = 24; // LE f64
        pub const TRACKED_SATS: usize = 64;
        pub const USED_SATS: usize = 65;
    }

    pub mod bestvel {
        pub const SOLUTION_STATUS: usize = 0; // LE u32
        pub const VELOCITY_TYPE: usize = 4; // LE u32
        pub const LATENCY: usize = 8; // LE f32
        pub const HORIZ_SPEED: usize = 16; // LE f64
        pub const GROUND_TRACK: usize = 24; // LE f64
        pub const VERT_SPEED: usize = 32; // LE f64
    }
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Header fields shared by both log types.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
struct LogHeader {
    time_status: u8,
    receiver_status: u32,
    week: u16,
    millis_of_week: u32,
}

/// BESTPOS body fields.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionLog {
    pub solution_status: u32,
    pub position_type: u32,
    pub lat: f64,
    pub lon: f64,
    pub alt: f64,
    pub tracked_sats: u8,
    pub used_sats: u8,
}

/// BESTVEL body fields.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VelocityLog {
    pub solution_status: u32,
    pub velocity_type: u32,
    /// Velocity measurement latency in seconds.
    pub latency: f32,
    pub horiz_speed: f64,
    pub vert_speed: f64,
    /// Direction of motion over ground, degrees from true north.
    pub ground_track: f64,
}

/// One decoded position/velocity fix.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GpsFix {
    /// UTC time of the fix, leap-second corrected.
    pub timestamp: DateTime<Utc>,
    pub week: u16,
    pub seconds_of_week: f64,
    pub time_status: u8,
    pub receiver_status: u32,
    pub position: Option<PositionLog>,
    pub velocity: Option<VelocityLog>,
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// Decode every GPS log in `data`, merging position/velocity pairs.
///
/// No matches is an empty result, not an error.
pub fn decode_gps(data: &SparseBytes) -> Vec<GpsFix> {
    let pos_inds = data.find_sequence(&BESTPOS_SYNC);
    let vel_inds = data.find_sequence(&BESTVEL_SYNC);
    if pos_inds.is_empty() && vel_inds.is_empty() {
        debug!("no GPS logs found");
        return vec![];
    }
    debug!(
        positions = pos_inds.len(),
        velocities = vel_inds.len(),
        "found GPS logs"
    );
    if pos_inds.len() != vel_inds.len() {
        warn!(
            positions = pos_inds.len(),
            velocities = vel_inds.len(),
            "position / velocity log count mismatch"
        );
    }

    let mut fixes = Vec::new();
    for i in 0..pos_inds.len().max(vel_inds.len()) {
        let pos = pos_inds.get(i).copied().and_then(|x| {
            let decoded = decode_position(data, x);
            if decoded.is_none() {
                warn!(index = i, offset = x, "failed to decode position log");
            }
            decoded
        });
        let vel = vel_inds.get(i).copied().and_then(|x| {
            let decoded = decode_velocity(data, x);
            if decoded.is_none() {
                warn!(index = i, offset = x, "failed to decode velocity log");
            }
            decoded
        });

        // The position header is authoritative when both halves decoded.
        let header = match (&pos, &vel) {
            (Some((ph, _)), Some((vh, _))) => {
                if ph.week != vh.week || ph.millis_of_week != vh.millis_of_week {
                    warn!(index = i, "position / velocity timestamp mismatch");
                }
                *ph
            }
            (Some((ph, _)), None) => *ph,
            (None, Some((vh, _))) => *vh,
            (None, None) => continue,
        };

        fixes.push(GpsFix {
            timestamp: timebase::gps_week_timestamp(header.week, header.millis_of_week),
            week: header.week,
            seconds_of_week: header.millis_of_week as f64 / 1000.0,
            time_status: header.time_status,
            receiver_status: header.receiver_status,
            position: pos.map(|(_, p)| p),
            velocity: vel.map(|(_, v)| v),
        });
    }
    fixes
}

/// Decode GPS logs from a fully-reassembled byte region.
pub fn decode_gps_bytes(data: &[u8]) -> Vec<GpsFix> {
    decode_gps(&SparseBytes::from_bytes(data))
}

fn decode_header(data: &SparseBytes, x: usize) -> Option<LogHeader> {
    Some(LogHeader {
        time_status: data.read_u8(x + offsets::TIME_STATUS)?,
        week: data.read_u16_le(x + offsets::WEEK)?,
        millis_of_week: data.read_u32_le(x + offsets::MS_OF_WEEK)?,
        receiver_status: data.read_u32_le(x + offsets::RECEIVER_STATUS)?,
    })
}

fn decode_position(data: &SparseBytes, x: usize) -> Option<(LogHeader, PositionLog)> {
    use offsets::bestpos::*;
    let header = decode_header(data, x)?;
    let h = x + offsets::HEADER_LEN;
    let body = PositionLog {
        solution_status: data.read_u32_le(h + SOLUTION_STATUS)?,
        position_type: data.read_u32_le(h + POSITION_TYPE)?,
        lat: data.read_f64_le(h + LAT)?,
        lon: data.read_f64_le(h + LON)?,
        alt: data.read_f64_le(h + ALT)?,
        tracked_sats: data.read_u8(h + TRACKED_SATS)?,
        used_sats: data.read_u8(h + USED_SATS)?,
    };
    Some((header, body))
}

fn decode_velocity(data: &SparseBytes, x: usize) -> Option<(LogHeader, VelocityLog)> {
    use offsets::bestvel::*;
    let header = decode_header(data, x)?;
    let h = x + offsets::HEADER_LEN;
    let body = VelocityLog {
        solution_status: data.read_u32_le(h + SOLUTION_STATUS)?,
        velocity_type: data.read_u32_le(h + VELOCITY_TYPE)?,
        latency: data.read_f32_le(h + LATENCY)?,
        horiz_speed: data.read_f64_le(h + HORIZ_SPEED)?,
        vert_speed: data.read_f64_le(h + VERT_SPEED)?,
        ground_track: data.read_f64_le(h + GROUND_TRACK)?,
    };
    Some((header, body))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
