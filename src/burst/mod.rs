//! Burst product assembler.
//!
//! A burst capture downlinks as interleaved `E`, `B`, and `G` frames, each
//! carrying a slice of its channel's logical byte stream. Frames belonging
//! to one capture are selected by a grouping strategy (see [`grouping`]),
//! then reassembled here: per-channel buffers sized to the highest byte
//! index observed, filled through the unwritten-byte sentinel, and decoded
//! into 16-bit samples according to the burst configuration.
//!
//! Byte positions never filled propagate as missing samples, never as
//! zeros, so downstream consumers can tell silence from dropped frames.

pub mod grouping;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::command::{BbrConfig, BurstCommand, BurstMode, FFT_SEGMENT_LENGTH};
use crate::frame::{Channel, Frame};
use crate::gps::{decode_gps, GpsFix};
use crate::sparse::SparseBytes;
use crate::status::StatusRecord;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Samples the instrument discards when the decimation filter restarts.
pub const DECIMATION_DISCARD_SAMPLES: u32 = 105;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Burst command plus the externally-sourced pulse count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BurstConfig {
    pub command: BurstCommand,
    /// Capture repetitions; from a status word, a caller, or the number of
    /// decoded GPS fixes.
    pub pulses: u32,
}

/// Which expected-sample-count formula to apply to frequency-domain
/// bursts.
///
/// The two readings of the capture layout disagree by the pulse count
/// versus a fixed factor of two; which is canonical is unconfirmed, so
/// both are implemented and neither is silently preferred at decode sites.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FdCountVariant {
    /// `2 × ffts_on × 2 × segment × active_bins`.
    #[default]
    SegmentDoubled,
    /// `ffts_on × pulses × segment × active_bins × 2`.
    PerPulse,
}

/// One complex FFT bin reconstructed from a 4-byte quad.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FdBin {
    pub re: i16,
    pub im: i16,
}

/// Reconstructed samples; `None` marks positions never received.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BurstSamples {
    TimeDomain {
        e: Vec<Option<i16>>,
        b: Vec<Option<i16>>,
    },
    FrequencyDomain {
        e: Vec<Option<FdBin>>,
        b: Vec<Option<FdBin>>,
    },
}

impl BurstSamples {
    /// Lengths of the electric and magnetic sample streams.
    pub fn lens(&self) -> (usize, usize) {
        match self {
            BurstSamples::TimeDomain { e, b } => (e.len(), b.len()),
            BurstSamples::FrequencyDomain { e, b } => (e.len(), b.len()),
        }
    }

    /// Missing-sample counts for the electric and magnetic streams.
    pub fn missing(&self) -> (usize, usize) {
        match self {
            BurstSamples::TimeDomain { e, b } => (
                e.iter().filter(|s| s.is_none()).count(),
                b.iter().filter(|s| s.is_none()).count(),
            ),
            BurstSamples::FrequencyDomain { e, b } => (
                e.iter().filter(|s| s.is_none()).count(),
                b.iter().filter(|s| s.is_none()).count(),
            ),
        }
    }
}

/// One reconstructed burst capture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BurstProduct {
    pub config: BurstConfig,
    pub samples: BurstSamples,
    /// One fix per pulse boundary, in arrival order.
    pub gps_fixes: Vec<GpsFix>,
    pub header_timestamp: DateTime<Utc>,
    pub experiment_number: u8,
    /// Sample count the configuration predicts; a mismatch with the
    /// reconstructed length is reported, not fatal.
    pub expected_samples: usize,
    /// Bracketing status records, when the group was status-selected.
    pub status: Vec<StatusRecord>,
    /// Analog front-end configuration from the bracketing status.
    pub bbr_config: Option<BbrConfig>,
}

/// Group-level assembly failure; the group's frames stay unused.
#[derive(Debug, Error)]
pub enum BurstError {
    #[error("no burst command recoverable from the group (configuration unknown)")]
    ConfigUnknown,

    #[error("group contains no burst frames")]
    EmptyGroup,
}

// ---------------------------------------------------------------------------
// Assembly
// ---------------------------------------------------------------------------

/// Reassemble one frame group into a [`BurstProduct`].
///
/// With `config == None` the command is recovered from the echo at the
/// start of the GPS stream and the pulse count defaults to the number of
/// decoded fixes; a group with neither is configuration-unknown.
pub fn assemble_burst(
    frames: &[&Frame],
    config: Option<BurstConfig>,
    experiment_number: u8,
    fd_variant: FdCountVariant,
) -> Result<BurstProduct, BurstError> {
    let e_frames: Vec<&Frame> = frames.iter().copied().filter(|f| f.channel == Channel::EBurst).collect();
    let b_frames: Vec<&Frame> = frames.iter().copied().filter(|f| f.channel == Channel::BBurst).collect();
    let g_frames: Vec<&Frame> = frames.iter().copied().filter(|f| f.channel == Channel::GpsBurst).collect();
    if e_frames.is_empty() && b_frames.is_empty() && g_frames.is_empty() {
        return Err(BurstError::EmptyGroup);
    }

    let e_buf = reassemble_channel(&e_frames);
    let b_buf = reassemble_channel(&b_frames);
    let g_buf = reassemble_channel(&g_frames);
    debug!(
        e_len = e_buf.len(),
        b_len = b_buf.len(),
        g_len = g_buf.len(),
        e_missing = e_buf.missing(),
        b_missing = b_buf.missing(),
        "reassembled burst streams"
    );

    let gps_fixes = decode_gps(&g_buf);

    let config = match config {
        Some(c) => c,
        None => {
            let raw = recover_command(&g_frames).ok_or_else(|| {
                warn!("no GPS command echo found; cannot determine burst command");
                BurstError::ConfigUnknown
            })?;
            info!(command = ?raw, "recovered burst command from GPS stream");
            BurstConfig {
                command: BurstCommand::decode(raw),
                // One GPS entry per pulse.
                pulses: gps_fixes.len() as u32,
            }
        }
    };

    let samples = match &config.command.mode {
        BurstMode::TimeDomain(_) => BurstSamples::TimeDomain {
            e: td_samples(&e_buf),
            b: td_samples(&b_buf),
        },
        BurstMode::FrequencyDomain(_) => BurstSamples::FrequencyDomain {
            e: fd_samples(&e_buf),
            b: fd_samples(&b_buf),
        },
    };

    let expected_samples = expected_sample_count(&config, fd_variant);
    let (e_len, b_len) = samples.lens();
    if e_len != expected_samples {
        warn!(
            reconstructed = e_len,
            expected = expected_samples,
            "E stream length differs from configuration (missing frames or mismatched data)"
        );
    }
    if b_len != expected_samples {
        warn!(
            reconstructed = b_len,
            expected = expected_samples,
            "B stream length differs from configuration (missing frames or mismatched data)"
        );
    }

    let header_timestamp = frames
        .iter()
        .map(|f| f.received_timestamp)
        .min()
        .expect("group is non-empty");

    Ok(BurstProduct {
        config,
        samples,
        gps_fixes,
        header_timestamp,
        experiment_number,
        expected_samples,
        status: Vec::new(),
        bbr_config: None,
    })
}

/// Write each frame's payload at its start index into a buffer sized to
/// the highest index observed; bursts are variable-length.
fn reassemble_channel(frames: &[&Frame]) -> SparseBytes {
    let cap = frames.iter().map(|f| f.end_index()).max().unwrap_or(0);
    let mut buf = SparseBytes::new(cap);
    for f in frames {
        buf.write_at(f.start_index as usize, &f.payload)
            .expect("buffer sized to the maximum end index");
    }
    buf
}

/// The burst command echoed at the start of the GPS stream, if any.
pub fn recover_command(g_frames: &[&Frame]) -> Option<[u8; 3]> {
    let mut echoes = g_frames
        .iter()
        .filter(|f| f.start_index == 0 && f.payload.len() >= 3)
        .map(|f| [f.payload[2], f.payload[1], f.payload[0]]);
    let first = echoes.next()?;
    if echoes.any(|e| e != first) {
        warn!(command = ?first, "conflicting GPS command echoes, using the first");
    }
    Some(first)
}

/// Reconstruct time-domain samples: each consecutive byte pair is one
/// little-endian i16. A missing byte marks its sample missing.
pub fn td_samples(buf: &SparseBytes) -> Vec<Option<i16>> {
    let usable = buf.len() - buf.len() % 4;
    (0..usable / 2)
        .map(|s| {
            let lo = buf.get(2 * s)?;
            let hi = buf.get(2 * s + 1)?;
            Some(i16::from_le_bytes([lo, hi]))
        })
        .collect()
}

/// Reconstruct frequency-domain bins: each 4-byte quad is one complex
/// bin. Any missing byte in a quad marks the bin missing.
pub fn fd_samples(buf: &SparseBytes) -> Vec<Option<FdBin>> {
    let usable = buf.len() - buf.len() % 4;
    (0..usable / 4)
        .map(|q| {
            let bytes = buf.read_exact(4 * q, 4)?;
            Some(FdBin {
                re: i16::from_le_bytes([bytes[0], bytes[1]]),
                im: i16::from_le_bytes([bytes[2], bytes[3]]),
            })
        })
        .collect()
}

/// Sample count the configuration predicts for each field stream.
pub fn expected_sample_count(config: &BurstConfig, fd_variant: FdCountVariant) -> usize {
    match &config.command.mode {
        BurstMode::TimeDomain(td) => {
            let n = td.samples_on as u64 * config.pulses as u64;
            match td.decimation_factor() {
                Some(factor) => {
                    let factor = factor as u64;
                    (n / factor).saturating_sub(
                        DECIMATION_DISCARD_SAMPLES as u64 / factor + factor - 1,
                    ) as usize
                }
                None => n as usize,
            }
        }
        BurstMode::FrequencyDomain(fd) => {
            let active = fd.bins.active_count() as u64;
            let segment = FFT_SEGMENT_LENGTH as u64;
            let n = match fd_variant {
                FdCountVariant::SegmentDoubled => 2 * fd.ffts_on as u64 * 2 * segment * active,
                FdCountVariant::PerPulse => {
                    fd.ffts_on as u64 * config.pulses as u64 * segment * active * 2
                }
            };
            n as usize
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
