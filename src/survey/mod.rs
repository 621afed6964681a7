//! Survey product assembler.
//!
//! Survey frames carry slices of a fixed 1212-byte spectral column:
//! a 4-byte sync header, 128 interleaved 8-byte groups (4 electric-field
//! bytes then 4 magnetic-field bytes, 512 bins per field), and a trailing
//! 180-byte GPS sub-block.
//!
//! Frames sharing an experiment number are first split into sub-clusters
//! by arrival-time gap (experiment numbers wrap at 256 and are reused
//! across unrelated products), and each cluster is reassembled through the
//! unwritten-byte sentinel so a column is only reported once every
//! position has actually been filled. Incomplete clusters are returned as
//! unused frames for a later pass.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::frame::{Channel, Frame};
use crate::gps::{decode_gps_bytes, GpsFix};
use crate::sparse::SparseBytes;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Reassembled survey column length in bytes.
pub const SURVEY_FRAME_LENGTH: usize = 1212;

/// Sync header opening every survey column.
pub const SURVEY_SYNC_HEADER: [u8; 4] = [0xCD, 0xAB, 0x21, 0x43];

/// Spectral bins per field (0–40 kHz).
pub const SPECTRUM_BINS: usize = 512;

/// Default maximum arrival gap inside one cluster.
pub const DEFAULT_SEPARATION_TIME_SECS: f64 = 4.5;

const INTERLEAVE_GROUPS: usize = 128;
const GROUP_STRIDE: usize = 8;
const FIELD_BYTES: usize = 4;
const GPS_BLOCK_OFFSET: usize = 1028;
const GPS_BLOCK_LENGTH: usize = 180;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// One reconstructed spectral column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurveyProduct {
    /// Electric-field bin magnitudes (averaged, log-scaled on board).
    pub e_data: Vec<u8>,
    /// Magnetic-field bin magnitudes.
    pub b_data: Vec<u8>,
    /// Fix decoded from the trailing GPS sub-block, when present.
    pub gps: Option<GpsFix>,
    /// Arrival time of the cluster's first frame.
    pub timestamp: DateTime<Utc>,
    pub experiment_number: u8,
}

/// Assembly results: complete columns plus frames retained for retry.
#[derive(Debug, Default)]
pub struct SurveyOutput {
    pub products: Vec<SurveyProduct>,
    pub unused: Vec<Frame>,
}

// ---------------------------------------------------------------------------
// Assembly
// ---------------------------------------------------------------------------

/// Reassemble survey columns from `frames`.
///
/// Only `Survey`-channel frames participate; anything else is returned in
/// `unused` untouched. `separation` bounds the arrival gap within one
/// cluster.
pub fn assemble_surveys(frames: Vec<Frame>, separation: Duration) -> SurveyOutput {
    let mut out = SurveyOutput::default();

    let mut survey: Vec<Frame> = Vec::new();
    for f in frames {
        if f.channel == Channel::Survey {
            survey.push(f);
        } else {
            out.unused.push(f);
        }
    }
    if survey.is_empty() {
        debug!("no survey frames present");
        return out;
    }
    survey.sort_by_key(|f| f.received_timestamp);

    let mut exp_nums: Vec<u8> = survey.iter().map(|f| f.experiment_number).collect();
    exp_nums.sort_unstable();
    exp_nums.dedup();
    debug!(?exp_nums, "survey experiment numbers in batch");

    for e_num in exp_nums {
        let cur: Vec<&Frame> = survey
            .iter()
            .filter(|f| f.experiment_number == e_num)
            .collect();

        for cluster in split_by_arrival_gap(&cur, separation) {
            match assemble_cluster(cluster) {
                Some(product) => out.products.push(product),
                None => out.unused.extend(cluster.iter().map(|&f| f.clone())),
            }
        }
    }

    info!(
        products = out.products.len(),
        unused = out.unused.len(),
        "survey assembly complete"
    );
    out
}

/// Split a timestamp-sorted run of frames wherever the arrival gap
/// exceeds `separation`.
fn split_by_arrival_gap<'a>(frames: &'a [&'a Frame], separation: Duration) -> Vec<&'a [&'a Frame]> {
    let mut clusters = Vec::new();
    let mut start = 0;
    for i in 1..frames.len() {
        let gap = frames[i].received_timestamp - frames[i - 1].received_timestamp;
        if gap > separation {
            clusters.push(&frames[start..i]);
            start = i;
        }
    }
    if start < frames.len() {
        clusters.push(&frames[start..]);
    }
    clusters
}

/// Reassemble one cluster into a product, or `None` while incomplete.
fn assemble_cluster(cluster: &[&Frame]) -> Option<SurveyProduct> {
    let mut buf = SparseBytes::new(SURVEY_FRAME_LENGTH);
    for f in cluster {
        if let Err(err) = buf.write_at(f.start_index as usize, &f.payload) {
            warn!(
                experiment_number = f.experiment_number,
                %err,
                "survey frame exceeds the column, cluster retained as unused"
            );
            return None;
        }
    }
    if !buf.is_complete() {
        debug!(
            missing = buf.missing(),
            "incomplete survey column retained as unused"
        );
        return None;
    }
    let bytes = buf.filled().expect("complete buffer");

    if bytes[..4] != SURVEY_SYNC_HEADER {
        warn!(header = ?&bytes[..4], "survey column sync header mismatch");
    }

    // E and B bytes interleave in 4-byte runs after the sync header.
    let mut e_data = Vec::with_capacity(SPECTRUM_BINS);
    let mut b_data = Vec::with_capacity(SPECTRUM_BINS);
    for k in 0..INTERLEAVE_GROUPS {
        let group = 4 + k * GROUP_STRIDE;
        e_data.extend_from_slice(&bytes[group..group + FIELD_BYTES]);
        b_data.extend_from_slice(&bytes[group + FIELD_BYTES..group + 2 * FIELD_BYTES]);
    }

    let gps_block = &bytes[GPS_BLOCK_OFFSET..GPS_BLOCK_OFFSET + GPS_BLOCK_LENGTH];
    let mut fixes = decode_gps_bytes(gps_block);
    if fixes.len() > 1 {
        warn!(count = fixes.len(), "multiple GPS fixes in one survey column");
    }

    Some(SurveyProduct {
        e_data,
        b_data,
        gps: if fixes.is_empty() {
            None
        } else {
            Some(fixes.remove(0))
        },
        timestamp: cluster[0].received_timestamp,
        experiment_number: cluster[0].experiment_number,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
