//! One decode pass: raw capture bytes in, decoded products out.
//!
//! The pass is a pure, synchronous transformation: scan, demultiplex per
//! channel, then hand each channel's frames to its assembler. Frames that
//! did not complete a product are returned through the caller-owned
//! [`CarryOver`] so a later pass (typically over the next downlink file)
//! can finish them. Nothing in a pass is fatal: the output always carries
//! whatever decoded, plus counts for what did not.
//!
//! The carry-over set is the only state spanning passes; callers running
//! concurrent passes over independent captures keep one `CarryOver` per
//! pipeline.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::burst::grouping::{
    group_by_experiment_number, group_by_status_bracket, group_by_time_range, GroupingOutput,
};
use crate::burst::BurstProduct;
use crate::config::{DecoderConfig, GroupingMode};
use crate::frame::{self, Channel, Frame};
use crate::status::{decode_status, StatusRecord};
use crate::survey::{assemble_surveys, SurveyProduct};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Frames carried between decode passes, owned by the caller.
#[derive(Debug, Default)]
pub struct CarryOver {
    pub frames: Vec<Frame>,
}

impl CarryOver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

/// Aggregated per-pass counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DecodeCounts {
    pub frames_decoded: usize,
    pub sync_errors: usize,
    pub checksum_failures: usize,
    pub status_records: usize,
    pub status_failures: usize,
    pub survey_products: usize,
    pub burst_products: usize,
    /// Burst groups dropped for want of a recoverable command.
    pub config_unknown_groups: usize,
    /// Frames carried over for a later pass.
    pub unused_frames: usize,
}

/// Everything one pass decoded.
#[derive(Debug, Default)]
pub struct DecodeOutput {
    /// Every frame scanned, bad checksums included (flagged).
    pub frames: Vec<Frame>,
    pub statuses: Vec<StatusRecord>,
    pub surveys: Vec<SurveyProduct>,
    pub bursts: Vec<BurstProduct>,
    pub counts: DecodeCounts,
}

/// The decode pipeline.
pub struct Decoder {
    config: DecoderConfig,
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

impl Decoder {
    pub fn new(config: DecoderConfig) -> Self {
        Self { config }
    }

    pub fn with_defaults() -> Self {
        Self::new(DecoderConfig::default())
    }

    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    /// Run one decode pass over a raw capture buffer.
    ///
    /// Unconsumed assembler frames from `carry` join this pass's frames
    /// and whatever remains unconsumed is written back to `carry`.
    pub fn decode_pass(&self, raw: &[u8], carry: &mut CarryOver) -> DecodeOutput {
        let mut out = DecodeOutput::default();

        let scan = frame::scan_frames(raw);
        out.counts.frames_decoded = scan.counts.decoded;
        out.counts.sync_errors = scan.counts.sync_errors;
        out.counts.checksum_failures = scan.counts.checksum_failures;

        // Checksum failures are surfaced on the output but never reach an
        // assembler. Carry-over frames already passed this filter.
        let mut work: Vec<Frame> = std::mem::take(&mut carry.frames);
        work.extend(scan.frames.iter().filter(|f| f.checksum_ok).cloned());
        out.frames = scan.frames;

        // Status records decode frame-by-frame; a failed record is dropped
        // with a warning and counted.
        for f in work.iter().filter(|f| f.channel == Channel::Status) {
            match decode_status(f, self.config.status.survey_period_mapping) {
                Ok(record) => out.statuses.push(record),
                Err(err) => {
                    out.counts.status_failures += 1;
                    warn!(%err, "failed to decode a status frame");
                }
            }
        }
        out.counts.status_records = out.statuses.len();

        // Survey channel.
        let (survey_frames, rest): (Vec<Frame>, Vec<Frame>) = work
            .into_iter()
            .partition(|f| f.channel == Channel::Survey);
        let survey_out = assemble_surveys(survey_frames, self.config.survey.separation_time());
        out.surveys = survey_out.products;
        out.counts.survey_products = out.surveys.len();
        carry.frames.extend(survey_out.unused);

        // Burst channels (the bracket strategy also consumes status
        // frames). Low-rate and leftover status frames pass through the
        // grouping untouched and are not carried.
        let grouping = match self.config.burst.grouping {
            GroupingMode::ExperimentNumber => {
                group_by_experiment_number(rest, None, self.config.burst.fd_sample_count)
            }
            GroupingMode::StatusBracket => group_by_status_bracket(
                rest,
                &self.config.burst.bracket_options(),
                self.config.status.survey_period_mapping,
                self.config.burst.fd_sample_count,
            ),
        };
        self.collect_grouping(grouping, carry, &mut out);

        out.counts.unused_frames = carry.frames.len();
        info!(
            frames = out.counts.frames_decoded,
            surveys = out.surveys.len(),
            bursts = out.bursts.len(),
            statuses = out.statuses.len(),
            unused = out.counts.unused_frames,
            "decode pass complete"
        );
        out
    }

    /// Decode bursts from the carry-over set inside an explicit time
    /// range, with a caller-supplied raw command and pulse count.
    ///
    /// Manual recovery for captures whose status and GPS correlation never
    /// arrived; bypasses automatic command recovery entirely.
    pub fn decode_bursts_in_range(
        &self,
        carry: &mut CarryOver,
        t1: DateTime<Utc>,
        t2: DateTime<Utc>,
        command: [u8; 3],
        pulses: u32,
    ) -> Vec<BurstProduct> {
        let frames = std::mem::take(&mut carry.frames);
        let grouping = group_by_time_range(
            frames,
            t1,
            t2,
            command,
            pulses,
            self.config.burst.fd_sample_count,
        );
        carry.frames.extend(grouping.unused);
        grouping.products
    }

    fn collect_grouping(
        &self,
        grouping: GroupingOutput,
        carry: &mut CarryOver,
        out: &mut DecodeOutput,
    ) {
        out.counts.config_unknown_groups += grouping.config_unknown_groups;
        out.counts.burst_products += grouping.products.len();
        out.bursts.extend(grouping.products);
        // Only frames an assembler could still use are carried forward;
        // unpaired status frames stay relevant to bracket grouping alone.
        let carry_status = self.config.burst.grouping == GroupingMode::StatusBracket;
        let (reusable, dropped): (Vec<Frame>, Vec<Frame>) =
            grouping.unused.into_iter().partition(|f| {
                f.channel.is_burst() || (carry_status && f.channel == Channel::Status)
            });
        carry.frames.extend(reusable);
        if !dropped.is_empty() {
            info!(count = dropped.len(), "frames with no assembler left the pass");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
