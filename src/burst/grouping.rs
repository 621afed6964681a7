//! Reassembly policy engine: partitioning burst frames into captures.
//!
//! Three interchangeable strategies select which frames form one capture,
//! all with the same output contract: decoded products plus the frames
//! left over for retry against a future batch.
//!
//! 1. [`group_by_experiment_number`]: the nominal path; the command is
//!    recovered from the GPS command echo.
//! 2. [`group_by_status_bracket`]: captures bracketed between matching
//!    burst-type status frames; command and pulse count come from the
//!    status word. Unpaired trailing status frames fall back to a bounded
//!    lookback window.
//! 3. [`group_by_time_range`]: manual recovery, where the caller supplies the
//!    window, the raw command, and the pulse count directly.

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use crate::command::BurstCommand;
use crate::frame::{Channel, Frame};
use crate::status::{decode_status, is_burst_status, StatusRecord, SurveyPeriodMapping};

use super::{assemble_burst, BurstConfig, BurstError, BurstProduct, FdCountVariant};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Default padding around a status bracket.
pub const DEFAULT_BRACKET_PADDING_SECS: f64 = 1.5;

/// Default maximum span of a status bracket.
pub const DEFAULT_MAX_BRACKET_GAP_SECS: f64 = 2.0 * 24.0 * 3600.0;

/// Default lookback window ahead of a lone trailing status frame.
pub const DEFAULT_FOOTER_LOOKBACK_SECS: f64 = 2.0 * 3600.0;

/// Timing knobs for the status-bracket strategy.
#[derive(Debug, Clone, Copy)]
pub struct BracketOptions {
    /// Padding applied on both sides of a bracket.
    pub padding: Duration,
    /// Maximum time between the two bracketing status frames.
    pub max_gap: Duration,
    /// Lookback ahead of an unpaired trailing status frame.
    pub lookback: Duration,
}

impl Default for BracketOptions {
    fn default() -> Self {
        Self {
            padding: secs(DEFAULT_BRACKET_PADDING_SECS),
            max_gap: secs(DEFAULT_MAX_BRACKET_GAP_SECS),
            lookback: secs(DEFAULT_FOOTER_LOOKBACK_SECS),
        }
    }
}

fn secs(s: f64) -> Duration {
    Duration::milliseconds((s * 1000.0) as i64)
}

/// Output contract shared by all grouping strategies.
#[derive(Debug, Default)]
pub struct GroupingOutput {
    pub products: Vec<BurstProduct>,
    /// Frames not consumed by any group, eligible for a later pass.
    pub unused: Vec<Frame>,
    /// Groups dropped because no burst command was recoverable.
    pub config_unknown_groups: usize,
}

// ---------------------------------------------------------------------------
// Strategy 1: by experiment number
// ---------------------------------------------------------------------------

/// Group burst frames sharing an experiment number.
///
/// The command is recovered from the GPS echo (pulse count = decoded
/// fixes) unless `manual` overrides it. Groups without a recoverable
/// command are reported configuration-unknown and their frames returned
/// unused.
pub fn group_by_experiment_number(
    frames: Vec<Frame>,
    manual: Option<BurstConfig>,
    fd_variant: FdCountVariant,
) -> GroupingOutput {
    let mut out = GroupingOutput::default();
    let mut burst: Vec<Frame> = Vec::new();
    for f in frames {
        if f.channel.is_burst() {
            burst.push(f);
        } else {
            out.unused.push(f);
        }
    }
    burst.sort_by_key(|f| f.received_timestamp);

    if manual.is_some() {
        info!("using manually-provided burst command");
    }

    let mut exp_nums: Vec<u8> = burst.iter().map(|f| f.experiment_number).collect();
    exp_nums.sort_unstable();
    exp_nums.dedup();
    info!(?exp_nums, "available burst experiment numbers");

    for e_num in exp_nums {
        debug!(experiment_number = e_num, "processing burst group");
        let (group, rest): (Vec<Frame>, Vec<Frame>) =
            burst.into_iter().partition(|f| f.experiment_number == e_num);
        burst = rest;

        let refs: Vec<&Frame> = group.iter().collect();
        match assemble_burst(&refs, manual, e_num, fd_variant) {
            Ok(product) => out.products.push(product),
            Err(err) => {
                warn!(experiment_number = e_num, %err, "burst group retained as unused");
                out.config_unknown_groups += matches!(err, BurstError::ConfigUnknown) as usize;
                out.unused.extend(group);
            }
        }
        debug!(remaining = burst.len(), "frames remaining");
    }

    out.unused.extend(burst);
    info!(
        products = out.products.len(),
        unused = out.unused.len(),
        "experiment-number grouping complete"
    );
    out
}

// ---------------------------------------------------------------------------
// Strategy 2: by status bracket
// ---------------------------------------------------------------------------

/// Group burst frames bracketed by burst-type status frames.
///
/// Consecutive status frames pair when their echoed burst commands match,
/// their uptime is non-decreasing, and their spacing is within
/// `opts.max_gap`; the capture window is the pair padded by
/// `opts.padding`. Status frames left unpaired are treated as lone
/// footers over `opts.lookback`.
pub fn group_by_status_bracket(
    frames: Vec<Frame>,
    opts: &BracketOptions,
    mapping: SurveyPeriodMapping,
    fd_variant: FdCountVariant,
) -> GroupingOutput {
    let mut out = GroupingOutput::default();

    let mut burst: Vec<Option<Frame>> = Vec::new();
    let mut status: Vec<(Frame, StatusRecord)> = Vec::new();
    for f in frames {
        if f.channel.is_burst() {
            burst.push(Some(f));
        } else if is_burst_status(&f) {
            match decode_status(&f, mapping) {
                Ok(record) => status.push((f, record)),
                Err(err) => {
                    warn!(%err, "undecodable status frame retained as unused");
                    out.unused.push(f);
                }
            }
        } else {
            out.unused.push(f);
        }
    }
    burst.sort_by_key(|f| f.as_ref().map(|f| f.received_timestamp));
    status.sort_by_key(|(f, _)| f.received_timestamp);
    debug!(status = status.len(), burst = burst.len(), "status-bracket inputs");

    let mut status_used = vec![false; status.len()];

    // Paired brackets first.
    for i in 0..status.len().saturating_sub(1) {
        if status_used[i] || status_used[i + 1] {
            continue;
        }
        let (fa, ia) = &status[i];
        let (fb, ib) = &status[i + 1];
        if ia.burst_command.raw != ib.burst_command.raw {
            debug!("command mismatch between status frames");
            continue;
        }
        if fb.received_timestamp - fa.received_timestamp > opts.max_gap {
            debug!("status bracket wider than the configured maximum");
            continue;
        }
        if ia.uptime > ib.uptime {
            debug!("uptime order violated; payload reset inside bracket");
            continue;
        }

        let ta = fa.received_timestamp - opts.padding;
        let tb = fb.received_timestamp + opts.padding;
        let produced = decode_window_groups(
            &mut burst,
            ta,
            tb,
            ia,
            vec![ia.clone(), ib.clone()],
            fd_variant,
            &mut out,
        );
        if produced {
            status_used[i] = true;
            status_used[i + 1] = true;
        }
    }

    // Unpaired status frames act as lone footers over the lookback window.
    for i in 0..status.len() {
        if status_used[i] {
            continue;
        }
        let (fb, ib) = &status[i];
        let ta = fb.received_timestamp - opts.lookback;
        let tb = fb.received_timestamp + opts.padding;
        let produced =
            decode_window_groups(&mut burst, ta, tb, ib, vec![ib.clone()], fd_variant, &mut out);
        if produced {
            status_used[i] = true;
        }
    }

    for (i, (frame, _)) in status.into_iter().enumerate() {
        if !status_used[i] {
            out.unused.push(frame);
        }
    }
    out.unused.extend(burst.into_iter().flatten());
    info!(
        products = out.products.len(),
        unused = out.unused.len(),
        "status-bracket grouping complete"
    );
    out
}

/// Assemble every experiment number with frames inside `[ta, tb]`,
/// consuming the frames that form a product. Returns whether anything
/// was produced.
fn decode_window_groups(
    burst: &mut [Option<Frame>],
    ta: DateTime<Utc>,
    tb: DateTime<Utc>,
    source: &StatusRecord,
    bracket: Vec<StatusRecord>,
    fd_variant: FdCountVariant,
    out: &mut GroupingOutput,
) -> bool {
    let in_window: Vec<usize> = burst
        .iter()
        .enumerate()
        .filter_map(|(k, f)| {
            let f = f.as_ref()?;
            (f.received_timestamp >= ta && f.received_timestamp <= tb).then_some(k)
        })
        .collect();
    if in_window.is_empty() {
        debug!("no burst frames inside the status window");
        return false;
    }

    let mut exp_nums: Vec<u8> = in_window
        .iter()
        .map(|&k| burst[k].as_ref().expect("in-window frame").experiment_number)
        .collect();
    exp_nums.sort_unstable();
    exp_nums.dedup();

    let mut produced = false;
    for e_num in exp_nums {
        let indices: Vec<usize> = in_window
            .iter()
            .copied()
            .filter(|&k| {
                burst[k]
                    .as_ref()
                    .is_some_and(|f| f.experiment_number == e_num)
            })
            .collect();
        let refs: Vec<&Frame> = indices
            .iter()
            .map(|&k| burst[k].as_ref().expect("selected frame"))
            .collect();

        // The GPS stream echoes the command; the status value stays
        // authoritative on disagreement.
        if let Some(echo) = super::recover_command(
            &refs
                .iter()
                .copied()
                .filter(|f| f.channel == Channel::GpsBurst)
                .collect::<Vec<_>>(),
        ) {
            if echo != source.burst_command.raw {
                warn!(
                    status = ?source.burst_command.raw,
                    gps = ?echo,
                    "GPS and status command echo mismatch"
                );
            }
        }

        let config = BurstConfig {
            command: source.burst_command,
            pulses: source.burst_pulses as u32,
        };
        match assemble_burst(&refs, Some(config), e_num, fd_variant) {
            Ok(mut product) => {
                product.header_timestamp = ta;
                product.status = bracket.clone();
                product.bbr_config = Some(source.bbr_config);
                info!(
                    experiment_number = e_num,
                    pulses = config.pulses,
                    "decoded status-bracketed burst"
                );
                out.products.push(product);
                for k in indices {
                    burst[k] = None;
                }
                produced = true;
            }
            Err(err) => {
                debug!(experiment_number = e_num, %err, "window group not assembled");
            }
        }
    }
    produced
}

// ---------------------------------------------------------------------------
// Strategy 3: by explicit time range
// ---------------------------------------------------------------------------

/// Group burst frames inside a caller-supplied window, with a
/// caller-supplied raw command and pulse count.
///
/// Manual recovery for incomplete captures lacking any status or GPS
/// correlation.
pub fn group_by_time_range(
    frames: Vec<Frame>,
    t1: DateTime<Utc>,
    t2: DateTime<Utc>,
    command: [u8; 3],
    pulses: u32,
    fd_variant: FdCountVariant,
) -> GroupingOutput {
    let mut out = GroupingOutput::default();
    let mut burst: Vec<Frame> = Vec::new();
    for f in frames {
        if f.channel.is_burst() {
            burst.push(f);
        } else {
            out.unused.push(f);
        }
    }
    burst.sort_by_key(|f| f.received_timestamp);

    let config = BurstConfig {
        command: BurstCommand::decode(command),
        pulses,
    };
    info!(?command, pulses, %t1, %t2, "decoding burst in explicit time range");

    let mut exp_nums: Vec<u8> = burst.iter().map(|f| f.experiment_number).collect();
    exp_nums.sort_unstable();
    exp_nums.dedup();

    for e_num in exp_nums {
        let (group, rest): (Vec<Frame>, Vec<Frame>) = burst.into_iter().partition(|f| {
            f.experiment_number == e_num
                && f.received_timestamp >= t1
                && f.received_timestamp <= t2
        });
        burst = rest;
        if group.is_empty() {
            continue;
        }

        let refs: Vec<&Frame> = group.iter().collect();
        match assemble_burst(&refs, Some(config), e_num, fd_variant) {
            Ok(product) => out.products.push(product),
            Err(err) => {
                warn!(experiment_number = e_num, %err, "range group retained as unused");
                out.unused.extend(group);
            }
        }
    }

    out.unused.extend(burst);
    info!(
        products = out.products.len(),
        unused = out.unused.len(),
        "time-range grouping complete"
    );
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
