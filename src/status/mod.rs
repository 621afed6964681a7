//! System status frame decoder.
//!
//! Status frames (`'I'` channel) carry a fixed-layout housekeeping record:
//! uptime, per-channel packet and experiment counters, memory fill, the
//! packed system-configuration word, and echoes of the last commands. The
//! echoed burst and µBBR commands are decoded in place.
//!
//! A record too short to decode is dropped with a warning; individual
//! field-level violations (command header tags) warn without dropping the
//! record.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::command::{decode_bbr_command, BbrConfig, BurstCommand};
use crate::frame::{Channel, Frame};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

mod offsets {
    pub const PREV_COMMAND: usize = 0; // 3 bytes, reversed
    pub const SOURCE: usize = 3;
    pub const PREV_BBR_COMMAND: usize = 4; // 3 bytes, reversed
    pub const PREV_BURST_COMMAND: usize = 12; // 3 bytes, reversed
    pub const TOTAL_COMMANDS: usize = 16; // LE u16
    pub const SYSTEM_CONFIG: usize = 20; // 4 bytes, reversed
    pub const SURVEY_TOTAL: usize = 24; // LE u32
    pub const E_TOTAL: usize = 28;
    pub const B_TOTAL: usize = 32;
    pub const LOWRATE_TOTAL: usize = 36;
    pub const GPS_TOTAL: usize = 40;
    pub const STATUS_TOTAL: usize = 44;
    pub const GPS_EXP_NUM: usize = 48;
    pub const LOWRATE_EXP_NUM: usize = 49;
    pub const B_EXP_NUM: usize = 50;
    pub const E_EXP_NUM: usize = 51;
    pub const SURVEY_EXP_NUM: usize = 55;
    pub const UPTIME: usize = 56; // LE u32
    pub const TOTAL_BYTES_OUT: usize = 60; // LE u32
    pub const MEMORY_WORDS: usize = 64; // LE u32, 4-byte words
    pub const GPS_ERRORS: usize = 68; // LE u16
    pub const RECORD_LEN: usize = 70;
}

/// On-board recording store the memory-fill percentage is computed over.
pub const MEMORY_CAPACITY_BYTES: u64 = 128 * 1024 * 1024;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Survey-period bit mapping applied to the system-configuration word.
///
/// The flight firmware's documented mapping reads one bit per period, but
/// downlinked data suggests the firmware writes the selection shifted by
/// one position; the true mapping is unconfirmed. The documented mapping
/// stays the default and the shifted reading is selectable; neither is
/// silently "corrected".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SurveyPeriodMapping {
    /// Bit 24 ⇒ 4096, bit 25 ⇒ 2048, otherwise 1024.
    #[default]
    Documented,
    /// Top-two-bits reading: `00` ⇒ 4096, `10` ⇒ 2048, `01` ⇒ 1024.
    TopBitsShifted,
}

/// One decoded status frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusRecord {
    pub received_timestamp: DateTime<Utc>,
    /// Requesting subsystem tag (`'B'` marks a burst bracket status).
    pub source: char,
    pub prev_command: [u8; 3],
    pub total_commands: u16,

    pub gps_resets: u8,
    pub e_deployer_count: u8,
    pub b_deployer_count: u8,
    pub arm_e: bool,
    pub arm_b: bool,
    pub gps_enable: bool,
    pub e_enable: bool,
    pub b_enable: bool,
    pub lowrate_enable: bool,
    /// Survey integration period in units of 1024 FFTs.
    pub survey_period: u16,
    /// Pulse repetitions for the current burst configuration.
    pub burst_pulses: u8,

    pub survey_total: u32,
    pub e_total: u32,
    pub b_total: u32,
    pub lowrate_total: u32,
    pub gps_total: u32,
    pub status_total: u32,

    pub survey_exp_num: u8,
    pub e_exp_num: u8,
    pub b_exp_num: u8,
    pub lowrate_exp_num: u8,
    pub gps_exp_num: u8,

    /// Payload uptime in seconds.
    pub uptime: u32,
    pub total_bytes_out: u32,
    pub bytes_in_memory: u64,
    pub memory_percent_full: f64,
    pub gps_errors: u16,

    /// Burst configuration echoed by the payload.
    pub burst_command: BurstCommand,
    /// Analog front-end configuration echoed by the payload.
    pub bbr_config: BbrConfig,
}

/// Whole-record decode failure; the record is dropped with a warning.
#[derive(Debug, Error)]
pub enum StatusError {
    #[error("frame on channel {0:?} is not a status frame")]
    NotStatus(Channel),

    #[error("status payload of {len} bytes is shorter than the fixed record")]
    TooShort { len: usize },
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// True for status frames requested around a burst (`source == 'B'`).
pub fn is_burst_status(frame: &Frame) -> bool {
    frame.channel == Channel::Status && frame.payload.get(offsets::SOURCE) == Some(&b'B')
}

/// Decode a status frame into a [`StatusRecord`].
pub fn decode_status(frame: &Frame, mapping: SurveyPeriodMapping) -> Result<StatusRecord, StatusError> {
    if frame.channel != Channel::Status {
        return Err(StatusError::NotStatus(frame.channel));
    }
    let data = frame.payload.as_slice();
    if data.len() < offsets::RECORD_LEN {
        return Err(StatusError::TooShort { len: data.len() });
    }

    let prev_command = reversed3(data, offsets::PREV_COMMAND);
    let prev_bbr_command = reversed3(data, offsets::PREV_BBR_COMMAND);
    let prev_burst_command = reversed3(data, offsets::PREV_BURST_COMMAND);

    // System configuration word, byte-reversed like the command echoes.
    let w = u32::from_le_bytes(
        data[offsets::SYSTEM_CONFIG..offsets::SYSTEM_CONFIG + 4]
            .try_into()
            .expect("fixed slice"),
    );

    let bytes_in_memory = 4 * read_u32_le(data, offsets::MEMORY_WORDS) as u64;

    Ok(StatusRecord {
        received_timestamp: frame.received_timestamp,
        source: data[offsets::SOURCE] as char,
        prev_command,
        total_commands: read_u16_le(data, offsets::TOTAL_COMMANDS),

        e_deployer_count: ((w >> 28) & 0xF) as u8,
        b_deployer_count: ((w >> 24) & 0xF) as u8,
        arm_e: (w >> 18) & 1 == 1,
        arm_b: (w >> 17) & 1 == 1,
        gps_enable: (w >> 16) & 1 == 1,
        burst_pulses: ((w >> 8) & 0xFF) as u8,
        survey_period: survey_period(w, mapping),
        e_enable: (w >> 5) & 1 == 1,
        b_enable: (w >> 4) & 1 == 1,
        lowrate_enable: (w >> 3) & 1 == 1,
        gps_resets: (w & 0x7) as u8,

        survey_total: read_u32_le(data, offsets::SURVEY_TOTAL),
        e_total: read_u32_le(data, offsets::E_TOTAL),
        b_total: read_u32_le(data, offsets::B_TOTAL),
        lowrate_total: read_u32_le(data, offsets::LOWRATE_TOTAL),
        gps_total: read_u32_le(data, offsets::GPS_TOTAL),
        status_total: read_u32_le(data, offsets::STATUS_TOTAL),

        survey_exp_num: data[offsets::SURVEY_EXP_NUM],
        e_exp_num: data[offsets::E_EXP_NUM],
        b_exp_num: data[offsets::B_EXP_NUM],
        lowrate_exp_num: data[offsets::LOWRATE_EXP_NUM],
        gps_exp_num: data[offsets::GPS_EXP_NUM],

        uptime: read_u32_le(data, offsets::UPTIME),
        total_bytes_out: read_u32_le(data, offsets::TOTAL_BYTES_OUT),
        bytes_in_memory,
        memory_percent_full: 100.0 * bytes_in_memory as f64 / MEMORY_CAPACITY_BYTES as f64,
        gps_errors: read_u16_le(data, offsets::GPS_ERRORS),

        burst_command: BurstCommand::decode(prev_burst_command),
        bbr_config: decode_bbr_command(prev_bbr_command),
    })
}

fn survey_period(w: u32, mapping: SurveyPeriodMapping) -> u16 {
    match mapping {
        SurveyPeriodMapping::Documented => {
            if (w >> 7) & 1 == 1 {
                4096
            } else if (w >> 6) & 1 == 1 {
                2048
            } else {
                1024
            }
        }
        SurveyPeriodMapping::TopBitsShifted => match (w >> 6) & 0b11 {
            0b00 => 4096,
            0b10 => 2048,
            0b01 => 1024,
            bits => {
                warn!(bits, "undefined survey period selection");
                0
            }
        },
    }
}

/// Three command-echo bytes, stored on the wire in reverse order.
#[inline]
fn reversed3(data: &[u8], offset: usize) -> [u8; 3] {
    [data[offset + 2], data[offset + 1], data[offset]]
}

#[inline]
fn read_u16_le(data: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes(data[offset..offset + 2].try_into().expect("fixed slice"))
}

#[inline]
fn read_u32_le(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes(data[offset..offset + 4].try_into().expect("fixed slice"))
}

// ---------------------------------------------------------------------------
// Display
// ---------------------------------------------------------------------------

impl fmt::Display for StatusRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "---- System Status ----")?;
        writeln!(f, "Received at:      {}", self.received_timestamp)?;
        writeln!(f, "Source:           {}", self.source)?;
        writeln!(f, "Uptime:           {} s", self.uptime)?;
        writeln!(
            f,
            "Last command:     {:02X} {:02X} {:02X}",
            self.prev_command[0], self.prev_command[1], self.prev_command[2]
        )?;
        writeln!(
            f,
            "Burst command:    {:02X} {:02X} {:02X}",
            self.burst_command.raw[0], self.burst_command.raw[1], self.burst_command.raw[2]
        )?;
        writeln!(
            f,
            "uBBR command:     {:02X} {:02X} {:02X}",
            self.bbr_config.raw[0], self.bbr_config.raw[1], self.bbr_config.raw[2]
        )?;
        writeln!(f, "Total commands:   {}", self.total_commands)?;
        writeln!(f, "E/B/LCS enabled:  {}/{}/{}", self.e_enable, self.b_enable, self.lowrate_enable)?;
        writeln!(f, "GPS card enabled: {}", self.gps_enable)?;
        writeln!(
            f,
            "Deployments E/B:  {}/{} (armed {}/{})",
            self.e_deployer_count, self.b_deployer_count, self.arm_e, self.arm_b
        )?;
        writeln!(f, "Survey period:    {}", self.survey_period)?;
        writeln!(f, "Burst pulses:     {}", self.burst_pulses)?;
        writeln!(
            f,
            "Packet totals:    S={} E={} B={} G={} I={} L={}",
            self.survey_total,
            self.e_total,
            self.b_total,
            self.gps_total,
            self.status_total,
            self.lowrate_total
        )?;
        writeln!(
            f,
            "Experiment nums:  S={} E={} B={} G={} L={}",
            self.survey_exp_num, self.e_exp_num, self.b_exp_num, self.gps_exp_num, self.lowrate_exp_num
        )?;
        writeln!(f, "Bytes out:        {}", self.total_bytes_out)?;
        writeln!(
            f,
            "Memory:           {} bytes ({:.2}%)",
            self.bytes_in_memory, self.memory_percent_full
        )?;
        write!(
            f,
            "GPS errors:       {} (restarts {})",
            self.gps_errors, self.gps_resets
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::BurstMode;
    use crate::frame::BusHeader;
    use crate::timebase;

    // -----------------------------------------------------------------------
    // Test helpers
    // -----------------------------------------------------------------------

    fn make_status_frame(payload: Vec<u8>) -> Frame {
        Frame {
            channel: Channel::Status,
            experiment_number: 0,
            start_index: 0,
            payload,
            received_timestamp: timebase::payload_timestamp(100, 0),
            checksum_ok: true,
            header: BusHeader {
                message_length: 534,
                component_id: 34,
                interface_id: 1,
                message_id: 2,
                epoch_seconds: 100,
                nanoseconds: 0,
                reboot_count: 0,
            },
            frame_length: 512,
        }
    }

    /// Payload with a burst-bracket source tag and sane fixed fields.
    fn make_status_payload() -> Vec<u8> {
        let mut p = vec![0u8; offsets::RECORD_LEN];
        // Command echoes are byte-reversed on the wire.
        p[0..3].copy_from_slice(&[0x41, 0x42, 0x43]); // prev command 43 42 41
        p[3] = b'B';
        p[4..7].copy_from_slice(&[0x00, 0x00, 0x80]); // uBBR 80 00 00
        p[12..15].copy_from_slice(&[0x00, 0x80, 0x64]); // burst 64 80 00
        p[16..18].copy_from_slice(&17u16.to_le_bytes());
        p[24..28].copy_from_slice(&1000u32.to_le_bytes()); // survey total
        p[28..32].copy_from_slice(&2000u32.to_le_bytes()); // E total
        p[32..36].copy_from_slice(&3000u32.to_le_bytes()); // B total
        p[36..40].copy_from_slice(&40u32.to_le_bytes()); // low-rate total
        p[40..44].copy_from_slice(&500u32.to_le_bytes()); // GPS total
        p[44..48].copy_from_slice(&60u32.to_le_bytes()); // status total
        p[48] = 9; // GPS exp num
        p[49] = 8; // low-rate exp num
        p[50] = 7; // B exp num
        p[51] = 6; // E exp num
        p[55] = 5; // survey exp num
        p[56..60].copy_from_slice(&86_400u32.to_le_bytes()); // uptime
        p[60..64].copy_from_slice(&123_456u32.to_le_bytes());
        p[64..68].copy_from_slice(&1024u32.to_le_bytes()); // memory words
        p[68..70].copy_from_slice(&3u16.to_le_bytes());
        p
    }

    fn set_system_config(p: &mut [u8], w: u32) {
        p[offsets::SYSTEM_CONFIG..offsets::SYSTEM_CONFIG + 4].copy_from_slice(&w.to_le_bytes());
    }

    // -----------------------------------------------------------------------
    // Decode tests
    // -----------------------------------------------------------------------

    #[test]
    fn test_decode_fixed_fields() {
        let frame = make_status_frame(make_status_payload());
        let s = decode_status(&frame, SurveyPeriodMapping::Documented).unwrap();

        assert_eq!(s.source, 'B');
        assert_eq!(s.prev_command, [0x43, 0x42, 0x41]);
        assert_eq!(s.total_commands, 17);
        assert_eq!(s.survey_total, 1000);
        assert_eq!(s.e_total, 2000);
        assert_eq!(s.b_total, 3000);
        assert_eq!(s.lowrate_total, 40);
        assert_eq!(s.gps_total, 500);
        assert_eq!(s.status_total, 60);
        assert_eq!(s.gps_exp_num, 9);
        assert_eq!(s.lowrate_exp_num, 8);
        assert_eq!(s.b_exp_num, 7);
        assert_eq!(s.e_exp_num, 6);
        assert_eq!(s.survey_exp_num, 5);
        assert_eq!(s.uptime, 86_400);
        assert_eq!(s.total_bytes_out, 123_456);
        assert_eq!(s.bytes_in_memory, 4096);
        assert_eq!(s.gps_errors, 3);
        assert!((s.memory_percent_full - 100.0 * 4096.0 / (128.0 * 1024.0 * 1024.0)).abs() < 1e-12);
    }

    #[test]
    fn test_decode_embedded_commands() {
        let frame = make_status_frame(make_status_payload());
        let s = decode_status(&frame, SurveyPeriodMapping::Documented).unwrap();

        // Burst echo 64 80 00: time domain, continuous, window mode 4,
        // decimation enabled.
        assert_eq!(s.burst_command.raw, [0x64, 0x80, 0x00]);
        match s.burst_command.mode {
            BurstMode::TimeDomain(td) => {
                assert!(!td.windowing);
                assert_eq!(td.window_mode, 4);
                assert!(td.decimate);
            }
            _ => panic!("expected time domain echo"),
        }
        assert_eq!(s.bbr_config.raw, [0x80, 0x00, 0x00]);
    }

    #[test]
    fn test_system_config_bits() {
        let mut p = make_status_payload();
        let mut w: u32 = 0;
        w |= 5 << 28; // E deployer count
        w |= 2 << 24; // B deployer count
        w |= 1 << 18; // arm E
        w |= 1 << 16; // GPS enable
        w |= 12 << 8; // burst pulses
        w |= 1 << 5; // E enable
        w |= 1 << 3; // low-rate enable
        w |= 0x5; // GPS resets
        set_system_config(&mut p, w);

        let s = decode_status(&make_status_frame(p), SurveyPeriodMapping::Documented).unwrap();
        assert_eq!(s.e_deployer_count, 5);
        assert_eq!(s.b_deployer_count, 2);
        assert!(s.arm_e);
        assert!(!s.arm_b);
        assert!(s.gps_enable);
        assert_eq!(s.burst_pulses, 12);
        assert!(s.e_enable);
        assert!(!s.b_enable);
        assert!(s.lowrate_enable);
        assert_eq!(s.gps_resets, 5);
    }

    #[test]
    fn test_survey_period_documented_mapping() {
        let mut p = make_status_payload();
        set_system_config(&mut p, 1 << 7);
        let s = decode_status(&make_status_frame(p.clone()), SurveyPeriodMapping::Documented).unwrap();
        assert_eq!(s.survey_period, 4096);

        set_system_config(&mut p, 1 << 6);
        let s = decode_status(&make_status_frame(p.clone()), SurveyPeriodMapping::Documented).unwrap();
        assert_eq!(s.survey_period, 2048);

        set_system_config(&mut p, 0);
        let s = decode_status(&make_status_frame(p), SurveyPeriodMapping::Documented).unwrap();
        assert_eq!(s.survey_period, 1024);
    }

    #[test]
    fn test_survey_period_shifted_mapping() {
        let mut p = make_status_payload();
        set_system_config(&mut p, 0);
        let s =
            decode_status(&make_status_frame(p.clone()), SurveyPeriodMapping::TopBitsShifted).unwrap();
        assert_eq!(s.survey_period, 4096);

        set_system_config(&mut p, 0b10 << 6);
        let s =
            decode_status(&make_status_frame(p.clone()), SurveyPeriodMapping::TopBitsShifted).unwrap();
        assert_eq!(s.survey_period, 2048);

        set_system_config(&mut p, 0b01 << 6);
        let s =
            decode_status(&make_status_frame(p.clone()), SurveyPeriodMapping::TopBitsShifted).unwrap();
        assert_eq!(s.survey_period, 1024);

        set_system_config(&mut p, 0b11 << 6);
        let s = decode_status(&make_status_frame(p), SurveyPeriodMapping::TopBitsShifted).unwrap();
        assert_eq!(s.survey_period, 0);
    }

    #[test]
    fn test_too_short_record_dropped() {
        let frame = make_status_frame(vec![0u8; 40]);
        assert!(matches!(
            decode_status(&frame, SurveyPeriodMapping::Documented),
            Err(StatusError::TooShort { len: 40 })
        ));
    }

    #[test]
    fn test_wrong_channel_rejected() {
        let mut frame = make_status_frame(make_status_payload());
        frame.channel = Channel::Survey;
        assert!(matches!(
            decode_status(&frame, SurveyPeriodMapping::Documented),
            Err(StatusError::NotStatus(Channel::Survey))
        ));
    }

    #[test]
    fn test_is_burst_status() {
        let frame = make_status_frame(make_status_payload());
        assert!(is_burst_status(&frame));

        let mut p = make_status_payload();
        p[3] = b'G';
        assert!(!is_burst_status(&make_status_frame(p)));
    }

    #[test]
    fn test_display_report() {
        let frame = make_status_frame(make_status_payload());
        let s = decode_status(&frame, SurveyPeriodMapping::Documented).unwrap();
        let report = s.to_string();
        assert!(report.contains("System Status"));
        assert!(report.contains("Uptime:           86400 s"));
        assert!(report.contains("Burst command:    64 80 00"));
    }
}
