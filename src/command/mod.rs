//! Burst and analog front-end (µBBR) command words.
//!
//! The burst command is a 3-byte field, decoded MSB-first as a 24-bit word:
//! a `01` format tag, a domain select, windowing enable, a 4-bit window
//! mode, then either decimation settings (time domain) or a 16-bit
//! frequency-bin mask (frequency domain). Derived on/off durations come
//! from fixed lookup tables indexed by window mode.
//!
//! The µBBR command shares the 3-byte shape but its bit order is reversed.

use serde::{Deserialize, Serialize};
use tracing::warn;

// ---------------------------------------------------------------------------
// Lookup tables
// ---------------------------------------------------------------------------

/// ADC sample rate the on/off durations are expressed in.
pub const SAMPLE_RATE_HZ: u32 = 80_000;

/// Time-domain samples collected per pulse, by window mode.
pub const TD_SAMPLES_ON: [u32; 16] = [
    800_000, 800_000, 800_000, 800_000, 400_000, 400_000, 400_000, 400_000, 160_000, 160_000,
    160_000, 160_000, 80_000, 80_000, 80_000, 80_000,
];

/// Time-domain samples idled between pulses, by window mode.
pub const TD_SAMPLES_OFF: [u32; 16] = [
    2_400_000, 800_000, 400_000, 160_000, 2_400_000, 800_000, 400_000, 160_000, 2_400_000,
    800_000, 400_000, 160_000, 2_400_000, 800_000, 400_000, 160_000,
];

/// Frequency-domain FFT columns collected per pulse, by window mode.
pub const FD_FFTS_ON: [u32; 16] = [
    1563, 1563, 1563, 1563, 782, 782, 782, 782, 313, 313, 313, 313, 157, 157, 157, 157,
];

/// Frequency-domain FFT columns idled between pulses, by window mode.
pub const FD_FFTS_OFF: [u32; 16] = [
    4688, 1563, 782, 313, 4688, 1563, 782, 313, 4688, 1563, 782, 313, 4688, 1563, 782, 313,
];

/// Downsampling factor by decimation mode.
pub const DECIMATION_FACTORS: [u32; 4] = [2, 4, 8, 16];

/// Samples per non-windowed (continuous) time-domain capture.
pub const TD_CONTINUOUS_SAMPLES_ON: u32 = 30 * SAMPLE_RATE_HZ;

/// FFT columns per non-windowed (continuous) frequency-domain capture.
pub const FD_CONTINUOUS_FFTS_ON: u32 = 4688;

/// FFTs averaged into each frequency-domain segment.
pub const FFT_SEGMENT_LENGTH: u32 = 32;

// ---------------------------------------------------------------------------
// Burst command
// ---------------------------------------------------------------------------

/// Mask over 16 uniformly spaced frequency bins spanning 0–40 kHz.
///
/// Bin 0 (lowest frequency) is the mask's most significant bit, matching
/// the order the bits appear in the command word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinMask(pub u16);

impl BinMask {
    pub const LEN: usize = 16;

    pub fn is_active(&self, bin: usize) -> bool {
        bin < Self::LEN && (self.0 >> (Self::LEN - 1 - bin)) & 1 == 1
    }

    pub fn active_count(&self) -> u32 {
        self.0.count_ones()
    }
}

/// Time-domain capture parameters, durations resolved from the tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeDomainParams {
    pub windowing: bool,
    pub window_mode: u8,
    pub decimate: bool,
    pub decimation_mode: u8,
    pub samples_on: u32,
    pub samples_off: u32,
}

impl TimeDomainParams {
    /// Downsampling factor, when decimation is enabled.
    pub fn decimation_factor(&self) -> Option<u32> {
        self.decimate
            .then(|| DECIMATION_FACTORS[(self.decimation_mode & 0x3) as usize])
    }
}

/// Frequency-domain capture parameters, durations resolved from the tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrequencyDomainParams {
    pub windowing: bool,
    pub window_mode: u8,
    pub bins: BinMask,
    pub ffts_on: u32,
    pub ffts_off: u32,
}

/// Capture domain plus its domain-specific settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BurstMode {
    TimeDomain(TimeDomainParams),
    FrequencyDomain(FrequencyDomainParams),
}

/// One decoded 3-byte burst command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BurstCommand {
    /// Command bytes as echoed on the wire.
    pub raw: [u8; 3],
    pub mode: BurstMode,
}

/// True when the top two command bits carry the `01` format tag.
pub fn is_valid_burst_header(raw: &[u8; 3]) -> bool {
    raw[0] >> 6 == 0b01
}

impl BurstCommand {
    /// Decode a 3-byte burst command.
    ///
    /// A wrong format tag is reported but not fatal; the remaining fields
    /// decode as laid out.
    pub fn decode(raw: [u8; 3]) -> Self {
        if !is_valid_burst_header(&raw) {
            warn!(command = ?raw, "burst command format tag is not 01");
        }
        let v = word24(&raw);

        let time_domain = (v >> 21) & 1 == 1;
        let windowing = (v >> 20) & 1 == 1;
        let window_mode = ((v >> 16) & 0xF) as u8;

        let mode = if time_domain {
            let (samples_on, samples_off) = if windowing {
                (
                    TD_SAMPLES_ON[window_mode as usize],
                    TD_SAMPLES_OFF[window_mode as usize],
                )
            } else {
                (TD_CONTINUOUS_SAMPLES_ON, 0)
            };
            BurstMode::TimeDomain(TimeDomainParams {
                windowing,
                window_mode,
                decimate: (v >> 15) & 1 == 1,
                decimation_mode: ((v >> 13) & 0x3) as u8,
                samples_on,
                samples_off,
            })
        } else {
            let (ffts_on, ffts_off) = if windowing {
                (
                    FD_FFTS_ON[window_mode as usize],
                    FD_FFTS_OFF[window_mode as usize],
                )
            } else {
                (FD_CONTINUOUS_FFTS_ON, 0)
            };
            BurstMode::FrequencyDomain(FrequencyDomainParams {
                windowing,
                window_mode,
                bins: BinMask((v & 0xFFFF) as u16),
                ffts_on,
                ffts_off,
            })
        };

        BurstCommand { raw, mode }
    }

    /// Re-encode the command into its exact 3-byte wire layout.
    pub fn encode(&self) -> [u8; 3] {
        let mut v: u32 = 0b01 << 22;
        match &self.mode {
            BurstMode::TimeDomain(td) => {
                v |= 1 << 21;
                v |= (td.windowing as u32) << 20;
                v |= ((td.window_mode & 0xF) as u32) << 16;
                v |= (td.decimate as u32) << 15;
                v |= ((td.decimation_mode & 0x3) as u32) << 13;
            }
            BurstMode::FrequencyDomain(fd) => {
                v |= (fd.windowing as u32) << 20;
                v |= ((fd.window_mode & 0xF) as u32) << 16;
                v |= fd.bins.0 as u32;
            }
        }
        [(v >> 16) as u8, (v >> 8) as u8, v as u8]
    }
}

#[inline]
fn word24(raw: &[u8; 3]) -> u32 {
    ((raw[0] as u32) << 16) | ((raw[1] as u32) << 8) | raw[2] as u32
}

// ---------------------------------------------------------------------------
// uBBR command
// ---------------------------------------------------------------------------

/// Decoded µBBR analog front-end configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BbrConfig {
    /// Command bytes as echoed on the wire.
    pub raw: [u8; 3],
    /// Calibration tone step.
    pub tone_step: u8,
    pub e_filter: bool,
    pub b_filter: bool,
    pub e_cal: bool,
    pub b_cal: bool,
    pub e_preamp: bool,
    pub b_preamp: bool,
    pub e_reset: bool,
    pub b_reset: bool,
    pub e_gain: bool,
    pub b_gain: bool,
    pub cal_tone: bool,
    pub signal_gen: bool,
    pub tone_type: bool,
}

/// True when the µBBR header bits carry the `01` tag (reversed positions
/// 23 and 22).
pub fn is_valid_bbr_header(raw: &[u8; 3]) -> bool {
    let v = word24(raw);
    (v >> 23) & 1 == 1 && (v >> 22) & 1 == 0
}

/// Decode a 3-byte µBBR command. Bit order is reversed relative to the
/// burst command; header violations are reported, not fatal.
pub fn decode_bbr_command(raw: [u8; 3]) -> BbrConfig {
    if !is_valid_bbr_header(&raw) {
        warn!(command = ?raw, "invalid uBBR command header");
    }
    let v = word24(&raw);
    let bit = |i: u32| (v >> i) & 1 == 1;

    // Tone step: reversed-string positions 1..9, MSB first.
    let mut tone_step = 0u8;
    for k in 0..8 {
        if bit(1 + k) {
            tone_step |= 1 << (7 - k);
        }
    }

    BbrConfig {
        raw,
        tone_step,
        e_filter: bit(21),
        b_filter: bit(20),
        e_cal: bit(19),
        b_cal: bit(18),
        e_preamp: bit(17),
        b_preamp: bit(16),
        e_reset: bit(15),
        b_reset: bit(14),
        e_gain: bit(13),
        b_gain: bit(12),
        cal_tone: bit(11),
        signal_gen: bit(10),
        tone_type: bit(9),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn td_command(
        windowing: bool,
        window_mode: u8,
        decimate: bool,
        decimation_mode: u8,
    ) -> BurstCommand {
        let cmd = BurstCommand {
            raw: [0; 3],
            mode: BurstMode::TimeDomain(TimeDomainParams {
                windowing,
                window_mode,
                decimate,
                decimation_mode,
                samples_on: 0,
                samples_off: 0,
            }),
        };
        BurstCommand::decode(cmd.encode())
    }

    fn fd_command(windowing: bool, window_mode: u8, bins: u16) -> BurstCommand {
        let cmd = BurstCommand {
            raw: [0; 3],
            mode: BurstMode::FrequencyDomain(FrequencyDomainParams {
                windowing,
                window_mode,
                bins: BinMask(bins),
                ffts_on: 0,
                ffts_off: 0,
            }),
        };
        BurstCommand::decode(cmd.encode())
    }

    #[test]
    fn test_decode_time_domain_windowed() {
        // 01 1 1 0101 1 10 ...: TD, windowed, mode 5, decimate, mode 2.
        let raw = [0b0111_0101, 0b1100_0000, 0x00];
        let cmd = BurstCommand::decode(raw);
        match cmd.mode {
            BurstMode::TimeDomain(td) => {
                assert!(td.windowing);
                assert_eq!(td.window_mode, 5);
                assert!(td.decimate);
                assert_eq!(td.decimation_mode, 2);
                assert_eq!(td.samples_on, TD_SAMPLES_ON[5]);
                assert_eq!(td.samples_off, TD_SAMPLES_OFF[5]);
                assert_eq!(td.decimation_factor(), Some(8));
            }
            _ => panic!("expected time domain"),
        }
    }

    #[test]
    fn test_decode_time_domain_continuous() {
        // Windowing off: continuous capture regardless of window mode.
        let raw = [0b0110_0011, 0x00, 0x00];
        let cmd = BurstCommand::decode(raw);
        match cmd.mode {
            BurstMode::TimeDomain(td) => {
                assert!(!td.windowing);
                assert_eq!(td.samples_on, TD_CONTINUOUS_SAMPLES_ON);
                assert_eq!(td.samples_off, 0);
                assert_eq!(td.decimation_factor(), None);
            }
            _ => panic!("expected time domain"),
        }
    }

    #[test]
    fn test_decode_frequency_domain() {
        // 01 0 1 0010, bins = 0xF00F.
        let raw = [0b0101_0010, 0xF0, 0x0F];
        let cmd = BurstCommand::decode(raw);
        match cmd.mode {
            BurstMode::FrequencyDomain(fd) => {
                assert!(fd.windowing);
                assert_eq!(fd.window_mode, 2);
                assert_eq!(fd.bins.0, 0xF00F);
                assert_eq!(fd.bins.active_count(), 8);
                assert_eq!(fd.ffts_on, FD_FFTS_ON[2]);
                assert_eq!(fd.ffts_off, FD_FFTS_OFF[2]);
            }
            _ => panic!("expected frequency domain"),
        }
    }

    #[test]
    fn test_bin_mask_ordering() {
        // Bin 0 is the most significant mask bit.
        let mask = BinMask(0x8001);
        assert!(mask.is_active(0));
        assert!(mask.is_active(15));
        assert!(!mask.is_active(1));
        assert!(!mask.is_active(16));
    }

    #[test]
    fn test_encode_header_tag() {
        let cmd = td_command(true, 0, false, 0);
        assert!(is_valid_burst_header(&cmd.encode()));
    }

    #[test]
    fn test_round_trip_all_time_domain_configs() {
        for window_mode in 0..16u8 {
            for decimation_mode in 0..4u8 {
                for (windowing, decimate) in
                    [(false, false), (true, false), (false, true), (true, true)]
                {
                    let cmd = td_command(windowing, window_mode, decimate, decimation_mode);
                    let rt = BurstCommand::decode(cmd.encode());
                    assert_eq!(rt.mode, cmd.mode);
                    assert_eq!(rt.raw, cmd.encode());
                }
            }
        }
    }

    #[test]
    fn test_round_trip_frequency_domain_configs() {
        for window_mode in 0..16u8 {
            for bins in [0x0000u16, 0xFFFF, 0x8001, 0x00F0, 0x5555] {
                for windowing in [false, true] {
                    let cmd = fd_command(windowing, window_mode, bins);
                    let rt = BurstCommand::decode(cmd.encode());
                    assert_eq!(rt.mode, cmd.mode);
                }
            }
        }
    }

    #[test]
    fn test_invalid_header_still_decodes() {
        // Format tag 11 instead of 01: reported, not fatal.
        let raw = [0b1110_0000, 0x00, 0x00];
        assert!(!is_valid_burst_header(&raw));
        let cmd = BurstCommand::decode(raw);
        assert!(matches!(cmd.mode, BurstMode::TimeDomain(_)));
    }

    #[test]
    fn test_decode_bbr_command() {
        // Header: reversed positions 23=1, 22=0. Flags at reversed 21..9,
        // tone step at reversed 1..9.
        let mut v: u32 = 1 << 23;
        v |= 1 << 21; // E_FILT
        v |= 1 << 18; // B_CAL
        v |= 1 << 13; // E_GAIN
        v |= 1 << 9; // TONETYPE
        // Tone step 0xA5: reversed-string positions 1..9, MSB first.
        for k in 0..8u32 {
            if (0xA5u8 >> (7 - k)) & 1 == 1 {
                v |= 1 << (1 + k);
            }
        }
        let raw = [(v >> 16) as u8, (v >> 8) as u8, v as u8];
        assert!(is_valid_bbr_header(&raw));

        let bbr = decode_bbr_command(raw);
        assert_eq!(bbr.tone_step, 0xA5);
        assert!(bbr.e_filter);
        assert!(!bbr.b_filter);
        assert!(bbr.b_cal);
        assert!(!bbr.e_cal);
        assert!(bbr.e_gain);
        assert!(!bbr.b_gain);
        assert!(bbr.tone_type);
        assert!(!bbr.signal_gen);
        assert!(!bbr.cal_tone);
    }

    #[test]
    fn test_bbr_header_validation() {
        assert!(is_valid_bbr_header(&[0x80, 0, 0]));
        assert!(!is_valid_bbr_header(&[0xC0, 0, 0])); // reversed 22 set
        assert!(!is_valid_bbr_header(&[0x00, 0, 0])); // reversed 23 clear
    }

    #[test]
    fn test_all_zero_bbr_flags() {
        let bbr = decode_bbr_command([0x80, 0, 0]);
        assert_eq!(bbr.tone_step, 0);
        assert!(!bbr.e_filter && !bbr.b_filter && !bbr.e_cal && !bbr.b_cal);
        assert!(!bbr.e_preamp && !bbr.b_preamp && !bbr.e_reset && !bbr.b_reset);
    }

    #[test]
    fn test_lookup_tables_are_consistent() {
        // Windowed durations scale with the documented duty cycles.
        assert_eq!(TD_SAMPLES_ON[0], 10 * SAMPLE_RATE_HZ);
        assert_eq!(TD_SAMPLES_OFF[0], 30 * SAMPLE_RATE_HZ);
        assert_eq!(TD_SAMPLES_ON[15], SAMPLE_RATE_HZ);
        assert_eq!(TD_SAMPLES_OFF[15], 2 * SAMPLE_RATE_HZ);
        assert_eq!(DECIMATION_FACTORS, [2, 4, 8, 16]);
    }
}
