//! Builders assembling synthetic downlink captures, byte-for-byte in the
//! transmitted layout: bus header, delimited 512-byte frames, escaping,
//! trailing byte count and checksum.
#![allow(dead_code)]

use skylark_rs::frame::{checksum, escape, FRAME_SIZE};

pub const BUS_HEADER_LEN: usize = 26;

/// Survey column sync header.
pub const SURVEY_HEADER: [u8; 4] = [0xCD, 0xAB, 0x21, 0x43];
pub const SURVEY_COLUMN_LEN: usize = 1212;
pub const SURVEY_GPS_OFFSET: usize = 1028;

/// One frame to place in a capture.
#[derive(Clone)]
pub struct FrameSpec {
    pub tag: u8,
    pub exp: u8,
    pub start: u32,
    pub payload: Vec<u8>,
    pub epoch_sec: u32,
}

impl FrameSpec {
    pub fn new(tag: u8, exp: u8, start: u32, payload: Vec<u8>, epoch_sec: u32) -> Self {
        Self {
            tag,
            exp,
            start,
            payload,
            epoch_sec,
        }
    }
}

/// 26-byte bus header carrying the payload-clock timestamp.
pub fn bus_header(epoch_sec: u32, nanoseconds: u32, reboots: u16) -> Vec<u8> {
    let mut h = vec![0u8; BUS_HEADER_LEN];
    h[0..4].copy_from_slice(&534u32.to_be_bytes());
    h[5] = 34; // component id
    h[6] = 1; // interface id
    h[7] = 2; // message id
    h[8..12].copy_from_slice(&epoch_sec.to_be_bytes());
    h[12..16].copy_from_slice(&nanoseconds.to_be_bytes());
    h[16..18].copy_from_slice(&reboots.to_be_bytes());
    h
}

/// One transmitted 512-byte frame, delimiters included.
pub fn frame_window(tag: u8, exp: u8, start: u32, payload: &[u8]) -> Vec<u8> {
    let mut w = vec![0u8; FRAME_SIZE];
    w[0] = 0x7E;
    w[FRAME_SIZE - 1] = 0x7E;
    w[1..5].copy_from_slice(&start.to_be_bytes());
    w[5] = tag;
    w[6] = exp;

    let escaped = escape::escape(payload);
    assert!(escaped.len() <= 499, "escaped payload too long for one frame");
    w[7..7 + escaped.len()].copy_from_slice(&escaped);

    let count = (payload.len() as u16).to_be_bytes();
    let count_escaped = escape::escape(&count);
    assert!(count_escaped.len() <= 3, "double-escaped byte count unsupported");
    w[506..506 + count_escaped.len()].copy_from_slice(&count_escaped);

    let ck = checksum(&w);
    let ck_escaped = escape::escape(&[ck]);
    w[509..509 + ck_escaped.len()].copy_from_slice(&ck_escaped);
    w
}

/// Concatenate `[bus header][frame]` blocks into a raw capture buffer.
pub fn capture(specs: &[FrameSpec]) -> Vec<u8> {
    let mut raw = Vec::new();
    for spec in specs {
        raw.extend(bus_header(spec.epoch_sec, 0, 1));
        raw.extend(frame_window(spec.tag, spec.exp, spec.start, &spec.payload));
    }
    raw
}

/// A full survey column: sync header, interleaved E/B groups, GPS block.
///
/// E bytes take `e_fill`, B bytes `b_fill`; `gps` lands at the start of
/// the trailing sub-block when given.
pub fn survey_column(e_fill: u8, b_fill: u8, gps: Option<&[u8]>) -> Vec<u8> {
    let mut col = vec![0u8; SURVEY_COLUMN_LEN];
    col[..4].copy_from_slice(&SURVEY_HEADER);
    for k in 0..128 {
        for j in 0..4 {
            col[4 + k * 8 + j] = e_fill;
            col[4 + k * 8 + 4 + j] = b_fill;
        }
    }
    if let Some(log) = gps {
        assert!(log.len() <= SURVEY_COLUMN_LEN - SURVEY_GPS_OFFSET - 4);
        col[SURVEY_GPS_OFFSET..SURVEY_GPS_OFFSET + log.len()].copy_from_slice(log);
    }
    col
}

/// Split a reassembly target into frame specs of ≤ 499-byte payloads.
///
/// 499 is the physical payload capacity of a 512-byte frame: payload
/// starts at byte 7 and the trailing byte-count field sits at byte 506,
/// so `frame_window` rejects anything longer (`escaped.len() <= 499`).
pub fn split_into_frames(tag: u8, exp: u8, target: &[u8], t0: u32) -> Vec<FrameSpec> {
    target
        .chunks(499)
        .enumerate()
        .map(|(i, c)| FrameSpec::new(tag, exp, (i * 499) as u32, c.to_vec(), t0 + i as u32))
        .collect()
}

/// Synthetic BESTPOS log.
pub fn bestpos(week: u16, ms: u32, lat: f64, lon: f64, alt: f64) -> Vec<u8> {
    let mut log = vec![0u8; 28 + 72];
    log[0..5].copy_from_slice(&[0xAA, 0x44, 0x12, 0x1C, 0x2A]);
    log[13] = 180;
    log[14..16].copy_from_slice(&week.to_le_bytes());
    log[16..20].copy_from_slice(&ms.to_le_bytes());
    log[20..24].copy_from_slice(&0x0300_0000u32.to_le_bytes());
    log[28..32].copy_from_slice(&0u32.to_le_bytes());
    log[32..36].copy_from_slice(&16u32.to_le_bytes());
    log[36..44].copy_from_slice(&lat.to_le_bytes());
    log[44..52].copy_from_slice(&lon.to_le_bytes());
    log[52..60].copy_from_slice(&alt.to_le_bytes());
    log[28 + 64] = 9;
    log[28 + 65] = 7;
    log
}

/// Status payload echoing `burst_cmd` (natural byte order) with the given
/// pulse count and uptime.
pub fn status_payload(burst_cmd: [u8; 3], pulses: u8, uptime: u32) -> Vec<u8> {
    let mut p = vec![0u8; 70];
    p[3] = b'B';
    p[4..7].copy_from_slice(&[0x00, 0x00, 0x80]); // uBBR echo, reversed
    p[12] = burst_cmd[2];
    p[13] = burst_cmd[1];
    p[14] = burst_cmd[0];
    let w: u32 = (pulses as u32) << 8;
    p[20..24].copy_from_slice(&w.to_le_bytes());
    p[56..60].copy_from_slice(&uptime.to_le_bytes());
    p
}

/// GPS-burst stream: the echoed command, padding, then a BESTPOS log.
pub fn gps_stream(burst_cmd: [u8; 3], log: &[u8]) -> Vec<u8> {
    let mut stream = vec![burst_cmd[2], burst_cmd[1], burst_cmd[0]];
    stream.extend(vec![0u8; 13]);
    stream.extend_from_slice(log);
    stream
}
