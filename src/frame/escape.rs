//! Byte-stuffing (escape) encoding and removal.
//!
//! The link layer reserves `0x7E` as the frame delimiter. Inside a frame,
//! `0x7E` is transmitted as `0x7D 0x5E` and a literal `0x7D` as `0x7D 0x5D`,
//! so a delimiter byte can only ever mark a frame boundary.

use thiserror::Error;

/// Frame delimiter byte.
pub const SYNC: u8 = 0x7E;
/// Escape lead-in byte.
pub const ESCAPE: u8 = 0x7D;
/// Escaped form of the delimiter (`0x7D 0x5E` → `0x7E`).
pub const ESCAPED_SYNC: u8 = 0x5E;
/// Escaped form of the escape byte itself (`0x7D 0x5D` → `0x7D`).
pub const ESCAPED_ESCAPE: u8 = 0x5D;

/// Malformed escape sequence found while de-escaping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum EscapeError {
    #[error("escape byte at offset {offset} followed by 0x{next:02X}, expected 0x5E or 0x5D")]
    BadTarget { offset: usize, next: u8 },

    #[error("dangling escape byte at offset {offset}")]
    Dangling { offset: usize },
}

/// Escape every reserved byte in `data`.
pub fn escape(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    for &b in data {
        match b {
            SYNC => out.extend_from_slice(&[ESCAPE, ESCAPED_SYNC]),
            ESCAPE => out.extend_from_slice(&[ESCAPE, ESCAPED_ESCAPE]),
            _ => out.push(b),
        }
    }
    out
}

/// Remove byte-stuffing from `data`.
///
/// The output is never longer than the input. A `0x7D` not followed by a
/// valid escape target is an error; literal `0x7E` bytes pass through
/// untouched (the caller has already split the stream on delimiters).
pub fn unescape(data: &[u8]) -> Result<Vec<u8>, EscapeError> {
    let mut out = Vec::with_capacity(data.len());
    let mut i = 0;
    while i < data.len() {
        let b = data[i];
        if b != ESCAPE {
            out.push(b);
            i += 1;
            continue;
        }
        match data.get(i + 1) {
            Some(&ESCAPED_SYNC) => out.push(SYNC),
            Some(&ESCAPED_ESCAPE) => out.push(ESCAPE),
            Some(&next) => return Err(EscapeError::BadTarget { offset: i, next }),
            None => return Err(EscapeError::Dangling { offset: i }),
        }
        i += 2;
    }
    Ok(out)
}
