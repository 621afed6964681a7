//! SKYLARK-RS: Telemetry decoding engine for the Skylark VLF payload
//!
//! Reconstructs science and status products from the payload's raw
//! downlinked byte stream: frame synchronization and de-escaping, checksum
//! verification, command/status bit-field decoding, embedded GPS log
//! decoding, and multi-strategy reassembly of survey spectra and burst
//! captures. Tolerates missing, duplicated, and out-of-order frames.
//!
//! The engine performs no I/O of its own; feed capture bytes to
//! [`pipeline::Decoder::decode_pass`] and consume the returned products.

pub mod burst;
pub mod command;
pub mod config;
pub mod frame;
pub mod gps;
pub mod pipeline;
pub mod sparse;
pub mod status;
pub mod survey;
pub mod timebase;

pub use burst::{BurstConfig, BurstProduct, BurstSamples, FdBin, FdCountVariant};
pub use command::{BbrConfig, BinMask, BurstCommand, BurstMode};
pub use config::{DecoderConfig, GroupingMode};
pub use frame::{Channel, Frame};
pub use gps::GpsFix;
pub use pipeline::{CarryOver, DecodeCounts, DecodeOutput, Decoder};
pub use status::StatusRecord;
pub use survey::SurveyProduct;
