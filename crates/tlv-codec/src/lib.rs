//! # iltm-tlv
//!
//! Shared wire types for the on-vehicle telemetry module: the TLV codec used
//! for every off-module packet (UDP, radio) and the data model that flows
//! between the sources, the sample bus, the logger, and the egress paths.
//!
//! This crate has no I/O and no async — it is pure encode/decode/scale logic
//! so it can be unit-tested exhaustively and reused from both the binary and
//! its tests without pulling in tokio.

mod signal;
mod tlv;
mod wire;

pub use signal::{LogRecord, SignalDescriptor, SignalKind, Sample, LatestValue};
pub use tlv::{TlvError, TlvValue, decode, decode_hex_line, bytes_to_hex, hex_to_bytes, split_on_boundaries, write_bool, write_cmd, write_f32, write_name, write_string, write_u16, write_u32, write_u64, write_u8};
pub use wire::{Cmd, SyncRequest, SyncResponse, ids};
