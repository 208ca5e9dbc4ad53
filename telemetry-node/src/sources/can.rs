//! CAN source — spec.md §4.4, literal example in §8.

use iltm_tlv::{Sample, SignalKind};
use tracing::warn;

use crate::config::CanMap;

#[derive(Debug, Clone, Copy)]
pub struct CanFrame {
    pub can_id: u16,
    pub data: [u8; 8],
}

/// Extracts `length` bytes at `start_byte` honoring the configured
/// endianness, sign-extends if `is_signed`, then applies `raw * mult / div`.
/// `None` if `start_byte`/`length` run past the 8-byte frame — the
/// per-field config schema (`start: u8`, `len: u8`) doesn't itself rule
/// that out, so it's checked here rather than assumed.
fn extract_and_scale(data: &[u8; 8], start_byte: u8, length: u8, little_endian: bool, is_signed: bool, mult: f32, div: f32) -> Option<f32> {
    let start = start_byte as usize;
    let len = length as usize;
    let bytes = data.get(start..start + len)?;

    let mut raw_u: u32 = 0;
    if little_endian {
        for (i, &b) in bytes.iter().enumerate() {
            raw_u |= (b as u32) << (8 * i);
        }
    } else {
        for &b in bytes {
            raw_u = (raw_u << 8) | b as u32;
        }
    }

    let raw: i32 = if is_signed {
        match len {
            1 => (raw_u as u8) as i8 as i32,
            2 => (raw_u as u16) as i16 as i32,
            _ => raw_u as i32,
        }
    } else {
        raw_u as i32
    };

    Some(SignalKind::scale_can(raw, mult, div))
}

/// Decodes every descriptor configured for `frame.can_id`, stamping each
/// resulting `Sample` with `clock_us` — the instant of decode. A
/// descriptor whose `start_byte`/`length` don't fit in the 8-byte frame
/// is skipped with a `warn`, not a panic.
pub fn decode_frame(frame: &CanFrame, can_map: &CanMap, clock_us: u64) -> Vec<Sample> {
    let Some(descriptors) = can_map.get(&frame.can_id) else { return Vec::new() };
    descriptors
        .iter()
        .filter_map(|descriptor| match &descriptor.kind {
            SignalKind::Can { start_byte, length, little_endian, is_signed, mult, div, .. } => {
                match extract_and_scale(&frame.data, *start_byte, *length, *little_endian, *is_signed, *mult, *div) {
                    Some(value) => Some(Sample { timestamp: clock_us, id: descriptor.id, value }),
                    None => {
                        warn!(id = descriptor.id, start_byte, length, "CAN signal range exceeds frame bounds, dropping");
                        None
                    }
                }
            }
            _ => None,
        })
        .collect()
}
