//! Data model shared by the sources, the sample bus, the logger, and egress.
//!
//! `SignalDescriptor` is modeled as an enum-tagged struct rather than the
//! flat, kind-conditional struct spec.md describes, so a CAN descriptor
//! cannot be constructed without its CAN-only fields — the config loader
//! (which does parse the flat on-disk JSON schema) is the only place that
//! bridges the two shapes.

use bytemuck::{Pod, Zeroable};

/// One measured quantity, as configured.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalDescriptor {
    pub id: u8,
    pub name: String,
    pub kind: SignalKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SignalKind {
    Can {
        can_id: u16,
        start_byte: u8,
        /// 1 or 2 bytes.
        length: u8,
        little_endian: bool,
        is_signed: bool,
        mult: f32,
        /// Nonzero.
        div: f32,
    },
    Analog {
        pin: u8,
        val_at_0v: f32,
        val_at_3v3: f32,
    },
    Imu,
    Gps,
}

impl SignalKind {
    /// `scaled = raw * mult / div` — spec.md §3's CAN scaling invariant.
    pub fn scale_can(raw: i32, mult: f32, div: f32) -> f32 {
        raw as f32 * mult / div
    }

    /// Two-point linear interpolation between the 0V and 3.3V readings —
    /// spec.md §4.4's analog scaling rule.
    pub fn scale_analog(adc_volts: f32, val_at_0v: f32, val_at_3v3: f32) -> f32 {
        val_at_0v + (adc_volts / 3.3) * (val_at_3v3 - val_at_0v)
    }
}

/// One timestamped, scaled measurement — the unit of work for the bus, the
/// logger, and egress.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    /// Microseconds since epoch, from the disciplined clock.
    pub timestamp: u64,
    pub id: u8,
    pub value: f32,
}

/// Most recent value seen for one signal id, kept in the bus's live table.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LatestValue {
    pub value: f32,
    pub timestamp: u64,
}

/// On-disk packed record: `<u32 timestamp_ms><u8 id><f32 value>`, 9 bytes,
/// no padding — spec.md §6's literal log file format. `repr(C, packed)`
/// plus `bytemuck::Pod` lets the logger write a whole flushed block with one
/// `cast_slice` call instead of per-field byte shuffling, the Rust
/// equivalent of the firmware's single
/// `logFile.write((uint8_t*)writeCache, ...)` call.
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct LogRecord {
    pub timestamp_ms: u32,
    pub id: u8,
    pub value: f32,
}

impl LogRecord {
    /// Narrows a `Sample`'s microsecond timestamp to the on-disk
    /// millisecond field. This is a lossy, one-way conversion — the bus and
    /// the egress paths keep the full-precision microsecond `Sample`.
    pub fn from_sample(sample: &Sample) -> Self {
        Self {
            timestamp_ms: (sample.timestamp / 1000) as u32,
            id: sample.id,
            value: sample.value,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_record_is_nine_bytes_with_no_padding() {
        assert_eq!(std::mem::size_of::<LogRecord>(), 9);
    }

    #[test]
    fn log_record_round_trips_through_bytes() {
        let sample = Sample { timestamp: 6_001_500, id: 0x2A, value: 6000.0 };
        let record = LogRecord::from_sample(&sample);
        let bytes = bytemuck::bytes_of(&record);
        let back: LogRecord = *bytemuck::from_bytes(bytes);
        assert_eq!({ back.timestamp_ms }, 6001);
        assert_eq!({ back.id }, 0x2A);
        assert_eq!({ back.value }, 6000.0);
    }

    #[test]
    fn can_scaling_matches_literal_example() {
        // canId=0x5F0, startByte=6, len=2, BE, mult=1, div=1 -> raw=0x1770=6000
        let scaled = SignalKind::scale_can(0x1770, 1.0, 1.0);
        assert_eq!(scaled, 6000.0);
    }

    #[test]
    fn analog_scaling_interpolates_linearly() {
        let v = SignalKind::scale_analog(1.65, 0.0, 100.0);
        assert!((v - 50.0).abs() < 1e-3);
    }
}
