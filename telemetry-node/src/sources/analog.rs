//! Analog (ADC) source — spec.md §4.4.

use iltm_tlv::{Sample, SignalDescriptor, SignalKind};

/// Abstracts the ADC per spec.md's "external collaborator specified only
/// at its interface" rule — a real implementation reads a hardware pin, a
/// test implementation returns a fixed or scripted voltage.
pub trait AnalogReader: Send + Sync {
    fn read_volts(&self, pin: u8) -> f32;
}

/// Reads `descriptor`'s configured pin and applies the two-point linear
/// map, stamping the result with `clock_us`.
pub fn sample(descriptor: &SignalDescriptor, reader: &dyn AnalogReader, clock_us: u64) -> Option<Sample> {
    let SignalKind::Analog { pin, val_at_0v, val_at_3v3 } = descriptor.kind else { return None };
    let volts = reader.read_volts(pin);
    let value = SignalKind::scale_analog(volts, val_at_0v, val_at_3v3);
    Some(Sample { timestamp: clock_us, id: descriptor.id, value })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedReader(f32);
    impl AnalogReader for FixedReader {
        fn read_volts(&self, _pin: u8) -> f32 {
            self.0
        }
    }

    #[test]
    fn sample_applies_linear_map() {
        let descriptor = SignalDescriptor {
            id: 9,
            name: "SuspensionFront".into(),
            kind: SignalKind::Analog { pin: 3, val_at_0v: 0.0, val_at_3v3: 100.0 },
        };
        let reader = FixedReader(1.65);
        let s = sample(&descriptor, &reader, 7).unwrap();
        assert!((s.value - 50.0).abs() < 1e-3);
        assert_eq!(s.timestamp, 7);
        assert_eq!(s.id, 9);
    }

    #[test]
    fn non_analog_descriptor_yields_none() {
        let descriptor = SignalDescriptor { id: 1, name: "RPM".into(), kind: SignalKind::Imu };
        let reader = FixedReader(0.0);
        assert!(sample(&descriptor, &reader, 0).is_none());
    }
}
