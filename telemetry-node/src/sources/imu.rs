//! IMU source — spec.md §4.4: a fixed seven-channel emission, not
//! configurable through `canSignals` the way CAN signals are.

use iltm_tlv::Sample;

/// Ids for the seven fixed IMU channels. Chosen from a block reserved for
/// non-CAN sources so they never collide with configured CAN signal ids
/// (which the config loader keeps below 100 by convention).
pub mod ids {
    pub const ACCEL_X: u8 = 100;
    pub const ACCEL_Y: u8 = 101;
    pub const ACCEL_Z: u8 = 102;
    pub const HEADING: u8 = 103;
    pub const PITCH: u8 = 104;
    pub const ROLL: u8 = 105;
    pub const VELOCITY: u8 = 106;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ImuReading {
    pub accel_x: f32,
    pub accel_y: f32,
    pub accel_z: f32,
    pub heading: f32,
    pub pitch: f32,
    pub roll: f32,
    pub velocity: f32,
}

pub fn to_samples(reading: &ImuReading, clock_us: u64) -> [Sample; 7] {
    [
        Sample { timestamp: clock_us, id: ids::ACCEL_X, value: reading.accel_x },
        Sample { timestamp: clock_us, id: ids::ACCEL_Y, value: reading.accel_y },
        Sample { timestamp: clock_us, id: ids::ACCEL_Z, value: reading.accel_z },
        Sample { timestamp: clock_us, id: ids::HEADING, value: reading.heading },
        Sample { timestamp: clock_us, id: ids::PITCH, value: reading.pitch },
        Sample { timestamp: clock_us, id: ids::ROLL, value: reading.roll },
        Sample { timestamp: clock_us, id: ids::VELOCITY, value: reading.velocity },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn to_samples_emits_seven_channels_stamped_together() {
        let reading = ImuReading { accel_x: 1.0, velocity: 20.0, ..Default::default() };
        let samples = to_samples(&reading, 55);
        assert_eq!(samples.len(), 7);
        assert!(samples.iter().all(|s| s.timestamp == 55));
        assert_eq!(samples[0].value, 1.0);
        assert_eq!(samples[6].value, 20.0);
    }
}
