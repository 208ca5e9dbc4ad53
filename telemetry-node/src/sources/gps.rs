//! GPS source — spec.md §4.4: a fixed five-channel emission, plus a
//! minimal NMEA sentence parser.
//!
//! Grounded in `original_source/ILTM_V3/NTP_Client.h`'s embedded
//! TinyGPSPlus usage: spec.md §4.2 needs "the latest valid GPS date/time"
//! for PPS discipline but never specifies how that's obtained, so this
//! module supplies it — two sentence types (`$GPRMC` for date/time,
//! `$GPGGA` for fix quality), no checksum validation beyond what
//! TinyGPSPlus itself tolerates. A full NMEA parser is out of scope.

use iltm_tlv::Sample;

use crate::clock::{ymd_hms_to_utc, GpsTimeSource};
use chrono::NaiveDateTime;
use std::sync::Mutex;

pub mod ids {
    pub const LAT: u8 = 110;
    pub const LON: u8 = 111;
    pub const HEADING: u8 = 112;
    pub const SPEED: u8 = 113;
    pub const SATS: u8 = 114;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct GpsFix {
    pub lat: f32,
    pub lon: f32,
    pub heading: f32,
    pub speed: f32,
    pub sats: f32,
}

pub fn to_samples(fix: &GpsFix, clock_us: u64) -> [Sample; 5] {
    [
        Sample { timestamp: clock_us, id: ids::LAT, value: fix.lat },
        Sample { timestamp: clock_us, id: ids::LON, value: fix.lon },
        Sample { timestamp: clock_us, id: ids::HEADING, value: fix.heading },
        Sample { timestamp: clock_us, id: ids::SPEED, value: fix.speed },
        Sample { timestamp: clock_us, id: ids::SATS, value: fix.sats },
    ]
}

/// Minimal `$GPRMC`/`$GPGGA` parser: enough fields to produce a `GpsFix`
/// and, from `$GPRMC`, a UTC date/time for PPS discipline.
pub mod nmea {
    use super::*;

    #[derive(Debug, Clone, Copy, Default)]
    pub struct RmcSentence {
        pub utc: Option<NaiveDateTime>,
        pub lat: f32,
        pub lon: f32,
        pub speed_knots: f32,
        pub heading: f32,
    }

    fn field<'a>(fields: &[&'a str], i: usize) -> Option<&'a str> {
        fields.get(i).copied().filter(|s| !s.is_empty())
    }

    /// `ddmm.mmmm,N/S` (or `dddmm.mmmm,E/W`) -> signed decimal degrees.
    fn parse_coord(raw: &str, hemisphere: &str, deg_digits: usize) -> Option<f32> {
        if raw.len() < deg_digits {
            return None;
        }
        let degrees: f32 = raw[..deg_digits].parse().ok()?;
        let minutes: f32 = raw[deg_digits..].parse().ok()?;
        let value = degrees + minutes / 60.0;
        Some(if hemisphere == "S" || hemisphere == "W" { -value } else { value })
    }

    /// Parses a `$GPRMC` sentence (checksum, if present after `*`, is
    /// ignored rather than validated — TinyGPSPlus is similarly lenient).
    pub fn parse_rmc(line: &str) -> Option<RmcSentence> {
        let line = line.split('*').next().unwrap_or(line);
        let fields: Vec<&str> = line.trim().split(',').collect();
        if fields.first().map(|s| s.trim_start_matches('$')) != Some("GPRMC") {
            return None;
        }
        if field(&fields, 2) != Some("A") {
            return None; // void fix
        }

        let time_str = field(&fields, 1)?;
        let date_str = field(&fields, 9)?;
        if time_str.len() < 6 || date_str.len() < 6 {
            return None;
        }
        let (hour, min, sec) = (time_str[0..2].parse().ok()?, time_str[2..4].parse().ok()?, time_str[4..6].parse().ok()?);
        let (day, month, year_2d): (u32, u32, i32) = (date_str[0..2].parse().ok()?, date_str[2..4].parse().ok()?, date_str[4..6].parse().ok()?);
        let utc = ymd_hms_to_utc(2000 + year_2d, month, day, hour, min, sec);

        let lat = parse_coord(field(&fields, 3)?, field(&fields, 4)?, 2);
        let lon = parse_coord(field(&fields, 5)?, field(&fields, 6)?, 3);
        let speed_knots = field(&fields, 7).and_then(|s| s.parse().ok()).unwrap_or(0.0);
        let heading = field(&fields, 8).and_then(|s| s.parse().ok()).unwrap_or(0.0);

        Some(RmcSentence { utc, lat: lat.unwrap_or(0.0), lon: lon.unwrap_or(0.0), speed_knots, heading })
    }

    /// Parses `$GPGGA` for satellite count only — the rest of the fix
    /// comes from `$GPRMC`.
    pub fn parse_gga_sats(line: &str) -> Option<f32> {
        let line = line.split('*').next().unwrap_or(line);
        let fields: Vec<&str> = line.trim().split(',').collect();
        if fields.first().map(|s| s.trim_start_matches('$')) != Some("GPGGA") {
            return None;
        }
        field(&fields, 7)?.parse().ok()
    }
}

/// Bridges the most recently parsed `$GPRMC` fix into the clock's
/// `GpsTimeSource` contract.
#[derive(Default)]
pub struct NmeaTimeSource {
    latest: Mutex<Option<NaiveDateTime>>,
}

impl NmeaTimeSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&self, sentence: &nmea::RmcSentence) {
        if let Some(utc) = sentence.utc {
            *self.latest.lock().expect("gps time mutex poisoned") = Some(utc);
        }
    }
}

impl GpsTimeSource for NmeaTimeSource {
    fn latest_utc(&self) -> Option<NaiveDateTime> {
        *self.latest.lock().expect("gps time mutex poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn to_samples_emits_five_channels() {
        let fix = GpsFix { lat: 33.9, lon: -83.3, ..Default::default() };
        let samples = to_samples(&fix, 1);
        assert_eq!(samples.len(), 5);
        assert_eq!(samples[0].value, 33.9);
    }

    #[test]
    fn parse_rmc_extracts_time_date_and_position() {
        let line = "$GPRMC,123519,A,4807.038,N,01131.000,E,022.4,084.4,230394,003.1,W*6A";
        let sentence = nmea::parse_rmc(line).unwrap();
        assert!(sentence.lat > 48.0 && sentence.lat < 49.0);
        assert!(sentence.lon > 11.0 && sentence.lon < 12.0);
        let utc = sentence.utc.unwrap();
        assert_eq!(utc.format("%Y-%m-%d %H:%M:%S").to_string(), "1994-03-23 12:35:19");
    }

    #[test]
    fn parse_rmc_rejects_void_fix() {
        let line = "$GPRMC,123519,V,,,,,,,230394,,,N*53";
        assert!(nmea::parse_rmc(line).is_none());
    }

    #[test]
    fn parse_gga_extracts_satellite_count() {
        let line = "$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*47";
        assert_eq!(nmea::parse_gga_sats(line), Some(8.0));
    }

    #[test]
    fn nmea_time_source_reports_last_valid_fix() {
        let source = NmeaTimeSource::new();
        assert!(source.latest_utc().is_none());
        let sentence = nmea::parse_rmc("$GPRMC,123519,A,4807.038,N,01131.000,E,022.4,084.4,230394,003.1,W*6A").unwrap();
        source.update(&sentence);
        assert!(source.latest_utc().is_some());
    }
}
