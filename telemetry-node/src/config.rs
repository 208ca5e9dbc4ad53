//! JSON configuration — spec.md §4.7/§6, grounded on
//! `original_source/ILTM_V4/ConfigManager.h`'s `begin`/`load`/`save` split
//! and the teacher's `persistence.rs` load-or-default pattern.
//!
//! Defaults are loaded first; the on-disk JSON then overlays them
//! field-by-field, so a config file missing (or failing to parse) never
//! leaves the module unconfigured — it falls back to the compiled
//! defaults with a warning, exactly as spec.md §7 requires.

use std::collections::HashMap;
use std::path::Path;

use iltm_tlv::{SignalDescriptor, SignalKind};
use serde::{Deserialize, Serialize};
use tracing::warn;

pub type CanMap = HashMap<u16, Vec<SignalDescriptor>>;

#[derive(Debug, Clone, PartialEq)]
pub struct MainConfig {
    pub sample_rate_hz: u16,
    pub telem_rate_hz: u16,
    pub use_nan_for_missing: bool,
    pub ssid: String,
    pub password: String,
    pub host: String,
    pub udp_port: u16,
    pub tcp_port: u16,
    pub lora_address: String,
    pub lora_net_id: String,
    pub lora_band: String,
    pub lora_param: String,
}

impl Default for MainConfig {
    fn default() -> Self {
        Self {
            sample_rate_hz: 100,
            telem_rate_hz: 10,
            use_nan_for_missing: false,
            ssid: String::new(),
            password: String::new(),
            host: "192.168.4.2".into(),
            udp_port: 9000,
            tcp_port: 9001,
            lora_address: "1".into(),
            lora_net_id: "5".into(),
            lora_band: "915000000".into(),
            lora_param: "9,7,1,4".into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub main: MainConfig,
    pub can_map: CanMap,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            main: MainConfig::default(),
            can_map: default_can_map(),
        }
    }
}

/// Compiled-in CAN signal defaults, keyed by `canId` for O(1) per-frame
/// lookup — spec.md §4.7. Grounded on the RPM/wheel-speed entries in
/// `original_source/ILTM_V4/config.h`.
fn default_can_map() -> CanMap {
    let descriptors = vec![
        SignalDescriptor {
            id: 1,
            name: "RPM".into(),
            kind: SignalKind::Can {
                can_id: 0x5F0,
                start_byte: 6,
                length: 2,
                little_endian: false,
                is_signed: false,
                mult: 1.0,
                div: 1.0,
            },
        },
        SignalDescriptor {
            id: 2,
            name: "CoolantTempC".into(),
            kind: SignalKind::Can {
                can_id: 0x5F0,
                start_byte: 0,
                length: 1,
                little_endian: false,
                is_signed: true,
                mult: 1.0,
                div: 1.0,
            },
        },
    ];
    let mut map: CanMap = HashMap::new();
    for d in descriptors {
        if let SignalKind::Can { can_id, .. } = &d.kind {
            map.entry(*can_id).or_default().push(d);
        }
    }
    map
}

// ── On-disk JSON schema (spec.md §6), every field optional so the
// overlay can tell "present" from "absent".

#[derive(Debug, Default, Deserialize, Serialize)]
struct RawConfig {
    main: Option<RawMain>,
    #[serde(rename = "canSignals")]
    can_signals: Option<Vec<RawCanSignal>>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct RawMain {
    #[serde(rename = "sampleRateHz")]
    sample_rate_hz: Option<u16>,
    #[serde(rename = "telemRateHz")]
    telem_rate_hz: Option<u16>,
    #[serde(rename = "useNaNForMissing")]
    use_nan_for_missing: Option<bool>,
    ssid: Option<String>,
    password: Option<String>,
    host: Option<String>,
    #[serde(rename = "udpPort")]
    udp_port: Option<u16>,
    #[serde(rename = "tcpPort")]
    tcp_port: Option<u16>,
    lora_address: Option<String>,
    #[serde(rename = "lora_netId")]
    lora_net_id: Option<String>,
    lora_band: Option<String>,
    lora_param: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
struct RawCanSignal {
    id: u8,
    name: String,
    #[serde(rename = "canId")]
    can_id: u16,
    start: u8,
    len: u8,
    le: bool,
    mult: f32,
    div: f32,
    signed: bool,
}

impl From<RawCanSignal> for SignalDescriptor {
    fn from(raw: RawCanSignal) -> Self {
        SignalDescriptor {
            id: raw.id,
            name: raw.name,
            kind: SignalKind::Can {
                can_id: raw.can_id,
                start_byte: raw.start,
                length: raw.len,
                little_endian: raw.le,
                is_signed: raw.signed,
                mult: raw.mult,
                div: raw.div,
            },
        }
    }
}

fn overlay_main(defaults: MainConfig, raw: Option<RawMain>) -> MainConfig {
    let Some(raw) = raw else { return defaults };
    MainConfig {
        sample_rate_hz: raw.sample_rate_hz.unwrap_or(defaults.sample_rate_hz),
        telem_rate_hz: raw.telem_rate_hz.unwrap_or(defaults.telem_rate_hz),
        use_nan_for_missing: raw.use_nan_for_missing.unwrap_or(defaults.use_nan_for_missing),
        ssid: raw.ssid.unwrap_or(defaults.ssid),
        password: raw.password.unwrap_or(defaults.password),
        host: raw.host.unwrap_or(defaults.host),
        udp_port: raw.udp_port.unwrap_or(defaults.udp_port),
        tcp_port: raw.tcp_port.unwrap_or(defaults.tcp_port),
        lora_address: raw.lora_address.unwrap_or(defaults.lora_address),
        lora_net_id: raw.lora_net_id.unwrap_or(defaults.lora_net_id),
        lora_band: raw.lora_band.unwrap_or(defaults.lora_band),
        lora_param: raw.lora_param.unwrap_or(defaults.lora_param),
    }
}

impl Config {
    /// Never fails the caller: a missing file, a parse error, or an I/O
    /// error all fall back to `Config::default()`, logged at `warn` —
    /// spec.md §7's "config load failures fall back to compiled defaults".
    pub async fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let text = match tokio::fs::read_to_string(path).await {
            Ok(text) => text,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "config file unreadable, using defaults");
                return Config::default();
            }
        };
        let raw: RawConfig = match serde_json::from_str(&text) {
            Ok(raw) => raw,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "config file malformed, using defaults");
                return Config::default();
            }
        };

        let main = overlay_main(MainConfig::default(), raw.main);
        let can_map = match raw.can_signals {
            Some(signals) => {
                let mut map: CanMap = HashMap::new();
                for raw_signal in signals {
                    let can_id = raw_signal.can_id;
                    map.entry(can_id).or_default().push(raw_signal.into());
                }
                map
            }
            None => default_can_map(),
        };

        Config { main, can_map }
    }

    /// Writes the current config back to `path`, compiled-default CAN
    /// signals included — mirrors the firmware writing a defaulted file on
    /// first boot.
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<(), crate::error::TelemetryError> {
        let json = serde_json::to_string_pretty(&RawConfig {
            main: Some(RawMain {
                sample_rate_hz: Some(self.main.sample_rate_hz),
                telem_rate_hz: Some(self.main.telem_rate_hz),
                use_nan_for_missing: Some(self.main.use_nan_for_missing),
                ssid: Some(self.main.ssid.clone()),
                password: Some(self.main.password.clone()),
                host: Some(self.main.host.clone()),
                udp_port: Some(self.main.udp_port),
                tcp_port: Some(self.main.tcp_port),
                lora_address: Some(self.main.lora_address.clone()),
                lora_net_id: Some(self.main.lora_net_id.clone()),
                lora_band: Some(self.main.lora_band.clone()),
                lora_param: Some(self.main.lora_param.clone()),
            }),
            can_signals: None,
        })
        .expect("config serializes");
        tokio::fs::write(path, json).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn load_missing_file_falls_back_to_defaults() {
        let config = Config::load("/nonexistent/path/config.json").await;
        assert_eq!(config.main, MainConfig::default());
    }

    #[tokio::test]
    async fn load_overlays_only_the_fields_present() {
        let dir = std::env::temp_dir().join(format!("iltm-cfg-{:p}", &0u8));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let path = dir.join("config.json");
        tokio::fs::write(&path, r#"{"main":{"udpPort":4242}}"#).await.unwrap();

        let config = Config::load(&path).await;
        assert_eq!(config.main.udp_port, 4242);
        assert_eq!(config.main.sample_rate_hz, MainConfig::default().sample_rate_hz);

        tokio::fs::remove_dir_all(&dir).await.ok();
    }

    #[tokio::test]
    async fn load_malformed_json_falls_back_to_defaults() {
        let dir = std::env::temp_dir().join(format!("iltm-cfg-bad-{:p}", &0u8));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let path = dir.join("config.json");
        tokio::fs::write(&path, "{ not json").await.unwrap();

        let config = Config::load(&path).await;
        assert_eq!(config.main, MainConfig::default());

        tokio::fs::remove_dir_all(&dir).await.ok();
    }

    #[test]
    fn default_can_map_is_keyed_by_can_id() {
        let map = default_can_map();
        assert!(map.contains_key(&0x5F0));
    }
}
