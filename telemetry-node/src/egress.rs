//! Telemetry egress — spec.md §4.6: two independent paths fed from
//! `get_latest_snapshot`, one to a base station over UDP, one fragmented
//! onto the radio link.

use std::collections::HashMap;
use std::time::Duration;

use iltm_tlv::LatestValue;
use tokio::net::UdpSocket;
use tracing::warn;

use crate::bus::SampleBusHandle;
use crate::radio::{SharedRadioGateway, LORA_MAX};

/// `U64` timestamp first, then one `F32` tag per live signal — spec.md
/// §4.6.
pub fn encode_snapshot(now_us: u64, snapshot: &HashMap<u8, LatestValue>) -> Vec<u8> {
    let mut out = Vec::new();
    iltm_tlv::write_u64(0xFF, now_us, &mut out);
    let mut ids: Vec<&u8> = snapshot.keys().collect();
    ids.sort();
    for id in ids {
        iltm_tlv::write_f32(*id, snapshot[id].value, &mut out);
    }
    out
}

/// Periodic UDP send, grounded on the teacher's `uwb_hub.rs` socket setup
/// and `udp_tx.rs`'s "log the error, never crash" send path: a send
/// failure is retried on the next tick, never propagated.
pub async fn udp_task(bus: SampleBusHandle, now_us: impl Fn() -> u64, host: String, port: u16, rate_hz: u16, max_age_us: u64) {
    let socket = match UdpSocket::bind("0.0.0.0:0").await {
        Ok(socket) => socket,
        Err(err) => {
            warn!(error = %err, "failed to bind UDP egress socket, egress disabled");
            return;
        }
    };
    let addr = format!("{host}:{port}");
    let mut interval = tokio::time::interval(period(rate_hz));

    loop {
        interval.tick().await;
        let now = now_us();
        let snapshot = bus.get_latest_snapshot(now, max_age_us).await;
        let packet = encode_snapshot(now, &snapshot);
        if let Err(err) = socket.send_to(&packet, &addr).await {
            warn!(error = %err, addr, "UDP egress send failed, will retry next tick");
        }
    }
}

/// Periodic radio send: same encoding, fragmented onto `LORA_MAX`-byte
/// frames and handed to the gateway's transmit queue.
pub async fn radio_task(bus: SampleBusHandle, now_us: impl Fn() -> u64, gateway: SharedRadioGateway, rate_hz: u16, max_age_us: u64) {
    let mut interval = tokio::time::interval(period(rate_hz));
    loop {
        interval.tick().await;
        let now = now_us();
        let snapshot = bus.get_latest_snapshot(now, max_age_us).await;
        let packet = encode_snapshot(now, &snapshot);
        if let Err(err) = gateway.send(&packet).await {
            warn!(error = %err, max_frame = LORA_MAX, "snapshot failed to fragment for radio, dropping this tick");
        }
    }
}

fn period(rate_hz: u16) -> Duration {
    Duration::from_millis((1000 / rate_hz.max(1)) as u64)
}
