//! Disciplined global clock — spec.md §4.2, grounded on
//! `original_source/ILTM_V3/NTP_Client.h`.
//!
//! Fuses a local microsecond counter, periodic NTP-style offset exchanges
//! over the radio, and a 1Hz GPS PPS edge. `now_us` never fails and never
//! blocks — a stalled radio or a missing GPS fix only means the clock
//! keeps slewing toward its last known-good target.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::{NaiveDate, NaiveDateTime};
use iltm_tlv::{SyncRequest, SyncResponse};
use tracing::warn;

/// 30-sample moving average window, per spec.md §4.2.
const WINDOW: usize = 30;
/// Responses implying a round-trip delay above this are discarded.
const MAX_DELAY_US: i64 = 500_000;
/// How often `startSync` fires, driven by the caller's run-step loop.
pub const SYNC_INTERVAL_MS: u64 = 2000;
/// A WAITING_RESPONSE exchange older than this is abandoned.
pub const RESPONSE_TIMEOUT_MS: u64 = 900;
/// Slew coefficient applied to the offset residual on every `now_us` call.
const ALPHA: f64 = 0.1;

/// Supplies the latest valid GPS UTC date/time, decoupling PPS discipline
/// from a real GPS/NMEA receiver so it is testable with a fixed instant.
pub trait GpsTimeSource: Send + Sync {
    /// UTC date/time of the most recent valid fix, or `None` if no fix has
    /// been acquired yet.
    fn latest_utc(&self) -> Option<NaiveDateTime>;
}

/// A `GpsTimeSource` that always reports the same instant — used by tests
/// and by callers without a live GPS receiver wired up yet.
pub struct FixedGpsTimeSource(pub NaiveDateTime);

impl GpsTimeSource for FixedGpsTimeSource {
    fn latest_utc(&self) -> Option<NaiveDateTime> {
        Some(self.0)
    }
}

pub struct NoGpsTimeSource;

impl GpsTimeSource for NoGpsTimeSource {
    fn latest_utc(&self) -> Option<NaiveDateTime> {
        None
    }
}

/// The PPS ISR's side of the interrupt-owned cell (spec.md §9): three
/// atomics written by `on_pps_edge`, drained by `read_and_clear` from the
/// run step. No mutex, no allocation — safe to call from an interrupt
/// context.
#[derive(Default)]
pub struct PpsCell {
    last_us: AtomicU64,
    now_us: AtomicU64,
    flag: AtomicBool,
}

impl PpsCell {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called at the PPS rising edge with the local free-running counter
    /// read at that instant.
    pub fn on_pps_edge(&self, local_last_us: u64, local_now_us: u64) {
        self.last_us.store(local_last_us, Ordering::Relaxed);
        self.now_us.store(local_now_us, Ordering::Relaxed);
        self.flag.store(true, Ordering::Release);
    }

    /// Reads and clears the captured edge, if one is pending.
    fn read_and_clear(&self) -> Option<(u64, u64)> {
        if self.flag.swap(false, Ordering::AcqRel) {
            Some((self.last_us.load(Ordering::Relaxed), self.now_us.load(Ordering::Relaxed)))
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SyncState {
    Idle,
    WaitingResponse,
}

struct OffsetFilter {
    window: [i64; WINDOW],
    idx: usize,
    count: usize,
}

impl OffsetFilter {
    fn new() -> Self {
        Self { window: [0; WINDOW], idx: 0, count: 0 }
    }

    fn push(&mut self, offset: i64) -> i64 {
        self.window[self.idx] = offset;
        self.idx = (self.idx + 1) % WINDOW;
        self.count = (self.count + 1).min(WINDOW);
        let sum: i64 = self.window[..self.count].iter().sum();
        sum / self.count as i64
    }

    /// Overwrites every slot with the same value — used when a PPS edge
    /// makes GPS time authoritative over the radio-NTP window.
    fn clamp_to(&mut self, offset: i64) {
        self.window = [offset; WINDOW];
        self.count = WINDOW;
        self.idx = 0;
    }
}

struct ClockInner {
    state: SyncState,
    pkt_id: u32,
    request_time_us: u64,
    filter: OffsetFilter,
    target_offset_us: i64,
    current_offset_us: i64,
    last_corrected_us: u64,
    first_offset_received: bool,
}

/// `nowUs()` never fails; every other operation is either infallible or
/// silently drops a bad response, per spec.md §4.2's failure semantics.
pub struct DisciplinedClock<G: GpsTimeSource> {
    inner: Mutex<ClockInner>,
    pps: PpsCell,
    gps: G,
}

pub struct OffsetSample {
    pub offset_us: i64,
    pub delay_us: i64,
}

/// Computes `{offset, delay}` from the four-timestamp round trip —
/// spec.md §4.2/§8's literal worked example.
pub fn compute_offset(t1: u64, t2: u64, t3: u64, t4: u64) -> OffsetSample {
    let (t1, t2, t3, t4) = (t1 as i64, t2 as i64, t3 as i64, t4 as i64);
    OffsetSample {
        offset_us: ((t2 - t1) + (t3 - t4)) / 2,
        delay_us: (t4 - t1) - (t3 - t2),
    }
}

impl<G: GpsTimeSource> DisciplinedClock<G> {
    pub fn new(gps: G) -> Self {
        Self {
            inner: Mutex::new(ClockInner {
                state: SyncState::Idle,
                pkt_id: 0,
                request_time_us: 0,
                filter: OffsetFilter::new(),
                target_offset_us: 0,
                current_offset_us: 0,
                last_corrected_us: 0,
                first_offset_received: false,
            }),
            pps: PpsCell::new(),
            gps,
        }
    }

    pub fn pps(&self) -> &PpsCell {
        &self.pps
    }

    /// Monotone nondecreasing global microsecond timestamp. `local_us` is
    /// the free-running hardware counter reading at the call site.
    pub fn now_us(&self, local_us: u64) -> u64 {
        let mut inner = self.inner.lock().expect("clock mutex poisoned");
        self.apply_pending_pps_edge(&mut inner, local_us);

        let residual = inner.target_offset_us - inner.current_offset_us;
        inner.current_offset_us += (residual as f64 * ALPHA) as i64;

        let candidate = (local_us as i64 + inner.current_offset_us).max(0) as u64;
        let result = candidate.max(inner.last_corrected_us);
        inner.last_corrected_us = result;
        result
    }

    /// Builds a sync request and transitions IDLE -> WAITING_RESPONSE.
    /// Dropped by the caller if the transport is down — that failure never
    /// reaches this type, per spec.md §4.2.
    pub fn start_sync(&self, local_us: u64) -> SyncRequest {
        let mut inner = self.inner.lock().expect("clock mutex poisoned");
        inner.pkt_id = inner.pkt_id.wrapping_add(1);
        inner.request_time_us = local_us;
        inner.state = SyncState::WaitingResponse;
        SyncRequest { pkt_id: inner.pkt_id, t1: local_us }
    }

    /// Abandons a WAITING_RESPONSE exchange older than `RESPONSE_TIMEOUT_MS`,
    /// returning to IDLE. Call this from the run-step loop alongside
    /// `start_sync`.
    pub fn expire_stale_request(&self, local_us: u64) {
        let mut inner = self.inner.lock().expect("clock mutex poisoned");
        if inner.state == SyncState::WaitingResponse
            && local_us.saturating_sub(inner.request_time_us) > RESPONSE_TIMEOUT_MS * 1000
        {
            inner.state = SyncState::Idle;
        }
    }

    /// Consumes a sync response. A stale `pktId` or a late arrival (caller
    /// already not WAITING_RESPONSE) is dropped silently with a `warn`.
    pub fn handle_sync_response(&self, response: &SyncResponse, local_recv_us: u64) {
        let mut inner = self.inner.lock().expect("clock mutex poisoned");
        if inner.state != SyncState::WaitingResponse {
            warn!(pkt_id = response.pkt_id, "sync response received while idle, dropping");
            return;
        }
        if response.pkt_id != inner.pkt_id {
            warn!(expected = inner.pkt_id, got = response.pkt_id, "stale sync response pkt_id, dropping");
            inner.state = SyncState::Idle;
            return;
        }
        inner.state = SyncState::Idle;

        let sample = compute_offset(response.t1, response.t2, response.t3, local_recv_us);
        if sample.delay_us > MAX_DELAY_US {
            warn!(delay_us = sample.delay_us, "sync round trip delay exceeds bound, discarding sample");
            return;
        }

        let target = inner.filter.push(sample.offset_us);
        inner.target_offset_us = target;
        if !inner.first_offset_received {
            inner.current_offset_us = target;
            inner.first_offset_received = true;
        }
    }

    /// Drains a pending PPS edge (if any) and, when the GPS has a valid
    /// fix, clamps the whole offset window to GPS-derived time — making
    /// PPS authoritative over radio-NTP, per spec.md §4.2.
    fn apply_pending_pps_edge(&self, inner: &mut ClockInner, local_now_us: u64) {
        let Some((_last_us, pps_now_us)) = self.pps.read_and_clear() else { return };
        let Some(utc) = self.gps.latest_utc() else { return };

        let gps_epoch_us = utc.and_utc().timestamp_micros().max(0) as u64;
        let drift_us = local_now_us.saturating_sub(pps_now_us);
        let gps_offset = gps_epoch_us as i64 + drift_us as i64 - local_now_us as i64;

        inner.filter.clamp_to(gps_offset);
        inner.target_offset_us = gps_offset;
        if !inner.first_offset_received {
            inner.current_offset_us = gps_offset;
            inner.first_offset_received = true;
        }
    }
}

/// `timegm`-equivalent UTC-seconds-since-epoch conversion, used by
/// `gps::nmea` to turn a parsed date/time into the instant a
/// `GpsTimeSource` reports.
pub fn ymd_hms_to_utc(year: i32, month: u32, day: u32, hour: u32, min: u32, sec: u32) -> Option<NaiveDateTime> {
    NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(hour, min, sec)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clock() -> DisciplinedClock<NoGpsTimeSource> {
        DisciplinedClock::new(NoGpsTimeSource)
    }

    #[test]
    fn compute_offset_matches_literal_example() {
        let sample = compute_offset(100, 1_000_100, 1_000_200, 300);
        assert_eq!(sample.offset_us, 999_950);
        assert_eq!(sample.delay_us, 100);
    }

    #[test]
    fn now_us_is_nondecreasing_across_calls() {
        let clock = clock();
        let mut prev = 0u64;
        for local in [100u64, 50, 200, 10, 500] {
            let now = clock.now_us(local);
            assert!(now >= prev, "now_us went backward: {now} < {prev}");
            prev = now;
        }
    }

    #[test]
    fn thirty_equal_offsets_converge_target_to_their_average() {
        let clock = clock();
        for _ in 0..30 {
            let req = clock.start_sync(0);
            clock.handle_sync_response(&SyncResponse { pkt_id: req.pkt_id, t1: 0, t2: 500_000, t3: 500_000 }, 0);
        }
        let inner = clock.inner.lock().unwrap();
        assert_eq!(inner.target_offset_us, 500_000);
    }

    #[test]
    fn slew_moves_current_offset_by_alpha_fraction_of_residual() {
        let clock = clock();
        {
            let mut inner = clock.inner.lock().unwrap();
            inner.target_offset_us = 500_000;
            inner.current_offset_us = 0;
        }
        clock.now_us(0);
        let inner = clock.inner.lock().unwrap();
        assert!((inner.current_offset_us - 50_000).abs() < 10, "expected ~50000, got {}", inner.current_offset_us);
    }

    #[test]
    fn stale_pkt_id_is_dropped_and_state_returns_to_idle() {
        let clock = clock();
        clock.start_sync(0);
        clock.handle_sync_response(&SyncResponse { pkt_id: 9999, t1: 0, t2: 10, t3: 10 }, 20);
        let inner = clock.inner.lock().unwrap();
        assert_eq!(inner.state, SyncState::Idle);
        assert!(!inner.first_offset_received);
    }

    #[test]
    fn excessive_delay_is_discarded_but_still_resets_state() {
        let clock = clock();
        let req = clock.start_sync(0);
        clock.handle_sync_response(&SyncResponse { pkt_id: req.pkt_id, t1: 0, t2: 1_000_000, t3: 1_000_000 }, 2_000_000);
        let inner = clock.inner.lock().unwrap();
        assert_eq!(inner.state, SyncState::Idle);
        assert!(!inner.first_offset_received);
    }

    #[test]
    fn pps_edge_with_gps_fix_clamps_offset() {
        let gps_now = ymd_hms_to_utc(2026, 6, 1, 12, 0, 0).unwrap();
        let clock = DisciplinedClock::new(FixedGpsTimeSource(gps_now));
        clock.pps().on_pps_edge(900, 1000);
        let now = clock.now_us(1000);
        assert!(now > 0);
    }

    #[test]
    fn expire_stale_request_returns_to_idle_after_timeout() {
        let clock = clock();
        clock.start_sync(0);
        clock.expire_stale_request(RESPONSE_TIMEOUT_MS * 1000 + 1);
        let inner = clock.inner.lock().unwrap();
        assert_eq!(inner.state, SyncState::Idle);
    }
}
