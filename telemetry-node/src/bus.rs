//! Bounded sample ring + live-value table — spec.md §4.3, grounded on
//! `original_source/ILTM_V4/DataBuffer.h`'s `SharedDataBuffer`.
//!
//! One producer context (the sources), one consumer context (the logger),
//! plus occasional readers of the live snapshot (egress). A single
//! `tokio::sync::Mutex` guards both the ring and the live table, acquired
//! with a short timeout so a contended bus degrades to dropped samples
//! instead of stalling a sampling deadline.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use iltm_tlv::{LatestValue, Sample};
use tokio::sync::Mutex;

const CAPACITY: usize = 1024;
const LOCK_TIMEOUT: Duration = Duration::from_millis(10);

struct Ring {
    slots: Vec<Option<Sample>>,
    head: usize,
    tail: usize,
    len: usize,
}

impl Ring {
    fn new(capacity: usize) -> Self {
        Self { slots: vec![None; capacity], head: 0, tail: 0, len: 0 }
    }

    fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Writes at `head`, evicting the oldest entry (advancing `tail`) if
    /// the ring was already full.
    fn push(&mut self, sample: Sample) {
        self.slots[self.head] = Some(sample);
        self.head = (self.head + 1) % self.capacity();
        if self.len == self.capacity() {
            self.tail = (self.tail + 1) % self.capacity();
        } else {
            self.len += 1;
        }
    }

    fn pop(&mut self) -> Option<Sample> {
        if self.len == 0 {
            return None;
        }
        let sample = self.slots[self.tail].take();
        self.tail = (self.tail + 1) % self.capacity();
        self.len -= 1;
        sample
    }

    /// Newest-first walk backward from `head - 1`, without moving `tail`.
    fn peek_recent(&self, n: usize, out: &mut Vec<Sample>) {
        out.clear();
        let count = n.min(self.len);
        let cap = self.capacity();
        for i in 0..count {
            let idx = (self.head + cap - 1 - i) % cap;
            if let Some(sample) = self.slots[idx] {
                out.push(sample);
            }
        }
    }
}

struct BusInner {
    ring: Ring,
    live: HashMap<u8, LatestValue>,
}

pub struct SampleBus {
    inner: Mutex<BusInner>,
}

/// Thin `Arc` newtype so call sites read as method calls on a value
/// instead of threading an explicit `Arc<SampleBus>` clone everywhere —
/// mirrors the teacher's `Arc<RwLock<RaceState>>` sharing convention.
#[derive(Clone)]
pub struct SampleBusHandle(Arc<SampleBus>);

impl SampleBusHandle {
    pub fn new() -> Self {
        Self(Arc::new(SampleBus::new(CAPACITY)))
    }
}

impl Default for SampleBusHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl std::ops::Deref for SampleBusHandle {
    type Target = SampleBus;
    fn deref(&self) -> &SampleBus {
        &self.0
    }
}

impl SampleBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(BusInner { ring: Ring::new(capacity), live: HashMap::new() }),
        }
    }

    /// Returns `false` on lock timeout (dropped sample) — spec.md §4.3.
    /// The ring never reports "full": on overflow the oldest entry is
    /// silently evicted.
    pub async fn push(&self, sample: Sample) -> bool {
        let Ok(mut inner) = tokio::time::timeout(LOCK_TIMEOUT, self.inner.lock()).await else {
            return false;
        };
        inner.ring.push(sample);
        inner.live.insert(sample.id, LatestValue { value: sample.value, timestamp: sample.timestamp });
        true
    }

    /// `false` when the ring is empty.
    pub async fn pop(&self) -> Option<Sample> {
        let Ok(mut inner) = tokio::time::timeout(LOCK_TIMEOUT, self.inner.lock()).await else {
            return None;
        };
        inner.ring.pop()
    }

    pub async fn peek_recent(&self, n: usize) -> Vec<Sample> {
        let Ok(inner) = tokio::time::timeout(LOCK_TIMEOUT, self.inner.lock()).await else {
            return Vec::new();
        };
        let mut out = Vec::new();
        inner.ring.peek_recent(n, &mut out);
        out
    }

    /// Entries whose timestamp is within `max_age_us` of `now_us` — stale
    /// signals are excluded so "missing" is distinguishable from
    /// "present but old".
    pub async fn get_latest_snapshot(&self, now_us: u64, max_age_us: u64) -> HashMap<u8, LatestValue> {
        let Ok(inner) = tokio::time::timeout(LOCK_TIMEOUT, self.inner.lock()).await else {
            return HashMap::new();
        };
        inner
            .live
            .iter()
            .filter(|(_, v)| now_us.saturating_sub(v.timestamp) < max_age_us)
            .map(|(id, v)| (*id, *v))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(id: u8, ts: u64) -> Sample {
        Sample { timestamp: ts, id, value: ts as f32 }
    }

    #[tokio::test]
    async fn pop_returns_pushes_in_order_when_no_overflow() {
        let bus = SampleBus::new(4);
        for i in 0..4u64 {
            assert!(bus.push(sample(1, i)).await);
        }
        for i in 0..4u64 {
            assert_eq!(bus.pop().await.unwrap().timestamp, i);
        }
        assert!(bus.pop().await.is_none());
    }

    #[tokio::test]
    async fn overflow_evicts_oldest_and_head_writes_always_succeed() {
        let bus = SampleBus::new(2);
        assert!(bus.push(sample(1, 1)).await);
        assert!(bus.push(sample(1, 2)).await);
        assert!(bus.push(sample(1, 3)).await); // evicts ts=1
        assert_eq!(bus.pop().await.unwrap().timestamp, 2);
        assert_eq!(bus.pop().await.unwrap().timestamp, 3);
    }

    #[tokio::test]
    async fn peek_recent_is_newest_first_and_does_not_consume() {
        let bus = SampleBus::new(4);
        for i in 0..3u64 {
            bus.push(sample(1, i)).await;
        }
        let recent = bus.peek_recent(2).await;
        assert_eq!(recent.iter().map(|s| s.timestamp).collect::<Vec<_>>(), vec![2, 1]);
        assert_eq!(bus.pop().await.unwrap().timestamp, 0); // tail untouched by peek
    }

    #[tokio::test]
    async fn snapshot_excludes_entries_older_than_max_age() {
        let bus = SampleBus::new(4);
        bus.push(sample(1, 0)).await;
        bus.push(sample(2, 90)).await;
        let snapshot = bus.get_latest_snapshot(100, 50).await;
        assert!(!snapshot.contains_key(&1));
        assert!(snapshot.contains_key(&2));
    }

    #[tokio::test]
    async fn push_updates_live_table_to_most_recent_value() {
        let bus = SampleBus::new(4);
        bus.push(sample(1, 10)).await;
        bus.push(sample(1, 20)).await;
        let snapshot = bus.get_latest_snapshot(20, 1000).await;
        assert_eq!(snapshot[&1].timestamp, 20);
    }
}
