// ── Fixed-capacity sample ring ──
//
// Decouples the irregular hardware arrival rate from the predictor's
// fixed cadence. A single monotonic write cursor (never reset) addresses
// slots modulo the capacity; the lock is held only for O(1) slot copies
// or a bounded backward walk, so the writer and the reader never contend
// for long.

use std::sync::RwLock;
use std::time::{Duration, Instant};

use crate::error::CoreError;
use crate::model::TimestampedSample;

struct Inner {
    slots: Vec<Option<TimestampedSample>>,
    /// Total pushes ever. Slot index = `cursor % capacity`.
    cursor: u64,
}

/// Ring buffer of timestamped samples with a fixed capacity.
///
/// Once more than `capacity` samples have been pushed, the oldest are
/// unrecoverable -- at most `capacity` samples are ever retrievable.
pub struct SampleRing {
    inner: RwLock<Inner>,
    capacity: usize,
}

impl SampleRing {
    /// Create a ring with the given capacity. `capacity` must be nonzero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "SampleRing capacity must be nonzero");
        Self {
            inner: RwLock::new(Inner {
                slots: vec![None; capacity],
                cursor: 0,
            }),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append a sample. O(1), never blocks on a reader for more than a
    /// slot copy, never fails.
    pub fn push(&self, sample: TimestampedSample) {
        let mut inner = self.inner.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        let idx = usize::try_from(inner.cursor % self.capacity_u64()).unwrap_or(0);
        inner.slots[idx] = Some(sample);
        inner.cursor += 1;
    }

    /// True until the first `push`.
    pub fn is_empty(&self) -> bool {
        self.read().cursor == 0
    }

    /// Total samples ever pushed (not capped at capacity).
    pub fn pushed(&self) -> u64 {
        self.read().cursor
    }

    /// The `min(k, capacity)` most recently written values, newest first.
    /// Slots never written (ring not yet full) yield `None` placeholders.
    pub fn newest(&self, k: usize) -> Vec<Option<TimestampedSample>> {
        let inner = self.read();
        let k = k.min(self.capacity);
        let mut out = Vec::with_capacity(k);
        for i in 0..k {
            let i_u64 = i as u64;
            if i_u64 < inner.cursor {
                let idx = self.slot_index(inner.cursor - 1 - i_u64);
                out.push(inner.slots[idx].clone());
            } else {
                out.push(None);
            }
        }
        out
    }

    /// Exactly `count` samples evenly subsampled across the samples that
    /// fall within `window` of now, oldest to newest.
    ///
    /// Fails with [`CoreError::InsufficientData`] when fewer than `count`
    /// in-window samples exist -- never a short result.
    pub fn series(
        &self,
        window: Duration,
        count: usize,
    ) -> Result<Vec<TimestampedSample>, CoreError> {
        self.series_at(Instant::now(), window, count)
    }

    /// `series` against an explicit "now". Split out for deterministic
    /// tests.
    pub fn series_at(
        &self,
        now: Instant,
        window: Duration,
        count: usize,
    ) -> Result<Vec<TimestampedSample>, CoreError> {
        let inner = self.read();

        // Walk backward from the newest sample, newest first, stopping
        // at the capacity bound or the first sample older than the
        // window.
        let walk_len = usize::try_from(inner.cursor.min(self.capacity_u64())).unwrap_or(0);
        let mut found: Vec<TimestampedSample> = Vec::new();
        for i in 0..walk_len {
            let idx = self.slot_index(inner.cursor - 1 - i as u64);
            let Some(sample) = inner.slots[idx].as_ref() else {
                break;
            };
            if now.saturating_duration_since(sample.timestamp) > window {
                break;
            }
            found.push(sample.clone());
        }
        drop(inner);

        if found.len() < count {
            return Err(CoreError::InsufficientData {
                requested: count,
                found: found.len(),
            });
        }
        if count == 0 {
            return Ok(Vec::new());
        }

        // Oldest first, then pick `count` evenly spaced indices.
        found.reverse();
        let step = found.len() as f64 / count as f64;
        let series = (0..count)
            .filter_map(|i| {
                let offset = (i as f64 * step).floor() as usize;
                found.get(offset).cloned()
            })
            .collect::<Vec<_>>();

        debug_assert_eq!(series.len(), count);
        Ok(series)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn slot_index(&self, cursor_pos: u64) -> usize {
        usize::try_from(cursor_pos % self.capacity_u64()).unwrap_or(0)
    }

    fn capacity_u64(&self) -> u64 {
        self.capacity as u64
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::Vector;

    fn sample(v: f64, age: Duration, now: Instant) -> TimestampedSample {
        TimestampedSample::at(Vector::new(vec![v]), now - age)
    }

    fn value(s: &TimestampedSample) -> f64 {
        s.value.get(0).unwrap()
    }

    #[test]
    fn empty_until_first_push() {
        let ring = SampleRing::new(4);
        assert!(ring.is_empty());
        ring.push(TimestampedSample::now(Vector::accel(0.0, 0.0, 0.0)));
        assert!(!ring.is_empty());
    }

    #[test]
    fn newest_returns_placeholders_before_full() {
        let ring = SampleRing::new(4);
        let now = Instant::now();
        ring.push(sample(1.0, Duration::ZERO, now));

        let newest = ring.newest(3);
        assert_eq!(newest.len(), 3);
        assert_eq!(value(newest[0].as_ref().unwrap()), 1.0);
        assert!(newest[1].is_none());
        assert!(newest[2].is_none());
    }

    #[test]
    fn overwrite_keeps_only_latest_capacity_samples() {
        let ring = SampleRing::new(3);
        let now = Instant::now();
        for v in 1..=5 {
            ring.push(sample(f64::from(v), Duration::ZERO, now));
        }

        // k capped at capacity; newest first; 1.0 and 2.0 unrecoverable.
        let newest = ring.newest(5);
        assert_eq!(newest.len(), 3);
        let values: Vec<f64> = newest.iter().map(|s| value(s.as_ref().unwrap())).collect();
        assert_eq!(values, vec![5.0, 4.0, 3.0]);
        assert_eq!(ring.pushed(), 5);
    }

    #[test]
    fn series_fails_with_insufficient_data() {
        let ring = SampleRing::new(8);
        let now = Instant::now();
        for v in 0..3 {
            ring.push(sample(f64::from(v), Duration::from_millis(10 * (3 - v) as u64), now));
        }

        let err = ring.series_at(now, Duration::from_secs(1), 4).unwrap_err();
        assert!(matches!(
            err,
            CoreError::InsufficientData { requested: 4, found: 3 }
        ));
    }

    #[test]
    fn series_excludes_samples_outside_window() {
        let ring = SampleRing::new(8);
        let now = Instant::now();
        // Two stale samples, then three fresh ones.
        ring.push(sample(-2.0, Duration::from_secs(10), now));
        ring.push(sample(-1.0, Duration::from_secs(9), now));
        for v in 0..3 {
            ring.push(sample(f64::from(v), Duration::from_millis(50 - 10 * v as u64), now));
        }

        let err = ring.series_at(now, Duration::from_millis(100), 4).unwrap_err();
        assert!(matches!(err, CoreError::InsufficientData { found: 3, .. }));

        let ok = ring.series_at(now, Duration::from_millis(100), 3).unwrap();
        let values: Vec<f64> = ok.iter().map(value).collect();
        assert_eq!(values, vec![0.0, 1.0, 2.0]);
    }

    #[test]
    fn series_subsamples_exactly_count_oldest_to_newest() {
        let ring = SampleRing::new(16);
        let now = Instant::now();
        for v in 0..10 {
            ring.push(sample(f64::from(v), Duration::from_millis(100 - 10 * v as u64), now));
        }

        // step = 10/4 = 2.5 -> offsets 0, 2, 5, 7
        let series = ring.series_at(now, Duration::from_secs(1), 4).unwrap();
        let values: Vec<f64> = series.iter().map(value).collect();
        assert_eq!(values, vec![0.0, 2.0, 5.0, 7.0]);

        // Timestamps strictly increase.
        assert!(series.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    }

    #[test]
    fn series_with_count_equal_to_found_returns_all() {
        let ring = SampleRing::new(8);
        let now = Instant::now();
        for v in 0..5 {
            ring.push(sample(f64::from(v), Duration::from_millis(50 - 10 * v as u64), now));
        }

        let series = ring.series_at(now, Duration::from_secs(1), 5).unwrap();
        let values: Vec<f64> = series.iter().map(value).collect();
        assert_eq!(values, vec![0.0, 1.0, 2.0, 3.0, 4.0]);
    }
}
