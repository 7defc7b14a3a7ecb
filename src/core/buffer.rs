//! Ordered sample storage
//!
//! Samples are kept as one paired sequence, so distance and force columns
//! always have the same length. Storage is an `Arc<Vec<_>>`: snapshots share
//! it, and an append while a snapshot is alive copies once (copy-on-write),
//! so a consumer never sees a snapshot change under it. Appends stay O(1)
//! amortized only while no snapshot is held, so the streaming path must not
//! keep one alive between appends.

use super::telemetry::Sample;
use std::ops::Deref;
use std::sync::Arc;

/// Append-only buffer of samples in arrival order
#[derive(Debug, Clone, Default)]
pub struct SampleBuffer {
    samples: Arc<Vec<Sample>>,
    peak: Option<Sample>,
}

impl SampleBuffer {
    /// Create an empty buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a sample at the end
    pub fn append(&mut self, sample: Sample) {
        if self.peak.map_or(true, |peak| sample.force > peak.force) {
            self.peak = Some(sample);
        }
        Arc::make_mut(&mut self.samples).push(sample);
    }

    /// Drop all samples. Idempotent.
    pub fn clear(&mut self) {
        self.peak = None;
        if self.samples.is_empty() {
            return;
        }
        match Arc::get_mut(&mut self.samples) {
            Some(samples) => samples.clear(),
            // a snapshot still holds the old data; start a fresh vector
            None => self.samples = Arc::new(Vec::new()),
        }
    }

    /// Point-in-time, read-only view
    pub fn snapshot(&self) -> SampleSnapshot {
        SampleSnapshot {
            samples: Arc::clone(&self.samples),
        }
    }

    /// Number of samples
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Is empty
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Most recent sample
    pub fn last(&self) -> Option<Sample> {
        self.samples.last().copied()
    }

    /// Sample with the largest force; the first one wins a tie
    pub fn peak(&self) -> Option<Sample> {
        self.peak
    }

    #[cfg(test)]
    pub(crate) fn is_shared(&self) -> bool {
        Arc::strong_count(&self.samples) > 1
    }
}

/// Immutable view of the buffer at one instant
#[derive(Debug, Clone, Default)]
pub struct SampleSnapshot {
    samples: Arc<Vec<Sample>>,
}

impl SampleSnapshot {
    /// Distance column
    pub fn distances(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.distance).collect()
    }

    /// Force column
    pub fn forces(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.force).collect()
    }

    /// (distance, force) pairs, e.g. for plotting
    pub fn pairs(&self) -> Vec<(f64, f64)> {
        self.samples.iter().map(|s| (s.distance, s.force)).collect()
    }
}

impl Deref for SampleSnapshot {
    type Target = [Sample];

    fn deref(&self) -> &[Sample] {
        &self.samples
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled(n: usize) -> SampleBuffer {
        let mut buffer = SampleBuffer::new();
        for i in 0..n {
            buffer.append(Sample::new(i as f64, (i * 10) as f64));
        }
        buffer
    }

    #[test]
    fn test_append_snapshot_order() {
        let buffer = filled(100);
        let snap = buffer.snapshot();
        assert_eq!(snap.len(), 100);
        for (i, s) in snap.iter().enumerate() {
            assert_eq!(s.distance, i as f64);
            assert_eq!(s.force, (i * 10) as f64);
        }
    }

    #[test]
    fn test_snapshot_unaffected_by_later_appends() {
        let mut buffer = filled(3);
        let snap = buffer.snapshot();
        buffer.append(Sample::new(99.0, 99.0));
        assert_eq!(snap.len(), 3);
        assert_eq!(buffer.len(), 4);
    }

    #[test]
    fn test_clear_idempotent() {
        let mut buffer = filled(5);
        let held = buffer.snapshot();
        buffer.clear();
        assert!(buffer.snapshot().is_empty());
        buffer.clear();
        assert!(buffer.is_empty());
        assert_eq!(held.len(), 5);

        let mut empty = SampleBuffer::new();
        empty.clear();
        assert!(empty.snapshot().is_empty());
    }

    #[test]
    fn test_columns_match() {
        let snap = filled(4).snapshot();
        assert_eq!(snap.distances(), vec![0.0, 1.0, 2.0, 3.0]);
        assert_eq!(snap.forces(), vec![0.0, 10.0, 20.0, 30.0]);
    }

    #[test]
    fn test_peak_tracks_appends_and_clear() {
        let mut buffer = SampleBuffer::new();
        assert_eq!(buffer.peak(), None);
        buffer.append(Sample::new(0.1, 40.0));
        buffer.append(Sample::new(0.2, 55.0));
        buffer.append(Sample::new(0.3, 55.0));
        buffer.append(Sample::new(0.4, 12.0));
        assert_eq!(buffer.peak(), Some(Sample::new(0.2, 55.0)));

        buffer.clear();
        assert_eq!(buffer.peak(), None);
        buffer.append(Sample::new(0.0, -3.0));
        assert_eq!(buffer.peak(), Some(Sample::new(0.0, -3.0)));
    }

    #[test]
    fn test_append_after_snapshot_released_is_in_place() {
        let mut buffer = filled(3);
        let snap = buffer.snapshot();
        assert!(buffer.is_shared());
        drop(snap);
        buffer.append(Sample::new(3.0, 30.0));
        assert!(!buffer.is_shared());
    }
}
