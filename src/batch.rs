//! Sample batching: groups decoded samples into delivery batches under a
//! sample-count or time-window trigger.
//!
//! One [`Aggregator`] exists per sensor. Reconfiguring a sensor (mode switch
//! or threshold edit) replaces its aggregator wholesale, discarding any
//! partially accumulated buffer — partial data from an old configuration is
//! never emitted.

use std::time::Duration;

use crate::types::{AccSample, BatchTrigger, EegSample, PpgSample, ProcessedAccSample};

/// Anything carrying a sample timestamp in epoch milliseconds.
///
/// Lets the time-window batcher stay generic over the sample type instead of
/// taking a timestamp-accessor closure per sensor.
pub trait Timestamped {
    fn timestamp_ms(&self) -> i64;
}

impl Timestamped for EegSample {
    fn timestamp_ms(&self) -> i64 {
        self.timestamp_ms
    }
}

impl Timestamped for PpgSample {
    fn timestamp_ms(&self) -> i64 {
        self.timestamp_ms
    }
}

impl Timestamped for AccSample {
    fn timestamp_ms(&self) -> i64 {
        self.timestamp_ms
    }
}

impl Timestamped for ProcessedAccSample {
    fn timestamp_ms(&self) -> i64 {
        self.timestamp_ms
    }
}

/// Fixed-size batching: emits the first `threshold` buffered samples once the
/// buffer reaches the threshold; any surplus stays buffered for the next
/// batch.
#[derive(Debug)]
pub struct CountBatcher<T> {
    threshold: usize,
    buffer: Vec<T>,
}

impl<T> CountBatcher<T> {
    pub fn new(threshold: usize) -> Self {
        Self {
            threshold: threshold.max(1),
            buffer: Vec::new(),
        }
    }

    pub fn push(&mut self, sample: T) -> Option<Vec<T>> {
        self.buffer.push(sample);
        if self.buffer.len() >= self.threshold {
            Some(self.buffer.drain(..self.threshold).collect())
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }
}

/// Time-window batching keyed on sample timestamps, not wall clock.
///
/// The window starts at the first buffered sample's timestamp. A sample whose
/// timestamp is at least `interval` past the window start flushes the whole
/// buffer (that sample included) and becomes the start of the next window.
#[derive(Debug)]
pub struct TimeBatcher<T: Timestamped> {
    interval_ms: i64,
    buffer: Vec<T>,
    window_start_ms: Option<i64>,
}

impl<T: Timestamped> TimeBatcher<T> {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval_ms: interval.as_millis() as i64,
            buffer: Vec::new(),
            window_start_ms: None,
        }
    }

    pub fn push(&mut self, sample: T) -> Option<Vec<T>> {
        let ts = sample.timestamp_ms();
        let start = *self.window_start_ms.get_or_insert(ts);
        self.buffer.push(sample);

        if ts - start >= self.interval_ms {
            self.window_start_ms = Some(ts);
            Some(std::mem::take(&mut self.buffer))
        } else {
            None
        }
    }

    /// Emit whatever is buffered and reset the window. Used when collection
    /// stops so a trailing partial window is not lost.
    pub fn flush(&mut self) -> Option<Vec<T>> {
        self.window_start_ms = None;
        if self.buffer.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.buffer))
        }
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }
}

/// One sensor's batching engine, shaped by the derived [`BatchTrigger`].
#[derive(Debug)]
pub enum Aggregator<T: Timestamped> {
    Count(CountBatcher<T>),
    Time(TimeBatcher<T>),
}

impl<T: Timestamped> Aggregator<T> {
    /// Build a fresh (empty) aggregator for a trigger. Callers replace the
    /// old aggregator with this on any reconfiguration, which is what clears
    /// the buffer.
    pub fn new(trigger: BatchTrigger) -> Self {
        match trigger {
            BatchTrigger::SampleCount(n) => Aggregator::Count(CountBatcher::new(n)),
            BatchTrigger::TimeInterval(interval) => Aggregator::Time(TimeBatcher::new(interval)),
        }
    }

    /// Buffer one sample; returns a completed batch when the trigger fires.
    pub fn push(&mut self, sample: T) -> Option<Vec<T>> {
        match self {
            Aggregator::Count(b) => b.push(sample),
            Aggregator::Time(b) => b.push(sample),
        }
    }

    /// Emit a trailing partial time-window batch, if any. Count mode keeps
    /// its remainder buffered (a short batch would break the size contract).
    pub fn flush(&mut self) -> Option<Vec<T>> {
        match self {
            Aggregator::Count(_) => None,
            Aggregator::Time(b) => b.flush(),
        }
    }

    pub fn buffered(&self) -> usize {
        match self {
            Aggregator::Count(b) => b.len(),
            Aggregator::Time(b) => b.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq)]
    struct Tick(i64);

    impl Timestamped for Tick {
        fn timestamp_ms(&self) -> i64 {
            self.0
        }
    }

    #[test]
    fn count_batcher_emits_exactly_at_threshold() {
        let mut b = CountBatcher::new(5);
        for i in 0..4 {
            assert!(b.push(Tick(i)).is_none());
        }
        let batch = b.push(Tick(4)).expect("threshold sample emits");
        assert_eq!(batch.len(), 5);
        assert_eq!(b.len(), 0);
    }

    #[test]
    fn count_batcher_keeps_surplus() {
        let mut b = CountBatcher::new(3);
        b.push(Tick(0));
        b.push(Tick(1));
        let batch = b.push(Tick(2)).unwrap();
        assert_eq!(batch, vec![Tick(0), Tick(1), Tick(2)]);
        b.push(Tick(3));
        assert_eq!(b.len(), 1);
    }

    #[test]
    fn time_batcher_window_semantics() {
        let t0 = 10_000;
        let interval = Duration::from_secs(1);
        let mut b = TimeBatcher::new(interval);

        assert!(b.push(Tick(t0)).is_none());
        assert!(b.push(Tick(t0 + 500)).is_none());
        let batch = b.push(Tick(t0 + 1000)).expect("third sample closes window");
        assert_eq!(batch.len(), 3);

        // New window starts at the triggering sample's timestamp, not "now":
        // t0+1001 is only 1 ms into it.
        assert!(b.push(Tick(t0 + 1001)).is_none());
        let batch = b.push(Tick(t0 + 2000)).unwrap();
        assert_eq!(batch, vec![Tick(t0 + 1001), Tick(t0 + 2000)]);
    }

    #[test]
    fn time_batcher_flush_returns_partial_window() {
        let mut b = TimeBatcher::new(Duration::from_secs(10));
        b.push(Tick(0));
        b.push(Tick(40));
        assert_eq!(b.flush().unwrap().len(), 2);
        assert!(b.flush().is_none());
        // After a flush the window restarts from the next sample.
        assert!(b.push(Tick(100_000)).is_none());
    }

    #[test]
    fn reconfiguration_discards_buffered_samples() {
        let mut agg = Aggregator::new(BatchTrigger::SampleCount(100));
        for i in 0..42 {
            agg.push(Tick(i));
        }
        assert_eq!(agg.buffered(), 42);
        agg = Aggregator::new(BatchTrigger::TimeInterval(Duration::from_secs(1)));
        assert_eq!(agg.buffered(), 0);
    }

    #[test]
    fn count_mode_flush_is_noop() {
        let mut agg: Aggregator<Tick> = Aggregator::new(BatchTrigger::SampleCount(10));
        agg.push(Tick(1));
        assert!(agg.flush().is_none());
        assert_eq!(agg.buffered(), 1);
    }
}
