//! Transmit credit tracking
//!
//! One counter per stream, bounded by the enqueue depth. Transport
//! completions release credits from their own context; the coordinator
//! is the only consumer. `acquire_all` is the cross-stream barrier: it
//! returns only once every stream has given up one credit.

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::error::PipelineError;

/// Per-stream credit counters with blocking acquisition
pub struct CreditTracker {
    credits: Vec<AtomicUsize>,
    depth: usize,
    /// Guards the sleep/wake handshake only; counters are atomics
    lock: Mutex<()>,
    available: Condvar,
    closed: AtomicBool,
    saturated_releases: AtomicU64,
    cycles: AtomicU64,
}

impl CreditTracker {
    /// Create counters for `stream_count` streams, all starting at zero
    pub fn new(stream_count: usize, depth: usize) -> Self {
        Self {
            credits: (0..stream_count).map(|_| AtomicUsize::new(0)).collect(),
            depth,
            lock: Mutex::new(()),
            available: Condvar::new(),
            closed: AtomicBool::new(false),
            saturated_releases: AtomicU64::new(0),
            cycles: AtomicU64::new(0),
        }
    }

    pub fn stream_count(&self) -> usize {
        self.credits.len()
    }

    /// Maximum credits a stream can hold
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Credits currently held by a stream
    pub fn available(&self, stream: usize) -> usize {
        self.credits
            .get(stream)
            .map(|c| c.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    /// Return one credit to a stream. Non-blocking apart from the brief
    /// wake-up handshake; a release on a full counter is discarded.
    pub fn release(&self, stream: usize) -> bool {
        let Some(counter) = self.credits.get(stream) else {
            tracing::warn!("Credit release for unknown stream {}", stream);
            return false;
        };

        let depth = self.depth;
        let granted = counter
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| {
                (c < depth).then_some(c + 1)
            })
            .is_ok();

        if !granted {
            self.saturated_releases.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(stream, depth, "Credit release on full counter ignored");
            return false;
        }

        let _guard = self.lock.lock();
        self.available.notify_all();
        true
    }

    /// Fill every stream up to the enqueue depth. Called once by the
    /// application after the transport streams have started.
    pub fn seed(&self) {
        for stream in 0..self.credits.len() {
            for _ in 0..self.depth {
                self.release(stream);
            }
        }
        tracing::debug!(depth = self.depth, "Seeded transmit credits");
    }

    fn try_take(&self, stream: usize) -> bool {
        self.credits[stream]
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| c.checked_sub(1))
            .is_ok()
    }

    /// Block until `stream` has a credit, then consume it
    pub fn acquire(&self, stream: usize) -> Result<(), PipelineError> {
        if stream >= self.credits.len() {
            return Err(PipelineError::StreamCountMismatch {
                expected: self.credits.len(),
                actual: stream + 1,
            });
        }

        loop {
            if self.closed.load(Ordering::Acquire) {
                return Err(PipelineError::Stopped);
            }
            if self.try_take(stream) {
                return Ok(());
            }

            let mut guard = self.lock.lock();
            // Re-check under the lock so a release between the attempt
            // above and the wait cannot be missed
            if self.closed.load(Ordering::Acquire) {
                return Err(PipelineError::Stopped);
            }
            if self.available(stream) > 0 {
                continue;
            }
            self.available.wait(&mut guard);
        }
    }

    /// Take one credit from every stream in index order, waiting as long
    /// as any stream has none
    pub fn acquire_all(&self) -> Result<(), PipelineError> {
        for stream in 0..self.credits.len() {
            self.acquire(stream)?;
        }
        self.cycles.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Non-blocking barrier: take one credit from every stream only if
    /// every stream has one. Nothing is consumed otherwise.
    pub fn try_acquire_all(&self) -> bool {
        let _guard = self.lock.lock();
        if self.credits.iter().any(|c| c.load(Ordering::Acquire) == 0) {
            return false;
        }
        // Only the coordinator consumes, so nothing can drain a counter
        // between the check and the take
        for stream in 0..self.credits.len() {
            self.try_take(stream);
        }
        self.cycles.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Wake any waiter and make further acquisitions fail
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        let _guard = self.lock.lock();
        self.available.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Releases discarded because the counter was already at depth
    pub fn saturated_releases(&self) -> u64 {
        self.saturated_releases.load(Ordering::Relaxed)
    }

    /// Completed barrier rounds
    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::Relaxed)
    }
}

/// Cloneable handle the transport uses to signal frame completion
#[derive(Clone)]
pub struct CreditReleaser {
    tracker: Arc<CreditTracker>,
}

impl CreditReleaser {
    pub fn new(tracker: Arc<CreditTracker>) -> Self {
        Self { tracker }
    }

    /// A frame on `stream` left the transport
    pub fn on_complete(&self, stream: usize) {
        self.tracker.release(stream);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_seed_fills_to_depth() {
        let tracker = CreditTracker::new(2, 3);
        assert_eq!(tracker.available(0), 0);

        tracker.seed();
        assert_eq!(tracker.available(0), 3);
        assert_eq!(tracker.available(1), 3);

        // Already full
        assert!(!tracker.release(0));
        assert_eq!(tracker.available(0), 3);
        assert_eq!(tracker.saturated_releases(), 1);
    }

    #[test]
    fn test_acquire_consumes_one() {
        let tracker = CreditTracker::new(1, 2);
        tracker.release(0);
        tracker.acquire(0).unwrap();
        assert_eq!(tracker.available(0), 0);
    }

    #[test]
    fn test_acquire_waits_for_release() {
        let tracker = Arc::new(CreditTracker::new(1, 1));
        let releaser = CreditReleaser::new(tracker.clone());

        let waiter = {
            let tracker = tracker.clone();
            thread::spawn(move || tracker.acquire(0))
        };

        thread::sleep(Duration::from_millis(20));
        assert!(!waiter.is_finished());

        releaser.on_complete(0);
        assert!(waiter.join().unwrap().is_ok());
        assert_eq!(tracker.available(0), 0);
    }

    #[test]
    fn test_barrier_waits_for_every_stream() {
        let tracker = Arc::new(CreditTracker::new(2, 3));
        tracker.release(0);
        tracker.release(0);

        let waiter = {
            let tracker = tracker.clone();
            thread::spawn(move || tracker.acquire_all())
        };

        thread::sleep(Duration::from_millis(20));
        assert!(!waiter.is_finished());
        assert_eq!(tracker.cycles(), 0);

        tracker.release(1);
        waiter.join().unwrap().unwrap();
        assert_eq!(tracker.available(0), 1);
        assert_eq!(tracker.available(1), 0);
        assert_eq!(tracker.cycles(), 1);
    }

    #[test]
    fn test_try_acquire_all_is_all_or_nothing() {
        let tracker = CreditTracker::new(3, 2);
        tracker.release(0);
        tracker.release(2);

        assert!(!tracker.try_acquire_all());
        assert_eq!(tracker.available(0), 1);
        assert_eq!(tracker.available(2), 1);

        tracker.release(1);
        assert!(tracker.try_acquire_all());
        assert_eq!((0..3).map(|s| tracker.available(s)).sum::<usize>(), 0);
    }

    #[test]
    fn test_close_wakes_waiter() {
        let tracker = Arc::new(CreditTracker::new(1, 1));
        let waiter = {
            let tracker = tracker.clone();
            thread::spawn(move || tracker.acquire(0))
        };

        thread::sleep(Duration::from_millis(20));
        tracker.close();
        assert!(matches!(waiter.join().unwrap(), Err(PipelineError::Stopped)));
    }

    #[derive(Debug, Clone)]
    enum Op {
        Release(usize),
        Acquire(usize),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0usize..3).prop_map(Op::Release),
            (0usize..3).prop_map(Op::Acquire),
        ]
    }

    proptest! {
        #[test]
        fn prop_credits_stay_in_bounds(
            depth in 1usize..5,
            ops in proptest::collection::vec(op(), 0..200),
        ) {
            let tracker = CreditTracker::new(3, depth);
            for op in ops {
                match op {
                    Op::Release(s) => { tracker.release(s); }
                    // Only acquire when it cannot block
                    Op::Acquire(s) => {
                        if tracker.available(s) > 0 {
                            tracker.acquire(s).unwrap();
                        }
                    }
                }
                for s in 0..3 {
                    prop_assert!(tracker.available(s) <= depth);
                }
            }
        }
    }
}
