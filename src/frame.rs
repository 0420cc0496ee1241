//! Frame handoff between capture threads and the streaming thread.
//!
//! Camera SDKs deliver frames on their own threads (libusb callbacks for the
//! Theta, a blocking capture loop for the Kinect). GStreamer pulls frames from
//! the source's streaming thread. `FrameSlot` sits between the two:
//!
//! - Only the newest frames are kept; a slow consumer sees drops, not lag.
//! - `wait` blocks until a frame arrives, the slot is flushed or a timeout
//!   elapses, so `BaseSrc::unlock` can always interrupt a pending `create`.
//! - The first device timestamp anchors the stream's running time.
//! - Capture latency is smoothed with an exponential moving average.

use crossbeam::{atomic::AtomicCell, queue::ArrayQueue};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// Frames kept before the oldest undelivered one is evicted.
pub const DEFAULT_SLOT_CAPACITY: usize = 1;

/// Weight of the newest sample in the latency average.
const LATENCY_EMA_WEIGHT: f64 = 0.8;

/// Outcome of [`FrameSlot::wait`].
#[derive(Debug, PartialEq, Eq)]
pub enum SlotWait<T> {
    Frame(T),
    Flushing,
    TimedOut,
}

/// Counters since the last reset.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SlotStats {
    pub produced: u64,
    pub dropped: u64,
}

pub struct FrameSlot<T> {
    frames: ArrayQueue<T>,
    origin: AtomicCell<Option<Duration>>,
    latency_ns: AtomicCell<Option<f64>>,
    produced: AtomicU64,
    dropped: AtomicU64,
    flushing: AtomicBool,
    park: Mutex<()>,
    ready: Condvar,
}

impl<T> FrameSlot<T> {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_SLOT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            frames: ArrayQueue::new(capacity.max(1)),
            origin: AtomicCell::new(None),
            latency_ns: AtomicCell::new(None),
            produced: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            flushing: AtomicBool::new(false),
            park: Mutex::new(()),
            ready: Condvar::new(),
        }
    }

    /// Stores a frame and returns its sequence number.
    ///
    /// Frames pushed while flushing are discarded but still numbered.
    pub fn push(&self, frame: T) -> u64 {
        let sequence = self.produced.fetch_add(1, Ordering::AcqRel);
        if self.flushing.load(Ordering::Acquire) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return sequence;
        }
        if self.frames.force_push(frame).is_some() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        // A flush that started after the check above may already have drained.
        if self.flushing.load(Ordering::Acquire) {
            while self.frames.pop().is_some() {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
        self.notify_all();
        sequence
    }

    pub fn pop(&self) -> Option<T> {
        self.frames.pop()
    }

    /// Blocks until a frame is available, the slot flushes or `timeout` elapses.
    pub fn wait(&self, timeout: Duration) -> SlotWait<T> {
        let deadline = Instant::now() + timeout;
        let mut guard = match self.park.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        loop {
            if self.flushing.load(Ordering::Acquire) {
                return SlotWait::Flushing;
            }
            if let Some(frame) = self.frames.pop() {
                return SlotWait::Frame(frame);
            }
            let now = Instant::now();
            if now >= deadline {
                return SlotWait::TimedOut;
            }
            guard = match self.ready.wait_timeout(guard, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }

    /// Flushing wakes every waiter and rejects new frames until cleared.
    pub fn set_flushing(&self, flushing: bool) {
        self.flushing.store(flushing, Ordering::Release);
        if flushing {
            while self.frames.pop().is_some() {}
        }
        self.notify_all();
    }

    pub fn is_flushing(&self) -> bool {
        self.flushing.load(Ordering::Acquire)
    }

    /// Fixes the stream origin on first call and returns it.
    pub fn anchor(&self, timestamp: Duration) -> Duration {
        match self.origin.compare_exchange(None, Some(timestamp)) {
            Ok(_) => timestamp,
            Err(Some(origin)) => origin,
            Err(None) => timestamp,
        }
    }

    /// Time elapsed since the anchored origin, anchoring on first use.
    pub fn running_time(&self, timestamp: Duration) -> Duration {
        timestamp.saturating_sub(self.anchor(timestamp))
    }

    pub fn record_latency(&self, sample: Duration) {
        let sample_ns = sample.as_nanos() as f64;
        let updated = match self.latency_ns.load() {
            Some(previous) => previous * (1.0 - LATENCY_EMA_WEIGHT) + sample_ns * LATENCY_EMA_WEIGHT,
            None => sample_ns,
        };
        self.latency_ns.store(Some(updated));
    }

    pub fn latency(&self) -> Option<Duration> {
        self.latency_ns
            .load()
            .map(|ns| Duration::from_nanos(ns.max(0.0) as u64))
    }

    pub fn stats(&self) -> SlotStats {
        SlotStats {
            produced: self.produced.load(Ordering::Acquire),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }

    /// Drops pending frames and forgets origin, latency and counters.
    pub fn reset(&self) {
        while self.frames.pop().is_some() {}
        self.origin.store(None);
        self.latency_ns.store(None);
        self.produced.store(0, Ordering::Release);
        self.dropped.store(0, Ordering::Relaxed);
    }

    fn notify_all(&self) {
        // Taking the lock orders this wakeup after a waiter's emptiness check.
        drop(self.park.lock());
        self.ready.notify_all();
    }
}

impl<T> Default for FrameSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for FrameSlot<T> {
    fn drop(&mut self) {
        self.ready.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn newest_frame_wins_when_full() {
        let slot = FrameSlot::new();
        assert_eq!(slot.push(1), 0);
        assert_eq!(slot.push(2), 1);
        assert_eq!(slot.pop(), Some(2));
        assert_eq!(slot.pop(), None);
        assert_eq!(
            slot.stats(),
            SlotStats {
                produced: 2,
                dropped: 1
            }
        );
    }

    #[test]
    fn deeper_slot_evicts_oldest_first() {
        let slot = FrameSlot::with_capacity(3);
        for frame in 1..=5 {
            slot.push(frame);
        }
        assert_eq!(slot.pop(), Some(3));
        assert_eq!(slot.pop(), Some(4));
        assert_eq!(slot.pop(), Some(5));
        assert_eq!(slot.pop(), None);
        assert_eq!(
            slot.stats(),
            SlotStats {
                produced: 5,
                dropped: 2
            }
        );
        assert_eq!(FrameSlot::<u8>::with_capacity(0).push(1), 0);
    }

    #[test]
    fn wait_times_out_without_frames() {
        let slot: FrameSlot<u8> = FrameSlot::new();
        assert_eq!(slot.wait(Duration::from_millis(10)), SlotWait::TimedOut);
    }

    #[test]
    fn wait_wakes_on_push_from_another_thread() {
        let slot = Arc::new(FrameSlot::new());
        let producer = {
            let slot = Arc::clone(&slot);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                slot.push("frame");
            })
        };
        assert_eq!(slot.wait(Duration::from_secs(5)), SlotWait::Frame("frame"));
        producer.join().expect("producer thread");
    }

    #[test]
    fn flushing_interrupts_waiters_and_rejects_frames() {
        let slot = Arc::new(FrameSlot::<u32>::new());
        let waiter = {
            let slot = Arc::clone(&slot);
            thread::spawn(move || slot.wait(Duration::from_secs(5)))
        };
        thread::sleep(Duration::from_millis(20));
        slot.set_flushing(true);
        assert_eq!(waiter.join().expect("waiter thread"), SlotWait::Flushing);

        slot.push(7);
        assert_eq!(slot.pop(), None);

        slot.set_flushing(false);
        slot.push(8);
        assert_eq!(slot.wait(Duration::from_millis(10)), SlotWait::Frame(8));
    }

    #[test]
    fn nothing_survives_a_flush_raised_mid_burst() {
        for _ in 0..50 {
            let slot = Arc::new(FrameSlot::<u32>::with_capacity(4));
            let producer = {
                let slot = Arc::clone(&slot);
                thread::spawn(move || {
                    for frame in 0..2_000 {
                        slot.push(frame);
                    }
                })
            };
            thread::yield_now();
            slot.set_flushing(true);
            producer.join().expect("producer thread");
            assert_eq!(slot.pop(), None);
            assert_eq!(slot.stats().produced, 2_000);
        }
    }

    #[test]
    fn first_timestamp_anchors_running_time() {
        let slot: FrameSlot<()> = FrameSlot::new();
        assert_eq!(slot.running_time(Duration::from_secs(100)), Duration::ZERO);
        assert_eq!(
            slot.running_time(Duration::from_millis(100_250)),
            Duration::from_millis(250)
        );
        assert_eq!(slot.running_time(Duration::from_secs(99)), Duration::ZERO);
        slot.reset();
        assert_eq!(slot.anchor(Duration::from_secs(5)), Duration::from_secs(5));
    }

    #[test]
    fn latency_average_favours_recent_samples() {
        let slot: FrameSlot<()> = FrameSlot::new();
        assert_eq!(slot.latency(), None);
        slot.record_latency(Duration::from_millis(10));
        assert_eq!(slot.latency(), Some(Duration::from_millis(10)));
        slot.record_latency(Duration::from_millis(20));
        let smoothed = slot.latency().expect("latency recorded");
        assert!(smoothed > Duration::from_millis(17) && smoothed < Duration::from_millis(19));
    }
}
