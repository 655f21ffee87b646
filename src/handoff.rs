//! Single-slot, latest-wins hand-off between the worker and the render thread.
//!
//! `post` never blocks on the consumer: a value still sitting in the slot is
//! replaced and returned to the caller as superseded. The render thread takes
//! whatever is newest with `take` (non-blocking) or `wait` (bounded wait).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;

struct SlotState<T> {
    value: Option<T>,
    closed: bool,
}

struct Shared<T> {
    state: Mutex<SlotState<T>>,
    ready: Condvar,
    posted: AtomicU64,
    superseded: AtomicU64,
}

/// Outcome of waiting on the slot.
#[derive(Debug, PartialEq)]
pub enum Received<T> {
    Value(T),
    /// Nothing arrived within the timeout.
    Empty,
    /// The producer closed the slot and it is drained.
    Closed,
}

/// Capacity-one channel with overwrite-on-full semantics. Cloning shares the slot.
pub struct LatestSlot<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for LatestSlot<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T> Default for LatestSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> LatestSlot<T> {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(SlotState {
                    value: None,
                    closed: false,
                }),
                ready: Condvar::new(),
                posted: AtomicU64::new(0),
                superseded: AtomicU64::new(0),
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SlotState<T>> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Publish `value`, returning the unconsumed value it displaced, if any.
    ///
    /// Posting to a closed slot hands the value straight back.
    pub fn post(&self, value: T) -> Result<Option<T>, T> {
        let mut state = self.lock();
        if state.closed {
            return Err(value);
        }
        let stale = state.value.replace(value);
        drop(state);

        self.shared.posted.fetch_add(1, Ordering::Relaxed);
        if stale.is_some() {
            self.shared.superseded.fetch_add(1, Ordering::Relaxed);
        }
        self.shared.ready.notify_one();
        Ok(stale)
    }

    /// Newest value if one is waiting. Never blocks on the producer.
    pub fn take(&self) -> Option<T> {
        self.lock().value.take()
    }

    /// Newest value, or whether the slot is empty or closed, without blocking.
    pub fn try_recv(&self) -> Received<T> {
        let mut state = self.lock();
        match state.value.take() {
            Some(value) => Received::Value(value),
            None if state.closed => Received::Closed,
            None => Received::Empty,
        }
    }

    /// Wait up to `timeout` for a value.
    pub fn wait(&self, timeout: Duration) -> Received<T> {
        let state = self.lock();
        let (mut state, _) = self
            .shared
            .ready
            .wait_timeout_while(state, timeout, |s| s.value.is_none() && !s.closed)
            .unwrap_or_else(PoisonError::into_inner);
        match state.value.take() {
            Some(value) => Received::Value(value),
            None if state.closed => Received::Closed,
            None => Received::Empty,
        }
    }

    /// Stop accepting values. A value already in the slot can still be taken.
    pub fn close(&self) {
        self.lock().closed = true;
        self.shared.ready.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Values accepted by `post`.
    pub fn posted(&self) -> u64 {
        self.shared.posted.load(Ordering::Relaxed)
    }

    /// Values overwritten before anyone took them.
    pub fn superseded(&self) -> u64 {
        self.shared.superseded.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn second_post_supersedes_unconsumed_first() {
        let slot = LatestSlot::new();
        assert_eq!(slot.post(1), Ok(None));
        assert_eq!(slot.post(2), Ok(Some(1)));

        assert_eq!(slot.take(), Some(2));
        assert_eq!(slot.take(), None);
        assert_eq!(slot.posted(), 2);
        assert_eq!(slot.superseded(), 1);
    }

    #[test]
    fn wait_returns_empty_after_timeout() {
        let slot: LatestSlot<u32> = LatestSlot::new();
        let started = Instant::now();
        assert_eq!(slot.wait(Duration::from_millis(20)), Received::Empty);
        assert!(started.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn wait_wakes_on_post_from_another_thread() {
        let slot = LatestSlot::new();
        let producer = slot.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            producer.post("frame").unwrap();
        });
        assert_eq!(slot.wait(Duration::from_secs(5)), Received::Value("frame"));
        handle.join().unwrap();
    }

    #[test]
    fn close_drains_then_reports_closed() {
        let slot = LatestSlot::new();
        slot.post(7).unwrap();
        slot.close();

        assert_eq!(slot.post(8), Err(8));
        assert_eq!(slot.wait(Duration::from_millis(1)), Received::Value(7));
        assert_eq!(slot.wait(Duration::from_millis(1)), Received::Closed);
    }

    #[test]
    fn try_recv_reports_empty_value_then_closed() {
        let slot = LatestSlot::new();
        assert_eq!(slot.try_recv(), Received::Empty);
        slot.post(3).unwrap();
        slot.close();
        assert_eq!(slot.try_recv(), Received::Value(3));
        assert_eq!(slot.try_recv(), Received::Closed);
    }

    #[test]
    fn slow_consumer_only_ever_sees_newest_value() {
        let slot = LatestSlot::new();
        let producer = slot.clone();
        let handle = std::thread::spawn(move || {
            for i in 0..1_000u32 {
                producer.post(i).unwrap();
            }
            producer.close();
        });

        let mut last = None;
        loop {
            match slot.wait(Duration::from_secs(5)) {
                Received::Value(v) => {
                    if let Some(prev) = last {
                        assert!(v > prev, "values must arrive in order");
                    }
                    last = Some(v);
                    std::thread::sleep(Duration::from_micros(50));
                }
                Received::Closed => break,
                Received::Empty => panic!("producer stalled"),
            }
        }
        handle.join().unwrap();
        assert_eq!(last, Some(999));
        assert_eq!(slot.posted(), 1_000);
    }
}
