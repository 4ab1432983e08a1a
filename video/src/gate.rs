//! Frame availability gate between the frame callback and the render loop.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::VideoError;

/// Single-slot signal that a decoded frame has landed on the surface.
///
/// The producer (frame callback) sets the flag; the consumer (render step)
/// waits for it and clears it. A signal that arrives while the flag is still
/// set is a dropped frame: it is counted and logged, never queued.
#[derive(Debug, Default)]
pub struct FrameAvailabilityGate {
    available: Mutex<bool>,
    condvar: Condvar,
    dropped: AtomicU64,
    delivered: AtomicU64,
}

impl FrameAvailabilityGate {
    /// Create a gate with no frame pending.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a new frame as available and wake the waiter.
    pub fn signal(&self) {
        let mut available = self.available.lock();
        if *available {
            let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            log::debug!("frame available before the previous one was consumed ({dropped} dropped)");
        } else {
            *available = true;
        }
        self.condvar.notify_one();
    }

    /// Wait for a frame, then clear the flag.
    ///
    /// Each attempt waits up to `attempt_timeout`; a timed-out attempt is
    /// logged and retried. With `max_attempts` set, giving up after that many
    /// attempts returns an error instead of waiting forever.
    ///
    /// # Errors
    ///
    /// Returns `VideoError::FrameTimeout` once `max_attempts` attempts have
    /// timed out.
    pub fn wait(
        &self,
        attempt_timeout: Duration,
        max_attempts: Option<u32>,
    ) -> Result<(), VideoError> {
        let mut available = self.available.lock();
        let mut attempts = 0u32;
        while !*available {
            let result = self.condvar.wait_for(&mut available, attempt_timeout);
            if result.timed_out() && !*available {
                attempts += 1;
                log::warn!("frame wait timed out after {attempt_timeout:?} (attempt {attempts})");
                if max_attempts.is_some_and(|max| attempts >= max) {
                    return Err(VideoError::FrameTimeout);
                }
            }
        }
        *available = false;
        self.delivered.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Clear the flag if set, without waiting.
    pub fn try_take(&self) -> bool {
        let mut available = self.available.lock();
        if *available {
            *available = false;
            self.delivered.fetch_add(1, Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    /// Signals that arrived while a frame was still pending.
    #[must_use]
    pub fn dropped_frames(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Frames handed to the consumer.
    #[must_use]
    pub fn delivered_frames(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    const SHORT: Duration = Duration::from_millis(20);

    #[test]
    fn double_signal_delivers_once_and_counts_drop() {
        let gate = FrameAvailabilityGate::new();
        gate.signal();
        gate.signal();

        gate.wait(SHORT, Some(1)).unwrap();
        assert_eq!(gate.delivered_frames(), 1);
        assert_eq!(gate.dropped_frames(), 1);

        assert!(matches!(
            gate.wait(SHORT, Some(2)),
            Err(VideoError::FrameTimeout)
        ));
        assert_eq!(gate.delivered_frames(), 1);
    }

    #[test]
    fn waiter_wakes_on_signal_from_other_thread() {
        let gate = Arc::new(FrameAvailabilityGate::new());
        let producer = gate.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(30));
            producer.signal();
        });

        gate.wait(Duration::from_millis(500), None).unwrap();
        handle.join().unwrap();
        assert_eq!(gate.delivered_frames(), 1);
        assert_eq!(gate.dropped_frames(), 0);
    }

    #[test]
    fn try_take_clears_flag() {
        let gate = FrameAvailabilityGate::new();
        assert!(!gate.try_take());
        gate.signal();
        assert!(gate.try_take());
        assert!(!gate.try_take());
    }
}
