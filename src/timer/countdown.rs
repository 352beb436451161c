//! Cancellable one-second countdowns.
//!
//! [`create`] spawns a tokio task that calls `on_tick` once per second with
//! the remaining seconds and `on_expire` when the count reaches zero.  The
//! returned [`TimerHandle`] cancels the countdown explicitly or when dropped.
//!
//! Expiry and cancellation race through a single atomic status word, so for
//! any timer exactly one of them wins: a cancelled timer never fires, and
//! cancelling an expired timer is a no-op that reports `false`.
//!
//! ```rust
//! use assessment_runner::timer::countdown;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let mut handle = countdown::create(60, |_left| {}, || println!("time is up"));
//! assert!(handle.is_running());
//! assert!(handle.cancel());
//! assert!(!handle.cancel());
//! # }
//! ```

use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};

const RUNNING: u8 = 0;
const CANCELLED: u8 = 1;
const EXPIRED: u8 = 2;

/// Terminal state of a countdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerStatus {
    Running,
    Cancelled,
    Expired,
}

struct Shared {
    status: AtomicU8,
    remaining: AtomicU32,
}

/// Owner of a running countdown.  Dropping it cancels the countdown.
pub struct TimerHandle {
    shared: Arc<Shared>,
    task: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for TimerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerHandle")
            .field("status", &self.status())
            .field("remaining", &self.remaining_secs())
            .finish()
    }
}

/// Start a countdown of `duration_secs` whole seconds.
///
/// `on_tick` receives the remaining seconds after each elapsed second
/// (down to and including `0`); `on_expire` runs once afterwards unless the
/// handle was cancelled first.  Must be called from within a tokio runtime.
pub fn create<T, E>(duration_secs: u32, mut on_tick: T, on_expire: E) -> TimerHandle
where
    T: FnMut(u32) + Send + 'static,
    E: FnOnce() + Send + 'static,
{
    let shared = Arc::new(Shared {
        status: AtomicU8::new(RUNNING),
        remaining: AtomicU32::new(duration_secs),
    });

    let task_shared = Arc::clone(&shared);
    let task = tokio::spawn(async move {
        let period = Duration::from_secs(1);
        let mut ticker = interval_at(Instant::now() + period, period);
        let mut remaining = duration_secs;

        while remaining > 0 {
            ticker.tick().await;
            if task_shared.status.load(Ordering::Acquire) != RUNNING {
                return;
            }
            remaining -= 1;
            task_shared.remaining.store(remaining, Ordering::Release);
            on_tick(remaining);
        }

        if task_shared
            .status
            .compare_exchange(RUNNING, EXPIRED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            on_expire();
        }
    });

    TimerHandle {
        shared,
        task: Some(task),
    }
}

impl TimerHandle {
    /// Cancel the countdown.
    ///
    /// Returns `true` if this call stopped a running timer, `false` when the
    /// timer had already expired or been cancelled.
    pub fn cancel(&mut self) -> bool {
        let won = self
            .shared
            .status
            .compare_exchange(RUNNING, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if let Some(task) = self.task.take() {
            task.abort();
        }
        won
    }

    pub fn status(&self) -> TimerStatus {
        match self.shared.status.load(Ordering::Acquire) {
            RUNNING => TimerStatus::Running,
            CANCELLED => TimerStatus::Cancelled,
            _ => TimerStatus::Expired,
        }
    }

    pub fn is_running(&self) -> bool {
        self.status() == TimerStatus::Running
    }

    /// Seconds left as of the last tick.
    pub fn remaining_secs(&self) -> u32 {
        self.shared.remaining.load(Ordering::Acquire)
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    fn counters() -> (Arc<Mutex<Vec<u32>>>, Arc<AtomicUsize>) {
        (Arc::new(Mutex::new(Vec::new())), Arc::new(AtomicUsize::new(0)))
    }

    fn start(secs: u32, ticks: &Arc<Mutex<Vec<u32>>>, fired: &Arc<AtomicUsize>) -> TimerHandle {
        let ticks = Arc::clone(ticks);
        let fired = Arc::clone(fired);
        create(
            secs,
            move |left| ticks.lock().unwrap().push(left),
            move || {
                fired.fetch_add(1, Ordering::SeqCst);
            },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_every_second_then_expires_once() {
        let (ticks, fired) = counters();
        let handle = start(3, &ticks, &fired);

        tokio::time::sleep(Duration::from_millis(3_500)).await;

        assert_eq!(*ticks.lock().unwrap(), vec![2, 1, 0]);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(handle.status(), TimerStatus::Expired);
        assert_eq!(handle.remaining_secs(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_before_expiry_suppresses_expire() {
        let (ticks, fired) = counters();
        let mut handle = start(5, &ticks, &fired);

        tokio::time::sleep(Duration::from_millis(2_500)).await;
        assert!(handle.cancel());
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(*ticks.lock().unwrap(), vec![4, 3]);
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert_eq!(handle.status(), TimerStatus::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_after_expiry_is_a_no_op() {
        let (ticks, fired) = counters();
        let mut handle = start(1, &ticks, &fired);

        tokio::time::sleep(Duration::from_millis(1_500)).await;
        assert!(!handle.cancel());
        assert_eq!(handle.status(), TimerStatus::Expired);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_handle_cancels() {
        let (ticks, fired) = counters();
        drop(start(2, &ticks, &fired));

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(ticks.lock().unwrap().is_empty());
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_duration_expires_without_ticking() {
        let (ticks, fired) = counters();
        let _handle = start(0, &ticks, &fired);

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(ticks.lock().unwrap().is_empty());
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}
