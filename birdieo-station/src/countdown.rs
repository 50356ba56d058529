//! Pre-capture countdown.
//!
//! Ticks once per second, then holds at zero for a short settle delay before
//! firing its callback. The callback runs at most once per started countdown,
//! and never after [`CountdownController::cancel`].

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

/// Default pause at zero so the on-screen "0" renders before the frame is taken.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CountdownState {
    pub remaining_seconds: u32,
    pub is_running: bool,
}

impl CountdownState {
    pub const IDLE: CountdownState = CountdownState {
        remaining_seconds: 0,
        is_running: false,
    };
}

struct Run {
    id: u64,
    handle: JoinHandle<()>,
}

struct Slot {
    next_id: u64,
    run: Option<Run>,
}

pub struct CountdownController {
    state: Arc<watch::Sender<CountdownState>>,
    slot: Arc<Mutex<Slot>>,
    tick: Duration,
    settle: Duration,
}

impl Default for CountdownController {
    fn default() -> Self {
        Self::new()
    }
}

impl CountdownController {
    pub fn new() -> Self {
        Self::with_timing(Duration::from_secs(1), DEFAULT_SETTLE_DELAY)
    }

    pub fn with_timing(tick: Duration, settle: Duration) -> Self {
        let (state, _) = watch::channel(CountdownState::IDLE);
        Self {
            state: Arc::new(state),
            slot: Arc::new(Mutex::new(Slot {
                next_id: 0,
                run: None,
            })),
            tick,
            settle,
        }
    }

    pub fn watch(&self) -> watch::Receiver<CountdownState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> CountdownState {
        *self.state.borrow()
    }

    pub fn is_running(&self) -> bool {
        self.lock_slot().run.is_some()
    }

    /// Start counting down from `seconds`.
    ///
    /// Returns `false` without doing anything if a countdown is already
    /// running. `seconds == 0` fires after the settle delay alone.
    pub fn start<F>(&self, seconds: u32, on_fire: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        let mut slot = self.lock_slot();
        if slot.run.is_some() {
            debug!("Countdown already running, ignoring start");
            return false;
        }

        let id = slot.next_id;
        slot.next_id += 1;

        self.state.send_replace(CountdownState {
            remaining_seconds: seconds,
            is_running: true,
        });

        let state = self.state.clone();
        let slot_ref = self.slot.clone();
        let tick = self.tick;
        let settle = self.settle;

        let handle = tokio::spawn(async move {
            let mut remaining = seconds;
            while remaining > 0 {
                tokio::time::sleep(tick).await;
                remaining -= 1;
                state.send_replace(CountdownState {
                    remaining_seconds: remaining,
                    is_running: true,
                });
            }

            tokio::time::sleep(settle).await;

            // Claim the run; a cancel that got here first wins
            {
                let mut slot = match slot_ref.lock() {
                    Ok(slot) => slot,
                    Err(poisoned) => poisoned.into_inner(),
                };
                match &slot.run {
                    Some(run) if run.id == id => slot.run = None,
                    _ => return,
                }
                state.send_replace(CountdownState::IDLE);
            }

            debug!("Countdown fired");
            on_fire();
        });

        slot.run = Some(Run { id, handle });
        true
    }

    /// Abort a running countdown without firing. No-op when idle.
    pub fn cancel(&self) {
        let mut slot = self.lock_slot();
        if let Some(run) = slot.run.take() {
            run.handle.abort();
            self.state.send_replace(CountdownState::IDLE);
            debug!("Countdown cancelled");
        }
    }

    fn lock_slot(&self) -> std::sync::MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for CountdownController {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter() -> (Arc<AtomicUsize>, impl FnOnce() + Send + 'static) {
        let fired = Arc::new(AtomicUsize::new(0));
        let f = fired.clone();
        (fired, move || {
            f.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_and_fires_once() {
        let countdown = CountdownController::new();
        let mut rx = countdown.watch();
        let (fired, on_fire) = counter();

        assert!(countdown.start(3, on_fire));
        assert_eq!(
            *rx.borrow_and_update(),
            CountdownState {
                remaining_seconds: 3,
                is_running: true
            }
        );

        let mut seen = Vec::new();
        while rx.changed().await.is_ok() {
            let s = *rx.borrow_and_update();
            seen.push(s.remaining_seconds);
            if !s.is_running {
                break;
            }
        }
        assert_eq!(seen, vec![2, 1, 0, 0]);
        tokio::task::yield_now().await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!countdown.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_start_is_noop() {
        let countdown = CountdownController::new();
        let (fired, on_fire) = counter();
        let (fired_second, on_fire_second) = counter();

        assert!(countdown.start(2, on_fire));
        assert!(!countdown.start(2, on_fire_second));

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(fired_second.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_prevents_fire() {
        let countdown = CountdownController::new();
        let (fired, on_fire) = counter();

        countdown.start(3, on_fire);
        tokio::time::sleep(Duration::from_millis(1500)).await;
        countdown.cancel();
        assert_eq!(countdown.state(), CountdownState::IDLE);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_settle() {
        let countdown = CountdownController::with_timing(Duration::from_secs(1), Duration::from_millis(100));
        let (fired, on_fire) = counter();

        countdown.start(1, on_fire);
        tokio::time::sleep(Duration::from_millis(1050)).await;
        assert_eq!(
            countdown.state(),
            CountdownState {
                remaining_seconds: 0,
                is_running: true
            }
        );
        countdown.cancel();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_seconds_fires_after_settle() {
        let countdown = CountdownController::new();
        let (fired, on_fire) = counter();

        countdown.start(0, on_fire);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_after_fire() {
        let countdown = CountdownController::new();
        let (fired, on_fire) = counter();
        let (fired_again, on_fire_again) = counter();

        countdown.start(1, on_fire);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(countdown.start(1, on_fire_again));
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(fired_again.load(Ordering::SeqCst), 1);
    }
}
