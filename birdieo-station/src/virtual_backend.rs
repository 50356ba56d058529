//! In-process media and permission backends.
//!
//! Used by the `capture-demo` command on machines without a camera and by the
//! test suite, which scripts failures and delays through the handles below.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::{self, BoxFuture, FutureExt};
use image::{Rgb, RgbImage};
use tokio::sync::watch;

use crate::media::{Constraints, Facing, MediaBackend, MediaFailure, MediaStream};
use crate::permission::{PermissionBackend, PermissionState};

struct VirtualState {
    supported: bool,
    width: u32,
    height: u32,
    failures: VecDeque<MediaFailure>,
    reject_ideal: bool,
    ready_delay: Option<Duration>,
    open_delay: Duration,
    open_attempts: usize,
    last_constraints: Option<Constraints>,
}

/// Media backend producing a synthetic test pattern.
#[derive(Clone)]
pub struct VirtualMediaBackend {
    state: Arc<Mutex<VirtualState>>,
    live: Arc<AtomicUsize>,
}

impl VirtualMediaBackend {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            state: Arc::new(Mutex::new(VirtualState {
                supported: true,
                width,
                height,
                failures: VecDeque::new(),
                reject_ideal: false,
                ready_delay: Some(Duration::ZERO),
                open_delay: Duration::ZERO,
                open_attempts: 0,
                last_constraints: None,
            })),
            live: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// A platform with no capture capability at all.
    pub fn unsupported() -> Self {
        let backend = Self::new(1, 1);
        backend.with_state(|s| s.supported = false);
        backend
    }

    /// Fail the next `open` call with the given platform error.
    pub fn fail_next(&self, failure: MediaFailure) {
        self.with_state(|s| s.failures.push_back(failure));
    }

    /// Reject any constraint set carrying ideal values, like a camera that
    /// cannot do 1080p.
    pub fn reject_ideal_constraints(&self, reject: bool) {
        self.with_state(|s| s.reject_ideal = reject);
    }

    /// `None` means opened streams never report ready.
    pub fn set_ready_delay(&self, delay: Option<Duration>) {
        self.with_state(|s| s.ready_delay = delay);
    }

    pub fn set_open_delay(&self, delay: Duration) {
        self.with_state(|s| s.open_delay = delay);
    }

    /// Streams opened and not yet stopped.
    pub fn live_streams(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn open_attempts(&self) -> usize {
        self.with_state(|s| s.open_attempts)
    }

    pub fn last_constraints(&self) -> Option<Constraints> {
        self.with_state(|s| s.last_constraints)
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut VirtualState) -> R) -> R {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut state)
    }
}

impl MediaBackend for VirtualMediaBackend {
    fn is_supported(&self) -> bool {
        self.with_state(|s| s.supported)
    }

    fn open(
        &self,
        constraints: Constraints,
    ) -> BoxFuture<'_, Result<Box<dyn MediaStream>, MediaFailure>> {
        async move {
            let open_delay = self.with_state(|s| s.open_delay);
            if !open_delay.is_zero() {
                tokio::time::sleep(open_delay).await;
            }

            let (failure, width, height, ready_delay) = self.with_state(|s| {
                s.open_attempts += 1;
                s.last_constraints = Some(constraints);
                let failure = s.failures.pop_front().or_else(|| {
                    (s.reject_ideal && !constraints.is_minimal()).then(|| {
                        MediaFailure::new("OverconstrainedError", "ideal resolution unavailable")
                    })
                });
                (failure, s.width, s.height, s.ready_delay)
            });
            if let Some(failure) = failure {
                return Err(failure);
            }

            self.live.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(VirtualStream {
                frame: test_pattern(width, height, constraints.facing),
                ready_delay,
                live: self.live.clone(),
                stopped: false,
            }) as Box<dyn MediaStream>)
        }
        .boxed()
    }
}

/// Gradient test pattern; the blue channel differs per facing.
pub fn test_pattern(width: u32, height: u32, facing: Facing) -> RgbImage {
    let blue = match facing {
        Facing::Front => 200,
        Facing::Back => 40,
    };
    RgbImage::from_fn(width, height, |x, y| {
        let r = (x * 255 / width.max(1)) as u8;
        let g = (y * 255 / height.max(1)) as u8;
        Rgb([r, g, blue])
    })
}

struct VirtualStream {
    frame: RgbImage,
    ready_delay: Option<Duration>,
    live: Arc<AtomicUsize>,
    stopped: bool,
}

impl MediaStream for VirtualStream {
    fn wait_ready(&self) -> BoxFuture<'_, ()> {
        match self.ready_delay {
            Some(delay) => tokio::time::sleep(delay).boxed(),
            None => future::pending().boxed(),
        }
    }

    fn latest_frame(&self) -> Option<RgbImage> {
        (!self.stopped).then(|| self.frame.clone())
    }

    fn stop(&mut self) {
        if !self.stopped {
            self.stopped = true;
            self.live.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn live_tracks(&self) -> usize {
        usize::from(!self.stopped)
    }
}

/// Permission backend whose state is driven by hand.
pub struct VirtualPermissionBackend {
    queryable: bool,
    state: watch::Sender<PermissionState>,
}

impl VirtualPermissionBackend {
    /// A platform with a permission query API and change notifications.
    pub fn queryable(initial: PermissionState) -> Self {
        let (state, _) = watch::channel(initial);
        Self {
            queryable: true,
            state,
        }
    }

    /// A platform where permission can only be learned by trying.
    pub fn opaque() -> Self {
        let (state, _) = watch::channel(PermissionState::Unknown);
        Self {
            queryable: false,
            state,
        }
    }

    /// Simulate the user changing the permission in system settings.
    pub fn set(&self, state: PermissionState) {
        self.state.send_replace(state);
    }
}

impl PermissionBackend for VirtualPermissionBackend {
    fn query(&self) -> BoxFuture<'_, Option<PermissionState>> {
        let result = self.queryable.then(|| *self.state.borrow());
        future::ready(result).boxed()
    }

    fn changes(&self) -> Option<watch::Receiver<PermissionState>> {
        self.queryable.then(|| self.state.subscribe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::QualityHint;

    #[tokio::test]
    async fn test_stream_stop_is_idempotent() {
        let backend = VirtualMediaBackend::new(16, 16);
        let mut stream = backend
            .open(Constraints::for_quality(Facing::Front, QualityHint::High))
            .await
            .unwrap();
        assert_eq!(backend.live_streams(), 1);
        stream.stop();
        stream.stop();
        assert_eq!(backend.live_streams(), 0);
        assert_eq!(stream.live_tracks(), 0);
        assert!(stream.latest_frame().is_none());
    }

    #[tokio::test]
    async fn test_opaque_permission_is_not_queryable() {
        let backend = VirtualPermissionBackend::opaque();
        assert_eq!(backend.query().await, None);
        assert!(backend.changes().is_none());
    }

    #[test]
    fn test_pattern_differs_by_facing() {
        let front = test_pattern(8, 8, Facing::Front);
        let back = test_pattern(8, 8, Facing::Back);
        assert_ne!(front.get_pixel(0, 0), back.get_pixel(0, 0));
    }
}
