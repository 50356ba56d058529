//! Camera permission tracking.
//!
//! The gate mirrors the platform's permission state when the platform can be
//! queried, and otherwise learns it from acquisition outcomes. It never
//! reports `Granted` without evidence from one or the other.

use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::device::CaptureDevice;
use crate::error::{CaptureError, CaptureResult};
use crate::media::{Facing, QualityHint};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionState {
    Unknown,
    Prompt,
    Granted,
    Denied,
}

impl fmt::Display for PermissionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PermissionState::Unknown => "unknown",
            PermissionState::Prompt => "prompt",
            PermissionState::Granted => "granted",
            PermissionState::Denied => "denied",
        };
        f.write_str(s)
    }
}

/// Platform permission API.
pub trait PermissionBackend: Send + Sync + 'static {
    /// Current platform state, or `None` if the platform cannot be queried.
    fn query(&self) -> BoxFuture<'_, Option<PermissionState>>;

    /// Change notifications, if the platform provides them.
    fn changes(&self) -> Option<watch::Receiver<PermissionState>>;
}

/// Handle for a permission-change callback. Dropping it unsubscribes.
pub struct Subscription {
    handle: JoinHandle<()>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        // Drop does the work
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Source of truth for camera permission.
pub struct PermissionGate {
    backend: Arc<dyn PermissionBackend>,
    state: Arc<watch::Sender<PermissionState>>,
    forwarder: Option<JoinHandle<()>>,
}

impl PermissionGate {
    /// Create the gate and start mirroring platform change notifications.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(backend: Arc<dyn PermissionBackend>) -> Self {
        let (state, _) = watch::channel(PermissionState::Unknown);
        let state = Arc::new(state);

        let forwarder = backend.changes().map(|mut changes| {
            let state = state.clone();
            tokio::spawn(async move {
                loop {
                    let current = *changes.borrow_and_update();
                    state.send_if_modified(|s| replace_if_changed(s, current));
                    if changes.changed().await.is_err() {
                        debug!("Permission change notifications closed");
                        break;
                    }
                }
            })
        });

        Self {
            backend,
            state,
            forwarder,
        }
    }

    /// Ask the platform for the current state.
    ///
    /// Without a queryable platform this returns whatever acquisition
    /// outcomes have established so far.
    pub async fn query_permission(&self) -> PermissionState {
        match self.backend.query().await {
            Some(platform) => {
                self.set(platform);
                platform
            }
            None => self.current(),
        }
    }

    pub fn current(&self) -> PermissionState {
        *self.state.borrow()
    }

    pub fn watch(&self) -> watch::Receiver<PermissionState> {
        self.state.subscribe()
    }

    /// Invoke `on_change` for every state change until the returned
    /// [`Subscription`] is dropped.
    pub fn subscribe<F>(&self, on_change: F) -> Subscription
    where
        F: Fn(PermissionState) + Send + 'static,
    {
        let mut rx = self.state.subscribe();
        rx.mark_unchanged();
        let handle = tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let state = *rx.borrow_and_update();
                on_change(state);
            }
        });
        Subscription { handle }
    }

    /// Record what an acquisition attempt revealed about permission.
    pub fn record_acquisition<T>(&self, result: &CaptureResult<T>) {
        record_outcome(&self.state, result);
    }

    /// Start the driver that keeps `device` in step with permission changes
    /// for as long as a capture view is open.
    pub fn drive(
        &self,
        device: Arc<CaptureDevice>,
        facing: Facing,
        quality: QualityHint,
    ) -> PermissionDriver {
        PermissionDriver::spawn(self.state.clone(), device, facing, quality)
    }

    fn set(&self, state: PermissionState) {
        self.state.send_if_modified(|s| replace_if_changed(s, state));
    }
}

impl Drop for PermissionGate {
    fn drop(&mut self) {
        if let Some(handle) = self.forwarder.take() {
            handle.abort();
        }
    }
}

fn replace_if_changed(current: &mut PermissionState, next: PermissionState) -> bool {
    if *current == next {
        false
    } else {
        *current = next;
        true
    }
}

fn record_outcome<T>(state: &watch::Sender<PermissionState>, result: &CaptureResult<T>) {
    let evidence = match result {
        Ok(_) => PermissionState::Granted,
        Err(CaptureError::PermissionDenied) => PermissionState::Denied,
        // Other failures say nothing about permission
        Err(_) => return,
    };
    state.send_if_modified(|s| replace_if_changed(s, evidence));
}

/// Background task binding permission transitions to device acquire/release.
pub struct PermissionDriver {
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl PermissionDriver {
    fn spawn(
        state: Arc<watch::Sender<PermissionState>>,
        device: Arc<CaptureDevice>,
        mut facing: Facing,
        quality: QualityHint,
    ) -> Self {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        let mut rx = state.subscribe();

        let handle = tokio::spawn(async move {
            let mut previous = *rx.borrow_and_update();

            // Optimistic first attempt unless permission is known to be denied
            if previous != PermissionState::Denied {
                let result = device.acquire(facing, quality).await;
                record_outcome(&state, &result);
                previous = *rx.borrow_and_update();
            }

            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    changed = rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }

                let now = *rx.borrow_and_update();
                if now == previous {
                    continue;
                }
                info!("Camera permission changed: {previous} -> {now}");

                if now == PermissionState::Granted && !device.is_streaming() {
                    let result = device.acquire(facing, quality).await;
                    if let Err(e) = &result {
                        warn!("Acquisition after permission grant failed: {e}");
                    }
                    record_outcome(&state, &result);
                } else if previous == PermissionState::Granted && now != PermissionState::Granted {
                    // Come back on whichever camera was in use, switches included
                    if let Some(session) = device.session().await {
                        facing = session.facing;
                    }
                    device.release().await;
                }
                previous = *rx.borrow();
            }
            debug!("Permission driver stopped");
        });

        Self {
            shutdown: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    /// Stop the driver, letting any in-flight acquisition settle first.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for PermissionDriver {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::MediaFailure;
    use crate::virtual_backend::{VirtualMediaBackend, VirtualPermissionBackend};
    use std::sync::Mutex;
    use std::time::Duration;

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_queryable_platform_is_mirrored() {
        let platform = Arc::new(VirtualPermissionBackend::queryable(PermissionState::Prompt));
        let gate = PermissionGate::new(platform.clone());
        assert_eq!(gate.query_permission().await, PermissionState::Prompt);

        platform.set(PermissionState::Denied);
        settle().await;
        assert_eq!(gate.current(), PermissionState::Denied);
    }

    #[tokio::test]
    async fn test_opaque_platform_needs_evidence() {
        let gate = PermissionGate::new(Arc::new(VirtualPermissionBackend::opaque()));
        assert_eq!(gate.query_permission().await, PermissionState::Unknown);

        gate.record_acquisition::<()>(&Err(CaptureError::DeviceBusy));
        assert_eq!(gate.current(), PermissionState::Unknown);

        gate.record_acquisition::<()>(&Err(CaptureError::PermissionDenied));
        assert_eq!(gate.current(), PermissionState::Denied);

        gate.record_acquisition(&Ok(()));
        assert_eq!(gate.current(), PermissionState::Granted);
    }

    #[tokio::test]
    async fn test_subscription_stops_on_drop() {
        let gate = PermissionGate::new(Arc::new(VirtualPermissionBackend::opaque()));
        let seen = Arc::new(Mutex::new(Vec::new()));

        let subscription = {
            let seen = seen.clone();
            gate.subscribe(move |s| seen.lock().unwrap().push(s))
        };
        gate.record_acquisition(&Ok(()));
        settle().await;
        subscription.unsubscribe();

        gate.record_acquisition::<()>(&Err(CaptureError::PermissionDenied));
        settle().await;
        assert_eq!(*seen.lock().unwrap(), vec![PermissionState::Granted]);
    }

    #[tokio::test]
    async fn test_driver_follows_permission() {
        let platform = Arc::new(VirtualPermissionBackend::queryable(PermissionState::Denied));
        let gate = PermissionGate::new(platform.clone());
        gate.query_permission().await;

        let media = Arc::new(VirtualMediaBackend::new(64, 48));
        let device = Arc::new(CaptureDevice::new(media.clone()));
        let driver = gate.drive(device.clone(), Facing::Front, QualityHint::High);
        settle().await;
        assert_eq!(media.open_attempts(), 0);

        platform.set(PermissionState::Granted);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(device.is_streaming());

        platform.set(PermissionState::Denied);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!device.is_streaming());
        assert_eq!(media.live_streams(), 0);

        driver.shutdown().await;
    }

    #[tokio::test]
    async fn test_regrant_keeps_switched_facing() {
        let platform = Arc::new(VirtualPermissionBackend::queryable(PermissionState::Granted));
        let gate = PermissionGate::new(platform.clone());
        gate.query_permission().await;

        let media = Arc::new(VirtualMediaBackend::new(64, 48));
        let device = Arc::new(CaptureDevice::new(media.clone()));
        let driver = gate.drive(device.clone(), Facing::Front, QualityHint::High);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(device.is_streaming());

        device.switch_facing().await.unwrap();

        platform.set(PermissionState::Denied);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!device.is_streaming());

        platform.set(PermissionState::Granted);
        tokio::time::sleep(Duration::from_millis(50)).await;
        let session = device.session().await.unwrap();
        assert!(session.is_streaming);
        assert_eq!(session.facing, Facing::Back);
        assert_eq!(media.last_constraints().unwrap().facing, Facing::Back);

        driver.shutdown().await;
    }

    #[tokio::test]
    async fn test_driver_optimistic_attempt_records_denial() {
        let gate = PermissionGate::new(Arc::new(VirtualPermissionBackend::opaque()));
        let media = Arc::new(VirtualMediaBackend::new(64, 48));
        media.fail_next(MediaFailure::new("NotAllowedError", "denied by user"));
        let device = Arc::new(CaptureDevice::new(media.clone()));

        let driver = gate.drive(device.clone(), Facing::Front, QualityHint::High);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(gate.current(), PermissionState::Denied);
        assert!(!device.is_streaming());
        driver.shutdown().await;
    }
}
