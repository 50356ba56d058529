//! Capture device lifecycle.
//!
//! [`CaptureDevice`] is the only owner of the live camera stream. All
//! acquire / release / switch calls are serialized through one async mutex, so
//! a release issued while an acquisition is in flight waits for it to settle
//! rather than interleaving with it. The open stream itself sits behind a
//! separate short-lived lock so frame reads never wait on lifecycle calls.

use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use std::time::Duration;

use image::RgbImage;
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, warn};

use crate::error::{CaptureError, CaptureResult, ErrorKind};
use crate::media::{Constraints, Facing, MediaBackend, MediaStream, QualityHint};

/// How long to wait for an opened stream to report readiness.
pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(20);

/// Live capture session state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureSession {
    pub facing: Facing,
    /// Quality actually in effect (may be degraded from what was requested)
    pub resolution_hint: QualityHint,
    pub is_streaming: bool,
    pub last_error: Option<ErrorKind>,
}

/// Observable summary of the device, published on every transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceStatus {
    /// No stream open. Carries the error that left it offline, if any.
    Offline { last_error: Option<ErrorKind> },
    Acquiring { facing: Facing },
    Streaming { facing: Facing, quality: QualityHint },
    /// The platform cannot capture at all; capture stays disabled.
    Disabled,
}

/// Stops a freshly opened stream if the acquisition future is dropped before
/// the stream is handed over to the device.
struct PendingStream(Option<Box<dyn MediaStream>>);

impl PendingStream {
    fn get(&self) -> Option<&dyn MediaStream> {
        self.0.as_deref()
    }

    fn into_inner(mut self) -> Option<Box<dyn MediaStream>> {
        self.0.take()
    }
}

impl Drop for PendingStream {
    fn drop(&mut self) {
        if let Some(mut stream) = self.0.take() {
            debug!("Acquisition abandoned, stopping opened stream");
            stream.stop();
        }
    }
}

struct DeviceInner {
    session: Option<CaptureSession>,
    requested_quality: QualityHint,
    disabled: bool,
}

/// Owner of the single live camera handle.
pub struct CaptureDevice {
    backend: Arc<dyn MediaBackend>,
    inner: Mutex<DeviceInner>,
    /// Only ever locked for synchronous reads and swaps
    stream: StdMutex<Option<Box<dyn MediaStream>>>,
    status: watch::Sender<DeviceStatus>,
    streaming: watch::Sender<bool>,
    ready_timeout: Duration,
}

impl CaptureDevice {
    pub fn new(backend: Arc<dyn MediaBackend>) -> Self {
        Self::with_ready_timeout(backend, DEFAULT_READY_TIMEOUT)
    }

    pub fn with_ready_timeout(backend: Arc<dyn MediaBackend>, ready_timeout: Duration) -> Self {
        let (status, _) = watch::channel(DeviceStatus::Offline { last_error: None });
        let (streaming, _) = watch::channel(false);
        Self {
            backend,
            inner: Mutex::new(DeviceInner {
                session: None,
                requested_quality: QualityHint::High,
                disabled: false,
            }),
            stream: StdMutex::new(None),
            status,
            streaming,
            ready_timeout,
        }
    }

    /// Watch the device status.
    pub fn status(&self) -> watch::Receiver<DeviceStatus> {
        self.status.subscribe()
    }

    /// Read-only streaming flag for consumers outside the capture flow.
    pub fn streaming(&self) -> watch::Receiver<bool> {
        self.streaming.subscribe()
    }

    pub fn is_streaming(&self) -> bool {
        *self.streaming.borrow()
    }

    /// Snapshot of the current session, if one exists.
    pub async fn session(&self) -> Option<CaptureSession> {
        self.inner.lock().await.session.clone()
    }

    /// Open the camera.
    ///
    /// Any previously open stream is stopped first. A `ConstraintsUnsupported`
    /// failure is retried once with the minimal constraint set; every other
    /// failure is surfaced immediately.
    pub async fn acquire(&self, facing: Facing, quality: QualityHint) -> CaptureResult<CaptureSession> {
        let mut inner = self.inner.lock().await;
        inner.requested_quality = quality;
        self.acquire_locked(&mut inner, facing, quality).await
    }

    /// Stop every track and clear the session. Safe to call at any time.
    pub async fn release(&self) {
        let mut inner = self.inner.lock().await;
        self.release_locked(&mut inner);
    }

    /// Release and re-acquire with the opposite facing.
    ///
    /// The previous session is not restored if re-acquisition fails; the
    /// device stays offline until an explicit retry.
    pub async fn switch_facing(&self) -> CaptureResult<CaptureSession> {
        let mut inner = self.inner.lock().await;
        let facing = inner
            .session
            .as_ref()
            .map(|s| s.facing)
            .ok_or(CaptureError::NoActiveSession)?;
        let quality = inner.requested_quality;

        info!("Switching camera from {:?} to {:?}", facing, facing.opposite());
        self.release_locked(&mut inner);
        self.acquire_locked(&mut inner, facing.opposite(), quality).await
    }

    /// Current live frame at native resolution.
    ///
    /// Fails with `NoActiveSession` only when the device is not streaming.
    pub fn current_frame(&self) -> CaptureResult<RgbImage> {
        if !self.is_streaming() {
            return Err(CaptureError::NoActiveSession);
        }
        let live = self.lock_stream();
        let stream = live.as_ref().ok_or(CaptureError::NoActiveSession)?;

        stream
            .latest_frame()
            .ok_or_else(|| CaptureError::Unknown("camera has not delivered a frame yet".into()))
    }

    fn lock_stream(&self) -> MutexGuard<'_, Option<Box<dyn MediaStream>>> {
        self.stream.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn acquire_locked(
        &self,
        inner: &mut DeviceInner,
        facing: Facing,
        quality: QualityHint,
    ) -> CaptureResult<CaptureSession> {
        if inner.disabled {
            return Err(CaptureError::MediaUnsupported);
        }
        if !self.backend.is_supported() {
            error!("Platform has no media capture capability; capture disabled");
            inner.disabled = true;
            self.set_status(DeviceStatus::Disabled);
            return Err(CaptureError::MediaUnsupported);
        }

        // Never hold two streams open at once
        self.release_locked(inner);
        self.set_status(DeviceStatus::Acquiring { facing });

        match self.open_stream(facing, quality).await {
            Ok((pending, used_quality)) => {
                if let Some(stream) = pending.get() {
                    if tokio::time::timeout(self.ready_timeout, stream.wait_ready())
                        .await
                        .is_err()
                    {
                        // Routine on slow hardware, not a user-facing error
                        debug!(
                            "Camera not ready after {:?}, continuing with open stream",
                            self.ready_timeout
                        );
                    }
                }

                let session = CaptureSession {
                    facing,
                    resolution_hint: used_quality,
                    is_streaming: true,
                    last_error: None,
                };
                *self.lock_stream() = pending.into_inner();
                inner.session = Some(session.clone());
                self.streaming.send_replace(true);
                self.set_status(DeviceStatus::Streaming {
                    facing,
                    quality: used_quality,
                });
                info!("Camera streaming ({:?}, {:?})", facing, used_quality);
                Ok(session)
            }
            Err(err) => {
                warn!("Camera acquisition failed: {err} ({})", err.remediation());
                inner.session = Some(CaptureSession {
                    facing,
                    resolution_hint: quality,
                    is_streaming: false,
                    last_error: Some(err.kind()),
                });
                self.set_status(DeviceStatus::Offline {
                    last_error: Some(err.kind()),
                });
                Err(err)
            }
        }
    }

    async fn open_stream(
        &self,
        facing: Facing,
        quality: QualityHint,
    ) -> CaptureResult<(PendingStream, QualityHint)> {
        let constraints = Constraints::for_quality(facing, quality);
        let failure = match self.backend.open(constraints).await {
            Ok(stream) => return Ok((PendingStream(Some(stream)), quality)),
            Err(failure) => failure,
        };

        let err = failure.classify();
        if err != CaptureError::ConstraintsUnsupported || quality == QualityHint::Minimal {
            return Err(err);
        }

        warn!("Camera rejected {:?} constraints ({failure}), retrying with minimal set", quality);
        let minimal = Constraints::for_quality(facing, QualityHint::Minimal);
        match self.backend.open(minimal).await {
            Ok(stream) => Ok((PendingStream(Some(stream)), QualityHint::Minimal)),
            Err(failure) => Err(failure.classify()),
        }
    }

    fn release_locked(&self, inner: &mut DeviceInner) {
        let stream = self.lock_stream().take();
        let had_stream = match stream {
            Some(mut stream) => {
                stream.stop();
                true
            }
            None => false,
        };
        let had_session = inner.session.take().is_some();
        // An acquisition dropped mid-flight leaves `Acquiring` with nothing to release
        let stale_status = matches!(
            *self.status.borrow(),
            DeviceStatus::Acquiring { .. } | DeviceStatus::Streaming { .. }
        );

        if had_stream {
            info!("Camera released");
        }
        if had_stream || had_session || stale_status {
            self.streaming.send_if_modified(|streaming| std::mem::replace(streaming, false));
            if !inner.disabled {
                self.set_status(DeviceStatus::Offline { last_error: None });
            }
        }
    }

    fn set_status(&self, status: DeviceStatus) {
        self.status.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
    }
}
