//! Guided identification-photo flow: face, front, side, back.
//!
//! A [`CaptureView`] ties the permission gate, capture device, countdown,
//! frame capturer and photo pipeline together for as long as the view is
//! open. Closing it cancels the countdown, stops the permission driver and
//! releases the camera. Submissions still in flight when it closes run to
//! completion, but their outcome no longer touches the view's state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use birdieo_shared::{AuthContext, PhotoType};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::StationConfig;
use crate::countdown::{CountdownController, DEFAULT_SETTLE_DELAY};
use crate::device::{CaptureDevice, CaptureSession};
use crate::error::{CaptureError, CaptureResult};
use crate::frame::{CapturedArtifact, FrameCapturer};
use crate::media::{Facing, QualityHint};
use crate::permission::{PermissionDriver, PermissionGate};
use crate::photo_pipeline::{PhotoPipeline, PhotoSubmission};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CaptureViewOptions {
    pub facing: Facing,
    pub quality: QualityHint,
    pub countdown_seconds: u32,
    pub tick: Duration,
    pub settle_delay: Duration,
}

impl Default for CaptureViewOptions {
    fn default() -> Self {
        Self {
            facing: Facing::Front,
            quality: QualityHint::High,
            countdown_seconds: 3,
            tick: Duration::from_secs(1),
            settle_delay: DEFAULT_SETTLE_DELAY,
        }
    }
}

impl From<&StationConfig> for CaptureViewOptions {
    fn from(config: &StationConfig) -> Self {
        Self {
            facing: config.facing,
            quality: config.quality,
            countdown_seconds: config.countdown_seconds,
            tick: Duration::from_secs(1),
            settle_delay: config.settle_delay(),
        }
    }
}

/// Guided-flow progress.
#[derive(Debug, Clone, Default)]
pub struct GuidedState {
    /// Photo to take next; `None` once all four are saved
    pub step: Option<PhotoType>,
    /// Captured but not yet confirmed
    pub pending: Option<Arc<CapturedArtifact>>,
    pub completed: Vec<PhotoSubmission>,
    pub last_error: Option<CaptureError>,
}

impl GuidedState {
    fn start() -> Self {
        Self {
            step: Some(PhotoType::Face),
            ..Default::default()
        }
    }

    pub fn is_complete(&self) -> bool {
        self.step.is_none()
    }

    /// Passive notices collected from every completed submission.
    pub fn notices(&self) -> impl Iterator<Item = &CaptureError> {
        self.completed.iter().flat_map(|s| s.notices.iter())
    }
}

/// One open capture view.
pub struct CaptureView {
    device: Arc<CaptureDevice>,
    gate: Arc<PermissionGate>,
    countdown: CountdownController,
    capturer: Arc<FrameCapturer>,
    pipeline: Arc<PhotoPipeline>,
    state: Arc<watch::Sender<GuidedState>>,
    open: Arc<AtomicBool>,
    driver: Mutex<Option<PermissionDriver>>,
    options: CaptureViewOptions,
}

impl CaptureView {
    /// Open the view and start acquiring the camera.
    pub async fn open(
        device: Arc<CaptureDevice>,
        gate: Arc<PermissionGate>,
        capturer: Arc<FrameCapturer>,
        pipeline: Arc<PhotoPipeline>,
        options: CaptureViewOptions,
    ) -> Self {
        let permission = gate.query_permission().await;
        info!("Capture view opened (camera permission: {permission})");

        let driver = gate.drive(device.clone(), options.facing, options.quality);
        let (state, _) = watch::channel(GuidedState::start());

        Self {
            device,
            gate,
            countdown: CountdownController::with_timing(options.tick, options.settle_delay),
            capturer,
            pipeline,
            state: Arc::new(state),
            open: Arc::new(AtomicBool::new(true)),
            driver: Mutex::new(Some(driver)),
            options,
        }
    }

    pub fn state(&self) -> watch::Receiver<GuidedState> {
        self.state.subscribe()
    }

    pub fn countdown(&self) -> &CountdownController {
        &self.countdown
    }

    pub fn device(&self) -> &Arc<CaptureDevice> {
        &self.device
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Start the countdown for the current step.
    ///
    /// Returns `false` if a countdown is already running, a photo is waiting
    /// for confirmation, or the sequence is complete.
    pub fn begin_capture(&self) -> bool {
        let step = {
            let state = self.state.borrow();
            match (state.step, &state.pending) {
                (Some(step), None) => step,
                _ => return false,
            }
        };

        let device = self.device.clone();
        let capturer = self.capturer.clone();
        let state = self.state.clone();
        let open = self.open.clone();

        self.countdown.start(self.options.countdown_seconds, move || {
            if !open.load(Ordering::SeqCst) {
                return;
            }
            let result = capturer.capture(&device, step);
            state.send_modify(|s| match result {
                Ok(artifact) => {
                    s.pending = Some(Arc::new(artifact));
                    s.last_error = None;
                }
                Err(e) => {
                    warn!("Capture of {step} photo failed: {e}");
                    s.last_error = Some(e);
                }
            });
        })
    }

    /// Discard the pending photo so the step can be captured again.
    pub fn retake(&self) {
        self.state.send_modify(|s| {
            if s.pending.take().is_some() {
                debug!("Pending photo discarded for retake");
            }
        });
    }

    /// Submit the pending photo and advance to the next step.
    ///
    /// If the view closes while the submission is in flight, the result is
    /// still returned but the guided state is left untouched.
    pub async fn confirm(&self, auth: &AuthContext, round_id: &str) -> CaptureResult<PhotoSubmission> {
        let artifact = self
            .state
            .borrow()
            .pending
            .clone()
            .ok_or(CaptureError::NoActiveSession)?;

        let result = self.pipeline.submit(auth, artifact.clone(), round_id).await;

        if !self.is_open() {
            debug!("Capture view closed during submission, discarding result");
            return result;
        }

        self.state.send_modify(|s| match &result {
            Ok(submission) => {
                // Only advance if the pending photo is still the one submitted
                if s.pending.as_ref().is_some_and(|p| Arc::ptr_eq(p, &artifact)) {
                    s.pending = None;
                    s.step = artifact.photo_type().next();
                    s.completed.push(submission.clone());
                    s.last_error = None;
                }
            }
            Err(e) => s.last_error = Some(e.clone()),
        });
        result
    }

    /// Switch between front and back cameras.
    pub async fn switch_camera(&self) -> CaptureResult<CaptureSession> {
        self.countdown.cancel();
        let result = self.device.switch_facing().await;
        self.gate.record_acquisition(&result);
        result
    }

    /// Explicit retry after an acquisition failure.
    pub async fn retry(&self) -> CaptureResult<CaptureSession> {
        let facing = self
            .device
            .session()
            .await
            .map_or(self.options.facing, |s| s.facing);
        let result = self.device.acquire(facing, self.options.quality).await;
        self.gate.record_acquisition(&result);
        result
    }

    /// Close the view: cancel the countdown, stop the permission driver and
    /// release the camera.
    pub async fn close(self) {
        self.shutdown().await;
    }

    /// Close a view that is shared with in-flight operations.
    pub async fn shutdown(&self) {
        if !self.open.swap(false, Ordering::SeqCst) {
            return;
        }
        self.countdown.cancel();
        let driver = self.take_driver();
        if let Some(driver) = driver {
            driver.shutdown().await;
        }
        self.device.release().await;
        info!("Capture view closed");
    }

    fn take_driver(&self) -> Option<PermissionDriver> {
        self.driver
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }
}

impl Drop for CaptureView {
    fn drop(&mut self) {
        if !self.open.swap(false, Ordering::SeqCst) {
            return;
        }
        self.countdown.cancel();
        // Dropping the driver aborts it
        drop(self.take_driver());

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let device = self.device.clone();
                handle.spawn(async move {
                    device.release().await;
                });
            }
            Err(_) => warn!("Capture view dropped outside a runtime; camera not released"),
        }
    }
}
