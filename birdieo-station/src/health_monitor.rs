//! Background polling of stream health, camera processing status and
//! detections.
//!
//! Polling runs at a fixed cadence with no backoff. A failing source only
//! marks its own snapshot offline. Each tick publishes a complete report that
//! replaces the previous one wholesale.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use birdieo_shared::{ApiClient, AuthContext, CameraStatus, ClientError, DetectionResult, StreamClient};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::{StationConfig, StreamSourceConfig};

/// Frame size assumed for demo detections when the service reports none.
const DEMO_FRAME_SIZE: (u32, u32) = (1280, 720);

/// A stream proxy being monitored.
#[derive(Debug, Clone)]
pub struct MonitoredSource {
    pub name: String,
    pub client: StreamClient,
    /// Poll `/analyze` while this source is online
    pub detections: bool,
}

impl MonitoredSource {
    pub fn from_config(config: &StreamSourceConfig) -> Result<Self, ClientError> {
        Ok(Self {
            name: config.name.clone(),
            client: config.client()?,
            detections: config.detections,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MonitorSettings {
    pub health_interval: Duration,
    pub detection_interval: Duration,
    pub demo_detections: bool,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            health_interval: Duration::from_secs(2),
            detection_interval: Duration::from_secs(2),
            demo_detections: false,
        }
    }
}

impl From<&StationConfig> for MonitorSettings {
    fn from(config: &StationConfig) -> Self {
        Self {
            health_interval: config.health_interval(),
            detection_interval: config.detection_interval(),
            demo_detections: config.demo_detections,
        }
    }
}

/// Point-in-time health of one source.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamHealthSnapshot {
    pub source: String,
    pub online: bool,
    /// Seconds since the proxy's frame was refreshed
    pub age_seconds: Option<f64>,
    pub error: Option<String>,
    pub fetched_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CameraProcessingSnapshot {
    pub status: Option<CameraStatus>,
    pub error: Option<String>,
    pub fetched_at: DateTime<Utc>,
}

/// Everything one health tick observed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HealthReport {
    /// 0 until the first tick completes
    pub tick: u64,
    pub streams: Vec<StreamHealthSnapshot>,
    pub camera: Option<CameraProcessingSnapshot>,
    /// Whether the capture device was streaming at tick time
    pub capture_streaming: bool,
}

impl HealthReport {
    pub fn source(&self, name: &str) -> Option<&StreamHealthSnapshot> {
        self.streams.iter().find(|s| s.source == name)
    }

    pub fn online_count(&self) -> usize {
        self.streams.iter().filter(|s| s.online).count()
    }
}

/// Latest detections for one source.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionFrame {
    pub source: String,
    pub result: DetectionResult,
    /// Source frame dimensions the boxes are expressed in
    pub frame_size: Option<(u32, u32)>,
    /// Fabricated layout, not real inference
    pub demo: bool,
    pub error: Option<String>,
    pub fetched_at: DateTime<Utc>,
}

/// Detections keyed by source name. Offline sources are absent.
pub type DetectionSet = BTreeMap<String, DetectionFrame>;

/// Builder for [`StreamHealthMonitor`].
pub struct MonitorBuilder {
    sources: Vec<MonitoredSource>,
    settings: MonitorSettings,
    api: Option<ApiClient>,
    capture_streaming: Option<watch::Receiver<bool>>,
}

impl MonitorBuilder {
    /// Also poll `/camera/status` on the backend API.
    pub fn camera_status(mut self, api: ApiClient) -> Self {
        self.api = Some(api);
        self
    }

    /// Report the capture device's streaming flag alongside stream health.
    pub fn capture_activity(mut self, streaming: watch::Receiver<bool>) -> Self {
        self.capture_streaming = Some(streaming);
        self
    }

    /// Start polling. Must be called from within a tokio runtime.
    pub fn spawn(self, auth: AuthContext) -> StreamHealthMonitor {
        StreamHealthMonitor::spawn(self, auth)
    }
}

/// Owns the polling tasks. Dropping it stops them.
pub struct StreamHealthMonitor {
    health: watch::Receiver<HealthReport>,
    detections: watch::Receiver<DetectionSet>,
    handles: Vec<JoinHandle<()>>,
    error_count: Arc<AtomicUsize>,
}

impl StreamHealthMonitor {
    pub fn builder(sources: Vec<MonitoredSource>, settings: MonitorSettings) -> MonitorBuilder {
        MonitorBuilder {
            sources,
            settings,
            api: None,
            capture_streaming: None,
        }
    }

    fn spawn(builder: MonitorBuilder, auth: AuthContext) -> Self {
        let MonitorBuilder {
            sources,
            settings,
            api,
            capture_streaming,
        } = builder;

        let (health_tx, health_rx) = watch::channel(HealthReport::default());
        let (detections_tx, detections_rx) = watch::channel(DetectionSet::new());
        let error_count = Arc::new(AtomicUsize::new(0));

        info!(
            "Starting stream monitor for {} source(s), health every {:?}, detections every {:?}",
            sources.len(),
            settings.health_interval,
            settings.detection_interval
        );
        if settings.demo_detections {
            warn!("Demo detections enabled: analysis results will be replaced with a fixed layout");
        }

        let health_task = {
            let sources = sources.clone();
            let auth = auth.clone();
            let error_count = error_count.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(settings.health_interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                let mut tick = 0;
                loop {
                    ticker.tick().await;
                    tick += 1;

                    let (streams, camera) = tokio::join!(
                        join_all(sources.iter().map(|s| poll_health(s, &auth))),
                        poll_camera(api.as_ref(), &auth),
                    );
                    let failures = streams.iter().filter(|s| s.error.is_some()).count()
                        + camera.as_ref().map_or(0, |c| usize::from(c.error.is_some()));
                    error_count.fetch_add(failures, Ordering::Relaxed);

                    let capture_streaming = capture_streaming
                        .as_ref()
                        .is_some_and(|rx| *rx.borrow());
                    health_tx.send_replace(HealthReport {
                        tick,
                        streams,
                        camera,
                        capture_streaming,
                    });
                }
            })
        };

        let detection_task = {
            let health = health_rx.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(settings.detection_interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;

                    let online: Vec<&MonitoredSource> = {
                        let report = health.borrow();
                        sources
                            .iter()
                            .filter(|s| s.detections && report.source(&s.name).is_some_and(|h| h.online))
                            .collect()
                    };
                    let frames = join_all(
                        online
                            .into_iter()
                            .map(|s| poll_detections(s, &auth, settings.demo_detections)),
                    )
                    .await;

                    detections_tx.send_replace(
                        frames
                            .into_iter()
                            .map(|frame| (frame.source.clone(), frame))
                            .collect(),
                    );
                }
            })
        };

        Self {
            health: health_rx,
            detections: detections_rx,
            handles: vec![health_task, detection_task],
            error_count,
        }
    }

    pub fn health(&self) -> watch::Receiver<HealthReport> {
        self.health.clone()
    }

    pub fn detections(&self) -> watch::Receiver<DetectionSet> {
        self.detections.clone()
    }

    /// Stop polling and wait for the tasks to wind down.
    pub async fn stop(mut self) {
        let handles = std::mem::take(&mut self.handles);
        for handle in &handles {
            handle.abort();
        }
        for handle in handles {
            let _ = handle.await;
        }
        info!("Stream monitor stopped");
    }
}

impl Drop for StreamHealthMonitor {
    fn drop(&mut self) {
        for handle in &self.handles {
            handle.abort();
        }

        let errors = self.error_count.load(Ordering::Relaxed);
        if errors > 0 {
            debug!("StreamHealthMonitor: {errors} poll(s) failed during lifetime");
        }
    }
}

async fn poll_health(source: &MonitoredSource, auth: &AuthContext) -> StreamHealthSnapshot {
    let result = source.client.health(auth).await;
    let fetched_at = Utc::now();
    match result {
        Ok(health) => StreamHealthSnapshot {
            source: source.name.clone(),
            online: health.ok,
            age_seconds: health.age_seconds,
            error: None,
            fetched_at,
        },
        Err(e) => {
            debug!("Health poll for {} failed: {e}", source.name);
            StreamHealthSnapshot {
                source: source.name.clone(),
                online: false,
                age_seconds: None,
                error: Some(e.to_string()),
                fetched_at,
            }
        }
    }
}

async fn poll_camera(api: Option<&ApiClient>, auth: &AuthContext) -> Option<CameraProcessingSnapshot> {
    let api = api?;
    let result = api.camera_status(auth).await;
    let fetched_at = Utc::now();
    Some(match result {
        Ok(status) => CameraProcessingSnapshot {
            status: Some(status),
            error: None,
            fetched_at,
        },
        Err(e) => {
            debug!("Camera status poll failed: {e}");
            CameraProcessingSnapshot {
                status: None,
                error: Some(e.to_string()),
                fetched_at,
            }
        }
    })
}

async fn poll_detections(source: &MonitoredSource, auth: &AuthContext, demo: bool) -> DetectionFrame {
    let result = source.client.analyze(auth).await;
    let mut frame = DetectionFrame {
        source: source.name.clone(),
        result: DetectionResult::default(),
        frame_size: None,
        demo: false,
        error: None,
        fetched_at: Utc::now(),
    };

    match result {
        Ok(response) => {
            frame.frame_size = response.width.zip(response.height);
            if demo {
                let (w, h) = frame.frame_size.unwrap_or(DEMO_FRAME_SIZE);
                debug!("Serving demo detections for {} ({}x{})", source.name, w, h);
                frame.result = DetectionResult::demo(w, h);
                frame.frame_size = Some((w, h));
                frame.demo = true;
            } else if response.ok {
                frame.result = response
                    .detections
                    .map(|payload| payload.into_result())
                    .unwrap_or_default();
            } else {
                frame.error = response.reason.or_else(|| Some("analysis unavailable".to_string()));
            }
        }
        Err(e) => {
            debug!("Detection poll for {} failed: {e}", source.name);
            frame.error = Some(e.to_string());
        }
    }
    frame
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fast_settings(demo: bool) -> MonitorSettings {
        MonitorSettings {
            health_interval: Duration::from_millis(50),
            detection_interval: Duration::from_millis(50),
            demo_detections: demo,
        }
    }

    async fn healthy_server(age: f64) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"ok": true, "age_seconds": age})),
            )
            .mount(&server)
            .await;
        server
    }

    fn source(name: &str, url: &str) -> MonitoredSource {
        MonitoredSource {
            name: name.to_string(),
            client: StreamClient::new(url).unwrap(),
            detections: true,
        }
    }

    #[tokio::test]
    async fn test_failures_stay_local_to_source() {
        let failing = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(500).set_body_string("proxy down"))
            .mount(&failing)
            .await;
        let healthy = healthy_server(0.7).await;

        let monitor = StreamHealthMonitor::builder(
            vec![source("a", &failing.uri()), source("b", &healthy.uri())],
            fast_settings(false),
        )
        .spawn(AuthContext::anonymous());

        let mut rx = monitor.health();
        let report = rx.wait_for(|r| r.tick >= 1).await.unwrap().clone();

        let a = report.source("a").unwrap();
        assert!(!a.online);
        assert!(a.error.as_deref().unwrap().contains("500"));
        assert_eq!(a.age_seconds, None);

        let b = report.source("b").unwrap();
        assert!(b.online);
        assert_eq!(b.age_seconds, Some(0.7));
        assert_eq!(b.error, None);

        monitor.stop().await;
    }

    #[tokio::test]
    async fn test_polling_continues_after_failures() {
        let monitor = StreamHealthMonitor::builder(
            vec![source("gone", "http://127.0.0.1:9")],
            fast_settings(false),
        )
        .spawn(AuthContext::anonymous());

        let mut rx = monitor.health();
        let report = rx.wait_for(|r| r.tick >= 3).await.unwrap().clone();
        assert_eq!(report.online_count(), 0);
        monitor.stop().await;
    }

    #[tokio::test]
    async fn test_stop_halts_polling() {
        let server = healthy_server(0.1).await;
        let monitor = StreamHealthMonitor::builder(
            vec![source("a", &server.uri())],
            fast_settings(false),
        )
        .spawn(AuthContext::anonymous());
        monitor.health().wait_for(|r| r.tick >= 1).await.unwrap();
        monitor.stop().await;

        let before = server.received_requests().await.unwrap().len();
        tokio::time::sleep(Duration::from_millis(200)).await;
        let after = server.received_requests().await.unwrap().len();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn test_camera_status_and_capture_flag() {
        let stream = healthy_server(1.0).await;
        let api = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/camera/status"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "active": true,
                "last_motion_time": 1700000000.0,
                "clips_created": 4,
                "stream_url": "http://cam/stream"
            })))
            .mount(&api)
            .await;

        let (_streaming_tx, streaming_rx) = watch::channel(true);
        let monitor = StreamHealthMonitor::builder(vec![source("tee", &stream.uri())], fast_settings(false))
            .camera_status(ApiClient::new(&api.uri()).unwrap())
            .capture_activity(streaming_rx)
            .spawn(AuthContext::bearer("t"));

        let report = monitor.health().wait_for(|r| r.tick >= 1).await.unwrap().clone();
        let camera = report.camera.unwrap();
        assert_eq!(camera.status.unwrap().clips_created, 4);
        assert!(report.capture_streaming);
        monitor.stop().await;
    }

    #[tokio::test]
    async fn test_detections_only_for_online_sources() {
        let online = healthy_server(0.2).await;
        Mock::given(method("GET"))
            .and(path("/analyze"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "ok": true,
                "width": 640,
                "height": 360,
                "detections": {"golf_balls": [{"bbox": {"x": 1, "y": 2, "width": 3, "height": 4}, "confidence": 0.5}]}
            })))
            .mount(&online)
            .await;

        let monitor = StreamHealthMonitor::builder(
            vec![source("up", &online.uri()), source("down", "http://127.0.0.1:9")],
            fast_settings(false),
        )
        .spawn(AuthContext::anonymous());

        let set = monitor
            .detections()
            .wait_for(|d| d.contains_key("up"))
            .await
            .unwrap()
            .clone();
        assert!(!set.contains_key("down"));
        let frame = &set["up"];
        assert!(!frame.demo);
        assert_eq!(frame.result.golf_balls.len(), 1);
        assert!(frame.result.people.is_empty());
        assert_eq!(frame.frame_size, Some((640, 360)));
        monitor.stop().await;
    }

    #[tokio::test]
    async fn test_demo_detections_are_flagged() {
        let server = healthy_server(0.2).await;
        Mock::given(method("GET"))
            .and(path("/analyze"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "ok": true, "width": 1000, "height": 500, "detections": {}
            })))
            .mount(&server)
            .await;

        let monitor = StreamHealthMonitor::builder(vec![source("tee", &server.uri())], fast_settings(true))
            .spawn(AuthContext::anonymous());

        let set = monitor
            .detections()
            .wait_for(|d| d.contains_key("tee"))
            .await
            .unwrap()
            .clone();
        let frame = &set["tee"];
        assert!(frame.demo);
        assert_eq!(frame.result, DetectionResult::demo(1000, 500));
        monitor.stop().await;
    }
}
