//! Stream health polling and detection overlay against mock stream proxies.

use std::sync::Arc;
use std::time::Duration;

use birdieo_shared::{AuthContext, StreamClient};
use birdieo_station::health_monitor::{MonitorSettings, MonitoredSource, StreamHealthMonitor};
use birdieo_station::virtual_backend::VirtualMediaBackend;
use birdieo_station::{CaptureDevice, DetectionOverlayRenderer, Facing, QualityHint};
use image::RgbaImage;
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn settings() -> MonitorSettings {
    MonitorSettings {
        health_interval: Duration::from_millis(40),
        detection_interval: Duration::from_millis(40),
        demo_detections: false,
    }
}

fn source(name: &str, url: &str) -> MonitoredSource {
    MonitoredSource {
        name: name.to_string(),
        client: StreamClient::new(url).unwrap(),
        detections: true,
    }
}

async fn proxy_with_detections() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true, "age_seconds": 1.25})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/analyze"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "ok": true,
            "width": 1280,
            "height": 720,
            "detections": [
                {"label": "person", "box": {"x": 400, "y": 200, "w": 120, "h": 300}, "confidence": 0.9},
                {"label": "flag", "box": {"x": 900, "y": 100, "w": 8, "h": 400}},
                {"label": "golf_area", "box": {"x": 0, "y": 0, "w": 1280, "h": 720}}
            ]
        })))
        .mount(&server)
        .await;
    server
}

#[tokio::test]
async fn test_one_failing_source_does_not_affect_another() {
    let broken = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
        .mount(&broken)
        .await;
    let working = proxy_with_detections().await;

    let monitor = StreamHealthMonitor::builder(
        vec![source("range", &broken.uri()), source("tee", &working.uri())],
        settings(),
    )
    .spawn(AuthContext::anonymous());

    let report = monitor
        .health()
        .wait_for(|r| r.tick >= 2)
        .await
        .unwrap()
        .clone();

    let range = report.source("range").unwrap();
    assert!(!range.online);
    assert!(range.error.is_some());

    let tee = report.source("tee").unwrap();
    assert!(tee.online);
    assert_eq!(tee.age_seconds, Some(1.25));
    assert!(tee.error.is_none());

    monitor.stop().await;
}

#[tokio::test]
async fn test_capture_streaming_is_reported() {
    let working = proxy_with_detections().await;
    let device = CaptureDevice::new(Arc::new(VirtualMediaBackend::new(64, 48)));

    let monitor = StreamHealthMonitor::builder(vec![source("tee", &working.uri())], settings())
        .capture_activity(device.streaming())
        .spawn(AuthContext::anonymous());

    let mut health = monitor.health();
    let first = health.wait_for(|r| r.tick >= 1).await.unwrap().clone();
    assert!(!first.capture_streaming);

    device.acquire(Facing::Front, QualityHint::High).await.unwrap();
    health.wait_for(|r| r.capture_streaming).await.unwrap();

    device.release().await;
    health.wait_for(|r| !r.capture_streaming).await.unwrap();
    monitor.stop().await;
}

#[tokio::test]
async fn test_detections_render_identically_twice() {
    let working = proxy_with_detections().await;
    let monitor = StreamHealthMonitor::builder(vec![source("tee", &working.uri())], settings())
        .spawn(AuthContext::anonymous());

    let set = monitor
        .detections()
        .wait_for(|d| d.contains_key("tee"))
        .await
        .unwrap()
        .clone();
    monitor.stop().await;

    let frame = &set["tee"];
    assert_eq!(frame.result.people.len(), 1);
    assert_eq!(frame.result.flagstick.len(), 1);
    assert!(frame.result.golf_balls.is_empty());

    // Overlay drawn at display size, half the source resolution
    let renderer = DetectionOverlayRenderer::default();
    let mut first = RgbaImage::new(640, 360);
    let mut second = RgbaImage::new(640, 360);
    renderer.render(&mut first, &frame.result, frame.frame_size);
    renderer.render(&mut second, &frame.result, frame.frame_size);
    renderer.render(&mut second, &frame.result, frame.frame_size);
    assert_eq!(first.as_raw(), second.as_raw());

    // Person box left edge lands at x = 200 after scaling
    assert_eq!(*first.get_pixel(200, 150), renderer.style().person);
}
