//! Still-frame capture from the live camera.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use birdieo_shared::PhotoType;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;
use tokio::sync::broadcast;
use tracing::debug;

use crate::device::CaptureDevice;
use crate::error::{CaptureError, CaptureResult};

pub const DEFAULT_JPEG_QUALITY: u8 = 85;

/// An encoded photo. Immutable once captured.
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedArtifact {
    jpeg: Bytes,
    width: u32,
    height: u32,
    photo_type: PhotoType,
    captured_at: DateTime<Utc>,
}

impl CapturedArtifact {
    /// Wrap already-encoded JPEG bytes, reading dimensions from the header.
    pub fn from_jpeg(jpeg: Bytes, photo_type: PhotoType) -> CaptureResult<Self> {
        let (width, height) = jpeg_dimensions(&jpeg)?;
        Ok(Self {
            jpeg,
            width,
            height,
            photo_type,
            captured_at: Utc::now(),
        })
    }

    pub fn jpeg(&self) -> &Bytes {
        &self.jpeg
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn photo_type(&self) -> PhotoType {
        self.photo_type
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.jpeg)
    }
}

/// Emitted on every successful capture so a UI can flash.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CaptureFlash {
    pub photo_type: PhotoType,
    pub captured_at: DateTime<Utc>,
}

/// Grabs the current live frame and encodes it as JPEG.
pub struct FrameCapturer {
    quality: u8,
    flash: broadcast::Sender<CaptureFlash>,
}

impl Default for FrameCapturer {
    fn default() -> Self {
        Self::new(DEFAULT_JPEG_QUALITY)
    }
}

impl FrameCapturer {
    pub fn new(quality: u8) -> Self {
        let (flash, _) = broadcast::channel(4);
        Self {
            quality: quality.clamp(1, 100),
            flash,
        }
    }

    pub fn subscribe_flash(&self) -> broadcast::Receiver<CaptureFlash> {
        self.flash.subscribe()
    }

    /// Capture the live frame at the camera's native resolution.
    pub fn capture(&self, device: &CaptureDevice, photo_type: PhotoType) -> CaptureResult<CapturedArtifact> {
        let frame = device.current_frame()?;
        let (width, height) = frame.dimensions();
        let jpeg = encode_jpeg(&frame, self.quality)?;
        let captured_at = Utc::now();

        debug!(
            "Captured {} photo {}x{} ({} bytes)",
            photo_type,
            width,
            height,
            jpeg.len()
        );
        let _ = self.flash.send(CaptureFlash {
            photo_type,
            captured_at,
        });

        Ok(CapturedArtifact {
            jpeg,
            width,
            height,
            photo_type,
            captured_at,
        })
    }
}

/// Encode an RGB frame as JPEG at the given quality.
pub fn encode_jpeg(frame: &RgbImage, quality: u8) -> CaptureResult<Bytes> {
    if frame.width() == 0 || frame.height() == 0 {
        return Err(CaptureError::Unknown("camera delivered an empty frame".into()));
    }

    let mut jpeg_bytes = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut jpeg_bytes, quality);
    encoder
        .encode_image(frame)
        .map_err(|e| CaptureError::Unknown(format!("JPEG encoding failed: {e}")))?;

    Ok(Bytes::from(jpeg_bytes))
}

/// Native dimensions of an encoded JPEG.
pub fn jpeg_dimensions(jpeg: &[u8]) -> CaptureResult<(u32, u32)> {
    image::ImageReader::with_format(std::io::Cursor::new(jpeg), image::ImageFormat::Jpeg)
        .into_dimensions()
        .map_err(|e| CaptureError::Unknown(format!("unreadable JPEG: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{Facing, QualityHint};
    use crate::virtual_backend::VirtualMediaBackend;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_capture_at_native_resolution() {
        let backend = Arc::new(VirtualMediaBackend::new(1280, 720));
        let device = CaptureDevice::new(backend);
        device.acquire(Facing::Back, QualityHint::High).await.unwrap();

        let capturer = FrameCapturer::default();
        let mut flash = capturer.subscribe_flash();
        let artifact = capturer.capture(&device, PhotoType::Side).unwrap();

        assert_eq!((artifact.width(), artifact.height()), (1280, 720));
        assert_eq!(artifact.photo_type(), PhotoType::Side);
        assert_eq!(&artifact.jpeg()[..2], &[0xFF, 0xD8]);
        assert_eq!(flash.try_recv().unwrap().photo_type, PhotoType::Side);

        let decoded = image::load_from_memory(artifact.jpeg()).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (1280, 720));
    }

    #[test]
    fn test_capture_without_session() {
        let backend = Arc::new(VirtualMediaBackend::new(64, 64));
        let device = CaptureDevice::new(backend);
        let err = FrameCapturer::default()
            .capture(&device, PhotoType::Face)
            .unwrap_err();
        assert_eq!(err, CaptureError::NoActiveSession);
    }

    #[test]
    fn test_from_jpeg_reads_dimensions() {
        let frame = RgbImage::from_pixel(12, 8, image::Rgb([10, 20, 30]));
        let jpeg = encode_jpeg(&frame, 85).unwrap();
        let artifact = CapturedArtifact::from_jpeg(jpeg.clone(), PhotoType::Face).unwrap();
        assert_eq!((artifact.width(), artifact.height()), (12, 8));
        assert_eq!(STANDARD.decode(artifact.to_base64()).unwrap(), jpeg.to_vec());
    }

    #[test]
    fn test_from_jpeg_rejects_garbage() {
        let err = CapturedArtifact::from_jpeg(Bytes::from_static(b"nope"), PhotoType::Face);
        assert!(err.is_err());
    }
}
