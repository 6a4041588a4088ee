//! Still-frame sources for the image side of the stream.
//!
//! Screen capture uses `xcap`; camera capture uses `nokhwa` behind the
//! `camera` feature, with a stub that errors at open time otherwise.
//! Frames are downscaled and JPEG-encoded here so the pipeline only ever
//! sees wire-ready payloads.

use anyhow::{Context, Result};
use image::DynamicImage;
use tracing::info;

/// Longest edge a frame is downscaled to before encoding.
pub const MAX_DIMENSION: u32 = 1024;
const JPEG_QUALITY: u8 = 75;
const JPEG_MIME: &str = "image/jpeg";

/// A frame already converted to its wire format.
#[derive(Debug, Clone)]
pub struct EncodedFrame {
    pub mime_type: &'static str,
    pub data: Vec<u8>,
}

/// One-shot frame acquisition. `Ok(None)` means the source ran dry,
/// which ends the owning producer cleanly; `Err` is a device failure.
pub trait FrameSource {
    fn grab(&mut self) -> Result<Option<EncodedFrame>>;
}

/// Captures the primary monitor.
#[cfg(feature = "capture")]
pub struct ScreenSource {
    monitor: xcap::Monitor,
}

#[cfg(feature = "capture")]
impl ScreenSource {
    pub fn open() -> Result<Self> {
        let monitors = xcap::Monitor::all().context("failed to enumerate monitors")?;
        let monitor = monitors
            .iter()
            .find(|m| m.is_primary().unwrap_or(false))
            .or_else(|| monitors.first())
            .context("no monitors found")?
            .clone();

        info!(
            monitor = %monitor.name().unwrap_or_else(|_| "unknown".to_string()),
            "capturing screen"
        );
        Ok(Self { monitor })
    }
}

#[cfg(feature = "capture")]
impl FrameSource for ScreenSource {
    fn grab(&mut self) -> Result<Option<EncodedFrame>> {
        match self.monitor.capture_image() {
            Ok(image) => Ok(Some(encode_jpeg(DynamicImage::ImageRgba8(image))?)),
            // The monitor going away (undocked, session locked) ends the
            // source rather than the session.
            Err(e) => {
                info!(error = %e, "screen source stopped producing frames");
                Ok(None)
            }
        }
    }
}

#[cfg(not(feature = "capture"))]
pub struct ScreenSource;

#[cfg(not(feature = "capture"))]
impl ScreenSource {
    pub fn open() -> Result<Self> {
        anyhow::bail!("screen capture not compiled in (enable the `capture` feature)")
    }
}

#[cfg(not(feature = "capture"))]
impl FrameSource for ScreenSource {
    fn grab(&mut self) -> Result<Option<EncodedFrame>> {
        Ok(None)
    }
}

/// Captures the default camera.
#[cfg(feature = "camera")]
pub struct CameraSource {
    camera: nokhwa::Camera,
}

#[cfg(feature = "camera")]
impl CameraSource {
    pub fn open() -> Result<Self> {
        use nokhwa::pixel_format::RgbFormat;
        use nokhwa::utils::{CameraIndex, RequestedFormat, RequestedFormatType};

        let format = RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestFrameRate);
        let mut camera = nokhwa::Camera::new(CameraIndex::Index(0), format)
            .context("failed to open the default camera")?;
        camera
            .open_stream()
            .context("failed to start the camera stream")?;

        info!("capturing camera 0");
        Ok(Self { camera })
    }
}

#[cfg(feature = "camera")]
impl FrameSource for CameraSource {
    fn grab(&mut self) -> Result<Option<EncodedFrame>> {
        use nokhwa::pixel_format::RgbFormat;

        match self.camera.frame() {
            Ok(frame) => {
                let decoded = frame
                    .decode_image::<RgbFormat>()
                    .context("failed to decode camera frame")?;
                Ok(Some(encode_jpeg(DynamicImage::ImageRgb8(decoded))?))
            }
            Err(e) => {
                info!(error = %e, "camera stopped producing frames");
                Ok(None)
            }
        }
    }
}

#[cfg(not(feature = "camera"))]
pub struct CameraSource;

#[cfg(not(feature = "camera"))]
impl CameraSource {
    pub fn open() -> Result<Self> {
        anyhow::bail!("camera capture not compiled in (enable the `camera` feature)")
    }
}

#[cfg(not(feature = "camera"))]
impl FrameSource for CameraSource {
    fn grab(&mut self) -> Result<Option<EncodedFrame>> {
        Ok(None)
    }
}

/// Bound the frame to `MAX_DIMENSION` and encode it as JPEG.
pub(crate) fn encode_jpeg(image: DynamicImage) -> Result<EncodedFrame> {
    let image = if image.width().max(image.height()) > MAX_DIMENSION {
        image.thumbnail(MAX_DIMENSION, MAX_DIMENSION)
    } else {
        image
    };
    let rgb = image.to_rgb8();

    let mut jpeg = Vec::new();
    let mut encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut jpeg, JPEG_QUALITY);
    encoder
        .encode(
            rgb.as_raw(),
            rgb.width(),
            rgb.height(),
            image::ExtendedColorType::Rgb8,
        )
        .context("JPEG encoding failed")?;

    Ok(EncodedFrame {
        mime_type: JPEG_MIME,
        data: jpeg,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oversized_frames_are_bounded_to_the_max_dimension() {
        let image = DynamicImage::ImageRgba8(image::RgbaImage::from_pixel(
            2048,
            512,
            image::Rgba([10, 20, 30, 255]),
        ));
        let frame = encode_jpeg(image).unwrap();
        assert_eq!(frame.mime_type, "image/jpeg");

        let decoded = image::load_from_memory(&frame.data).unwrap();
        assert!(decoded.width() <= MAX_DIMENSION);
        assert!(decoded.height() <= MAX_DIMENSION);
        // Aspect ratio survives the downscale.
        assert_eq!(decoded.width(), 1024);
        assert_eq!(decoded.height(), 256);
    }

    #[test]
    fn small_frames_keep_their_dimensions() {
        let image = DynamicImage::ImageRgba8(image::RgbaImage::from_pixel(
            320,
            200,
            image::Rgba([0, 0, 0, 255]),
        ));
        let frame = encode_jpeg(image).unwrap();
        let decoded = image::load_from_memory(&frame.data).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (320, 200));
    }
}
