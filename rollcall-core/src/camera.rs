use crate::config::CameraConfig;
use image::{ImageBuffer, RgbImage};
use thiserror::Error;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture as V4lCapture;
use v4l::{Device, FourCC};

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("Failed to open camera {0}: {1}")]
    DeviceOpen(usize, String),
    #[error("Failed to capture frame: {0}")]
    Capture(String),
    #[error("Frame conversion failed: {0}")]
    Conversion(String),
    #[error("Frame source exhausted")]
    Exhausted,
}

/// Anything the capture loop can pull frames from
pub trait FrameSource {
    fn next_frame(&mut self) -> Result<RgbImage, CaptureError>;
}

pub struct Camera {
    index: usize,
    device: Device,
    width: u32,
    height: u32,
    format: FourCC,
}

impl Camera {
    /// Open the V4L2 device `/dev/video<index>` at the configured resolution
    pub fn open(index: usize, config: &CameraConfig) -> Result<Self, CaptureError> {
        let device =
            Device::new(index).map_err(|e| CaptureError::DeviceOpen(index, e.to_string()))?;

        let mut format = device
            .format()
            .map_err(|e| CaptureError::DeviceOpen(index, format!("Failed to get format: {}", e)))?;
        format.width = config.width;
        format.height = config.height;

        // Prefer MJPEG if available, fallback to YUYV
        for fourcc in [FourCC::new(b"MJPG"), FourCC::new(b"YUYV")] {
            format.fourcc = fourcc;
            if device.set_format(&format).is_ok() {
                break;
            }
        }

        let actual = device.format().map_err(|e| {
            CaptureError::DeviceOpen(index, format!("Failed to verify format: {}", e))
        })?;

        log::info!(
            "Camera {} initialized: {}x{} {}",
            index,
            actual.width,
            actual.height,
            actual.fourcc
        );

        Ok(Self {
            index,
            device,
            width: actual.width,
            height: actual.height,
            format: actual.fourcc,
        })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Capture a single frame
    pub fn capture_frame(&mut self) -> Result<RgbImage, CaptureError> {
        let mut stream = MmapStream::with_buffers(&self.device, v4l::buffer::Type::VideoCapture, 4)
            .map_err(|e| CaptureError::Capture(format!("Failed to create stream: {}", e)))?;

        let (buf, _meta) = stream
            .next()
            .map_err(|e| CaptureError::Capture(e.to_string()))?;

        match self.format.str() {
            Ok("MJPG") => decode_mjpeg(buf),
            Ok("YUYV") => decode_yuyv(buf, self.width, self.height),
            _ => Err(CaptureError::Conversion(format!(
                "Unsupported pixel format: {}",
                self.format
            ))),
        }
    }

    /// Indices in `0..max_index` that open and deliver at least one frame
    pub fn available_indices(max_index: usize, config: &CameraConfig) -> Vec<usize> {
        (0..max_index)
            .filter(|&index| match Camera::open(index, config) {
                Ok(mut camera) => match camera.capture_frame() {
                    Ok(_) => true,
                    Err(e) => {
                        log::debug!("Camera {} opened but gave no frame: {}", index, e);
                        false
                    }
                },
                Err(e) => {
                    log::debug!("{}", e);
                    false
                }
            })
            .collect()
    }
}

impl FrameSource for Camera {
    fn next_frame(&mut self) -> Result<RgbImage, CaptureError> {
        self.capture_frame()
    }
}

fn decode_mjpeg(data: &[u8]) -> Result<RgbImage, CaptureError> {
    let img = image::load_from_memory_with_format(data, image::ImageFormat::Jpeg)
        .map_err(|e| CaptureError::Conversion(format!("MJPEG decode failed: {}", e)))?;
    Ok(img.to_rgb8())
}

/// YUYV packs two pixels into four bytes: Y0 U Y1 V
fn decode_yuyv(data: &[u8], width: u32, height: u32) -> Result<RgbImage, CaptureError> {
    let (w, h) = (width as usize, height as usize);
    if data.len() < w * h * 2 {
        return Err(CaptureError::Conversion("YUYV buffer too small".to_string()));
    }

    let to_rgb = |y: i32, u: i32, v: i32| {
        [
            (y + ((1436 * v) >> 10)).clamp(0, 255) as u8,
            (y - ((354 * u + 732 * v) >> 10)).clamp(0, 255) as u8,
            (y + ((1814 * u) >> 10)).clamp(0, 255) as u8,
        ]
    };

    let mut rgb = Vec::with_capacity(w * h * 3);
    for chunk in data[..w * h * 2].chunks_exact(4) {
        let u = chunk[1] as i32 - 128;
        let v = chunk[3] as i32 - 128;
        rgb.extend_from_slice(&to_rgb(chunk[0] as i32, u, v));
        rgb.extend_from_slice(&to_rgb(chunk[2] as i32, u, v));
    }

    ImageBuffer::from_raw(width, height, rgb)
        .ok_or_else(|| CaptureError::Conversion("Failed to create RGB image".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_yuyv_gray() {
        // Neutral chroma gives gray pixels equal to luma
        let data = [100u8, 128, 200, 128, 50, 128, 0, 128];
        let img = decode_yuyv(&data, 2, 2).unwrap();
        assert_eq!(img.get_pixel(0, 0).0, [100, 100, 100]);
        assert_eq!(img.get_pixel(1, 0).0, [200, 200, 200]);
        assert_eq!(img.get_pixel(0, 1).0, [50, 50, 50]);
        assert_eq!(img.get_pixel(1, 1).0, [0, 0, 0]);
    }

    #[test]
    fn test_decode_yuyv_short_buffer() {
        assert!(matches!(
            decode_yuyv(&[0u8; 4], 2, 2),
            Err(CaptureError::Conversion(_))
        ));
    }

    #[test]
    fn test_decode_mjpeg_garbage() {
        assert!(decode_mjpeg(b"not a jpeg").is_err());
    }

    #[test]
    #[ignore] // Requires actual camera hardware
    fn test_camera_capture() {
        let config = CameraConfig {
            index: Some(0),
            width: 640,
            height: 480,
            max_index: 1,
        };

        let mut camera = Camera::open(0, &config).expect("Failed to open camera");
        let frame = camera.capture_frame().expect("Failed to capture frame");
        assert_eq!(frame.width(), config.width);
    }
}
