use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use image::codecs::png::PngEncoder;
use image::{ColorType, ImageEncoder, Rgb, RgbImage};

use crate::errors::{AppError, AppResult};

#[cfg(feature = "v4l")]
mod device;
#[cfg(any(feature = "v4l", test))]
mod worker;

#[cfg(feature = "v4l")]
pub use device::{check_device, CaptureConfig, V4lFrameSource};

/// One video sample.
#[derive(Debug, Clone)]
pub struct Frame {
    pub image: RgbImage,
    pub captured_at: DateTime<Utc>,
}

impl Frame {
    pub fn new(image: RgbImage) -> Self {
        Self {
            image,
            captured_at: Utc::now(),
        }
    }
}

/// Supplies sequential frames. Errors are device failures and abort the
/// session.
#[async_trait]
pub trait FrameSource: Send {
    async fn get_frame(&mut self) -> AppResult<Frame>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceLocator {
    Index(u32),
    Path(PathBuf),
}

impl DeviceLocator {
    pub fn from_option(device: Option<String>) -> Self {
        match device {
            Some(text) => {
                if let Ok(index) = text.parse::<u32>() {
                    DeviceLocator::Index(index)
                } else {
                    DeviceLocator::Path(PathBuf::from(text))
                }
            }
            None => DeviceLocator::Index(0),
        }
    }

    pub fn display(&self) -> String {
        match self {
            DeviceLocator::Index(i) => format!("/dev/video{i}"),
            DeviceLocator::Path(path) => path.display().to_string(),
        }
    }
}

/// Converts a raw camera buffer into RGB. Luma-only formats are replicated
/// across channels.
pub fn convert_frame_to_rgb(
    data: &[u8],
    width: u32,
    height: u32,
    pixel_format: &str,
) -> AppResult<RgbImage> {
    let expected_pixels = width as usize * height as usize;

    let buffer = match pixel_format {
        "Y16" => {
            ensure_len(data, expected_pixels * 2, pixel_format)?;
            data[..expected_pixels * 2]
                .chunks_exact(2)
                .flat_map(|pair| [pair[1]; 3])
                .collect::<Vec<u8>>()
        }
        "GREY" | "Y08" => {
            ensure_len(data, expected_pixels, pixel_format)?;
            data[..expected_pixels]
                .iter()
                .flat_map(|value| [*value; 3])
                .collect::<Vec<u8>>()
        }
        "RGB3" => {
            ensure_len(data, expected_pixels * 3, pixel_format)?;
            data[..expected_pixels * 3].to_vec()
        }
        "YUYV" => {
            if width % 2 != 0 {
                return Err(AppError::FrameProcessing(format!(
                    "YUYV frame width {width} is not even"
                )));
            }
            ensure_len(data, expected_pixels * 2, pixel_format)?;
            let mut buffer = Vec::with_capacity(expected_pixels * 3);
            for chunk in data[..expected_pixels * 2].chunks_exact(4) {
                let (y0, u, y1, v) = (chunk[0], chunk[1], chunk[2], chunk[3]);
                buffer.extend_from_slice(&yuv_to_rgb(y0, u, v).0);
                buffer.extend_from_slice(&yuv_to_rgb(y1, u, v).0);
            }
            buffer
        }
        other => {
            return Err(AppError::FrameProcessing(format!(
                "unsupported conversion from pixel format {other}"
            )))
        }
    };

    RgbImage::from_vec(width, height, buffer)
        .ok_or_else(|| AppError::FrameProcessing("failed to build image buffer".into()))
}

fn ensure_len(data: &[u8], expected: usize, pixel_format: &str) -> AppResult<()> {
    if data.len() < expected {
        return Err(AppError::FrameProcessing(format!(
            "expected {} bytes for {} frame, got {}",
            expected,
            pixel_format,
            data.len()
        )));
    }
    Ok(())
}

// BT.601 studio-swing conversion.
fn yuv_to_rgb(y: u8, u: u8, v: u8) -> Rgb<u8> {
    let c = y as i32 - 16;
    let d = u as i32 - 128;
    let e = v as i32 - 128;
    let clamp = |value: i32| ((value + 128) >> 8).clamp(0, 255) as u8;
    Rgb([
        clamp(298 * c + 409 * e),
        clamp(298 * c - 100 * d - 208 * e),
        clamp(298 * c + 516 * d),
    ])
}

/// Writes `image` as PNG, creating parent directories as needed.
pub fn write_image(image: &RgbImage, path: &Path) -> AppResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let file = fs::File::create(path)?;
    let mut writer = BufWriter::new(file);
    PngEncoder::new(&mut writer)
        .write_image(image.as_raw(), image.width(), image.height(), ColorType::Rgb8)
        .map_err(|source| AppError::ImageEncode {
            path: path.to_path_buf(),
            source,
        })?;
    writer.flush()?;
    Ok(())
}
