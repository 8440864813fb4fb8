use std::io;
use std::sync::mpsc;
use std::thread;

use async_trait::async_trait;
use tokio::sync::oneshot;
use tracing::{debug, info};
use v4l::buffer::Type;
use v4l::capability::{Capabilities, Flags as CapabilityFlags};
use v4l::format::FourCC;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::video::Capture;

use crate::errors::{AppError, AppResult};

use super::worker::{serve_frames, FrameReply};
use super::{convert_frame_to_rgb, DeviceLocator, Frame, FrameSource};

#[derive(Debug, Clone)]
pub struct CaptureConfig {
    pub device: DeviceLocator,
    pub pixel_format: String,
    pub warmup_frames: u32,
}

/// Camera-backed frame source. The device is opened and configured once, on
/// the first request, and then streamed on a dedicated thread until the
/// source is dropped. Warm-up frames are discarded once at stream start.
pub struct V4lFrameSource {
    config: CaptureConfig,
    requests: Option<mpsc::Sender<FrameReply>>,
    frames_read: u64,
}

impl V4lFrameSource {
    pub fn new(config: CaptureConfig) -> Self {
        Self {
            config,
            requests: None,
            frames_read: 0,
        }
    }

    async fn start(&self) -> AppResult<mpsc::Sender<FrameReply>> {
        let (requests, incoming) = mpsc::channel();
        let (ready_tx, ready) = oneshot::channel();
        let config = self.config.clone();
        thread::Builder::new()
            .name("v4l-capture".into())
            .spawn(move || run_capture_loop(config, ready_tx, incoming))
            .map_err(|err| device_error(&self.config.device, "failed to start capture thread", err))?;

        ready.await.map_err(|_| self.stopped())??;
        info!(
            device = %self.config.device.display(),
            pixel_format = %self.config.pixel_format,
            warmup_frames = self.config.warmup_frames,
            "capture stream started"
        );
        Ok(requests)
    }

    fn stopped(&self) -> AppError {
        AppError::FrameCapture {
            device: self.config.device.display(),
            message: "capture stream stopped".into(),
        }
    }
}

#[async_trait]
impl FrameSource for V4lFrameSource {
    async fn get_frame(&mut self) -> AppResult<Frame> {
        if self.requests.is_none() {
            self.requests = Some(self.start().await?);
        }
        let requests = self.requests.clone().ok_or_else(|| self.stopped())?;

        let (reply, frame) = oneshot::channel();
        let result = match requests.send(reply) {
            Ok(()) => frame.await.unwrap_or_else(|_| Err(self.stopped())),
            Err(_) => Err(self.stopped()),
        };
        if result.is_err() {
            // The loop has exited; the next request reopens the device.
            self.requests = None;
        }
        let image = result?;

        self.frames_read += 1;
        debug!(
            device = %self.config.device.display(),
            frame = self.frames_read,
            width = image.width(),
            height = image.height(),
            "captured frame"
        );
        Ok(Frame::new(image))
    }
}

/// Opens the device and checks it can stream video.
pub fn check_device(locator: &DeviceLocator) -> AppResult<()> {
    let device = open_device(locator)?;
    let caps = device
        .query_caps()
        .map_err(|err| device_error(locator, "failed to query capabilities", err))?;
    ensure_capabilities(&caps)
}

fn open_device(locator: &DeviceLocator) -> AppResult<v4l::Device> {
    let opened = match locator {
        DeviceLocator::Index(index) => v4l::Device::new(*index as usize),
        DeviceLocator::Path(path) => v4l::Device::with_path(path),
    };
    opened.map_err(|source| AppError::DeviceOpen {
        device: locator.display(),
        source,
    })
}

/// Driver failures after open are device failures, whichever ioctl hit them.
fn device_error(locator: &DeviceLocator, context: &str, err: io::Error) -> AppError {
    AppError::FrameCapture {
        device: locator.display(),
        message: format!("{context}: {err}"),
    }
}

/// Body of the capture thread: configure, report readiness, then serve
/// frames until the source goes away.
fn run_capture_loop(
    config: CaptureConfig,
    ready: oneshot::Sender<AppResult<()>>,
    requests: mpsc::Receiver<FrameReply>,
) {
    let (device, format) = match configure_device(&config) {
        Ok(configured) => configured,
        Err(err) => {
            let _ = ready.send(Err(err));
            return;
        }
    };
    let mut stream = match start_stream(&device, &config) {
        Ok(stream) => stream,
        Err(err) => {
            let _ = ready.send(Err(err));
            return;
        }
    };
    if ready.send(Ok(())).is_err() {
        return;
    }

    let negotiated = fourcc_to_string(format.fourcc);
    serve_frames(
        |wanted| {
            let (data, _) = stream
                .next()
                .map_err(|err| device_error(&config.device, "failed to read frame", err))?;
            if !wanted {
                return Ok(None);
            }
            convert_frame_to_rgb(data, format.width, format.height, &negotiated).map(Some)
        },
        requests,
    );
}

fn configure_device(config: &CaptureConfig) -> AppResult<(v4l::Device, v4l::Format)> {
    let locator = &config.device;
    let device = open_device(locator)?;
    let caps = device
        .query_caps()
        .map_err(|err| device_error(locator, "failed to query capabilities", err))?;
    ensure_capabilities(&caps)?;

    let requested = parse_fourcc(&config.pixel_format)
        .ok_or_else(|| AppError::UnsupportedFormat(config.pixel_format.clone()))?;
    let formats = device
        .enum_formats()
        .map_err(|err| device_error(locator, "failed to list pixel formats", err))?;
    if !formats.iter().any(|format| format.fourcc == requested) {
        return Err(AppError::UnsupportedFormat(config.pixel_format.clone()));
    }

    let mut format = device
        .format()
        .map_err(|err| device_error(locator, "failed to read format", err))?;
    format.fourcc = requested;
    let format = device
        .set_format(&format)
        .map_err(|err| device_error(locator, "failed to set format", err))?;
    debug!(
        device = %locator.display(),
        width = format.width,
        height = format.height,
        fourcc = %fourcc_to_string(format.fourcc),
        "negotiated capture format"
    );
    Ok((device, format))
}

fn start_stream<'a>(device: &'a v4l::Device, config: &CaptureConfig) -> AppResult<Stream<'a>> {
    let mut stream = Stream::with_buffers(device, Type::VideoCapture, 4)
        .map_err(|err| device_error(&config.device, "failed to start streaming", err))?;
    for idx in 0..config.warmup_frames {
        stream.next().map_err(|err| {
            device_error(
                &config.device,
                &format!("failed to read warm-up frame {}", idx + 1),
                err,
            )
        })?;
    }
    Ok(stream)
}

fn ensure_capabilities(caps: &Capabilities) -> AppResult<()> {
    let flags = caps.capabilities;
    let mut reasons = Vec::new();
    if !flags.contains(CapabilityFlags::VIDEO_CAPTURE) {
        reasons.push("missing VIDEO_CAPTURE".to_string());
    }
    if !flags.intersects(CapabilityFlags::READ_WRITE | CapabilityFlags::STREAMING) {
        reasons.push("missing READ_WRITE or STREAMING".to_string());
    }
    if reasons.is_empty() {
        Ok(())
    } else {
        Err(AppError::Capability(reasons.join(", ")))
    }
}

fn parse_fourcc(code: &str) -> Option<FourCC> {
    if code.is_empty() || code.len() > 4 {
        return None;
    }
    let mut repr = [b' '; 4];
    repr[..code.len()].copy_from_slice(code.as_bytes());
    Some(FourCC::new(&repr))
}

fn fourcc_to_string(fourcc: FourCC) -> String {
    String::from_utf8_lossy(&fourcc.repr)
        .trim_matches(|c| c == char::from(0) || c == ' ')
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fourcc_round_trips_short_codes() {
        let fourcc = parse_fourcc("Y16").unwrap();
        assert_eq!(fourcc_to_string(fourcc), "Y16");
        assert!(parse_fourcc("TOOLONG").is_none());
        assert!(parse_fourcc("").is_none());
    }

    #[test]
    fn driver_errors_after_open_are_device_failures() {
        let locator = DeviceLocator::Path("/dev/video7".into());
        let err = device_error(
            &locator,
            "failed to set format",
            io::Error::new(io::ErrorKind::InvalidInput, "invalid argument"),
        );

        assert!(matches!(err, AppError::FrameCapture { ref device, .. } if device == "/dev/video7"));
        assert_eq!(
            err.human_message(),
            "failed to acquire frame from /dev/video7: failed to set format: invalid argument"
        );
        assert_eq!(err.exit_code(), std::process::ExitCode::from(4));
    }
}
