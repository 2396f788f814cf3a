//! Camera frame source.
//!
//! `CameraSource` captures single frames from a local camera. It is responsible for:
//! - Opening the device node selected by index or path (e.g., 1 -> /dev/video1)
//! - Normalizing captured buffers to packed RGB24
//! - Reporting read failures as `CaptureError` so callers can skip the iteration
//!
//! Real devices require the `ingest-v4l2` feature. `stub://` devices are synthetic
//! and always available.

use std::path::Path;

use image::RgbImage;

use crate::error::CaptureError;

/// Camera selection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CameraDevice {
    /// Numeric index, mapped to `/dev/video<index>`.
    Index(u32),
    /// Explicit device node path.
    Path(String),
    /// Synthetic camera (`stub://<name>`).
    Stub(String),
}

impl CameraDevice {
    /// Parse a camera selection string.
    ///
    /// Returns `None` for `none`, `off` or an empty string (capture disabled).
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        if value.is_empty() || value.eq_ignore_ascii_case("none") || value.eq_ignore_ascii_case("off")
        {
            return None;
        }
        if let Some(name) = value.strip_prefix("stub://") {
            return Some(Self::Stub(name.to_string()));
        }
        match value.parse::<u32>() {
            Ok(index) => Some(Self::Index(index)),
            Err(_) => Some(Self::Path(value.to_string())),
        }
    }

    /// Device node (or stub URL) this selection refers to.
    pub fn node(&self) -> String {
        match self {
            Self::Index(index) => format!("/dev/video{}", index),
            Self::Path(path) => path.clone(),
            Self::Stub(name) => format!("stub://{}", name),
        }
    }

    pub fn is_stub(&self) -> bool {
        matches!(self, Self::Stub(_))
    }
}

/// Configuration for a camera source.
#[derive(Clone, Debug)]
pub struct CameraConfig {
    pub device: CameraDevice,
    /// Preferred frame width.
    pub width: u32,
    /// Preferred frame height.
    pub height: u32,
    /// Requested frame rate; 0 leaves the device default.
    pub target_fps: u32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device: CameraDevice::Index(1),
            width: 640,
            height: 480,
            target_fps: 0,
        }
    }
}

/// One captured frame, packed RGB24.
#[derive(Clone, Debug)]
pub struct Frame {
    pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// 1-based capture sequence number.
    pub sequence: u64,
}

impl Frame {
    pub(crate) fn new(pixels: Vec<u8>, width: u32, height: u32, sequence: u64) -> Self {
        Self {
            pixels,
            width,
            height,
            sequence,
        }
    }

    pub fn into_image(self) -> Result<RgbImage, CaptureError> {
        let (width, height, len) = (self.width, self.height, self.pixels.len());
        RgbImage::from_raw(width, height, self.pixels).ok_or_else(|| {
            CaptureError::Format(format!(
                "{} bytes do not fill a {}x{} RGB frame",
                len, width, height
            ))
        })
    }

    /// Encode the frame to `path`; the format follows the file extension.
    pub fn save<P: AsRef<Path>>(self, path: P) -> Result<(), CaptureError> {
        let path = path.as_ref();
        let image = self.into_image()?;
        image.save(path).map_err(|e| CaptureError::Persist {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    }
}

/// Camera frame source.
///
/// Uses libv4l for real devices, with a synthetic fallback for `stub://` devices.
pub struct CameraSource {
    backend: CameraBackend,
}

enum CameraBackend {
    Synthetic(SyntheticCamera),
    #[cfg(feature = "ingest-v4l2")]
    Device(DeviceCamera),
}

impl CameraSource {
    pub fn new(config: CameraConfig) -> Result<Self, CaptureError> {
        if config.device.is_stub() {
            return Ok(Self {
                backend: CameraBackend::Synthetic(SyntheticCamera::new(config)),
            });
        }
        #[cfg(feature = "ingest-v4l2")]
        {
            Ok(Self {
                backend: CameraBackend::Device(DeviceCamera::new(config)),
            })
        }
        #[cfg(not(feature = "ingest-v4l2"))]
        {
            Err(CaptureError::NotConnected {
                device: config.device.node(),
                reason: "camera capture requires the ingest-v4l2 feature".into(),
            })
        }
    }

    /// Connect to the camera device.
    pub fn connect(&mut self) -> Result<(), CaptureError> {
        match &mut self.backend {
            CameraBackend::Synthetic(source) => source.connect(),
            #[cfg(feature = "ingest-v4l2")]
            CameraBackend::Device(source) => source.connect(),
        }
    }

    /// Capture the next frame. Disconnected devices are reconnected first.
    pub fn next_frame(&mut self) -> Result<Frame, CaptureError> {
        match &mut self.backend {
            CameraBackend::Synthetic(source) => source.next_frame(),
            #[cfg(feature = "ingest-v4l2")]
            CameraBackend::Device(source) => source.next_frame(),
        }
    }

    /// Check if the source is healthy.
    pub fn is_healthy(&self) -> bool {
        match &self.backend {
            CameraBackend::Synthetic(source) => source.is_healthy(),
            #[cfg(feature = "ingest-v4l2")]
            CameraBackend::Device(source) => source.is_healthy(),
        }
    }

    /// Get frame statistics.
    pub fn stats(&self) -> CameraStats {
        match &self.backend {
            CameraBackend::Synthetic(source) => source.stats(),
            #[cfg(feature = "ingest-v4l2")]
            CameraBackend::Device(source) => source.stats(),
        }
    }
}

/// Statistics for a camera source.
#[derive(Clone, Debug)]
pub struct CameraStats {
    pub frames_captured: u64,
    pub read_failures: u64,
    pub device: String,
}

// ----------------------------------------------------------------------------
// Synthetic source (stub://) for tests
// ----------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SyntheticMode {
    Healthy,
    /// Every read fails.
    Offline,
    /// Every second read fails.
    Flaky,
}

struct SyntheticCamera {
    config: CameraConfig,
    mode: SyntheticMode,
    attempts: u64,
    frame_count: u64,
    read_failures: u64,
}

impl SyntheticCamera {
    fn new(config: CameraConfig) -> Self {
        let mode = match &config.device {
            CameraDevice::Stub(name) if name == "offline" => SyntheticMode::Offline,
            CameraDevice::Stub(name) if name == "flaky" => SyntheticMode::Flaky,
            _ => SyntheticMode::Healthy,
        };
        Self {
            config,
            mode,
            attempts: 0,
            frame_count: 0,
            read_failures: 0,
        }
    }

    fn connect(&mut self) -> Result<(), CaptureError> {
        log::info!(
            "CameraSource: connected to {} (synthetic)",
            self.config.device.node()
        );
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Frame, CaptureError> {
        self.attempts += 1;
        let fail = match self.mode {
            SyntheticMode::Healthy => false,
            SyntheticMode::Offline => true,
            SyntheticMode::Flaky => self.attempts % 2 == 0,
        };
        if fail {
            self.read_failures += 1;
            return Err(CaptureError::Read {
                device: self.config.device.node(),
                reason: "synthetic read failure".into(),
            });
        }

        self.frame_count += 1;
        Ok(Frame::new(
            self.generate_synthetic_pixels(),
            self.config.width,
            self.config.height,
            self.frame_count,
        ))
    }

    /// Diagonal gradient shifted by the frame number.
    fn generate_synthetic_pixels(&self) -> Vec<u8> {
        let (w, h) = (self.config.width as usize, self.config.height as usize);
        let mut pixels = vec![0u8; w * h * 3];
        for (i, px) in pixels.chunks_exact_mut(3).enumerate() {
            let (x, y) = (i % w, i / w);
            px[0] = ((x + self.frame_count as usize) % 256) as u8;
            px[1] = (y % 256) as u8;
            px[2] = ((x + y) % 256) as u8;
        }
        pixels
    }

    fn is_healthy(&self) -> bool {
        self.mode != SyntheticMode::Offline
    }

    fn stats(&self) -> CameraStats {
        CameraStats {
            frames_captured: self.frame_count,
            read_failures: self.read_failures,
            device: self.config.device.node(),
        }
    }
}

// ----------------------------------------------------------------------------
// Production source using libv4l
// ----------------------------------------------------------------------------

#[cfg(feature = "ingest-v4l2")]
struct DeviceCamera {
    config: CameraConfig,
    state: Option<DeviceState>,
    format: super::normalize::PixelFormat,
    frame_count: u64,
    read_failures: u64,
    last_error: Option<String>,
    active_width: u32,
    active_height: u32,
}

#[cfg(feature = "ingest-v4l2")]
#[ouroboros::self_referencing]
struct DeviceState {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

#[cfg(feature = "ingest-v4l2")]
impl DeviceCamera {
    fn new(config: CameraConfig) -> Self {
        Self {
            active_width: config.width,
            active_height: config.height,
            config,
            state: None,
            format: super::normalize::PixelFormat::Rgb24,
            frame_count: 0,
            read_failures: 0,
            last_error: None,
        }
    }

    fn not_connected(&self, reason: impl std::fmt::Display) -> CaptureError {
        CaptureError::NotConnected {
            device: self.config.device.node(),
            reason: reason.to_string(),
        }
    }

    fn connect(&mut self) -> Result<(), CaptureError> {
        use super::normalize::PixelFormat;
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let node = self.config.device.node();
        let mut device = v4l::Device::with_path(&node).map_err(|e| self.not_connected(e))?;
        let mut format = device.format().map_err(|e| self.not_connected(e))?;
        format.width = self.config.width;
        format.height = self.config.height;
        format.fourcc = v4l::FourCC::new(b"RGB3");

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!("CameraSource: failed to set format on {}: {}", node, err);
                device.format().map_err(|e| self.not_connected(e))?
            }
        };

        let pixel_format = PixelFormat::from_fourcc(&format.fourcc.repr)
            .ok_or_else(|| CaptureError::Format(format.fourcc.to_string()))?;

        if self.config.target_fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(self.config.target_fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!("CameraSource: failed to set fps on {}: {}", node, err);
            }
        }

        let state = DeviceStateTryBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4)
            },
        }
        .try_build()
        .map_err(|err| {
            self.last_error = Some(err.to_string());
            self.not_connected(format!("create buffer stream: {}", err))
        })?;

        self.state = Some(state);
        self.format = pixel_format;
        self.active_width = format.width;
        self.active_height = format.height;
        self.last_error = None;

        log::info!(
            "CameraSource: connected to {} ({}x{} {:?})",
            node,
            self.active_width,
            self.active_height,
            self.format
        );
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Frame, CaptureError> {
        use v4l::io::traits::CaptureStream;

        if self.state.is_none() {
            self.connect()?;
        }
        let state = self
            .state
            .as_mut()
            .ok_or_else(|| CaptureError::NotConnected {
                device: self.config.device.node(),
                reason: "no stream".into(),
            })?;

        let read = state.with_stream_mut(|stream| {
            stream.next().map(|(buf, meta)| {
                let used = (meta.bytesused as usize).min(buf.len());
                let used = if used == 0 { buf.len() } else { used };
                buf[..used].to_vec()
            })
        });
        let raw = match read {
            Ok(raw) => raw,
            Err(err) => {
                self.read_failures += 1;
                self.last_error = Some(err.to_string());
                // Drop the stream so the next attempt reopens the device.
                self.state = None;
                return Err(CaptureError::Read {
                    device: self.config.device.node(),
                    reason: err.to_string(),
                });
            }
        };

        let pixels = super::normalize::normalize_to_rgb(
            &raw,
            self.active_width,
            self.active_height,
            self.format,
        )?;
        self.frame_count += 1;
        self.last_error = None;
        Ok(Frame::new(
            pixels,
            self.active_width,
            self.active_height,
            self.frame_count,
        ))
    }

    fn is_healthy(&self) -> bool {
        self.last_error.is_none()
    }

    fn stats(&self) -> CameraStats {
        CameraStats {
            frames_captured: self.frame_count,
            read_failures: self.read_failures,
            device: self.config.device.node(),
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn stub_config(name: &str) -> CameraConfig {
        CameraConfig {
            device: CameraDevice::Stub(name.to_string()),
            width: 64,
            height: 48,
            target_fps: 0,
        }
    }

    #[test]
    fn parses_camera_selection() {
        assert_eq!(CameraDevice::parse("1"), Some(CameraDevice::Index(1)));
        assert_eq!(CameraDevice::parse("1").map(|d| d.node()), Some("/dev/video1".to_string()));
        assert_eq!(
            CameraDevice::parse("/dev/video3"),
            Some(CameraDevice::Path("/dev/video3".into()))
        );
        assert_eq!(
            CameraDevice::parse("stub://bench"),
            Some(CameraDevice::Stub("bench".into()))
        );
        assert_eq!(CameraDevice::parse("none"), None);
        assert_eq!(CameraDevice::parse(" "), None);
    }

    #[test]
    fn synthetic_camera_produces_frames() -> Result<(), CaptureError> {
        let mut source = CameraSource::new(stub_config("test"))?;
        source.connect()?;

        let frame = source.next_frame()?;
        assert_eq!((frame.width, frame.height), (64, 48));
        assert_eq!(frame.sequence, 1);
        let image = frame.into_image()?;
        assert_eq!(image.dimensions(), (64, 48));
        assert_eq!(source.stats().frames_captured, 1);
        Ok(())
    }

    #[test]
    fn offline_camera_fails_every_read() -> Result<(), CaptureError> {
        let mut source = CameraSource::new(stub_config("offline"))?;
        source.connect()?;
        assert!(matches!(source.next_frame(), Err(CaptureError::Read { .. })));
        assert!(source.next_frame().is_err());
        assert!(!source.is_healthy());
        assert_eq!(source.stats().read_failures, 2);
        Ok(())
    }

    #[test]
    fn flaky_camera_alternates() -> Result<(), CaptureError> {
        let mut source = CameraSource::new(stub_config("flaky"))?;
        assert!(source.next_frame().is_ok());
        assert!(source.next_frame().is_err());
        assert_eq!(source.next_frame()?.sequence, 2);
        Ok(())
    }

    #[test]
    fn frame_is_persisted_as_image() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("capture.png");
        let mut source = CameraSource::new(stub_config("persist"))?;
        source.next_frame()?.save(&path)?;

        let reloaded = image::open(&path)?.to_rgb8();
        assert_eq!(reloaded.dimensions(), (64, 48));
        Ok(())
    }
}
