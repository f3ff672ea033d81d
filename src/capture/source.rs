//! Sensor-facing contract shared by every capture backend

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::frame::Frame;

/// Failures raised by a frame source. All of them end the capture session.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("capture device unavailable: {0}")]
    Unavailable(String),

    #[error("unsupported sensor configuration: {0}")]
    UnsupportedConfig(String),

    #[error("timed out waiting for a capture")]
    CaptureTimeout,

    #[error("capture device disconnected: {0}")]
    Disconnected(String),

    #[error("all {0} frame buffers are checked out")]
    BuffersExhausted(usize),

    #[error("capture device is closed")]
    Closed,
}

impl DeviceError {
    /// Map an I/O failure from a blocking dequeue.
    pub fn from_dequeue(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => {
                DeviceError::CaptureTimeout
            }
            _ => DeviceError::Disconnected(err.to_string()),
        }
    }
}

/// A device that hands out synchronized color frames.
///
/// `next_frame` blocks until the sensor delivers. `close` must be safe to
/// call more than once; only the first call releases hardware.
pub trait FrameSource: Send {
    fn next_frame(&mut self) -> Result<Frame, DeviceError>;

    /// Native color resolution, used to size the display buffer.
    fn native_resolution(&self) -> (u32, u32);

    fn close(&mut self);

    fn is_closed(&self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColorFormat {
    Bgra32,
    Mjpeg,
    Nv12,
    Yuy2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColorResolution {
    R720p,
    R1080p,
    R1440p,
    R1536p,
    R2160p,
    R3072p,
}

impl ColorResolution {
    pub fn dimensions(self) -> (u32, u32) {
        match self {
            ColorResolution::R720p => (1280, 720),
            ColorResolution::R1080p => (1920, 1080),
            ColorResolution::R1440p => (2560, 1440),
            ColorResolution::R1536p => (2048, 1536),
            ColorResolution::R2160p => (3840, 2160),
            ColorResolution::R3072p => (4096, 3072),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DepthMode {
    Off,
    Nfov2x2Binned,
    NfovUnbinned,
    Wfov2x2Binned,
    WfovUnbinned,
    PassiveIr,
}

/// Sensor stream configuration applied at open time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorConfig {
    pub color_format: ColorFormat,
    pub color_resolution: ColorResolution,
    pub depth_mode: DepthMode,
    pub synchronized_images_only: bool,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            color_format: ColorFormat::Bgra32,
            color_resolution: ColorResolution::R720p,
            depth_mode: DepthMode::Nfov2x2Binned,
            synchronized_images_only: true,
        }
    }
}

impl SensorConfig {
    /// Reject anything other than the one stream layout the pipeline handles.
    pub fn validate(&self) -> Result<(), DeviceError> {
        let supported = Self::default();
        if self.color_format != supported.color_format {
            return Err(DeviceError::UnsupportedConfig(format!(
                "color format {:?}",
                self.color_format
            )));
        }
        if self.color_resolution != supported.color_resolution {
            return Err(DeviceError::UnsupportedConfig(format!(
                "color resolution {:?}",
                self.color_resolution
            )));
        }
        if self.depth_mode != supported.depth_mode {
            return Err(DeviceError::UnsupportedConfig(format!(
                "depth mode {:?}",
                self.depth_mode
            )));
        }
        if !self.synchronized_images_only {
            return Err(DeviceError::UnsupportedConfig(
                "unsynchronized captures".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_supported() {
        assert!(SensorConfig::default().validate().is_ok());
        assert_eq!(
            SensorConfig::default().color_resolution.dimensions(),
            (1280, 720)
        );
    }

    #[test]
    fn other_layouts_are_rejected() {
        let config = SensorConfig {
            depth_mode: DepthMode::WfovUnbinned,
            ..SensorConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(DeviceError::UnsupportedConfig(_))
        ));

        let config = SensorConfig {
            synchronized_images_only: false,
            ..SensorConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn dequeue_errors_split_by_kind() {
        let timeout = std::io::Error::new(std::io::ErrorKind::TimedOut, "poll");
        assert!(matches!(
            DeviceError::from_dequeue(timeout),
            DeviceError::CaptureTimeout
        ));

        let gone = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "ENODEV");
        assert!(matches!(
            DeviceError::from_dequeue(gone),
            DeviceError::Disconnected(_)
        ));
    }
}
