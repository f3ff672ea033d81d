//! V4L2 color stream backend for the depth camera

use std::time::Duration;

use tracing::{debug, info, instrument, warn};
use v4l::buffer::Type;
use v4l::capability::Flags as CapFlags;
use v4l::io::traits::CaptureStream;
use v4l::prelude::MmapStream;
use v4l::video::Capture;
use v4l::{Device, FourCC};

use crate::capture::frame::{Frame, FrameMetadata, FramePool, PixelFormat};
use crate::capture::source::{DeviceError, FrameSource};
use crate::CaptureConfig;

/// 32-bit BGRA as laid out in memory (V4L2_PIX_FMT_ABGR32)
pub const BGRA_FOURCC: &[u8; 4] = b"AR24";

/// Sensor color stream read through memory-mapped V4L2 buffers
pub struct V4l2Source {
    device: Option<Box<Device>>,
    stream: Option<MmapStream<'static>>,
    pool: FramePool,
    width: u32,
    height: u32,
    stride: u32,
    sequence: u64,
}

impl V4l2Source {
    /// Open the device and start a synchronized BGRA stream
    pub fn open(config: &CaptureConfig) -> Result<Self, DeviceError> {
        config.sensor.validate()?;
        info!("Opening V4L2 sensor: {} ({:?})", config.device, config.sensor);

        let device = Device::with_path(&config.device)
            .map_err(|e| DeviceError::Unavailable(format!("{}: {}", config.device, e)))?;

        // Query capabilities
        let caps = device
            .query_caps()
            .map_err(|e| DeviceError::Unavailable(e.to_string()))?;
        info!("Device: {} ({})", caps.card, caps.driver);

        if !caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
            return Err(DeviceError::Unavailable(
                "device doesn't support video capture".into(),
            ));
        }

        // Set format
        let (width, height) = config.sensor.color_resolution.dimensions();
        let mut fmt = device
            .format()
            .map_err(|e| DeviceError::Unavailable(e.to_string()))?;
        fmt.width = width;
        fmt.height = height;
        fmt.fourcc = FourCC::new(BGRA_FOURCC);

        let applied = device
            .set_format(&fmt)
            .map_err(|e| DeviceError::Unavailable(e.to_string()))?;
        if applied.fourcc != fmt.fourcc || applied.width != width || applied.height != height {
            return Err(DeviceError::UnsupportedConfig(format!(
                "driver negotiated {}x{} {}",
                applied.width, applied.height, applied.fourcc
            )));
        }

        let stride = applied.stride.max(width * PixelFormat::Bgra32.bytes_per_pixel());
        let device = Box::new(device);

        let mut stream =
            MmapStream::with_buffers(&device, Type::VideoCapture, config.buffer_count)
                .map_err(|e| DeviceError::Unavailable(e.to_string()))?;
        stream.set_timeout(Duration::from_millis(config.timeout_ms));

        info!(
            "Capture stream started: {}x{} stride {} with {} buffers",
            width, height, stride, config.buffer_count
        );

        Ok(Self {
            device: Some(device),
            stream: Some(stream),
            pool: FramePool::new(config.buffer_count as usize, (stride * height) as usize),
            width,
            height,
            stride,
            sequence: 0,
        })
    }
}

impl FrameSource for V4l2Source {
    #[instrument(skip(self))]
    fn next_frame(&mut self) -> Result<Frame, DeviceError> {
        let stream = self.stream.as_mut().ok_or(DeviceError::Closed)?;

        // Blocks until the driver hands over a filled buffer or times out
        let (buf, meta) = stream.next().map_err(DeviceError::from_dequeue)?;

        self.sequence += 1;
        let frame_meta = FrameMetadata {
            sequence: self.sequence,
            width: self.width,
            height: self.height,
            stride: self.stride,
            format: PixelFormat::Bgra32,
        };

        let used = (meta.bytesused as usize).min(buf.len());
        self.pool.checkout(frame_meta, |dst| {
            if used < dst.len() {
                warn!(used, expected = dst.len(), "Short capture buffer");
            }
            let n = used.min(dst.len());
            dst[..n].copy_from_slice(&buf[..n]);
            Ok(())
        })
    }

    fn native_resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn close(&mut self) {
        if self.device.is_none() {
            return;
        }

        // Stream must stop before the device handle goes away
        drop(self.stream.take());
        drop(self.device.take());
        debug!(
            outstanding = self.pool.outstanding(),
            "V4L2 sensor closed"
        );
    }

    fn is_closed(&self) -> bool {
        self.device.is_none()
    }
}

impl Drop for V4l2Source {
    fn drop(&mut self) {
        if !self.is_closed() {
            warn!("V4L2 sensor dropped without close");
            self.close();
        }
    }
}
