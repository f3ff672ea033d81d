//! Test-pattern frame source
//!
//! Produces a moving BGRA gradient at a fixed pace. Used when no sensor is
//! attached and by the pipeline tests.

use std::time::Duration;

use tracing::debug;

use crate::capture::frame::{Frame, FrameMetadata, FramePool, PixelFormat};
use crate::capture::source::{DeviceError, FrameSource};

pub struct SyntheticSource {
    pool: FramePool,
    width: u32,
    height: u32,
    sequence: u64,
    pace: Option<Duration>,
    limit: Option<u64>,
    closed: bool,
}

impl SyntheticSource {
    pub fn new(width: u32, height: u32, buffer_count: usize) -> Self {
        let stride = width * PixelFormat::Bgra32.bytes_per_pixel();
        Self {
            pool: FramePool::new(buffer_count, (stride * height) as usize),
            width,
            height,
            sequence: 0,
            pace: None,
            limit: None,
            closed: false,
        }
    }

    /// Sleep this long before each frame, imitating the sensor frame rate.
    pub fn with_pace(mut self, pace: Duration) -> Self {
        self.pace = Some(pace);
        self
    }

    /// Report a disconnect after `frames` frames.
    pub fn with_limit(mut self, frames: u64) -> Self {
        self.limit = Some(frames);
        self
    }

    pub fn pool(&self) -> &FramePool {
        &self.pool
    }

    fn paint(sequence: u64, width: u32, buf: &mut [u8]) {
        let shift = (sequence % 256) as u8;
        let stride = (width * 4) as usize;
        for (y, row) in buf.chunks_exact_mut(stride).enumerate() {
            for (x, px) in row.chunks_exact_mut(4).enumerate() {
                px[0] = (x as u8).wrapping_add(shift);
                px[1] = (y as u8).wrapping_add(shift);
                px[2] = shift;
                px[3] = 0xff;
            }
        }
    }
}

impl FrameSource for SyntheticSource {
    fn next_frame(&mut self) -> Result<Frame, DeviceError> {
        if self.closed {
            return Err(DeviceError::Closed);
        }
        if self.limit.is_some_and(|limit| self.sequence >= limit) {
            return Err(DeviceError::Disconnected("synthetic stream ended".into()));
        }
        if let Some(pace) = self.pace {
            std::thread::sleep(pace);
        }

        self.sequence += 1;
        let sequence = self.sequence;
        let width = self.width;
        let meta = FrameMetadata {
            sequence,
            width,
            height: self.height,
            stride: width * PixelFormat::Bgra32.bytes_per_pixel(),
            format: PixelFormat::Bgra32,
        };

        self.pool.checkout(meta, |buf| {
            Self::paint(sequence, width, buf);
            Ok(())
        })
    }

    fn native_resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            debug!(frames = self.sequence, "Synthetic source closed");
        }
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}
