use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use flume::{Receiver, Sender};
use serde::{Deserialize, Serialize};

use super::source::DeviceError;

/// Color frame borrowed from a source's buffer pool.
///
/// Dropping the frame hands its pixel memory back to the pool, so a frame
/// is released exactly once no matter how the iteration that owns it ends.
pub struct Frame {
    pixels: Vec<u8>,

    /// Frame metadata
    pub meta: FrameMetadata,

    /// Capture timestamp for latency tracking
    pub timestamp: Instant,

    recycle: Recycle,
}

/// Frame metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameMetadata {
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    /// Bytes per row, including padding
    pub stride: u32,
    pub format: PixelFormat,
}

/// Pixel formats we support
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    Bgra32,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> u32 {
        match self {
            PixelFormat::Bgra32 => 4,
        }
    }
}

impl Frame {
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn width(&self) -> u32 {
        self.meta.width
    }

    pub fn height(&self) -> u32 {
        self.meta.height
    }

    pub fn stride(&self) -> u32 {
        self.meta.stride
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("meta", &self.meta)
            .field("len", &self.pixels.len())
            .finish()
    }
}

impl Drop for Frame {
    fn drop(&mut self) {
        let pixels = std::mem::take(&mut self.pixels);
        self.recycle.give_back(pixels);
    }
}

struct Recycle {
    tx: Sender<Vec<u8>>,
    outstanding: Arc<AtomicUsize>,
}

impl Recycle {
    fn give_back(&self, buffer: Vec<u8>) {
        self.outstanding.fetch_sub(1, Ordering::AcqRel);
        // The pool may already be gone at shutdown; the buffer is then freed.
        let _ = self.tx.send(buffer);
    }
}

/// Fixed set of reusable frame buffers. Clones share the same buffers.
#[derive(Clone)]
pub struct FramePool {
    tx: Sender<Vec<u8>>,
    rx: Receiver<Vec<u8>>,
    buffer_len: usize,
    capacity: usize,
    outstanding: Arc<AtomicUsize>,
}

impl FramePool {
    pub fn new(capacity: usize, buffer_len: usize) -> Self {
        let (tx, rx) = flume::bounded(capacity);
        for _ in 0..capacity {
            // Bounded to `capacity`, so this never blocks
            let _ = tx.send(vec![0u8; buffer_len]);
        }

        Self {
            tx,
            rx,
            buffer_len,
            capacity,
            outstanding: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Take a free buffer, fill it through `fill`, and wrap it in a [`Frame`].
    pub fn checkout<F>(&self, meta: FrameMetadata, fill: F) -> Result<Frame, DeviceError>
    where
        F: FnOnce(&mut [u8]) -> Result<(), DeviceError>,
    {
        let mut pixels = self
            .rx
            .try_recv()
            .map_err(|_| DeviceError::BuffersExhausted(self.capacity))?;
        pixels.resize(self.buffer_len, 0);
        self.outstanding.fetch_add(1, Ordering::AcqRel);

        let recycle = Recycle {
            tx: self.tx.clone(),
            outstanding: self.outstanding.clone(),
        };

        // Build the frame before filling so a failed fill still recycles
        let mut frame = Frame {
            pixels,
            meta,
            timestamp: Instant::now(),
            recycle,
        };
        fill(&mut frame.pixels)?;
        Ok(frame)
    }

    /// Frames currently checked out and not yet dropped.
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    pub fn available(&self) -> usize {
        self.rx.len()
    }
}
