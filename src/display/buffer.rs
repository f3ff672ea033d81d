//! Display-resident BGRA surface shared between the capture loop and the renderer

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use bytes::Bytes;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("region {region:?} does not fit a {width}x{height} surface")]
    RegionOutOfBounds {
        region: Region,
        width: u32,
        height: u32,
    },

    #[error("pixel data too short: need {needed} bytes, got {got}")]
    ShortPixelData { needed: usize, got: usize },

    #[error("source stride {stride} is smaller than a {width} pixel row")]
    StrideTooSmall { stride: u32, width: u32 },
}

/// Axis-aligned rectangle in surface coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    pub fn full(width: u32, height: u32) -> Self {
        Self {
            x: 0,
            y: 0,
            width,
            height,
        }
    }

    /// Smallest region covering both
    pub fn union(self, other: Region) -> Region {
        let x = self.x.min(other.x);
        let y = self.y.min(other.y);
        let right = (self.x + self.width).max(other.x + other.width);
        let bottom = (self.y + self.height).max(other.y + other.height);
        Region {
            x,
            y,
            width: right - x,
            height: bottom - y,
        }
    }
}

struct Surface {
    pixels: Vec<u8>,
    dirty: Option<Region>,
}

/// Owned copy of the surface at one instant
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub pixels: Bytes,
}

/// BGRA pixel buffer with a begin/write/commit bracket.
///
/// The write token holds the surface lock, so a renderer calling
/// [`DisplayBuffer::present`] waits until the writer commits or drops it.
pub struct DisplayBuffer {
    width: u32,
    height: u32,
    stride: u32,
    surface: Mutex<Surface>,
    commits: AtomicU64,
    last_dirty: Mutex<Option<Region>>,
}

/// Exclusive write access to a [`DisplayBuffer`]
pub struct WriteToken<'a> {
    buffer: &'a DisplayBuffer,
    surface: MutexGuard<'a, Surface>,
    written: Option<Region>,
}

impl DisplayBuffer {
    pub fn new(width: u32, height: u32) -> Self {
        let stride = width * 4;
        Self {
            width,
            height,
            stride,
            surface: Mutex::new(Surface {
                pixels: vec![0u8; (stride * height) as usize],
                dirty: None,
            }),
            commits: AtomicU64::new(0),
            last_dirty: Mutex::new(None),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn stride(&self) -> u32 {
        self.stride
    }

    pub fn begin_write(&self) -> WriteToken<'_> {
        WriteToken {
            buffer: self,
            surface: lock(&self.surface),
            written: None,
        }
    }

    /// Hand the current pixels and pending dirty region to a renderer.
    pub fn present<R>(&self, render: impl FnOnce(&[u8], u32, Option<Region>) -> R) -> R {
        let mut surface = lock(&self.surface);
        let dirty = surface.dirty.take();
        render(&surface.pixels, self.stride, dirty)
    }

    pub fn snapshot(&self) -> Snapshot {
        let surface = lock(&self.surface);
        Snapshot {
            width: self.width,
            height: self.height,
            stride: self.stride,
            pixels: Bytes::copy_from_slice(&surface.pixels),
        }
    }

    /// Number of committed writes since creation
    pub fn commits(&self) -> u64 {
        self.commits.load(Ordering::Acquire)
    }

    pub fn last_dirty(&self) -> Option<Region> {
        *lock(&self.last_dirty)
    }
}

impl WriteToken<'_> {
    /// Copy `height` rows of `width` BGRA pixels from `pixels` (rows `stride`
    /// bytes apart) to the surface at `origin`.
    pub fn write_region(
        &mut self,
        origin: (u32, u32),
        width: u32,
        height: u32,
        pixels: &[u8],
        stride: u32,
    ) -> Result<(), SinkError> {
        let region = Region {
            x: origin.0,
            y: origin.1,
            width,
            height,
        };
        let buffer = self.buffer;
        if region.x + width > buffer.width || region.y + height > buffer.height {
            return Err(SinkError::RegionOutOfBounds {
                region,
                width: buffer.width,
                height: buffer.height,
            });
        }

        let row_bytes = (width * 4) as usize;
        if (stride as usize) < row_bytes {
            return Err(SinkError::StrideTooSmall { stride, width });
        }
        let needed = match height {
            0 => 0,
            h => stride as usize * (h as usize - 1) + row_bytes,
        };
        if pixels.len() < needed {
            return Err(SinkError::ShortPixelData {
                needed,
                got: pixels.len(),
            });
        }

        let dst_stride = buffer.stride as usize;
        let dst_x = region.x as usize * 4;
        for row in 0..height as usize {
            let src = &pixels[row * stride as usize..][..row_bytes];
            let start = (region.y as usize + row) * dst_stride + dst_x;
            self.surface.pixels[start..start + row_bytes].copy_from_slice(src);
        }

        self.written = Some(match self.written {
            Some(prev) => prev.union(region),
            None => region,
        });
        Ok(())
    }

    /// Mark everything written through this token dirty and release the lock.
    pub fn commit(mut self) -> Option<Region> {
        let written = self.written.take();
        if let Some(region) = written {
            self.surface.dirty = Some(match self.surface.dirty {
                Some(prev) => prev.union(region),
                None => region,
            });
            *lock(&self.buffer.last_dirty) = Some(region);
        }
        self.buffer.commits.fetch_add(1, Ordering::AcqRel);
        written
    }
}

// A panicked writer leaves at worst a torn image; keep serving it.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(width: u32, height: u32, value: u8) -> Vec<u8> {
        vec![value; (width * height * 4) as usize]
    }

    #[test]
    fn full_write_marks_full_region() {
        let buffer = DisplayBuffer::new(4, 3);
        let mut token = buffer.begin_write();
        token
            .write_region((0, 0), 4, 3, &solid(4, 3, 9), 16)
            .unwrap();
        assert_eq!(token.commit(), Some(Region::full(4, 3)));

        assert_eq!(buffer.commits(), 1);
        assert_eq!(buffer.last_dirty(), Some(Region::full(4, 3)));
        buffer.present(|pixels, stride, dirty| {
            assert_eq!(stride, 16);
            assert_eq!(dirty, Some(Region::full(4, 3)));
            assert!(pixels.iter().all(|&b| b == 9));
        });

        // Dirty region is consumed by the renderer
        buffer.present(|_, _, dirty| assert_eq!(dirty, None));
    }

    #[test]
    fn padded_rows_are_skipped() {
        let buffer = DisplayBuffer::new(2, 2);
        // 2 pixels per row plus 4 bytes of padding
        let src = [
            1, 1, 1, 1, 2, 2, 2, 2, 0xee, 0xee, 0xee, 0xee, //
            3, 3, 3, 3, 4, 4, 4, 4,
        ];
        let mut token = buffer.begin_write();
        token.write_region((0, 0), 2, 2, &src, 12).unwrap();
        token.commit();

        let snapshot = buffer.snapshot();
        assert_eq!(
            &snapshot.pixels[..],
            &[1, 1, 1, 1, 2, 2, 2, 2, 3, 3, 3, 3, 4, 4, 4, 4]
        );
    }

    #[test]
    fn oversized_region_is_rejected() {
        let buffer = DisplayBuffer::new(2, 2);
        let mut token = buffer.begin_write();
        let err = token
            .write_region((0, 0), 3, 2, &solid(3, 2, 0), 12)
            .unwrap_err();
        assert!(matches!(err, SinkError::RegionOutOfBounds { .. }));
        drop(token);

        // Nothing committed, nothing dirty
        assert_eq!(buffer.commits(), 0);
        buffer.present(|_, _, dirty| assert_eq!(dirty, None));
    }

    #[test]
    fn short_data_is_rejected() {
        let buffer = DisplayBuffer::new(2, 2);
        let mut token = buffer.begin_write();
        let err = token.write_region((0, 0), 2, 2, &[0u8; 12], 8).unwrap_err();
        assert!(matches!(
            err,
            SinkError::ShortPixelData { needed: 16, got: 12 }
        ));
    }

    #[test]
    fn partial_writes_union_into_one_region() {
        let buffer = DisplayBuffer::new(4, 4);
        let mut token = buffer.begin_write();
        token.write_region((0, 0), 1, 1, &[0; 4], 4).unwrap();
        token.write_region((2, 3), 2, 1, &[0; 8], 8).unwrap();
        assert_eq!(
            token.commit(),
            Some(Region {
                x: 0,
                y: 0,
                width: 4,
                height: 4
            })
        );
    }
}
