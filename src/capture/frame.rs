//! Captured frame view and refresh statistics

use super::backend::PixelFormat;
use std::fmt;
use xxhash_rust::xxh64::Xxh64;

/// Seed for frame digests
const DIGEST_SEED: u64 = 0x123456789ABCDEF0;

/// Borrowed view of a session's shared image buffer
///
/// The view borrows the session, so it cannot outlive a close or overlap a
/// refresh. Raw pointers taken from it through [`FrameView::as_ptr`] are valid
/// only until the session is refreshed or closed.
#[derive(Clone, Copy)]
pub struct FrameView<'a> {
    data: &'a [u8],
    width: u32,
    height: u32,
    stride: usize,
    format: PixelFormat,
}

impl<'a> FrameView<'a> {
    /// Wrap a buffer of `stride * height` bytes
    ///
    /// Returns `None` when `data` is too short for the given layout.
    pub fn new(
        data: &'a [u8],
        width: u32,
        height: u32,
        stride: usize,
        format: PixelFormat,
    ) -> Option<Self> {
        let needed = stride.checked_mul(height as usize)?;
        if data.len() < needed || stride < width as usize * format.bytes_per_pixel() {
            return None;
        }
        Some(Self {
            data: &data[..needed],
            width,
            height,
            stride,
            format,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Bytes per row, including padding
    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    /// Start of the shared buffer
    pub fn as_ptr(&self) -> *const u8 {
        self.data.as_ptr()
    }

    /// Buffer length in bytes (`stride * height`)
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Whole buffer, row padding included
    pub fn as_bytes(&self) -> &'a [u8] {
        self.data
    }

    /// Pixel bytes of row `y`, without row padding
    pub fn row(&self, y: u32) -> Option<&'a [u8]> {
        if y >= self.height {
            return None;
        }
        let start = y as usize * self.stride;
        let len = self.width as usize * self.format.bytes_per_pixel();
        Some(&self.data[start..start + len])
    }

    /// Iterate over rows without padding
    pub fn rows(&self) -> impl Iterator<Item = &'a [u8]> + 'a {
        let view = *self;
        (0..view.height).filter_map(move |y| view.row(y))
    }

    /// Bytes of the pixel at (`x`, `y`)
    pub fn pixel(&self, x: u32, y: u32) -> Option<&'a [u8]> {
        if x >= self.width {
            return None;
        }
        let bpp = self.format.bytes_per_pixel();
        let row = self.row(y)?;
        let offset = x as usize * bpp;
        Some(&row[offset..offset + bpp])
    }

    /// Hash of the pixel contents, ignoring row padding
    pub fn digest(&self) -> u64 {
        let mut hasher = Xxh64::new(DIGEST_SEED);
        for row in self.rows() {
            hasher.update(row);
        }
        hasher.digest()
    }
}

impl fmt::Debug for FrameView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameView")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("stride", &self.stride)
            .field("format", &self.format)
            .field("ptr", &self.data.as_ptr())
            .finish()
    }
}

impl fmt::Display for FrameView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Frame({}x{}, stride={}, {} bytes)",
            self.width,
            self.height,
            self.stride,
            self.data.len()
        )
    }
}

/// Refresh statistics for a session
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RefreshStats {
    /// Successful refreshes
    pub total_refreshes: u64,

    /// Failed refreshes
    pub failed_refreshes: u64,

    /// Total time spent in successful refreshes in microseconds
    pub total_refresh_time_us: u64,

    /// Duration of the last successful refresh in microseconds
    pub last_refresh_time_us: u64,
}

impl RefreshStats {
    /// Record a successful refresh
    pub fn record_refresh(&mut self, time_us: u64) {
        self.total_refreshes += 1;
        self.last_refresh_time_us = time_us;
        self.total_refresh_time_us += time_us;
    }

    pub fn record_failure(&mut self) {
        self.failed_refreshes += 1;
    }

    /// Mean successful refresh time in microseconds
    pub fn average_refresh_time_us(&self) -> u64 {
        if self.total_refreshes == 0 {
            0
        } else {
            self.total_refresh_time_us / self.total_refreshes
        }
    }
}
