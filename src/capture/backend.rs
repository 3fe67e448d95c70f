//! Server abstraction used by the resolver, the capture session and window
//! enumeration.

use super::{PixmapId, Result, WindowId};

/// Byte order of pixel data in the image buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    LsbFirst,
    MsbFirst,
}

/// Native pixel layout of a window's visual
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelFormat {
    /// Visual id of the window
    pub visual: u32,

    /// Color depth in bits
    pub depth: u8,

    /// Bits used by one pixel in the buffer (includes padding bits)
    pub bits_per_pixel: u8,

    /// Byte order of multi-byte pixels
    pub byte_order: ByteOrder,

    pub red_mask: u32,
    pub green_mask: u32,
    pub blue_mask: u32,
}

impl PixelFormat {
    /// Bytes occupied by one pixel
    pub fn bytes_per_pixel(&self) -> usize {
        (self.bits_per_pixel as usize / 8).max(1)
    }
}

/// Window geometry and buffer layout captured when a session opens
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureGeometry {
    /// Width in pixels
    pub width: u32,

    /// Height in pixels
    pub height: u32,

    /// Border width; the redirected pixmap includes the border
    pub border_width: u32,

    /// Bytes per row in the buffer
    pub stride: usize,

    /// Pixel layout
    pub format: PixelFormat,
}

impl CaptureGeometry {
    /// Buffer size in bytes
    pub fn buffer_size(&self) -> usize {
        self.stride * self.height as usize
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

/// Memory an image is transferred into
pub trait FrameMemory {
    /// Full buffer contents, `stride * height` bytes
    fn bytes(&self) -> &[u8];
}

/// Read-only window metadata queries
pub trait WindowDirectory {
    /// Value of the window manager's frame-window property on `window`, if set
    fn frame_window(&self, window: WindowId) -> Result<Option<WindowId>>;

    /// Top-level client windows managed by the window manager
    fn client_windows(&self) -> Result<Vec<WindowId>>;

    /// Window title, if the window has one
    fn window_title(&self, window: WindowId) -> Result<Option<String>>;

    /// Whether the window is mapped and viewable
    fn is_viewable(&self, window: WindowId) -> Result<bool>;
}

/// Server operations needed to capture a redirected window
///
/// Every call is a blocking round trip (or a queued request) on the backend's
/// own connection. Dropping the backend disconnects from the server.
pub trait CaptureBackend: WindowDirectory {
    /// Client-side memory shared with the server
    type Memory: FrameMemory;

    /// Default root window of the connection's screen
    fn root_window(&self) -> WindowId;

    /// Current geometry and pixel layout of `window`
    fn query_geometry(&self, window: WindowId) -> Result<CaptureGeometry>;

    /// Current size of `window`
    fn window_size(&self, window: WindowId) -> Result<(u32, u32)>;

    /// Fails unless the server can redirect windows and name their pixmaps
    fn check_redirection(&self) -> Result<()>;

    /// Register `window` for automatic redirection
    fn redirect(&self, window: WindowId) -> Result<()>;

    /// Undo `redirect`
    fn unredirect(&self, window: WindowId);

    /// Name the pixmap currently backing `window`
    fn name_pixmap(&self, window: WindowId) -> Result<PixmapId>;

    fn free_pixmap(&self, pixmap: PixmapId);

    /// Allocate and attach shared memory for an image of `geometry`
    fn allocate(&self, geometry: &CaptureGeometry) -> Result<Self::Memory>;

    /// Detach and free memory returned by `allocate`
    fn release(&self, memory: Self::Memory);

    /// Copy the pixmap contents into `memory`
    fn transfer(
        &self,
        pixmap: PixmapId,
        geometry: &CaptureGeometry,
        memory: &mut Self::Memory,
    ) -> Result<()>;
}
