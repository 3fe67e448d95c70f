//! Capture session
//!
//! A session pins one content window, redirects it, and keeps a shared image
//! buffer sized to the window as it was when the session opened. Each
//! [`CaptureSession::refresh`] copies the window's current pixmap into that
//! buffer in place.
//!
//! All operations block on the X server. There is no internal timer or thread;
//! callers that want a steady frame rate drive `refresh` from their own loop.

use super::backend::{CaptureBackend, CaptureGeometry, FrameMemory, PixelFormat};
use super::frame::{FrameView, RefreshStats};
use super::resolver::resolve_content_window;
use super::xshm::X11Backend;
use super::{CaptureError, PixmapId, Result, WindowId};
use log::{debug, info, warn};
use std::time::Instant;

/// Resources held while a session is open
struct ActiveCapture<B: CaptureBackend> {
    backend: B,

    /// Window passed to open
    requested: WindowId,

    /// Resolved content window, fixed for the session's life
    window: WindowId,

    /// Root window of the default screen
    root: WindowId,

    /// Geometry snapshot taken at open
    geometry: CaptureGeometry,

    /// Whether `window` was registered for redirection by this session
    redirected: bool,

    /// Pixmap named by the last open or refresh
    pixmap: Option<PixmapId>,

    /// Shared image memory, allocated once
    memory: Option<B::Memory>,

    /// Set after the first successful refresh
    refreshed: bool,

    stats: RefreshStats,
}

impl<B: CaptureBackend> ActiveCapture<B> {
    /// Run the open sequence, releasing everything acquired on failure
    fn acquire(backend: B, requested: WindowId) -> Result<Self> {
        let window = resolve_content_window(&backend, requested);

        let geometry = backend.query_geometry(window)?;
        debug!(
            "Window 0x{:x}: {}x{} depth {} stride {}",
            window, geometry.width, geometry.height, geometry.format.depth, geometry.stride
        );

        backend.check_redirection()?;

        let redirected = match backend.redirect(window) {
            Ok(()) => true,
            Err(e) => {
                warn!("Redirecting window 0x{:x} failed: {}", window, e);
                false
            }
        };

        let root = backend.root_window();
        let mut active = Self {
            backend,
            requested,
            window,
            root,
            geometry,
            redirected,
            pixmap: None,
            memory: None,
            refreshed: false,
            stats: RefreshStats::default(),
        };

        if let Err(e) = active.attach() {
            active.teardown();
            return Err(e);
        }
        Ok(active)
    }

    /// Name the initial pixmap and set up the shared image buffer
    fn attach(&mut self) -> Result<()> {
        self.pixmap = Some(self.backend.name_pixmap(self.window)?);
        self.memory = Some(self.backend.allocate(&self.geometry)?);
        Ok(())
    }

    fn refresh(&mut self) -> Result<()> {
        let actual = self.backend.window_size(self.window)?;
        let expected = self.geometry.dimensions();
        if actual != expected {
            return Err(CaptureError::GeometryMismatch { expected, actual });
        }

        let pixmap = self.backend.name_pixmap(self.window)?;
        if let Some(old) = self.pixmap.replace(pixmap) {
            self.backend.free_pixmap(old);
        }

        let memory = self.memory.as_mut().ok_or(CaptureError::NotOpen)?;
        if let Err(e) = self.backend.transfer(pixmap, &self.geometry, memory) {
            return Err(self.classify_transfer_error(e));
        }
        self.refreshed = true;
        Ok(())
    }

    /// A window that shrank after the size check fails the transfer as a
    /// stale target; report it as a size change instead
    fn classify_transfer_error(&self, err: CaptureError) -> CaptureError {
        if !matches!(err, CaptureError::StaleTarget(_)) {
            return err;
        }
        let expected = self.geometry.dimensions();
        match self.backend.window_size(self.window) {
            Ok(actual) if actual != expected => CaptureError::GeometryMismatch { expected, actual },
            _ => err,
        }
    }

    fn frame(&self) -> Option<FrameView<'_>> {
        if !self.refreshed {
            return None;
        }
        let memory = self.memory.as_ref()?;
        FrameView::new(
            memory.bytes(),
            self.geometry.width,
            self.geometry.height,
            self.geometry.stride,
            self.geometry.format,
        )
    }

    /// Release server- and client-side resources; the backend disconnects when dropped
    fn teardown(&mut self) {
        if let Some(memory) = self.memory.take() {
            self.backend.release(memory);
        }
        if let Some(pixmap) = self.pixmap.take() {
            self.backend.free_pixmap(pixmap);
        }
        if self.redirected {
            self.backend.unredirect(self.window);
            self.redirected = false;
        }
        self.refreshed = false;
    }
}

/// Capture session for a single window
///
/// Starts closed. [`open`](CaptureSession::open) moves it to the open state,
/// [`close`](CaptureSession::close) (or drop) back to closed. Accessors return
/// `None` while closed.
pub struct CaptureSession<B: CaptureBackend = X11Backend> {
    active: Option<ActiveCapture<B>>,
}

impl<B: CaptureBackend> CaptureSession<B> {
    /// Create a closed session
    pub const fn new() -> Self {
        Self { active: None }
    }

    /// Open a capture of `window` over an established backend connection
    ///
    /// On failure the session stays closed and the backend is dropped after
    /// everything acquired so far has been released.
    pub fn open_with(&mut self, backend: B, window: WindowId) -> Result<()> {
        if self.active.is_some() {
            return Err(CaptureError::AlreadyOpen);
        }

        let active = ActiveCapture::acquire(backend, window)?;
        info!(
            "Capturing window 0x{:x} (content window 0x{:x}) at {}x{}",
            active.requested, active.window, active.geometry.width, active.geometry.height
        );
        self.active = Some(active);
        Ok(())
    }

    /// Copy the window's current contents into the shared buffer
    ///
    /// Fails with [`CaptureError::NotOpen`] when closed, without touching any
    /// state. Other failures leave the session open and the previous frame in
    /// the buffer.
    pub fn refresh(&mut self) -> Result<()> {
        let active = self.active.as_mut().ok_or(CaptureError::NotOpen)?;

        let start = Instant::now();
        match active.refresh() {
            Ok(()) => {
                active.stats.record_refresh(start.elapsed().as_micros() as u64);
                Ok(())
            }
            Err(e) => {
                active.stats.record_failure();
                debug!("Refresh of window 0x{:x} failed: {}", active.window, e);
                Err(e)
            }
        }
    }

    /// View of the most recently refreshed frame
    ///
    /// `None` while closed and before the first successful refresh. The buffer
    /// address is the same for every frame of one session.
    pub fn buffer(&self) -> Option<FrameView<'_>> {
        self.active.as_ref()?.frame()
    }

    /// Width and height captured at open
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        self.active.as_ref().map(|a| a.geometry.dimensions())
    }

    /// Bytes per buffer row
    pub fn stride(&self) -> Option<usize> {
        self.active.as_ref().map(|a| a.geometry.stride)
    }

    pub fn pixel_format(&self) -> Option<PixelFormat> {
        self.active.as_ref().map(|a| a.geometry.format)
    }

    /// Window actually being captured
    pub fn resolved_window(&self) -> Option<WindowId> {
        self.active.as_ref().map(|a| a.window)
    }

    pub fn root_window(&self) -> Option<WindowId> {
        self.active.as_ref().map(|a| a.root)
    }

    pub fn stats(&self) -> Option<RefreshStats> {
        self.active.as_ref().map(|a| a.stats)
    }

    pub fn is_open(&self) -> bool {
        self.active.is_some()
    }

    /// Release all resources and disconnect. Does nothing when already closed.
    pub fn close(&mut self) {
        if let Some(mut active) = self.active.take() {
            active.teardown();
            debug!("Closed capture of window 0x{:x}", active.window);
        }
    }
}

impl CaptureSession<X11Backend> {
    /// Connect to `display` (or `$DISPLAY`) and open a capture of `window`
    pub fn open(&mut self, display: Option<&str>, window: WindowId) -> Result<()> {
        if self.active.is_some() {
            return Err(CaptureError::AlreadyOpen);
        }
        let backend = X11Backend::connect(display)?;
        self.open_with(backend, window)
    }
}

impl<B: CaptureBackend> Default for CaptureSession<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: CaptureBackend> Drop for CaptureSession<B> {
    fn drop(&mut self) {
        self.close();
    }
}
