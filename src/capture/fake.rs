//! In-memory X server stand-in for tests
//!
//! Tracks live connections, pixmaps, redirections and shared segments so tests
//! can check that sessions release everything they acquire.

use super::backend::{ByteOrder, CaptureBackend, CaptureGeometry, FrameMemory, PixelFormat, WindowDirectory};
use super::{CaptureError, PixmapId, Result, WindowId};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

const ROOT: WindowId = 0x1ab;

/// Row alignment applied to fake buffers, in bytes
const ROW_ALIGN: usize = 64;

#[derive(Debug, Clone)]
pub struct FakeWindow {
    pub width: u32,
    pub height: u32,
    pub frame_window: Option<WindowId>,
    pub title: Option<String>,
    pub wm_name: Option<String>,
    pub viewable: bool,
    pub fill: u8,
}

impl FakeWindow {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            frame_window: None,
            title: None,
            wm_name: None,
            viewable: true,
            fill: 0,
        }
    }

    pub fn with_frame_window(mut self, window: WindowId) -> Self {
        self.frame_window = Some(window);
        self
    }

    pub fn with_title(mut self, title: &str) -> Self {
        self.title = Some(title.to_string());
        self
    }

    /// Title set only through the legacy WM_NAME property
    pub fn with_wm_name(mut self, name: &str) -> Self {
        self.wm_name = Some(name.to_string());
        self
    }

    pub fn unmapped(mut self) -> Self {
        self.viewable = false;
        self
    }
}

#[derive(Default)]
struct ServerState {
    windows: HashMap<WindowId, FakeWindow>,
    client_list: Vec<WindowId>,
    composite_missing: bool,
    shm_fails: bool,
    redirected: HashSet<WindowId>,
    external_redirects: HashSet<WindowId>,
    unredirects: usize,
    resize_on_pixmap: Option<(WindowId, u32, u32)>,
    pixmaps: HashMap<PixmapId, WindowId>,
    next_id: u32,
    connections: usize,
    segments: usize,
    released_segments: usize,
}

/// Shared fake server; clones refer to the same state
#[derive(Clone, Default)]
pub struct FakeServer {
    state: Rc<RefCell<ServerState>>,
}

impl FakeServer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect(&self) -> FakeConnection {
        self.state.borrow_mut().connections += 1;
        FakeConnection {
            state: Rc::clone(&self.state),
        }
    }

    pub fn add_window(&self, id: WindowId, window: FakeWindow) {
        self.state.borrow_mut().windows.insert(id, window);
    }

    pub fn set_client_list(&self, clients: &[WindowId]) {
        self.state.borrow_mut().client_list = clients.to_vec();
    }

    pub fn resize_window(&self, id: WindowId, width: u32, height: u32) {
        if let Some(w) = self.state.borrow_mut().windows.get_mut(&id) {
            w.width = width;
            w.height = height;
        }
    }

    pub fn fill_window(&self, id: WindowId, value: u8) {
        if let Some(w) = self.state.borrow_mut().windows.get_mut(&id) {
            w.fill = value;
        }
    }

    pub fn destroy_window(&self, id: WindowId) {
        let mut state = self.state.borrow_mut();
        state.windows.remove(&id);
        state.redirected.remove(&id);
    }

    /// Mark `id` as redirected by another client; redirect requests for it fail
    pub fn redirect_externally(&self, id: WindowId) {
        self.state.borrow_mut().external_redirects.insert(id);
    }

    /// Resize `id` right after its next pixmap is named
    pub fn resize_after_next_pixmap(&self, id: WindowId, width: u32, height: u32) {
        self.state.borrow_mut().resize_on_pixmap = Some((id, width, height));
    }

    pub fn set_composite_available(&self, available: bool) {
        self.state.borrow_mut().composite_missing = !available;
    }

    pub fn set_shm_fails(&self, fails: bool) {
        self.state.borrow_mut().shm_fails = fails;
    }

    pub fn live_connections(&self) -> usize {
        self.state.borrow().connections
    }

    pub fn live_segments(&self) -> usize {
        self.state.borrow().segments
    }

    pub fn released_segments(&self) -> usize {
        self.state.borrow().released_segments
    }

    pub fn live_pixmaps(&self) -> usize {
        self.state.borrow().pixmaps.len()
    }

    pub fn unredirect_requests(&self) -> usize {
        self.state.borrow().unredirects
    }

    pub fn is_redirected(&self, id: WindowId) -> bool {
        self.state.borrow().redirected.contains(&id)
    }
}

/// One client connection to a [`FakeServer`]
pub struct FakeConnection {
    state: Rc<RefCell<ServerState>>,
}

impl Drop for FakeConnection {
    fn drop(&mut self) {
        self.state.borrow_mut().connections -= 1;
    }
}

/// Heap buffer standing in for a shared segment
pub struct FakeMemory {
    data: Vec<u8>,
}

impl FrameMemory for FakeMemory {
    fn bytes(&self) -> &[u8] {
        &self.data
    }
}

impl FakeConnection {
    fn window(&self, id: WindowId) -> Result<FakeWindow> {
        self.state
            .borrow()
            .windows
            .get(&id)
            .cloned()
            .ok_or(CaptureError::StaleTarget(id))
    }
}

impl WindowDirectory for FakeConnection {
    fn frame_window(&self, window: WindowId) -> Result<Option<WindowId>> {
        Ok(self.window(window)?.frame_window)
    }

    fn client_windows(&self) -> Result<Vec<WindowId>> {
        Ok(self.state.borrow().client_list.clone())
    }

    fn window_title(&self, window: WindowId) -> Result<Option<String>> {
        let w = self.window(window)?;
        Ok(w.title.or(w.wm_name))
    }

    fn is_viewable(&self, window: WindowId) -> Result<bool> {
        Ok(self.window(window)?.viewable)
    }
}

impl CaptureBackend for FakeConnection {
    type Memory = FakeMemory;

    fn root_window(&self) -> WindowId {
        ROOT
    }

    fn query_geometry(&self, window: WindowId) -> Result<CaptureGeometry> {
        let w = self.window(window)?;
        let row = w.width as usize * 4;
        let stride = (row + ROW_ALIGN - 1) / ROW_ALIGN * ROW_ALIGN;
        Ok(CaptureGeometry {
            width: w.width,
            height: w.height,
            border_width: 0,
            stride,
            format: PixelFormat {
                visual: 0x21,
                depth: 24,
                bits_per_pixel: 32,
                byte_order: ByteOrder::LsbFirst,
                red_mask: 0xff0000,
                green_mask: 0x00ff00,
                blue_mask: 0x0000ff,
            },
        })
    }

    fn window_size(&self, window: WindowId) -> Result<(u32, u32)> {
        let w = self.window(window)?;
        Ok((w.width, w.height))
    }

    fn check_redirection(&self) -> Result<()> {
        if self.state.borrow().composite_missing {
            return Err(CaptureError::MissingExtension("Composite"));
        }
        Ok(())
    }

    fn redirect(&self, window: WindowId) -> Result<()> {
        self.window(window)?;
        let mut state = self.state.borrow_mut();
        if state.external_redirects.contains(&window) {
            return Err(CaptureError::Connection("BadAccess (Composite RedirectWindow)".into()));
        }
        state.redirected.insert(window);
        Ok(())
    }

    fn unredirect(&self, window: WindowId) {
        let mut state = self.state.borrow_mut();
        state.unredirects += 1;
        state.redirected.remove(&window);
    }

    fn name_pixmap(&self, window: WindowId) -> Result<PixmapId> {
        let mut state = self.state.borrow_mut();
        let viewable = state.windows.get(&window).map(|w| w.viewable);
        let redirected = state.redirected.contains(&window) || state.external_redirects.contains(&window);
        if viewable != Some(true) || !redirected {
            return Err(CaptureError::StaleTarget(window));
        }
        state.next_id += 1;
        let id = state.next_id;
        state.pixmaps.insert(id, window);

        if let Some((target, width, height)) = state.resize_on_pixmap {
            if target == window {
                state.resize_on_pixmap = None;
                if let Some(w) = state.windows.get_mut(&window) {
                    w.width = width;
                    w.height = height;
                }
            }
        }
        Ok(id)
    }

    fn free_pixmap(&self, pixmap: PixmapId) {
        let removed = self.state.borrow_mut().pixmaps.remove(&pixmap);
        assert!(removed.is_some(), "pixmap {} freed twice", pixmap);
    }

    fn allocate(&self, geometry: &CaptureGeometry) -> Result<FakeMemory> {
        let mut state = self.state.borrow_mut();
        if state.shm_fails {
            return Err(CaptureError::Allocation("shmget: no space left".into()));
        }
        state.segments += 1;
        Ok(FakeMemory {
            data: vec![0; geometry.buffer_size()],
        })
    }

    fn release(&self, _memory: FakeMemory) {
        let mut state = self.state.borrow_mut();
        state.segments -= 1;
        state.released_segments += 1;
    }

    fn transfer(
        &self,
        pixmap: PixmapId,
        geometry: &CaptureGeometry,
        memory: &mut FakeMemory,
    ) -> Result<()> {
        let state = self.state.borrow();
        let window = *state
            .pixmaps
            .get(&pixmap)
            .ok_or_else(|| CaptureError::Connection(format!("BadPixmap 0x{:x}", pixmap)))?;
        let w = state.windows.get(&window).ok_or(CaptureError::StaleTarget(window))?;
        // The server answers a read past the drawable with BadMatch
        if w.width < geometry.width || w.height < geometry.height {
            return Err(CaptureError::StaleTarget(window));
        }

        let row = geometry.width as usize * geometry.format.bytes_per_pixel();
        for line in memory.data.chunks_mut(geometry.stride) {
            line[..row].fill(w.fill);
        }
        Ok(())
    }
}
