//! X11 capture backend
//!
//! Redirects windows with the Composite extension and reads their pixmaps
//! into a System V shared memory segment attached through MIT-SHM.

use super::backend::{ByteOrder, CaptureBackend, CaptureGeometry, FrameMemory, PixelFormat, WindowDirectory};
use super::{CaptureError, PixmapId, Result, WindowId};
use log::{debug, trace, warn};
use std::ffi::CString;
use x11rb::connection::{Connection, RequestConnection};
use x11rb::errors::{ReplyError, ReplyOrIdError};
use x11rb::protocol::composite::{self, Redirect};
use x11rb::protocol::shm;
use x11rb::protocol::xproto::*;
use x11rb::protocol::ErrorKind;
use x11rb::xcb_ffi::XCBConnection;

/// Lowest Composite version providing NameWindowPixmap
const COMPOSITE_MAJOR: u32 = 0;
const COMPOSITE_MINOR: u32 = 2;

/// Longest property value read, in 32-bit units
const MAX_PROPERTY_LENGTH: u32 = 1 << 16;

x11rb::atom_manager! {
    /// Atoms used for window resolution and enumeration
    pub Atoms: AtomsCookie {
        _NET_WM_FRAME_WINDOW,
        _NET_CLIENT_LIST,
        _NET_CLIENT_LIST_STACKING,
        _NET_WM_NAME,
        UTF8_STRING,
    }
}

/// Shared memory segment attached to the client and the X server
pub struct ShmSegment {
    /// Server-side segment id
    seg: shm::Seg,

    /// System V segment id
    shmid: i32,

    /// Client-side mapping
    addr: *mut u8,

    /// Mapping size in bytes
    size: usize,
}

// SAFETY: the mapping is owned exclusively by this value and only reachable
// through it; the X server writes it only during a transfer, which requires
// `&mut self`.
unsafe impl Send for ShmSegment {}

impl ShmSegment {
    /// Create and map a private segment of `size` bytes
    fn create(seg: shm::Seg, size: usize) -> Result<Self> {
        let shmid = unsafe { libc::shmget(libc::IPC_PRIVATE, size, libc::IPC_CREAT | 0o600) };
        if shmid < 0 {
            return Err(CaptureError::Allocation(format!(
                "shmget of {} bytes failed: {}",
                size,
                std::io::Error::last_os_error()
            )));
        }

        let addr = unsafe { libc::shmat(shmid, std::ptr::null(), 0) };
        if addr as isize == -1 {
            let err = std::io::Error::last_os_error();
            unsafe {
                libc::shmctl(shmid, libc::IPC_RMID, std::ptr::null_mut());
            }
            return Err(CaptureError::Allocation(format!("shmat failed: {}", err)));
        }

        Ok(Self {
            seg,
            shmid,
            addr: addr as *mut u8,
            size,
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }
}

impl FrameMemory for ShmSegment {
    fn bytes(&self) -> &[u8] {
        // SAFETY: `addr` maps `size` bytes for as long as `self` lives.
        unsafe { std::slice::from_raw_parts(self.addr as *const u8, self.size) }
    }
}

impl Drop for ShmSegment {
    fn drop(&mut self) {
        unsafe {
            libc::shmdt(self.addr as *const libc::c_void);
            libc::shmctl(self.shmid, libc::IPC_RMID, std::ptr::null_mut());
        }
    }
}

/// Capture backend over an XCB connection
pub struct X11Backend {
    conn: XCBConnection,

    /// Default screen
    screen_num: usize,

    /// Root window of the default screen
    root: Window,

    atoms: Atoms,
}

impl X11Backend {
    /// Connect to `display`, or to `$DISPLAY` when `None`
    pub fn connect(display: Option<&str>) -> Result<Self> {
        let display_cstr = display
            .map(CString::new)
            .transpose()
            .map_err(|e| CaptureError::Connect(format!("Invalid display string: {}", e)))?;

        let (conn, screen_num) = XCBConnection::connect(display_cstr.as_deref())
            .map_err(|e| CaptureError::Connect(e.to_string()))?;
        let root = conn.setup().roots[screen_num].root;

        let atoms = Atoms::new(&conn)?
            .reply()
            .map_err(|e| CaptureError::Connection(e.to_string()))?;

        debug!(
            "Connected to X server {} (screen {})",
            display.unwrap_or("$DISPLAY"),
            screen_num
        );

        Ok(Self {
            conn,
            screen_num,
            root,
            atoms,
        })
    }

    pub fn screen_num(&self) -> usize {
        self.screen_num
    }

    /// Read a list of 32-bit values from a window property
    fn property_u32(&self, window: Window, property: Atom, type_: impl Into<Atom>) -> Result<Vec<u32>> {
        let reply = self
            .conn
            .get_property(false, window, property, type_, 0, MAX_PROPERTY_LENGTH)?
            .reply()
            .map_err(|e| target_error(e, window))?;
        Ok(reply.value32().map(|v| v.collect()).unwrap_or_default())
    }

    /// Read a text property, decoding lossily
    fn property_text(&self, window: Window, property: Atom, type_: impl Into<Atom>) -> Result<Option<String>> {
        let reply = self
            .conn
            .get_property(false, window, property, type_, 0, MAX_PROPERTY_LENGTH)?
            .reply()
            .map_err(|e| target_error(e, window))?;
        Ok(decode_text(&reply))
    }
}

/// Text of an 8-bit property value, decoded lossily whatever its type
fn decode_text(reply: &GetPropertyReply) -> Option<String> {
    if reply.format != 8 || reply.value.is_empty() {
        return None;
    }
    Some(String::from_utf8_lossy(&reply.value).into_owned())
}

impl WindowDirectory for X11Backend {
    fn frame_window(&self, window: WindowId) -> Result<Option<WindowId>> {
        let values = self.property_u32(window, self.atoms._NET_WM_FRAME_WINDOW, AtomEnum::WINDOW)?;
        Ok(values.first().copied())
    }

    fn client_windows(&self) -> Result<Vec<WindowId>> {
        let stacking = self.property_u32(self.root, self.atoms._NET_CLIENT_LIST_STACKING, AtomEnum::WINDOW)?;
        if !stacking.is_empty() {
            return Ok(stacking);
        }
        trace!("_NET_CLIENT_LIST_STACKING empty, falling back to _NET_CLIENT_LIST");
        self.property_u32(self.root, self.atoms._NET_CLIENT_LIST, AtomEnum::WINDOW)
    }

    fn window_title(&self, window: WindowId) -> Result<Option<String>> {
        if let Some(title) = self.property_text(window, self.atoms._NET_WM_NAME, self.atoms.UTF8_STRING)? {
            return Ok(Some(title));
        }
        // WM_NAME may be STRING, UTF8_STRING or COMPOUND_TEXT
        self.property_text(window, AtomEnum::WM_NAME.into(), AtomEnum::ANY)
    }

    fn is_viewable(&self, window: WindowId) -> Result<bool> {
        let attrs = self
            .conn
            .get_window_attributes(window)?
            .reply()
            .map_err(|e| target_error(e, window))?;
        Ok(attrs.map_state == MapState::VIEWABLE)
    }
}

impl CaptureBackend for X11Backend {
    type Memory = ShmSegment;

    fn root_window(&self) -> WindowId {
        self.root
    }

    fn query_geometry(&self, window: WindowId) -> Result<CaptureGeometry> {
        let attrs = self
            .conn
            .get_window_attributes(window)?
            .reply()
            .map_err(|e| target_error(e, window))?;
        let geom = self
            .conn
            .get_geometry(window)?
            .reply()
            .map_err(|e| target_error(e, window))?;

        let setup = self.conn.setup();
        let width = geom.width as u32;
        let (bits_per_pixel, stride) = compute_format(&setup.pixmap_formats, width, geom.depth);
        let (red_mask, green_mask, blue_mask) = find_visual(setup, attrs.visual)
            .map(|v| (v.red_mask, v.green_mask, v.blue_mask))
            .unwrap_or((0, 0, 0));
        let byte_order = if setup.image_byte_order == ImageOrder::LSB_FIRST {
            ByteOrder::LsbFirst
        } else {
            ByteOrder::MsbFirst
        };

        Ok(CaptureGeometry {
            width,
            height: geom.height as u32,
            border_width: geom.border_width as u32,
            stride,
            format: PixelFormat {
                visual: attrs.visual,
                depth: geom.depth,
                bits_per_pixel,
                byte_order,
                red_mask,
                green_mask,
                blue_mask,
            },
        })
    }

    fn window_size(&self, window: WindowId) -> Result<(u32, u32)> {
        let geom = self
            .conn
            .get_geometry(window)?
            .reply()
            .map_err(|e| target_error(e, window))?;
        Ok((geom.width as u32, geom.height as u32))
    }

    fn check_redirection(&self) -> Result<()> {
        if self.conn.extension_information(composite::X11_EXTENSION_NAME)?.is_none() {
            return Err(CaptureError::MissingExtension("Composite"));
        }
        let version = composite::query_version(&self.conn, COMPOSITE_MAJOR, COMPOSITE_MINOR)?
            .reply()
            .map_err(|_| CaptureError::MissingExtension("Composite"))?;
        if (version.major_version, version.minor_version) < (COMPOSITE_MAJOR, COMPOSITE_MINOR) {
            return Err(CaptureError::MissingExtension("Composite"));
        }
        debug!(
            "Composite extension {}.{}",
            version.major_version, version.minor_version
        );

        if self.conn.extension_information(shm::X11_EXTENSION_NAME)?.is_none() {
            return Err(CaptureError::MissingExtension("MIT-SHM"));
        }
        shm::query_version(&self.conn)?
            .reply()
            .map_err(|_| CaptureError::MissingExtension("MIT-SHM"))?;
        Ok(())
    }

    fn redirect(&self, window: WindowId) -> Result<()> {
        composite::redirect_window(&self.conn, window, Redirect::AUTOMATIC)?
            .check()
            .map_err(|e| target_error(e, window))
    }

    fn unredirect(&self, window: WindowId) {
        match composite::unredirect_window(&self.conn, window, Redirect::AUTOMATIC) {
            Ok(cookie) => cookie.ignore_error(),
            Err(e) => warn!("Unredirecting window 0x{:x} failed: {}", window, e),
        }
        let _ = self.conn.flush();
    }

    fn name_pixmap(&self, window: WindowId) -> Result<PixmapId> {
        let pixmap = self.conn.generate_id().map_err(id_error)?;
        composite::name_window_pixmap(&self.conn, window, pixmap)?
            .check()
            .map_err(|e| target_error(e, window))?;
        trace!("Named pixmap 0x{:x} for window 0x{:x}", pixmap, window);
        Ok(pixmap)
    }

    fn free_pixmap(&self, pixmap: PixmapId) {
        match self.conn.free_pixmap(pixmap) {
            Ok(cookie) => cookie.ignore_error(),
            Err(e) => warn!("Freeing pixmap 0x{:x} failed: {}", pixmap, e),
        }
    }

    fn allocate(&self, geometry: &CaptureGeometry) -> Result<ShmSegment> {
        let size = geometry.buffer_size();
        if size == 0 {
            return Err(CaptureError::Allocation("window has no area".into()));
        }

        let seg = self.conn.generate_id().map_err(id_error)?;
        let segment = ShmSegment::create(seg, size)?;

        // On failure `segment` is dropped, which unmaps and removes it
        shm::attach(&self.conn, seg, segment.shmid as u32, false)?
            .check()
            .map_err(|e| CaptureError::Allocation(format!("XShmAttach failed: {}", e)))?;

        debug!("Attached {} byte shared segment 0x{:x}", size, seg);
        Ok(segment)
    }

    fn release(&self, memory: ShmSegment) {
        match shm::detach(&self.conn, memory.seg) {
            Ok(cookie) => {
                // The server must detach before the segment is removed
                if let Err(e) = cookie.check() {
                    warn!("XShmDetach failed: {}", e);
                }
            }
            Err(e) => warn!("XShmDetach failed: {}", e),
        }
        drop(memory);
    }

    fn transfer(
        &self,
        pixmap: PixmapId,
        geometry: &CaptureGeometry,
        memory: &mut ShmSegment,
    ) -> Result<()> {
        let border = geometry.border_width as i16;
        shm::get_image(
            &self.conn,
            pixmap,
            border,
            border,
            geometry.width as u16,
            geometry.height as u16,
            u32::MAX,
            u8::from(ImageFormat::Z_PIXMAP),
            memory.seg,
            0,
        )?
        .reply()
        .map_err(|e| target_error(e, pixmap))?;
        Ok(())
    }
}

/// Map a reply error on `target` to a capture error
fn target_error(err: ReplyError, target: u32) -> CaptureError {
    match err {
        ReplyError::X11Error(e)
            if matches!(
                e.error_kind,
                ErrorKind::Window | ErrorKind::Drawable | ErrorKind::Pixmap | ErrorKind::Match
            ) =>
        {
            CaptureError::StaleTarget(target)
        }
        other => CaptureError::Connection(other.to_string()),
    }
}

fn id_error(err: ReplyOrIdError) -> CaptureError {
    CaptureError::Allocation(format!("cannot allocate X resource id: {}", err))
}

/// Look up a visual by id on any screen
fn find_visual(setup: &Setup, visual: Visualid) -> Option<&Visualtype> {
    setup
        .roots
        .iter()
        .flat_map(|screen| screen.allowed_depths.iter())
        .flat_map(|depth| depth.visuals.iter())
        .find(|v| v.visual_id == visual)
}

/// Bits per pixel and padded row length for an image of `width` at `depth`
fn compute_format(formats: &[Format], width: u32, depth: u8) -> (u8, usize) {
    for format in formats {
        if format.depth == depth {
            let bpp = format.bits_per_pixel as usize;
            let pad = (format.scanline_pad as usize).max(8);
            let bits_per_line = width as usize * bpp;
            let padded_bits = (bits_per_line + pad - 1) / pad * pad;
            return (format.bits_per_pixel, padded_bits / 8);
        }
    }
    (32, width as usize * 4)
}

#[cfg(test)]
mod tests {
    use super::*;
    use x11rb::errors::ConnectionError;
    use x11rb::x11_utils::X11Error;

    fn x11_error(error_kind: ErrorKind) -> ReplyError {
        ReplyError::X11Error(X11Error {
            error_kind,
            error_code: 0,
            sequence: 12,
            bad_value: 0x400001,
            minor_opcode: 0,
            major_opcode: 14,
            extension_name: None,
            request_name: None,
        })
    }

    fn text_reply(type_: Atom, format: u8, value: &[u8]) -> GetPropertyReply {
        GetPropertyReply {
            format,
            sequence: 3,
            length: 0,
            type_,
            bytes_after: 0,
            value_len: value.len() as u32,
            value: value.to_vec(),
        }
    }

    #[test]
    fn target_errors_map_to_stale_target() {
        for kind in [ErrorKind::Window, ErrorKind::Drawable, ErrorKind::Pixmap, ErrorKind::Match] {
            assert_eq!(target_error(x11_error(kind), 0x400001), CaptureError::StaleTarget(0x400001));
        }
    }

    #[test]
    fn other_errors_map_to_connection() {
        assert!(matches!(
            target_error(x11_error(ErrorKind::Alloc), 0x400001),
            CaptureError::Connection(_)
        ));
        assert!(matches!(
            target_error(x11_error(ErrorKind::Access), 0x400001),
            CaptureError::Connection(_)
        ));
        assert!(matches!(
            target_error(ReplyError::ConnectionError(ConnectionError::UnknownError), 0x400001),
            CaptureError::Connection(_)
        ));
    }

    #[test]
    fn text_of_any_8bit_type_is_decoded() {
        // COMPOUND_TEXT has no predefined atom; any id other than STRING will do
        let compound = text_reply(0x155, 8, b"xterm");
        assert_eq!(decode_text(&compound).as_deref(), Some("xterm"));

        let latin = text_reply(AtomEnum::STRING.into(), 8, b"caf\xe9");
        assert_eq!(decode_text(&latin).as_deref(), Some("caf\u{fffd}"));
    }

    #[test]
    fn empty_or_wide_values_have_no_text() {
        // A type mismatch comes back as an empty value
        assert_eq!(decode_text(&text_reply(0, 8, b"")), None);
        assert_eq!(decode_text(&text_reply(AtomEnum::WINDOW.into(), 32, &[1, 0, 0, 0])), None);
    }

    fn formats() -> Vec<Format> {
        vec![
            Format {
                depth: 1,
                bits_per_pixel: 1,
                scanline_pad: 32,
            },
            Format {
                depth: 24,
                bits_per_pixel: 32,
                scanline_pad: 32,
            },
            Format {
                depth: 16,
                bits_per_pixel: 16,
                scanline_pad: 32,
            },
        ]
    }

    #[test]
    fn depth_24_uses_four_bytes_per_pixel() {
        assert_eq!(compute_format(&formats(), 800, 24), (32, 3200));
    }

    #[test]
    fn rows_are_padded_to_scanline() {
        // 3 pixels * 16 bits = 48 bits, padded to 64
        assert_eq!(compute_format(&formats(), 3, 16), (16, 8));
        // 10 pixels * 1 bit, padded to 32
        assert_eq!(compute_format(&formats(), 10, 1), (1, 4));
    }

    #[test]
    fn unknown_depth_falls_back_to_32bpp() {
        assert_eq!(compute_format(&formats(), 5, 30), (32, 20));
    }
}
