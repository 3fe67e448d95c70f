//! C interface
//!
//! Exposes one process-wide capture session to C callers and to language
//! bindings loading the shared library. Functions return 0 on success and a
//! negative value on failure.

use crate::capture::{CaptureError, CaptureSession, X11Backend};
use crate::windows::{list_windows, WindowInfo};
use log::warn;
use parking_lot::Mutex;
use std::ffi::{c_char, c_int, c_ulong, c_void};
use std::ptr;

/// Title buffer length, including the terminating NUL
pub const TITLE_LEN: usize = 256;

const OK: c_int = 0;

/// Status for a handle that is not a valid X11 window id
const INVALID_WINDOW: c_int = -9;

static SESSION: Mutex<CaptureSession<X11Backend>> = parking_lot::const_mutex(CaptureSession::new());

/// Window handle and NUL-terminated title
#[repr(C)]
pub struct XcompWindowInfo {
    pub window: c_ulong,
    pub title: [c_char; TITLE_LEN],
}

impl From<&WindowInfo> for XcompWindowInfo {
    fn from(info: &WindowInfo) -> Self {
        let mut title = [0 as c_char; TITLE_LEN];
        // Truncate on a char boundary to keep the title valid UTF-8
        let mut end = info.title.len().min(TITLE_LEN - 1);
        while !info.title.is_char_boundary(end) {
            end -= 1;
        }
        for (dst, src) in title.iter_mut().zip(&info.title.as_bytes()[..end]) {
            *dst = *src as c_char;
        }
        Self {
            window: info.window as c_ulong,
            title,
        }
    }
}

/// Status code for a failure
fn status(err: &CaptureError) -> c_int {
    match err {
        CaptureError::Connect(_) => -1,
        CaptureError::MissingExtension(_) => -2,
        CaptureError::Allocation(_) => -3,
        CaptureError::StaleTarget(_) => -4,
        CaptureError::GeometryMismatch { .. } => -5,
        CaptureError::NotOpen => -6,
        CaptureError::AlreadyOpen => -7,
        CaptureError::Connection(_) => -8,
    }
}

/// Open the process-wide capture of `window` on `$DISPLAY`
#[no_mangle]
pub extern "C" fn xcomp_open(window: c_ulong) -> c_int {
    // X11 resource ids are 32 bits; wider values never name a window
    let Ok(window) = u32::try_from(window) else {
        warn!("Window handle 0x{:x} is not an X11 window id", window);
        return INVALID_WINDOW;
    };
    let mut session = SESSION.lock();
    match session.open(None, window) {
        Ok(()) => OK,
        Err(e) => {
            warn!("Opening capture of window 0x{:x} failed: {}", window, e);
            status(&e)
        }
    }
}

/// Copy the window's current contents into the shared buffer
#[no_mangle]
pub extern "C" fn xcomp_refresh() -> c_int {
    match SESSION.lock().refresh() {
        Ok(()) => OK,
        Err(e) => status(&e),
    }
}

/// Shared buffer address, or NULL before the first successful refresh
///
/// Writes the buffer length (`stride * height`) to `len` when it is not NULL.
/// The address stays valid until `xcomp_close`.
///
/// # Safety
///
/// `len` must be NULL or point to writable memory for a `usize`.
#[no_mangle]
pub unsafe extern "C" fn xcomp_buffer(len: *mut usize) -> *const c_void {
    let session = SESSION.lock();
    let (ptr, size) = match session.buffer() {
        Some(frame) => (frame.as_ptr() as *const c_void, frame.len()),
        None => (ptr::null(), 0),
    };
    if !len.is_null() {
        *len = size;
    }
    ptr
}

/// Width and height captured at open; zero when closed
///
/// # Safety
///
/// `width` and `height` must each be NULL or point to a writable `c_int`.
#[no_mangle]
pub unsafe extern "C" fn xcomp_dimensions(width: *mut c_int, height: *mut c_int) {
    let (w, h) = SESSION.lock().dimensions().unwrap_or((0, 0));
    if !width.is_null() {
        *width = w as c_int;
    }
    if !height.is_null() {
        *height = h as c_int;
    }
}

/// Bytes per buffer row; zero when closed
#[no_mangle]
pub extern "C" fn xcomp_stride() -> c_int {
    SESSION.lock().stride().unwrap_or(0) as c_int
}

/// Close the capture. Safe to call when nothing is open.
#[no_mangle]
pub extern "C" fn xcomp_close() {
    SESSION.lock().close();
}

/// List viewable top-level windows
///
/// On success stores a newly allocated array in `windows` and its length in
/// `count`; release it with `xcomp_free_windows`.
///
/// # Safety
///
/// `windows` and `count` must point to writable memory.
#[no_mangle]
pub unsafe extern "C" fn xcomp_list_windows(
    windows: *mut *mut XcompWindowInfo,
    count: *mut c_int,
) -> c_int {
    if windows.is_null() || count.is_null() {
        return -1;
    }

    let listed = match X11Backend::connect(None).and_then(|backend| list_windows(&backend)) {
        Ok(listed) => listed,
        Err(e) => {
            warn!("Listing windows failed: {}", e);
            return status(&e);
        }
    };

    let records: Box<[XcompWindowInfo]> = listed.iter().map(XcompWindowInfo::from).collect();
    *count = records.len() as c_int;
    *windows = Box::into_raw(records) as *mut XcompWindowInfo;
    OK
}

/// Free an array returned by `xcomp_list_windows`
///
/// # Safety
///
/// `windows` and `count` must come from one successful `xcomp_list_windows`
/// call, and the array must not be freed twice.
#[no_mangle]
pub unsafe extern "C" fn xcomp_free_windows(windows: *mut XcompWindowInfo, count: c_int) {
    if windows.is_null() || count < 0 {
        return;
    }
    let slice = ptr::slice_from_raw_parts_mut(windows, count as usize);
    drop(Box::from_raw(slice));
}
