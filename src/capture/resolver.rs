//! Content window resolution
//!
//! Window managers may hand out the handle of the decoration frame they wrap
//! around a client. The frame-window property points at the window that owns
//! the rendered pixels.

use super::backend::WindowDirectory;
use super::WindowId;
use log::trace;

/// Resolve `window` to the window that should be captured
///
/// Returns the frame-window property value when present, otherwise `window`
/// itself. Query failures fall back to `window`.
pub fn resolve_content_window<D: WindowDirectory + ?Sized>(directory: &D, window: WindowId) -> WindowId {
    match directory.frame_window(window) {
        Ok(Some(target)) if target != 0 => {
            trace!("Window 0x{:x} resolves to 0x{:x}", window, target);
            target
        }
        Ok(_) => window,
        Err(e) => {
            trace!("Frame window lookup on 0x{:x} failed: {}", window, e);
            window
        }
    }
}
