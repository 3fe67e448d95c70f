//! Window enumeration
//!
//! Lists mapped top-level client windows with their titles. Handles are
//! resolved to their content windows the same way a capture session does.

use crate::capture::{resolve_content_window, Result, WindowDirectory, WindowId};
use log::trace;
use serde::Serialize;

/// A capturable window
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WindowInfo {
    /// Content window handle
    pub window: WindowId,

    /// Window title
    pub title: String,
}

/// List viewable, titled client windows in stacking order
///
/// Windows that disappear while being inspected are skipped.
pub fn list_windows<D: WindowDirectory + ?Sized>(directory: &D) -> Result<Vec<WindowInfo>> {
    let clients = directory.client_windows()?;
    let mut windows = Vec::with_capacity(clients.len());

    for client in clients {
        let window = resolve_content_window(directory, client);

        let title = match directory.window_title(window) {
            Ok(Some(title)) => title,
            Ok(None) => continue,
            Err(e) => {
                trace!("Skipping window 0x{:x}: {}", window, e);
                continue;
            }
        };

        match directory.is_viewable(window) {
            Ok(true) => windows.push(WindowInfo { window, title }),
            Ok(false) => {}
            Err(e) => trace!("Skipping window 0x{:x}: {}", window, e),
        }
    }

    Ok(windows)
}
