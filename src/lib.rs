//! xcomp-capture - zero-copy X11 window capture
//!
//! Redirects a window with the Composite extension and exposes its contents
//! through a MIT-SHM buffer that can be refreshed at video rate.

pub mod capture;
pub mod config;
pub mod ffi;
pub mod windows;

// Re-exports
pub use capture::{CaptureError, CaptureSession, FrameView, PixelFormat, WindowId, X11Backend};
pub use config::Config;
pub use windows::{list_windows, WindowInfo};
