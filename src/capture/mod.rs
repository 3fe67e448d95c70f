//! X11 window capture
//!
//! Redirects a window through the Composite extension and copies its pixmap
//! into a MIT-SHM segment shared with the X server.

pub mod backend;
pub mod frame;
pub mod resolver;
pub mod session;
mod xshm;

#[cfg(test)]
pub(crate) mod fake;

pub use backend::{ByteOrder, CaptureBackend, CaptureGeometry, FrameMemory, PixelFormat, WindowDirectory};
pub use frame::{FrameView, RefreshStats};
pub use resolver::resolve_content_window;
pub use session::CaptureSession;
pub use xshm::{ShmSegment, X11Backend};

use std::fmt;

/// X11 window identifier
pub type WindowId = u32;

/// X11 pixmap identifier
pub type PixmapId = u32;

/// Capture errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    /// Could not connect to the X server
    Connect(String),
    /// A required X extension is not available
    MissingExtension(&'static str),
    /// Shared memory or image setup failed
    Allocation(String),
    /// The target window was destroyed or unmapped
    StaleTarget(WindowId),
    /// The window size no longer matches the size captured at open
    GeometryMismatch {
        expected: (u32, u32),
        actual: (u32, u32),
    },
    /// The session is not open
    NotOpen,
    /// The session is already open
    AlreadyOpen,
    /// Connection lost or unexpected protocol error
    Connection(String),
}

impl fmt::Display for CaptureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureError::Connect(msg) => {
                write!(f, "Cannot connect to X server: {}", msg)
            }
            CaptureError::MissingExtension(name) => {
                write!(f, "X server does not support the {} extension", name)
            }
            CaptureError::Allocation(msg) => {
                write!(f, "Shared memory setup failed: {}", msg)
            }
            CaptureError::StaleTarget(window) => {
                write!(f, "Window 0x{:x} is destroyed or not viewable", window)
            }
            CaptureError::GeometryMismatch { expected, actual } => {
                write!(
                    f,
                    "Window size changed from {}x{} to {}x{}; reopen the capture",
                    expected.0, expected.1, actual.0, actual.1
                )
            }
            CaptureError::NotOpen => write!(f, "Capture session is not open"),
            CaptureError::AlreadyOpen => write!(f, "Capture session is already open"),
            CaptureError::Connection(msg) => {
                write!(f, "X11 connection error: {}", msg)
            }
        }
    }
}

impl std::error::Error for CaptureError {}

impl From<x11rb::errors::ConnectionError> for CaptureError {
    fn from(err: x11rb::errors::ConnectionError) -> Self {
        CaptureError::Connection(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CaptureError>;
