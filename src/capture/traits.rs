//! Traits implemented by the host engine's capture backends

use std::sync::Arc;

use super::{CapturedFrame, Margin};

/// Stable identity of a host window, used to share one capturer per window.
pub type WindowId = u64;

/// Receives frames on the source's capture thread.
///
/// Implementations must not block for long: the call happens on the thread
/// that owns the compositor readback.
pub trait FrameSink: Send + Sync {
    fn on_frame(&self, frame: &CapturedFrame);
}

/// Nominal capture request. Sources may deliver frames at their native size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureCapability {
    pub width: u32,
    pub height: u32,
    pub max_fps: u32,
}

/// OS-level frame producer for one window.
pub trait FrameSource: Send {
    /// Begin delivering frames to `sink` until [`FrameSource::stop`] is called.
    fn start(
        &mut self,
        capability: CaptureCapability,
        sink: Arc<dyn FrameSink>,
    ) -> Result<(), anyhow::Error>;

    fn stop(&mut self) -> Result<(), anyhow::Error>;
}

/// Window handle as exposed by the embedder.
pub trait HostWindow: Send + Sync {
    fn window_id(&self) -> WindowId;

    /// Window decoration around the client area (screen bounds minus client bounds).
    fn frame_margin(&self) -> Margin;

    /// Create a new OS capturer for this window.
    fn create_source(&self) -> Result<Box<dyn FrameSource>, anyhow::Error>;
}
