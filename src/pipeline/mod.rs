//! Capture sessions
//!
//! A session connects one window's shared capturer to either a video
//! encoder or the still-frame screencast path, and reports back to the
//! control thread through [`SessionEvent`]s.

pub mod health;
pub mod session;
pub mod types;

pub use health::{HealthSummary, SessionHealth};
pub use session::{CaptureSession, SessionOutput};
pub use types::{ScreencastEvent, SessionEvent, SessionId};
