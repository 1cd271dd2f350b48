//! Session identifiers and the events sessions post to the control thread

use std::path::PathBuf;

use crate::encoder::SnapshotFrame;

/// Opaque session identifier: 32 lowercase hex characters.
pub type SessionId = String;

/// Notification produced by a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScreencastEvent {
    /// A video recording is running and writing to `path`.
    Started { path: PathBuf },
    /// A still frame is ready; the client must acknowledge it.
    Frame(SnapshotFrame),
    /// The session is fully stopped (for video: the file is complete).
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEvent {
    pub session_id: SessionId,
    pub event: ScreencastEvent,
}

impl SessionEvent {
    pub fn new(session_id: impl Into<SessionId>, event: ScreencastEvent) -> Self {
        Self {
            session_id: session_id.into(),
            event,
        }
    }

    pub fn is_stopped(&self) -> bool {
        matches!(self.event, ScreencastEvent::Stopped)
    }
}
