use thiserror::Error;

use crate::capture::WindowId;
use crate::encoder::EncoderError;

/// Smallest accepted recording or screencast edge, in pixels.
pub const MIN_SIZE: u32 = 10;
/// Largest accepted recording or screencast edge, in pixels.
pub const MAX_SIZE: u32 = 10_000;

#[derive(Debug, Error)]
pub enum ScreencastError {
    #[error("Invalid size {width}x{height}: both must be between 10 and 10000")]
    InvalidSize { width: u32, height: u32 },

    #[error(transparent)]
    Encoder(#[from] EncoderError),

    #[error("Failed to start capture: {0}")]
    Capture(String),

    #[error("Unknown window {0}")]
    UnknownWindow(WindowId),

    #[error("Invalid session id '{0}'")]
    InvalidId(String),

    #[error("No screencast frame to acknowledge for session '{0}'")]
    NothingToAck(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ScreencastError {
    /// Errors caused by the request rather than by the machine.
    pub fn is_invalid_argument(&self) -> bool {
        matches!(
            self,
            ScreencastError::InvalidSize { .. }
                | ScreencastError::InvalidId(_)
                | ScreencastError::NothingToAck(_)
                | ScreencastError::UnknownWindow(_)
                | ScreencastError::Encoder(EncoderError::InvalidDimensions { .. })
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_argument_errors_are_classified() {
        assert!(ScreencastError::InvalidSize { width: 5, height: 20 }.is_invalid_argument());
        assert!(ScreencastError::InvalidId("x".into()).is_invalid_argument());
        assert!(
            ScreencastError::Encoder(EncoderError::InvalidDimensions { width: 11, height: 10 })
                .is_invalid_argument()
        );
        assert!(!ScreencastError::Capture("busy".into()).is_invalid_argument());
    }

    #[test]
    fn test_messages() {
        let err = ScreencastError::InvalidSize { width: 5, height: 20 };
        assert_eq!(
            err.to_string(),
            "Invalid size 5x20: both must be between 10 and 10000"
        );
    }
}
