//! Remote control over a byte pipe
//!
//! [`pipe`] frames raw messages, [`protocol`] defines the JSON commands and
//! notifications, and [`server`] drives a [`crate::service::ScreencastService`]
//! from them.

pub mod pipe;
pub mod protocol;
pub mod server;

pub use pipe::{PipeEvent, PipeWriter, spawn_reader};
pub use server::{ControlServer, ServerExit, SyntheticWindows, WindowProvider};
