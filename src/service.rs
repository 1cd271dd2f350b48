//! Session registry owned by the control thread

use log::{info, warn};
use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

use crate::capture::{CaptureCapability, CapturerPool, HostWindow};
use crate::config::ScreencastConfig;
use crate::encoder::{FrameEncoder, SnapshotEncoder};
use crate::error::{MAX_SIZE, MIN_SIZE, ScreencastError};
use crate::pipeline::{CaptureSession, ScreencastEvent, SessionEvent, SessionId, SessionOutput};

/// Output of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum RecordingMode {
    /// Record a video file.
    Video { path: PathBuf },
    /// Stream JPEG stills; `quality` 0 selects the configured default.
    Still {
        #[serde(default)]
        quality: u8,
    },
}

/// Page area that bounds the captured region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

/// Parameters of a new session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRecording {
    pub mode: RecordingMode,
    /// Video frame size, or the bounding box of screencast frames.
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub viewport: Option<Viewport>,
    /// Rows above the page area (e.g. browser toolbars) to crop in
    /// addition to the window decoration.
    #[serde(default)]
    pub top_offset: u32,
}

/// Owns every running session.
///
/// All methods run on the control thread; events from capture and encode
/// threads arrive on the receiver returned by [`ScreencastService::new`].
pub struct ScreencastService {
    config: ScreencastConfig,
    sessions: HashMap<SessionId, CaptureSession>,
    capturers: CapturerPool,
    events: UnboundedSender<SessionEvent>,
}

impl ScreencastService {
    pub fn new(config: ScreencastConfig) -> (Self, UnboundedReceiver<SessionEvent>) {
        let (events, rx) = unbounded_channel();
        let service = Self {
            config,
            sessions: HashMap::new(),
            capturers: CapturerPool::new(),
            events,
        };
        (service, rx)
    }

    pub fn config(&self) -> &ScreencastConfig {
        &self.config
    }

    /// Start a recording or screencast of `window`; returns the session id.
    ///
    /// Nothing is registered when this fails, and a video file created for
    /// the failed session is removed.
    pub fn start_video_recording(
        &mut self,
        window: &dyn HostWindow,
        request: StartRecording,
    ) -> Result<SessionId, ScreencastError> {
        let StartRecording {
            mode,
            width,
            height,
            viewport,
            top_offset,
        } = request;
        let valid = MIN_SIZE..=MAX_SIZE;
        if !valid.contains(&width) || !valid.contains(&height) {
            return Err(ScreencastError::InvalidSize { width, height });
        }

        let mut margin = window.frame_margin();
        margin.top += top_offset;
        let viewport = viewport.map(|v| (v.width, v.height));

        let capturer = self
            .capturers
            .acquire(window)
            .map_err(|e| ScreencastError::Capture(format!("{:#}", e)))?;

        let mut video_path = None;
        let output = match mode {
            RecordingMode::Video { path } => {
                let mut options = self.config.encoder_options();
                options.viewport = viewport;
                let path = self.config.resolve_output(path);
                let encoder = FrameEncoder::create(&path, width, height, margin, options)?;
                video_path = Some(path);
                SessionOutput::Video(encoder)
            }
            RecordingMode::Still { quality } => {
                let quality = if quality == 0 {
                    self.config.default_quality
                } else {
                    quality.min(100)
                };
                SessionOutput::Still {
                    encoder: SnapshotEncoder::new(width, height, quality, margin, viewport),
                    max_in_flight: self.config.max_frames_in_flight,
                }
            }
        };

        let id = self.generate_id();
        let capability = CaptureCapability {
            width,
            height,
            max_fps: self.config.capture_fps,
        };
        let mut session =
            CaptureSession::new(id.clone(), capturer, capability, output, self.events.clone());
        if let Err(e) = session.start() {
            warn!("Session {} failed to start: {}", id, e);
            session.abandon();
            return Err(e);
        }

        self.sessions.insert(id.clone(), session);
        if let Some(path) = video_path {
            info!("Session {} recording to {}", id, path.display());
            let _ = self
                .events
                .send(SessionEvent::new(id.clone(), ScreencastEvent::Started { path }));
        }
        Ok(id)
    }

    /// Stop and forget a session. Its `Stopped` event follows asynchronously.
    pub fn stop_video_recording(&mut self, id: &str) -> Result<(), ScreencastError> {
        let mut session = self
            .sessions
            .remove(id)
            .ok_or_else(|| ScreencastError::InvalidId(id.to_string()))?;
        session.stop();
        Ok(())
    }

    /// Acknowledge one screencast frame of a session.
    pub fn screencast_frame_ack(&mut self, id: &str) -> Result<(), ScreencastError> {
        self.sessions
            .get(id)
            .ok_or_else(|| ScreencastError::InvalidId(id.to_string()))?
            .frame_ack()
    }

    pub fn session_ids(&self) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> = self.sessions.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Stop every session, e.g. on shutdown.
    pub fn stop_all(&mut self) {
        if self.sessions.is_empty() {
            return;
        }
        info!("Stopping {} session(s)", self.sessions.len());
        for (_, mut session) in self.sessions.drain() {
            session.stop();
        }
    }

    /// 16 random bytes from the OS, hex encoded, distinct from every live session.
    fn generate_id(&self) -> SessionId {
        unique_id(
            || {
                let mut bytes = [0u8; 16];
                OsRng.fill_bytes(&mut bytes);
                bytes
            },
            |id| self.sessions.contains_key(id),
        )
    }
}

fn unique_id(mut random: impl FnMut() -> [u8; 16], taken: impl Fn(&str) -> bool) -> SessionId {
    loop {
        let id = hex::encode(random());
        if !taken(&id) {
            return id;
        }
    }
}

impl Drop for ScreencastService {
    fn drop(&mut self) {
        self.stop_all();
    }
}
