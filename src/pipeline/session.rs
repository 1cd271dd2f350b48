//! One recording or screencast of one window
//!
//! The session subscribes a sink to the window's shared capturer. The sink
//! runs on the capture thread: in video mode it forwards frames to the
//! [`FrameEncoder`], in still mode it JPEG-encodes them and posts them to
//! the control thread, bounded by the number of unacknowledged frames.

use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc::UnboundedSender;

use super::health::SessionHealth;
use super::types::{ScreencastEvent, SessionEvent, SessionId};
use crate::capture::capturer::SubscriptionId;
use crate::capture::{CaptureCapability, CapturedFrame, FrameSink, SharedCapturer};
use crate::encoder::{FrameEncoder, SnapshotEncoder};
use crate::error::ScreencastError;

/// What a session produces.
pub enum SessionOutput {
    Video(FrameEncoder),
    Still {
        encoder: SnapshotEncoder,
        max_in_flight: u32,
    },
}

enum SinkKind {
    Video(Mutex<Option<FrameEncoder>>),
    Still {
        encoder: SnapshotEncoder,
        max_in_flight: u32,
        in_flight: AtomicU32,
        /// Held while posting a frame so that `stop` can fence deliveries.
        delivery: Mutex<()>,
    },
}

struct SessionSink {
    id: SessionId,
    kind: SinkKind,
    stopped: AtomicBool,
    events: UnboundedSender<SessionEvent>,
    health: SessionHealth,
}

impl SessionSink {
    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    fn deliver_still(
        &self,
        frame: &CapturedFrame,
        encoder: &SnapshotEncoder,
        max_in_flight: u32,
        in_flight: &AtomicU32,
        delivery: &Mutex<()>,
    ) {
        let reserved = in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < max_in_flight).then_some(n + 1)
            })
            .is_ok();
        if !reserved {
            self.health.record_frame_drop();
            return;
        }
        let release = || {
            in_flight.fetch_sub(1, Ordering::AcqRel);
        };

        let snapshot = match encoder.encode(frame) {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => {
                debug!("Session {}: frame fully cropped, skipping", self.id);
                release();
                return;
            }
            Err(e) => {
                warn!("Session {}: failed to encode screencast frame: {}", self.id, e);
                self.health.record_encode_failure();
                release();
                return;
            }
        };

        let _guard = lock(delivery);
        if self.is_stopped() {
            release();
            return;
        }
        let size = snapshot.data.len();
        let event = SessionEvent::new(self.id.clone(), ScreencastEvent::Frame(snapshot));
        if self.events.send(event).is_err() {
            debug!("Session {}: event receiver is gone", self.id);
            release();
            return;
        }
        self.health.record_delivered(size);
    }
}

impl FrameSink for SessionSink {
    fn on_frame(&self, frame: &CapturedFrame) {
        if self.is_stopped() {
            return;
        }
        self.health.record_received();

        match &self.kind {
            SinkKind::Video(encoder) => {
                let mut encoder = lock(encoder);
                // Checked under the lock: stop() finishes the encoder while holding it.
                if self.is_stopped() {
                    return;
                }
                let Some(encoder) = encoder.as_mut() else {
                    return;
                };
                match encoder.encode_frame(frame) {
                    Ok(()) => self.health.record_queued(),
                    Err(e) => {
                        debug!("Session {}: frame not queued: {}", self.id, e);
                        self.health.record_encode_failure();
                    }
                }
            }
            SinkKind::Still {
                encoder,
                max_in_flight,
                in_flight,
                delivery,
            } => self.deliver_still(frame, encoder, *max_in_flight, in_flight, delivery),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A started or startable capture session.
pub struct CaptureSession {
    id: SessionId,
    capturer: Arc<SharedCapturer>,
    capability: CaptureCapability,
    subscription: Option<SubscriptionId>,
    sink: Arc<SessionSink>,
    stopped: bool,
}

impl CaptureSession {
    pub fn new(
        id: SessionId,
        capturer: Arc<SharedCapturer>,
        capability: CaptureCapability,
        output: SessionOutput,
        events: UnboundedSender<SessionEvent>,
    ) -> Self {
        let kind = match output {
            SessionOutput::Video(encoder) => SinkKind::Video(Mutex::new(Some(encoder))),
            SessionOutput::Still {
                encoder,
                max_in_flight,
            } => SinkKind::Still {
                encoder,
                max_in_flight: max_in_flight.max(1),
                in_flight: AtomicU32::new(0),
                delivery: Mutex::new(()),
            },
        };
        let sink = Arc::new(SessionSink {
            id: id.clone(),
            kind,
            stopped: AtomicBool::new(false),
            events,
            health: SessionHealth::new(),
        });

        Self {
            id,
            capturer,
            capability,
            subscription: None,
            sink,
            stopped: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_video(&self) -> bool {
        matches!(self.sink.kind, SinkKind::Video(_))
    }

    pub fn health(&self) -> &SessionHealth {
        &self.sink.health
    }

    /// Subscribe to the window's capturer.
    pub fn start(&mut self) -> Result<(), ScreencastError> {
        let sink: Arc<dyn FrameSink> = self.sink.clone();
        let subscription = self
            .capturer
            .subscribe(self.capability, sink)
            .map_err(|e| ScreencastError::Capture(format!("{:#}", e)))?;
        self.subscription = Some(subscription);
        info!(
            "Session {} started on window {} ({})",
            self.id,
            self.capturer.window_id(),
            if self.is_video() { "video" } else { "screencast" }
        );
        Ok(())
    }

    /// Stop capturing and finalize the output. A second call is a no-op.
    ///
    /// The `Stopped` event is posted once the output is complete: right away
    /// for screencasts, after the file is finalized for recordings.
    pub fn stop(&mut self) {
        if self.stopped {
            debug!("Session {} already stopped", self.id);
            return;
        }
        self.stopped = true;

        // Fence frame deliveries before leaving the capturer.
        match &self.sink.kind {
            SinkKind::Video(encoder) => {
                let _encoder = lock(encoder);
                self.sink.stopped.store(true, Ordering::Release);
            }
            SinkKind::Still { delivery, .. } => {
                let _delivery = lock(delivery);
                self.sink.stopped.store(true, Ordering::Release);
            }
        }

        if let Some(subscription) = self.subscription.take() {
            self.capturer.unsubscribe(subscription);
        }

        info!("Session {} stopping: {}", self.id, self.sink.health.summary());

        match &self.sink.kind {
            SinkKind::Video(encoder) => match lock(encoder).as_mut() {
                Some(encoder) => {
                    let events = self.sink.events.clone();
                    let id = self.id.clone();
                    encoder.finish(move |summary| {
                        info!(
                            "Session {}: {} written ({} packets, {:?})",
                            id,
                            summary.path.display(),
                            summary.frames_written,
                            summary.duration
                        );
                        if events
                            .send(SessionEvent::new(id, ScreencastEvent::Stopped))
                            .is_err()
                        {
                            debug!("Stopped event dropped, receiver is gone");
                        }
                    });
                }
                None => self.post_stopped(),
            },
            SinkKind::Still { .. } => self.post_stopped(),
        }
    }

    /// Acknowledge one delivered still frame.
    pub fn frame_ack(&self) -> Result<(), ScreencastError> {
        match &self.sink.kind {
            SinkKind::Still { in_flight, .. } => in_flight
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
                .map(|_| ())
                .map_err(|_| ScreencastError::NothingToAck(self.id.clone())),
            SinkKind::Video(_) => Err(ScreencastError::NothingToAck(self.id.clone())),
        }
    }

    /// Tear down a session whose start failed, deleting its output file.
    pub fn abandon(mut self) {
        self.stopped = true;
        self.sink.stopped.store(true, Ordering::Release);
        if let Some(subscription) = self.subscription.take() {
            self.capturer.unsubscribe(subscription);
        }
        if let SinkKind::Video(encoder) = &self.sink.kind {
            if let Some(encoder) = lock(encoder).take() {
                let path = encoder.path().to_path_buf();
                if let Err(e) = encoder.discard() {
                    error!("Failed to remove {}: {}", path.display(), e);
                }
            }
        }
    }

    fn post_stopped(&self) {
        if self
            .sink
            .events
            .send(SessionEvent::new(self.id.clone(), ScreencastEvent::Stopped))
            .is_err()
        {
            debug!("Stopped event dropped, receiver is gone");
        }
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            self.sink.stopped.store(true, Ordering::Release);
            self.capturer.unsubscribe(subscription);
        }
    }
}
