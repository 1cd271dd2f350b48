use log::{debug, error, info};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};

use crate::capture::{CaptureCapability, CapturedFrame, FrameSink, FrameSource, HostWindow, WindowId};

// ── Internal state ──────────────────────────────────────────────

/// Capture state values for atomic access.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CaptureState {
    Running = 0,
    Stopped = 1,
}

impl CaptureState {
    /// Convert from u8 value. Returns Stopped for invalid values.
    #[inline]
    fn from_u8(value: u8) -> Self {
        match value {
            0 => CaptureState::Running,
            _ => CaptureState::Stopped,
        }
    }
}

/// Identifies one subscriber of a [`SharedCapturer`].
pub type SubscriptionId = u64;

/// Forwards every frame of the OS source to the current subscribers.
#[derive(Default)]
struct Fanout {
    sinks: RwLock<Vec<(SubscriptionId, Arc<dyn FrameSink>)>>,
}

impl FrameSink for Fanout {
    fn on_frame(&self, frame: &CapturedFrame) {
        // Snapshot the list so unsubscribing never waits on a slow sink.
        let sinks: Vec<Arc<dyn FrameSink>> = self
            .sinks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, sink)| Arc::clone(sink))
            .collect();
        for sink in sinks {
            sink.on_frame(frame);
        }
    }
}

// ── Shared capturer ─────────────────────────────────────────────

/// One OS capture subscription shared by every session recording the same window.
///
/// The underlying source is started by the first subscriber and stopped when
/// the last one leaves.
pub struct SharedCapturer {
    window_id: WindowId,
    source: Mutex<Box<dyn FrameSource>>,
    fanout: Arc<Fanout>,
    /// Uses atomic u8 for lock-free state access across threads.
    state: AtomicU8,
    next_subscription: AtomicU64,
}

impl SharedCapturer {
    pub fn new(window_id: WindowId, source: Box<dyn FrameSource>) -> Self {
        Self {
            window_id,
            source: Mutex::new(source),
            fanout: Arc::new(Fanout::default()),
            state: AtomicU8::new(CaptureState::Stopped as u8),
            next_subscription: AtomicU64::new(1),
        }
    }

    pub fn window_id(&self) -> WindowId {
        self.window_id
    }

    pub fn is_running(&self) -> bool {
        CaptureState::from_u8(self.state.load(Ordering::Acquire)) == CaptureState::Running
    }

    pub fn subscriber_count(&self) -> usize {
        self.fanout
            .sinks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Register a sink; starts the OS source if this is the first subscriber.
    pub fn subscribe(
        &self,
        capability: CaptureCapability,
        sink: Arc<dyn FrameSink>,
    ) -> Result<SubscriptionId, anyhow::Error> {
        let mut source = self.lock_source();
        let id = self.next_subscription.fetch_add(1, Ordering::Relaxed);

        let first = {
            let mut sinks = self.fanout.sinks.write().unwrap_or_else(PoisonError::into_inner);
            sinks.push((id, sink));
            sinks.len() == 1
        };

        if first && !self.is_running() {
            let fanout: Arc<dyn FrameSink> = self.fanout.clone();
            if let Err(e) = source.start(capability, fanout) {
                self.remove_sink(id);
                return Err(e.context(format!("failed to start capture of window {}", self.window_id)));
            }
            self.state
                .store(CaptureState::Running as u8, Ordering::Release);
            info!(
                "Capture of window {} started ({}x{} @ {}fps requested)",
                self.window_id, capability.width, capability.height, capability.max_fps
            );
        } else {
            debug!("Reusing capture of window {} (subscription {})", self.window_id, id);
        }

        Ok(id)
    }

    /// Remove a sink; stops the OS source once nobody is subscribed.
    ///
    /// Stop failures are logged and never prevent teardown.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        let mut source = self.lock_source();
        let remaining = self.remove_sink(id);

        if remaining == 0 && self.is_running() {
            self.state
                .store(CaptureState::Stopped as u8, Ordering::Release);
            match source.stop() {
                Ok(()) => info!("Capture of window {} stopped", self.window_id),
                Err(e) => error!("Failed to stop capture of window {}: {:#}", self.window_id, e),
            }
        }
    }

    fn remove_sink(&self, id: SubscriptionId) -> usize {
        let mut sinks = self.fanout.sinks.write().unwrap_or_else(PoisonError::into_inner);
        sinks.retain(|(sid, _)| *sid != id);
        sinks.len()
    }

    fn lock_source(&self) -> MutexGuard<'_, Box<dyn FrameSource>> {
        self.source.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for SharedCapturer {
    fn drop(&mut self) {
        if self.is_running() {
            let source = self.source.get_mut().unwrap_or_else(PoisonError::into_inner);
            if let Err(e) = source.stop() {
                error!("Failed to stop capture of window {}: {:#}", self.window_id, e);
            }
        }
    }
}

// ── Pool ────────────────────────────────────────────────────────

/// Hands out one [`SharedCapturer`] per window.
///
/// The pool only keeps weak handles: a capturer lives as long as a session
/// holds it.
#[derive(Default)]
pub struct CapturerPool {
    capturers: HashMap<WindowId, Weak<SharedCapturer>>,
}

impl CapturerPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the live capturer for `window`, creating one if none exists.
    pub fn acquire(&mut self, window: &dyn HostWindow) -> Result<Arc<SharedCapturer>, anyhow::Error> {
        self.capturers.retain(|_, weak| weak.strong_count() > 0);

        let window_id = window.window_id();
        if let Some(capturer) = self.capturers.get(&window_id).and_then(Weak::upgrade) {
            return Ok(capturer);
        }

        let source = window.create_source()?;
        let capturer = Arc::new(SharedCapturer::new(window_id, source));
        self.capturers.insert(window_id, Arc::downgrade(&capturer));
        Ok(capturer)
    }

    /// Number of windows with a live capturer.
    pub fn live(&self) -> usize {
        self.capturers
            .values()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{I420Buffer, Margin};
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct Counters {
        starts: AtomicUsize,
        stops: AtomicUsize,
        sink: Mutex<Option<Arc<dyn FrameSink>>>,
    }

    struct CountingSource(Arc<Counters>);

    impl FrameSource for CountingSource {
        fn start(&mut self, _: CaptureCapability, sink: Arc<dyn FrameSink>) -> Result<(), anyhow::Error> {
            self.0.starts.fetch_add(1, Ordering::SeqCst);
            *self.0.sink.lock().unwrap() = Some(sink);
            Ok(())
        }

        fn stop(&mut self) -> Result<(), anyhow::Error> {
            self.0.stops.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Window(Arc<Counters>);

    impl HostWindow for Window {
        fn window_id(&self) -> WindowId {
            7
        }

        fn frame_margin(&self) -> Margin {
            Margin::default()
        }

        fn create_source(&self) -> Result<Box<dyn FrameSource>, anyhow::Error> {
            Ok(Box::new(CountingSource(self.0.clone())))
        }
    }

    #[derive(Default)]
    struct Recorder(AtomicUsize);

    impl FrameSink for Recorder {
        fn on_frame(&self, _: &CapturedFrame) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    const CAPS: CaptureCapability = CaptureCapability {
        width: 640,
        height: 480,
        max_fps: 30,
    };

    #[test]
    fn test_shared_source_started_once() {
        let counters = Arc::new(Counters::default());
        let window = Window(counters.clone());
        let mut pool = CapturerPool::new();

        let a = pool.acquire(&window).unwrap();
        let b = pool.acquire(&window).unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        let ra = Arc::new(Recorder::default());
        let rb = Arc::new(Recorder::default());
        let sa = a.subscribe(CAPS, ra.clone()).unwrap();
        let sb = b.subscribe(CAPS, rb.clone()).unwrap();
        assert_eq!(counters.starts.load(Ordering::SeqCst), 1);

        let sink = counters.sink.lock().unwrap().clone().unwrap();
        sink.on_frame(&CapturedFrame::Yuv(Arc::new(I420Buffer::filled(4, 4, 0))));
        assert_eq!(ra.0.load(Ordering::SeqCst), 1);
        assert_eq!(rb.0.load(Ordering::SeqCst), 1);

        a.unsubscribe(sa);
        assert_eq!(counters.stops.load(Ordering::SeqCst), 0);
        assert!(a.is_running());
        b.unsubscribe(sb);
        assert_eq!(counters.stops.load(Ordering::SeqCst), 1);
        assert!(!a.is_running());
    }

    #[test]
    fn test_pool_releases_dropped_capturers() {
        let counters = Arc::new(Counters::default());
        let window = Window(counters.clone());
        let mut pool = CapturerPool::new();

        let first = pool.acquire(&window).unwrap();
        assert_eq!(pool.live(), 1);
        drop(first);
        assert_eq!(pool.live(), 0);

        let second = pool.acquire(&window).unwrap();
        assert_eq!(second.subscriber_count(), 0);
    }

    #[test]
    fn test_failed_start_leaves_no_subscriber() {
        struct Failing;
        impl FrameSource for Failing {
            fn start(&mut self, _: CaptureCapability, _: Arc<dyn FrameSink>) -> Result<(), anyhow::Error> {
                Err(anyhow::anyhow!("device busy"))
            }
            fn stop(&mut self) -> Result<(), anyhow::Error> {
                Ok(())
            }
        }

        let capturer = SharedCapturer::new(1, Box::new(Failing));
        let err = capturer
            .subscribe(CAPS, Arc::new(Recorder::default()))
            .unwrap_err();
        assert!(format!("{:#}", err).contains("device busy"));
        assert_eq!(capturer.subscriber_count(), 0);
        assert!(!capturer.is_running());
    }
}
