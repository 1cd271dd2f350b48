//! Synthetic capture backend.
//!
//! Produces a moving test pattern at a fixed rate on its own capture thread.
//! Used by the command-line recorder and by the pipe server when the host
//! does not provide a compositor-backed source.

use anyhow::anyhow;
use log::{debug, warn};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::capture::{
    CaptureCapability, CapturedFrame, FrameSink, FrameSource, HostWindow, I420Buffer, Margin,
    PixelFormat, RgbaBuffer, WindowId,
};
use crate::utils::sos::SignalOfStop;

/// Which buffer shape the synthetic source delivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyntheticKind {
    Yuv,
    Bgra,
}

/// A fake window of fixed size with an optional title bar.
#[derive(Debug, Clone)]
pub struct SyntheticWindow {
    pub id: WindowId,
    pub width: u32,
    pub height: u32,
    pub title_bar: u32,
    pub fps: u32,
    pub kind: SyntheticKind,
}

impl SyntheticWindow {
    pub fn new(id: WindowId, width: u32, height: u32) -> Self {
        Self {
            id,
            width,
            height,
            title_bar: 0,
            fps: 30,
            kind: SyntheticKind::Yuv,
        }
    }

    pub fn with_title_bar(mut self, rows: u32) -> Self {
        self.title_bar = rows;
        self
    }

    pub fn with_fps(mut self, fps: u32) -> Self {
        self.fps = fps.max(1);
        self
    }

    pub fn with_kind(mut self, kind: SyntheticKind) -> Self {
        self.kind = kind;
        self
    }
}

impl HostWindow for SyntheticWindow {
    fn window_id(&self) -> WindowId {
        self.id
    }

    fn frame_margin(&self) -> Margin {
        Margin::new(self.title_bar, 0, 0, 0)
    }

    fn create_source(&self) -> Result<Box<dyn FrameSource>, anyhow::Error> {
        if self.width == 0 || self.height == 0 {
            return Err(anyhow!(
                "window {} has an empty surface ({}x{})",
                self.id,
                self.width,
                self.height
            ));
        }
        Ok(Box::new(SyntheticSource::new(self.clone())))
    }
}

/// Frame source painting a test pattern on a dedicated thread.
pub struct SyntheticSource {
    window: SyntheticWindow,
    sos: Option<SignalOfStop>,
    worker: Option<JoinHandle<()>>,
}

impl SyntheticSource {
    pub fn new(window: SyntheticWindow) -> Self {
        Self {
            window,
            sos: None,
            worker: None,
        }
    }

    /// Paint frame number `index`: a vertical bar sweeping across a gradient.
    pub fn paint(window: &SyntheticWindow, index: u64) -> CapturedFrame {
        let (w, h) = (window.width as usize, window.height as usize);
        let bar_x = (index as usize * 8) % w.max(1);
        let bar_w = (w / 16).max(2);
        let in_bar = |x: usize| x >= bar_x && x < bar_x + bar_w;

        match window.kind {
            SyntheticKind::Yuv => {
                let mut frame = I420Buffer::filled(window.width, window.height, 16);
                for row in 0..h {
                    let line = &mut frame.y[row * frame.stride_y..row * frame.stride_y + w];
                    for (x, px) in line.iter_mut().enumerate() {
                        *px = if row < window.title_bar as usize {
                            40
                        } else if in_bar(x) {
                            235
                        } else {
                            (16 + (x * 200) / w.max(1)) as u8
                        };
                    }
                }
                CapturedFrame::Yuv(Arc::new(frame))
            }
            SyntheticKind::Bgra => {
                let mut data = vec![255u8; w * h * 4];
                for row in 0..h {
                    for x in 0..w {
                        let px = &mut data[(row * w + x) * 4..(row * w + x) * 4 + 4];
                        let value = if row < window.title_bar as usize {
                            40
                        } else if in_bar(x) {
                            250
                        } else {
                            ((x * 255) / w.max(1)) as u8
                        };
                        px[0] = value;
                        px[1] = value;
                        px[2] = 255 - value;
                    }
                }
                CapturedFrame::Raw(Arc::new(RgbaBuffer::new(
                    window.width,
                    window.height,
                    PixelFormat::Bgra,
                    data,
                )))
            }
        }
    }
}

impl FrameSource for SyntheticSource {
    fn start(
        &mut self,
        capability: CaptureCapability,
        sink: Arc<dyn FrameSink>,
    ) -> Result<(), anyhow::Error> {
        if self.sos.is_some() {
            return Err(anyhow!("Capture already running"));
        }

        let sos = SignalOfStop::new();
        let worker_sos = sos.clone();
        let window = self.window.clone();
        let fps = window.fps.min(capability.max_fps.max(1));
        let period = Duration::from_secs_f64(1.0 / fps as f64);

        let worker = std::thread::Builder::new()
            .name(format!("capture-{}", window.id))
            .spawn(move || {
                debug!("Synthetic capture of window {} running at {}fps", window.id, fps);
                let mut index = 0u64;
                loop {
                    let frame_start = Instant::now();
                    sink.on_frame(&SyntheticSource::paint(&window, index));
                    index += 1;

                    let remaining = period.saturating_sub(frame_start.elapsed());
                    if worker_sos.wait_timeout(remaining) {
                        break;
                    }
                }
                debug!("Synthetic capture of window {} delivered {} frames", window.id, index);
            })?;

        self.sos = Some(sos);
        self.worker = Some(worker);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), anyhow::Error> {
        if let Some(sos) = self.sos.take() {
            sos.cancel();
        }
        if let Some(worker) = self.worker.take() {
            if worker.thread().id() == std::thread::current().id() {
                warn!("Synthetic capture stopped from its own thread, not joining");
                return Ok(());
            }
            worker
                .join()
                .map_err(|_| anyhow!("capture thread of window {} panicked", self.window.id))?;
        }
        Ok(())
    }
}

impl Drop for SyntheticSource {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!("{:#}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counter(AtomicUsize);

    impl FrameSink for Counter {
        fn on_frame(&self, frame: &CapturedFrame) {
            assert_eq!(frame.width(), 64);
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_synthetic_source_delivers_until_stopped() {
        let window = SyntheticWindow::new(3, 64, 48).with_fps(100);
        let mut source = window.create_source().unwrap();
        let counter = Arc::new(Counter::default());
        let caps = CaptureCapability {
            width: 64,
            height: 48,
            max_fps: 100,
        };

        source.start(caps, counter.clone()).unwrap();
        assert!(source.start(caps, counter.clone()).is_err());
        std::thread::sleep(Duration::from_millis(60));
        source.stop().unwrap();

        let delivered = counter.0.load(Ordering::SeqCst);
        assert!(delivered >= 1);
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(counter.0.load(Ordering::SeqCst), delivered);
    }

    #[test]
    fn test_paint_respects_title_bar() {
        let window = SyntheticWindow::new(1, 32, 8).with_title_bar(2);
        let CapturedFrame::Yuv(frame) = SyntheticSource::paint(&window, 0) else {
            panic!("expected an I420 frame");
        };
        assert!(frame.y[..32 * 2].iter().all(|&p| p == 40));
        assert_eq!(window.frame_margin().top, 2);
    }

    #[test]
    fn test_empty_window_has_no_source() {
        assert!(SyntheticWindow::new(9, 0, 10).create_source().is_err());
    }
}
