//! Video recording encoder
//!
//! Frames arrive on the capture thread. Each frame is held back until the
//! next one arrives so its on-screen duration is known, then handed to a
//! single encode thread that converts, compresses and muxes it. The codec
//! and muxer live on that thread from setup to finalization.

use log::{debug, error, info, warn};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::mpsc::{self, Receiver, SendError, Sender, SyncSender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use super::codec::CodecKind;
use super::ffmpeg::VpxCodec;
use super::{EncoderError, TimeBase};
use crate::capture::yuv_convert::{CropRegion, I420Image, convert_i420, rgba_to_i420};
use crate::capture::{CapturedFrame, Margin};
use crate::container::ContainerWriter;

/// Recording parameters.
#[derive(Debug, Clone)]
pub struct EncoderOptions {
    /// Nominal frame rate of the timebase.
    pub fps: u32,
    /// Sub-frame resolution; the timebase is `1 / (fps * time_scale)`.
    pub time_scale: u32,
    /// Long frames are re-emitted at this cadence.
    pub repeat_interval: Duration,
    pub codec: CodecKind,
    /// Upper bound of the recorded page area, applied after the margin.
    pub viewport: Option<(u32, u32)>,
}

impl Default for EncoderOptions {
    fn default() -> Self {
        Self {
            fps: 25,
            time_scale: 1000,
            repeat_interval: Duration::from_secs(1),
            codec: CodecKind::Vp8,
            viewport: None,
        }
    }
}

impl EncoderOptions {
    pub fn time_base(&self) -> TimeBase {
        TimeBase::new(1, self.fps.max(1) * self.time_scale.max(1))
    }
}

/// Encoder lifecycle; transitions only move forward.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncoderState {
    Idle = 0,
    Recording = 1,
    Finishing = 2,
    Closed = 3,
}

impl EncoderState {
    #[inline]
    fn from_u8(value: u8) -> Self {
        match value {
            0 => EncoderState::Idle,
            1 => EncoderState::Recording,
            2 => EncoderState::Finishing,
            _ => EncoderState::Closed,
        }
    }
}

/// Shared atomic cell holding an [`EncoderState`].
#[derive(Debug, Clone)]
struct StateCell(Arc<AtomicU8>);

impl StateCell {
    fn new() -> Self {
        Self(Arc::new(AtomicU8::new(EncoderState::Idle as u8)))
    }

    fn get(&self) -> EncoderState {
        EncoderState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Move to `target` unless the current state is already at or past it.
    fn advance(&self, target: EncoderState) {
        self.0.fetch_max(target as u8, Ordering::AcqRel);
    }
}

/// What the encode thread reports once the file is complete.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EncoderSummary {
    pub path: PathBuf,
    /// Packets written to the container, repeats included.
    pub frames_written: u64,
    /// Presentation timestamp following the last packet, in timebase units.
    pub end_pts: i64,
    pub duration: Duration,
    pub encode_failures: u64,
    pub skipped_frames: u64,
}

pub type FinishCallback = Box<dyn FnOnce(EncoderSummary) + Send>;

enum EncodeTask {
    Frame {
        frame: CapturedFrame,
        duration: Duration,
    },
    Finish(FinishCallback),
}

struct PendingFrame {
    frame: CapturedFrame,
}

/// Writes a stream of captured frames into a video file.
pub struct FrameEncoder {
    tx: Option<Sender<EncodeTask>>,
    worker: Option<JoinHandle<()>>,
    state: StateCell,
    summary: Arc<Mutex<Option<EncoderSummary>>>,
    path: PathBuf,
    pending: Option<PendingFrame>,
    last_frame_at: Option<Instant>,
}

impl FrameEncoder {
    /// Validate the geometry, open `path` and start the encode thread.
    ///
    /// Returns once the codec and the file header are set up. On error
    /// nothing is left behind: no thread and no file.
    pub fn create(
        path: impl AsRef<Path>,
        width: u32,
        height: u32,
        margin: Margin,
        options: EncoderOptions,
    ) -> Result<Self, EncoderError> {
        if width == 0 || height == 0 || width % 2 != 0 || height % 2 != 0 {
            return Err(EncoderError::InvalidDimensions { width, height });
        }

        let path = path.as_ref().to_path_buf();
        let file = File::create(&path).map_err(|source| EncoderError::Open {
            path: path.clone(),
            source,
        })?;

        let state = StateCell::new();
        let summary = Arc::new(Mutex::new(None));
        let (tx, rx) = mpsc::channel();
        let (ready_tx, ready_rx) = mpsc::sync_channel(1);

        let setup = WorkerSetup {
            file,
            width,
            height,
            margin,
            options: options.clone(),
            path: path.clone(),
            state: state.clone(),
            summary: summary.clone(),
        };
        let spawned = std::thread::Builder::new()
            .name("screencast-encoder".into())
            .spawn(move || EncodeWorker::start(setup, ready_tx, rx));
        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                remove_output(&path);
                return Err(e.into());
            }
        };

        let ready = ready_rx
            .recv()
            .unwrap_or_else(|_| Err(EncoderError::Codec("encode thread exited during setup".into())));
        if let Err(e) = ready {
            if handle.join().is_err() {
                warn!("Encode thread for {} panicked", path.display());
            }
            remove_output(&path);
            return Err(e);
        }

        info!(
            "Recording {}x{} {} to {}",
            width,
            height,
            options.codec.name(),
            path.display()
        );

        Ok(Self {
            tx: Some(tx),
            worker: Some(handle),
            state,
            summary,
            path,
            pending: None,
            last_frame_at: None,
        })
    }

    pub fn state(&self) -> EncoderState {
        self.state.get()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Queue a frame. Never blocks on encoding.
    pub fn encode_frame(&mut self, frame: &CapturedFrame) -> Result<(), EncoderError> {
        self.encode_frame_at(frame, Instant::now())
    }

    pub(crate) fn encode_frame_at(
        &mut self,
        frame: &CapturedFrame,
        now: Instant,
    ) -> Result<(), EncoderError> {
        match self.state() {
            EncoderState::Finishing | EncoderState::Closed => return Err(EncoderError::Closed),
            EncoderState::Idle => self.state.advance(EncoderState::Recording),
            EncoderState::Recording => {}
        }

        self.flush_pending(now);
        self.pending = Some(PendingFrame {
            frame: frame.clone(),
        });
        Ok(())
    }

    /// Flush the held frame, finalize the file and report through `callback`.
    ///
    /// The callback runs exactly once, on the encode thread, or right away
    /// when the encode thread is gone.
    pub fn finish<F>(&mut self, callback: F)
    where
        F: FnOnce(EncoderSummary) + Send + 'static,
    {
        self.finish_at(Box::new(callback), Instant::now());
    }

    pub(crate) fn finish_at(&mut self, callback: FinishCallback, now: Instant) {
        self.flush_pending(now);
        self.state.advance(EncoderState::Finishing);

        let Some(tx) = &self.tx else {
            callback(self.last_summary());
            return;
        };
        if let Err(SendError(task)) = tx.send(EncodeTask::Finish(callback)) {
            warn!("Encode thread for {} is gone", self.path.display());
            if let EncodeTask::Finish(callback) = task {
                callback(self.last_summary());
            }
        }
    }

    /// Hand the held frame to the encode thread with its measured duration.
    fn flush_pending(&mut self, now: Instant) {
        if let Some(last) = self.last_frame_at {
            // A frame that could not be queued keeps the old timestamp.
            let Some(pending) = self.pending.take() else {
                return;
            };
            let duration = now.saturating_duration_since(last);
            if let Some(tx) = &self.tx {
                if tx
                    .send(EncodeTask::Frame {
                        frame: pending.frame,
                        duration,
                    })
                    .is_err()
                {
                    debug!("Dropping frame, encode thread for {} is gone", self.path.display());
                }
            }
        }
        self.last_frame_at = Some(now);
    }

    /// Stop the encode thread, wait for it and delete the output file.
    ///
    /// Used when the recording never got going.
    pub fn discard(mut self) -> std::io::Result<()> {
        self.pending = None;
        self.tx = None;
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("Encode thread for {} panicked", self.path.display());
            }
        }
        std::fs::remove_file(&self.path)
    }

    fn last_summary(&self) -> EncoderSummary {
        self.summary
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .unwrap_or_else(|| EncoderSummary {
                path: self.path.clone(),
                ..Default::default()
            })
    }
}

impl Drop for FrameEncoder {
    fn drop(&mut self) {
        if self.state() != EncoderState::Finishing && self.state() != EncoderState::Closed {
            self.flush_pending(Instant::now());
        }
        // Closing the channel lets the encode thread finalize and exit.
        self.tx = None;
        self.worker.take();
    }
}

fn remove_output(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        warn!("Failed to remove {}: {}", path.display(), e);
    }
}

// ── Encode thread ───────────────────────────────────────────────

/// Everything the encode thread needs to open the codec and the container.
struct WorkerSetup {
    file: File,
    width: u32,
    height: u32,
    margin: Margin,
    options: EncoderOptions,
    path: PathBuf,
    state: StateCell,
    summary: Arc<Mutex<Option<EncoderSummary>>>,
}

struct EncodeWorker {
    codec: VpxCodec,
    image: I420Image,
    container: Option<ContainerWriter<File>>,
    margin: Margin,
    viewport: Option<(u32, u32)>,
    time_base: TimeBase,
    repeat_units: i64,
    pts: i64,
    frames_written: u64,
    encode_failures: u64,
    skipped_frames: u64,
    path: PathBuf,
    state: StateCell,
    summary: Arc<Mutex<Option<EncoderSummary>>>,
}

impl EncodeWorker {
    /// Open codec and container, report the outcome, then serve tasks.
    fn start(
        setup: WorkerSetup,
        ready: SyncSender<Result<(), EncoderError>>,
        rx: Receiver<EncodeTask>,
    ) {
        match Self::open(setup) {
            Ok(worker) => {
                let _ = ready.send(Ok(()));
                worker.run(rx);
            }
            Err(e) => {
                let _ = ready.send(Err(e));
            }
        }
    }

    fn open(setup: WorkerSetup) -> Result<Self, EncoderError> {
        let time_base = setup.options.time_base();
        let codec = VpxCodec::new(setup.options.codec, setup.width, setup.height, time_base)?;
        let container = ContainerWriter::new(setup.file, &codec.codec_parameters())?;

        Ok(Self {
            codec,
            image: I420Image::new(setup.width, setup.height),
            container: Some(container),
            margin: setup.margin,
            viewport: setup.options.viewport,
            time_base,
            repeat_units: time_base.units(setup.options.repeat_interval).max(1),
            pts: 0,
            frames_written: 0,
            encode_failures: 0,
            skipped_frames: 0,
            path: setup.path,
            state: setup.state,
            summary: setup.summary,
        })
    }

    fn run(mut self, rx: Receiver<EncodeTask>) {
        debug!("Encode thread for {} started", self.path.display());

        while let Ok(task) = rx.recv() {
            match task {
                EncodeTask::Frame { frame, duration } => self.encode_frame(&frame, duration),
                EncodeTask::Finish(callback) => {
                    let summary = self.finish();
                    callback(summary);
                }
            }
        }

        if self.container.is_some() {
            info!("Encoder for {} dropped without finish, finalizing", self.path.display());
            self.finish();
        }
        debug!("Encode thread for {} exited", self.path.display());
    }

    fn encode_frame(&mut self, frame: &CapturedFrame, duration: Duration) {
        if self.container.is_none() {
            return;
        }
        if !self.convert(frame) {
            self.skipped_frames += 1;
            return;
        }

        // Long frames are split into repeat-interval chunks followed by the
        // remainder, so players keep refreshing the picture.
        let mut remaining = self.time_base.units(duration);
        while 2 * remaining > 3 * self.repeat_units {
            self.encode(true, self.repeat_units);
            remaining -= self.repeat_units;
        }
        self.encode(true, remaining.max(1));
    }

    fn convert(&mut self, frame: &CapturedFrame) -> bool {
        let converted;
        let source = match frame {
            CapturedFrame::Yuv(buffer) => buffer.as_ref(),
            CapturedFrame::Raw(buffer) => {
                converted = rgba_to_i420(buffer);
                &converted
            }
        };

        let Some(region) =
            CropRegion::from_margin(source.width, source.height, self.margin, self.viewport, true)
        else {
            warn!(
                "Frame {}x{} is fully covered by the crop margin {:?}, skipping",
                source.width, source.height, self.margin
            );
            return false;
        };
        convert_i420(source.planes(), region, &mut self.image);
        true
    }

    /// Run the codec once and mux whatever it returns. Returns whether any
    /// packet came out.
    fn encode(&mut self, with_image: bool, duration: i64) -> bool {
        let image = with_image.then_some(&self.image);
        let packets = match self.codec.encode(image, self.pts, duration) {
            Ok(packets) => packets,
            Err(e) => {
                error!("Failed to encode frame: {}", e);
                self.encode_failures += 1;
                return false;
            }
        };

        let produced = !packets.is_empty();
        for packet in packets {
            let Some(container) = self.container.as_mut() else {
                break;
            };
            let end = packet.pts() + packet.duration;
            match container.write_frame(packet) {
                Ok(()) => {
                    self.frames_written += 1;
                    self.pts = end;
                }
                Err(e) => {
                    error!("Failed to write frame: {}", e);
                    self.encode_failures += 1;
                }
            }
        }
        produced
    }

    fn finish(&mut self) -> EncoderSummary {
        if self.container.is_some() {
            while self.encode(false, 1) {}

            if let Some(mut container) = self.container.take() {
                if let Err(e) = container.finish() {
                    error!("Failed to finalize {}: {}", self.path.display(), e);
                }
            }

            let summary = EncoderSummary {
                path: self.path.clone(),
                frames_written: self.frames_written,
                end_pts: self.pts,
                duration: Duration::from_nanos(self.time_base.to_nanos(self.pts).max(0) as u64),
                encode_failures: self.encode_failures,
                skipped_frames: self.skipped_frames,
            };
            info!(
                "Recording {} finished: {} packets, {:?}, {} failures",
                self.path.display(),
                summary.frames_written,
                summary.duration,
                summary.encode_failures
            );
            *self.summary.lock().unwrap_or_else(PoisonError::into_inner) = Some(summary);
            self.state.advance(EncoderState::Closed);
        }

        self.summary
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .unwrap_or_default()
    }
}
