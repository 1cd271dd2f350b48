//! NUL-delimited message pipe
//!
//! Messages are arbitrary byte strings terminated by a single `\0`. The
//! reader thread posts complete messages to the control queue; the writer
//! thread serializes outgoing messages so the control thread never blocks
//! on the peer.

use log::{debug, error, warn};
use std::io::{ErrorKind, Read, Write};
use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use tokio::sync::mpsc::UnboundedSender;

const READ_BUFFER_SIZE: usize = 8 * 1024;
const WRITE_CHUNK_SIZE: usize = 64 * 1024;
const DELIMITER: u8 = 0;

/// What the reader thread posts to the control queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipeEvent {
    Message(Vec<u8>),
    /// The peer closed the pipe or a read failed. Posted once, last.
    Disconnected,
}

/// Spawn the reader thread. It exits after posting [`PipeEvent::Disconnected`]
/// or when the control queue is gone.
pub fn spawn_reader<R>(mut reader: R, events: UnboundedSender<PipeEvent>) -> std::io::Result<JoinHandle<()>>
where
    R: Read + Send + 'static,
{
    thread::Builder::new()
        .name("pipe-reader".into())
        .spawn(move || {
            let mut chunk = [0u8; READ_BUFFER_SIZE];
            let mut pending: Vec<u8> = Vec::new();
            loop {
                let n = match reader.read(&mut chunk) {
                    Ok(0) => {
                        debug!("Pipe closed by peer");
                        break;
                    }
                    Ok(n) => n,
                    Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                    Err(e) => {
                        warn!("Pipe read failed: {}", e);
                        break;
                    }
                };

                let mut rest = &chunk[..n];
                while let Some(end) = rest.iter().position(|&b| b == DELIMITER) {
                    pending.extend_from_slice(&rest[..end]);
                    let message = std::mem::take(&mut pending);
                    if events.send(PipeEvent::Message(message)).is_err() {
                        return;
                    }
                    rest = &rest[end + 1..];
                }
                pending.extend_from_slice(rest);
            }

            if !pending.is_empty() {
                debug!("Discarding {} bytes of an unterminated message", pending.len());
            }
            let _ = events.send(PipeEvent::Disconnected);
        })
}

/// Handle to the writer thread.
///
/// Dropping it flushes queued messages and joins the thread.
pub struct PipeWriter {
    tx: Option<mpsc::Sender<Vec<u8>>>,
    worker: Option<JoinHandle<()>>,
}

impl PipeWriter {
    pub fn spawn<W>(mut writer: W) -> std::io::Result<Self>
    where
        W: Write + Send + 'static,
    {
        let (tx, rx) = mpsc::channel::<Vec<u8>>();
        let worker = thread::Builder::new()
            .name("pipe-writer".into())
            .spawn(move || {
                for message in rx {
                    if let Err(e) = write_message(&mut writer, &message) {
                        error!("Pipe write failed, dropping further output: {}", e);
                        break;
                    }
                }
            })?;
        Ok(Self {
            tx: Some(tx),
            worker: Some(worker),
        })
    }

    /// Queue one message. Returns `false` once the writer thread has stopped.
    pub fn send(&self, message: Vec<u8>) -> bool {
        match &self.tx {
            Some(tx) => tx.send(message).is_ok(),
            None => false,
        }
    }
}

impl Drop for PipeWriter {
    fn drop(&mut self) {
        self.tx.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("Pipe writer thread panicked");
            }
        }
    }
}

fn write_message<W: Write>(writer: &mut W, message: &[u8]) -> std::io::Result<()> {
    for chunk in message.chunks(WRITE_CHUNK_SIZE) {
        writer.write_all(chunk)?;
    }
    writer.write_all(&[DELIMITER])?;
    writer.flush()
}
