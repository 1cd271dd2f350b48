//! Control loop: pipe requests in, responses and session events out

use log::{debug, info, warn};
use serde::Serialize;
use serde_json::{Value, json};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;

use super::pipe::{PipeEvent, PipeWriter};
use super::protocol::{self, Command, ProtocolError, Request, Response};
use crate::capture::{HostWindow, SyntheticWindow, WindowId};
use crate::error::ScreencastError;
use crate::pipeline::{SessionEvent, SessionId};
use crate::service::ScreencastService;

/// How long shutdown waits for recordings to finalize.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Resolves window ids from requests to host windows.
pub trait WindowProvider {
    fn window(&self, id: WindowId) -> Option<Arc<dyn HostWindow>>;
}

/// Fixed set of test-pattern windows with ids `1..=count`.
pub struct SyntheticWindows {
    windows: HashMap<WindowId, Arc<SyntheticWindow>>,
}

impl SyntheticWindows {
    pub fn new(count: u64, width: u32, height: u32, title_bar: u32) -> Self {
        let windows = (1..=count)
            .map(|id| {
                let window = SyntheticWindow::new(id, width, height).with_title_bar(title_bar);
                (id, Arc::new(window))
            })
            .collect();
        Self { windows }
    }
}

impl WindowProvider for SyntheticWindows {
    fn window(&self, id: WindowId) -> Option<Arc<dyn HostWindow>> {
        self.windows
            .get(&id)
            .map(|w| Arc::clone(w) as Arc<dyn HostWindow>)
    }
}

/// Why [`ControlServer::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerExit {
    Disconnected,
    Shutdown,
}

pub struct ControlServer<P> {
    service: ScreencastService,
    provider: P,
}

impl<P: WindowProvider> ControlServer<P> {
    pub fn new(service: ScreencastService, provider: P) -> Self {
        Self { service, provider }
    }

    pub fn service(&self) -> &ScreencastService {
        &self.service
    }

    /// Handle one raw request and build its response.
    pub fn handle_message(&mut self, message: &[u8]) -> Response {
        let request: Request = match serde_json::from_slice(message) {
            Ok(request) => request,
            Err(e) => {
                let id = serde_json::from_slice::<Value>(message)
                    .ok()
                    .and_then(|v| v.get("id")?.as_u64());
                let err = ProtocolError::from(e);
                return Response::error(id, err.code(), err.to_string());
            }
        };

        let command = match Command::parse(&request) {
            Ok(command) => command,
            Err(e) => return Response::error(Some(request.id), e.code(), e.to_string()),
        };

        match self.execute(command) {
            Ok(result) => Response::ok(request.id, result),
            Err(e) => {
                debug!("{} failed: {}", request.method, e);
                let code = if e.is_invalid_argument() {
                    protocol::INVALID_PARAMS
                } else {
                    protocol::SERVER_ERROR
                };
                Response::error(Some(request.id), code, e.to_string())
            }
        }
    }

    fn execute(&mut self, command: Command) -> Result<Value, ScreencastError> {
        match command {
            Command::Start { window_id, request } => {
                let window = self
                    .provider
                    .window(window_id)
                    .ok_or(ScreencastError::UnknownWindow(window_id))?;
                let id = self.service.start_video_recording(window.as_ref(), request)?;
                Ok(json!({ "sessionId": id }))
            }
            Command::Stop(id) => {
                self.service.stop_video_recording(&id)?;
                Ok(json!({}))
            }
            Command::FrameAck(id) => {
                self.service.screencast_frame_ack(&id)?;
                Ok(json!({}))
            }
        }
    }

    /// Serve until the peer disconnects or `shutdown` fires, then stop every
    /// session and wait (bounded) for their `Stopped` events.
    pub async fn run(
        mut self,
        mut incoming: UnboundedReceiver<PipeEvent>,
        mut events: UnboundedReceiver<SessionEvent>,
        writer: PipeWriter,
        shutdown: CancellationToken,
    ) -> ServerExit {
        let exit = loop {
            tokio::select! {
                _ = shutdown.cancelled() => break ServerExit::Shutdown,
                message = incoming.recv() => match message {
                    Some(PipeEvent::Message(bytes)) => {
                        let response = self.handle_message(&bytes);
                        send_json(&writer, &response);
                    }
                    Some(PipeEvent::Disconnected) | None => break ServerExit::Disconnected,
                },
                Some(event) = events.recv() => forward_event(&writer, &event),
            }
        };

        info!("Control loop exiting ({:?})", exit);
        let mut pending: HashSet<SessionId> = self.service.session_ids().into_iter().collect();
        self.service.stop_all();

        let deadline = tokio::time::sleep(SHUTDOWN_GRACE);
        tokio::pin!(deadline);
        while !pending.is_empty() {
            tokio::select! {
                Some(event) = events.recv() => {
                    if event.is_stopped() {
                        pending.remove(&event.session_id);
                    }
                    forward_event(&writer, &event);
                }
                _ = &mut deadline => {
                    warn!("{} session(s) did not finish in time", pending.len());
                    break;
                }
            }
        }
        exit
    }
}

fn forward_event(writer: &PipeWriter, event: &SessionEvent) {
    match protocol::encode_event(event) {
        Ok(event) => send_json(writer, &event),
        Err(e) => warn!("Failed to encode event for session {}: {}", event.session_id, e),
    }
}

fn send_json<T: Serialize>(writer: &PipeWriter, value: &T) {
    match serde_json::to_vec(value) {
        Ok(bytes) => {
            if !writer.send(bytes) {
                debug!("Pipe writer is gone, message dropped");
            }
        }
        Err(e) => warn!("Failed to serialize message: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScreencastConfig;
    use std::io::Write;
    use std::sync::Mutex;
    use tokio::sync::mpsc::unbounded_channel;

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl SharedBuf {
        fn messages(&self) -> Vec<Value> {
            self.0
                .lock()
                .unwrap()
                .split(|&b| b == 0)
                .filter(|m| !m.is_empty())
                .map(|m| serde_json::from_slice(m).unwrap())
                .collect()
        }

        fn contains(&self, needle: &str) -> bool {
            String::from_utf8_lossy(&self.0.lock().unwrap()).contains(needle)
        }
    }

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn server() -> (ControlServer<SyntheticWindows>, UnboundedReceiver<SessionEvent>) {
        let (service, events) = ScreencastService::new(ScreencastConfig::default());
        (ControlServer::new(service, SyntheticWindows::new(2, 160, 120, 0)), events)
    }

    fn call(server: &mut ControlServer<SyntheticWindows>, request: Value) -> Response {
        server.handle_message(&serde_json::to_vec(&request).unwrap())
    }

    #[test]
    fn test_request_errors() {
        let (mut server, _events) = server();

        let r = server.handle_message(b"{ not json");
        assert_eq!(r.id, None);
        assert_eq!(r.error.unwrap().code, protocol::PARSE_ERROR);

        let r = call(&mut server, json!({ "id": 2, "method": "Nope.nope" }));
        assert_eq!(r.id, Some(2));
        assert_eq!(r.error.unwrap().code, protocol::METHOD_NOT_FOUND);

        let r = call(
            &mut server,
            json!({ "id": 3, "method": protocol::START_SCREENCAST,
                    "params": { "windowId": 9, "width": 100, "height": 100 } }),
        );
        assert_eq!(r.error.unwrap().message, "Unknown window 9");

        let r = call(
            &mut server,
            json!({ "id": 4, "method": protocol::START_SCREENCAST,
                    "params": { "windowId": 1, "width": 5, "height": 100 } }),
        );
        assert_eq!(r.error.unwrap().code, protocol::INVALID_PARAMS);

        let r = call(
            &mut server,
            json!({ "id": 5, "method": protocol::STOP_VIDEO_RECORDING,
                    "params": { "sessionId": "missing" } }),
        );
        assert_eq!(r.error.unwrap().message, "Invalid session id 'missing'");
        assert!(server.service().is_empty());
    }

    #[test]
    fn test_start_ack_stop() {
        let (mut server, mut events) = server();
        let r = call(
            &mut server,
            json!({ "id": 1, "method": protocol::START_SCREENCAST,
                    "params": { "windowId": 1, "width": 80, "height": 60 } }),
        );
        let session_id = r.result.unwrap()["sessionId"].as_str().unwrap().to_string();
        assert_eq!(server.service().session_ids(), vec![session_id.clone()]);

        let r = call(
            &mut server,
            json!({ "id": 2, "method": protocol::STOP_VIDEO_RECORDING,
                    "params": { "sessionId": session_id } }),
        );
        assert_eq!(r.result, Some(json!({})));

        let mut stopped = false;
        while let Ok(event) = events.try_recv() {
            stopped |= event.is_stopped();
        }
        assert!(stopped);

        let r = call(
            &mut server,
            json!({ "id": 3, "method": protocol::SCREENCAST_FRAME_ACK,
                    "params": { "sessionId": session_id } }),
        );
        assert_eq!(r.error.unwrap().code, protocol::INVALID_PARAMS);
    }

    #[tokio::test]
    async fn test_run_forwards_frames_and_stops_on_disconnect() {
        let (server, events) = server();
        let out = SharedBuf::default();
        let writer = PipeWriter::spawn(out.clone()).unwrap();
        let (tx, incoming) = unbounded_channel();

        let driver = async {
            let start = json!({ "id": 1, "method": protocol::START_SCREENCAST,
                                "params": { "windowId": 2, "width": 80, "height": 60 } });
            tx.send(PipeEvent::Message(serde_json::to_vec(&start).unwrap())).unwrap();
            for _ in 0..200 {
                if out.contains(protocol::SCREENCAST_FRAME) {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(25)).await;
            }
            tx.send(PipeEvent::Disconnected).unwrap();
        };

        let (exit, ()) = tokio::join!(
            server.run(incoming, events, writer, CancellationToken::new()),
            driver
        );
        assert_eq!(exit, ServerExit::Disconnected);

        let messages = out.messages();
        let session_id = messages[0]["result"]["sessionId"].as_str().unwrap();
        let methods: Vec<&str> = messages[1..]
            .iter()
            .filter_map(|m| m["method"].as_str())
            .collect();
        assert_eq!(methods.first(), Some(&protocol::SCREENCAST_FRAME));
        assert_eq!(methods.last(), Some(&protocol::SCREENCAST_STOPPED));
        assert_eq!(messages[1]["params"]["sessionId"], session_id);
        assert_eq!(messages[1]["params"]["deviceWidth"], 160);
    }

    #[tokio::test]
    async fn test_video_start_reports_resolved_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = ScreencastConfig {
            output_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        let (service, events) = ScreencastService::new(config);
        let server = ControlServer::new(service, SyntheticWindows::new(1, 160, 120, 0));
        let out = SharedBuf::default();
        let writer = PipeWriter::spawn(out.clone()).unwrap();
        let (tx, incoming) = unbounded_channel();

        let driver = async {
            let start = json!({ "id": 1, "method": protocol::START_VIDEO_RECORDING,
                                "params": { "windowId": 1, "file": "clip.webm",
                                            "width": 80, "height": 60 } });
            tx.send(PipeEvent::Message(serde_json::to_vec(&start).unwrap())).unwrap();
            for _ in 0..200 {
                if out.contains(protocol::VIDEO_RECORDING_STARTED) {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(25)).await;
            }
            tx.send(PipeEvent::Disconnected).unwrap();
        };

        let (exit, ()) = tokio::join!(
            server.run(incoming, events, writer, CancellationToken::new()),
            driver
        );
        assert_eq!(exit, ServerExit::Disconnected);

        let messages = out.messages();
        let session_id = messages[0]["result"]["sessionId"].as_str().unwrap();
        assert_eq!(messages[1]["method"], protocol::VIDEO_RECORDING_STARTED);
        assert_eq!(messages[1]["params"]["sessionId"], session_id);
        let file = dir.path().join("clip.webm");
        assert_eq!(messages[1]["params"]["file"], &*file.to_string_lossy());
        assert_eq!(messages.last().unwrap()["method"], protocol::SCREENCAST_STOPPED);
        assert!(file.exists());
    }

    #[tokio::test]
    async fn test_run_honours_shutdown() {
        let (server, events) = server();
        let writer = PipeWriter::spawn(SharedBuf::default()).unwrap();
        let (_tx, incoming) = unbounded_channel::<PipeEvent>();
        let shutdown = CancellationToken::new();
        shutdown.cancel();
        let exit = server.run(incoming, events, writer, shutdown).await;
        assert_eq!(exit, ServerExit::Shutdown);
    }
}
