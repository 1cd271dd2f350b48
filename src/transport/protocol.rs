//! JSON messages exchanged over the pipe

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use thiserror::Error;

use crate::capture::WindowId;
use crate::encoder::SnapshotFrame;
use crate::pipeline::{ScreencastEvent, SessionEvent, SessionId};
use crate::service::{RecordingMode, StartRecording, Viewport};

pub const START_VIDEO_RECORDING: &str = "Screencast.startVideoRecording";
pub const START_SCREENCAST: &str = "Screencast.startScreencast";
pub const STOP_VIDEO_RECORDING: &str = "Screencast.stopVideoRecording";
pub const SCREENCAST_FRAME_ACK: &str = "Screencast.screencastFrameAck";

pub const SCREENCAST_FRAME: &str = "Screencast.screencastFrame";
pub const SCREENCAST_STOPPED: &str = "Screencast.screencastStopped";
pub const VIDEO_RECORDING_STARTED: &str = "Screencast.videoRecordingStarted";

/// Error codes carried in [`ErrorBody::code`].
pub const PARSE_ERROR: i32 = -32700;
pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INVALID_PARAMS: i32 = -32602;
pub const SERVER_ERROR: i32 = -32000;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Unknown method '{0}'")]
    UnknownMethod(String),

    #[error("Invalid params for {method}: {source}")]
    InvalidParams {
        method: String,
        source: serde_json::Error,
    },
}

impl ProtocolError {
    pub fn code(&self) -> i32 {
        match self {
            ProtocolError::Malformed(_) => PARSE_ERROR,
            ProtocolError::UnknownMethod(_) => METHOD_NOT_FOUND,
            ProtocolError::InvalidParams { .. } => INVALID_PARAMS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Request {
    pub id: u64,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: i32,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// `None` when the request could not be parsed far enough to read its id.
    pub id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl Response {
    pub fn ok(id: u64, result: Value) -> Self {
        Self {
            id: Some(id),
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Option<u64>, code: i32, message: impl Into<String>) -> Self {
        Self {
            id,
            result: None,
            error: Some(ErrorBody {
                code,
                message: message.into(),
            }),
        }
    }
}

/// Notification sent without a request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    pub method: &'static str,
    pub params: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartVideoRecordingParams {
    window_id: WindowId,
    file: PathBuf,
    width: u32,
    height: u32,
    #[serde(default)]
    viewport: Option<Viewport>,
    #[serde(default)]
    top_offset: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartScreencastParams {
    window_id: WindowId,
    width: u32,
    height: u32,
    #[serde(default)]
    quality: u8,
    #[serde(default)]
    viewport: Option<Viewport>,
    #[serde(default)]
    top_offset: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionParams {
    session_id: SessionId,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FrameParams<'a> {
    session_id: &'a str,
    #[serde(flatten)]
    frame: &'a SnapshotFrame,
}

/// A decoded request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start {
        window_id: WindowId,
        request: StartRecording,
    },
    Stop(SessionId),
    FrameAck(SessionId),
}

impl Command {
    pub fn parse(request: &Request) -> Result<Self, ProtocolError> {
        let method = request.method.as_str();
        let invalid = |source| ProtocolError::InvalidParams {
            method: method.to_string(),
            source,
        };
        let params = request.params.clone();

        match method {
            START_VIDEO_RECORDING => {
                let p: StartVideoRecordingParams = serde_json::from_value(params).map_err(invalid)?;
                Ok(Command::Start {
                    window_id: p.window_id,
                    request: StartRecording {
                        mode: RecordingMode::Video { path: p.file },
                        width: p.width,
                        height: p.height,
                        viewport: p.viewport,
                        top_offset: p.top_offset,
                    },
                })
            }
            START_SCREENCAST => {
                let p: StartScreencastParams = serde_json::from_value(params).map_err(invalid)?;
                Ok(Command::Start {
                    window_id: p.window_id,
                    request: StartRecording {
                        mode: RecordingMode::Still { quality: p.quality },
                        width: p.width,
                        height: p.height,
                        viewport: p.viewport,
                        top_offset: p.top_offset,
                    },
                })
            }
            STOP_VIDEO_RECORDING => {
                let p: SessionParams = serde_json::from_value(params).map_err(invalid)?;
                Ok(Command::Stop(p.session_id))
            }
            SCREENCAST_FRAME_ACK => {
                let p: SessionParams = serde_json::from_value(params).map_err(invalid)?;
                Ok(Command::FrameAck(p.session_id))
            }
            other => Err(ProtocolError::UnknownMethod(other.to_string())),
        }
    }
}

/// Turn a session notification into its wire event.
pub fn encode_event(event: &SessionEvent) -> Result<Event, serde_json::Error> {
    match &event.event {
        ScreencastEvent::Frame(frame) => Ok(Event {
            method: SCREENCAST_FRAME,
            params: serde_json::to_value(FrameParams {
                session_id: &event.session_id,
                frame,
            })?,
        }),
        ScreencastEvent::Stopped => Ok(Event {
            method: SCREENCAST_STOPPED,
            params: serde_json::json!({ "sessionId": event.session_id }),
        }),
        ScreencastEvent::Started { path } => Ok(Event {
            method: VIDEO_RECORDING_STARTED,
            params: serde_json::json!({
                "sessionId": event.session_id,
                "file": path.to_string_lossy(),
            }),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(method: &str, params: Value) -> Request {
        Request {
            id: 1,
            method: method.to_string(),
            params,
        }
    }

    #[test]
    fn test_parse_start_commands() {
        let cmd = Command::parse(&request(
            START_VIDEO_RECORDING,
            json!({ "windowId": 3, "file": "a.webm", "width": 800, "height": 600, "topOffset": 40 }),
        ))
        .unwrap();
        assert_eq!(
            cmd,
            Command::Start {
                window_id: 3,
                request: StartRecording {
                    mode: RecordingMode::Video { path: PathBuf::from("a.webm") },
                    width: 800,
                    height: 600,
                    viewport: None,
                    top_offset: 40,
                },
            }
        );

        let cmd = Command::parse(&request(
            START_SCREENCAST,
            json!({ "windowId": 1, "width": 320, "height": 240, "viewport": { "width": 300, "height": 200 } }),
        ))
        .unwrap();
        let Command::Start { request, .. } = cmd else {
            panic!("expected start");
        };
        assert_eq!(request.mode, RecordingMode::Still { quality: 0 });
        assert_eq!(request.viewport, Some(Viewport { width: 300, height: 200 }));
    }

    #[test]
    fn test_parse_errors() {
        let err = Command::parse(&request("Page.navigate", Value::Null)).unwrap_err();
        assert_eq!(err.code(), METHOD_NOT_FOUND);

        let err = Command::parse(&request(STOP_VIDEO_RECORDING, json!({ "id": "x" }))).unwrap_err();
        assert_eq!(err.code(), INVALID_PARAMS);
        assert!(err.to_string().starts_with("Invalid params for Screencast.stopVideoRecording"));

        assert_eq!(
            Command::parse(&request(SCREENCAST_FRAME_ACK, json!({ "sessionId": "ab" }))).unwrap(),
            Command::FrameAck("ab".into())
        );

        let malformed: Result<Request, _> = serde_json::from_str("{\"method\":1}");
        assert_eq!(ProtocolError::from(malformed.unwrap_err()).code(), PARSE_ERROR);
    }

    #[test]
    fn test_event_encoding() {
        let frame = SessionEvent::new(
            "abc",
            ScreencastEvent::Frame(SnapshotFrame {
                data: "/9j/".into(),
                device_width: 640,
                device_height: 360,
            }),
        );
        let event = encode_event(&frame).unwrap();
        assert_eq!(event.method, SCREENCAST_FRAME);
        assert_eq!(
            event.params,
            json!({ "sessionId": "abc", "data": "/9j/", "deviceWidth": 640, "deviceHeight": 360 })
        );

        let stopped = encode_event(&SessionEvent::new("abc", ScreencastEvent::Stopped)).unwrap();
        assert_eq!(stopped.method, SCREENCAST_STOPPED);
        assert_eq!(stopped.params, json!({ "sessionId": "abc" }));

        let started = encode_event(&SessionEvent::new(
            "abc",
            ScreencastEvent::Started {
                path: "/tmp/rec/a.webm".into(),
            },
        ))
        .unwrap();
        assert_eq!(started.method, VIDEO_RECORDING_STARTED);
        assert_eq!(started.params, json!({ "sessionId": "abc", "file": "/tmp/rec/a.webm" }));
    }

    #[test]
    fn test_response_shape() {
        let ok = serde_json::to_value(Response::ok(4, json!({ "sessionId": "s" }))).unwrap();
        assert_eq!(ok, json!({ "id": 4, "result": { "sessionId": "s" } }));
        let err = serde_json::to_value(Response::error(None, PARSE_ERROR, "bad")).unwrap();
        assert_eq!(err, json!({ "id": null, "error": { "code": -32700, "message": "bad" } }));
    }
}
