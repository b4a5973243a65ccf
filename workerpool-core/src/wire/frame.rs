//! Frame bodies and the combined `Frame` type sent over `WorkerPoolCodec`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use crate::wire::header::FrameKind;
use crate::error::WireErrorPayload;

/// Literal sent as the lone payload of a `Ready` frame.
pub const READY_LITERAL: &str = "ready";

/// Reserved method name used to request graceful worker exit. Never
/// dispatched to a registered handler.
pub const TERMINATE_METHOD: &str = "__workerpool-terminate__";

/// Payload of a `Ready` frame: the bare string literal `"ready"`, wrapped so
/// the codec can (de)serialize it like any other body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReadyLiteralPayload(String);

impl Default for ReadyLiteralPayload {
    fn default() -> Self {
        Self(READY_LITERAL.to_string())
    }
}

/// A pool → worker method invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestBody {
    pub method: String,
    #[serde(default)]
    pub params: Vec<Value>,
    /// Raw side-channel payloads accompanying `params`.
    #[serde(default)]
    pub transferables: Vec<Vec<u8>>,
}

/// A worker → pool terminal reply to a `Request`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseBody {
    #[serde(flatten)]
    pub outcome: ResponseOutcome,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ResponseOutcome {
    Ok {
        result: Value,
        #[serde(default)]
        transferables: Vec<Vec<u8>>,
    },
    Err {
        error: WireErrorPayload,
    },
}

/// A worker → pool event tied to a still-in-flight request, fired by
/// `emit`/custom events while a task runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventBody {
    pub payload: Value,
}

/// The decoded body of a frame, tagged by [`FrameKind`] at the header level
/// rather than by an internal discriminant — `WorkerPoolCodec` picks which
/// variant to parse the JSON payload as based on the header's `kind`.
#[derive(Debug, Clone)]
pub enum FrameBody {
    Ready,
    Terminate,
    Request(RequestBody),
    Response(ResponseBody),
    Event(EventBody),
}

/// A fully decoded frame: header metadata plus its typed body.
#[derive(Debug, Clone)]
pub struct Frame {
    pub request_id: u64,
    pub body: FrameBody,
}

impl Frame {
    pub fn ready() -> Self {
        Self {
            request_id: 0,
            body: FrameBody::Ready,
        }
    }

    pub fn terminate() -> Self {
        Self {
            request_id: 0,
            body: FrameBody::Terminate,
        }
    }

    pub fn request(request_id: u64, body: RequestBody) -> Self {
        Self {
            request_id,
            body: FrameBody::Request(body),
        }
    }

    pub fn response(request_id: u64, body: ResponseBody) -> Self {
        Self {
            request_id,
            body: FrameBody::Response(body),
        }
    }

    pub fn event(request_id: u64, body: EventBody) -> Self {
        Self {
            request_id,
            body: FrameBody::Event(body),
        }
    }

    pub fn kind(&self) -> FrameKind {
        match &self.body {
            FrameBody::Ready => FrameKind::Ready,
            FrameBody::Terminate => FrameKind::Terminate,
            FrameBody::Request(_) => FrameKind::Request,
            FrameBody::Response(_) => FrameKind::Response,
            FrameBody::Event(_) => FrameKind::Event,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_round_trips_through_json() {
        let body = RequestBody {
            method: "add".to_string(),
            params: vec![Value::from(1), Value::from(2)],
            transferables: vec![],
        };
        let json = serde_json::to_string(&body).unwrap();
        let parsed: RequestBody = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.method, "add");
        assert_eq!(parsed.params.len(), 2);
    }

    #[test]
    fn response_ok_tag() {
        let body = ResponseBody {
            outcome: ResponseOutcome::Ok {
                result: Value::from(3),
                transferables: vec![],
            },
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["status"], "ok");
    }

    #[test]
    fn response_err_tag() {
        let body = ResponseBody {
            outcome: ResponseOutcome::Err {
                error: WireErrorPayload::from_unknown_method("nope"),
            },
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["status"], "err");
    }

    #[test]
    fn terminate_method_literal_is_stable() {
        assert_eq!(TERMINATE_METHOD, "__workerpool-terminate__");
    }
}
