//! JSON-RPC 2.0 message model.
//!
//! Every frame on the wire is one of three shapes, told apart by which
//! envelope fields are present:
//!
//! | `id` | `method` | variant        |
//! |------|----------|----------------|
//! | yes  | no       | [`Response`]     |
//! | yes  | yes      | [`Request`]      |
//! | no   | yes      | [`Notification`] |

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

const JSONRPC_VERSION: &str = "2.0";

/// JSON-RPC error code for an unknown method.
pub const METHOD_NOT_FOUND: i64 = -32601;

/// Request identifier. The client only allocates numbers, but servers may
/// use strings for their own requests.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(u64),
    String(String),
}

impl RequestId {
    #[must_use]
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::String(_) => None,
        }
    }
}

impl From<u64> for RequestId {
    fn from(value: u64) -> Self {
        Self::Number(value)
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s:?}"),
        }
    }
}

/// Structured error carried by a failed response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("{message} (code {code})")]
pub struct ResponseError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ResponseError {
    #[must_use]
    pub fn method_not_found(method: &str) -> Self {
        Self {
            code: METHOD_NOT_FOUND,
            message: format!("Method not found: {method}"),
            data: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub id: RequestId,
    pub method: String,
    pub params: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub id: RequestId,
    /// `Ok(Value::Null)` for a successful response with no result.
    pub outcome: Result<Value, ResponseError>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub method: String,
    pub params: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Request(Request),
    Response(Response),
    Notification(Notification),
}

/// A frame body that could not be turned into a [`Message`].
///
/// The frame boundary is already known when this happens, so readers log it
/// and move on to the next frame.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("malformed JSON-RPC body: {0}")]
    Json(#[from] serde_json::Error),
    #[error("JSON-RPC envelope has neither id nor method")]
    Unclassifiable,
}

/// Wire envelope shared by all three variants.
#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    #[serde(default = "default_version")]
    jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<RequestId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<ResponseError>,
}

fn default_version() -> String {
    JSONRPC_VERSION.to_string()
}

impl Message {
    #[must_use]
    pub fn request(id: u64, method: impl Into<String>, params: Option<Value>) -> Self {
        Self::Request(Request {
            id: RequestId::Number(id),
            method: method.into(),
            params,
        })
    }

    #[must_use]
    pub fn notification(method: impl Into<String>, params: Option<Value>) -> Self {
        Self::Notification(Notification {
            method: method.into(),
            params,
        })
    }

    #[must_use]
    pub fn response(id: RequestId, outcome: Result<Value, ResponseError>) -> Self {
        Self::Response(Response { id, outcome })
    }

    /// The method name, for requests and notifications.
    #[must_use]
    pub fn method(&self) -> Option<&str> {
        match self {
            Self::Request(r) => Some(&r.method),
            Self::Notification(n) => Some(&n.method),
            Self::Response(_) => None,
        }
    }

    pub fn from_slice(body: &[u8]) -> Result<Self, DecodeError> {
        let envelope: Envelope = serde_json::from_slice(body)?;
        Self::from_envelope(envelope)
    }

    pub fn from_value(value: Value) -> Result<Self, DecodeError> {
        let envelope: Envelope = serde_json::from_value(value)?;
        Self::from_envelope(envelope)
    }

    pub fn to_vec(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&self.to_envelope())
    }

    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self.to_envelope())
    }

    fn from_envelope(envelope: Envelope) -> Result<Self, DecodeError> {
        let Envelope {
            id,
            method,
            params,
            result,
            error,
            ..
        } = envelope;

        match (id, method) {
            (Some(id), Some(method)) => Ok(Self::Request(Request { id, method, params })),
            (Some(id), None) => {
                let outcome = match error {
                    Some(err) => Err(err),
                    None => Ok(result.unwrap_or(Value::Null)),
                };
                Ok(Self::Response(Response { id, outcome }))
            }
            (None, Some(method)) => Ok(Self::Notification(Notification { method, params })),
            (None, None) => Err(DecodeError::Unclassifiable),
        }
    }

    fn to_envelope(&self) -> Envelope {
        let mut envelope = Envelope {
            jsonrpc: default_version(),
            id: None,
            method: None,
            params: None,
            result: None,
            error: None,
        };
        match self {
            Self::Request(r) => {
                envelope.id = Some(r.id.clone());
                envelope.method = Some(r.method.clone());
                envelope.params.clone_from(&r.params);
            }
            Self::Response(r) => {
                envelope.id = Some(r.id.clone());
                match &r.outcome {
                    Ok(value) => envelope.result = Some(value.clone()),
                    Err(err) => envelope.error = Some(err.clone()),
                }
            }
            Self::Notification(n) => {
                envelope.method = Some(n.method.clone());
                envelope.params.clone_from(&n.params);
            }
        }
        envelope
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn roundtrip(msg: &Message) -> Message {
        let bytes = msg.to_vec().unwrap();
        Message::from_slice(&bytes).unwrap()
    }

    #[test]
    fn request_roundtrip() {
        let msg = Message::request(
            7,
            "textDocument/hover",
            Some(json!({"textDocument": {"uri": "file:///a.rs"}, "position": {"line": 1, "character": 2}})),
        );
        assert_eq!(roundtrip(&msg), msg);
    }

    #[test]
    fn response_roundtrip_with_result_and_error() {
        let ok = Message::response(RequestId::Number(3), Ok(json!({"capabilities": {}})));
        assert_eq!(roundtrip(&ok), ok);

        let err = Message::response(
            RequestId::Number(4),
            Err(ResponseError {
                code: -32600,
                message: "invalid request".into(),
                data: Some(json!({"why": "because"})),
            }),
        );
        assert_eq!(roundtrip(&err), err);
    }

    #[test]
    fn null_result_roundtrips_as_null() {
        let msg = Message::response(RequestId::Number(1), Ok(Value::Null));
        let json = msg.to_value().unwrap();
        assert!(json.get("result").is_some(), "null result must be serialized");
        assert_eq!(roundtrip(&msg), msg);
    }

    #[test]
    fn notification_roundtrip() {
        let msg = Message::notification("initialized", Some(json!({})));
        assert_eq!(roundtrip(&msg), msg);

        let bare = Message::notification("exit", None);
        let json = bare.to_value().unwrap();
        assert!(json.get("params").is_none(), "params must be omitted, not null");
        assert!(json.get("id").is_none());
        assert_eq!(roundtrip(&bare), bare);
    }

    #[test]
    fn classification_is_structural() {
        let resp = Message::from_value(json!({"jsonrpc": "2.0", "id": 1, "result": null})).unwrap();
        assert!(matches!(resp, Message::Response(Response { outcome: Ok(Value::Null), .. })));

        let missing_result = Message::from_value(json!({"jsonrpc": "2.0", "id": 1})).unwrap();
        assert!(matches!(missing_result, Message::Response(_)));

        let req = Message::from_value(json!({"jsonrpc": "2.0", "id": "abc", "method": "workspace/configuration"}))
            .unwrap();
        match req {
            Message::Request(r) => assert_eq!(r.id, RequestId::String("abc".into())),
            other => panic!("expected request, got {other:?}"),
        }

        let notif = Message::from_value(json!({"jsonrpc": "2.0", "method": "foo/bar"})).unwrap();
        assert_eq!(notif.method(), Some("foo/bar"));
    }

    #[test]
    fn envelope_without_id_or_method_is_unclassifiable() {
        let err = Message::from_value(json!({"jsonrpc": "2.0", "result": 1})).unwrap_err();
        assert!(matches!(err, DecodeError::Unclassifiable));
    }

    #[test]
    fn error_takes_precedence_over_result() {
        let msg = Message::from_value(json!({
            "jsonrpc": "2.0",
            "id": 2,
            "error": {"code": -32601, "message": "nope"}
        }))
        .unwrap();
        match msg {
            Message::Response(r) => assert_eq!(r.outcome.unwrap_err().code, METHOD_NOT_FOUND),
            other => panic!("expected response, got {other:?}"),
        }
    }

    #[test]
    fn malformed_json_is_decode_error() {
        assert!(matches!(Message::from_slice(b"{not json"), Err(DecodeError::Json(_))));
    }
}
