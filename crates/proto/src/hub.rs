//! JSON hub protocol framing.
//!
//! Every record is a JSON object terminated by [`RECORD_SEPARATOR`]. A single
//! WebSocket text message may carry several records, so decoding always goes
//! through [`split_records`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtoError;
use crate::event::HubCall;

/// Record terminator of the JSON hub protocol.
pub const RECORD_SEPARATOR: char = '\u{1e}';

const PROTOCOL_NAME: &str = "json";
const PROTOCOL_VERSION: u32 = 1;

const TYPE_INVOCATION: u8 = 1;
const TYPE_COMPLETION: u8 = 3;
const TYPE_PING: u8 = 6;
const TYPE_CLOSE: u8 = 7;

/// One decoded hub record.
#[derive(Debug, Clone, PartialEq)]
pub enum HubFrame {
    /// Method call in either direction. Server pushes carry no invocation id.
    Invocation {
        invocation_id: Option<String>,
        target: String,
        arguments: Vec<Value>,
    },
    /// Result of a client invocation.
    Completion {
        invocation_id: String,
        result: Option<Value>,
        error: Option<String>,
    },
    /// Keep-alive.
    Ping,
    /// Server is closing the connection.
    Close {
        error: Option<String>,
        allow_reconnect: bool,
    },
    /// Record type this client does not use (streaming, acks).
    Other(u8),
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawFrame {
    #[serde(rename = "type")]
    kind: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    invocation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    arguments: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    allow_reconnect: Option<bool>,
}

#[derive(Debug, Serialize, Deserialize)]
struct HandshakeRequest<'a> {
    protocol: &'a str,
    version: u32,
}

#[derive(Debug, Default, Deserialize)]
struct HandshakeResponse {
    #[serde(default)]
    error: Option<String>,
}

impl HubFrame {
    /// Builds a client invocation for `call` under `invocation_id`.
    pub fn invocation(invocation_id: impl Into<String>, call: &HubCall) -> Self {
        HubFrame::Invocation {
            invocation_id: Some(invocation_id.into()),
            target: call.target().to_string(),
            arguments: call.arguments(),
        }
    }

    /// Serializes the frame into one terminated record.
    pub fn encode(&self) -> Result<String, ProtoError> {
        let raw = match self {
            HubFrame::Invocation {
                invocation_id,
                target,
                arguments,
            } => RawFrame {
                kind: TYPE_INVOCATION,
                invocation_id: invocation_id.clone(),
                target: Some(target.clone()),
                arguments: Some(arguments.clone()),
                ..RawFrame::default()
            },
            HubFrame::Completion {
                invocation_id,
                result,
                error,
            } => RawFrame {
                kind: TYPE_COMPLETION,
                invocation_id: Some(invocation_id.clone()),
                result: result.clone(),
                error: error.clone(),
                ..RawFrame::default()
            },
            HubFrame::Ping => RawFrame {
                kind: TYPE_PING,
                ..RawFrame::default()
            },
            HubFrame::Close {
                error,
                allow_reconnect,
            } => RawFrame {
                kind: TYPE_CLOSE,
                error: error.clone(),
                allow_reconnect: Some(*allow_reconnect),
                ..RawFrame::default()
            },
            HubFrame::Other(kind) => RawFrame {
                kind: *kind,
                ..RawFrame::default()
            },
        };
        let mut json =
            serde_json::to_string(&raw).map_err(|e| ProtoError::Serialization(e.to_string()))?;
        json.push(RECORD_SEPARATOR);
        Ok(json)
    }

    /// Parses a single record (without its separator).
    pub fn decode(record: &str) -> Result<Self, ProtoError> {
        let raw: RawFrame = serde_json::from_str(record)
            .map_err(|e| ProtoError::MalformedFrame(e.to_string()))?;
        let frame = match raw.kind {
            TYPE_INVOCATION => HubFrame::Invocation {
                invocation_id: raw.invocation_id,
                target: raw
                    .target
                    .ok_or_else(|| ProtoError::MalformedFrame("invocation without target".into()))?,
                arguments: raw.arguments.unwrap_or_default(),
            },
            TYPE_COMPLETION => HubFrame::Completion {
                invocation_id: raw.invocation_id.ok_or_else(|| {
                    ProtoError::MalformedFrame("completion without invocationId".into())
                })?,
                result: raw.result,
                error: raw.error,
            },
            TYPE_PING => HubFrame::Ping,
            TYPE_CLOSE => HubFrame::Close {
                error: raw.error,
                allow_reconnect: raw.allow_reconnect.unwrap_or(false),
            },
            other => HubFrame::Other(other),
        };
        Ok(frame)
    }
}

/// Splits a transport message into its records, dropping the empty tail.
pub fn split_records(text: &str) -> impl Iterator<Item = &str> {
    text.split(RECORD_SEPARATOR).filter(|r| !r.trim().is_empty())
}

/// Handshake record the client sends first.
pub fn handshake_request() -> String {
    let mut json = serde_json::to_string(&HandshakeRequest {
        protocol: PROTOCOL_NAME,
        version: PROTOCOL_VERSION,
    })
    .unwrap_or_else(|_| format!("{{\"protocol\":\"{PROTOCOL_NAME}\",\"version\":{PROTOCOL_VERSION}}}"));
    json.push(RECORD_SEPARATOR);
    json
}

/// Validates the server's handshake record.
///
/// `Ok(None)` means accepted, `Ok(Some(reason))` means the server refused.
pub fn parse_handshake_response(record: &str) -> Result<Option<String>, ProtoError> {
    let resp: HandshakeResponse = serde_json::from_str(record)
        .map_err(|e| ProtoError::MalformedFrame(format!("handshake: {e}")))?;
    Ok(resp.error)
}

/// Returns `true` for the handshake record a client sends.
pub fn is_handshake_request(record: &str) -> bool {
    serde_json::from_str::<HandshakeRequest<'_>>(record)
        .is_ok_and(|req| req.protocol == PROTOCOL_NAME)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::message::UserId;

    #[test]
    fn handshake_request_is_terminated_json() {
        let hs = handshake_request();
        assert!(hs.ends_with(RECORD_SEPARATOR));
        let body = hs.trim_end_matches(RECORD_SEPARATOR);
        assert!(is_handshake_request(body));
        let value: Value = serde_json::from_str(body).expect("json");
        assert_eq!(value, json!({"protocol": "json", "version": 1}));
    }

    #[test]
    fn handshake_response_accepts_empty_object_and_reports_error() {
        assert_eq!(parse_handshake_response("{}").expect("parse"), None);
        assert_eq!(
            parse_handshake_response(r#"{"error":"Requested protocol 'json' is not available."}"#)
                .expect("parse"),
            Some("Requested protocol 'json' is not available.".to_string())
        );
        assert!(parse_handshake_response("nope").is_err());
    }

    #[test]
    fn encodes_pickup_invocation_with_camel_case_fields() {
        let call = HubCall::PickupChat {
            target: UserId::from("bob911"),
            chat_type: "support".to_string(),
        };
        let encoded = HubFrame::invocation("3", &call).encode().expect("encode");
        let value: Value =
            serde_json::from_str(encoded.trim_end_matches(RECORD_SEPARATOR)).expect("json");
        assert_eq!(
            value,
            json!({
                "type": 1,
                "invocationId": "3",
                "target": "PickupChat",
                "arguments": ["bob911", "support"],
            })
        );
    }

    #[test]
    fn decodes_several_records_from_one_message() {
        let text = concat!(
            r#"{"type":1,"target":"ChatRequest","arguments":["bob911","support"]}"#,
            "\u{1e}",
            r#"{"type":6}"#,
            "\u{1e}",
            r#"{"type":3,"invocationId":"0","result":null}"#,
            "\u{1e}",
        );
        let frames: Vec<HubFrame> = split_records(text)
            .map(|r| HubFrame::decode(r).expect("decode"))
            .collect();
        assert_eq!(frames.len(), 3);
        assert!(matches!(
            &frames[0],
            HubFrame::Invocation { invocation_id: None, target, .. } if target == "ChatRequest"
        ));
        assert_eq!(frames[1], HubFrame::Ping);
        assert_eq!(
            frames[2],
            HubFrame::Completion {
                invocation_id: "0".to_string(),
                result: None,
                error: None,
            }
        );
    }

    #[test]
    fn decodes_close_and_unknown_types() {
        let close = HubFrame::decode(r#"{"type":7,"error":"shutdown","allowReconnect":true}"#)
            .expect("decode");
        assert_eq!(
            close,
            HubFrame::Close {
                error: Some("shutdown".to_string()),
                allow_reconnect: true,
            }
        );
        assert_eq!(
            HubFrame::decode(r#"{"type":2,"invocationId":"1","item":5}"#).expect("decode"),
            HubFrame::Other(2)
        );
    }

    #[test]
    fn rejects_frames_missing_required_fields() {
        let err = HubFrame::decode(r#"{"type":3}"#).expect_err("must fail");
        assert!(err.to_string().contains("completion without invocationId"));
        let err = HubFrame::decode(r#"{"type":1,"arguments":[]}"#).expect_err("must fail");
        assert!(err.to_string().contains("invocation without target"));
        assert!(HubFrame::decode("{").is_err());
    }
}
