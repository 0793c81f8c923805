//! Wire protocol frames for the StageLink control socket.
//!
//! Every frame is a single JSON object with a `type` discriminator string.
//! Response frames additionally echo the `requestId` of the originating
//! request and carry either `state: "OK"` with payload fields or a non-OK
//! state plus a `failReason`. The presence of a request identifier is the
//! sole discriminant between responses and pushed events.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::{SystemTime, UNIX_EPOCH};

use stagelink_core::error::{CommandError, NetworkError};

/// Reserved message kinds used by the transport itself.
pub mod kind {
    /// Bidirectional liveness frame, exchanged periodically.
    pub const HEARTBEAT: &str = "heartbeat";
    /// Request kind fetching the active design snapshot.
    pub const DESIGN_GET: &str = "designGet";
    /// Push notification that the active design changed.
    pub const DESIGN_CHANGED: &str = "designChanged";
}

/// Response state string signalling success.
const STATE_OK: &str = "OK";

/// Serialized form of the heartbeat frame, sent on every heartbeat tick.
pub(crate) const HEARTBEAT_TEXT: &str = r#"{"type":"heartbeat"}"#;

/// A decoded protocol frame.
///
/// Fields not part of the envelope are carried verbatim in `payload`, so an
/// unrecognized message kind still decodes and can be routed or logged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Frame {
    /// Message kind discriminator.
    #[serde(rename = "type")]
    pub kind: String,

    /// Correlation identifier echoed by responses.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,

    /// Response state; `"OK"` on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,

    /// Failure reason carried by non-OK responses.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fail_reason: Option<String>,

    /// Remaining payload fields.
    #[serde(flatten)]
    pub payload: serde_json::Map<String, Value>,
}

impl Frame {
    /// Creates a frame with no payload.
    #[must_use]
    pub fn event(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            request_id: None,
            state: None,
            fail_reason: None,
            payload: serde_json::Map::new(),
        }
    }

    /// Creates the heartbeat frame.
    #[must_use]
    pub fn heartbeat() -> Self {
        Self::event(kind::HEARTBEAT)
    }

    /// Creates a request frame carrying `body` as its payload.
    ///
    /// `body` must serialize to a JSON object (or to null, for requests
    /// without parameters).
    pub fn request<T: Serialize>(
        kind: impl Into<String>,
        request_id: impl Into<String>,
        body: &T,
    ) -> Result<Self, NetworkError> {
        let mut frame = Self::with_body(kind, body)?;
        frame.request_id = Some(request_id.into());
        Ok(frame)
    }

    /// Creates a subscription request frame.
    #[must_use]
    pub fn subscription(kind: impl Into<String>, body: &SubscribeBody) -> Self {
        let mut frame = Self::event(kind);
        frame
            .payload
            .insert("keepAliveMs".to_string(), Value::from(body.keep_alive_ms));
        frame.payload.insert(
            "responseTag".to_string(),
            Value::from(body.response_tag.clone()),
        );
        if let Some(every) = body.data_every_ms {
            frame
                .payload
                .insert("dataEveryMs".to_string(), Value::from(every));
        }
        frame
    }

    fn with_body<T: Serialize>(kind: impl Into<String>, body: &T) -> Result<Self, NetworkError> {
        let payload = match serde_json::to_value(body) {
            Ok(Value::Object(map)) => map,
            Ok(Value::Null) => serde_json::Map::new(),
            Ok(other) => {
                return Err(NetworkError::Protocol {
                    reason: format!("request body must be a JSON object, got {other}"),
                })
            }
            Err(e) => {
                return Err(NetworkError::Protocol {
                    reason: format!("failed to serialize request body: {e}"),
                })
            }
        };
        Ok(Self {
            kind: kind.into(),
            request_id: None,
            state: None,
            fail_reason: None,
            payload,
        })
    }

    /// Returns true if this frame carries a request identifier, i.e. it is a
    /// response rather than a pushed event.
    #[must_use]
    pub fn is_response(&self) -> bool {
        self.request_id.is_some()
    }

    /// Returns true if this response frame reports success.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.state.as_deref() == Some(STATE_OK)
    }

    /// Marks this frame as a successful response to `request_id`.
    #[must_use]
    pub fn into_ok_response(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self.state = Some(STATE_OK.to_string());
        self
    }

    /// Marks this frame as a failed response to `request_id`.
    #[must_use]
    pub fn into_failed_response(
        mut self,
        request_id: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        self.request_id = Some(request_id.into());
        self.state = Some("Error".to_string());
        self.fail_reason = Some(reason.into());
        self
    }

    /// Decodes the payload fields into a typed value.
    pub fn decode_payload<T: DeserializeOwned>(self) -> Result<T, CommandError> {
        serde_json::from_value(Value::Object(self.payload)).map_err(|e| CommandError::Decode {
            reason: e.to_string(),
        })
    }

    /// Serializes the frame to its wire form.
    pub fn encode(&self) -> Result<String, NetworkError> {
        serde_json::to_string(self).map_err(|e| NetworkError::Protocol {
            reason: format!("failed to serialize frame: {e}"),
        })
    }
}

/// Fields of a subscription request frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeBody {
    /// Subscription lifetime; 0 keeps it alive until disconnect.
    pub keep_alive_ms: u64,

    /// Opaque recipient tag echoed in pushed updates.
    pub response_tag: String,

    /// Requested update interval for polling-style subscriptions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_every_ms: Option<u64>,
}

/// Generates a request identifier: unix milliseconds plus a random suffix.
///
/// Uniqueness is the caller's responsibility per the protocol; the random
/// suffix makes collisions between concurrent requests vanishingly unlikely.
#[must_use]
pub fn request_id() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    format!("{millis}-{:08x}", rand::random::<u32>())
}
