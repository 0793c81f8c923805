//! Request/response correlation.
//!
//! Outgoing requests register a one-shot completion under their identifier;
//! an inbound response frame resolves the matching completion exactly once.
//! A response for an identifier with no registered completion (already
//! resolved, timed out, or never issued) is dropped with a warning.

use parking_lot::Mutex;
use std::collections::HashMap;
use tokio::sync::oneshot;
use tracing::warn;

use stagelink_core::error::CommandError;

use crate::protocol::Frame;

/// Outcome delivered to a pending request.
pub(crate) type ResponseResult = Result<Frame, CommandError>;

/// Matches inbound response frames to pending requests by identifier.
#[derive(Debug, Default)]
pub(crate) struct RequestCorrelator {
    pending: Mutex<HashMap<String, oneshot::Sender<ResponseResult>>>,
}

impl RequestCorrelator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a one-shot completion under `request_id`.
    pub fn register(&self, request_id: &str) -> oneshot::Receiver<ResponseResult> {
        let (tx, rx) = oneshot::channel();
        if self
            .pending
            .lock()
            .insert(request_id.to_string(), tx)
            .is_some()
        {
            warn!(request_id = %request_id, "Duplicate request identifier; earlier request abandoned");
        }
        rx
    }

    /// Resolves the pending request matching `frame`, if any.
    ///
    /// An OK response resolves with the frame; a non-OK response rejects with
    /// the device's stated failure reason.
    pub fn complete(&self, frame: Frame) {
        let Some(id) = frame.request_id.clone() else {
            return;
        };
        let Some(tx) = self.pending.lock().remove(&id) else {
            warn!(
                request_id = %id,
                kind = %frame.kind,
                "Response for unknown or expired request"
            );
            return;
        };

        let result = if frame.is_ok() {
            Ok(frame)
        } else {
            Err(CommandError::Rejected {
                reason: frame
                    .fail_reason
                    .clone()
                    .unwrap_or_else(|| "request failed".to_string()),
            })
        };
        // The receiver may already be gone if the caller timed out between
        // our map lookup and this send.
        let _ = tx.send(result);
    }

    /// Drops the pending request for `request_id` (timeout expiry).
    pub fn abandon(&self, request_id: &str) {
        self.pending.lock().remove(request_id);
    }

    /// Number of requests awaiting a response.
    #[allow(dead_code)]
    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }
}
