//! Subscription registry.
//!
//! Records the exact serialized payload of every subscription request so the
//! whole set can be resent verbatim, in registration order, after each
//! reconnect. Re-subscribing under a response kind that is already recorded
//! replaces the payload in place, keeping its original position.

use parking_lot::Mutex;

/// A recorded subscription payload keyed by the response kind it serves.
#[derive(Debug, Clone, PartialEq, Eq)]
struct SubscriptionRecord {
    response_kind: String,
    payload: String,
}

/// Remembers active subscription payloads for replay on reconnect.
#[derive(Debug, Default)]
pub(crate) struct SubscriptionRegistry {
    records: Mutex<Vec<SubscriptionRecord>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `payload` for `response_kind`.
    ///
    /// A later registration under the same response kind replaces the stored
    /// payload without changing its replay position.
    pub fn record(&self, response_kind: &str, payload: String) {
        let mut records = self.records.lock();
        if let Some(existing) = records
            .iter_mut()
            .find(|r| r.response_kind == response_kind)
        {
            existing.payload = payload;
        } else {
            records.push(SubscriptionRecord {
                response_kind: response_kind.to_string(),
                payload,
            });
        }
    }

    /// Snapshot of every recorded payload in registration order.
    pub fn payloads(&self) -> Vec<String> {
        self.records.lock().iter().map(|r| r.payload.clone()).collect()
    }

    /// Number of recorded subscriptions.
    #[allow(dead_code)]
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }
}
