//! Cached access to the device's active design.
//!
//! The design is a large, infrequently-changing description of the device's
//! processing layout. Fetching it is expensive, and every consumer must see
//! a consistent snapshot, so loads go through a [`SingleFlight`] coordinator:
//! one `designGet` request per invalidation, no matter how many concurrent
//! callers ask. The device's `designChanged` push drops the cached snapshot;
//! the next accessor fetches fresh.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use stagelink_core::error::{CommandError, LoadError};
use stagelink_core::retry::{self, RetryPolicy};

use crate::connection::Client;
use crate::protocol::kind;
use crate::single_flight::SingleFlight;

/// Summary of one component in the active design.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Component {
    /// Component identifier, unique within the design.
    pub id: String,
    /// Component type name.
    #[serde(rename = "type")]
    pub kind: String,
}

/// Snapshot of the device's active design.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Design {
    /// Design name.
    pub name: String,
    /// Revision counter, bumped on each redeploy.
    #[serde(default)]
    pub revision: u64,
    /// Components present in the design.
    #[serde(default)]
    pub components: Vec<Component>,
}

/// Single-flight cached loader for the active design.
///
/// Clone-cheap handles to the same client can share one `DesignCache` behind
/// an `Arc`; all of them observe the same snapshot.
pub struct DesignCache {
    client: Client,
    flight: Arc<SingleFlight<Design>>,
    retry: RetryPolicy,
}

impl DesignCache {
    /// Creates a cache bound to `client`.
    ///
    /// Registers a handler for the `designChanged` push that drops the cached
    /// snapshot; the fetch itself runs under `retry` (transport failures and
    /// timeouts are retried, an explicit device rejection is not).
    #[must_use]
    pub fn new(client: Client, retry: RetryPolicy) -> Self {
        let flight = Arc::new(SingleFlight::new());

        let hook = Arc::downgrade(&flight);
        client.add_event_handler(kind::DESIGN_CHANGED, move |_frame| {
            if let Some(flight) = hook.upgrade() {
                debug!("Design changed on device; dropping cached snapshot");
                flight.invalidate();
            }
        });

        Self {
            client,
            flight,
            retry,
        }
    }

    /// Returns the active design, fetching it at most once per invalidation
    /// regardless of how many callers ask concurrently.
    pub async fn design(&self) -> Result<Arc<Design>, LoadError> {
        let client = self.client.clone();
        let policy = self.retry.clone();
        self.flight
            .load(move || async move { fetch_design(&client, &policy).await })
            .await
    }

    /// Drops the cached snapshot; the next call to [`design`](Self::design)
    /// fetches fresh.
    pub fn invalidate(&self) {
        self.flight.invalidate();
    }

    /// Returns the cached snapshot without triggering a fetch.
    #[must_use]
    pub fn cached(&self) -> Option<Arc<Design>> {
        self.flight.snapshot()
    }
}

/// Fetches the design over the control socket under the given retry policy.
///
/// A device rejection means there is nothing to load and is terminal; other
/// command failures are transient and consume the retry budget.
async fn fetch_design(client: &Client, policy: &RetryPolicy) -> Result<Design, LoadError> {
    retry::retry(
        policy,
        || {
            let client = client.clone();
            async move {
                match client
                    .send_with_response::<(), Design>(kind::DESIGN_GET, &(), false)
                    .await
                {
                    Ok(design) => Ok(design),
                    Err(CommandError::Rejected { reason }) => {
                        Err(LoadError::Unavailable { reason })
                    }
                    Err(other) => Err(LoadError::Fetch(other)),
                }
            }
        },
        |error: &LoadError| !error.is_unavailable(),
    )
    .await
}
