//! Single-flight load coordination.
//!
//! Coalesces concurrent loads of an expensive, shared remote snapshot so that
//! at most one fetch is in flight at any time:
//!
//! - The first caller becomes the loader and performs the fetch itself.
//! - Callers arriving while that fetch is in flight wait for its outcome and
//!   observe exactly the result the loader observed.
//! - A successful fetch is cached until invalidated; a failed fetch is a
//!   terminal error for every caller until the next invalidation.
//! - Invalidation is lazy: it drops the cached snapshot (or marks an
//!   in-flight fetch stale), and the *next* caller triggers the fresh fetch.
//!
//! Loads are generation-stamped. A caller arriving after an invalidation
//! never joins an older in-flight fetch; it waits its turn and then leads (or
//! joins) a fresh one, so the single-fetch invariant holds across
//! invalidations too.

use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::debug;

use stagelink_core::error::LoadError;

enum LoadState<T> {
    /// No snapshot and no fetch in flight.
    Idle,
    /// A fetch is in flight.
    Loading {
        /// Generation observed when the fetch started.
        generation: u64,
        /// Callers coalesced onto the in-flight fetch.
        waiters: Vec<oneshot::Sender<Result<Arc<T>, LoadError>>>,
        /// Callers that arrived after an invalidation and need a fresh fetch.
        successors: Vec<oneshot::Sender<()>>,
    },
    /// The last fetch succeeded.
    Ready(Arc<T>),
    /// The last fetch failed; terminal until invalidated.
    Failed(LoadError),
}

enum Role<T> {
    Lead(u64),
    Join(oneshot::Receiver<Result<Arc<T>, LoadError>>),
    AwaitTurn(oneshot::Receiver<()>),
}

/// Coalesces concurrent loads into a single in-flight fetch.
pub struct SingleFlight<T> {
    state: Mutex<LoadState<T>>,
    generation: AtomicU64,
}

impl<T> Default for SingleFlight<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SingleFlight<T> {
    /// Creates an empty coordinator.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(LoadState::Idle),
            generation: AtomicU64::new(0),
        }
    }

    /// Returns the snapshot, fetching it if necessary.
    ///
    /// At most one underlying fetch runs at a time; every concurrent caller
    /// observes that fetch's outcome. `fetch` is invoked at most once per
    /// call, and only when this caller ends up leading a load.
    pub async fn load<F, Fut>(&self, fetch: F) -> Result<Arc<T>, LoadError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, LoadError>>,
    {
        let mut fetch = Some(fetch);
        loop {
            let role = {
                let mut state = self.state.lock();
                match &mut *state {
                    LoadState::Ready(snapshot) => return Ok(Arc::clone(snapshot)),
                    LoadState::Failed(error) => return Err(error.clone()),
                    LoadState::Idle => {
                        let generation = self.generation.load(Ordering::SeqCst);
                        *state = LoadState::Loading {
                            generation,
                            waiters: Vec::new(),
                            successors: Vec::new(),
                        };
                        Role::Lead(generation)
                    }
                    LoadState::Loading {
                        generation,
                        waiters,
                        successors,
                    } => {
                        if *generation == self.generation.load(Ordering::SeqCst) {
                            let (tx, rx) = oneshot::channel();
                            waiters.push(tx);
                            Role::Join(rx)
                        } else {
                            let (tx, rx) = oneshot::channel();
                            successors.push(tx);
                            Role::AwaitTurn(rx)
                        }
                    }
                }
            };

            match role {
                Role::Lead(generation) => {
                    let Some(fetch) = fetch.take() else {
                        return Err(LoadError::Unavailable {
                            reason: "load coordinator state error".to_string(),
                        });
                    };
                    return self.lead(generation, fetch).await;
                }
                Role::Join(rx) => match rx.await {
                    Ok(result) => return result,
                    // The leading call was cancelled mid-fetch; start over.
                    Err(_) => {}
                },
                Role::AwaitTurn(rx) => {
                    let _ = rx.await;
                }
            }
        }
    }

    async fn lead<F, Fut>(&self, generation: u64, fetch: F) -> Result<Arc<T>, LoadError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, LoadError>>,
    {
        let mut guard = LeaderGuard {
            flight: self,
            disarmed: false,
        };
        let result = fetch().await.map(Arc::new);
        guard.disarmed = true;
        self.finish(generation, result)
    }

    fn finish(
        &self,
        generation: u64,
        result: Result<Arc<T>, LoadError>,
    ) -> Result<Arc<T>, LoadError> {
        let (waiters, successors) = {
            let mut state = self.state.lock();
            let old = std::mem::replace(&mut *state, LoadState::Idle);
            let (waiters, successors) = match old {
                LoadState::Loading {
                    waiters, successors, ..
                } => (waiters, successors),
                other => {
                    *state = other;
                    (Vec::new(), Vec::new())
                }
            };

            if generation == self.generation.load(Ordering::SeqCst) {
                *state = match &result {
                    Ok(snapshot) => LoadState::Ready(Arc::clone(snapshot)),
                    Err(error) => LoadState::Failed(error.clone()),
                };
            } else {
                // Invalidated while in flight: the waiters that joined this
                // fetch still get its outcome, but it is not cached.
                debug!("Load invalidated while in flight; result not cached");
            }
            (waiters, successors)
        };

        for tx in waiters {
            let _ = tx.send(result.clone());
        }
        for tx in successors {
            let _ = tx.send(());
        }
        result
    }

    /// Drops the cached snapshot (or marks an in-flight fetch stale).
    ///
    /// The next caller of [`load`](Self::load) triggers the fresh fetch;
    /// invalidation itself fetches nothing.
    pub fn invalidate(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock();
        match &*state {
            LoadState::Ready(_) | LoadState::Failed(_) => {
                *state = LoadState::Idle;
            }
            // An in-flight fetch keeps running; finish() discards its result.
            LoadState::Idle | LoadState::Loading { .. } => {}
        }
    }

    /// Returns the cached snapshot without triggering a load.
    #[must_use]
    pub fn snapshot(&self) -> Option<Arc<T>> {
        match &*self.state.lock() {
            LoadState::Ready(snapshot) => Some(Arc::clone(snapshot)),
            _ => None,
        }
    }

    /// Returns true if a fetch is currently in flight.
    #[must_use]
    pub fn is_loading(&self) -> bool {
        matches!(&*self.state.lock(), LoadState::Loading { .. })
    }
}

/// Resets the coordinator if the leading call is dropped mid-fetch, so
/// waiting callers wake up and retry instead of hanging forever.
struct LeaderGuard<'a, T> {
    flight: &'a SingleFlight<T>,
    disarmed: bool,
}

impl<T> Drop for LeaderGuard<'_, T> {
    fn drop(&mut self) {
        if self.disarmed {
            return;
        }
        let successors = {
            let mut state = self.flight.state.lock();
            match std::mem::replace(&mut *state, LoadState::Idle) {
                // Dropping the waiters' senders makes them retry.
                LoadState::Loading { successors, .. } => successors,
                other => {
                    *state = other;
                    Vec::new()
                }
            }
        };
        for tx in successors {
            let _ = tx.send(());
        }
    }
}
