//! # Promise manager
//!
//! Bridges the push-based gateway to pull-based step code: a step awaits
//! `create_promise`, which settles when a matching reply is written to the
//! store, when the wait times out, or when another input path discards it.
//!
//! Resolution is observed two ways. The resolver wakes the waiting future
//! directly through a `RequestWaker`, so in-process replies settle without
//! polling latency. A store poll at the configured interval remains as the
//! fallback for records written outside this process. Because the wait is a
//! single sequential loop, two store reads can never overlap for one key.

use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Notify, oneshot};
use tracing::{debug, warn};

use crate::error::{FlowError, FlowResult};
use crate::state::{RequestRecord, RequestStatus, StateManager, normalize_request_key};
use crate::strings::REASON_SUPERSEDED;

/// Callback fired when a wait times out, before the promise rejects.
/// Typically sends a "you took too long" notice.
pub type TimeoutFn = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

struct ActiveRequest {
    discard_tx: oneshot::Sender<String>,
    waker: Arc<Notify>,
}

type Registry = Arc<Mutex<HashMap<String, ActiveRequest>>>;

/// Wakes a pending wait after its resolution was written to the store.
/// Cheap to clone; shared with the message resolver.
#[derive(Clone)]
pub struct RequestWaker {
    active: Registry,
}

impl RequestWaker {
    pub fn wake(&self, key: &str) {
        let key = normalize_request_key(key);
        let active = self.active.lock().unwrap();
        if let Some(entry) = active.get(&key) {
            entry.waker.notify_one();
        }
    }
}

#[derive(Clone)]
pub struct PromiseManager {
    state: StateManager,
    poll_interval: Duration,
    active: Registry,
}

impl PromiseManager {
    pub fn new(state: StateManager, poll_interval: Duration) -> Self {
        Self {
            state,
            poll_interval,
            active: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn waker(&self) -> RequestWaker {
        RequestWaker {
            active: self.active.clone(),
        }
    }

    /// Writes a fresh `awaiting` record under `request:{key}` and waits for
    /// it to settle. A prior record under the same key is overwritten and a
    /// prior in-process wait is discarded: at most one wait per conversation
    /// key exists at any instant.
    ///
    /// `timeout` of zero means wait forever.
    pub async fn create_promise(
        &self,
        key: &str,
        timeout: Duration,
        on_timeout: Option<TimeoutFn>,
    ) -> FlowResult<RequestRecord> {
        let key = normalize_request_key(key);

        self.state
            .set_request_data(&key, &RequestRecord::awaiting())
            .await
            .map_err(FlowError::Store)?;

        let (discard_tx, mut discard_rx) = oneshot::channel();
        let waker = Arc::new(Notify::new());
        let superseded = {
            let mut active = self.active.lock().unwrap();
            active.insert(
                key.clone(),
                ActiveRequest {
                    discard_tx,
                    waker: waker.clone(),
                },
            )
        };
        if let Some(prior) = superseded {
            debug!(key, "superseding pending request");
            let _ = prior.discard_tx.send(REASON_SUPERSEDED.to_string());
        }

        let mut poll = tokio::time::interval(self.poll_interval);
        poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        let mut on_timeout = on_timeout;
        let deadline = async {
            if timeout > Duration::ZERO {
                tokio::time::sleep(timeout).await;
            } else {
                std::future::pending::<()>().await;
            }
        };
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = &mut deadline => {
                    if let Some(callback) = on_timeout.take() {
                        callback().await;
                    }
                    self.settle(&key).await;
                    return Err(FlowError::Timeout);
                }
                reason = &mut discard_rx => {
                    // The discarding side already removed the registry entry
                    // and owns record cleanup: on supersession a fresh
                    // awaiting record now lives under this key and must not
                    // be deleted from here.
                    let reason = reason.unwrap_or_else(|_| "discarded".to_string());
                    return Err(FlowError::Discarded(reason));
                }
                _ = waker.notified() => {}
                _ = poll.tick() => {}
            }

            match self.state.get_request_data(&key).await {
                Ok(Some(record)) if record.status == RequestStatus::Resolved => {
                    self.settle(&key).await;
                    return Ok(record);
                }
                Ok(Some(_)) => {} // still awaiting
                Ok(None) => {
                    self.deregister(&key);
                    return Err(FlowError::RequestNotFound);
                }
                Err(err) => {
                    self.settle(&key).await;
                    return Err(FlowError::Store(err));
                }
            }
        }
    }

    /// Rejects a pending wait immediately, without waiting for the next poll
    /// tick. Accepts the key with or without the `request:` prefix. The
    /// record is deleted here as well, so cleanup holds even when the
    /// waiting future was already dropped.
    pub async fn discard_promise(&self, key: &str, reason: &str) {
        let key = normalize_request_key(key);
        let entry = self.active.lock().unwrap().remove(&key);
        if let Some(entry) = entry {
            let _ = entry.discard_tx.send(reason.to_string());
        }
        if let Err(err) = self.state.delete_request_data(&key).await {
            warn!(key, "failed to delete request record on discard: {err:#}");
        }
    }

    async fn settle(&self, key: &str) {
        self.deregister(key);
        if let Err(err) = self.state.delete_request_data(key).await {
            warn!(key, "failed to delete settled request record: {err:#}");
        }
    }

    fn deregister(&self, key: &str) {
        self.active.lock().unwrap().remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, StateStore};
    use std::sync::atomic::{AtomicUsize, Ordering};

    const POLL: Duration = Duration::from_millis(200);

    fn setup() -> (PromiseManager, StateManager, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let state = StateManager::new(store.clone());
        (PromiseManager::new(state.clone(), POLL), state, store)
    }

    #[tokio::test(start_paused = true)]
    async fn resolves_when_record_flips_to_resolved() {
        let (promises, state, store) = setup();

        let waiter = tokio::spawn({
            let promises = promises.clone();
            async move {
                promises
                    .create_promise("u:c", Duration::from_secs(30), None)
                    .await
            }
        });

        // Let the awaiting record land, then resolve it like the resolver
        // would and rely on the poll to observe it.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(store.exists("request:u:c").await.unwrap());
        state
            .set_request_data("request:u:c", &RequestRecord::resolved("hello"))
            .await
            .unwrap();

        let record = waiter.await.unwrap().unwrap();
        assert_eq!(record, RequestRecord::resolved("hello"));
        // Consumed exactly once: the record is gone.
        assert!(!store.exists("request:u:c").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn waker_settles_before_next_poll_tick() {
        let (promises, state, _store) = setup();
        let waker = promises.waker();

        let waiter = tokio::spawn({
            let promises = promises.clone();
            async move {
                promises
                    .create_promise("u:c", Duration::from_secs(30), None)
                    .await
            }
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        state
            .set_request_data("request:u:c", &RequestRecord::resolved("fast"))
            .await
            .unwrap();
        waker.wake("u:c");

        // Well inside the 200ms poll interval.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(waiter.is_finished());
        assert_eq!(
            waiter.await.unwrap().unwrap(),
            RequestRecord::resolved("fast")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_fires_callback_exactly_once_and_rejects() {
        let (promises, _state, store) = setup();
        let fired = Arc::new(AtomicUsize::new(0));

        let on_timeout: TimeoutFn = {
            let fired = fired.clone();
            Box::new(move || {
                Box::pin(async move {
                    fired.fetch_add(1, Ordering::SeqCst);
                })
            })
        };

        let result = promises
            .create_promise("u:c", Duration::from_secs(5), Some(on_timeout))
            .await;

        assert!(matches!(result, Err(FlowError::Timeout)));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!store.exists("request:u:c").await.unwrap());

        // Nothing left registered, so a later discard is a no-op.
        promises.discard_promise("u:c", "late").await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_timeout_waits_forever() {
        let (promises, state, _store) = setup();

        let waiter = tokio::spawn({
            let promises = promises.clone();
            async move { promises.create_promise("u:c", Duration::ZERO, None).await }
        });

        // Far beyond any default timeout.
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert!(!waiter.is_finished());

        state
            .set_request_data("request:u:c", &RequestRecord::resolved("eventually"))
            .await
            .unwrap();
        assert_eq!(
            waiter.await.unwrap().unwrap(),
            RequestRecord::resolved("eventually")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn missing_record_rejects_with_not_found() {
        let (promises, state, _store) = setup();

        let waiter = tokio::spawn({
            let promises = promises.clone();
            async move {
                promises
                    .create_promise("u:c", Duration::from_secs(30), None)
                    .await
            }
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        state.delete_request_data("request:u:c").await.unwrap();

        let result = waiter.await.unwrap();
        assert!(matches!(result, Err(FlowError::RequestNotFound)));
    }

    #[tokio::test(start_paused = true)]
    async fn discard_rejects_immediately_with_reason() {
        let (promises, _state, store) = setup();

        let waiter = tokio::spawn({
            let promises = promises.clone();
            async move {
                promises
                    .create_promise("u:c", Duration::from_secs(30), None)
                    .await
            }
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        promises.discard_promise("u:c", "button-pressed-on-time").await;
        tokio::time::sleep(Duration::from_millis(1)).await;

        assert!(waiter.is_finished());
        match waiter.await.unwrap() {
            Err(FlowError::Discarded(reason)) => assert_eq!(reason, "button-pressed-on-time"),
            other => panic!("expected discard, got {other:?}"),
        }
        assert!(!store.exists("request:u:c").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn new_promise_supersedes_pending_one_for_same_key() {
        let (promises, state, _store) = setup();

        let first = tokio::spawn({
            let promises = promises.clone();
            async move {
                promises
                    .create_promise("u:c", Duration::from_secs(30), None)
                    .await
            }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;

        let second = tokio::spawn({
            let promises = promises.clone();
            async move {
                promises
                    .create_promise("u:c", Duration::from_secs(30), None)
                    .await
            }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;

        // The first wait was rejected as superseded.
        assert!(first.is_finished());
        assert!(matches!(
            first.await.unwrap(),
            Err(FlowError::Discarded(reason)) if reason == REASON_SUPERSEDED
        ));

        // The second still resolves normally.
        state
            .set_request_data("request:u:c", &RequestRecord::resolved("second"))
            .await
            .unwrap();
        assert_eq!(
            second.await.unwrap().unwrap(),
            RequestRecord::resolved("second")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn consumption_is_idempotent() {
        let (promises, state, store) = setup();

        let waiter = tokio::spawn({
            let promises = promises.clone();
            async move {
                promises
                    .create_promise("u:c", Duration::from_secs(30), None)
                    .await
            }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        state
            .set_request_data("request:u:c", &RequestRecord::resolved("once"))
            .await
            .unwrap();
        waiter.await.unwrap().unwrap();
        assert!(!store.exists("request:u:c").await.unwrap());

        // A fresh wait for the same key must not re-observe the consumed
        // response; with nothing resolving it, it times out.
        let result = promises
            .create_promise("u:c", Duration::from_secs(1), None)
            .await;
        assert!(matches!(result, Err(FlowError::Timeout)));
    }
}
