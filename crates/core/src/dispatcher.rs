//! Request dispatcher: correlates asynchronous gateway callbacks with the call
//! sites waiting on them.
//!
//! A gateway client performs network I/O on its own thread and reports answers
//! through callbacks tagged with the request id it was given. The dispatcher
//! sits between that thread and application code:
//!
//! 1. the caller allocates an id with [`Dispatcher::next_id`],
//! 2. registers it with [`Dispatcher::register`],
//! 3. submits the request to the gateway using that id,
//! 4. blocks in [`Dispatcher::wait`] (or awaits [`Dispatcher::wait_async`]).
//!
//! Meanwhile the gateway thread calls [`Dispatcher::push_result`] for each
//! row/item and [`Dispatcher::signal_complete`] when the request ends. None of
//! the callback-side operations can fail: unknown ids are ignored so a late or
//! stray delivery never takes the I/O thread down.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//! use ibkr_bridge_core::{Dispatcher, WaitOutcome};
//!
//! let dispatcher = Arc::new(Dispatcher::<String>::default());
//! let req_id = dispatcher.next_id().unwrap();
//! dispatcher.register(req_id);
//!
//! let gateway = Arc::clone(&dispatcher);
//! std::thread::spawn(move || {
//!     gateway.push_result(req_id, "row 1".to_string());
//!     gateway.push_result(req_id, "row 2".to_string());
//!     gateway.signal_complete(req_id);
//! });
//!
//! let outcome = dispatcher.collect(req_id, Duration::from_secs(5));
//! assert_eq!(
//!     outcome,
//!     WaitOutcome::Delivered(vec!["row 1".to_string(), "row 2".to_string()])
//! );
//! ```

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::config::DispatcherConfig;
use crate::error::IdError;
use crate::outcome::WaitOutcome;
use crate::request_id::{RequestId, RequestIdAllocator};

/// Upper bound applied to every wait so a huge timeout cannot block forever.
pub const MAX_WAIT: Duration = Duration::from_secs(24 * 60 * 60);

/// Push-style consumer invoked with each value delivered for its request.
pub type Handler<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct PendingRequest<T> {
    handler: Option<Handler<T>>,
    done: bool,
    rejection: Option<(i32, String)>,
    results: Vec<T>,
    notify: Arc<Notify>,
}

impl<T: Clone> PendingRequest<T> {
    fn new(handler: Option<Handler<T>>) -> Self {
        Self {
            handler,
            done: false,
            rejection: None,
            results: Vec::new(),
            notify: Arc::new(Notify::new()),
        }
    }

    fn settled(&self) -> Option<WaitOutcome<T>> {
        if !self.done {
            return None;
        }
        Some(match &self.rejection {
            Some((code, message)) => WaitOutcome::Rejected {
                code: *code,
                message: message.clone(),
                partial: self.results.clone(),
            },
            None => WaitOutcome::Delivered(self.results.clone()),
        })
    }
}

enum Probe<T> {
    Settled(WaitOutcome<T>),
    Pending(Arc<Notify>),
}

/// Per-connection request bookkeeping.
///
/// One coarse lock guards the whole id → state map; waits park on a condition
/// variable (blocking callers) or a per-request [`Notify`] (async callers).
pub struct Dispatcher<T> {
    ids: RequestIdAllocator,
    default_timeout: Duration,
    pending: Mutex<HashMap<RequestId, PendingRequest<T>>>,
    completed: Condvar,
}

impl<T> std::fmt::Debug for Dispatcher<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("ids", &self.ids)
            .field("default_timeout", &self.default_timeout)
            .field("pending", &self.pending.lock().len())
            .finish()
    }
}

impl<T: Clone + Send + 'static> Default for Dispatcher<T> {
    fn default() -> Self {
        Self::with_allocator(
            RequestIdAllocator::default(),
            DispatcherConfig::default().default_timeout,
        )
    }
}

impl<T: Clone + Send + 'static> Dispatcher<T> {
    /// # Errors
    ///
    /// Returns [`IdError::InvalidSeed`] when `config.id_seed` is negative or
    /// leaves too little room below `i32::MAX`.
    pub fn new(config: &DispatcherConfig) -> Result<Self, IdError> {
        Ok(Self::with_allocator(
            RequestIdAllocator::new(config.id_seed)?,
            config.default_timeout,
        ))
    }

    fn with_allocator(ids: RequestIdAllocator, default_timeout: Duration) -> Self {
        Self {
            ids,
            default_timeout,
            pending: Mutex::new(HashMap::new()),
            completed: Condvar::new(),
        }
    }

    /// Allocates a fresh request id. Safe from any thread.
    ///
    /// # Errors
    ///
    /// Returns [`IdError::Exhausted`] once every id up to `i32::MAX` has been
    /// handed out; ids are never reused.
    pub fn next_id(&self) -> Result<RequestId, IdError> {
        self.ids.next()
    }

    /// Timeout used by [`Dispatcher::wait_default`].
    #[must_use]
    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Creates an unset completion signal and an empty result list for `req_id`.
    ///
    /// Registering an id that is already pending resets its state.
    pub fn register(&self, req_id: RequestId) {
        self.insert(req_id, None);
    }

    /// Like [`Dispatcher::register`], also storing a handler that
    /// [`Dispatcher::dispatch`] invokes for each delivered value.
    pub fn register_with_handler<F>(&self, req_id: RequestId, handler: F)
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.insert(req_id, Some(Arc::new(handler)));
    }

    fn insert(&self, req_id: RequestId, handler: Option<Handler<T>>) {
        let mut pending = self.pending.lock();
        match pending.entry(req_id) {
            Entry::Occupied(mut slot) => {
                let entry = slot.get_mut();
                entry.handler = handler;
                entry.done = false;
                entry.rejection = None;
                entry.results.clear();
                debug!(req_id = %req_id, "Re-registered pending request");
            }
            Entry::Vacant(slot) => {
                slot.insert(PendingRequest::new(handler));
                debug!(req_id = %req_id, "Registered request");
            }
        }
    }

    /// Appends `value` to the results for `req_id`.
    ///
    /// Values for ids that are not registered are dropped. Returns whether the
    /// value was recorded.
    pub fn push_result(&self, req_id: RequestId, value: T) -> bool {
        let mut pending = self.pending.lock();
        match pending.get_mut(&req_id) {
            Some(entry) => {
                entry.results.push(value);
                true
            }
            None => {
                debug!(req_id = %req_id, "Dropping result for unregistered request");
                false
            }
        }
    }

    /// Marks `req_id` complete and wakes its waiters. Idempotent.
    pub fn signal_complete(&self, req_id: RequestId) {
        let mut pending = self.pending.lock();
        let Some(entry) = pending.get_mut(&req_id) else {
            debug!(req_id = %req_id, "Completion for unregistered request ignored");
            return;
        };
        entry.done = true;
        entry.notify.notify_waiters();
        self.completed.notify_all();
    }

    /// Records a gateway error for `req_id` and completes it.
    ///
    /// The first rejection wins; values already collected are kept.
    pub fn reject(&self, req_id: RequestId, code: i32, message: impl Into<String>) {
        let mut pending = self.pending.lock();
        let Some(entry) = pending.get_mut(&req_id) else {
            debug!(req_id = %req_id, code, "Rejection for unregistered request ignored");
            return;
        };
        if entry.rejection.is_none() && !entry.done {
            entry.rejection = Some((code, message.into()));
        }
        entry.done = true;
        entry.notify.notify_waiters();
        self.completed.notify_all();
    }

    /// Invokes the handler registered for `req_id`, if any.
    ///
    /// The handler runs on the calling thread without the dispatcher lock held,
    /// so it may call back into the dispatcher. A panicking handler is logged
    /// and contained. Returns whether a handler ran.
    pub fn dispatch(&self, req_id: RequestId, value: &T) -> bool {
        let handler = self
            .pending
            .lock()
            .get(&req_id)
            .and_then(|entry| entry.handler.clone());
        let Some(handler) = handler else {
            return false;
        };
        if panic::catch_unwind(AssertUnwindSafe(|| handler(value))).is_err() {
            warn!(req_id = %req_id, "Request handler panicked");
        }
        true
    }

    /// Blocks until `req_id` completes or `timeout` elapses.
    ///
    /// Returns [`WaitOutcome::Unregistered`] immediately when nothing is
    /// registered under the id, and also if the id is cleared mid-wait.
    pub fn wait(&self, req_id: RequestId, timeout: Duration) -> WaitOutcome<T> {
        let deadline = Instant::now() + timeout.min(MAX_WAIT);
        let mut pending = self.pending.lock();
        loop {
            let Some(entry) = pending.get(&req_id) else {
                return WaitOutcome::Unregistered;
            };
            if let Some(outcome) = entry.settled() {
                return outcome;
            }
            if self.completed.wait_until(&mut pending, deadline).timed_out() {
                return match pending.get(&req_id) {
                    Some(entry) => entry
                        .settled()
                        .unwrap_or_else(|| timed_out(req_id, timeout, &entry.results)),
                    None => WaitOutcome::Unregistered,
                };
            }
        }
    }

    /// [`Dispatcher::wait`] with the configured default timeout.
    pub fn wait_default(&self, req_id: RequestId) -> WaitOutcome<T> {
        self.wait(req_id, self.default_timeout)
    }

    /// Async counterpart of [`Dispatcher::wait`]; parks the task, not the thread.
    pub async fn wait_async(&self, req_id: RequestId, timeout: Duration) -> WaitOutcome<T> {
        let deadline = tokio::time::Instant::now() + timeout.min(MAX_WAIT);
        loop {
            let notify = match self.probe(req_id) {
                Probe::Settled(outcome) => return outcome,
                Probe::Pending(notify) => notify,
            };
            let notified = notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            // A completion may have landed between the probe and `enable`.
            if let Probe::Settled(outcome) = self.probe(req_id) {
                return outcome;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.expire(req_id, timeout);
            }
        }
    }

    /// Waits, then clears `req_id` regardless of the outcome.
    pub fn collect(&self, req_id: RequestId, timeout: Duration) -> WaitOutcome<T> {
        let outcome = self.wait(req_id, timeout);
        self.clear(req_id);
        outcome
    }

    /// Async counterpart of [`Dispatcher::collect`].
    pub async fn collect_async(&self, req_id: RequestId, timeout: Duration) -> WaitOutcome<T> {
        let outcome = self.wait_async(req_id, timeout).await;
        self.clear(req_id);
        outcome
    }

    fn probe(&self, req_id: RequestId) -> Probe<T> {
        let pending = self.pending.lock();
        match pending.get(&req_id) {
            None => Probe::Settled(WaitOutcome::Unregistered),
            Some(entry) => match entry.settled() {
                Some(outcome) => Probe::Settled(outcome),
                None => Probe::Pending(Arc::clone(&entry.notify)),
            },
        }
    }

    fn expire(&self, req_id: RequestId, timeout: Duration) -> WaitOutcome<T> {
        let pending = self.pending.lock();
        match pending.get(&req_id) {
            Some(entry) => entry
                .settled()
                .unwrap_or_else(|| timed_out(req_id, timeout, &entry.results)),
            None => WaitOutcome::Unregistered,
        }
    }

    /// Removes all bookkeeping for `req_id` and releases anyone waiting on it.
    /// Returns whether anything was removed.
    pub fn clear(&self, req_id: RequestId) -> bool {
        let removed = self.pending.lock().remove(&req_id);
        match removed {
            Some(entry) => {
                entry.notify.notify_waiters();
                self.completed.notify_all();
                debug!(req_id = %req_id, "Cleared request");
                true
            }
            None => false,
        }
    }

    /// Drops every pending request and rewinds the id counter.
    ///
    /// Only meant for test isolation; in-flight requests lose their state.
    pub fn reset(&self) {
        let drained: Vec<_> = {
            let mut pending = self.pending.lock();
            pending.drain().map(|(_, entry)| entry.notify).collect()
        };
        for notify in drained {
            notify.notify_waiters();
        }
        self.completed.notify_all();
        self.ids.rewind();
        debug!("Dispatcher reset");
    }

    /// Whether `req_id` currently has bookkeeping.
    #[must_use]
    pub fn is_registered(&self, req_id: RequestId) -> bool {
        self.pending.lock().contains_key(&req_id)
    }

    /// Number of registered, not yet cleared ids.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Copy of every pending id's collected values, for inspection in tests.
    #[must_use]
    pub fn snapshot(&self) -> HashMap<RequestId, Vec<T>> {
        self.pending
            .lock()
            .iter()
            .map(|(req_id, entry)| (*req_id, entry.results.clone()))
            .collect()
    }
}

fn timed_out<T: Clone>(req_id: RequestId, timeout: Duration, results: &[T]) -> WaitOutcome<T> {
    warn!(
        req_id = %req_id,
        timeout = ?timeout,
        partial = results.len(),
        "Request timed out"
    );
    WaitOutcome::TimedOut(results.to_vec())
}
