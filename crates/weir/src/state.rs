//! Per-key compute state and the worker-thread handoff for long
//! evaluations.

use std::any::Any;
use std::sync::mpsc;
use std::sync::Arc;

use papaya::HashMap;
use parking_lot::Mutex;

use crate::env::Environment;
use crate::error::EvalError;
use crate::key::Key;
use crate::value::Value;

/// State attached to a key for the duration of one evaluation.
///
/// Created through [`Environment::get_state`], the state object survives
/// restarts of the evaluator but not the node's commit: the engine closes
/// and discards it when the node finishes, is cancelled, or is deleted.
pub trait ComputeState: Any + Send + Sync {
    /// Cooperative teardown; called once when the state is discarded.
    fn close(&self) {}
}

struct StateHolder {
    state: Arc<dyn Any + Send + Sync>,
    close: Box<dyn Fn() + Send + Sync>,
}

/// Key -> compute state table.
pub(crate) struct StateMap {
    states: HashMap<Key, Arc<StateHolder>, ahash::RandomState>,
}

impl StateMap {
    pub(crate) fn new() -> Self {
        Self {
            states: HashMap::with_hasher(ahash::RandomState::new()),
        }
    }

    pub(crate) fn get_or_create<S, F>(&self, key: &Key, factory: F) -> Arc<S>
    where
        S: ComputeState,
        F: FnOnce() -> S,
    {
        let pinned = self.states.pin();
        if let Some(holder) = pinned.get(key) {
            if let Ok(state) = Arc::clone(&holder.state).downcast::<S>() {
                return state;
            }
        }
        // A node runs on one worker at a time, so a race here would be a
        // scheduling bug; last write wins regardless.
        let state = Arc::new(factory());
        let for_close = Arc::clone(&state);
        let holder = Arc::new(StateHolder {
            state: Arc::clone(&state) as Arc<dyn Any + Send + Sync>,
            close: Box::new(move || for_close.close()),
        });
        pinned.insert(key.clone(), holder);
        state
    }

    /// Close and drop the state for `key`; returns whether one existed.
    pub(crate) fn discard(&self, key: &Key) -> bool {
        let removed = self.states.pin().remove(key).map(Arc::clone);
        match removed {
            Some(holder) => {
                (holder.close)();
                true
            }
            None => false,
        }
    }

    /// Close and drop every state; used when an evaluation aborts.
    pub(crate) fn discard_all(&self) {
        let pinned = self.states.pin();
        for (_, holder) in pinned.iter() {
            (holder.close)();
        }
        pinned.clear();
    }
}

enum WorkerMessage {
    /// The worker needs these dep values before it can continue.
    Need(Vec<Key>),
    /// The worker finished, successfully or otherwise.
    Done(Result<Arc<dyn Value>, EvalError>),
}

type WorkerReply = Vec<Result<Arc<dyn Value>, EvalError>>;

/// Environment handed to the worker closure of a [`WorkerThread`].
///
/// Requests block until the host delivers the values, across as many
/// engine-level restarts as needed; the worker never observes a missing
/// dep. Requests fail with [`EvalError::Cancelled`] once the owning state
/// is closed.
pub struct WorkerEnv {
    requests: mpsc::SyncSender<WorkerMessage>,
    replies: mpsc::Receiver<WorkerReply>,
}

impl WorkerEnv {
    /// Fetch one dep value, blocking until the host can supply it.
    pub fn get_value(&self, key: &Key) -> Result<Arc<dyn Value>, EvalError> {
        let mut values = self.get_values(std::slice::from_ref(key))?;
        Ok(values.pop().expect("one reply per requested key"))
    }

    /// Fetch a group of dep values, blocking until all are available.
    pub fn get_values(&self, keys: &[Key]) -> Result<Vec<Arc<dyn Value>>, EvalError> {
        self.requests
            .send(WorkerMessage::Need(keys.to_vec()))
            .map_err(|_| EvalError::Cancelled)?;
        let replies = self.replies.recv().map_err(|_| EvalError::Cancelled)?;
        replies.into_iter().collect()
    }
}

struct WorkerHandle {
    requests: mpsc::Receiver<WorkerMessage>,
    replies: mpsc::SyncSender<WorkerReply>,
    /// A dep request the host could not answer yet (restart pending).
    pending: Option<Vec<Key>>,
    join: Option<std::thread::JoinHandle<()>>,
}

/// Compute state that runs an evaluator body on a dedicated thread.
///
/// Some evaluators cannot cheaply return between dep requests (a fetch
/// interleaving I/O with key lookups). `WorkerThread` keeps such a body
/// running: the worker asks for dep values over a bounded channel; the host
/// answers from its current environment or returns the restart sentinel and
/// resumes the conversation on the next invocation. One logical invocation
/// of the body exists end-to-end. Closing the state interrupts the worker
/// cooperatively.
pub struct WorkerThread {
    inner: Mutex<Option<WorkerHandle>>,
}

impl Default for WorkerThread {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerThread {
    /// Create an idle handoff; the worker thread starts on the first
    /// [`step`](WorkerThread::step).
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(None),
        }
    }

    /// Drive the worker with the current environment. Starts the worker on
    /// first call; afterwards `work` is ignored and the existing worker is
    /// resumed. Returns the worker's result, or [`EvalError::Restart`] when
    /// the worker needs deps the environment cannot supply yet.
    pub fn step<F>(
        &self,
        env: &mut Environment<'_>,
        work: F,
    ) -> Result<Arc<dyn Value>, EvalError>
    where
        F: FnOnce(WorkerEnv) -> Result<Arc<dyn Value>, EvalError> + Send + 'static,
    {
        let mut guard = self.inner.lock();
        if guard.is_none() {
            // Size-1 channels: the worker blocks right after sending, and a
            // bounded queue keeps the host from hanging if the worker is
            // interrupted between a send and the next restart.
            let (request_tx, request_rx) = mpsc::sync_channel(1);
            let (reply_tx, reply_rx) = mpsc::sync_channel(1);
            let worker_env = WorkerEnv {
                requests: request_tx.clone(),
                replies: reply_rx,
            };
            let join = std::thread::Builder::new()
                .name("weir-worker".to_string())
                .spawn(move || {
                    let result = work(worker_env);
                    let _ = request_tx.send(WorkerMessage::Done(result));
                })
                .map_err(|e| EvalError::Evaluation {
                    key: format!("{:?}", env.key()),
                    message: format!("failed to spawn worker thread: {e}"),
                    source: None,
                })?;
            *guard = Some(WorkerHandle {
                requests: request_rx,
                replies: reply_tx,
                pending: None,
                join: Some(join),
            });
        }
        loop {
            let handle = guard.as_mut().expect("worker handle present");
            if let Some(keys) = handle.pending.take() {
                match answer(env, &keys) {
                    Some(replies) => {
                        if handle.replies.send(replies).is_err() {
                            *guard = None;
                            return Err(EvalError::Cancelled);
                        }
                    }
                    None => {
                        handle.pending = Some(keys);
                        return Err(EvalError::Restart);
                    }
                }
            }
            let message = handle.requests.recv();
            match message {
                Ok(WorkerMessage::Need(keys)) => {
                    handle.pending = Some(keys);
                }
                Ok(WorkerMessage::Done(result)) => {
                    if let Some(mut handle) = guard.take() {
                        if let Some(join) = handle.join.take() {
                            let _ = join.join();
                        }
                    }
                    return result;
                }
                Err(_) => {
                    *guard = None;
                    return Err(EvalError::Cancelled);
                }
            }
        }
    }
}

/// Resolve a dep request against the host environment. `None` means some
/// dep is not done yet and the host must restart.
fn answer(env: &mut Environment<'_>, keys: &[Key]) -> Option<WorkerReply> {
    // Declare the whole group first so a restart re-requests all of it.
    let values = env.get_values(keys);
    let mut replies = Vec::with_capacity(keys.len());
    for (key, value) in keys.iter().zip(values) {
        match value {
            Some(value) => replies.push(Ok(value)),
            None => match env.dep_error_for(key) {
                Some(error) => replies.push(Err(error)),
                None => return None,
            },
        }
    }
    Some(replies)
}

impl ComputeState for WorkerThread {
    fn close(&self) {
        let handle = self.inner.lock().take();
        if let Some(mut handle) = handle {
            // Dropping the channel ends make every worker-side call fail
            // with Cancelled; then wait for the thread to notice.
            drop(handle.requests);
            drop(handle.replies);
            if let Some(join) = handle.join.take() {
                let _ = join.join();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counted {
        closed: Arc<AtomicUsize>,
    }

    impl ComputeState for Counted {
        fn close(&self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn key(n: u32) -> Key {
        Key::from_parts(crate::FunctionTag::new("state-test"), Box::new(n))
    }

    #[test]
    fn state_survives_lookups_and_closes_once() {
        let map = StateMap::new();
        let closed = Arc::new(AtomicUsize::new(0));
        let k = key(1);
        let first = map.get_or_create(&k, || Counted {
            closed: Arc::clone(&closed),
        });
        let second = map.get_or_create(&k, || Counted {
            closed: Arc::new(AtomicUsize::new(0)),
        });
        assert!(Arc::ptr_eq(&first, &second));
        assert!(map.discard(&k));
        assert!(!map.discard(&k));
        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn discard_all_closes_everything() {
        let map = StateMap::new();
        let closed = Arc::new(AtomicUsize::new(0));
        for n in 0..3 {
            let closed = Arc::clone(&closed);
            map.get_or_create(&key(n), move || Counted { closed });
        }
        map.discard_all();
        assert_eq!(closed.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn closing_an_idle_worker_thread_is_a_noop() {
        let worker = WorkerThread::new();
        worker.close();
    }
}
