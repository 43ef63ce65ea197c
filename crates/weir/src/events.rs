//! Listener hooks for observing engine execution.
//!
//! The engine itself never logs; it reports through a [`Listener`] with
//! default no-op hooks. [`NoopListener`] is the zero-cost default and
//! [`EventCollector`] records [`Event`]s for tests and external tooling.

use parking_lot::Mutex;

use crate::key::Key;
use crate::value::Version;

/// What happened when a node finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Outcome {
    /// The evaluator ran and produced a value different from the previous
    /// one (or there was no previous one).
    Changed,
    /// The evaluator ran and reproduced the previous value; reverse deps
    /// are pruned.
    Unchanged,
    /// All previous deps verified unchanged; the previous value was
    /// re-committed without invoking the evaluator.
    CleanHit,
    /// The node committed an error payload.
    Error,
}

/// A recorded engine event.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Event {
    /// A top-level evaluation began.
    EvaluationStarted {
        /// Graph version of this evaluation.
        version: u64,
        /// Number of requested roots.
        roots: usize,
    },
    /// A top-level evaluation finished.
    EvaluationFinished {
        /// Graph version of this evaluation.
        version: u64,
    },
    /// A node committed.
    NodeComputed {
        /// Debug representation of the key.
        key: String,
        /// How the node finished.
        outcome: Outcome,
    },
    /// A node was marked dirty.
    NodeInvalidated {
        /// Debug representation of the key.
        key: String,
        /// True when the node's own inputs changed (forced re-evaluation),
        /// false when it was only transitively affected.
        changed: bool,
    },
    /// A dependency cycle was found.
    CycleDetected {
        /// Debug representations of the cycle members.
        path: Vec<String>,
    },
    /// An evaluator posted a diagnostic.
    Diagnostic {
        /// Debug representation of the posting key.
        key: String,
        /// Free-form message.
        message: String,
    },
}

/// Observer for engine execution.
///
/// All hooks default to no-ops; implementations override only what they
/// need. Implementations must be `Send + Sync`: hooks fire from worker
/// threads concurrently.
pub trait Listener: Send + Sync + 'static {
    /// A top-level evaluation began.
    #[inline]
    fn on_evaluation_started(&self, _version: Version, _roots: &[Key]) {}

    /// A top-level evaluation finished.
    #[inline]
    fn on_evaluation_finished(&self, _version: Version) {}

    /// A node committed with the given outcome.
    #[inline]
    fn on_node_computed(&self, _key: &Key, _outcome: Outcome) {}

    /// A node was marked dirty; `changed` distinguishes direct invalidation
    /// from transitive marking.
    #[inline]
    fn on_node_invalidated(&self, _key: &Key, _changed: bool) {}

    /// A dependency cycle was found.
    #[inline]
    fn on_cycle_detected(&self, _path: &[Key]) {}

    /// An evaluator posted a diagnostic through its environment.
    #[inline]
    fn on_diagnostic(&self, _key: &Key, _message: &str) {}
}

/// Listener that discards everything.
pub struct NoopListener;

impl Listener for NoopListener {}

/// Share one listener between the engine and the caller.
impl<L: Listener> Listener for std::sync::Arc<L> {
    fn on_evaluation_started(&self, version: Version, roots: &[Key]) {
        (**self).on_evaluation_started(version, roots);
    }

    fn on_evaluation_finished(&self, version: Version) {
        (**self).on_evaluation_finished(version);
    }

    fn on_node_computed(&self, key: &Key, outcome: Outcome) {
        (**self).on_node_computed(key, outcome);
    }

    fn on_node_invalidated(&self, key: &Key, changed: bool) {
        (**self).on_node_invalidated(key, changed);
    }

    fn on_cycle_detected(&self, path: &[Key]) {
        (**self).on_cycle_detected(path);
    }

    fn on_diagnostic(&self, key: &Key, message: &str) {
        (**self).on_diagnostic(key, message);
    }
}

/// Listener that records every hook as an [`Event`].
#[derive(Default)]
pub struct EventCollector {
    events: Mutex<Vec<Event>>,
}

impl EventCollector {
    /// Create an empty collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot the recorded events.
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    /// Drain and return the recorded events.
    pub fn take(&self) -> Vec<Event> {
        std::mem::take(&mut self.events.lock())
    }

    fn push(&self, event: Event) {
        self.events.lock().push(event);
    }
}

impl Listener for EventCollector {
    fn on_evaluation_started(&self, version: Version, roots: &[Key]) {
        self.push(Event::EvaluationStarted {
            version: version.0,
            roots: roots.len(),
        });
    }

    fn on_evaluation_finished(&self, version: Version) {
        self.push(Event::EvaluationFinished { version: version.0 });
    }

    fn on_node_computed(&self, key: &Key, outcome: Outcome) {
        self.push(Event::NodeComputed {
            key: format!("{key:?}"),
            outcome,
        });
    }

    fn on_node_invalidated(&self, key: &Key, changed: bool) {
        self.push(Event::NodeInvalidated {
            key: format!("{key:?}"),
            changed,
        });
    }

    fn on_cycle_detected(&self, path: &[Key]) {
        self.push(Event::CycleDetected {
            path: path.iter().map(|k| format!("{k:?}")).collect(),
        });
    }

    fn on_diagnostic(&self, key: &Key, message: &str) {
        self.push(Event::Diagnostic {
            key: format!("{key:?}"),
            message: message.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::FunctionTag;

    #[test]
    fn collector_records_in_order() {
        let collector = EventCollector::new();
        let key = Key::from_parts(FunctionTag::new("t"), Box::new(1u32));
        collector.on_evaluation_started(Version(1), std::slice::from_ref(&key));
        collector.on_node_computed(&key, Outcome::Changed);
        collector.on_evaluation_finished(Version(1));

        let events = collector.take();
        assert_eq!(events.len(), 3);
        assert_eq!(
            events[1],
            Event::NodeComputed {
                key: "t(1)".to_string(),
                outcome: Outcome::Changed,
            }
        );
        assert!(collector.events().is_empty());
    }

    #[test]
    fn listener_object_safety() {
        let _: Box<dyn Listener> = Box::new(NoopListener);
        let _: Box<dyn Listener> = Box::new(EventCollector::new());
    }
}
