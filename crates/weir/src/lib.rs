//! Weir: a dependency-graph-driven incremental evaluation engine.
//!
//! The engine memoizes pure, deterministic evaluator functions keyed by
//! typed, interned identifiers, and re-runs only what changed between
//! requests.
//!
//! # Key Features
//!
//! - **Restart protocol**: evaluators declare deps through an environment;
//!   missing deps suspend the node and the function is re-invoked once they
//!   finish, with no async coloring.
//! - **Parallel driver**: a fixed worker pool evaluates independent nodes
//!   concurrently, with deadlock-free progress and cycle detection.
//! - **Change pruning**: a rebuilt node whose value is unchanged stops the
//!   rebuild wave at itself.
//! - **Dirty checking**: affected nodes re-validate previous deps in
//!   declaration order and reuse their value when nothing changed.
//! - **Errors as values**: evaluation errors commit like values and
//!   propagate through the graph; keep-going mode collects them per root.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use weir::{Engine, EvalError, FunctionTag};
//!
//! const LEAF: FunctionTag = FunctionTag::new("leaf");
//! const SUM: FunctionTag = FunctionTag::new("sum");
//!
//! let engine = Engine::builder()
//!     .register(LEAF, |key: &weir::Key, _env: &mut weir::Environment<'_>| {
//!         let n = *key.arg::<i64>().expect("leaf keyed by i64");
//!         Ok(Arc::new(n) as Arc<dyn weir::Value>)
//!     })
//!     .register(SUM, |_key: &weir::Key, env: &mut weir::Environment<'_>| {
//!         let deps = [env.intern(LEAF, 1i64), env.intern(LEAF, 2i64)];
//!         let values = env.get_values(&deps);
//!         if env.values_missing() {
//!             return Err(EvalError::Restart);
//!         }
//!         let total: i64 = values
//!             .into_iter()
//!             .map(|v| *v.unwrap().downcast_ref::<i64>().unwrap())
//!             .sum();
//!         Ok(Arc::new(total) as Arc<dyn weir::Value>)
//!     })
//!     .build();
//!
//! let root = engine.intern(SUM, ());
//! let result = engine.evaluate(&[root.clone()], false);
//! assert_eq!(result.get(&root).unwrap().downcast_ref::<i64>(), Some(&3));
//! ```

mod cycles;
mod env;
mod error;
mod evaluator;
mod events;
mod interner;
mod key;
mod node;
mod runtime;
mod state;
mod store;
mod value;

pub use env::{Environment, ExternalDep};
pub use error::EvalError;
pub use evaluator::Evaluator;
pub use events::{Event, EventCollector, Listener, NoopListener, Outcome};
pub use interner::Interner;
pub use key::{Argument, FunctionTag, Key};
pub use node::Lifecycle;
pub use runtime::{CycleInfo, Engine, EngineBuilder, EvaluationResult};
pub use state::{ComputeState, WorkerEnv, WorkerThread};
pub use value::{NodeValue, Value, Version};
