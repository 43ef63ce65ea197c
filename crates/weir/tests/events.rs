//! Listener hooks observed through a shared collector.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use weir::{Engine, EvalError, Event, EventCollector, FunctionTag, Key, Outcome, Value};

const INPUT: FunctionTag = FunctionTag::new("input");
const DOUBLE: FunctionTag = FunctionTag::new("double");

fn int(n: i64) -> Arc<dyn Value> {
    Arc::new(n)
}

fn build(cell: &Arc<AtomicI64>, collector: &Arc<EventCollector>) -> Engine {
    Engine::builder()
        .workers(2)
        .listener(Arc::clone(collector))
        .register(INPUT, {
            let cell = Arc::clone(cell);
            move |_key: &Key, env: &mut weir::Environment<'_>| {
                env.post_event("reading input cell");
                Ok(int(cell.load(Ordering::SeqCst)))
            }
        })
        .register(DOUBLE, |_key: &Key, env: &mut weir::Environment<'_>| {
            let dep = env.intern(INPUT, ());
            match env.get_value(&dep) {
                Some(value) => Ok(int(value.downcast_ref::<i64>().unwrap() * 2)),
                None => Err(EvalError::Restart),
            }
        })
        .build()
}

fn outcomes_of(events: &[Event], key_repr: &str) -> Vec<Outcome> {
    events
        .iter()
        .filter_map(|e| match e {
            Event::NodeComputed { key, outcome } if key == key_repr => Some(*outcome),
            _ => None,
        })
        .collect()
}

#[test]
fn lifecycle_events_are_reported() {
    let cell = Arc::new(AtomicI64::new(3));
    let collector = Arc::new(EventCollector::new());
    let engine = build(&cell, &collector);
    let root = engine.intern(DOUBLE, ());

    engine.evaluate(std::slice::from_ref(&root), false);
    let events = collector.take();
    assert!(matches!(events.first(), Some(Event::EvaluationStarted { roots: 1, .. })));
    assert!(matches!(events.last(), Some(Event::EvaluationFinished { .. })));
    assert_eq!(outcomes_of(&events, "double(())"), vec![Outcome::Changed]);
    assert_eq!(outcomes_of(&events, "input(())"), vec![Outcome::Changed]);
    assert!(events
        .iter()
        .any(|e| matches!(e, Event::Diagnostic { message, .. } if message == "reading input cell")));

    // Unchanged input: the re-evaluated input reports Unchanged, the root a
    // clean hit.
    let input = engine.intern(INPUT, ());
    engine.invalidate(std::slice::from_ref(&input));
    let events_after_invalidate = collector.take();
    assert!(events_after_invalidate.iter().any(|e| matches!(
        e,
        Event::NodeInvalidated { changed: true, .. }
    )));

    engine.evaluate(std::slice::from_ref(&root), false);
    let events = collector.take();
    assert_eq!(outcomes_of(&events, "input(())"), vec![Outcome::Unchanged]);
    assert_eq!(outcomes_of(&events, "double(())"), vec![Outcome::CleanHit]);

    // Changed input: both recompute.
    cell.store(5, Ordering::SeqCst);
    engine.invalidate(std::slice::from_ref(&input));
    engine.evaluate(std::slice::from_ref(&root), false);
    let events = collector.take();
    assert_eq!(outcomes_of(&events, "input(())"), vec![Outcome::Changed]);
    assert_eq!(outcomes_of(&events, "double(())"), vec![Outcome::Changed]);
}

#[test]
fn cycle_events_name_the_members() {
    const LOOPY: FunctionTag = FunctionTag::new("loopy");
    let collector = Arc::new(EventCollector::new());
    let engine = Engine::builder()
        .workers(2)
        .listener(Arc::clone(&collector))
        .register(LOOPY, |key: &Key, env: &mut weir::Environment<'_>| {
            let next = env.intern(LOOPY, (key.arg::<u32>().unwrap() + 1) % 2);
            match env.get_value(&next) {
                Some(value) => Ok(Arc::clone(&value)),
                None => Err(EvalError::Restart),
            }
        })
        .build();

    let root = engine.intern(LOOPY, 0u32);
    engine.evaluate(std::slice::from_ref(&root), true);
    let events = collector.take();
    let cycle = events.iter().find_map(|e| match e {
        Event::CycleDetected { path } => Some(path.clone()),
        _ => None,
    });
    let cycle = cycle.expect("cycle event");
    assert_eq!(cycle.len(), 2);
    assert!(cycle.iter().all(|k| k.starts_with("loopy(")));
}
