//! Randomized layered-graph stress test against a sequential oracle.
//!
//! Builds a deterministic layered DAG with pseudo-random edges, then runs
//! rounds of input mutations + parallel evaluation, checking every node
//! against a straightforward sequential recomputation.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use weir::{Engine, EvalError, FunctionTag, Key, Value};

const INPUT: FunctionTag = FunctionTag::new("input");
const DERIVED: FunctionTag = FunctionTag::new("derived");

const LAYERS: usize = 6;
const WIDTH: usize = 16;
const ROUNDS: usize = 8;

/// Edges from (layer, slot) to slots in the previous layer; layer 0 has
/// none. Generated once from a fixed seed so evaluators stay pure.
fn edge_table(rng: &mut StdRng) -> Vec<Vec<Vec<usize>>> {
    (0..LAYERS)
        .map(|layer| {
            (0..WIDTH)
                .map(|_| {
                    if layer == 0 {
                        return Vec::new();
                    }
                    let fanin = rng.gen_range(1..=4.min(WIDTH));
                    let mut deps: Vec<usize> =
                        (0..fanin).map(|_| rng.gen_range(0..WIDTH)).collect();
                    deps.sort_unstable();
                    deps.dedup();
                    deps
                })
                .collect()
        })
        .collect()
}

fn oracle(edges: &[Vec<Vec<usize>>], inputs: &[i64]) -> Vec<Vec<i64>> {
    let mut values = vec![vec![0i64; WIDTH]; LAYERS];
    for slot in 0..WIDTH {
        values[0][slot] = inputs[slot];
    }
    for layer in 1..LAYERS {
        for slot in 0..WIDTH {
            let sum: i64 = edges[layer][slot]
                .iter()
                .map(|&dep| values[layer - 1][dep])
                .sum();
            values[layer][slot] = sum + (layer * WIDTH + slot) as i64;
        }
    }
    values
}

#[test]
fn random_mutations_match_the_oracle() {
    let mut rng = StdRng::seed_from_u64(0x5eed);
    let edges = Arc::new(edge_table(&mut rng));
    let cells: Arc<Vec<AtomicI64>> =
        Arc::new((0..WIDTH).map(|i| AtomicI64::new(i as i64)).collect());

    let engine = Engine::builder()
        .workers(8)
        .register(INPUT, {
            let cells = Arc::clone(&cells);
            move |key: &Key, _env: &mut weir::Environment<'_>| {
                let slot = *key.arg::<usize>().expect("input slot");
                Ok(Arc::new(cells[slot].load(Ordering::SeqCst)) as Arc<dyn Value>)
            }
        })
        .register(DERIVED, {
            let edges = Arc::clone(&edges);
            move |key: &Key, env: &mut weir::Environment<'_>| {
                let (layer, slot) = *key.arg::<(usize, usize)>().expect("coordinates");
                let deps: Vec<Key> = edges[layer][slot]
                    .iter()
                    .map(|&dep| {
                        if layer == 1 {
                            env.intern(INPUT, dep)
                        } else {
                            env.intern(DERIVED, (layer - 1, dep))
                        }
                    })
                    .collect();
                let values = env.get_values(&deps);
                if env.values_missing() {
                    return Err(EvalError::Restart);
                }
                let sum: i64 = values
                    .into_iter()
                    .map(|v| *v.unwrap().downcast_ref::<i64>().unwrap())
                    .sum();
                Ok(Arc::new(sum + (layer * WIDTH + slot) as i64) as Arc<dyn Value>)
            }
        })
        .build();

    let roots: Vec<Key> = (0..WIDTH)
        .map(|slot| engine.intern(DERIVED, (LAYERS - 1, slot)))
        .collect();

    for round in 0..ROUNDS {
        // Mutate a few inputs and report them changed.
        if round > 0 {
            let mutations = rng.gen_range(1..=WIDTH / 2);
            let mut changed = Vec::new();
            for _ in 0..mutations {
                let slot = rng.gen_range(0..WIDTH);
                cells[slot].store(rng.gen_range(-100..100), Ordering::SeqCst);
                changed.push(engine.intern(INPUT, slot));
            }
            engine.invalidate(&changed);
        }

        let result = engine.evaluate(&roots, false);
        assert!(!result.has_error(), "round {round}: {result:?}");

        let inputs: Vec<i64> = (0..WIDTH)
            .map(|slot| cells[slot].load(Ordering::SeqCst))
            .collect();
        let expected = oracle(&edges, &inputs);
        for (slot, root) in roots.iter().enumerate() {
            assert_eq!(
                result.get(root).map(|v| *v.downcast_ref::<i64>().unwrap()),
                Some(expected[LAYERS - 1][slot]),
                "round {round}, root slot {slot}"
            );
        }

        // Spot-check edge symmetry on interior nodes.
        for slot in 0..WIDTH {
            let key = engine.intern(DERIVED, (2usize, slot));
            if let Some(deps) = engine.committed_deps(&key) {
                for dep in deps {
                    assert!(
                        engine.reverse_deps(&dep).unwrap().contains(&key),
                        "round {round}: missing reverse edge {dep:?} -> {key:?}"
                    );
                }
            }
        }
    }
}
