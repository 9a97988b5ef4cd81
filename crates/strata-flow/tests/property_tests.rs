//! Property-based tests for selection closure and failure propagation over
//! randomly generated asset graphs.

use std::collections::HashSet;
use std::sync::Arc;

use proptest::prelude::*;
use tokio_test::block_on;

use strata_flow::prelude::*;
use strata_table::prelude::*;
use strata_test_utils::{FailingExecutor, StaticExecutor, TestContext, distance_rows, distance_schema};

/// A DAG over assets `0..n` where an edge `i -> j` only exists for `i < j`.
#[derive(Debug, Clone)]
struct RandomDag {
    n: usize,
    /// `upstream[j]` lists the upstream indices of asset `j`.
    upstream: Vec<Vec<usize>>,
}

impl RandomDag {
    fn key(i: usize) -> AssetKey {
        AssetKey::new("prop", format!("a{i}"))
    }

    fn index(key: &AssetKey) -> usize {
        key.name[1..].parse().unwrap()
    }

    fn reachable(&self, from: usize, downstream: bool) -> HashSet<usize> {
        let mut seen = HashSet::new();
        let mut stack = vec![from];
        while let Some(node) = stack.pop() {
            let next: Vec<usize> = if downstream {
                (0..self.n).filter(|j| self.upstream[*j].contains(&node)).collect()
            } else {
                self.upstream[node].clone()
            };
            for other in next {
                if seen.insert(other) {
                    stack.push(other);
                }
            }
        }
        seen
    }

    fn graph(&self, failing: &[bool]) -> AssetGraph {
        let mut builder = AssetGraph::builder();
        for j in 0..self.n {
            let key = Self::key(j);
            let executor: Arc<dyn AssetExecutor> = if failing[j] {
                Arc::new(FailingExecutor::new(format!("{key} broke")))
            } else {
                Arc::new(StaticExecutor::new(distance_rows(&[1])))
            };
            let ident = TableIdent::new(key.namespace.clone(), key.name.clone()).unwrap();
            let mut definition = AssetDefinition::new(
                key,
                TableTarget::new(ident, distance_schema()),
                executor,
            );
            for &i in &self.upstream[j] {
                definition = definition.depends_on(Self::key(i));
            }
            builder = builder.asset(definition);
        }
        builder.build().unwrap()
    }
}

fn dag_strategy() -> impl Strategy<Value = RandomDag> {
    (2usize..8)
        .prop_flat_map(|n| (Just(n), prop::collection::vec(any::<bool>(), n * (n - 1) / 2)))
        .prop_map(|(n, bits)| {
            let mut upstream = vec![Vec::new(); n];
            let mut bit = bits.into_iter();
            for (j, deps) in upstream.iter_mut().enumerate() {
                for i in 0..j {
                    if bit.next().unwrap_or(false) {
                        deps.push(i);
                    }
                }
            }
            RandomDag { n, upstream }
        })
}

fn case_strategy() -> impl Strategy<Value = (RandomDag, Vec<bool>, Vec<bool>, bool, bool)> {
    dag_strategy().prop_flat_map(|dag| {
        let n = dag.n;
        (
            Just(dag),
            prop::collection::vec(any::<bool>(), n),
            prop::collection::vec(any::<bool>(), n),
            any::<bool>(),
            any::<bool>(),
        )
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_closed_selection_is_complete_and_ordered(
        (dag, selected, _failing, upstream, downstream) in case_strategy()
    ) {
        let graph = dag.graph(&vec![false; dag.n]);
        let selection: Vec<AssetKey> = (0..dag.n)
            .filter(|i| selected[*i])
            .map(RandomDag::key)
            .collect();
        let mut options = SelectionOptions::exact();
        if upstream {
            options = options.with_upstream();
        }
        if downstream {
            options = options.with_downstream();
        }

        let order = graph.close_selection(&selection, options).unwrap();
        let got: Vec<usize> = order.iter().map(RandomDag::index).collect();

        let mut expected: HashSet<usize> = HashSet::new();
        for i in (0..dag.n).filter(|i| selected[*i]) {
            expected.insert(i);
            if upstream {
                expected.extend(dag.reachable(i, false));
            }
            if downstream {
                expected.extend(dag.reachable(i, true));
            }
        }
        let got_set: HashSet<usize> = got.iter().copied().collect();
        prop_assert_eq!(got.len(), got_set.len());
        prop_assert_eq!(&got_set, &expected);

        // Every upstream inside the closure comes first.
        for (pos, &j) in got.iter().enumerate() {
            for &i in &dag.upstream[j] {
                if let Some(up_pos) = got.iter().position(|x| *x == i) {
                    prop_assert!(up_pos < pos, "a{} ran before its upstream a{}", j, i);
                }
            }
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_failure_skips_exactly_the_transitive_downstream(
        (dag, _selected, failing, _upstream, _downstream) in case_strategy()
    ) {
        let states = block_on(async {
            let ctx = TestContext::new();
            let scheduler = ctx.scheduler_in_memory(dag.graph(&failing));
            let report = scheduler.run(RunRequest::all(scheduler.graph())).await.unwrap();
            (0..dag.n)
                .map(|j| report.unit(&RandomDag::key(j), None).unwrap().state)
                .collect::<Vec<UnitState>>()
        });

        let mut expected: Vec<UnitState> = Vec::with_capacity(dag.n);
        for j in 0..dag.n {
            let state = if dag.upstream[j]
                .iter()
                .any(|&i| expected[i] != UnitState::Succeeded)
            {
                UnitState::Skipped
            } else if failing[j] {
                UnitState::Failed
            } else {
                UnitState::Succeeded
            };
            expected.push(state);
        }
        prop_assert_eq!(&states, &expected);

        // Skipped assets are exactly those downstream of a failure.
        let failed: Vec<usize> = (0..dag.n).filter(|j| states[*j] == UnitState::Failed).collect();
        let mut downstream_of_failure = HashSet::new();
        for &f in &failed {
            downstream_of_failure.extend(dag.reachable(f, true));
        }
        let skipped: HashSet<usize> = (0..dag.n).filter(|j| states[*j] == UnitState::Skipped).collect();
        prop_assert_eq!(skipped, downstream_of_failure);
    }
}
