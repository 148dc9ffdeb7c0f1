//! Property tests over random delivery schedules.
//!
//! ```text
//! proptest generates: Vec<Operation>
//!                          │
//!                          ▼
//!         Cluster (checks mutual exclusion every step)
//!                          │
//!                          ▼
//!     settle: deliver everything, release holders, repeat
//!                          │
//!                          ▼
//!        every request completed, queues drained
//! ```

use maekawa_core::{QuorumTable, RequestEntry, RequesterState};
use maekawa_harness::{Cluster, scenario::oracle};
use maekawa_proto::{MessageKind, NodeId};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Operation {
    Request(NodeId),
    Release(NodeId),
    Deliver(usize),
    DuplicateRequest(usize),
}

fn operation_strategy(nodes: usize) -> impl Strategy<Value = Operation> {
    let node = 0..nodes as NodeId;
    prop_oneof![
        2 => node.clone().prop_map(Operation::Request),
        2 => node.prop_map(Operation::Release),
        8 => any::<usize>().prop_map(Operation::Deliver),
        1 => any::<usize>().prop_map(Operation::DuplicateRequest),
    ]
}

fn table_strategy() -> impl Strategy<Value = QuorumTable> {
    prop_oneof![
        (3..6usize).prop_map(|n| QuorumTable::all_others(n).unwrap()),
        Just(QuorumTable::maekawa_four()),
    ]
}

/// Apply `op` if it is legal in the current state. Illegal operations are
/// skipped rather than failed.
fn apply(cluster: &mut Cluster, op: &Operation) -> Result<(), TestCaseError> {
    let result = match *op {
        Operation::Request(id) => {
            let Some(node) = cluster.node(id) else { return Ok(()) };
            if node.requester_state() != RequesterState::Idle {
                return Ok(());
            }
            cluster.request(id)
        },
        Operation::Release(id) => {
            let Some(node) = cluster.node(id) else { return Ok(()) };
            if !node.in_critical_section() {
                return Ok(());
            }
            cluster.release(id)
        },
        Operation::Deliver(index) => cluster.deliver_nth(index).map(drop),
        Operation::DuplicateRequest(index) => {
            let busy = cluster.busy_links();
            if busy.is_empty() {
                return Ok(());
            }
            let (from, to) = busy[index % busy.len()];
            let head_is_request =
                cluster.in_flight(from, to).first().is_some_and(|m| m.kind() == MessageKind::Request);
            if !head_is_request {
                return Ok(());
            }
            cluster.duplicate(from, to).map(drop)
        },
    };
    result.map_err(|e| TestCaseError::fail(format!("{op:?} failed: {e}")))
}

/// Deliver everything and let each holder release, until nothing is left.
fn settle(cluster: &mut Cluster) -> Result<(), TestCaseError> {
    for _ in 0..10_000 {
        cluster.deliver_all().map_err(|e| TestCaseError::fail(e.to_string()))?;
        match cluster.holders().first() {
            Some(&holder) => cluster.release(holder).map_err(|e| TestCaseError::fail(e.to_string()))?,
            None => return Ok(()),
        }
    }
    Err(TestCaseError::fail("cluster did not settle"))
}

proptest! {
    /// Safety and liveness: no schedule puts two nodes in the critical
    /// section, and once messages flow freely every request completes.
    #[test]
    fn prop_exclusive_and_live(
        table in table_strategy(),
        ops in prop::collection::vec(operation_strategy(5), 0..200)
    ) {
        let mut cluster = Cluster::new(&table);
        for op in &ops {
            apply(&mut cluster, op)?;
        }

        settle(&mut cluster)?;

        for node in cluster.nodes() {
            prop_assert_eq!(node.requester_state(), RequesterState::Idle, "node {} stuck", node.id());
        }
        oracle::queues_drained()(&cluster).map_err(TestCaseError::fail)?;
    }

    /// A RELEASE from the holder passes the token to the smallest queued
    /// `(timestamp, node)`.
    #[test]
    fn prop_release_grants_smallest_queued(
        table in table_strategy(),
        ops in prop::collection::vec(operation_strategy(5), 0..200)
    ) {
        let mut cluster = Cluster::new(&table);
        for op in &ops {
            let Operation::Deliver(index) = *op else {
                apply(&mut cluster, op)?;
                continue;
            };

            let busy = cluster.busy_links();
            if busy.is_empty() {
                continue;
            }
            let (from, to) = busy[index % busy.len()];
            let head = cluster.in_flight(from, to)[0].clone();
            let gatekeeper = cluster.node(to).unwrap();
            let releases_holder = head.kind() == MessageKind::Release
                && gatekeeper.grantor().granted().is_some_and(|g: RequestEntry| g.node == from);
            let expected = gatekeeper.grantor().queue().next();

            cluster.deliver(from, to).map_err(|e| TestCaseError::fail(e.to_string()))?;

            if releases_holder {
                prop_assert_eq!(cluster.node(to).unwrap().grantor().granted(), expected);
            }
        }
    }

    /// Lamport clocks never go backwards, and the receiver's clock strictly
    /// increases on every delivery.
    #[test]
    fn prop_clocks_monotonic(
        table in table_strategy(),
        ops in prop::collection::vec(operation_strategy(5), 0..200)
    ) {
        let mut cluster = Cluster::new(&table);
        for op in &ops {
            let before: Vec<u64> = cluster.nodes().iter().map(|n| n.clock()).collect();
            let receiver = match *op {
                Operation::Deliver(index) => {
                    let busy = cluster.busy_links();
                    (!busy.is_empty()).then(|| busy[index % busy.len()].1)
                },
                _ => None,
            };

            apply(&mut cluster, op)?;

            for (node, &old) in cluster.nodes().iter().zip(&before) {
                prop_assert!(node.clock() >= old, "node {} clock went back", node.id());
            }
            if let Some(to) = receiver {
                prop_assert!(cluster.node(to).unwrap().clock() > before[to as usize]);
            }
        }
    }

    /// Seeded random schedules finish every cycle on both built-in tables.
    #[test]
    fn prop_random_schedule_completes(seed in any::<u64>(), cycles in 1..4u32) {
        for table in [QuorumTable::all_others(4).unwrap(), QuorumTable::maekawa_four()] {
            let mut cluster = Cluster::new(&table);
            cluster.run_random(seed, cycles).map_err(|e| TestCaseError::fail(e.to_string()))?;
            oracle::all_cycles_completed(cycles as usize)(&cluster).map_err(TestCaseError::fail)?;
            oracle::queues_drained()(&cluster).map_err(TestCaseError::fail)?;
        }
    }
}
