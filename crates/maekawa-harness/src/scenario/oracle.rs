//! Oracle helpers.

use maekawa_core::RequesterState;
use maekawa_proto::NodeId;

use crate::scenario::OracleFn;

/// Every oracle in `oracles` must pass; the first failure is returned.
pub fn all_of(oracles: Vec<OracleFn>) -> OracleFn {
    Box::new(move |cluster| oracles.iter().try_for_each(|oracle| oracle(cluster)))
}

/// No message in flight, no vote granted, no request queued, nobody
/// requesting or inside the critical section.
pub fn queues_drained() -> OracleFn {
    Box::new(|cluster| {
        if cluster.pending() != 0 {
            return Err(format!("{} messages still in flight", cluster.pending()));
        }
        for node in cluster.nodes() {
            if let Some(holder) = node.granted_to() {
                return Err(format!("node {} still grants to {holder}", node.id()));
            }
            let queue = node.request_queue();
            if !queue.is_empty() {
                return Err(format!("node {} still has queued requests {queue:?}", node.id()));
            }
            if node.requester_state() != RequesterState::Idle {
                return Err(format!("node {} is not idle", node.id()));
            }
        }
        Ok(())
    })
}

/// Every node entered the critical section exactly `cycles` times.
pub fn all_cycles_completed(cycles: usize) -> OracleFn {
    Box::new(move |cluster| {
        match cluster.nodes().iter().find(|node| cluster.entries_of(node.id()) != cycles) {
            Some(node) => Err(format!(
                "node {} entered {} times, expected {cycles}",
                node.id(),
                cluster.entries_of(node.id())
            )),
            None => Ok(()),
        }
    })
}

/// Exactly `node` is inside the critical section.
pub fn sole_holder(node: NodeId) -> OracleFn {
    Box::new(move |cluster| match cluster.holders().as_slice() {
        [holder] if *holder == node => Ok(()),
        holders => Err(format!("expected only node {node} in critical section, found {holders:?}")),
    })
}

/// Nobody is inside the critical section.
pub fn nobody_holds() -> OracleFn {
    Box::new(|cluster| match cluster.holders().as_slice() {
        [] => Ok(()),
        holders => Err(format!("expected empty critical section, found {holders:?}")),
    })
}

/// Critical-section entries happened in exactly this order.
pub fn entry_order(expected: Vec<NodeId>) -> OracleFn {
    Box::new(move |cluster| {
        if cluster.entries() == expected.as_slice() {
            Ok(())
        } else {
            Err(format!("expected entries {expected:?}, found {:?}", cluster.entries()))
        }
    })
}

/// `gatekeeper` currently grants its vote to `holder`.
pub fn granted(gatekeeper: NodeId, holder: Option<NodeId>) -> OracleFn {
    Box::new(move |cluster| {
        let actual = cluster
            .node(gatekeeper)
            .ok_or_else(|| format!("no node {gatekeeper}"))?
            .granted_to();
        if actual == holder {
            Ok(())
        } else {
            Err(format!("node {gatekeeper} grants to {actual:?}, expected {holder:?}"))
        }
    })
}

/// Every node's Lamport clock has reached at least `min`.
pub fn clocks_at_least(min: u64) -> OracleFn {
    Box::new(move |cluster| match cluster.nodes().iter().find(|node| node.clock() < min) {
        Some(node) => Err(format!("node {} clock {} below {min}", node.id(), node.clock())),
        None => Ok(()),
    })
}
