//! Clusters over real localhost TCP.

use std::{
    collections::BTreeMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use maekawa_core::{QuorumTable, RequesterState, Transport, TransportListener};
use maekawa_node::{
    CriticalSectionObserver, DriverConfig, NodeConfig, NodeDriver, NodeHandle, NodeRuntime,
    NodeSnapshot, SystemEnv, TcpTransport, TerminationBarrier,
};
use maekawa_proto::{Message, NodeId, encode_to_vec};
use tokio::io::AsyncWriteExt;

const TIMEOUT: Duration = Duration::from_secs(20);

/// Bind every listener first so the address table is complete before any
/// node starts.
async fn start_cluster(table: &QuorumTable) -> Vec<NodeHandle> {
    let transport = Arc::new(TcpTransport);

    let mut listeners = Vec::new();
    let mut addresses = BTreeMap::new();
    for id in 0..table.len() as NodeId {
        let listener = transport.bind("127.0.0.1:0").await.unwrap();
        addresses.insert(id, listener.local_addr().unwrap().to_string());
        listeners.push(listener);
    }

    listeners
        .into_iter()
        .enumerate()
        .map(|(id, listener)| {
            let id = id as NodeId;
            let config =
                NodeConfig::from_table(id, table, addresses[&id].clone(), addresses.clone())
                    .unwrap();
            NodeRuntime::spawn(config, Arc::clone(&transport), listener)
        })
        .collect()
}

async fn wait_until(handle: &NodeHandle, condition: impl Fn(&NodeSnapshot) -> bool) -> NodeSnapshot {
    tokio::time::timeout(TIMEOUT, async {
        loop {
            let snapshot = handle.snapshot().await.unwrap();
            if condition(&snapshot) {
                return snapshot;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap()
}

#[tokio::test]
async fn single_request_is_granted_by_whole_quorum() {
    let table = QuorumTable::all_others(4).unwrap();
    let nodes = start_cluster(&table).await;

    tokio::time::timeout(TIMEOUT, nodes[0].request_access()).await.unwrap().unwrap();
    assert!(nodes[0].snapshot().await.unwrap().in_critical_section());
    for gatekeeper in &nodes[1..] {
        let snapshot = gatekeeper.snapshot().await.unwrap();
        assert_eq!(snapshot.granted_to, Some(0));
        assert!(snapshot.queued.is_empty());
    }

    nodes[0].release_access().await.unwrap();
    for gatekeeper in &nodes[1..] {
        wait_until(gatekeeper, |s| s.granted_to.is_none()).await;
    }
    assert!(!nodes[0].snapshot().await.unwrap().in_critical_section());

    for node in &nodes {
        node.shutdown();
    }
}

#[tokio::test]
async fn contending_request_waits_for_release() {
    let table = QuorumTable::all_others(4).unwrap();
    let nodes = start_cluster(&table).await;

    tokio::time::timeout(TIMEOUT, nodes[0].request_access()).await.unwrap().unwrap();

    let second = nodes[1].clone();
    let waiter = tokio::spawn(async move { second.request_access().await });

    // Node 0 still holds votes from nodes 2 and 3, so node 1 queues there.
    wait_until(&nodes[2], |s| !s.queued.is_empty()).await;
    wait_until(&nodes[3], |s| !s.queued.is_empty()).await;
    assert!(!waiter.is_finished());
    assert!(!nodes[1].snapshot().await.unwrap().in_critical_section());

    nodes[0].release_access().await.unwrap();
    tokio::time::timeout(TIMEOUT, waiter).await.unwrap().unwrap().unwrap();
    assert!(nodes[1].snapshot().await.unwrap().in_critical_section());

    nodes[1].release_access().await.unwrap();
    for node in &nodes {
        node.shutdown();
    }
}

#[tokio::test]
async fn abandoned_request_is_released_on_entry() {
    let table = QuorumTable::all_others(3).unwrap();
    let nodes = start_cluster(&table).await;

    tokio::time::timeout(TIMEOUT, nodes[1].request_access()).await.unwrap().unwrap();

    // Node 2 has voted for node 1, so node 0 cannot enter and its caller
    // gives up.
    let abandoned = tokio::time::timeout(Duration::from_millis(200), nodes[0].request_access()).await;
    assert!(abandoned.is_err());
    assert_eq!(nodes[0].snapshot().await.unwrap().state, RequesterState::Requesting);

    nodes[1].release_access().await.unwrap();

    let snapshot = wait_until(&nodes[0], |s| s.state == RequesterState::Idle).await;
    assert!(snapshot.granted_to.is_none());
    for gatekeeper in &nodes[1..] {
        let snapshot = wait_until(gatekeeper, |s| s.granted_to.is_none()).await;
        assert_eq!(snapshot.state, RequesterState::Idle);
        assert!(snapshot.queued.is_empty());
    }

    tokio::time::timeout(TIMEOUT, nodes[0].request_access()).await.unwrap().unwrap();
    assert!(nodes[0].snapshot().await.unwrap().in_critical_section());
    nodes[0].release_access().await.unwrap();

    for node in &nodes {
        node.shutdown();
    }
}

#[tokio::test]
async fn malformed_frame_is_skipped_and_stream_kept() {
    let transport = Arc::new(TcpTransport);
    let listener = transport.bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();

    // Node 1 is never started; replies to it are lost and counted.
    let peers = BTreeMap::from([(1, "127.0.0.1:1".to_string())]);
    let config = NodeConfig::new(0, maekawa_core::Quorum::new([1]), addr.clone(), peers).unwrap();
    let node = NodeRuntime::spawn(config, Arc::clone(&transport), listener);

    let mut stream = transport.connect(&addr).await.unwrap();
    let garbage = [0u8, 0, 0, 3, 0xff, 0x00, 0x13];
    stream.write_all(&garbage).await.unwrap();
    stream.write_all(&encode_to_vec(&Message::request(1, 5)).unwrap()).await.unwrap();

    let snapshot = wait_until(&node, |s| s.granted_to.is_some()).await;
    assert_eq!(snapshot.granted_to, Some(1));
    assert!(snapshot.clock > 5);

    node.shutdown();
}

#[derive(Default)]
struct Occupancy {
    inside: AtomicUsize,
    violations: AtomicUsize,
    entries: Mutex<Vec<(NodeId, u32)>>,
}

impl CriticalSectionObserver for Occupancy {
    fn entered(&self, node: NodeId, cycle: u32) {
        if self.inside.fetch_add(1, Ordering::SeqCst) != 0 {
            self.violations.fetch_add(1, Ordering::SeqCst);
        }
        self.entries.lock().unwrap().push((node, cycle));
    }

    fn exited(&self, _node: NodeId, _cycle: u32) {
        self.inside.fetch_sub(1, Ordering::SeqCst);
    }
}

async fn run_drivers(table: QuorumTable, cycles: u32) {
    let nodes = start_cluster(&table).await;
    let occupancy = Arc::new(Occupancy::default());
    let barrier = Arc::new(TerminationBarrier::new(nodes.len()));
    let config = DriverConfig::new(
        cycles,
        Duration::from_millis(1),
        Duration::from_millis(20),
        Duration::from_millis(5),
    )
    .unwrap();

    let tasks: Vec<_> = nodes
        .iter()
        .map(|handle| {
            let driver =
                NodeDriver::new(handle.clone(), SystemEnv, config, Arc::clone(&barrier))
                    .with_observer(Arc::clone(&occupancy) as Arc<dyn CriticalSectionObserver>);
            tokio::spawn(driver.run())
        })
        .collect();

    for task in tasks {
        let report = tokio::time::timeout(TIMEOUT, task).await.unwrap().unwrap().unwrap();
        assert_eq!(report.cycles, cycles);
    }

    assert_eq!(occupancy.violations.load(Ordering::SeqCst), 0);
    assert_eq!(occupancy.entries.lock().unwrap().len(), nodes.len() * cycles as usize);
    assert_eq!(barrier.arrived(), nodes.len());

    for node in &nodes {
        let snapshot = wait_until(node, |s| s.granted_to.is_none()).await;
        assert!(snapshot.queued.is_empty());
        node.shutdown();
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn drivers_complete_with_all_others_quorums() {
    run_drivers(QuorumTable::all_others(4).unwrap(), 3).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn drivers_complete_with_four_node_table() {
    run_drivers(QuorumTable::maekawa_four(), 3).await;
}

#[tokio::test]
async fn shutdown_fails_outstanding_calls() {
    let table = QuorumTable::all_others(3).unwrap();
    let nodes = start_cluster(&table).await;

    nodes[0].shutdown();
    tokio::time::timeout(TIMEOUT, async {
        while !nodes[0].is_stopped() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    assert!(matches!(nodes[0].request_access().await, Err(maekawa_node::NodeError::Stopped)));

    for node in &nodes[1..] {
        node.shutdown();
    }
}
