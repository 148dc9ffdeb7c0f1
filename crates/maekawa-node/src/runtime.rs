//! Node runtime: one event loop per node.
//!
//! The event loop task owns the [`MaekawaNode`] state machine. Inbound
//! messages, local requests and snapshot queries all arrive as commands on a
//! single channel and are handled one at a time, so every protocol handler
//! runs to completion before the next starts.
//!
//! ```text
//!   accept loop ─► reader tasks ─┐
//!                                ├─► commands ─► event loop ─► PeerSet ─► writer tasks
//!   NodeHandle ──────────────────┘                 (MaekawaNode)
//! ```

use std::{collections::VecDeque, sync::Arc};

use maekawa_core::{
    CoreError, MaekawaNode, NodeAction, RequestEntry, RequesterState, Transport,
};
use maekawa_proto::{Message, NodeId, Timestamp};
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{config::NodeConfig, error::NodeError, inbound, peers::PeerSet};

/// Work items for the event loop.
#[derive(Debug)]
pub(crate) enum Command {
    Inbound(Message),
    Request(oneshot::Sender<Result<(), CoreError>>),
    Release(oneshot::Sender<Result<(), CoreError>>),
    Snapshot(oneshot::Sender<NodeSnapshot>),
    Shutdown,
}

/// Point-in-time view of one node's protocol state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeSnapshot {
    /// Node id
    pub id: NodeId,
    /// Lamport clock value
    pub clock: Timestamp,
    /// Node currently holding this node's vote
    pub granted_to: Option<NodeId>,
    /// Waiting requests in priority order
    pub queued: Vec<RequestEntry>,
    /// Requester lifecycle state
    pub state: RequesterState,
    /// Outbound messages lost so far
    pub send_failures: u64,
}

impl NodeSnapshot {
    /// Whether the node is inside the critical section.
    pub fn in_critical_section(&self) -> bool {
        self.state == RequesterState::InCriticalSection
    }
}

/// Handle to a running node.
///
/// Cheap to clone; all clones talk to the same event loop.
#[derive(Debug, Clone)]
pub struct NodeHandle {
    id: NodeId,
    commands: mpsc::UnboundedSender<Command>,
}

impl NodeHandle {
    /// Id of the node behind this handle.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Request the critical section and wait until it is entered.
    ///
    /// Dropping the returned future after the request was sent does not
    /// cancel it: the node releases immediately on entry instead.
    pub async fn request_access(&self) -> Result<(), NodeError> {
        self.call(Command::Request).await??;
        Ok(())
    }

    /// Leave the critical section.
    pub async fn release_access(&self) -> Result<(), NodeError> {
        self.call(Command::Release).await??;
        Ok(())
    }

    /// Current protocol state.
    pub async fn snapshot(&self) -> Result<NodeSnapshot, NodeError> {
        self.call(Command::Snapshot).await
    }

    /// Stop the event loop and the accept loop.
    ///
    /// Outstanding calls fail with [`NodeError::Stopped`].
    pub fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown);
    }

    /// Whether the event loop has stopped.
    pub fn is_stopped(&self) -> bool {
        self.commands.is_closed()
    }

    async fn call<R>(
        &self,
        command: impl FnOnce(oneshot::Sender<R>) -> Command,
    ) -> Result<R, NodeError> {
        let (tx, rx) = oneshot::channel();
        self.commands.send(command(tx)).map_err(|_| NodeError::Stopped)?;
        rx.await.map_err(|_| NodeError::Stopped)
    }
}

/// Event loop of one node.
pub struct NodeRuntime<T: Transport> {
    node: MaekawaNode,
    peers: PeerSet<T>,
    waiting: Option<oneshot::Sender<Result<(), CoreError>>>,
    commands: mpsc::UnboundedReceiver<Command>,
    acceptor: JoinHandle<()>,
}

impl<T: Transport> NodeRuntime<T> {
    /// Start a node on an already bound listener.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(config: NodeConfig, transport: Arc<T>, listener: T::Listener) -> NodeHandle {
        let id = config.id();
        let (tx, rx) = mpsc::unbounded_channel();

        let acceptor = tokio::spawn(inbound::accept_loop(id, listener, tx.clone()));
        let runtime = Self {
            node: MaekawaNode::new(id, config.quorum().clone()),
            peers: PeerSet::new(id, transport, config.peers().clone()),
            waiting: None,
            commands: rx,
            acceptor,
        };

        info!(node = id, quorum = ?config.quorum(), "node started");
        tokio::spawn(runtime.run());

        NodeHandle { id, commands: tx }
    }

    /// Bind the configured listen address, then start the node.
    pub async fn bind(config: NodeConfig, transport: Arc<T>) -> Result<NodeHandle, NodeError> {
        let listener = transport.bind(config.listen_addr()).await.map_err(|source| {
            NodeError::Bind { addr: config.listen_addr().to_string(), source }
        })?;
        Ok(Self::spawn(config, transport, listener))
    }

    async fn run(mut self) {
        while let Some(command) = self.commands.recv().await {
            match command {
                Command::Inbound(message) => match self.node.handle_message(&message) {
                    Ok(actions) => self.execute(actions),
                    Err(error) => warn!(node = self.node.id(), %message, %error, "message rejected"),
                },
                Command::Request(done) => match self.node.request_access() {
                    Ok(actions) => {
                        info!(node = self.node.id(), ts = ?self.node.current_request(), "requesting critical section");
                        self.waiting = Some(done);
                        self.execute(actions);
                    },
                    Err(error) => {
                        let _ = done.send(Err(error));
                    },
                },
                Command::Release(done) => {
                    let result = self.release();
                    let _ = done.send(result);
                },
                Command::Snapshot(reply) => {
                    let _ = reply.send(self.snapshot());
                },
                Command::Shutdown => break,
            }
        }

        self.acceptor.abort();
        info!(node = self.node.id(), "node stopped");
    }

    fn release(&mut self) -> Result<(), CoreError> {
        let actions = self.node.release_access()?;
        info!(node = self.node.id(), "left critical section");
        self.execute(actions);
        Ok(())
    }

    fn execute(&mut self, actions: Vec<NodeAction>) {
        let mut pending = VecDeque::from(actions);

        while let Some(action) = pending.pop_front() {
            match action {
                NodeAction::Send { to, message } => {
                    debug!(node = self.node.id(), peer = to, %message, "queueing message");
                    self.peers.send(to, message);
                },
                NodeAction::EnterCriticalSection { timestamp } => {
                    info!(node = self.node.id(), timestamp, "entered critical section");
                    let delivered = self.waiting.take().is_some_and(|done| done.send(Ok(())).is_ok());
                    if delivered {
                        continue;
                    }

                    warn!(node = self.node.id(), "requester went away; releasing");
                    match self.node.release_access() {
                        Ok(more) => pending.extend(more),
                        Err(error) => warn!(node = self.node.id(), %error, "automatic release failed"),
                    }
                },
            }
        }
    }

    fn snapshot(&self) -> NodeSnapshot {
        NodeSnapshot {
            id: self.node.id(),
            clock: self.node.clock(),
            granted_to: self.node.granted_to(),
            queued: self.node.request_queue(),
            state: self.node.requester_state(),
            send_failures: self.peers.send_failures(),
        }
    }
}
