//! Outbound peer links.
//!
//! One writer task per destination owns that destination's stream. Messages
//! are handed to it over an unbounded channel, so sending never blocks the
//! event loop and per-destination order is the order of `send` calls.
//!
//! # Failure handling
//!
//! ```text
//!  send ──► queue ──► writer ──connect?──► stream ──write──► peer
//!                       │                    │
//!                       └── connect failed   └── write failed
//!                            drop message         drop message and stream,
//!                                                 reconnect on next send
//! ```
//!
//! Lost messages are counted and logged; nothing is retried.

use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use bytes::BytesMut;
use maekawa_core::Transport;
use maekawa_proto::{Message, NodeId, frame};
use tokio::{io::AsyncWriteExt, sync::mpsc};
use tracing::{debug, warn};

/// Outbound links from one node to its peers.
pub struct PeerSet<T: Transport> {
    node: NodeId,
    transport: Arc<T>,
    addresses: BTreeMap<NodeId, String>,
    links: HashMap<NodeId, mpsc::UnboundedSender<Message>>,
    failures: Arc<AtomicU64>,
}

impl<T: Transport> PeerSet<T> {
    /// Create an empty link set. Writers are spawned on first send.
    pub fn new(node: NodeId, transport: Arc<T>, addresses: BTreeMap<NodeId, String>) -> Self {
        Self {
            node,
            transport,
            addresses,
            links: HashMap::new(),
            failures: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Queue `message` for `to`.
    ///
    /// Must be called from within a tokio runtime. Unknown destinations are
    /// logged and counted as failures.
    pub fn send(&mut self, to: NodeId, message: Message) {
        let Some(link) = self.link(to) else {
            warn!(node = self.node, peer = to, %message, "no address for peer; message dropped");
            self.failures.fetch_add(1, Ordering::Relaxed);
            return;
        };

        if let Err(returned) = link.send(message) {
            warn!(node = self.node, peer = to, message = %returned.0, "peer writer stopped; message dropped");
            self.failures.fetch_add(1, Ordering::Relaxed);
            self.links.remove(&to);
        }
    }

    /// Queue a copy of `message` for every destination.
    ///
    /// A failure toward one destination does not prevent delivery to the
    /// others.
    pub fn multicast(&mut self, message: &Message, destinations: impl IntoIterator<Item = NodeId>) {
        for to in destinations {
            self.send(to, message.clone());
        }
    }

    /// Messages lost so far, across all destinations.
    pub fn send_failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    fn link(&mut self, to: NodeId) -> Option<&mpsc::UnboundedSender<Message>> {
        if !self.links.contains_key(&to) {
            let addr = self.addresses.get(&to)?.clone();
            let (tx, rx) = mpsc::unbounded_channel();
            let writer = Writer {
                node: self.node,
                peer: to,
                addr,
                transport: Arc::clone(&self.transport),
                failures: Arc::clone(&self.failures),
            };
            tokio::spawn(writer.run(rx));
            self.links.insert(to, tx);
        }
        self.links.get(&to)
    }
}

struct Writer<T: Transport> {
    node: NodeId,
    peer: NodeId,
    addr: String,
    transport: Arc<T>,
    failures: Arc<AtomicU64>,
}

impl<T: Transport> Writer<T> {
    async fn run(self, mut queue: mpsc::UnboundedReceiver<Message>) {
        let mut stream: Option<T::Stream> = None;
        let mut buf = BytesMut::new();

        while let Some(message) = queue.recv().await {
            buf.clear();
            if let Err(error) = frame::encode(&message, &mut buf) {
                warn!(node = self.node, peer = self.peer, %message, %error, "failed to encode message");
                self.lost();
                continue;
            }

            if stream.is_none() {
                match self.transport.connect(&self.addr).await {
                    Ok(connected) => {
                        debug!(node = self.node, peer = self.peer, addr = %self.addr, "connected to peer");
                        stream = Some(connected);
                    },
                    Err(error) => {
                        warn!(
                            node = self.node,
                            peer = self.peer,
                            addr = %self.addr,
                            %message,
                            %error,
                            "connect failed; message dropped"
                        );
                        self.lost();
                        continue;
                    },
                }
            }

            let Some(open) = stream.as_mut() else { continue };
            match open.write_all(&buf).await {
                Ok(()) => debug!(node = self.node, peer = self.peer, %message, "sent"),
                Err(error) => {
                    warn!(
                        node = self.node,
                        peer = self.peer,
                        %message,
                        %error,
                        "send failed; message dropped, reconnecting on next send"
                    );
                    self.lost();
                    stream = None;
                },
            }
        }
    }

    fn lost(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }
}
