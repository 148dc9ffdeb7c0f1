//! Transport abstraction for stream-oriented peer links.
//!
//! Every node listens on one endpoint and opens one ordered byte stream per
//! peer it sends to. Production uses TCP via tokio, tests use Turmoil
//! (simulated TCP), so protocol correctness can be checked under
//! deterministic network schedules.

use std::{io, net::SocketAddr};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

/// Abstract stream transport.
///
/// Streams must be reliable and ordered: messages from one sender to one
/// receiver are processed in the order sent.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Bidirectional byte stream to a peer.
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Listener producing inbound streams.
    type Listener: TransportListener<Stream = Self::Stream>;

    /// Bind the node's listening endpoint.
    async fn bind(&self, addr: &str) -> io::Result<Self::Listener>;

    /// Open a stream to a peer's listening endpoint.
    async fn connect(&self, addr: &str) -> io::Result<Self::Stream>;
}

/// Listening endpoint of one node.
#[async_trait]
pub trait TransportListener: Send + 'static {
    /// Inbound byte stream.
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Wait for the next inbound connection.
    async fn accept(&mut self) -> io::Result<(Self::Stream, SocketAddr)>;

    /// Address the listener is bound to.
    fn local_addr(&self) -> io::Result<SocketAddr>;
}
