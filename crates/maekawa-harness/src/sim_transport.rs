//! Turmoil-backed transport.
//!
//! Hosts are addressed by their simulation name, `"node-2:7000"`.

use std::{io, net::SocketAddr};

use async_trait::async_trait;
use maekawa_core::{Transport, TransportListener};
use turmoil::net::{TcpListener, TcpStream};

/// Transport over Turmoil's simulated TCP.
///
/// Must be used from inside a Turmoil host or client.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimTransport;

/// Listening endpoint on a simulated host.
pub struct SimListener {
    inner: TcpListener,
}

#[async_trait]
impl Transport for SimTransport {
    type Stream = TcpStream;
    type Listener = SimListener;

    async fn bind(&self, addr: &str) -> io::Result<SimListener> {
        let inner = TcpListener::bind(addr).await?;
        Ok(SimListener { inner })
    }

    async fn connect(&self, addr: &str) -> io::Result<TcpStream> {
        TcpStream::connect(addr).await
    }
}

#[async_trait]
impl TransportListener for SimListener {
    type Stream = TcpStream;

    async fn accept(&mut self) -> io::Result<(TcpStream, SocketAddr)> {
        self.inner.accept().await
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }
}
