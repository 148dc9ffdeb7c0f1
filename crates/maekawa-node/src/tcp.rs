//! TCP transport via tokio.

use std::{io, net::SocketAddr};

use async_trait::async_trait;
use maekawa_core::{Transport, TransportListener};
use tokio::net::TcpStream;

/// Production transport: plain TCP.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpTransport;

/// Bound TCP listening endpoint.
#[derive(Debug)]
pub struct TcpListener {
    inner: tokio::net::TcpListener,
}

#[async_trait]
impl Transport for TcpTransport {
    type Stream = TcpStream;
    type Listener = TcpListener;

    async fn bind(&self, addr: &str) -> io::Result<TcpListener> {
        let inner = tokio::net::TcpListener::bind(addr).await?;
        Ok(TcpListener { inner })
    }

    async fn connect(&self, addr: &str) -> io::Result<TcpStream> {
        let stream = TcpStream::connect(addr).await?;
        // Protocol messages are tiny; don't let Nagle hold them back.
        stream.set_nodelay(true)?;
        Ok(stream)
    }
}

#[async_trait]
impl TransportListener for TcpListener {
    type Stream = TcpStream;

    async fn accept(&mut self) -> io::Result<(TcpStream, SocketAddr)> {
        self.inner.accept().await
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }
}
