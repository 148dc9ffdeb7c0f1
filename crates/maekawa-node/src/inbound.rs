//! Inbound connections: accept loop and per-connection readers.
//!
//! Every decoded message is forwarded to the node's event loop, which is the
//! only place protocol state is touched.

use std::{net::SocketAddr, time::Duration};

use maekawa_core::TransportListener;
use maekawa_proto::{FrameDecoder, NodeId, ProtocolError};
use tokio::{
    io::{AsyncRead, AsyncReadExt},
    sync::mpsc,
};
use tracing::{debug, warn};

use crate::runtime::Command;

/// Back-off after a failed accept.
const ACCEPT_RETRY: Duration = Duration::from_millis(50);

pub(crate) async fn accept_loop<L: TransportListener>(
    node: NodeId,
    mut listener: L,
    inbox: mpsc::UnboundedSender<Command>,
) {
    while !inbox.is_closed() {
        match listener.accept().await {
            Ok((stream, remote)) => {
                debug!(node, %remote, "accepted connection");
                tokio::spawn(read_stream(node, stream, remote, inbox.clone()));
            },
            Err(error) => {
                warn!(node, %error, "accept failed");
                tokio::time::sleep(ACCEPT_RETRY).await;
            },
        }
    }
}

async fn read_stream<S: AsyncRead + Unpin>(
    node: NodeId,
    mut stream: S,
    remote: SocketAddr,
    inbox: mpsc::UnboundedSender<Command>,
) {
    let mut decoder = FrameDecoder::new();

    loop {
        match stream.read_buf(decoder.buffer_mut()).await {
            Ok(0) => {
                debug!(node, %remote, "connection closed by peer");
                return;
            },
            Ok(_) => {},
            Err(error) => {
                debug!(node, %remote, %error, "connection read failed");
                return;
            },
        }

        loop {
            match decoder.decode_next() {
                Ok(Some(message)) => {
                    debug!(node, %message, "received");
                    if inbox.send(Command::Inbound(message)).is_err() {
                        return;
                    }
                },
                Ok(None) => break,
                Err(ProtocolError::UnknownKind(kind)) => {
                    debug!(node, %remote, %kind, "unknown message type dropped");
                },
                Err(error) if error.is_fatal() => {
                    warn!(node, %remote, %error, "unrecoverable framing error; closing connection");
                    return;
                },
                Err(error) => {
                    warn!(node, %remote, %error, "malformed frame dropped");
                },
            }
        }
    }
}
