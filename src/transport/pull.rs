use std::collections::VecDeque;
use std::net::SocketAddr;

use bytes::Bytes;
use tokio::io::BufReader;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::ChannelConfig;
use crate::error::TransportError;
use crate::frame::RawFrame;
use crate::transport::link::Link;
use crate::transport::wire::{self, SocketRole};
use crate::transport::{Message, HANDSHAKE_TIMEOUT};

/// One segment of a multi-part message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Part {
    pub data: Bytes,
    /// Another part of the same message follows.
    pub more: bool,
}

/// Receiving end of a point-to-point channel.
///
/// Only complete messages ever reach the inbox, so reading a frame part by
/// part cannot drift onto the next frame's metadata.
pub struct PullSocket {
    endpoint: String,
    inbox: mpsc::Receiver<Message>,
    pending: VecDeque<Bytes>,
    local_addr: Option<SocketAddr>,
    cancel: CancellationToken,
    io_task: Option<JoinHandle<()>>,
}

impl PullSocket {
    pub async fn open(config: &ChannelConfig) -> Result<Self, TransportError> {
        let (link, local_addr) = Link::open(config).await?;
        let (inbox_tx, inbox_rx) = mpsc::channel(config.high_water_mark.max(1));
        let cancel = CancellationToken::new();

        let io_task = tokio::spawn(drive_connections(
            link,
            inbox_tx,
            cancel.clone(),
            config.endpoint.clone(),
            config.max_part_bytes,
        ));

        Ok(Self {
            endpoint: config.endpoint.clone(),
            inbox: inbox_rx,
            pending: VecDeque::new(),
            local_addr,
            cancel,
            io_task: Some(io_task),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Blocks until a part is available.
    pub async fn receive_part(&mut self) -> Result<Part, TransportError> {
        if self.pending.is_empty() {
            let message = self.inbox.recv().await.ok_or(TransportError::Closed)?;
            self.pending.extend(message);
        }
        let data = self
            .pending
            .pop_front()
            .ok_or_else(|| TransportError::Protocol("received an empty message".to_string()))?;
        Ok(Part {
            data,
            more: !self.pending.is_empty(),
        })
    }

    /// Blocks until a whole message is available, or returns what is left of
    /// a message already partly read with [`receive_part`](Self::receive_part).
    pub async fn receive_message(&mut self) -> Result<Message, TransportError> {
        if !self.pending.is_empty() {
            return Ok(self.pending.drain(..).collect());
        }
        self.inbox.recv().await.ok_or(TransportError::Closed)
    }

    /// Reads one metadata + payload message.
    ///
    /// The only suspension point is waiting for the first part, which makes
    /// this safe to race in `select!`.
    pub async fn receive_frame(&mut self) -> Result<RawFrame, TransportError> {
        let metadata = self.receive_part().await?;
        if !metadata.more {
            return Err(TransportError::Protocol(
                "expected a 2-part frame, got 1 part".to_string(),
            ));
        }
        let payload = self.receive_part().await?;
        if payload.more {
            let extra = self.pending.len();
            self.pending.clear();
            return Err(TransportError::Protocol(format!(
                "expected a 2-part frame, got {} parts",
                2 + extra
            )));
        }
        Ok(RawFrame {
            metadata: metadata.data,
            payload: payload.data,
        })
    }

    pub async fn close(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.io_task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for PullSocket {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.io_task.take() {
            task.abort();
        }
    }
}

async fn drive_connections(
    mut link: Link,
    inbox_tx: mpsc::Sender<Message>,
    cancel: CancellationToken,
    endpoint: String,
    max_part_bytes: usize,
) {
    let mut readers = JoinSet::new();
    while let Some((stream, address)) = link.next_stream(&cancel).await {
        let connection = read_connection(
            stream,
            address,
            inbox_tx.clone(),
            cancel.clone(),
            endpoint.clone(),
            max_part_bytes,
        );
        if link.is_listener() {
            // A restarted upstream may connect before its old connection is noticed as gone.
            readers.spawn(connection);
            while readers.try_join_next().is_some() {}
        } else {
            connection.await;
            link.backoff(&cancel).await;
        }
    }
    readers.shutdown().await;
}

async fn read_connection(
    mut stream: TcpStream,
    address: SocketAddr,
    inbox_tx: mpsc::Sender<Message>,
    cancel: CancellationToken,
    endpoint: String,
    max_part_bytes: usize,
) {
    let peer_id = Uuid::new_v4();
    match tokio::time::timeout(HANDSHAKE_TIMEOUT, wire::handshake(&mut stream, SocketRole::Pull)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            warn!(peer = %peer_id, %address, "Rejected upstream connection on {}: {}", endpoint, e);
            return;
        }
        Err(_) => {
            warn!(peer = %peer_id, %address, "Upstream handshake timed out on {}", endpoint);
            return;
        }
    }
    info!(peer = %peer_id, %address, "Upstream peer connected on {}", endpoint);

    let mut reader = BufReader::new(stream);
    loop {
        let message = tokio::select! {
            _ = cancel.cancelled() => break,
            message = wire::read_message(&mut reader, max_part_bytes) => message,
        };
        match message {
            Ok(Some(parts)) => {
                debug!(peer = %peer_id, parts = parts.len(), "Received message");
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    delivered = inbox_tx.send(parts) => {
                        if delivered.is_err() {
                            break;
                        }
                    }
                }
            }
            Ok(None) => {
                info!(peer = %peer_id, %address, "Upstream peer on {} disconnected", endpoint);
                break;
            }
            Err(e) => {
                warn!(peer = %peer_id, %address, "Dropping upstream connection on {}: {}", endpoint, e);
                break;
            }
        }
    }
}
