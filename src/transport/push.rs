use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, BufWriter};
use tokio::net::TcpStream;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::ChannelConfig;
use crate::error::TransportError;
use crate::frame::RawFrame;
use crate::transport::link::Link;
use crate::transport::wire::{self, SocketRole, MAX_PARTS};
use crate::transport::{Message, HANDSHAKE_TIMEOUT};

const CLOSE_GRACE: Duration = Duration::from_secs(1);
const DRAIN_POLL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendMode {
    /// Fail with `WouldBlock` instead of waiting on a missing or saturated peer.
    NonBlocking,
    Blocking,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStatus {
    Sent,
    WouldBlock,
}

/// Sending end of a point-to-point channel.
///
/// Messages go out whole or not at all. Parts handed over with `more = true`
/// are held back until the final part arrives, then the complete message is
/// queued in one step. Without a connected peer nothing is queued.
pub struct PushSocket {
    endpoint: String,
    queue: mpsc::Sender<Message>,
    peer: watch::Receiver<bool>,
    staged: Vec<Bytes>,
    local_addr: Option<SocketAddr>,
    cancel: CancellationToken,
    io_task: Option<JoinHandle<()>>,
}

impl PushSocket {
    pub async fn open(config: &ChannelConfig) -> Result<Self, TransportError> {
        let (link, local_addr) = Link::open(config).await?;
        let (queue_tx, queue_rx) = mpsc::channel(config.high_water_mark.max(1));
        let (peer_tx, peer_rx) = watch::channel(false);
        let cancel = CancellationToken::new();

        let io_task = tokio::spawn(drive_connections(
            link,
            queue_rx,
            peer_tx,
            cancel.clone(),
            config.endpoint.clone(),
        ));

        Ok(Self {
            endpoint: config.endpoint.clone(),
            queue: queue_tx,
            peer: peer_rx,
            staged: Vec::new(),
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

    pub fn has_peer(&self) -> bool {
        *self.peer.borrow()
    }

    /// Returns `true` once a downstream peer has completed its handshake.
    pub async fn wait_for_peer(&mut self, timeout: Duration) -> bool {
        matches!(
            tokio::time::timeout(timeout, self.peer.wait_for(|connected| *connected)).await,
            Ok(Ok(_))
        )
    }

    fn is_ready(&self) -> bool {
        self.has_peer() && self.queue.capacity() > 0
    }

    /// Hands one part to the socket.
    ///
    /// A part with `more` set is only accepted if the peer could take a
    /// message right now; it is then held until the final part commits the
    /// whole message. Any `WouldBlock` abandons the message being built.
    pub async fn send_part(
        &mut self,
        part: Bytes,
        more: bool,
        mode: SendMode,
    ) -> Result<SendStatus, TransportError> {
        if more {
            if mode == SendMode::NonBlocking && !self.is_ready() {
                self.staged.clear();
                return Ok(SendStatus::WouldBlock);
            }
            if self.staged.len() + 1 >= MAX_PARTS {
                self.staged.clear();
                return Err(TransportError::TooManyParts(MAX_PARTS));
            }
            self.staged.push(part);
            return Ok(SendStatus::Sent);
        }

        let mut parts = std::mem::take(&mut self.staged);
        parts.push(part);
        self.send_message(parts, mode).await
    }

    /// Queues a complete message in one step.
    pub async fn send_message(
        &mut self,
        parts: Message,
        mode: SendMode,
    ) -> Result<SendStatus, TransportError> {
        if parts.is_empty() {
            return Err(TransportError::Protocol("cannot send an empty message".to_string()));
        }
        if parts.len() > MAX_PARTS {
            return Err(TransportError::TooManyParts(MAX_PARTS));
        }
        match mode {
            SendMode::NonBlocking => {
                if !self.has_peer() {
                    return Ok(SendStatus::WouldBlock);
                }
                match self.queue.try_send(parts) {
                    Ok(()) => Ok(SendStatus::Sent),
                    Err(TrySendError::Full(_)) => Ok(SendStatus::WouldBlock),
                    Err(TrySendError::Closed(_)) => Err(TransportError::Closed),
                }
            }
            SendMode::Blocking => {
                self.peer
                    .wait_for(|connected| *connected)
                    .await
                    .map_err(|_| TransportError::Closed)?;
                self.queue
                    .send(parts)
                    .await
                    .map_err(|_| TransportError::Closed)?;
                Ok(SendStatus::Sent)
            }
        }
    }

    /// Sends metadata and payload as one two-part message.
    pub async fn send_frame(
        &mut self,
        frame: RawFrame,
        mode: SendMode,
    ) -> Result<SendStatus, TransportError> {
        self.staged.clear();
        self.send_message(frame.into_parts(), mode).await
    }

    /// Waits until the queue is empty or the peer is gone. Returns `true` if
    /// nothing is left queued.
    pub async fn drain(&self, timeout: Duration) -> bool {
        let _ = tokio::time::timeout(timeout, async {
            while self.has_peer() && self.queue.capacity() < self.queue.max_capacity() {
                tokio::time::sleep(DRAIN_POLL).await;
            }
        })
        .await;
        self.queue.capacity() == self.queue.max_capacity()
    }

    /// Stops the connection task, giving an in-flight write a moment to finish.
    pub async fn close(mut self) {
        self.cancel.cancel();
        if let Some(mut task) = self.io_task.take() {
            if tokio::time::timeout(CLOSE_GRACE, &mut task).await.is_err() {
                task.abort();
            }
        }
    }
}

impl Drop for PushSocket {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.io_task.take() {
            task.abort();
        }
    }
}

async fn drive_connections(
    mut link: Link,
    mut queue_rx: mpsc::Receiver<Message>,
    peer_tx: watch::Sender<bool>,
    cancel: CancellationToken,
    endpoint: String,
) {
    while let Some((mut stream, address)) = link.next_stream(&cancel).await {
        let peer_id = Uuid::new_v4();
        match tokio::time::timeout(HANDSHAKE_TIMEOUT, wire::handshake(&mut stream, SocketRole::Push)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(peer = %peer_id, %address, "Rejected downstream connection on {}: {}", endpoint, e);
                link.backoff(&cancel).await;
                continue;
            }
            Err(_) => {
                warn!(peer = %peer_id, %address, "Downstream handshake timed out on {}", endpoint);
                link.backoff(&cancel).await;
                continue;
            }
        }

        discard_queued(&mut queue_rx, &endpoint, "before new peer attached");
        info!(peer = %peer_id, %address, "Downstream peer connected on {}", endpoint);
        peer_tx.send_replace(true);

        let outcome = pump_messages(stream, &mut queue_rx, &cancel).await;

        peer_tx.send_replace(false);
        discard_queued(&mut queue_rx, &endpoint, "after peer detached");
        match outcome {
            Ok(()) => {
                debug!(peer = %peer_id, "Push socket on {} shutting down", endpoint);
                break;
            }
            Err(e) => info!(peer = %peer_id, %address, "Downstream peer on {} disconnected: {}", endpoint, e),
        }
        link.backoff(&cancel).await;
    }
    peer_tx.send_replace(false);
}

/// Writes queued messages to the peer until it goes away. `Ok` means the
/// socket itself is closing.
async fn pump_messages(
    stream: TcpStream,
    queue_rx: &mut mpsc::Receiver<Message>,
    cancel: &CancellationToken,
) -> Result<(), TransportError> {
    let (mut reader, writer) = stream.into_split();
    let mut writer = BufWriter::new(writer);
    let mut scratch = [0u8; 64];
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            read = reader.read(&mut scratch) => {
                return match read {
                    Ok(0) => Err(TransportError::Closed),
                    Ok(_) => Err(TransportError::Protocol("pull peer sent data".to_string())),
                    Err(e) => Err(TransportError::Io(e)),
                };
            }
            message = queue_rx.recv() => match message {
                Some(parts) => {
                    if let Err(e) = wire::write_message(&mut writer, &parts).await {
                        warn!("Lost a {}-part message while writing: {}", parts.len(), e);
                        return Err(e);
                    }
                }
                None => return Ok(()),
            },
        }
    }
}

/// Nothing queued for one peer is ever delivered to another.
fn discard_queued(queue_rx: &mut mpsc::Receiver<Message>, endpoint: &str, when: &str) {
    let mut discarded = 0usize;
    while queue_rx.try_recv().is_ok() {
        discarded += 1;
    }
    if discarded > 0 {
        warn!("Discarded {} queued message(s) on {} {}", discarded, endpoint, when);
    }
}
