use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::{ChannelConfig, ChannelMode};
use crate::error::TransportError;
use crate::transport::Endpoint;

const ACCEPT_ERROR_PAUSE: Duration = Duration::from_millis(50);

/// Where a socket gets its connections from.
pub(crate) enum Link {
    Listener(TcpListener),
    Dialer { address: String, retry: Duration },
}

impl Link {
    /// Binding happens here so an unusable endpoint fails at startup.
    pub(crate) async fn open(config: &ChannelConfig) -> Result<(Self, Option<SocketAddr>), TransportError> {
        let endpoint = Endpoint::parse(&config.endpoint)?;
        match config.mode {
            ChannelMode::Bind => {
                let address = endpoint.bind_address();
                let listener = TcpListener::bind(&address)
                    .await
                    .map_err(|e| TransportError::Bind(e, endpoint.to_string()))?;
                let local_addr = listener.local_addr()?;
                info!("Bound {} on {}", endpoint, local_addr);
                Ok((Link::Listener(listener), Some(local_addr)))
            }
            ChannelMode::Connect => {
                let address = endpoint.connect_address()?;
                Ok((
                    Link::Dialer {
                        address,
                        retry: Duration::from_millis(config.reconnect_interval_ms.max(1)),
                    },
                    None,
                ))
            }
        }
    }

    pub(crate) fn is_listener(&self) -> bool {
        matches!(self, Link::Listener(_))
    }

    /// Waits for the next connection. Returns `None` once cancelled.
    pub(crate) async fn next_stream(&mut self, cancel: &CancellationToken) -> Option<(TcpStream, SocketAddr)> {
        loop {
            let attempt = match self {
                Link::Listener(listener) => tokio::select! {
                    _ = cancel.cancelled() => return None,
                    accepted = listener.accept() => accepted,
                },
                Link::Dialer { address, .. } => tokio::select! {
                    _ = cancel.cancelled() => return None,
                    connected = TcpStream::connect(address.as_str()) => {
                        connected.and_then(|stream| stream.peer_addr().map(|peer| (stream, peer)))
                    }
                },
            };

            match attempt {
                Ok((stream, peer)) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        debug!("Could not disable Nagle for {}: {}", peer, e);
                    }
                    return Some((stream, peer));
                }
                Err(e) => match self {
                    Link::Listener(_) => {
                        error!("Error accepting connection: {}", e);
                        if !pause(ACCEPT_ERROR_PAUSE, cancel).await {
                            return None;
                        }
                    }
                    Link::Dialer { address, retry } => {
                        debug!("Connect to {} failed ({}), retrying in {:?}", address, e, retry);
                        let retry = *retry;
                        if !pause(retry, cancel).await {
                            return None;
                        }
                    }
                },
            }
        }
    }

    /// Spacing between consecutive dials so a misbehaving peer cannot spin us.
    pub(crate) async fn backoff(&self, cancel: &CancellationToken) {
        if let Link::Dialer { retry, .. } = self {
            pause(*retry, cancel).await;
        }
    }
}

/// Sleeps unless cancelled first. Returns `false` on cancellation.
async fn pause(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}
