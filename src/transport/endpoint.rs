use std::fmt;

use crate::error::TransportError;

const TCP_SCHEME: &str = "tcp://";
const ANY_INTERFACE: &str = "*";

/// A `tcp://host:port` channel address. `*` as host means every interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    pub fn parse(endpoint: &str) -> Result<Self, TransportError> {
        let invalid = |reason: &str| TransportError::InvalidEndpoint(endpoint.to_string(), reason.to_string());

        let address = endpoint
            .strip_prefix(TCP_SCHEME)
            .ok_or_else(|| invalid("only tcp:// endpoints are supported"))?;
        let (host, port) = address
            .rsplit_once(':')
            .ok_or_else(|| invalid("missing port"))?;
        if host.is_empty() {
            return Err(invalid("missing host"));
        }
        let port = port.parse::<u16>().map_err(|_| invalid("port is not a number"))?;
        let host = host.trim_start_matches('[').trim_end_matches(']').to_string();

        Ok(Self { host, port })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn is_wildcard(&self) -> bool {
        self.host == ANY_INTERFACE
    }

    /// Address handed to `TcpListener::bind`.
    pub fn bind_address(&self) -> String {
        if self.is_wildcard() {
            format!("0.0.0.0:{}", self.port)
        } else {
            join_host_port(&self.host, self.port)
        }
    }

    /// Address handed to `TcpStream::connect`.
    pub fn connect_address(&self) -> Result<String, TransportError> {
        if self.is_wildcard() {
            return Err(TransportError::InvalidEndpoint(
                self.to_string(),
                "cannot connect to a wildcard host".to_string(),
            ));
        }
        Ok(join_host_port(&self.host, self.port))
    }
}

fn join_host_port(host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{TCP_SCHEME}{}", join_host_port(&self.host, self.port))
    }
}
