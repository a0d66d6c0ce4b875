use std::fmt;
use std::net::{AddrParseError, IpAddr, Ipv4Addr, SocketAddr};
use std::num::ParseIntError;
use std::str::FromStr;

use serde::Serialize;
use thiserror::Error;

/// Address a mapping accepts connections on.
///
/// An empty host (`:8080`) stands for `0.0.0.0`. The parsed socket address
/// is what identifies a mapping, so `:8080` and `0.0.0.0:8080` are the same.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenAddr(SocketAddr);

impl ListenAddr {
    pub fn socket_addr(&self) -> SocketAddr {
        self.0
    }
}

impl From<SocketAddr> for ListenAddr {
    fn from(addr: SocketAddr) -> Self {
        Self(addr)
    }
}

impl fmt::Display for ListenAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Address accepted connections are relayed to.
///
/// The host may be a DNS name, it is resolved every time a connection is
/// dialled.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ForwardAddr {
    host: String,
    port: u16,
}

impl ForwardAddr {
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl From<SocketAddr> for ForwardAddr {
    fn from(addr: SocketAddr) -> Self {
        Self {
            host: addr.ip().to_string(),
            port: addr.port(),
        }
    }
}

impl fmt::Display for ForwardAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseAddressError {
    #[error("missing ':' separator")]
    MissingSeparator,

    #[error("{0}")]
    InvalidAddress(AddrParseError),

    #[error("invalid port: {0}")]
    InvalidPort(ParseIntError),

    #[error("unterminated '[' in address")]
    UnterminatedBracket,

    #[error("invalid host '{0}'")]
    InvalidHost(String),

    #[error("port 0 is not a valid listen port")]
    ZeroPort,
}

// Syntax: [<host>]:<port>, where an IPv6 host is wrapped in brackets
fn split_host_port(s: &str) -> Result<(&str, u16), ParseAddressError> {
    use ParseAddressError::*;

    let (host, port) = s.rsplit_once(':').ok_or(MissingSeparator)?;
    let port = port.parse().map_err(InvalidPort)?;

    let host = match host.strip_prefix('[') {
        Some(x) => x.strip_suffix(']').ok_or(UnterminatedBracket)?,
        None if host.contains(':') => return Err(InvalidHost(host.to_owned())),
        None => host,
    };

    Ok((host, port))
}

impl FromStr for ListenAddr {
    type Err = ParseAddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = split_host_port(s.trim())?;

        if port == 0 {
            return Err(ParseAddressError::ZeroPort);
        }

        let ip = if host.is_empty() {
            IpAddr::V4(Ipv4Addr::UNSPECIFIED)
        } else {
            host.parse().map_err(ParseAddressError::InvalidAddress)?
        };

        Ok(Self(SocketAddr::new(ip, port)))
    }
}

impl FromStr for ForwardAddr {
    type Err = ParseAddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = split_host_port(s.trim())?;

        let host = if host.is_empty() {
            Ipv4Addr::LOCALHOST.to_string()
        } else if host.chars().any(char::is_whitespace) || host.contains('/') {
            return Err(ParseAddressError::InvalidHost(host.to_owned()));
        } else {
            host.to_owned()
        };

        Ok(Self { host, port })
    }
}

impl Serialize for ListenAddr {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl Serialize for ForwardAddr {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

/// Transport a mapping forwards. Only TCP is implemented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MappingType {
    Tcp,
}

impl fmt::Display for MappingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp => f.write_str("tcp"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseMappingTypeError {
    #[error("mapping type '{0}' is not supported")]
    Unsupported(String),

    #[error("unknown mapping type '{0}'")]
    Unknown(String),
}

impl FromStr for MappingType {
    type Err = ParseMappingTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tcp" => Ok(Self::Tcp),
            "udp" | "tcpudp" | "udptcp" => Err(ParseMappingTypeError::Unsupported(s.to_owned())),
            _ => Err(ParseMappingTypeError::Unknown(s.to_owned())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MappingState {
    /// Inserted, listener not bound yet.
    Starting,
    /// Listener bound and accepting.
    Active,
    /// Being deleted, listener is shutting down.
    Stopping,
    /// Listener could not be bound. Does not forward traffic.
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Mapping {
    pub listen_addr: ListenAddr,
    pub forward_addr: ForwardAddr,
    pub mapping_type: MappingType,
    pub state: MappingState,

    /// Whether the mapping is written to the mapping store.
    #[serde(skip)]
    pub persist: bool,
}
