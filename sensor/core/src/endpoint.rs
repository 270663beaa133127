use std::{
    fmt,
    net::{IpAddr, SocketAddr},
    str::FromStr,
};

/// A reachable network destination.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Endpoint {
    pub ip: IpAddr,
    pub port: u16,
    pub protocol: Protocol,
}

/// The L4 protocol of an endpoint.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Protocol {
    #[default]
    Tcp,
    Udp,
}

/// Describes how an endpoint maps onto a container's declared ports.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetInfo {
    pub container_port: u16,
    pub port_name: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ParseEndpointError {
    #[error("invalid socket address {0:?}")]
    Addr(String, #[source] std::net::AddrParseError),

    #[error(transparent)]
    Protocol(#[from] ParseProtocolError),
}

#[derive(Debug, thiserror::Error)]
#[error("unknown protocol {0:?}; expected tcp or udp")]
pub struct ParseProtocolError(String);

// === impl Endpoint ===

impl Endpoint {
    pub fn new(ip: impl Into<IpAddr>, port: u16, protocol: Protocol) -> Self {
        Self {
            ip: ip.into(),
            port,
            protocol,
        }
    }

    pub fn tcp(ip: impl Into<IpAddr>, port: u16) -> Self {
        Self::new(ip, port, Protocol::Tcp)
    }

    pub fn udp(ip: impl Into<IpAddr>, port: u16) -> Self {
        Self::new(ip, port, Protocol::Udp)
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.socket_addr(), self.protocol)
    }
}

/// Parses `ip:port`, optionally suffixed with `/tcp` or `/udp`. IPv6
/// addresses must be bracketed.
impl FromStr for Endpoint {
    type Err = ParseEndpointError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr, protocol) = match s.rsplit_once('/') {
            Some((addr, proto)) => (addr, proto.parse()?),
            None => (s, Protocol::default()),
        };
        let addr = addr
            .parse::<SocketAddr>()
            .map_err(|error| ParseEndpointError::Addr(addr.to_string(), error))?;
        Ok(Self::new(addr.ip(), addr.port(), protocol))
    }
}

// === impl Protocol ===

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp => "tcp".fmt(f),
            Self::Udp => "udp".fmt(f),
        }
    }
}

impl FromStr for Protocol {
    type Err = ParseProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("tcp") {
            Ok(Self::Tcp)
        } else if s.eq_ignore_ascii_case("udp") {
            Ok(Self::Udp)
        } else {
            Err(ParseProtocolError(s.to_string()))
        }
    }
}

// === impl TargetInfo ===

impl TargetInfo {
    pub fn new(container_port: u16) -> Self {
        Self {
            container_port,
            port_name: None,
        }
    }

    pub fn named(container_port: u16, port_name: impl ToString) -> Self {
        Self {
            container_port,
            port_name: Some(port_name.to_string()),
        }
    }
}
