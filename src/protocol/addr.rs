use std::{
    fmt,
    net::{Ipv4Addr, SocketAddr, SocketAddrV4},
};

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressType {
    Ipv4 = 0x01,
    DomainName = 0x03,
    Ipv6 = 0x04,
}

impl AddressType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(AddressType::Ipv4),
            0x03 => Some(AddressType::DomainName),
            0x04 => Some(AddressType::Ipv6),
            _ => None,
        }
    }

    pub fn to_u8(&self) -> u8 {
        *self as u8
    }
}

/// Destination host of a CONNECT request.
///
/// IPv6 destinations are parsed by the codec but never reach this type:
/// they are rejected as unsupported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Addr {
    Ipv4(Ipv4Addr),
    Domain(String),
}

impl fmt::Display for Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Addr::Ipv4(ip) => write!(f, "{}", ip),
            Addr::Domain(domain) => write!(f, "{}", domain),
        }
    }
}

/// Host and port a CONNECT command asks the proxy to dial.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetAddr {
    pub addr: Addr,
    pub port: u16,
}

impl TargetAddr {
    pub fn new(addr: Addr, port: u16) -> Self {
        Self { addr, port }
    }

    /// `host:port` form accepted by `tokio::net::TcpStream::connect`.
    pub fn to_host_port(&self) -> String {
        format!("{}:{}", self.addr, self.port)
    }
}

impl fmt::Display for TargetAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.addr, self.port)
    }
}

impl From<SocketAddrV4> for TargetAddr {
    fn from(value: SocketAddrV4) -> Self {
        TargetAddr {
            addr: Addr::Ipv4(*value.ip()),
            port: value.port(),
        }
    }
}

/// Reduces a listening address to the IPv4 form carried in replies.
///
/// Replies always use the IPv4 layout, so an IPv6 listener reports the
/// unspecified IPv4 address with its real port.
pub fn reply_bound_addr(listen: SocketAddr) -> SocketAddrV4 {
    match listen {
        SocketAddr::V4(v4) => v4,
        SocketAddr::V6(v6) => SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, v6.port()),
    }
}
