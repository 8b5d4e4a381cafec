use std::net::{Ipv4Addr, Ipv6Addr, SocketAddrV4};

use thiserror::Error;

use super::{Addr, AddressType, AuthMethod, Command, Reply, TargetAddr, RESERVED, VERSION};

/// Length of [`encode_auth_ack`]'s output.
pub const AUTH_ACK_LEN: usize = 2;
/// Length of [`encode_reply`]'s output.
pub const REPLY_LEN: usize = 10;

/// Largest greeting: 255 methods.
pub const MAX_GREETING_LEN: usize = 2 + u8::MAX as usize;
/// Largest command request: a 255-byte domain name.
pub const MAX_REQUEST_LEN: usize = COMMAND_HEADER_LEN + 1 + u8::MAX as usize + 2;

const COMMAND_HEADER_LEN: usize = 4;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("unsupported protocol version {0}, only SOCKS5 is supported")]
    ProtocolVersion(u8),
    #[error("greeting declares {declared} methods but is {actual} bytes long")]
    LengthMismatch { declared: u8, actual: usize },
    #[error("address type {0:#04x} is not supported")]
    UnsupportedAddress(u8),
    #[error("command {0:#04x} is not supported")]
    UnsupportedCommand(u8),
    #[error("domain name is not valid utf-8")]
    InvalidDomain,
    #[error("message truncated: needed {needed} bytes, got {actual}")]
    Truncated { needed: usize, actual: usize },
}

impl DecodeError {
    /// Reply status for errors the client can be told about.
    ///
    /// Malformed framing has no reply: the client sees the connection close.
    pub fn reply(&self) -> Option<Reply> {
        match self {
            DecodeError::UnsupportedAddress(_) => Some(Reply::AddressTypeNotSupported),
            DecodeError::UnsupportedCommand(_) => Some(Reply::CommandNotSupported),
            DecodeError::InvalidDomain => Some(Reply::HostUnreachable),
            _ => None,
        }
    }
}

/// Method negotiation message, the first thing a client sends.
///
/// ```text
/// +----+----------+----------+
/// |VER | NMETHODS | METHODS  |
/// +----+----------+----------+
/// | 1  |    1     | 1 to 255 |
/// +----+----------+----------+
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Greeting {
    pub methods: Vec<AuthMethod>,
}

impl Greeting {
    pub fn method_count(&self) -> usize {
        self.methods.len()
    }
}

/// ```text
/// +----+-----+-------+------+----------+----------+
/// |VER | CMD |  RSV  | ATYP | DST.ADDR | DST.PORT |
/// +----+-----+-------+------+----------+----------+
/// | 1  |  1  | X'00' |  1   | Variable |    2     |
/// +----+-----+-------+------+----------+----------+
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRequest {
    pub command: Command,
    pub target: TargetAddr,
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        let end = self.pos + n;
        let bytes = self.buf.get(self.pos..end).ok_or(DecodeError::Truncated {
            needed: end,
            actual: self.buf.len(),
        })?;
        self.pos = end;
        Ok(bytes)
    }

    fn read_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    fn read_u16(&mut self) -> Result<u16, DecodeError> {
        let bytes = self.take(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn read_version(&mut self) -> Result<(), DecodeError> {
        match self.read_u8()? {
            VERSION => Ok(()),
            other => Err(DecodeError::ProtocolVersion(other)),
        }
    }
}

/// Port carried in the last two bytes of `buf`.
fn trailing_port(buf: &[u8], min_len: usize) -> Result<u16, DecodeError> {
    if buf.len() < min_len {
        return Err(DecodeError::Truncated {
            needed: min_len,
            actual: buf.len(),
        });
    }
    let tail = &buf[buf.len() - 2..];
    Ok(u16::from_be_bytes([tail[0], tail[1]]))
}

pub fn decode_greeting(buf: &[u8]) -> Result<Greeting, DecodeError> {
    let mut cursor = Cursor::new(buf);
    cursor.read_version()?;

    let declared = cursor.read_u8()?;
    if buf.len() != declared as usize + 2 {
        return Err(DecodeError::LengthMismatch {
            declared,
            actual: buf.len(),
        });
    }

    let methods = cursor
        .take(declared as usize)?
        .iter()
        .copied()
        .map(AuthMethod::from_u8)
        .collect();

    Ok(Greeting { methods })
}

pub fn decode_command_request(buf: &[u8]) -> Result<CommandRequest, DecodeError> {
    let mut cursor = Cursor::new(buf);
    cursor.read_version()?;

    let command = cursor.read_u8()?;
    let command = Command::from_u8(command).ok_or(DecodeError::UnsupportedCommand(command))?;

    // RSV is ignored, clients are not required to zero it
    cursor.read_u8()?;
    let atyp = cursor.read_u8()?;

    let target = match AddressType::from_u8(atyp) {
        Some(AddressType::DomainName) => {
            let len = cursor.read_u8()? as usize;
            let host = std::str::from_utf8(cursor.take(len)?)
                .map_err(|_| DecodeError::InvalidDomain)?
                .to_owned();
            let port = cursor.read_u16()?;
            TargetAddr::new(Addr::Domain(host), port)
        }
        Some(AddressType::Ipv4) => {
            let octets = cursor.take(4)?;
            let ip = Ipv4Addr::new(octets[0], octets[1], octets[2], octets[3]);
            let port = trailing_port(buf, COMMAND_HEADER_LEN + 4 + 2)?;
            TargetAddr::new(Addr::Ipv4(ip), port)
        }
        _ => {
            if let (Ok(octets), Ok(port)) = (
                cursor.take(16),
                trailing_port(buf, COMMAND_HEADER_LEN + 16 + 2),
            ) {
                let mut raw = [0u8; 16];
                raw.copy_from_slice(octets);
                tracing::trace!(host = %Ipv6Addr::from(raw), port, "rejecting IPv6 destination");
            }
            return Err(DecodeError::UnsupportedAddress(atyp));
        }
    };

    Ok(CommandRequest { command, target })
}

/// Method selection message. The engine always selects "no authentication".
pub fn encode_auth_ack() -> [u8; AUTH_ACK_LEN] {
    [VERSION, AuthMethod::NoAuthRequired.to_u8()]
}

/// Command reply reporting `bound` as BND.ADDR / BND.PORT.
pub fn encode_reply(status: Reply, bound: SocketAddrV4) -> [u8; REPLY_LEN] {
    let [a, b, c, d] = bound.ip().octets();
    let [port_hi, port_lo] = bound.port().to_be_bytes();
    [
        VERSION,
        status.to_u8(),
        RESERVED,
        AddressType::Ipv4.to_u8(),
        a,
        b,
        c,
        d,
        port_hi,
        port_lo,
    ]
}
