use std::fmt;

/// CMD field of a command request.
///
/// Only [`Command::Connect`] is served. BIND and UDP ASSOCIATE are
/// recognised so they can be answered with a protocol-level reply instead
/// of being treated as garbage.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Connect = 0x01,
    Bind = 0x02,
    UdpAssociate = 0x03,
}

impl Command {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Command::Connect),
            0x02 => Some(Command::Bind),
            0x03 => Some(Command::UdpAssociate),
            _ => None,
        }
    }

    pub fn to_u8(&self) -> u8 {
        *self as u8
    }

    pub fn is_supported(&self) -> bool {
        matches!(self, Command::Connect)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Command::Connect => "CONNECT",
            Command::Bind => "BIND",
            Command::UdpAssociate => "UDP ASSOCIATE",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::Command;

    #[test]
    fn only_connect_is_supported() {
        assert!(Command::Connect.is_supported());
        assert!(!Command::Bind.is_supported());
        assert!(!Command::UdpAssociate.is_supported());
    }

    #[test]
    fn unknown_command_bytes_are_rejected() {
        assert_eq!(Command::from_u8(0x00), None);
        assert_eq!(Command::from_u8(0x04), None);
        assert_eq!(Command::from_u8(0x02), Some(Command::Bind));
    }
}
