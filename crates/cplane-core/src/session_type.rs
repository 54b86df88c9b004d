//! Kind of remote session an engine is asked to open.

use std::fmt;
use std::str::FromStr;

/// Remote session kind.
///
/// The engine decides how to reach the target from this: VNC/RDP go
/// through its graphical gateway, SSH/Telnet through a terminal, SFTP
/// through the file subsystem and `Tunnel` is a plain TCP forward.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum SessionType {
    Vnc,
    Rdp,
    Ssh,
    Sftp,
    Telnet,
    Tunnel,
}

impl SessionType {
    /// Wire representation (one byte).
    pub fn as_u8(self) -> u8 {
        match self {
            SessionType::Vnc => 0,
            SessionType::Rdp => 1,
            SessionType::Ssh => 2,
            SessionType::Sftp => 3,
            SessionType::Telnet => 4,
            SessionType::Tunnel => 5,
        }
    }

    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(SessionType::Vnc),
            1 => Some(SessionType::Rdp),
            2 => Some(SessionType::Ssh),
            3 => Some(SessionType::Sftp),
            4 => Some(SessionType::Telnet),
            5 => Some(SessionType::Tunnel),
            _ => None,
        }
    }

    /// Lowercase name, as used by the web layer (`"ssh"`, `"rdp"`, ...).
    pub fn as_str(self) -> &'static str {
        match self {
            SessionType::Vnc => "vnc",
            SessionType::Rdp => "rdp",
            SessionType::Ssh => "ssh",
            SessionType::Sftp => "sftp",
            SessionType::Telnet => "telnet",
            SessionType::Tunnel => "tunnel",
        }
    }
}

impl fmt::Display for SessionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a session type name is not recognised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownSessionType(pub String);

impl fmt::Display for UnknownSessionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown session type: {}", self.0)
    }
}

impl std::error::Error for UnknownSessionType {}

impl FromStr for SessionType {
    type Err = UnknownSessionType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "vnc" => Ok(SessionType::Vnc),
            "rdp" => Ok(SessionType::Rdp),
            "ssh" => Ok(SessionType::Ssh),
            "sftp" => Ok(SessionType::Sftp),
            "telnet" => Ok(SessionType::Telnet),
            "tunnel" => Ok(SessionType::Tunnel),
            _ => Err(UnknownSessionType(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_names_case_insensitively() {
        assert_eq!("SSH".parse::<SessionType>(), Ok(SessionType::Ssh));
        assert_eq!("tunnel".parse::<SessionType>(), Ok(SessionType::Tunnel));
        assert!("x11".parse::<SessionType>().is_err());
    }

    #[test]
    fn wire_byte_is_stable() {
        for t in [
            SessionType::Vnc,
            SessionType::Rdp,
            SessionType::Ssh,
            SessionType::Sftp,
            SessionType::Telnet,
            SessionType::Tunnel,
        ] {
            assert_eq!(SessionType::from_u8(t.as_u8()), Some(t));
        }
        assert_eq!(SessionType::from_u8(6), None);
    }
}
