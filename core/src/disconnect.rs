//! Disconnect reason codes and their classification
//!
//! The protocol client closes a connection with a numeric status code. Every
//! code maps to exactly one class; message text is never consulted.

use std::fmt;

/// Known disconnect reasons
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DisconnectReason {
    /// Session logged out from the phone (401)
    LoggedOut,
    /// Account blocked from connecting (403)
    Forbidden,
    /// Client version rejected by the server (405)
    VersionMismatch,
    /// Connection lost or handshake timed out (408)
    TimedOut,
    /// Paired device no longer recognised; needs re-pairing (411)
    MultideviceMismatch,
    /// Connection closed by the server (428)
    ConnectionClosed,
    /// Session opened elsewhere (440)
    ConnectionReplaced,
    /// Stream error or corrupted session (500)
    BadSession,
    /// Service temporarily unavailable (503)
    Unavailable,
    /// Server asked for a restart after pairing (515)
    RestartRequired,
}

impl DisconnectReason {
    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            401 => Some(Self::LoggedOut),
            403 => Some(Self::Forbidden),
            405 => Some(Self::VersionMismatch),
            408 => Some(Self::TimedOut),
            411 => Some(Self::MultideviceMismatch),
            428 => Some(Self::ConnectionClosed),
            440 => Some(Self::ConnectionReplaced),
            500 => Some(Self::BadSession),
            503 => Some(Self::Unavailable),
            515 => Some(Self::RestartRequired),
            _ => None,
        }
    }

    pub fn code(&self) -> u16 {
        match self {
            Self::LoggedOut => 401,
            Self::Forbidden => 403,
            Self::VersionMismatch => 405,
            Self::TimedOut => 408,
            Self::MultideviceMismatch => 411,
            Self::ConnectionClosed => 428,
            Self::ConnectionReplaced => 440,
            Self::BadSession => 500,
            Self::Unavailable => 503,
            Self::RestartRequired => 515,
        }
    }

    /// Class of this reason
    pub fn class(&self) -> DisconnectClass {
        match self {
            Self::LoggedOut | Self::MultideviceMismatch => DisconnectClass::Terminal,
            Self::VersionMismatch
            | Self::TimedOut
            | Self::ConnectionClosed
            | Self::ConnectionReplaced
            | Self::BadSession
            | Self::Unavailable
            | Self::RestartRequired => DisconnectClass::Transient,
            Self::Forbidden => DisconnectClass::Unclassified,
        }
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::LoggedOut => "logged out",
            Self::Forbidden => "forbidden",
            Self::VersionMismatch => "version mismatch",
            Self::TimedOut => "timed out",
            Self::MultideviceMismatch => "multi-device mismatch",
            Self::ConnectionClosed => "connection closed",
            Self::ConnectionReplaced => "connection replaced",
            Self::BadSession => "bad session",
            Self::Unavailable => "service unavailable",
            Self::RestartRequired => "restart required",
        };
        write!(f, "{} ({})", name, self.code())
    }
}

/// What a disconnect means for the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectClass {
    /// Expected to resolve by reconnecting in-process
    Transient,
    /// Session permanently invalid; credentials must be wiped
    Terminal,
    /// Unknown failure mode; leave recovery to the external supervisor
    Unclassified,
}

/// Why a connection ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disconnect {
    /// The client closed the connection with an optional status code
    Closed { code: Option<u16>, reason: String },
    /// The connection could not be established
    ConnectFailed(String),
}

impl Disconnect {
    pub fn code(&self) -> Option<u16> {
        match self {
            Self::Closed { code, .. } => *code,
            Self::ConnectFailed(_) => None,
        }
    }

    /// Classify this disconnect. Startup failures are retried like transient drops.
    pub fn classify(&self) -> DisconnectClass {
        match self {
            Self::Closed { code, .. } => classify(*code),
            Self::ConnectFailed(_) => DisconnectClass::Transient,
        }
    }
}

impl fmt::Display for Disconnect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed { code: Some(code), reason } => match DisconnectReason::from_code(*code) {
                Some(known) => write!(f, "{}: {}", known, reason),
                None => write!(f, "code {}: {}", code, reason),
            },
            Self::Closed { code: None, reason } => write!(f, "no code: {}", reason),
            Self::ConnectFailed(reason) => write!(f, "connect failed: {}", reason),
        }
    }
}

/// Classify a raw status code
pub fn classify(code: Option<u16>) -> DisconnectClass {
    code.and_then(DisconnectReason::from_code)
        .map(|reason| reason.class())
        .unwrap_or(DisconnectClass::Unclassified)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_codes() {
        for code in [405, 408, 428, 440, 500, 503, 515] {
            assert_eq!(classify(Some(code)), DisconnectClass::Transient, "code {}", code);
        }
    }

    #[test]
    fn test_terminal_and_unclassified_codes() {
        assert_eq!(classify(Some(401)), DisconnectClass::Terminal);
        assert_eq!(classify(Some(411)), DisconnectClass::Terminal);
        assert_eq!(classify(Some(403)), DisconnectClass::Unclassified);
        assert_eq!(classify(Some(999)), DisconnectClass::Unclassified);
        assert_eq!(classify(None), DisconnectClass::Unclassified);
    }

    #[test]
    fn test_codes_roundtrip() {
        for code in [401, 403, 405, 408, 411, 428, 440, 500, 503, 515] {
            assert_eq!(DisconnectReason::from_code(code).map(|r| r.code()), Some(code));
        }
    }

    #[test]
    fn test_connect_failure_is_transient() {
        let failed = Disconnect::ConnectFailed("bridge refused".to_string());
        assert_eq!(failed.classify(), DisconnectClass::Transient);
        assert_eq!(failed.code(), None);
        assert_eq!(
            Disconnect::Closed { code: Some(440), reason: "Replaced".to_string() }.to_string(),
            "connection replaced (440): Replaced"
        );
    }
}
