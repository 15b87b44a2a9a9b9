use serde::{Deserialize, Serialize};
use std::io;
use thiserror::Error;

/// Classified reason a probe did not produce a latency sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProbeErrorKind {
    Timeout,
    NoRoute,
    PermissionDenied,
    NameResolution,
    Unknown,
}

/// A failed probe together with a message for the log
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("no reply within {0} ms")]
    Timeout(u128),
    #[error("no route to host: {0}")]
    NoRoute(String),
    #[error("insufficient privileges for ICMP sockets: {0}")]
    PermissionDenied(String),
    #[error("failed to resolve {host}: {reason}")]
    NameResolution { host: String, reason: String },
    #[error("{0}")]
    Unknown(String),
}

impl ProbeError {
    pub fn kind(&self) -> ProbeErrorKind {
        match self {
            ProbeError::Timeout(_) => ProbeErrorKind::Timeout,
            ProbeError::NoRoute(_) => ProbeErrorKind::NoRoute,
            ProbeError::PermissionDenied(_) => ProbeErrorKind::PermissionDenied,
            ProbeError::NameResolution { .. } => ProbeErrorKind::NameResolution,
            ProbeError::Unknown(_) => ProbeErrorKind::Unknown,
        }
    }

    pub fn unknown(details: impl Into<String>) -> Self {
        Self::Unknown(details.into())
    }

    /// Classify an OS error raised while creating or using a probe socket
    pub fn from_io(err: &io::Error, timeout_ms: u128) -> Self {
        match err.kind() {
            io::ErrorKind::PermissionDenied => Self::PermissionDenied(err.to_string()),
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => Self::Timeout(timeout_ms),
            io::ErrorKind::NetworkUnreachable | io::ErrorKind::HostUnreachable => {
                Self::NoRoute(err.to_string())
            }
            _ => Self::Unknown(err.to_string()),
        }
    }
}

/// Path discovery failures. The engine turns these into an empty hop list.
#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("failed to resolve target {host}: {reason}")]
    Resolve { host: String, reason: String },
    #[error("insufficient privileges for traceroute sockets: {0}")]
    PermissionDenied(String),
    #[error("no hop answered within {max_hops} hops")]
    NoResponse { max_hops: u8 },
}

/// Errors reported by the engine API
#[derive(Error, Debug, PartialEq, Eq)]
pub enum MonitorError {
    #[error("no target set")]
    EmptyTarget,
    #[error("invalid target: {0}")]
    InvalidTarget(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_classification() {
        let denied = io::Error::from(io::ErrorKind::PermissionDenied);
        assert_eq!(
            ProbeError::from_io(&denied, 1000).kind(),
            ProbeErrorKind::PermissionDenied
        );

        let timeout = io::Error::from(io::ErrorKind::WouldBlock);
        assert_eq!(ProbeError::from_io(&timeout, 1000).kind(), ProbeErrorKind::Timeout);

        let unreachable = io::Error::from(io::ErrorKind::NetworkUnreachable);
        assert_eq!(
            ProbeError::from_io(&unreachable, 1000).kind(),
            ProbeErrorKind::NoRoute
        );

        let other = io::Error::other("boom");
        let err = ProbeError::from_io(&other, 1000);
        assert_eq!(err.kind(), ProbeErrorKind::Unknown);
        assert_eq!(err.to_string(), "boom");
    }

    #[cfg(unix)]
    #[test]
    fn test_raw_os_error_classification() {
        // The OS error codes reach us already mapped to an ErrorKind
        let eperm = io::Error::from_raw_os_error(1);
        assert_eq!(ProbeError::from_io(&eperm, 0).kind(), ProbeErrorKind::PermissionDenied);

        let eacces = io::Error::from_raw_os_error(13);
        assert_eq!(ProbeError::from_io(&eacces, 0).kind(), ProbeErrorKind::PermissionDenied);
    }
}
