use std::{fmt::Display, result};

use strum_macros::AsRefStr;

use crate::protocol::gpib::VendorStatus;

pub type Result<T, E = Error> = result::Result<T, E>;

/// Link operation during which a vendor driver reported a failure
#[derive(Clone, Copy, Debug, PartialEq, Eq, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum Operation {
    Open,
    Write,
    Read,
    Close,
}

/// Coarse classification of an [`Error`], for callers that only care about
/// which part of the exchange went wrong
#[derive(Clone, Copy, Debug, PartialEq, Eq, AsRefStr)]
pub enum ErrorKind {
    Connect,
    Write,
    Read,
    Close,
    Timeout,
    Protocol,
    /// Call made in the wrong session state
    State,
    Config,
    /// Local I/O outside of a link, e.g. console input
    Io,
}

#[derive(Debug)]
pub enum Error {
    /// Link establishment failed (bad address, port busy, driver init failure)
    Connect(String),
    /// Writing a command failed
    Write(String),
    /// Reading failed for a reason other than a timeout
    Read(String),
    /// Releasing the link failed
    Close(String),
    /// No terminator arrived within the allotted time
    Timeout(String),
    /// Vendor driver returned a failure status, kept for diagnostics
    Protocol {
        op: Operation,
        status: VendorStatus,
    },
    /// Operation requires an open link
    NotConnected,
    /// Open requested while a link is already open
    AlreadyOpen,
    /// Device returned a response that we could not properly handle
    BadResponse(String),
    /// Endpoint description could not be understood
    InvalidConfig(String),
    /// Transport or driver not available in this build/configuration
    NotSupported(String),
    IoError(std::io::Error),
}
impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Connect(_) => ErrorKind::Connect,
            Error::Write(_) => ErrorKind::Write,
            Error::Read(_) => ErrorKind::Read,
            Error::Close(_) => ErrorKind::Close,
            Error::Timeout(_) => ErrorKind::Timeout,
            Error::Protocol { .. } | Error::BadResponse(_) => ErrorKind::Protocol,
            Error::NotConnected | Error::AlreadyOpen => ErrorKind::State,
            Error::InvalidConfig(_) | Error::NotSupported(_) => ErrorKind::Config,
            Error::IoError(_) => ErrorKind::Io,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout(_))
    }

    /// Vendor status attached to a driver failure, if any
    pub fn vendor_status(&self) -> Option<&VendorStatus> {
        match self {
            Error::Protocol { status, .. } => Some(status),
            _ => None,
        }
    }

    /// Placeholder text shown in place of a response line when a query fails
    pub fn sentinel(&self) -> &'static str {
        if self.is_timeout() { "Timeout" } else { "Error" }
    }
}
impl std::error::Error for Error {}
impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Connect(desc) => write!(f, "Connect error: {desc}"),
            Error::Write(desc) => write!(f, "Write error: {desc}"),
            Error::Read(desc) => write!(f, "Read error: {desc}"),
            Error::Close(desc) => write!(f, "Close error: {desc}"),
            Error::Timeout(desc) => write!(f, "Timed out: {desc}"),
            Error::Protocol { op, status } => {
                write!(f, "Driver error during {}: {status}", op.as_ref())
            }
            Error::NotConnected => write!(f, "Not connected"),
            Error::AlreadyOpen => write!(f, "Already connected"),
            Error::BadResponse(e) => write!(f, "Bad response: {e}"),
            Error::InvalidConfig(e) => write!(f, "Invalid configuration: {e}"),
            Error::NotSupported(e) => write!(f, "Not supported: {e}"),
            Error::IoError(e) => write!(f, "IO error: {e}"),
        }
    }
}
impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::IoError(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::gpib::{ContecStatus, NiStatus};

    #[test]
    fn display_includes_detail() {
        let e = Error::Connect("192.0.2.1:8802: connection refused".into());
        assert_eq!(
            e.to_string(),
            "Connect error: 192.0.2.1:8802: connection refused"
        );
        assert_eq!(Error::NotConnected.to_string(), "Not connected");
    }

    #[test]
    fn kinds() {
        assert_eq!(Error::Write("x".into()).kind(), ErrorKind::Write);
        assert_eq!(Error::Timeout("x".into()).kind(), ErrorKind::Timeout);
        assert_eq!(Error::AlreadyOpen.kind(), ErrorKind::State);
        assert_eq!(Error::InvalidConfig("x".into()).kind(), ErrorKind::Config);
        assert_eq!(
            Error::from(std::io::Error::other("stdin closed")).kind(),
            ErrorKind::Io
        );

        let e = Error::Protocol {
            op: Operation::Read,
            status: VendorStatus::Contec(ContecStatus::new("GpListen", 252)),
        };
        assert_eq!(e.kind(), ErrorKind::Protocol);
    }

    #[test]
    fn sentinel_text() {
        assert_eq!(Error::Timeout("x".into()).sentinel(), "Timeout");
        assert_eq!(Error::Read("x".into()).sentinel(), "Error");
        assert_eq!(Error::NotConnected.sentinel(), "Error");
    }

    #[test]
    fn vendor_status_is_kept() {
        let status = NiStatus {
            ibsta: 0x8000,
            iberr: 2,
            ibcnt: 0,
        };
        let e = Error::Protocol {
            op: Operation::Write,
            status: VendorStatus::Ni(status),
        };
        assert_eq!(e.vendor_status(), Some(&VendorStatus::Ni(status)));
        assert_eq!(
            e.to_string(),
            "Driver error during write: ibsta = 0x8000, iberr = 2, ENOL"
        );
        assert!(Error::NotConnected.vendor_status().is_none());
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Error>();
    }
}
