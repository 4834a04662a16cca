use std::path::PathBuf;

use thiserror::Error;

use crate::mac::MacError;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("unable to read {}: {source}", .path.display())]
    Unreadable {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid JSON in {}: {source}", .path.display())]
    Malformed {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("missing required field '{0}'")]
    MissingField(&'static str),

    #[error("invalid value for '{field}': {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("device '{device}' has an invalid MAC address '{mac}': {source}")]
    InvalidMac {
        device: String,
        mac: String,
        source: MacError,
    },

    #[error("device name '{0}' is listed more than once")]
    DuplicateDevice(String),
}

#[derive(Error, Debug)]
pub enum CredentialError {
    #[error("no password configured and no terminal to prompt on: {0}")]
    NoTerminal(std::io::Error),

    #[error("password must not be empty")]
    Empty,
}

#[derive(Error, Debug)]
pub enum RouterError {
    /// Transport failure, including TLS verification
    #[error("{0}")]
    Connection(String),

    #[error("login rejected, check username and password")]
    Authentication,

    #[error("login blocked by the router for another {0} seconds")]
    Blocked(u32),

    /// Response did not have the shape this firmware is expected to return
    #[error("unexpected response from {endpoint}: {reason}")]
    Protocol {
        endpoint: &'static str,
        reason: String,
    },

    #[error("session was rejected by the router")]
    SessionExpired,

    #[error("no host with MAC address {0} is known to the router")]
    DeviceNotInRouter(String),

    #[error("router did not confirm the wake-up request")]
    WakeRejected,

    /// Non-success HTTP status
    #[error("{endpoint} returned HTTP {status}")]
    Request { endpoint: &'static str, status: u16 },
}

impl RouterError {
    pub(crate) fn protocol(endpoint: &'static str, reason: impl Into<String>) -> Self {
        RouterError::Protocol {
            endpoint,
            reason: reason.into(),
        }
    }
}

/// Everything that ends a run, each mapped to its own exit code.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("unknown device '{name}' (available: {available})")]
    UnknownDevice { name: String, available: String },

    #[error(transparent)]
    Credential(#[from] CredentialError),

    #[error(transparent)]
    Router(#[from] RouterError),
}

impl Error {
    pub fn exit_code(&self) -> u8 {
        match self {
            Error::Config(_) => 3,
            Error::UnknownDevice { .. } => 4,
            Error::Credential(_) => 5,
            Error::Router(err) => match err {
                RouterError::Connection(_) => 6,
                RouterError::Authentication | RouterError::Blocked(_) => 7,
                RouterError::Protocol { .. } => 8,
                RouterError::SessionExpired => 9,
                RouterError::DeviceNotInRouter(_)
                | RouterError::WakeRejected
                | RouterError::Request { .. } => 10,
            },
        }
    }

    /// Short label printed in front of the message.
    pub fn category(&self) -> &'static str {
        match self {
            Error::Config(_) => "Config",
            Error::UnknownDevice { .. } => "Device",
            Error::Credential(_) => "Credential",
            Error::Router(err) => match err {
                RouterError::Connection(_) => "Connection",
                RouterError::Authentication | RouterError::Blocked(_) => "Authentication",
                RouterError::Protocol { .. } => "Protocol",
                RouterError::SessionExpired => "Session",
                RouterError::DeviceNotInRouter(_)
                | RouterError::WakeRejected
                | RouterError::Request { .. } => "Request",
            },
        }
    }
}

#[test]
fn test_exit_codes_are_distinct_per_category() {
    let errors = [
        Error::from(ConfigError::MissingField("host")),
        Error::UnknownDevice {
            name: "nas".into(),
            available: "pc".into(),
        },
        Error::from(CredentialError::Empty),
        Error::from(RouterError::Connection("refused".into())),
        Error::from(RouterError::Authentication),
        Error::from(RouterError::protocol("login_sid.lua", "no SID")),
        Error::from(RouterError::SessionExpired),
        Error::from(RouterError::WakeRejected),
    ];

    let mut codes: Vec<u8> = errors.iter().map(Error::exit_code).collect();
    assert!(codes.iter().all(|&c| c != 0));
    codes.sort_unstable();
    codes.dedup();
    assert_eq!(codes.len(), errors.len());
}

#[test]
fn test_blocked_counts_as_authentication() {
    let err = Error::from(RouterError::Blocked(32));
    assert_eq!(err.exit_code(), Error::from(RouterError::Authentication).exit_code());
    assert_eq!(err.category(), "Authentication");
}
