use std::time::Duration;

use thiserror::Error;

/// Failure of a single operation on an established node handle.
///
/// The probe treats every variant the same way: the node is down for now.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("operation timed out after {}ms", .0.as_millis())]
    Timeout(Duration),
    #[error("connection error: {0}")]
    Connection(String),
    #[error("rejected by node: {0}")]
    Rejected(String),
}

/// Failure to establish a node handle.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConnectError {
    #[error("connect timed out after {}ms", .0.as_millis())]
    Timeout(Duration),
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),
    #[error("unreachable: {0}")]
    Unreachable(String),
}
