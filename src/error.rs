//! Error types for cluster administration.
//!
//! Every engine returns [`TribError`]; the binary decides exit codes. Errors are
//! classified so the outer layer can tell connectivity failures from refused
//! commands and preflight rejections.

use std::time::Duration;

use thiserror::Error;

use crate::client::resp::RespError;
use crate::client::types::{NodeAddr, ParseError};

/// Error type for cluster administration operations
#[derive(Error, Debug)]
pub enum TribError {
    /// The node could not be reached
    #[error("Can't connect to node {addr}: {source}")]
    Connection {
        addr: NodeAddr,
        #[source]
        source: std::io::Error,
    },

    /// The node closed the connection before replying
    #[error("Connection to {addr} closed before a reply was received")]
    ConnectionClosed { addr: NodeAddr },

    /// A connect or command deadline expired
    #[error("Timeout after {duration:?}: {operation}")]
    Timeout {
        operation: String,
        duration: Duration,
    },

    /// Socket level failure after the connection was established
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The node sent a frame that is not valid protocol
    #[error("Protocol error: {0}")]
    Protocol(#[from] RespError),

    /// The node answered a control command with an error or a non-OK status
    #[error("Node {node} refused '{command}': {reply}")]
    CommandFailed {
        node: NodeAddr,
        command: String,
        reply: String,
    },

    /// The node answered with a reply of the wrong shape
    #[error("Unexpected reply from {node} to '{command}': {reply}")]
    UnexpectedReply {
        node: NodeAddr,
        command: String,
        reply: String,
    },

    /// MOVED redirects did not settle within the configured limit
    #[error("'{command}' was redirected more than {limit} times")]
    TooManyRedirects { command: String, limit: usize },

    /// A precondition failed before any mutation was attempted
    #[error("{0}")]
    Preflight(String),

    /// No node matches the given name or address
    #[error("No such node: {0}")]
    NodeNotFound(String),

    /// Two nodes in one snapshot share an identity
    #[error("Node {0} is already part of the snapshot")]
    DuplicateNode(String),

    /// Text reported by a node could not be parsed
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    /// Nodes disagree about the cluster configuration
    #[error("Consistency error: {0}")]
    Consistency(String),
}

impl TribError {
    /// Check if this error means a node could not be talked to at all
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            TribError::Connection { .. }
                | TribError::ConnectionClosed { .. }
                | TribError::Timeout { .. }
                | TribError::Io(_)
        )
    }

    /// Check if this error was raised before the cluster was touched
    pub fn is_preflight(&self) -> bool {
        matches!(
            self,
            TribError::Preflight(_) | TribError::NodeNotFound(_) | TribError::DuplicateNode(_)
        )
    }
}

/// Result type alias for cluster administration operations
pub type Result<T> = std::result::Result<T, TribError>;
