//! Types for parsed cluster information.
//!
//! These types represent node addresses and the parsed output of
//! `CLUSTER NODES`, the only topology discovery mechanism the tool uses.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use thiserror::Error;

/// Errors that can occur when parsing cluster data.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("Invalid cluster nodes format: {0}")]
    InvalidClusterNodes(String),
    #[error("Invalid slot range: {0}")]
    InvalidSlotRange(String),
    #[error("Invalid address: {0}")]
    InvalidAddress(String),
    #[error("Missing required field: {0}")]
    MissingField(String),
}

/// Opaque, cluster-assigned node identifier.
pub type NodeId = String;

/// Network address of one node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct NodeAddr {
    /// Hostname, IPv4 or IPv6 address.
    pub host: String,
    /// Client port.
    pub port: u16,
}

impl NodeAddr {
    /// Create an address from parts.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl FromStr for NodeAddr {
    type Err = ParseError;

    /// Parse `host:port`. The port is taken after the last colon so bare IPv6
    /// hosts work; `@cport` and `,hostname` suffixes are ignored.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let s = s.split('@').next().unwrap_or(s);
        let s = s.split(',').next().unwrap_or(s);
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| ParseError::InvalidAddress(s.to_string()))?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(ParseError::InvalidAddress(s.to_string()));
        }
        let port = port
            .parse()
            .map_err(|_| ParseError::InvalidAddress(format!("Invalid port in '{}'", s)))?;
        Ok(NodeAddr::new(host, port))
    }
}

impl fmt::Display for NodeAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Flags indicating the state of a cluster node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeFlags {
    /// This is the node that produced the report.
    pub myself: bool,
    /// Node is a master.
    pub master: bool,
    /// Node is a replica.
    pub slave: bool,
    /// Node is in PFAIL state.
    pub pfail: bool,
    /// Node is in FAIL state.
    pub fail: bool,
    /// Node is in handshake state.
    pub handshake: bool,
    /// Node has no address yet.
    pub noaddr: bool,
}

impl NodeFlags {
    /// Parse flags from the comma separated flags field.
    pub fn parse(flags_str: &str) -> Self {
        let mut flags = NodeFlags::default();
        for flag in flags_str.split(',') {
            match flag.trim() {
                "myself" => flags.myself = true,
                "master" => flags.master = true,
                "slave" | "replica" => flags.slave = true,
                "fail?" | "pfail" => flags.pfail = true,
                "fail" => flags.fail = true,
                "handshake" => flags.handshake = true,
                "noaddr" => flags.noaddr = true,
                _ => {}
            }
        }
        flags
    }
}

/// One line of `CLUSTER NODES` output.
///
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterNodesLine {
    /// Node ID.
    pub node_id: NodeId,
    /// Client address; `None` for entries whose host is not known yet, such
    /// as `:0@0` peers in handshake or a fresh node's own `myself` line.
    pub addr: Option<NodeAddr>,
    /// Node flags.
    pub flags: NodeFlags,
    /// Raw slot tokens (field 8 onward), including open-slot markers.
    pub slot_tokens: Vec<String>,
}

impl ClusterNodesLine {
    /// Parse a single line from `CLUSTER NODES` output.
    pub fn parse(line: &str) -> Result<Self, ParseError> {
        let parts: Vec<&str> = line.split_whitespace().collect();
        let field = |idx: usize, name: &str| -> Result<&str, ParseError> {
            parts
                .get(idx)
                .copied()
                .ok_or_else(|| ParseError::MissingField(format!("{} in line: {}", name, line)))
        };

        let node_id = field(0, "id")?.to_string();
        let addr = match field(1, "address")? {
            unknown if unknown.starts_with(':') => None,
            addr => Some(
                addr.parse()
                    .map_err(|e: ParseError| ParseError::InvalidClusterNodes(e.to_string()))?,
            ),
        };
        let flags = NodeFlags::parse(field(2, "flags")?);

        // Slots start at field 8 and are absent on replicas.
        let slot_tokens = parts
            .get(8..)
            .unwrap_or_default()
            .iter()
            .map(|s| s.to_string())
            .collect();

        Ok(ClusterNodesLine {
            node_id,
            addr,
            flags,
            slot_tokens,
        })
    }

    /// Slot tokens joined back into a slot string.
    pub fn slots_string(&self) -> String {
        self.slot_tokens.join(" ")
    }
}

/// Parse the whole output of `CLUSTER NODES`, skipping blank lines.
pub fn parse_cluster_nodes(output: &str) -> Result<Vec<ClusterNodesLine>, ParseError> {
    output
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(ClusterNodesLine::parse)
        .collect()
}
