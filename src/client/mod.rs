//! Client side of the node wire protocol.
//!
//! ## Architecture
//!
//! - `resp`: request encoding and reply decoding (`tokio_util` codec)
//! - `connection`: one framed TCP connection with deadlines
//! - `valkey_client`: the [`Commander`] seam and [`TcpCommander`] with MOVED handling
//! - `cluster_ops`: typed administrative commands for any [`Commander`]
//! - `types`: addresses and `CLUSTER NODES` lines
//! - `parsing`: `INFO` text parsing
//!
//! ## Example
//!
//! ```rust,ignore
//! use valkey_trib::client::{ClusterOps, TcpCommander};
//!
//! let client = TcpCommander::default();
//! let addr = "127.0.0.1:7000".parse()?;
//! if client.ping(&addr).await? {
//!     println!("{}", client.cluster_nodes(&addr).await?);
//! }
//! ```

pub mod cluster_ops;
pub mod connection;
pub mod parsing;
pub mod resp;
pub mod types;
pub mod valkey_client;

pub use cluster_ops::{ClusterOps, MigrateStatus, SetSlot};
pub use resp::{Command, Reply};
pub use types::{ClusterNodesLine, NodeAddr, NodeFlags, NodeId};
pub use valkey_client::{Commander, TcpCommander};
