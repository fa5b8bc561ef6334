//! valkey-trib library crate
//!
//! Administration of Valkey/Redis clusters: creating a cluster from empty
//! nodes, checking and repairing slot ownership, rebalancing slots by weight
//! and adding or removing nodes.
//!
//! Every engine is generic over [`client::Commander`], so the same code runs
//! against real nodes through [`client::TcpCommander`] and against in-memory
//! fakes in tests.

pub mod client;
pub mod commands;
pub mod config;
pub mod error;
pub mod repair;
pub mod slots;
pub mod topology;

pub use client::{Commander, TcpCommander};
pub use config::TribConfig;
pub use error::{Result, TribError};
pub use topology::{ClusterSnapshot, Node};
