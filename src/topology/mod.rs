//! In-memory cluster topology built from node self-reports.
//!
//! - [`node`]: one member with its slot ownership and open-slot state
//! - [`snapshot`]: the ordered collection, loaded from a seed node

pub mod node;
pub mod snapshot;

pub use node::Node;
pub use snapshot::ClusterSnapshot;
