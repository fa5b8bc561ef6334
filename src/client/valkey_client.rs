//! The command execution seam and its TCP implementation.
//!
//! Every engine is generic over [`Commander`], so the whole tool can be driven
//! against an in-memory cluster in tests. [`TcpCommander`] is the production
//! implementation: one fresh connection per call, with transparent handling of
//! `MOVED` redirects.

use std::future::Future;

use tracing::{debug, instrument, warn};

use super::connection::NodeConnection;
use super::resp::{Command, Reply};
use super::types::NodeAddr;
use crate::config::TribConfig;
use crate::error::{Result, TribError};

/// Something that can run one command against one node.
pub trait Commander: Send + Sync {
    /// Execute `cmd` on `node` and return its reply.
    ///
    /// Error replies are returned as [`Reply::Error`]; only transport and
    /// framing failures are `Err`.
    fn execute(
        &self,
        node: &NodeAddr,
        cmd: &Command,
    ) -> impl Future<Output = Result<Reply>> + Send;
}

/// Commander that talks to real nodes over TCP.
#[derive(Clone, Debug, Default)]
pub struct TcpCommander {
    config: TribConfig,
}

impl TcpCommander {
    /// Create a commander with the given configuration.
    pub fn new(config: TribConfig) -> Self {
        Self { config }
    }

    /// Get the configuration.
    pub fn config(&self) -> &TribConfig {
        &self.config
    }

    /// Open a connection to `addr` with the configured deadlines.
    pub async fn connect(&self, addr: &NodeAddr) -> Result<NodeConnection> {
        NodeConnection::connect(addr, self.config.connect_timeout, self.config.command_timeout)
            .await
    }
}

impl Commander for TcpCommander {
    #[instrument(skip_all, fields(node = %node, command = %cmd))]
    async fn execute(&self, node: &NodeAddr, cmd: &Command) -> Result<Reply> {
        let mut target = node.clone();
        let mut redirects = 0usize;

        loop {
            let reply = {
                let mut conn = self.connect(&target).await?;
                conn.execute(cmd).await?
            };

            let Some((slot, owner)) = parse_moved(&reply) else {
                return Ok(reply);
            };

            if redirects >= self.config.max_redirects {
                warn!(limit = self.config.max_redirects, "Redirect limit reached");
                return Err(TribError::TooManyRedirects {
                    command: cmd.to_string(),
                    limit: self.config.max_redirects,
                });
            }
            redirects += 1;
            debug!(slot, from = %target, to = %owner, "Following MOVED redirect");
            target = owner;
        }
    }
}

/// Decode a `MOVED <slot> <host>:<port>` error reply.
pub fn parse_moved(reply: &Reply) -> Option<(u16, NodeAddr)> {
    let text = reply.as_error()?;
    let mut parts = text.split_whitespace();
    if parts.next()? != "MOVED" {
        return None;
    }
    let slot = parts.next()?.parse().ok()?;
    let addr = parts.next()?.parse().ok()?;
    Some((slot, addr))
}
