//! A single TCP connection to one node.
//!
//! Connections are opened for one logical operation and dropped when it ends,
//! which closes the socket on every exit path.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::codec::Framed;
use tracing::debug;

use super::resp::{Command, Reply, RespCodec, RespError};
use super::types::NodeAddr;
use crate::error::{Result, TribError};

/// An open, framed connection to a node.
pub struct NodeConnection {
    addr: NodeAddr,
    framed: Framed<TcpStream, RespCodec>,
    command_timeout: Duration,
}

impl NodeConnection {
    /// Open a connection, failing with [`TribError::Connection`] when the node
    /// cannot be reached.
    pub async fn connect(
        addr: &NodeAddr,
        connect_timeout: Duration,
        command_timeout: Duration,
    ) -> Result<Self> {
        let target = (addr.host.as_str(), addr.port);
        let stream = match timeout(connect_timeout, TcpStream::connect(target)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => {
                return Err(TribError::Connection {
                    addr: addr.clone(),
                    source,
                });
            }
            Err(_) => {
                return Err(TribError::Timeout {
                    operation: format!("connect to {}", addr),
                    duration: connect_timeout,
                });
            }
        };
        stream.set_nodelay(true)?;
        debug!(node = %addr, "Connected");

        Ok(Self {
            addr: addr.clone(),
            framed: Framed::new(stream, RespCodec),
            command_timeout,
        })
    }

    /// Address this connection talks to.
    pub fn addr(&self) -> &NodeAddr {
        &self.addr
    }

    /// Send one command and wait for exactly one reply.
    pub async fn execute(&mut self, cmd: &Command) -> Result<Reply> {
        let limit = self.command_timeout;
        let addr = self.addr.clone();
        let framed = &mut self.framed;

        let round_trip = async move {
            framed.send(cmd).await.map_err(wire_error)?;
            match framed.next().await {
                Some(reply) => reply.map_err(wire_error),
                None => Err(TribError::ConnectionClosed { addr }),
            }
        };

        let outcome = timeout(limit, round_trip).await;
        match outcome {
            Ok(result) => result,
            Err(_) => Err(TribError::Timeout {
                operation: format!("'{}' on {}", cmd, self.addr),
                duration: limit,
            }),
        }
    }
}

/// Socket failures surface as IO errors, everything else as protocol errors.
fn wire_error(err: RespError) -> TribError {
    match err {
        RespError::Io(io) => TribError::Io(io),
        other => TribError::Protocol(other),
    }
}
