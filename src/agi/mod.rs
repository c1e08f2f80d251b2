use async_trait::async_trait;
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};

pub mod dialplan;
pub mod dispatcher;
pub mod protocol;
pub mod server;
#[cfg(test)]
mod tests;

pub use dispatcher::{CallOutcome, Dispatcher};
pub use server::{AgiServer, AgiServerBuilder};

/// Byte stream a switch talks AGI over.
pub trait AgiStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> AgiStream for T {}

/// A connection after its header block has been consumed.
pub type AgiConnection = BufReader<Box<dyn AgiStream>>;

/// Takes ownership of one accepted connection and handles it to completion.
#[async_trait]
pub trait ConnectionHandler: Send + Sync {
    async fn handle_connection(&self, stream: Box<dyn AgiStream>, peer: SocketAddr);
}
