use super::dialplan::ContextDialplan;
use super::{ConnectionHandler, Dispatcher};
use crate::call::registry::CallRegistry;
use crate::config::AgiConfig;
use crate::event::BroadcastEventBus;
use anyhow::{anyhow, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub struct AgiServerBuilder {
    config: Arc<AgiConfig>,
    cancel_token: Option<CancellationToken>,
    handler: Option<Arc<dyn ConnectionHandler>>,
}

impl AgiServerBuilder {
    pub fn new(config: Arc<AgiConfig>) -> Self {
        Self {
            config,
            cancel_token: None,
            handler: None,
        }
    }

    pub fn with_cancel_token(mut self, cancel_token: CancellationToken) -> Self {
        self.cancel_token = Some(cancel_token);
        self
    }

    pub fn with_handler(mut self, handler: Arc<dyn ConnectionHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    pub async fn build(self) -> Result<AgiServer> {
        let handler = self.handler.unwrap_or_else(|| {
            Arc::new(Dispatcher::new(
                Arc::new(CallRegistry::new()),
                Arc::new(ContextDialplan::new()),
                Arc::new(BroadcastEventBus::default()),
            ))
        });

        let bind_addr = self.config.bind_addr();
        let listener = TcpListener::bind(&bind_addr)
            .await
            .map_err(|e| anyhow!("agi: failed to bind {}: {}", bind_addr, e))?;
        let local_addr = listener.local_addr()?;

        Ok(AgiServer {
            listener,
            local_addr,
            handler,
            cancel_token: self.cancel_token.unwrap_or_default(),
        })
    }
}

/// Accepts FastAGI connections and hands each to the handler on its own task.
pub struct AgiServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    handler: Arc<dyn ConnectionHandler>,
    cancel_token: CancellationToken,
}

impl AgiServer {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    pub async fn serve(&self) -> Result<()> {
        info!("agi: listening on {}", self.local_addr);
        loop {
            select! {
                _ = self.cancel_token.cancelled() => {
                    info!("agi: listener cancelled");
                    return Ok(());
                }
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            debug!(%peer, "agi: accepted connection");
                            let handler = self.handler.clone();
                            tokio::spawn(async move {
                                handler.handle_connection(Box::new(stream), peer).await;
                            });
                        }
                        Err(e) => {
                            warn!("agi: accept failed: {}", e);
                            tokio::time::sleep(Duration::from_millis(100)).await;
                        }
                    }
                }
            }
        }
    }
}
