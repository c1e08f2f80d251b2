use crate::agi::dialplan::{ConfirmationHandler, ContextDialplan, Dialplan, PrefixConfirmation};
use crate::agi::{AgiServerBuilder, Dispatcher};
use crate::call::pipeline::CoercionPipeline;
use crate::call::registry::CallRegistry;
use crate::config::Config;
use crate::event::{BroadcastEventBus, EventBus};
use anyhow::Result;
use std::sync::Arc;
use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub struct AppStateInner {
    pub config: Arc<Config>,
    pub registry: Arc<CallRegistry>,
    pub events: Arc<dyn EventBus>,
    pub dialplan: Arc<dyn Dialplan>,
    pub confirmation: Option<Arc<dyn ConfirmationHandler>>,
    pub token: CancellationToken,
}

pub type AppState = Arc<AppStateInner>;

pub struct AppStateBuilder {
    pub config: Option<Config>,
    pub events: Option<Arc<dyn EventBus>>,
    pub dialplan: Option<Arc<dyn Dialplan>>,
    pub confirmation_dialplan: Option<Arc<dyn Dialplan>>,
    pub token: Option<CancellationToken>,
}

impl AppStateInner {
    pub fn dispatcher(&self) -> Dispatcher {
        let pipeline = CoercionPipeline::new(self.config.agi.key_prefix.clone());
        let dispatcher = Dispatcher::new(
            self.registry.clone(),
            self.dialplan.clone(),
            self.events.clone(),
        )
        .with_pipeline(pipeline);
        match self.confirmation {
            Some(ref confirmation) => dispatcher.with_confirmation(confirmation.clone()),
            None => dispatcher,
        }
    }
}

impl AppStateBuilder {
    pub fn new() -> Self {
        Self {
            config: None,
            events: None,
            dialplan: None,
            confirmation_dialplan: None,
            token: None,
        }
    }

    pub fn with_config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    pub fn with_event_bus(mut self, events: Arc<dyn EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_dialplan(mut self, dialplan: Arc<dyn Dialplan>) -> Self {
        self.dialplan = Some(dialplan);
        self
    }

    /// Handler for confirmation calls, recognized by the configured
    /// `confirmation_prefix`.
    pub fn with_confirmation_dialplan(mut self, dialplan: Arc<dyn Dialplan>) -> Self {
        self.confirmation_dialplan = Some(dialplan);
        self
    }

    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.token = Some(token);
        self
    }

    pub fn build(self) -> Result<AppState> {
        let config = Arc::new(self.config.unwrap_or_default());
        let events = self
            .events
            .unwrap_or_else(|| Arc::new(BroadcastEventBus::new(config.event_capacity)));
        let dialplan = self
            .dialplan
            .unwrap_or_else(|| Arc::new(ContextDialplan::new()));
        let confirmation = self.confirmation_dialplan.map(|handler| {
            Arc::new(PrefixConfirmation::new(
                config.agi.confirmation_prefix.clone(),
                handler,
            )) as Arc<dyn ConfirmationHandler>
        });

        Ok(Arc::new(AppStateInner {
            config,
            registry: Arc::new(CallRegistry::new()),
            events,
            dialplan,
            confirmation,
            token: self.token.unwrap_or_default(),
        }))
    }
}

pub async fn run(state: AppState) -> Result<()> {
    let token = state.token.clone();
    let server = AgiServerBuilder::new(Arc::new(state.config.agi.clone()))
        .with_cancel_token(token.child_token())
        .with_handler(Arc::new(state.dispatcher()))
        .build()
        .await?;

    select! {
        result = server.serve() => {
            if let Err(e) = result {
                tracing::error!("agi server error: {}", e);
                return Err(anyhow::anyhow!("agi server error: {}", e));
            }
        }
        _ = token.cancelled() => {
            info!("Application shutting down due to cancellation");
        }
    }
    token.cancel();

    let remaining = state.registry.count();
    if remaining > 0 {
        warn!("agi: dropping {} active calls on shutdown", remaining);
    }
    state.registry.clear();
    Ok(())
}
