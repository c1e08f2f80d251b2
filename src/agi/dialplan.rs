use crate::call::Call;
use crate::error::CallError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Runs application logic for a normal (non-meta) call.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Dialplan: Send + Sync {
    async fn handle(&self, call: Arc<Call>) -> Result<(), CallError>;
}

/// Takes over calls placed to confirm an outbound bridge before it completes.
#[async_trait]
pub trait ConfirmationHandler: Send + Sync {
    fn is_confirmation_call(&self, call: &Call) -> bool;
    async fn handle(&self, call: Arc<Call>) -> Result<(), CallError>;
}

/// Routes calls to a dialplan entry by their (normalized) context.
#[derive(Default)]
pub struct ContextDialplan {
    contexts: HashMap<String, Arc<dyn Dialplan>>,
}

impl ContextDialplan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_context(mut self, name: &str, entry: Arc<dyn Dialplan>) -> Self {
        self.contexts.insert(name.replace('-', "_"), entry);
        self
    }

    pub fn contexts(&self) -> Vec<&str> {
        self.contexts.keys().map(String::as_str).collect()
    }
}

#[async_trait]
impl Dialplan for ContextDialplan {
    async fn handle(&self, call: Arc<Call>) -> Result<(), CallError> {
        let context = call
            .context()
            .ok_or_else(|| CallError::NoContext("call carries no context".to_string()))?;
        let entry = self.contexts.get(&context).cloned().ok_or_else(|| {
            CallError::NoContext(format!("no dialplan entry for context {}", context))
        })?;
        debug!(call = call.unique_identifier(), context = %context, "agi: entering context");
        entry.handle(call).await
    }
}

pub const NETWORK_SCRIPT: &str = "network_script";

/// Recognizes confirmation calls by a prefix on the requested script name.
pub struct PrefixConfirmation {
    prefix: String,
    handler: Arc<dyn Dialplan>,
}

impl PrefixConfirmation {
    pub fn new(prefix: impl Into<String>, handler: Arc<dyn Dialplan>) -> Self {
        Self {
            prefix: prefix.into(),
            handler,
        }
    }
}

#[async_trait]
impl ConfirmationHandler for PrefixConfirmation {
    fn is_confirmation_call(&self, call: &Call) -> bool {
        call.variable(NETWORK_SCRIPT)
            .and_then(|script| script.as_str().map(|s| s.starts_with(&self.prefix)))
            .unwrap_or(false)
    }

    async fn handle(&self, call: Arc<Call>) -> Result<(), CallError> {
        self.handler.handle(call).await
    }
}
