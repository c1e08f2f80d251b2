use super::dialplan::{ConfirmationHandler, Dialplan};
use super::{protocol, AgiStream, ConnectionHandler};
use crate::call::pipeline::CoercionPipeline;
use crate::call::registry::CallRegistry;
use crate::call::Call;
use crate::error::{AgiError, CallError};
use crate::event::{EventBus, Topic, FAILED_CALL, HUNGUP_CALL};
use async_trait::async_trait;
use futures::FutureExt;
use std::any::Any;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::io::BufReader;
use tracing::{debug, error, info, warn};

/// How handling of one connection ended.
#[derive(Debug)]
pub enum CallOutcome {
    /// The dialplan ran to completion.
    Normal,
    /// The dialplan asked to hang up.
    Hangup,
    /// No dialplan entry matched the call.
    NoContext(String),
    /// Meta call for a failed originate.
    Failed,
    /// Meta call for the `h` extension.
    Hungup,
    /// Meta call for the `t` extension.
    Useless,
    /// Unexpected failure while handling the call.
    Error(anyhow::Error),
}

impl CallOutcome {
    pub fn name(&self) -> &'static str {
        match self {
            CallOutcome::Normal => "normal",
            CallOutcome::Hangup => "hangup",
            CallOutcome::NoContext(_) => "no_context",
            CallOutcome::Failed => "failed",
            CallOutcome::Hungup => "hungup",
            CallOutcome::Useless => "useless",
            CallOutcome::Error(_) => "error",
        }
    }
}

/// Removes the call from the registry when dropped, whichever way handling
/// ends.
struct Registration<'a> {
    registry: &'a CallRegistry,
    call: &'a Call,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        if self.registry.remove(self.call).is_none() {
            debug!(
                call = self.call.unique_identifier(),
                "agi: call was no longer registered"
            );
        }
    }
}

pub struct Dispatcher {
    registry: Arc<CallRegistry>,
    pipeline: CoercionPipeline,
    dialplan: Arc<dyn Dialplan>,
    confirmation: Option<Arc<dyn ConfirmationHandler>>,
    events: Arc<dyn EventBus>,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<CallRegistry>,
        dialplan: Arc<dyn Dialplan>,
        events: Arc<dyn EventBus>,
    ) -> Self {
        Self {
            registry,
            pipeline: CoercionPipeline::default(),
            dialplan,
            confirmation: None,
            events,
        }
    }

    pub fn with_pipeline(mut self, pipeline: CoercionPipeline) -> Self {
        self.pipeline = pipeline;
        self
    }

    pub fn with_confirmation(mut self, confirmation: Arc<dyn ConfirmationHandler>) -> Self {
        self.confirmation = Some(confirmation);
        self
    }

    pub fn registry(&self) -> &Arc<CallRegistry> {
        &self.registry
    }

    /// Reads the header block, registers the call and dispatches it.
    ///
    /// Errors are only returned for connections that never became a call;
    /// once registered, every outcome is reported through [`CallOutcome`] and
    /// the call is deregistered before this returns.
    pub async fn serve(&self, stream: Box<dyn AgiStream>) -> Result<CallOutcome, AgiError> {
        let mut connection = BufReader::new(stream);
        let headers = protocol::read_headers(&mut connection).await?;
        let variables = self.pipeline.coerce(headers)?;

        let call = Arc::new(Call::new(variables).with_connection(connection));
        self.registry.insert(call.clone());
        let _registration = Registration {
            registry: self.registry.as_ref(),
            call: call.as_ref(),
        };
        debug!(call = call.unique_identifier(), "agi: call registered");

        let outcome = AssertUnwindSafe(self.dispatch(call.clone()))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                let cause = anyhow::anyhow!("call handler panicked: {}", panic_message(&panic));
                error!(call = call.unique_identifier(), "agi: {:#}", cause);
                CallOutcome::Error(cause)
            });
        Ok(outcome)
    }

    async fn dispatch(&self, call: Arc<Call>) -> CallOutcome {
        if let Some(confirmation) = &self.confirmation {
            if confirmation.is_confirmation_call(&call) {
                info!(call = call.unique_identifier(), "agi: handling confirmation call");
                let result = confirmation.handle(call.clone()).await;
                return self.settle(&call, result).await;
            }
        }

        if call.is_failed_call() {
            self.notify_and_hangup(&call, FAILED_CALL).await;
            return CallOutcome::Failed;
        }
        if call.is_hungup_call() {
            self.notify_and_hangup(&call, HUNGUP_CALL).await;
            return CallOutcome::Hungup;
        }
        if call.is_useless_call() {
            info!(
                call = call.unique_identifier(),
                "agi: ignoring call to timeout extension"
            );
            self.hangup(&call).await;
            return CallOutcome::Useless;
        }

        let result = self.dialplan.handle(call.clone()).await;
        self.settle(&call, result).await
    }

    async fn settle(&self, call: &Call, result: Result<(), CallError>) -> CallOutcome {
        match result {
            Ok(()) => CallOutcome::Normal,
            Err(CallError::Hangup) => {
                info!(
                    call = call.unique_identifier(),
                    channel = %call.channel().unwrap_or_default(),
                    uniqueid = %call.uniqueid().unwrap_or_default(),
                    "agi: call hung up"
                );
                self.hangup(call).await;
                CallOutcome::Hangup
            }
            Err(CallError::NoContext(message)) => {
                warn!(call = call.unique_identifier(), "agi: {}", message);
                self.hangup(call).await;
                CallOutcome::NoContext(message)
            }
            Err(CallError::Failed(cause)) => {
                // connection is left as the dialplan left it
                error!(
                    call = call.unique_identifier(),
                    "agi: call handling failed: {:?}", cause
                );
                CallOutcome::Error(cause)
            }
        }
    }

    async fn notify_and_hangup(&self, call: &Arc<Call>, topic: Topic) {
        info!(call = call.unique_identifier(), %topic, "agi: meta call");
        if let Err(e) = self.events.notify(topic, call.clone()).await {
            error!(
                call = call.unique_identifier(),
                "agi: failed to notify {}: {:?}", topic, e
            );
        }
        self.hangup(call).await;
    }

    async fn hangup(&self, call: &Call) {
        if let Err(e) = call.hangup().await {
            warn!(
                call = call.unique_identifier(),
                "agi: error closing connection: {}", e
            );
        }
    }
}

fn panic_message(panic: &Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[async_trait]
impl ConnectionHandler for Dispatcher {
    async fn handle_connection(&self, stream: Box<dyn AgiStream>, peer: SocketAddr) {
        match self.serve(stream).await {
            Ok(outcome) => {
                debug!(%peer, outcome = outcome.name(), "agi: connection finished");
            }
            Err(AgiError::Protocol(e)) => {
                warn!(%peer, "agi: failed to read header block: {}", e);
            }
            Err(AgiError::Coercion(e)) => {
                warn!(%peer, "agi: rejected call variables: {}", e);
            }
        }
    }
}
