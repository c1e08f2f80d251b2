use crate::call::variables::Variables;
use crate::call::Call;
use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// Event topic as a `(namespace, name)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Topic {
    pub namespace: &'static str,
    pub name: &'static str,
}

impl Topic {
    pub const fn new(namespace: &'static str, name: &'static str) -> Self {
        Self { namespace, name }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// An originate attempt that never connected.
pub const FAILED_CALL: Topic = Topic::new("asterisk", "failed_call");
/// The `h` extension ran after a channel hung up.
pub const HUNGUP_CALL: Topic = Topic::new("asterisk", "hungup_call");

/// Receives call notifications. Implementations may fail; the caller decides
/// what a failure means.
#[async_trait]
pub trait EventBus: Send + Sync {
    async fn notify(&self, topic: Topic, call: Arc<Call>) -> Result<()>;
}

/// Snapshot of a call at notification time.
#[derive(Debug, Clone, Serialize)]
pub struct CallEvent {
    pub topic: Topic,
    pub call_id: String,
    pub variables: Variables,
}

/// Type alias for the event sender
pub type EventSender = tokio::sync::broadcast::Sender<CallEvent>;

/// Type alias for the event receiver
pub type EventReceiver = tokio::sync::broadcast::Receiver<CallEvent>;

pub struct BroadcastEventBus {
    sender: EventSender,
}

impl Default for BroadcastEventBus {
    fn default() -> Self {
        Self::new(128)
    }
}

impl BroadcastEventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = tokio::sync::broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> EventReceiver {
        self.sender.subscribe()
    }
}

#[async_trait]
impl EventBus for BroadcastEventBus {
    async fn notify(&self, topic: Topic, call: Arc<Call>) -> Result<()> {
        let event = CallEvent {
            topic,
            call_id: call.unique_identifier().to_string(),
            variables: call.variables(),
        };
        // no subscribers is fine
        self.sender.send(event).ok();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::variables::Value;

    #[tokio::test]
    async fn test_broadcast_delivers_to_subscribers() {
        let bus = BroadcastEventBus::new(4);
        let mut rx = bus.subscribe();

        let mut vars = Variables::new();
        vars.insert("channel".to_string(), Value::from("SIP/alice-1"));
        let call = Arc::new(Call::new(vars));

        bus.notify(FAILED_CALL, call).await.unwrap();
        let event = rx.recv().await.unwrap();
        assert_eq!(event.topic, FAILED_CALL);
        assert_eq!(event.call_id, "SIP/alice-1");
        assert_eq!(event.topic.to_string(), "asterisk/failed_call");
    }

    #[tokio::test]
    async fn test_notify_without_subscribers() {
        let bus = BroadcastEventBus::default();
        let call = Arc::new(Call::new(Variables::new()));
        assert!(bus.notify(HUNGUP_CALL, call).await.is_ok());
    }
}
