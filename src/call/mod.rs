use crate::agi::AgiConnection;
use chrono::{DateTime, Utc};
use pipeline::{symbolize, CONTEXT, EXTENSION, QUERY, REQUEST, TYPE_OF_CALLING_NUMBER, UNIQUEID};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, RwLock};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::debug;
use url::Url;
use uuid::Uuid;
use variables::{PhoneNumber, TypeOfNumber, Value, Variables};

pub mod pipeline;
pub mod registry;
pub mod variables;

pub const CHANNEL: &str = "channel";
pub const CALLERID: &str = "callerid";
pub const CALLERIDNAME: &str = "calleridname";
pub const LANGUAGE: &str = "language";

/// A message handed to a call from another task.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CallMessage {
    pub from: Option<String>,
    pub body: serde_json::Value,
}

impl CallMessage {
    pub fn new(body: serde_json::Value) -> Self {
        Self { from: None, body }
    }

    pub fn from_call(from: &str, body: serde_json::Value) -> Self {
        Self {
            from: Some(from.to_string()),
            body,
        }
    }
}

/// One inbound AGI connection and the call it carries.
///
/// Variables are built once by the coercion pipeline and may be updated by the
/// dialplan afterwards. Tags and the inbox are shared with other tasks through
/// the registry, each behind its own lock so unrelated calls never contend.
pub struct Call {
    unique_identifier: String,
    variables: RwLock<Variables>,
    tags: Mutex<HashSet<String>>,
    inbox_tx: mpsc::UnboundedSender<CallMessage>,
    inbox_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<CallMessage>>,
    pending: AtomicUsize,
    connection: tokio::sync::Mutex<Option<AgiConnection>>,
    hung_up: AtomicBool,
    started_at: DateTime<Utc>,
}

impl fmt::Debug for Call {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Call")
            .field("unique_identifier", &self.unique_identifier)
            .field("started_at", &self.started_at)
            .field("hung_up", &self.is_hung_up())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

fn text_of(variables: &Variables, key: &str) -> Option<String> {
    variables
        .get(key)
        .filter(|v| !v.is_null())
        .map(Value::to_string)
        .filter(|text| !text.is_empty())
}

/// Channel, then uniqueid, then a generated `local-<uuid>`.
fn derive_identifier(variables: &Variables) -> String {
    text_of(variables, CHANNEL)
        .or_else(|| text_of(variables, UNIQUEID))
        .unwrap_or_else(|| format!("local-{}", Uuid::new_v4()))
}

impl Call {
    pub fn new(variables: Variables) -> Self {
        let unique_identifier = derive_identifier(&variables);
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        Self {
            unique_identifier,
            variables: RwLock::new(variables),
            tags: Mutex::new(HashSet::new()),
            inbox_tx,
            inbox_rx: tokio::sync::Mutex::new(inbox_rx),
            pending: AtomicUsize::new(0),
            connection: tokio::sync::Mutex::new(None),
            hung_up: AtomicBool::new(false),
            started_at: Utc::now(),
        }
    }

    pub fn with_connection(self, connection: AgiConnection) -> Self {
        Self {
            connection: tokio::sync::Mutex::new(Some(connection)),
            ..self
        }
    }

    pub fn unique_identifier(&self) -> &str {
        &self.unique_identifier
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn variables(&self) -> Variables {
        self.variables
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn variable(&self, key: &str) -> Option<Value> {
        self.variables
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    pub fn set_variable(&self, key: &str, value: Value) {
        self.variables
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(symbolize(key), value);
    }

    fn text_variable(&self, key: &str) -> Option<String> {
        self.variable(key)
            .filter(|v| !v.is_null())
            .map(|v| v.to_string())
    }

    pub fn channel(&self) -> Option<String> {
        self.text_variable(CHANNEL)
    }

    pub fn uniqueid(&self) -> Option<String> {
        self.text_variable(UNIQUEID)
    }

    pub fn context(&self) -> Option<String> {
        self.text_variable(CONTEXT)
    }

    pub fn callerid(&self) -> Option<String> {
        self.text_variable(CALLERID)
    }

    pub fn calleridname(&self) -> Option<String> {
        self.text_variable(CALLERIDNAME)
    }

    pub fn language(&self) -> Option<String> {
        self.text_variable(LANGUAGE)
    }

    pub fn extension(&self) -> Option<PhoneNumber> {
        match self.variable(EXTENSION)? {
            Value::PhoneNumber(number) => Some(number),
            Value::Null => None,
            other => Some(PhoneNumber::new(other.to_string())),
        }
    }

    pub fn request(&self) -> Option<Url> {
        match self.variable(REQUEST)? {
            Value::Uri(uri) => Some(uri),
            _ => None,
        }
    }

    pub fn query(&self) -> HashMap<String, String> {
        match self.variable(QUERY) {
            Some(Value::Map(query)) => query,
            _ => HashMap::new(),
        }
    }

    pub fn type_of_calling_number(&self) -> Option<TypeOfNumber> {
        match self.variable(TYPE_OF_CALLING_NUMBER)? {
            Value::TypeOfNumber(kind) => Some(kind),
            _ => None,
        }
    }

    pub fn originating_voip_platform(&self) -> &'static str {
        "asterisk"
    }

    fn extension_is(&self, name: &str) -> bool {
        self.extension()
            .map(|ext| ext.as_str() == name)
            .unwrap_or(false)
    }

    /// Meta call reporting an originate that never connected.
    pub fn is_failed_call(&self) -> bool {
        self.extension_is("failed")
    }

    /// Meta call sent to the `h` extension after the channel hung up.
    pub fn is_hungup_call(&self) -> bool {
        self.extension_is("h")
    }

    /// Meta call sent to the `t` (timeout) extension; nothing to run.
    pub fn is_useless_call(&self) -> bool {
        self.extension_is("t")
    }

    pub fn tag(&self, tag: impl Into<String>) {
        lock(&self.tags).insert(tag.into());
    }

    pub fn remove_tag(&self, tag: &str) -> bool {
        lock(&self.tags).remove(tag)
    }

    pub fn is_tagged_with(&self, tag: &str) -> bool {
        lock(&self.tags).contains(tag)
    }

    pub fn tags(&self) -> HashSet<String> {
        lock(&self.tags).clone()
    }

    /// Queues a message for this call. Never blocks.
    pub fn deliver(&self, message: CallMessage) {
        self.pending.fetch_add(1, Ordering::AcqRel);
        // the receiver lives as long as self, send cannot fail here
        if self.inbox_tx.send(message).is_err() {
            self.pending.fetch_sub(1, Ordering::AcqRel);
        }
    }

    /// Waits for the next message in delivery order.
    pub async fn receive(&self) -> Option<CallMessage> {
        let message = self.inbox_rx.lock().await.recv().await;
        if message.is_some() {
            self.pending.fetch_sub(1, Ordering::AcqRel);
        }
        message
    }

    pub fn try_receive(&self) -> Option<CallMessage> {
        let mut inbox = self.inbox_rx.try_lock().ok()?;
        let message = inbox.try_recv().ok();
        if message.is_some() {
            self.pending.fetch_sub(1, Ordering::AcqRel);
        }
        message
    }

    pub fn pending_messages(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// The live AGI connection, if this call still holds one.
    pub async fn connection(&self) -> tokio::sync::MutexGuard<'_, Option<AgiConnection>> {
        self.connection.lock().await
    }

    pub fn is_hung_up(&self) -> bool {
        self.hung_up.load(Ordering::Acquire)
    }

    /// Marks the call finished and closes its connection. Calling it again is
    /// a no-op.
    pub async fn hangup(&self) -> std::io::Result<()> {
        if self.hung_up.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let connection = self.connection.lock().await.take();
        if let Some(mut connection) = connection {
            debug!(call = %self.unique_identifier, "agi: closing connection");
            connection.shutdown().await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, BufReader};

    fn vars(pairs: &[(&str, Value)]) -> Variables {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_identifier_prefers_channel() {
        let call = Call::new(vars(&[
            ("channel", Value::from("SIP/alice-0001")),
            ("uniqueid", Value::from("1191245124.16")),
        ]));
        assert_eq!(call.unique_identifier(), "SIP/alice-0001");
    }

    #[test]
    fn test_identifier_falls_back_to_uniqueid() {
        let call = Call::new(vars(&[
            ("channel", Value::from("")),
            ("uniqueid", Value::from("1191245124.16")),
        ]));
        assert_eq!(call.unique_identifier(), "1191245124.16");

        let call = Call::new(vars(&[("uniqueid", Value::from("42"))]));
        assert_eq!(call.unique_identifier(), "42");
    }

    #[test]
    fn test_numeric_channel_is_identifier() {
        let call = Call::new(vars(&[
            ("channel", Value::Integer(4001)),
            ("uniqueid", Value::from("1191245124.16")),
        ]));
        assert_eq!(call.unique_identifier(), "4001");

        let headers = HashMap::from([
            ("agi_channel".to_string(), "4001".to_string()),
            ("agi_uniqueid".to_string(), "1191245124.16".to_string()),
        ]);
        let coerced = pipeline::CoercionPipeline::default().coerce(headers).unwrap();
        assert_eq!(Call::new(coerced).unique_identifier(), "4001");

        let call = Call::new(vars(&[
            ("channel", Value::Null),
            ("uniqueid", Value::from("1191245124.16")),
        ]));
        assert_eq!(call.unique_identifier(), "1191245124.16");
    }

    #[test]
    fn test_identifier_is_process_unique() {
        let a = Call::new(Variables::new());
        let b = Call::new(Variables::new());
        assert_ne!(a.unique_identifier(), b.unique_identifier());
        assert!(a.unique_identifier().starts_with("local-"));
    }

    #[test]
    fn test_identifier_is_fixed_at_construction() {
        let call = Call::new(vars(&[("channel", Value::from("SIP/a"))]));
        call.set_variable("channel", Value::from("SIP/b"));
        assert_eq!(call.unique_identifier(), "SIP/a");
        assert_eq!(call.channel().as_deref(), Some("SIP/b"));
    }

    #[test]
    fn test_meta_call_predicates() {
        let failed = Call::new(vars(&[(
            "extension",
            Value::PhoneNumber(PhoneNumber::new("failed")),
        )]));
        assert!(failed.is_failed_call());
        assert!(!failed.is_hungup_call());

        let hungup = Call::new(vars(&[("extension", Value::PhoneNumber(PhoneNumber::new("h")))]));
        assert!(hungup.is_hungup_call());
        assert_eq!(hungup.originating_voip_platform(), "asterisk");
    }

    #[test]
    fn test_tags() {
        let call = Call::new(Variables::new());
        call.tag("vip");
        call.tag("queue");
        assert!(call.is_tagged_with("vip"));
        assert!(call.remove_tag("vip"));
        assert!(!call.remove_tag("vip"));
        assert_eq!(call.tags(), HashSet::from(["queue".to_string()]));
    }

    #[tokio::test]
    async fn test_inbox_preserves_order() {
        let call = Call::new(Variables::new());
        for i in 1..=3 {
            call.deliver(CallMessage::new(serde_json::json!(i)));
        }
        assert_eq!(call.pending_messages(), 3);
        for i in 1..=3 {
            let message = call.receive().await.unwrap();
            assert_eq!(message.body, serde_json::json!(i));
        }
        assert_eq!(call.pending_messages(), 0);
        assert!(call.try_receive().is_none());
    }

    #[tokio::test]
    async fn test_inbox_order_with_concurrent_consumers() {
        let calls: Vec<Arc<Call>> = (0..8).map(|_| Arc::new(Call::new(Variables::new()))).collect();

        let mut consumers = Vec::new();
        for call in calls.iter().cloned() {
            consumers.push(tokio::spawn(async move {
                let mut received = Vec::new();
                for _ in 0..50 {
                    received.push(call.receive().await.unwrap().body);
                }
                received
            }));
        }

        let mut producers = Vec::new();
        for call in calls.iter().cloned() {
            producers.push(tokio::spawn(async move {
                for i in 0..50 {
                    call.deliver(CallMessage::from_call("producer", serde_json::json!(i)));
                    tokio::task::yield_now().await;
                }
            }));
        }
        for producer in producers {
            producer.await.unwrap();
        }

        for consumer in consumers {
            let received = consumer.await.unwrap();
            let expected: Vec<_> = (0..50).map(|i| serde_json::json!(i)).collect();
            assert_eq!(received, expected);
        }
    }

    #[tokio::test]
    async fn test_receive_waits_for_delivery() {
        let call = Arc::new(Call::new(Variables::new()));
        let consumer = {
            let call = call.clone();
            tokio::spawn(async move { call.receive().await })
        };
        tokio::task::yield_now().await;
        call.deliver(CallMessage::new(serde_json::json!("wake")));
        let message = consumer.await.unwrap().unwrap();
        assert_eq!(message.body, serde_json::json!("wake"));
    }

    #[tokio::test]
    async fn test_hangup_closes_connection() {
        let (client, server) = tokio::io::duplex(64);
        let stream: Box<dyn crate::agi::AgiStream> = Box::new(server);
        let call = Call::new(Variables::new()).with_connection(BufReader::new(stream));

        assert!(call.connection().await.is_some());
        call.hangup().await.unwrap();
        assert!(call.is_hung_up());
        assert!(call.connection().await.is_none());
        call.hangup().await.unwrap();

        let mut client = client;
        let mut buf = Vec::new();
        let read = client.read_to_end(&mut buf).await.unwrap();
        assert_eq!(read, 0);
    }
}
