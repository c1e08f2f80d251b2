use crate::agi::dialplan::Dialplan;
use crate::agi::{CallOutcome, Dispatcher};
use crate::call::registry::CallRegistry;
use crate::call::Call;
use crate::error::{AgiError, CallError};
use crate::event::{EventBus, Topic};
use anyhow::Result;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncWriteExt, DuplexStream};
use tokio::sync::mpsc;

/// Records every notification; optionally fails each one after recording.
#[derive(Default)]
pub struct RecordingEventBus {
    pub events: Mutex<Vec<(Topic, Arc<Call>)>>,
    pub fail: bool,
}

impl RecordingEventBus {
    pub fn failing() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn events(&self) -> Vec<(Topic, Arc<Call>)> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventBus for RecordingEventBus {
    async fn notify(&self, topic: Topic, call: Arc<Call>) -> Result<()> {
        self.events
            .lock()
            .unwrap()
            .push((topic, call));
        if self.fail {
            anyhow::bail!("event bus unavailable");
        }
        Ok(())
    }
}

/// Reports each call it sees, along with whether the registry held it at the
/// time.
pub struct ObservingDialplan {
    pub registry: Arc<CallRegistry>,
    pub seen: mpsc::UnboundedSender<(String, bool)>,
}

#[async_trait]
impl Dialplan for ObservingDialplan {
    async fn handle(&self, call: Arc<Call>) -> Result<(), CallError> {
        let registered = self.registry.find(call.unique_identifier()).is_some();
        self.seen
            .send((call.unique_identifier().to_string(), registered))
            .ok();
        Ok(())
    }
}

pub fn header_block(pairs: &[(&str, &str)]) -> Vec<u8> {
    let mut block = String::new();
    for (key, value) in pairs {
        block.push_str(&format!("{}: {}\n", key, value));
    }
    block.push('\n');
    block.into_bytes()
}

pub fn call_headers<'a>(channel: &'a str, extension: &'a str) -> Vec<(&'a str, &'a str)> {
    vec![
        ("agi_network", "yes"),
        ("agi_request", "agi://127.0.0.1/app?lang=en"),
        ("agi_channel", channel),
        ("agi_uniqueid", "1191245124.16"),
        ("agi_callerid", "5551234"),
        ("agi_context", "from-trunk"),
        ("agi_extension", extension),
        ("agi_priority", "1"),
    ]
}

/// Feeds a header block through `dispatcher` over an in-memory stream.
/// Returns the switch side of the stream so tests can observe hangups.
pub async fn serve_bytes(
    dispatcher: &Dispatcher,
    bytes: &[u8],
) -> (Result<CallOutcome, AgiError>, DuplexStream) {
    let (mut switch, gateway) = tokio::io::duplex(4096);
    switch.write_all(bytes).await.unwrap();
    let outcome = dispatcher.serve(Box::new(gateway)).await;
    (outcome, switch)
}

pub async fn serve_headers(
    dispatcher: &Dispatcher,
    pairs: &[(&str, &str)],
) -> (Result<CallOutcome, AgiError>, DuplexStream) {
    serve_bytes(dispatcher, &header_block(pairs)).await
}
