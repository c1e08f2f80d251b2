use super::Call;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::warn;

/// Live calls keyed by their unique identifier.
///
/// A single mutex serializes every operation, so `with_tag` and `to_vec`
/// observe a consistent snapshot across all entries.
#[derive(Default)]
pub struct CallRegistry {
    inner: Mutex<HashMap<String, Arc<Call>>>,
}

impl CallRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, Arc<Call>>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Last writer wins on a duplicate identifier; the displaced call is
    /// returned.
    pub fn insert(&self, call: Arc<Call>) -> Option<Arc<Call>> {
        let id = call.unique_identifier().to_string();
        let previous = self.entries().insert(id, call);
        if let Some(ref previous) = previous {
            warn!(
                call = previous.unique_identifier(),
                "agi: duplicate call identifier, replacing registered call"
            );
        }
        previous
    }

    /// Removes `call` if it is the entry registered under its identifier.
    /// A call that was displaced by a later duplicate leaves the newer one in
    /// place.
    pub fn remove(&self, call: &Call) -> Option<Arc<Call>> {
        let mut entries = self.entries();
        let registered = entries.get(call.unique_identifier())?;
        if !std::ptr::eq(Arc::as_ptr(registered), call) {
            return None;
        }
        entries.remove(call.unique_identifier())
    }

    pub fn find(&self, unique_identifier: &str) -> Option<Arc<Call>> {
        self.entries().get(unique_identifier).cloned()
    }

    pub fn count(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    pub fn clear(&self) {
        self.entries().clear();
    }

    pub fn with_tag(&self, tag: &str) -> Vec<Arc<Call>> {
        self.entries()
            .values()
            .filter(|call| call.is_tagged_with(tag))
            .cloned()
            .collect()
    }

    pub fn to_vec(&self) -> Vec<Arc<Call>> {
        self.entries().values().cloned().collect()
    }
}
