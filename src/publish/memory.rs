//! Simple key-value sink: keeps the latest event per object key.
//!
//! Satisfies the same capability surface as the broker publisher but
//! has no reconnect or confirmation logic. Useful for local runs and
//! tests where delivery guarantees do not matter.

use std::collections::HashMap;

use tokio::sync::RwLock;
use tracing::debug;

use crate::event::ChangeEvent;

use super::{PublishError, Publisher};

/// In-memory sink storing the latest event per `bucket/key`.
#[derive(Default)]
pub struct MemorySink {
    entries: RwLock<HashMap<String, ChangeEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest event stored for an object, if any.
    pub async fn get(&self, bucket: &str, key: &str) -> Option<ChangeEvent> {
        self.entries.read().await.get(&entry_key(bucket, key)).cloned()
    }

    /// Number of distinct objects seen.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

fn entry_key(bucket: &str, key: &str) -> String {
    format!("{bucket}/{key}")
}

#[async_trait::async_trait]
impl Publisher for MemorySink {
    async fn publish(&self, event: &ChangeEvent) -> Result<(), PublishError> {
        debug!(bucket = %event.bucket, key = %event.key, "storing event");
        self.entries
            .write()
            .await
            .insert(entry_key(&event.bucket, &event.key), event.clone());
        Ok(())
    }

    async fn close(&self) -> Result<(), PublishError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventAction;
    use std::path::Path;

    fn event(action: EventAction, file: &str) -> ChangeEvent {
        ChangeEvent::for_path(
            action,
            "media",
            Path::new("/srv/data"),
            &Path::new("/srv/data").join(file),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn keeps_latest_event_per_key() {
        let sink = MemorySink::new();
        sink.publish(&event(EventAction::Created, "a.txt")).await.unwrap();
        sink.publish(&event(EventAction::Removed, "a.txt")).await.unwrap();

        assert_eq!(sink.len().await, 1);
        let stored = sink.get("media", "a.txt").await.unwrap();
        assert_eq!(stored.action, EventAction::Removed);
    }

    #[tokio::test]
    async fn distinct_keys_coexist() {
        let sink = MemorySink::new();
        sink.publish(&event(EventAction::Created, "a.txt")).await.unwrap();
        sink.publish(&event(EventAction::Created, "b.txt")).await.unwrap();

        assert_eq!(sink.len().await, 2);
        assert!(sink.get("media", "b.txt").await.is_some());
        assert!(sink.get("media", "missing.txt").await.is_none());
    }
}
