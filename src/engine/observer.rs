//! # Observer Module
//!
//! The sink that receives item status changes and human readable messages.
//! Rendering is left to the implementor; the engine only calls these methods
//! synchronously and never waits for an acknowledgment.

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Mutex;

/// Status of one item as seen by observers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    Processing,
    Retrying,
    Recovered,
    Completed,
    Failed,
    Skipped,
}

impl ItemStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ItemStatus::Processing => "processing",
            ItemStatus::Retrying => "retrying",
            ItemStatus::Recovered => "recovered",
            ItemStatus::Completed => "completed",
            ItemStatus::Failed => "failed",
            ItemStatus::Skipped => "skipped",
        }
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Receiver of progress notifications. Implementations must not panic.
pub trait Observer: Send + Sync {
    fn set_status(&self, item_id: &str, status: ItemStatus);
    fn info(&self, message: &str);
    fn warn(&self, message: &str);
    fn error(&self, message: &str);
}

/// Discards every notification
#[derive(Debug, Default, Clone, Copy)]
pub struct NullObserver;

impl Observer for NullObserver {
    fn set_status(&self, _item_id: &str, _status: ItemStatus) {}
    fn info(&self, _message: &str) {}
    fn warn(&self, _message: &str) {}
    fn error(&self, _message: &str) {}
}

/// Forwards notifications to the `log` facade
#[derive(Debug, Default, Clone, Copy)]
pub struct LogObserver;

impl Observer for LogObserver {
    fn set_status(&self, item_id: &str, status: ItemStatus) {
        debug!(target: "retryledger", "{item_id}: {status}");
    }

    fn info(&self, message: &str) {
        info!(target: "retryledger", "{message}");
    }

    fn warn(&self, message: &str) {
        warn!(target: "retryledger", "{message}");
    }

    fn error(&self, message: &str) {
        error!(target: "retryledger", "{message}");
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ObserverEventKind {
    Status { item_id: String, status: ItemStatus },
    Info { message: String },
    Warn { message: String },
    Error { message: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObserverEvent {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: ObserverEventKind,
}

/// Keeps every notification in order, for UIs that redraw from history and for tests
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<ObserverEvent>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, kind: ObserverEventKind) {
        let event = ObserverEvent {
            timestamp: Utc::now(),
            kind,
        };
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(event);
    }

    pub fn events(&self) -> Vec<ObserverEvent> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Status changes recorded for one item, in order
    pub fn statuses_for(&self, item_id: &str) -> Vec<ItemStatus> {
        self.events()
            .into_iter()
            .filter_map(|event| match event.kind {
                ObserverEventKind::Status { item_id: id, status } if id == item_id => Some(status),
                _ => None,
            })
            .collect()
    }

    pub fn infos(&self) -> Vec<String> {
        self.messages(|kind| match kind {
            ObserverEventKind::Info { message } => Some(message),
            _ => None,
        })
    }

    pub fn warnings(&self) -> Vec<String> {
        self.messages(|kind| match kind {
            ObserverEventKind::Warn { message } => Some(message),
            _ => None,
        })
    }

    pub fn errors(&self) -> Vec<String> {
        self.messages(|kind| match kind {
            ObserverEventKind::Error { message } => Some(message),
            _ => None,
        })
    }

    fn messages(&self, pick: impl Fn(ObserverEventKind) -> Option<String>) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| pick(event.kind))
            .collect()
    }
}

impl Observer for RecordingObserver {
    fn set_status(&self, item_id: &str, status: ItemStatus) {
        self.push(ObserverEventKind::Status {
            item_id: item_id.to_string(),
            status,
        });
    }

    fn info(&self, message: &str) {
        self.push(ObserverEventKind::Info {
            message: message.to_string(),
        });
    }

    fn warn(&self, message: &str) {
        self.push(ObserverEventKind::Warn {
            message: message.to_string(),
        });
    }

    fn error(&self, message: &str) {
        self.push(ObserverEventKind::Error {
            message: message.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_serialization() {
        assert_eq!(
            serde_json::to_string(&ItemStatus::Retrying).unwrap(),
            "\"retrying\""
        );
        assert_eq!(ItemStatus::Recovered.to_string(), "recovered");
    }

    #[test]
    fn test_recording_observer() {
        let observer = RecordingObserver::new();
        observer.set_status("a.pdf", ItemStatus::Processing);
        observer.info("working");
        observer.set_status("b.pdf", ItemStatus::Processing);
        observer.set_status("a.pdf", ItemStatus::Completed);
        observer.warn("slow disk");
        observer.error("b.pdf failed");

        assert_eq!(observer.events().len(), 6);
        assert_eq!(
            observer.statuses_for("a.pdf"),
            vec![ItemStatus::Processing, ItemStatus::Completed]
        );
        assert_eq!(observer.infos(), vec!["working".to_string()]);
        assert_eq!(observer.warnings(), vec!["slow disk".to_string()]);
        assert_eq!(observer.errors(), vec!["b.pdf failed".to_string()]);
    }

    #[test]
    fn test_event_serialization() {
        let observer = RecordingObserver::new();
        observer.set_status("a.pdf", ItemStatus::Failed);
        let json = serde_json::to_value(&observer.events()[0]).unwrap();
        assert_eq!(json["type"], "status");
        assert_eq!(json["item_id"], "a.pdf");
        assert_eq!(json["status"], "failed");
        assert!(json.get("timestamp").is_some());
    }
}
