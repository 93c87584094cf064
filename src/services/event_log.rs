use chrono::Local;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

use crate::models::{EventLevel, LogEvent};

const HISTORY_CAPACITY: usize = 500;
const CHANNEL_CAPACITY: usize = 256;

/// Human-readable status stream of the engine.
///
/// Every line is forwarded to the `log` facade, kept in a bounded history
/// and broadcast to live subscribers.
#[derive(Clone)]
pub struct EventLog {
    history: Arc<Mutex<VecDeque<LogEvent>>>,
    sender: broadcast::Sender<LogEvent>,
}

impl EventLog {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            history: Arc::new(Mutex::new(VecDeque::with_capacity(HISTORY_CAPACITY))),
            sender,
        }
    }

    pub fn emit(&self, level: EventLevel, message: impl Into<String>) {
        let event = LogEvent {
            timestamp: Local::now(),
            level,
            message: message.into(),
        };

        log::log!(target: "watchdog", log::Level::from(level), "{}", event.message);

        if let Ok(mut history) = self.history.lock() {
            if history.len() == HISTORY_CAPACITY {
                history.pop_front();
            }
            history.push_back(event.clone());
        }

        // No subscribers is not an error
        let _ = self.sender.send(event);
    }

    pub fn debug(&self, message: impl Into<String>) {
        self.emit(EventLevel::Debug, message);
    }

    pub fn info(&self, message: impl Into<String>) {
        self.emit(EventLevel::Info, message);
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.emit(EventLevel::Warn, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.emit(EventLevel::Error, message);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LogEvent> {
        self.sender.subscribe()
    }

    /// Most recent lines, oldest first
    pub fn recent(&self, limit: usize) -> Vec<LogEvent> {
        match self.history.lock() {
            Ok(history) => {
                let skip = history.len().saturating_sub(limit);
                history.iter().skip(skip).cloned().collect()
            }
            Err(_) => Vec::new(),
        }
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}
