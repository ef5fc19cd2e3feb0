//! Run notifications
//!
//! The engine reports progress through a [`LogSink`] injected at
//! construction. Notifications are fire-and-forget and delivered in the
//! order they were produced; a sink must never block the run.

use parking_lot::RwLock;
use std::fmt;
use std::sync::mpsc::{self, Receiver, Sender};
use std::time::SystemTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogKind {
    RunStarted,
    RunEnded,
    Info,
    /// A line printed by the script
    Output,
    Warning,
}

impl fmt::Display for LogKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            LogKind::RunStarted => "start",
            LogKind::RunEnded => "end",
            LogKind::Info => "info",
            LogKind::Output => "out",
            LogKind::Warning => "warn",
        };
        f.write_str(tag)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogMessage {
    pub kind: LogKind,
    pub text: String,
    pub time: SystemTime,
}

impl LogMessage {
    pub fn new(kind: LogKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
            time: SystemTime::now(),
        }
    }

    pub fn info(text: impl Into<String>) -> Self {
        Self::new(LogKind::Info, text)
    }

    pub fn warning(text: impl Into<String>) -> Self {
        Self::new(LogKind::Warning, text)
    }
}

impl fmt::Display for LogMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.text)
    }
}

/// Receives engine notifications
pub trait LogSink: Send + Sync {
    fn log(&self, message: LogMessage);
}

/// Discards every notification
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl LogSink for NullSink {
    fn log(&self, _message: LogMessage) {}
}

/// Forwards notifications to `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn log(&self, message: LogMessage) {
        match message.kind {
            LogKind::Warning => tracing::warn!(target: "tune::log", "{}", message.text),
            LogKind::Output => tracing::info!(target: "tune::output", "{}", message.text),
            _ => tracing::info!(target: "tune::log", kind = %message.kind, "{}", message.text),
        }
    }
}

/// Single-subscriber channel; the receiver end is handed to the front end
#[derive(Debug)]
pub struct LogChannel {
    sender: parking_lot::Mutex<Sender<LogMessage>>,
}

impl LogChannel {
    pub fn new() -> (Self, Receiver<LogMessage>) {
        let (sender, receiver) = mpsc::channel();
        (
            Self {
                sender: parking_lot::Mutex::new(sender),
            },
            receiver,
        )
    }
}

impl LogSink for LogChannel {
    fn log(&self, message: LogMessage) {
        // A dropped receiver just means nobody is listening any more
        let _ = self.sender.lock().send(message);
    }
}

/// Keeps every notification in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    messages: RwLock<Vec<LogMessage>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<LogMessage> {
        self.messages.read().clone()
    }

    pub fn kinds(&self) -> Vec<LogKind> {
        self.messages.read().iter().map(|m| m.kind).collect()
    }

    pub fn clear(&self) {
        self.messages.write().clear();
    }
}

impl LogSink for MemorySink {
    fn log(&self, message: LogMessage) {
        self.messages.write().push(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_preserves_order() {
        let (channel, receiver) = LogChannel::new();
        channel.log(LogMessage::new(LogKind::RunStarted, "a"));
        channel.log(LogMessage::info("b"));
        channel.log(LogMessage::new(LogKind::RunEnded, "c"));
        let texts: Vec<String> = receiver.try_iter().map(|m| m.text).collect();
        assert_eq!(texts, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_channel_survives_dropped_receiver() {
        let (channel, receiver) = LogChannel::new();
        drop(receiver);
        channel.log(LogMessage::info("nobody hears this"));
    }

    #[test]
    fn test_memory_sink() {
        let sink = MemorySink::new();
        sink.log(LogMessage::warning("careful"));
        assert_eq!(sink.kinds(), vec![LogKind::Warning]);
        assert_eq!(sink.messages()[0].to_string(), "[warn] careful");
    }
}
