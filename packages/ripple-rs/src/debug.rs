//! Pluggable debug output.
//!
//! The store reports mutations, flushes and notifications to a [`DebugSink`]
//! through `log(kind, message, data)`. Nothing reaches the sink unless the
//! store's options enable debug output (see
//! [`StoreOptions::debug_enabled`](crate::StoreOptions::debug_enabled)).
//!
//! This is separate from the crate's `tracing` instrumentation, which is
//! always emitted and filtered by the subscriber as usual.
//!
//! # Usage
//!
//! ```ignore
//! let sink = Arc::new(MemorySink::new());
//! let store = StoreBuilder::new(state, ())
//!     .with_debug_sink(sink.clone())
//!     .build()?;
//!
//! store.dispatch("updateFoo", Value::Null).await?;
//! for entry in sink.entries() {
//!     println!("# {}: {}", entry.kind, entry.message);
//! }
//! ```

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;

/// Maximum number of entries a [`MemorySink`] retains.
const MAX_DEBUG_ENTRIES: usize = 1000;

/// What a debug message is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogKind {
    /// A subscriber is being notified.
    Render,
    /// The paths an action changed.
    Mutations,
    /// A draft is being committed.
    Flush,
    /// An observer re-read state after a notification.
    ComponentRender,
}

impl fmt::Display for LogKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogKind::Render => write!(f, "RENDER"),
            LogKind::Mutations => write!(f, "MUTATIONS"),
            LogKind::Flush => write!(f, "FLUSH"),
            LogKind::ComponentRender => write!(f, "COMPONENT RENDER"),
        }
    }
}

/// Destination for debug messages.
pub trait DebugSink: Send + Sync + 'static {
    fn log(&self, kind: LogKind, message: &str, data: &[serde_json::Value]);
}

/// Default sink: forwards to `tracing` at debug level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl DebugSink for TracingSink {
    fn log(&self, kind: LogKind, message: &str, data: &[serde_json::Value]) {
        if data.is_empty() {
            debug!(target: "ripple::debug", "# {kind}: {message}");
        } else {
            debug!(target: "ripple::debug", ?data, "# {kind}: {message}");
        }
    }
}

/// One message captured by a [`MemorySink`].
#[derive(Debug, Clone, PartialEq)]
pub struct DebugEntry {
    pub kind: LogKind,
    pub message: String,
    pub data: Vec<serde_json::Value>,
}

/// Sink that keeps the most recent messages in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    entries: Mutex<VecDeque<DebugEntry>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(64)),
        }
    }

    /// Acquire the entries lock, recovering from poison if necessary.
    fn lock_entries(&self) -> MutexGuard<'_, VecDeque<DebugEntry>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn entries(&self) -> Vec<DebugEntry> {
        self.lock_entries().iter().cloned().collect()
    }

    /// Entries of one kind, oldest first.
    pub fn of_kind(&self, kind: LogKind) -> Vec<DebugEntry> {
        self.lock_entries()
            .iter()
            .filter(|entry| entry.kind == kind)
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.lock_entries().clear();
    }

    pub fn len(&self) -> usize {
        self.lock_entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock_entries().is_empty()
    }
}

impl DebugSink for MemorySink {
    fn log(&self, kind: LogKind, message: &str, data: &[serde_json::Value]) {
        let mut entries = self.lock_entries();
        if entries.len() >= MAX_DEBUG_ENTRIES {
            entries.pop_front();
        }
        entries.push_back(DebugEntry {
            kind,
            message: message.to_string(),
            data: data.to_vec(),
        });
    }
}

/// Gate in front of a sink. Disabled gates never build their messages.
#[derive(Clone, Default)]
pub struct DebugLog {
    sink: Option<Arc<dyn DebugSink>>,
}

impl DebugLog {
    pub fn disabled() -> Self {
        Self { sink: None }
    }

    pub fn new(sink: Arc<dyn DebugSink>) -> Self {
        Self { sink: Some(sink) }
    }

    pub fn is_enabled(&self) -> bool {
        self.sink.is_some()
    }

    pub fn log(&self, kind: LogKind, message: impl FnOnce() -> String) {
        if let Some(sink) = &self.sink {
            sink.log(kind, &message(), &[]);
        }
    }

    pub fn log_with_data(
        &self,
        kind: LogKind,
        message: impl FnOnce() -> String,
        data: impl FnOnce() -> Vec<serde_json::Value>,
    ) {
        if let Some(sink) = &self.sink {
            sink.log(kind, &message(), &data());
        }
    }
}

impl fmt::Debug for DebugLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DebugLog")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_memory_sink_records() {
        let sink = MemorySink::new();
        sink.log(LogKind::Mutations, "from \"add\" - list", &[json!(["list"])]);
        assert_eq!(sink.len(), 1);
        assert_eq!(sink.entries()[0].data, vec![json!(["list"])]);
        assert_eq!(sink.of_kind(LogKind::Render).len(), 0);
    }

    #[test]
    fn test_memory_sink_max_entries() {
        let sink = MemorySink::new();
        for i in 0..MAX_DEBUG_ENTRIES + 10 {
            sink.log(LogKind::Flush, &i.to_string(), &[]);
        }
        assert_eq!(sink.len(), MAX_DEBUG_ENTRIES);
        assert_eq!(sink.entries()[0].message, "10");
    }

    #[test]
    fn test_disabled_log_never_builds_message() {
        let log = DebugLog::disabled();
        log.log(LogKind::Render, || panic!("message built while disabled"));
        assert!(!log.is_enabled());
    }

    #[test]
    fn test_enabled_log_reaches_sink() {
        let sink = Arc::new(MemorySink::new());
        let log = DebugLog::new(sink.clone());
        log.log(LogKind::Render, || "component \"Foo\"".into());
        assert_eq!(sink.of_kind(LogKind::Render).len(), 1);
    }

    #[test]
    fn test_kind_display_matches_log_prefix() {
        assert_eq!(LogKind::ComponentRender.to_string(), "COMPONENT RENDER");
    }
}
