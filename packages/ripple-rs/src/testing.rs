//! Testing utilities for stores and actions.
//!
//! # Feature Flag
//!
//! This module is only available with the `testing` feature:
//!
//! ```toml
//! [dev-dependencies]
//! ripple = { version = "0.1", features = ["testing"] }
//! ```
//!
//! # Quick Start
//!
//! ## Counting notifications
//!
//! ```ignore
//! use ripple::testing::RecordingObserver;
//!
//! let observer = RecordingObserver::new();
//! let _sub = store.subscribe(Interest::paths(["foo"]), "foo", observer.callback());
//!
//! store.dispatch("setFoo", json!("baz")).await?;
//!
//! assert_eq!(observer.count(), 1);
//! assert_eq!(observer.last().unwrap().get("foo"), Some(&Value::from("baz")));
//! ```
//!
//! ## Asserting change sets
//!
//! ```ignore
//! let changes = Differ::changes(recorder.log());
//! assert_changes!(changes, "list", "list.1");
//! assert_changes!(changes, exactly ["list", "list.1"]);
//! ```
//!
//! ## Waiting for commits on another task
//!
//! ```ignore
//! let latch = CommitLatch::new(2);
//! let _sub = store.subscribe(Interest::Everything, "latch", latch.callback());
//!
//! tokio::spawn(store.dispatch("load", json!(null)));
//! latch.await_zero().await;
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::Notify;

use crate::snapshot::Snapshot;

/// Asserts that a [`ChangeSet`](crate::ChangeSet) contains the given paths.
///
/// With `exactly [...]`, asserts it contains those paths and nothing else.
///
/// # Panics
///
/// Panics naming the missing (or unexpected) paths.
#[macro_export]
macro_rules! assert_changes {
    ($changes:expr, exactly [$($path:expr),* $(,)?]) => {{
        let changes = &$changes;
        let mut expected: Vec<String> = vec![$(String::from($path)),*];
        expected.sort();
        expected.dedup();
        assert_eq!(
            changes.to_vec(),
            expected,
            "change set mismatch\n  expected: {:?}\n  actual: {}",
            expected,
            changes
        );
    }};
    ($changes:expr, $($path:expr),+ $(,)?) => {{
        let changes = &$changes;
        $(
            assert!(
                changes.contains($path),
                "change set is missing {:?}\n  actual: {}",
                $path,
                changes
            );
        )+
    }};
}

pub use crate::assert_changes;

/// Subscriber that records every snapshot it is handed.
#[derive(Clone, Default)]
pub struct RecordingObserver {
    snapshots: Arc<Mutex<Vec<Snapshot>>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Snapshot>> {
        self.snapshots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Callback to pass to `subscribe`.
    pub fn callback(&self) -> impl Fn(&Snapshot) + Send + Sync + 'static {
        let snapshots = self.snapshots.clone();
        move |snapshot: &Snapshot| {
            snapshots
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .push(snapshot.clone());
        }
    }

    /// Number of notifications received.
    pub fn count(&self) -> usize {
        self.lock().len()
    }

    pub fn snapshots(&self) -> Vec<Snapshot> {
        self.lock().clone()
    }

    pub fn last(&self) -> Option<Snapshot> {
        self.lock().last().cloned()
    }

    /// Versions of the delivered snapshots, in delivery order.
    pub fn versions(&self) -> Vec<u64> {
        self.lock().iter().map(Snapshot::version).collect()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}

impl std::fmt::Debug for RecordingObserver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordingObserver")
            .field("versions", &self.versions())
            .finish()
    }
}

/// Countdown that completes after an expected number of notifications.
pub struct CommitLatch {
    remaining: AtomicUsize,
    notify: Notify,
}

impl CommitLatch {
    pub fn new(expected: usize) -> Arc<Self> {
        Arc::new(Self {
            remaining: AtomicUsize::new(expected),
            notify: Notify::new(),
        })
    }

    /// # Panics
    ///
    /// Panics if called more times than expected.
    pub fn dec(&self) {
        let prev = self
            .remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        match prev {
            Ok(1) => self.notify.notify_waiters(),
            Ok(_) => {}
            Err(_) => panic!("CommitLatch decremented below zero - more commits than expected"),
        }
    }

    /// Subscriber callback that decrements the latch.
    pub fn callback(self: &Arc<Self>) -> impl Fn(&Snapshot) + Send + Sync + 'static {
        let latch = Arc::clone(self);
        move |_: &Snapshot| latch.dec()
    }

    pub fn remaining(&self) -> usize {
        self.remaining.load(Ordering::Acquire)
    }

    pub async fn await_zero(&self) {
        loop {
            // Register before checking so a concurrent dec is not missed
            let notified = self.notify.notified();
            if self.remaining() == 0 {
                return;
            }
            notified.await;
        }
    }
}
