//! Broadcast stream of committed snapshots.
//!
//! # Guarantees
//!
//! - **At-most-once delivery**: Slow receivers may miss commits
//! - **In-memory only**: Commits are not persisted
//! - **No replay**: Lagged receivers get `RecvError::Lagged`
//!
//! Subscribers registered on the store are always notified synchronously
//! during the flush. The bus is for consumers that live on other tasks.

use tokio::sync::broadcast;

use crate::config::DEFAULT_COMMIT_CAPACITY;
use crate::differ::ChangeSet;
use crate::scheduler::InvocationId;
use crate::snapshot::Snapshot;

/// One committed flush.
#[derive(Debug, Clone)]
pub struct CommitEvent {
    /// Name of the action (or patch origin) that produced the commit.
    pub origin: String,
    pub invocation: Option<InvocationId>,
    pub changes: ChangeSet,
    pub snapshot: Snapshot,
}

impl CommitEvent {
    pub fn version(&self) -> u64 {
        self.snapshot.version()
    }
}

/// Broadcast channel carrying [`CommitEvent`]s.
///
/// # Example
///
/// ```ignore
/// let mut commits = store.commits();
/// store.dispatch("addItem", json!("bar")).await?;
///
/// let event = commits.recv().await?;
/// assert!(event.changes.contains("list"));
/// ```
#[derive(Clone)]
pub struct CommitBus {
    sender: broadcast::Sender<CommitEvent>,
}

impl CommitBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_COMMIT_CAPACITY)
    }

    /// The capacity determines how many commits can be buffered before
    /// slow receivers start lagging.
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish a commit. Returns the number of receivers that got it.
    pub fn publish(&self, event: CommitEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    /// Receive every commit published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<CommitEvent> {
        self.sender.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for CommitBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CommitBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommitBus")
            .field("receiver_count", &self.receiver_count())
            .finish()
    }
}
