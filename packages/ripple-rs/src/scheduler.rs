//! Action lifecycle and flush scheduling.
//!
//! Each dispatch gets a [`PendingAction`]: the action's draft, a
//! "flush scheduled" flag and its [`ActionPhase`].
//!
//! ```text
//! Idle ──dispatch──► Running ──suspend while dirty──► Flushed ─┐
//!                       │                                ▲     │
//!                       │                                └─────┘
//!                       └──────────── body returns ──────────► Settled
//! ```
//!
//! # Flush timing
//!
//! - The first state access creates a draft based on the latest committed snapshot.
//! - Every write marks the action dirty and schedules a flush.
//! - Whenever the action body suspends (its future returns `Pending`), a
//!   scheduled flush runs: the draft is committed, subscribers are notified,
//!   and the next access starts a fresh draft.
//! - When the body finishes, successfully or not, a final flush commits
//!   whatever is left. Nothing is rolled back.
//!
//! A body that never suspends is therefore flushed exactly once, before
//! `dispatch` returns.
//!
//! # Stale handles
//!
//! A [`StateHandle`] remembers the flush generation it was created in. Once a
//! flush has committed that draft, the handle is retired and every access
//! through it fails with [`RippleError::StaleDraft`]. Re-acquire state from the
//! action context after an `.await`.

use std::cmp::Ordering as CmpOrdering;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::Poll;

use futures::future::poll_fn;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::differ::ChangeSet;
use crate::draft::Draft;
use crate::error::{Result, RippleError};
use crate::path::{Path, Segment, SEPARATOR};
use crate::recorder::MutationRecorder;
use crate::store::StoreCore;
use crate::value::Value;

/// Identity of one action invocation, for tracing and commit events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InvocationId(Uuid);

impl InvocationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for InvocationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for InvocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where an invocation is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionPhase {
    Idle,
    Running,
    /// Running, and at least one flush has committed.
    Flushed,
    Settled,
}

struct PendingState {
    recorder: Option<MutationRecorder>,
    generation: u64,
    flush_scheduled: bool,
    phase: ActionPhase,
    flushes: usize,
}

/// Bookkeeping for one running action.
pub struct PendingAction {
    name: String,
    invocation: InvocationId,
    core: Arc<StoreCore>,
    state: Mutex<PendingState>,
}

impl PendingAction {
    pub(crate) fn new(name: impl Into<String>, core: Arc<StoreCore>) -> Self {
        Self {
            name: name.into(),
            invocation: InvocationId::new(),
            core,
            state: Mutex::new(PendingState {
                recorder: None,
                generation: 0,
                flush_scheduled: false,
                phase: ActionPhase::Idle,
                flushes: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PendingState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn invocation(&self) -> InvocationId {
        self.invocation
    }

    pub fn phase(&self) -> ActionPhase {
        self.lock().phase
    }

    /// Number of flushes that committed something.
    pub fn flushes(&self) -> usize {
        self.lock().flushes
    }

    pub fn is_flush_scheduled(&self) -> bool {
        self.lock().flush_scheduled
    }

    pub(crate) fn start(&self) {
        let mut state = self.lock();
        if state.phase == ActionPhase::Idle {
            state.phase = ActionPhase::Running;
        }
    }

    /// Handle bound to the current draft generation.
    pub(crate) fn handle(self: &Arc<Self>) -> StateHandle {
        StateHandle {
            generation: self.lock().generation,
            pending: Arc::clone(self),
        }
    }

    fn stale(&self) -> RippleError {
        RippleError::StaleDraft {
            action: self.name.clone(),
        }
    }

    /// Run `f` against the live draft, creating it if needed.
    fn with_recorder<R>(
        &self,
        generation: u64,
        f: impl FnOnce(&mut MutationRecorder) -> Result<R>,
    ) -> Result<R> {
        let mut state = self.lock();
        if state.generation != generation || state.phase == ActionPhase::Settled {
            return Err(self.stale());
        }

        let latest = self.core.current();
        let rebase = matches!(
            &state.recorder,
            Some(recorder) if !recorder.is_dirty()
                && recorder.draft().baseline().version() != latest.version()
        );
        if rebase {
            state.recorder = None;
        }
        let recorder = state.recorder.get_or_insert_with(|| {
            trace!(action = %self.name, version = latest.version(), "draft created");
            MutationRecorder::new(Draft::new(&latest))
        });

        let result = f(recorder);
        let dirty = recorder.is_dirty();
        if dirty && !state.flush_scheduled {
            state.flush_scheduled = true;
            trace!(action = %self.name, "flush scheduled");
        }
        result
    }

    /// Mark a flush as due at the next suspension point.
    pub fn schedule_flush(&self) {
        self.lock().flush_scheduled = true;
    }

    /// Commit the draft now if it recorded anything.
    ///
    /// Returns the change set, or `None` when there was nothing to commit.
    pub fn flush_now(&self) -> Result<Option<ChangeSet>> {
        let recorder = {
            let mut state = self.lock();
            state.flush_scheduled = false;
            match state.recorder.take() {
                Some(recorder) if recorder.is_dirty() => {
                    state.generation += 1;
                    state.flushes += 1;
                    if state.phase == ActionPhase::Running {
                        state.phase = ActionPhase::Flushed;
                    }
                    recorder
                }
                Some(clean) => {
                    state.recorder = Some(clean);
                    return Ok(None);
                }
                None => return Ok(None),
            }
        };

        let (_, log) = recorder.finish();
        let (_, changes) = self
            .core
            .commit(&self.name, Some(self.invocation), &log)?;
        Ok(Some(changes))
    }

    pub(crate) fn flush_if_scheduled(&self) -> Result<()> {
        if self.is_flush_scheduled() {
            self.flush_now()?;
        }
        Ok(())
    }

    /// Final flush. Afterwards every handle of this invocation is stale.
    pub(crate) fn settle(&self) -> Result<()> {
        let flushed = self.flush_now();
        let mut state = self.lock();
        state.phase = ActionPhase::Settled;
        state.recorder = None;
        state.generation += 1;
        drop(state);
        flushed.map(|_| ())
    }
}

impl fmt::Debug for PendingAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("PendingAction")
            .field("name", &self.name)
            .field("invocation", &self.invocation)
            .field("phase", &state.phase)
            .field("generation", &state.generation)
            .field("flush_scheduled", &state.flush_scheduled)
            .finish()
    }
}

/// Drive an action body to completion, flushing at each suspension point.
pub(crate) async fn drive<F, T>(pending: &Arc<PendingAction>, body: F) -> Result<T>
where
    F: Future<Output = anyhow::Result<T>>,
{
    pending.start();
    let mut body = std::pin::pin!(body);

    let outcome = poll_fn(|cx| match body.as_mut().poll(cx) {
        Poll::Ready(result) => Poll::Ready(Ok(result)),
        Poll::Pending => match pending.flush_if_scheduled() {
            Ok(()) => Poll::Pending,
            Err(err) => Poll::Ready(Err(err)),
        },
    })
    .await;

    let settled = pending.settle();
    let result = match outcome {
        Ok(result) => result,
        Err(flush_err) => {
            if let Err(settle_err) = &settled {
                warn!(action = %pending.name(), error = %settle_err, "final flush failed");
            }
            return Err(flush_err);
        }
    };

    match (result, settled) {
        (Ok(value), Ok(())) => {
            debug!(action = %pending.name(), flushes = pending.flushes(), "action settled");
            Ok(value)
        }
        (Ok(_), Err(settle_err)) => Err(settle_err),
        (Err(action_err), settled) => {
            if let Err(settle_err) = settled {
                warn!(action = %pending.name(), error = %settle_err, "final flush failed");
            }
            Err(RippleError::from_action(pending.name(), action_err))
        }
    }
}

// =============================================================================
// State Handles and Views
// =============================================================================

/// Write access to state from inside an action.
///
/// Cheap to clone. Retired by the next flush that commits its draft.
#[derive(Clone)]
pub struct StateHandle {
    pending: Arc<PendingAction>,
    generation: u64,
}

impl StateHandle {
    fn read<R>(&self, f: impl FnOnce(&MutationRecorder) -> R) -> Result<R> {
        self.pending
            .with_recorder(self.generation, |recorder| Ok(f(recorder)))
    }

    fn write<R>(&self, f: impl FnOnce(&mut MutationRecorder) -> Result<R>) -> Result<R> {
        self.pending.with_recorder(self.generation, f)
    }

    /// True until a flush retires this handle.
    pub fn is_live(&self) -> bool {
        let state = self.pending.lock();
        state.generation == self.generation && state.phase != ActionPhase::Settled
    }

    /// Current draft value at `path`.
    pub fn get(&self, path: impl Into<Path>) -> Result<Option<Value>> {
        let path = path.into();
        self.read(|recorder| recorder.get(&path).cloned())
    }

    /// Current draft value at `path`, failing if absent.
    pub fn value(&self, path: impl Into<Path>) -> Result<Value> {
        let path = path.into();
        self.get(path.clone())?
            .ok_or_else(|| RippleError::PathNotFound {
                path: path.canonical(),
            })
    }

    pub fn set(&self, path: impl Into<Path>, value: impl Into<Value>) -> Result<()> {
        let path = path.into();
        let value = value.into();
        self.write(|recorder| recorder.set(&path, value))
    }

    /// Delete the value at `path` and return it.
    pub fn remove(&self, path: impl Into<Path>) -> Result<Value> {
        let path = path.into();
        self.write(|recorder| recorder.remove(&path))
    }

    /// Accessor for whatever lives at `path`.
    pub fn node(&self, path: impl Into<Path>) -> Result<Node> {
        let path = path.into();
        let value = self.value(path.clone())?;
        Ok(Node::new(self.clone(), path, value))
    }

    pub fn object(&self, path: impl Into<Path>) -> Result<ObjectView> {
        let path = path.into();
        match self.value(path.clone())? {
            Value::Map(_) => Ok(ObjectView {
                handle: self.clone(),
                path,
            }),
            _ => Err(RippleError::TypeMismatch {
                path: path.canonical(),
                expected: "map",
            }),
        }
    }

    pub fn sequence(&self, path: impl Into<Path>) -> Result<SequenceView> {
        let path = path.into();
        match self.value(path.clone())? {
            Value::List(_) => Ok(SequenceView {
                handle: self.clone(),
                path,
            }),
            _ => Err(RippleError::TypeMismatch {
                path: path.canonical(),
                expected: "sequence",
            }),
        }
    }

    /// The whole draft as a map view.
    pub fn root(&self) -> ObjectView {
        ObjectView {
            handle: self.clone(),
            path: Path::root(),
        }
    }

    pub fn to_json(&self) -> Result<serde_json::Value> {
        self.read(|recorder| recorder.draft().root().to_json())
    }
}

impl fmt::Debug for StateHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateHandle")
            .field("action", &self.pending.name)
            .field("generation", &self.generation)
            .finish()
    }
}

/// What an accessor finds at a path.
#[derive(Debug, Clone)]
pub enum Node {
    Scalar(Value),
    Object(ObjectView),
    Sequence(SequenceView),
}

impl Node {
    fn new(handle: StateHandle, path: Path, value: Value) -> Self {
        match value {
            Value::Map(_) => Node::Object(ObjectView { handle, path }),
            Value::List(_) => Node::Sequence(SequenceView { handle, path }),
            scalar => Node::Scalar(scalar),
        }
    }

    pub fn as_scalar(&self) -> Option<&Value> {
        match self {
            Node::Scalar(value) => Some(value),
            _ => None,
        }
    }

    pub fn into_object(self) -> Option<ObjectView> {
        match self {
            Node::Object(view) => Some(view),
            _ => None,
        }
    }

    pub fn into_sequence(self) -> Option<SequenceView> {
        match self {
            Node::Sequence(view) => Some(view),
            _ => None,
        }
    }
}

/// Recording accessor for a map in the draft.
#[derive(Debug, Clone)]
pub struct ObjectView {
    handle: StateHandle,
    path: Path,
}

impl ObjectView {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of the entry under `key`. Keys containing `.` are rejected.
    fn entry(&self, key: &str) -> Result<Path> {
        if key.contains(SEPARATOR) {
            return Err(RippleError::InvalidKey {
                key: key.to_string(),
            });
        }
        Ok(self.path.child(key))
    }

    pub fn get(&self, key: &str) -> Result<Node> {
        self.handle.node(self.entry(key)?)
    }

    /// Value under `key`, if any.
    pub fn value(&self, key: &str) -> Result<Option<Value>> {
        self.handle.get(self.entry(key)?)
    }

    pub fn set(&self, key: &str, value: impl Into<Value>) -> Result<()> {
        self.handle.set(self.entry(key)?, value)
    }

    pub fn remove(&self, key: &str) -> Result<Value> {
        self.handle.remove(self.entry(key)?)
    }

    pub fn contains_key(&self, key: &str) -> Result<bool> {
        Ok(self.value(key)?.is_some())
    }

    pub fn keys(&self) -> Result<Vec<String>> {
        Ok(self
            .handle
            .value(self.path.clone())?
            .as_map()
            .map(|entries| entries.keys().cloned().collect())
            .unwrap_or_default())
    }

    pub fn object(&self, key: &str) -> Result<ObjectView> {
        self.handle.object(self.entry(key)?)
    }

    pub fn sequence(&self, key: &str) -> Result<SequenceView> {
        self.handle.sequence(self.entry(key)?)
    }
}

/// Recording accessor for a sequence in the draft.
///
/// Every method that changes the sequence is logged once under its name and
/// diffed as the index-level operations it implies.
#[derive(Debug, Clone)]
pub struct SequenceView {
    handle: StateHandle,
    path: Path,
}

impl SequenceView {
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn items(&self) -> Result<Vec<Value>> {
        match self.handle.value(self.path.clone())? {
            Value::List(items) => Ok(items.as_ref().clone()),
            _ => Err(RippleError::TypeMismatch {
                path: self.path.canonical(),
                expected: "sequence",
            }),
        }
    }

    /// Apply an arbitrary edit, logged under `method`.
    ///
    /// `edit` runs on a copy with no lock held, so it may read state through
    /// this view or its handle. Its result replaces whatever the sequence
    /// holds when it returns.
    pub fn edit<R>(&self, method: &str, edit: impl FnOnce(&mut Vec<Value>) -> R) -> Result<R> {
        let mut items = self.items()?;
        let result = edit(&mut items);
        let path = self.path.clone();
        self.handle
            .write(|recorder| recorder.replace_sequence(&path, method, items))?;
        Ok(result)
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.items()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn to_vec(&self) -> Result<Vec<Value>> {
        self.items()
    }

    pub fn get(&self, index: usize) -> Result<Node> {
        self.handle.node(self.path.child(index))
    }

    pub fn value(&self, index: usize) -> Result<Option<Value>> {
        self.handle.get(self.path.child(index))
    }

    pub fn set(&self, index: usize, value: impl Into<Value>) -> Result<()> {
        self.handle.set(self.path.child(index), value)
    }

    /// Accessors for every element, so nested writes keep being recorded.
    pub fn nodes(&self) -> Result<Vec<Node>> {
        let items = self.items()?;
        Ok(items
            .into_iter()
            .enumerate()
            .map(|(index, value)| {
                Node::new(self.handle.clone(), self.path.child(Segment::Index(index)), value)
            })
            .collect())
    }

    pub fn push(&self, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        self.edit("push", |items| items.push(value))
    }

    pub fn pop(&self) -> Result<Option<Value>> {
        self.edit("pop", Vec::pop)
    }

    pub fn shift(&self) -> Result<Option<Value>> {
        self.edit("shift", |items| {
            if items.is_empty() {
                None
            } else {
                Some(items.remove(0))
            }
        })
    }

    pub fn unshift(&self, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        self.edit("unshift", |items| items.insert(0, value))
    }

    pub fn insert(&self, index: usize, value: impl Into<Value>) -> Result<()> {
        let len = self.len()?;
        if index > len {
            return Err(RippleError::IndexOutOfBounds {
                path: self.path.canonical(),
                index,
                len,
            });
        }
        let value = value.into();
        self.edit("insert", |items| items.insert(index, value))
    }

    pub fn remove(&self, index: usize) -> Result<Value> {
        self.handle.remove(self.path.child(index))
    }

    /// Remove `delete` elements at `start`, insert `items` there, return the removed ones.
    ///
    /// `start` and `delete` are clamped to the sequence.
    pub fn splice(
        &self,
        start: usize,
        delete: usize,
        items: impl IntoIterator<Item = Value>,
    ) -> Result<Vec<Value>> {
        let inserted: Vec<Value> = items.into_iter().collect();
        self.edit("splice", |current| {
            let start = start.min(current.len());
            let end = start.saturating_add(delete).min(current.len());
            current.splice(start..end, inserted).collect()
        })
    }

    pub fn reverse(&self) -> Result<()> {
        self.edit("reverse", |items| items.reverse())
    }

    /// Stable sort.
    pub fn sort_by(&self, compare: impl FnMut(&Value, &Value) -> CmpOrdering) -> Result<()> {
        self.edit("sort", |items| items.sort_by(compare))
    }

    pub fn sort_by_key<K: Ord>(&self, key: impl FnMut(&Value) -> K) -> Result<()> {
        self.edit("sort", |items| items.sort_by_key(key))
    }

    pub fn retain(&self, keep: impl FnMut(&Value) -> bool) -> Result<()> {
        self.edit("filter", |items| items.retain(keep))
    }

    pub fn swap(&self, a: usize, b: usize) -> Result<()> {
        let len = self.len()?;
        if let Some(index) = [a, b].into_iter().find(|i| *i >= len) {
            return Err(RippleError::IndexOutOfBounds {
                path: self.path.canonical(),
                index,
                len,
            });
        }
        self.edit("swap", |items| items.swap(a, b))
    }

    pub fn truncate(&self, len: usize) -> Result<()> {
        self.edit("truncate", |items| items.truncate(len))
    }

    pub fn clear(&self) -> Result<()> {
        self.edit("clear", Vec::clear)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pending(state: serde_json::Value) -> (Arc<StoreCore>, Arc<PendingAction>) {
        let core = StoreCore::for_tests(state);
        let pending = Arc::new(PendingAction::new("test", Arc::clone(&core)));
        pending.start();
        (core, pending)
    }

    #[test]
    fn test_write_schedules_flush() {
        let (_, pending) = pending(json!({ "foo": "bar" }));
        let state = pending.handle();

        assert_eq!(state.value("foo").unwrap(), Value::from("bar"));
        assert!(!pending.is_flush_scheduled());

        state.set("foo", "baz").unwrap();
        assert!(pending.is_flush_scheduled());
        assert_eq!(pending.phase(), ActionPhase::Running);
    }

    #[test]
    fn test_flush_commits_and_retires_handle() {
        let (core, pending) = pending(json!({ "foo": "bar" }));
        let state = pending.handle();
        state.set("foo", "baz").unwrap();

        let changes = pending.flush_now().unwrap().unwrap();
        assert!(changes.contains("foo"));
        assert_eq!(core.current().get("foo"), Some(&Value::from("baz")));
        assert_eq!(pending.phase(), ActionPhase::Flushed);

        assert!(!state.is_live());
        assert!(state.set("foo", "qux").unwrap_err().is_stale_draft());
        assert!(state.get("foo").unwrap_err().is_stale_draft());

        // a fresh handle sees the committed value
        assert_eq!(pending.handle().value("foo").unwrap(), Value::from("baz"));
    }

    #[test]
    fn test_flush_without_writes_is_noop() {
        let (core, pending) = pending(json!({ "foo": "bar" }));
        let state = pending.handle();
        state.get("foo").unwrap();

        assert!(pending.flush_now().unwrap().is_none());
        assert!(state.is_live());
        assert_eq!(core.current().version(), 0);
    }

    #[test]
    fn test_clean_draft_rebases_on_newer_commit() {
        let (core, pending) = pending(json!({ "a": 1, "b": 1 }));
        let state = pending.handle();
        assert_eq!(state.value("a").unwrap(), Value::from(1));

        let other = Arc::new(PendingAction::new("other", Arc::clone(&core)));
        other.handle().set("b", 2).unwrap();
        other.flush_now().unwrap();

        state.set("a", 2).unwrap();
        pending.flush_now().unwrap();

        let current = core.current();
        assert_eq!(current.get("a"), Some(&Value::from(2)));
        assert_eq!(current.get("b"), Some(&Value::from(2)));
    }

    #[test]
    fn test_settle_retires_everything() {
        let (core, pending) = pending(json!({ "list": [] }));
        let list = pending.handle().sequence("list").unwrap();
        list.push(1).unwrap();

        pending.settle().unwrap();

        assert_eq!(pending.phase(), ActionPhase::Settled);
        assert_eq!(pending.flushes(), 1);
        assert_eq!(core.current().to_json()["list"], json!([1]));
        assert!(pending.handle().get("list").unwrap_err().is_stale_draft());
    }

    #[test]
    fn test_sequence_view_methods_record() {
        let (core, pending) = pending(json!({ "list": [3, 1, 2] }));
        let list = pending.handle().sequence("list").unwrap();

        list.sort_by_key(|v| v.as_i64()).unwrap();
        list.push(4).unwrap();
        assert_eq!(list.shift().unwrap(), Some(Value::from(1)));
        list.unshift(0).unwrap();
        let removed = list.splice(1, 2, [Value::from(9)]).unwrap();
        assert_eq!(removed, vec![Value::from(2), Value::from(3)]);
        list.reverse().unwrap();
        assert_eq!(list.len().unwrap(), 3);

        assert!(matches!(
            list.insert(10, 1),
            Err(RippleError::IndexOutOfBounds { index: 10, len: 3, .. })
        ));

        pending.flush_now().unwrap();
        assert_eq!(core.current().to_json()["list"], json!([4, 9, 0]));
    }

    #[test]
    fn test_nested_views_keep_recording() {
        let (core, pending) = pending(json!({
            "todos": [{ "done": false }, { "done": false }]
        }));
        let todos = pending.handle().sequence("todos").unwrap();

        for node in todos.nodes().unwrap() {
            node.into_object().unwrap().set("done", true).unwrap();
        }

        let changes = pending.flush_now().unwrap().unwrap();
        assert!(changes.contains("todos.0.done"));
        assert!(changes.contains("todos.1.done"));
        assert_eq!(
            core.current().to_json()["todos"],
            json!([{ "done": true }, { "done": true }])
        );
    }

    #[test]
    fn test_view_type_mismatch() {
        let (_, pending) = pending(json!({ "foo": "bar", "list": [] }));
        let state = pending.handle();

        assert!(matches!(
            state.sequence("foo"),
            Err(RippleError::TypeMismatch { expected: "sequence", .. })
        ));
        assert!(matches!(
            state.object("list"),
            Err(RippleError::TypeMismatch { expected: "map", .. })
        ));
        assert!(matches!(
            state.node("missing"),
            Err(RippleError::PathNotFound { .. })
        ));
    }

    #[test]
    fn test_object_view_keys_and_remove() {
        let (core, pending) = pending(json!({ "user": { "name": "ada", "age": 36 } }));
        let user = pending.handle().object("user").unwrap();

        assert_eq!(user.keys().unwrap(), vec!["age", "name"]);
        assert_eq!(user.remove("age").unwrap(), Value::from(36));
        assert!(!user.contains_key("age").unwrap());

        let changes = pending.flush_now().unwrap().unwrap();
        assert!(changes.contains("user.age"));
        assert!(changes.contains("user"));
        assert_eq!(core.current().to_json(), json!({ "user": { "name": "ada" } }));
    }

    #[test]
    fn test_sequence_closure_may_read_state() {
        let (core, pending) = pending(json!({ "min": 2, "list": [1, 2, 3] }));
        let state = pending.handle();
        let list = state.sequence("list").unwrap();

        list.retain(|item| {
            let min = state.value("min").unwrap().as_i64().unwrap_or(0);
            item.as_i64().unwrap_or(0) >= min
        })
        .unwrap();
        list.sort_by_key(|item| {
            assert!(list.len().is_ok());
            -item.as_i64().unwrap_or(0)
        })
        .unwrap();

        pending.flush_now().unwrap();
        assert_eq!(core.current().to_json()["list"], json!([3, 2]));
    }

    #[test]
    fn test_sequence_closure_that_flushes_goes_stale() {
        let (core, pending) = pending(json!({ "list": [1, 2], "n": 0 }));
        let state = pending.handle();
        let list = state.sequence("list").unwrap();

        let err = list
            .edit("clear", |items| {
                state.set("n", 1).unwrap();
                pending.flush_now().unwrap();
                items.clear();
            })
            .unwrap_err();

        assert!(err.is_stale_draft());
        assert_eq!(core.current().to_json(), json!({ "list": [1, 2], "n": 1 }));
    }

    #[test]
    fn test_object_keys_may_not_contain_separator() {
        let (_, pending) = pending(json!({ "user": {} }));
        let user = pending.handle().object("user").unwrap();

        assert!(matches!(
            user.set("a.b", 1),
            Err(RippleError::InvalidKey { key }) if key == "a.b"
        ));
        assert!(matches!(user.value("a.b"), Err(RippleError::InvalidKey { .. })));
        assert!(!pending.is_flush_scheduled());
    }
}
