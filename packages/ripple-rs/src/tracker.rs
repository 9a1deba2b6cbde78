//! Read tracking.
//!
//! A [`TrackingSession`] wraps a [`Snapshot`] in [`TrackedView`]s that record
//! every path a caller reads into a [`PathSet`]. The recorded set is what an
//! observer subscribes with, so it is notified only when something it actually
//! looked at changed.
//!
//! # What is recorded
//!
//! - every leaf read and every container traversed on the way to it
//! - every element visited by [`TrackedView::iter`] and the helpers built on it
//!
//! Shape queries ([`TrackedView::len`], [`TrackedView::keys`]) and raw access
//! ([`TrackedView::raw`]) pass through without recording.
//!
//! # Identity
//!
//! Within one session, reaching the same node along the same path twice
//! yields the same `Arc<TrackedView>` while the first one is still alive.
//! The session keeps only weak references to its views.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use dashmap::DashMap;

use crate::path::{Path, Segment};
use crate::snapshot::Snapshot;
use crate::tree;
use crate::value::Value;

#[derive(Debug, Default)]
struct PathSetInner {
    order: Vec<String>,
    seen: HashSet<String>,
    last: Option<String>,
}

/// Insertion-ordered set of canonical paths, shared between clones.
#[derive(Debug, Clone, Default)]
pub struct PathSet {
    inner: Arc<Mutex<PathSetInner>>,
}

impl PathSet {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, PathSetInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record a read of `path`.
    pub fn record(&self, path: &Path) {
        let canonical = path.canonical();
        let mut inner = self.lock();
        if inner.seen.insert(canonical.clone()) {
            inner.order.push(canonical.clone());
        }
        inner.last = Some(canonical);
    }

    pub fn contains(&self, canonical: &str) -> bool {
        self.lock().seen.contains(canonical)
    }

    /// Recorded paths in first-read order.
    pub fn paths(&self) -> Vec<String> {
        self.lock().order.clone()
    }

    /// The most recently read path.
    pub fn last(&self) -> Option<String> {
        self.lock().last.clone()
    }

    pub fn len(&self) -> usize {
        self.lock().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().order.is_empty()
    }

    pub fn clear(&self) {
        *self.lock() = PathSetInner::default();
    }
}

struct SessionInner {
    snapshot: Snapshot,
    paths: PathSet,
    views: DashMap<(usize, String), Weak<TrackedView>>,
}

impl SessionInner {
    fn wrap(self: &Arc<Self>, path: Path, node: Value) -> Arc<TrackedView> {
        let key = (node.node_address().unwrap_or_default(), path.canonical());
        if let Some(existing) = self.views.get(&key).and_then(|weak| weak.upgrade()) {
            return existing;
        }

        let view = Arc::new(TrackedView {
            session: Arc::clone(self),
            path,
            node,
        });
        self.views.insert(key, Arc::downgrade(&view));
        view
    }

    fn tracked(self: &Arc<Self>, path: Path, value: &Value) -> Tracked {
        if value.is_container() {
            Tracked::View(self.wrap(path, value.clone()))
        } else {
            Tracked::Value(value.clone())
        }
    }
}

/// One read-tracking pass over a snapshot.
#[derive(Clone)]
pub struct TrackingSession {
    inner: Arc<SessionInner>,
}

impl TrackingSession {
    /// Track reads into a fresh path set.
    pub fn new(snapshot: &Snapshot) -> Self {
        Self::with_paths(snapshot, PathSet::new())
    }

    /// Track reads into a caller-provided path set.
    pub fn with_paths(snapshot: &Snapshot, paths: PathSet) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                snapshot: snapshot.clone(),
                paths,
                views: DashMap::new(),
            }),
        }
    }

    /// View of the whole state. Obtaining it records nothing.
    pub fn root(&self) -> Arc<TrackedView> {
        self.inner
            .wrap(Path::root(), self.inner.snapshot.root().clone())
    }

    /// View anchored at `path` without recording the transit to it.
    pub fn view_at(&self, path: &Path) -> Option<Tracked> {
        let value = tree::lookup(self.inner.snapshot.root(), path)?;
        Some(self.inner.tracked(path.clone(), value))
    }

    pub fn paths(&self) -> &PathSet {
        &self.inner.paths
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.inner.snapshot
    }

    /// Run a selector and keep only the path it ended up pointing at.
    ///
    /// `state.items[0]` reads `items` then `items.0`; the target is `items.0`.
    /// A selector that reads nothing targets the root.
    pub fn target<R>(snapshot: &Snapshot, selector: impl FnOnce(&Arc<TrackedView>) -> R) -> Target<R> {
        let session = Self::new(snapshot);
        let value = selector(&session.root());
        let path = session
            .paths()
            .last()
            .map(Path::from)
            .unwrap_or_else(Path::root);
        Target { value, path }
    }
}

impl std::fmt::Debug for TrackingSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackingSession")
            .field("version", &self.inner.snapshot.version())
            .field("tracked", &self.inner.paths.len())
            .finish()
    }
}

/// Result of [`TrackingSession::target`].
#[derive(Debug, Clone)]
pub struct Target<R> {
    pub value: R,
    pub path: Path,
}

/// A tracked read result: a primitive, or a view into a container.
#[derive(Clone)]
pub enum Tracked {
    Value(Value),
    View(Arc<TrackedView>),
}

impl Tracked {
    pub fn as_view(&self) -> Option<&Arc<TrackedView>> {
        match self {
            Tracked::View(view) => Some(view),
            Tracked::Value(_) => None,
        }
    }

    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Tracked::Value(value) => Some(value),
            Tracked::View(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        self.as_value()?.as_str()
    }

    pub fn as_i64(&self) -> Option<i64> {
        self.as_value()?.as_i64()
    }

    pub fn as_bool(&self) -> Option<bool> {
        self.as_value()?.as_bool()
    }

    /// Continue reading into a container.
    pub fn get(&self, segment: impl Into<Segment>) -> Option<Tracked> {
        self.as_view()?.get(segment)
    }

    /// Untracked copy of the underlying value.
    pub fn to_value(&self) -> Value {
        match self {
            Tracked::Value(value) => value.clone(),
            Tracked::View(view) => view.raw().clone(),
        }
    }
}

impl std::fmt::Debug for Tracked {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Tracked::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Tracked::View(view) => f.debug_tuple("View").field(&view.path.canonical()).finish(),
        }
    }
}

/// A read-only, read-recording view of a map or sequence.
pub struct TrackedView {
    session: Arc<SessionInner>,
    path: Path,
    node: Value,
}

impl TrackedView {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read a child, recording its path.
    pub fn get(&self, segment: impl Into<Segment>) -> Option<Tracked> {
        let segment = segment.into();
        let child = match &self.node {
            Value::Map(entries) => entries.get(&segment.as_key())?,
            Value::List(items) => items.get(segment.as_index()?)?,
            _ => return None,
        };
        let path = self.path.child(segment);
        self.session.paths.record(&path);
        Some(self.session.tracked(path, child))
    }

    /// Read a sequence element.
    pub fn index(&self, index: usize) -> Option<Tracked> {
        self.get(Segment::Index(index))
    }

    /// Number of entries. Not recorded.
    pub fn len(&self) -> usize {
        match &self.node {
            Value::Map(entries) => entries.len(),
            Value::List(items) => items.len(),
            _ => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_sequence(&self) -> bool {
        matches!(self.node, Value::List(_))
    }

    /// Map keys in order. Not recorded.
    pub fn keys(&self) -> Vec<String> {
        match &self.node {
            Value::Map(entries) => entries.keys().cloned().collect(),
            Value::List(items) => (0..items.len()).map(|i| i.to_string()).collect(),
            _ => Vec::new(),
        }
    }

    /// Untracked access to the underlying node.
    pub fn raw(&self) -> &Value {
        &self.node
    }

    /// Visit every child, recording each one.
    pub fn iter(&self) -> impl Iterator<Item = Tracked> + '_ {
        self.keys()
            .into_iter()
            .filter_map(move |key| self.get(key))
    }

    pub fn map<R>(&self, f: impl FnMut(Tracked) -> R) -> Vec<R> {
        self.iter().map(f).collect()
    }

    pub fn filter(&self, mut predicate: impl FnMut(&Tracked) -> bool) -> Vec<Tracked> {
        self.iter().filter(|item| predicate(item)).collect()
    }

    pub fn for_each(&self, f: impl FnMut(Tracked)) {
        self.iter().for_each(f);
    }
}

impl std::fmt::Debug for TrackedView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackedView")
            .field("path", &self.path.canonical())
            .field("kind", &self.node.kind())
            .finish()
    }
}
