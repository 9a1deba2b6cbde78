//! Path-indexed subscriptions.
//!
//! Subscribers are either path-scoped (indexed under each path they care
//! about) or global (notified on every commit). A notify pass invokes each
//! path-scoped subscriber at most once, however many of its paths changed.
//!
//! Callbacks run outside the registry lock, so they may subscribe or
//! unsubscribe freely. A subscriber removed while a notify pass is running is
//! skipped for the rest of that pass.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tracing::{error, trace};

use crate::debug::{DebugLog, LogKind};
use crate::differ::ChangeSet;
use crate::path::Path;
use crate::snapshot::Snapshot;
use crate::tracker::PathSet;

/// Subscriber callback. Receives the snapshot produced by the commit.
pub type Callback = Arc<dyn Fn(&Snapshot) + Send + Sync>;

/// What a subscriber wants to hear about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Interest {
    /// Commits touching any of these canonical paths.
    Paths(Vec<String>),
    /// Every commit.
    Everything,
}

impl Interest {
    pub fn paths<I, P>(paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<Path>,
    {
        Interest::Paths(paths.into_iter().map(|p| p.into().canonical()).collect())
    }
}

impl From<&PathSet> for Interest {
    fn from(paths: &PathSet) -> Self {
        Interest::Paths(paths.paths())
    }
}

impl From<Option<&PathSet>> for Interest {
    fn from(paths: Option<&PathSet>) -> Self {
        paths.map(Interest::from).unwrap_or(Interest::Everything)
    }
}

/// Identity of one subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

struct Entry {
    label: String,
    callback: Callback,
    interest: Interest,
    active: AtomicBool,
}

#[derive(Default)]
struct Indices {
    by_path: HashMap<String, Vec<SubscriptionId>>,
    global: Vec<SubscriptionId>,
    entries: HashMap<SubscriptionId, Arc<Entry>>,
}

/// Registry of subscribers, owned by one store.
#[derive(Default)]
pub struct SubscriptionRegistry {
    indices: Mutex<Indices>,
    next_id: AtomicU64,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Indices> {
        self.indices
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register `callback`. Dropping the returned handle unsubscribes.
    pub fn subscribe(
        self: &Arc<Self>,
        interest: Interest,
        label: impl Into<String>,
        callback: impl Fn(&Snapshot) + Send + Sync + 'static,
    ) -> Subscription {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let entry = Arc::new(Entry {
            label: label.into(),
            callback: Arc::new(callback),
            interest: interest.clone(),
            active: AtomicBool::new(true),
        });

        let mut indices = self.lock();
        match &interest {
            Interest::Paths(paths) => {
                for path in paths {
                    let ids = indices.by_path.entry(path.clone()).or_default();
                    if !ids.contains(&id) {
                        ids.push(id);
                    }
                }
            }
            Interest::Everything => indices.global.push(id),
        }
        trace!(%id, label = %entry.label, "subscribed");
        indices.entries.insert(id, entry);

        Subscription {
            id,
            registry: Arc::downgrade(self),
            detached: false,
        }
    }

    /// Remove a subscriber from every index it was registered under.
    ///
    /// Returns false if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut indices = self.lock();
        let Some(entry) = indices.entries.remove(&id) else {
            return false;
        };
        entry.active.store(false, Ordering::Release);

        match &entry.interest {
            Interest::Paths(paths) => {
                for path in paths {
                    if let Some(ids) = indices.by_path.get_mut(path) {
                        ids.retain(|other| *other != id);
                        if ids.is_empty() {
                            indices.by_path.remove(path);
                        }
                    }
                }
            }
            Interest::Everything => indices.global.retain(|other| *other != id),
        }
        trace!(%id, label = %entry.label, "unsubscribed");
        true
    }

    /// Invoke the subscribers interested in `changes`.
    ///
    /// Path-scoped subscribers fire once if any of their paths changed;
    /// global subscribers fire once regardless. Returns how many fired.
    pub fn notify(&self, changes: &ChangeSet, snapshot: &Snapshot, debug: &DebugLog) -> usize {
        let batch: Vec<(Arc<Entry>, Option<String>)> = {
            let indices = self.lock();
            let mut seen = HashSet::new();
            let mut batch = Vec::new();

            for path in changes.iter() {
                for id in indices.by_path.get(path).into_iter().flatten() {
                    if seen.insert(*id) {
                        if let Some(entry) = indices.entries.get(id) {
                            batch.push((Arc::clone(entry), Some(path.to_string())));
                        }
                    }
                }
            }
            for id in &indices.global {
                if let Some(entry) = indices.entries.get(id) {
                    batch.push((Arc::clone(entry), None));
                }
            }
            batch
        };

        let mut fired = 0;
        for (entry, path) in batch {
            if !entry.active.load(Ordering::Acquire) {
                continue;
            }
            debug.log(LogKind::Render, || match &path {
                Some(path) => format!("\"{}\" due to change on \"{path}\"", entry.label),
                None => format!("\"{}\" on every change", entry.label),
            });

            let callback = Arc::clone(&entry.callback);
            if let Err(panic_info) = catch_unwind(AssertUnwindSafe(|| callback(snapshot))) {
                let panic_msg = if let Some(s) = panic_info.downcast_ref::<&str>() {
                    (*s).to_string()
                } else if let Some(s) = panic_info.downcast_ref::<String>() {
                    s.clone()
                } else {
                    "unknown panic".to_string()
                };
                error!(
                    subscriber = %entry.label,
                    panic = %panic_msg,
                    "subscriber panicked during notify"
                );
                continue;
            }
            fired += 1;
        }
        fired
    }

    /// Number of live subscriptions.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    /// Subscribers indexed under `canonical`.
    pub fn subscribers_for(&self, canonical: &str) -> usize {
        self.lock().by_path.get(canonical).map_or(0, Vec::len)
    }

    pub fn global_count(&self) -> usize {
        self.lock().global.len()
    }

    /// Number of index slots (path lists plus the global list) holding `id`.
    pub fn index_entries_for(&self, id: SubscriptionId) -> usize {
        let indices = self.lock();
        let in_paths = indices
            .by_path
            .values()
            .filter(|ids| ids.contains(&id))
            .count();
        in_paths + usize::from(indices.global.contains(&id))
    }
}

impl fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let indices = self.lock();
        f.debug_struct("SubscriptionRegistry")
            .field("subscriptions", &indices.entries.len())
            .field("paths", &indices.by_path.len())
            .field("global", &indices.global.len())
            .finish()
    }
}

/// Handle to a registered subscriber. Unsubscribes on drop.
#[must_use = "dropping a Subscription unsubscribes it immediately"]
pub struct Subscription {
    id: SubscriptionId,
    registry: Weak<SubscriptionRegistry>,
    detached: bool,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Stop watching now.
    pub fn unsubscribe(mut self) {
        self.remove();
    }

    /// Keep the subscriber registered for the registry's lifetime.
    pub fn detach(mut self) -> SubscriptionId {
        self.detached = true;
        self.id
    }

    fn remove(&mut self) {
        if self.detached {
            return;
        }
        self.detached = true;
        if let Some(registry) = self.registry.upgrade() {
            registry.unsubscribe(self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.remove();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("detached", &self.detached)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn changes(paths: &[&str]) -> ChangeSet {
        let mut set = ChangeSet::new();
        for path in paths {
            set.insert(&Path::parse(path));
        }
        set
    }

    fn snapshot() -> Snapshot {
        Snapshot::from_json(json!({})).unwrap()
    }

    fn counter() -> (Arc<AtomicUsize>, impl Fn(&Snapshot) + Send + Sync + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let inner = count.clone();
        (count, move |_: &Snapshot| {
            inner.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_path_subscriber_fires_on_match_only() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let (count, callback) = counter();
        let _sub = registry.subscribe(Interest::paths(["list.0"]), "Item", callback);

        registry.notify(&changes(&["list", "list.1"]), &snapshot(), &DebugLog::disabled());
        assert_eq!(count.load(Ordering::SeqCst), 0);

        registry.notify(&changes(&["list.0"]), &snapshot(), &DebugLog::disabled());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_fires_once_with_several_matching_paths() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let (count, callback) = counter();
        let _sub = registry.subscribe(Interest::paths(["user", "user.name"]), "Profile", callback);

        let fired = registry.notify(
            &changes(&["user", "user.name"]),
            &snapshot(),
            &DebugLog::disabled(),
        );
        assert_eq!(fired, 1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_global_subscriber_fires_every_time() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let (count, callback) = counter();
        let _sub = registry.subscribe(Interest::Everything, "Computed", callback);

        registry.notify(&changes(&["a"]), &snapshot(), &DebugLog::disabled());
        registry.notify(&ChangeSet::new(), &snapshot(), &DebugLog::disabled());
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_unsubscribe_removes_every_index_entry() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let (_, callback) = counter();
        let sub = registry.subscribe(Interest::paths(["a", "b", "c"]), "Watcher", callback);
        let id = sub.id();
        assert_eq!(registry.index_entries_for(id), 3);

        sub.unsubscribe();

        assert_eq!(registry.index_entries_for(id), 0);
        assert_eq!(registry.subscribers_for("a"), 0);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_drop_unsubscribes_and_detach_keeps() {
        let registry = Arc::new(SubscriptionRegistry::new());
        {
            let (_, callback) = counter();
            let _sub = registry.subscribe(Interest::Everything, "Scoped", callback);
            assert_eq!(registry.global_count(), 1);
        }
        assert_eq!(registry.global_count(), 0);

        let (_, callback) = counter();
        let id = registry
            .subscribe(Interest::Everything, "Forever", callback)
            .detach();
        assert_eq!(registry.global_count(), 1);
        assert!(registry.unsubscribe(id));
    }

    #[test]
    fn test_subscriber_removed_mid_notify_is_skipped() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let (count, callback) = counter();
        let victim = registry
            .subscribe(Interest::paths(["x"]), "Victim", callback)
            .detach();

        let weak = Arc::downgrade(&registry);
        let _killer = registry.subscribe(Interest::Everything, "Killer", move |_: &Snapshot| {
            if let Some(registry) = weak.upgrade() {
                registry.unsubscribe(victim);
            }
        });

        // Global subscribers run after path subscribers, so the victim fires
        // this time and is gone for the next pass.
        registry.notify(&changes(&["x"]), &snapshot(), &DebugLog::disabled());
        registry.notify(&changes(&["x"]), &snapshot(), &DebugLog::disabled());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_panicking_subscriber_does_not_stop_others() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let _bad = registry.subscribe(Interest::paths(["a"]), "Bad", |_: &Snapshot| {
            panic!("render failed")
        });
        let (count, callback) = counter();
        let _good = registry.subscribe(Interest::paths(["a"]), "Good", callback);

        let fired = registry.notify(&changes(&["a"]), &snapshot(), &DebugLog::disabled());
        assert_eq!(fired, 1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
