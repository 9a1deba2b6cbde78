//! The store: committed state, actions, and subscribers in one place.
//!
//! ```ignore
//! let store = StoreBuilder::new(json!({ "list": ["a"] }), ())
//!     .with_action("add", sync_action(|ctx: &ActionContext<()>, item| {
//!         ctx.state().sequence("list")?.push(item)?;
//!         Ok(Value::Null)
//!     }))
//!     .build()?;
//!
//! let (_, paths) = store.track(|state| state.get("list"));
//! let _watch = store.subscribe(&paths, "list view", |snapshot| render(snapshot));
//!
//! store.dispatch("add", json!("b")).await?;
//! ```

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::task::{Context, Poll};

use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, debug_span, info, Instrument};

use crate::action::{Action, ActionContext, ActionRegistry, Namespace};
use crate::bus::{CommitBus, CommitEvent};
use crate::config::StoreOptions;
use crate::debug::{DebugLog, DebugSink, LogKind, TracingSink};
use crate::differ::{ChangeSet, Differ};
use crate::error::{Result, RippleError};
use crate::recorder::{MutationLog, Operation};
use crate::registry::{Interest, Subscription, SubscriptionRegistry};
use crate::scheduler::{self, InvocationId, PendingAction};
use crate::snapshot::Snapshot;
use crate::tracker::{PathSet, Target, Tracked, TrackedView, TrackingSession};
use crate::value::Value;

/// State shared by the store and every running action.
pub(crate) struct StoreCore {
    current: Mutex<Snapshot>,
    registry: Arc<SubscriptionRegistry>,
    debug: DebugLog,
    bus: CommitBus,
}

impl StoreCore {
    fn new(snapshot: Snapshot, debug: DebugLog, bus: CommitBus) -> Self {
        Self {
            current: Mutex::new(snapshot),
            registry: Arc::new(SubscriptionRegistry::new()),
            debug,
            bus,
        }
    }

    #[cfg(test)]
    pub(crate) fn for_tests(state: serde_json::Value) -> Arc<Self> {
        let snapshot = Snapshot::from_json(state).expect("test state must be a map");
        Arc::new(Self::new(snapshot, DebugLog::disabled(), CommitBus::new()))
    }

    fn lock_current(&self) -> MutexGuard<'_, Snapshot> {
        self.current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Latest committed snapshot.
    pub(crate) fn current(&self) -> Snapshot {
        self.lock_current().clone()
    }

    /// Replay `log` onto the latest snapshot, then notify.
    ///
    /// Subscribers run after the snapshot lock is released, so they may read
    /// state or dispatch.
    pub(crate) fn commit(
        &self,
        origin: &str,
        invocation: Option<InvocationId>,
        log: &MutationLog,
    ) -> Result<(Snapshot, ChangeSet)> {
        if log.is_empty() {
            return Ok((self.current(), ChangeSet::new()));
        }

        self.debug
            .log(LogKind::Flush, || format!("\"{origin}\" committing {} entries", log.len()));

        let (snapshot, changes) = {
            let mut current = self.lock_current();
            let (next, changes) = Differ::commit(&current, log)?;
            *current = next.clone();
            (next, changes)
        };

        debug!(
            action = origin,
            version = snapshot.version(),
            changed = changes.len(),
            "committed draft"
        );
        self.debug.log_with_data(
            LogKind::Mutations,
            || format!("from \"{origin}\" - {changes}"),
            || {
                log.entries()
                    .iter()
                    .map(|entry| serde_json::Value::String(entry.describe()))
                    .collect()
            },
        );

        self.registry.notify(&changes, &snapshot, &self.debug);
        self.bus.publish(CommitEvent {
            origin: origin.to_string(),
            invocation,
            changes: changes.clone(),
            snapshot: snapshot.clone(),
        });
        Ok((snapshot, changes))
    }
}

struct StoreInner<E> {
    core: Arc<StoreCore>,
    actions: ActionRegistry<E>,
    effects: Arc<E>,
    options: StoreOptions,
}

/// A reactive state store.
///
/// Cheap to clone; clones share state, actions and subscribers.
pub struct Store<E = ()> {
    inner: Arc<StoreInner<E>>,
}

impl<E> Clone for Store<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E: Send + Sync + 'static> Store<E> {
    pub fn builder(state: impl Into<Value>, effects: E) -> StoreBuilder<E> {
        StoreBuilder::new(state, effects)
    }

    /// Current committed snapshot.
    pub fn state(&self) -> Snapshot {
        self.inner.core.current()
    }

    pub fn options(&self) -> &StoreOptions {
        &self.inner.options
    }

    pub fn effects(&self) -> &E {
        &self.inner.effects
    }

    pub fn action_names(&self) -> Vec<String> {
        self.inner.actions.names()
    }

    pub fn subscriptions(&self) -> &Arc<SubscriptionRegistry> {
        &self.inner.core.registry
    }

    /// Run the named action to completion.
    ///
    /// Writes are committed every time the action suspends and once more when
    /// it finishes. If the action fails, whatever it already wrote stays
    /// committed.
    pub fn dispatch(
        &self,
        name: &str,
        payload: serde_json::Value,
    ) -> impl Future<Output = Result<serde_json::Value>> + Send + 'static {
        let store = self.clone();
        let name = name.to_string();
        async move { store.run(name, payload).await }
    }

    async fn run(self, name: String, payload: serde_json::Value) -> Result<serde_json::Value> {
        let action = self
            .inner
            .actions
            .get(&name)
            .ok_or_else(|| RippleError::UnknownAction { name: name.clone() })?;

        let pending = Arc::new(PendingAction::new(&name, Arc::clone(&self.inner.core)));
        let span = debug_span!("action", action = %name, invocation = %pending.invocation());
        let ctx = ActionContext::new(Arc::clone(&pending), Arc::clone(&self.inner.effects));

        async move {
            debug!("dispatching");
            let body = action.run(ctx, payload);
            scheduler::drive(&pending, body).await
        }
        .instrument(span)
        .await
    }

    /// Dispatch with typed payload and result.
    pub async fn dispatch_as<P, R>(&self, name: &str, payload: P) -> Result<R>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let payload = serde_json::to_value(payload).map_err(|source| RippleError::Payload {
            action: name.to_string(),
            source,
        })?;
        let result = self.dispatch(name, payload).await?;
        serde_json::from_value(result).map_err(|source| RippleError::Payload {
            action: name.to_string(),
            source,
        })
    }

    /// Start an action and return its result if it finished without suspending.
    ///
    /// Otherwise the in-flight dispatch is returned; await it with
    /// [`Dispatch::settle`]. Actions that use runtime timers or IO must be
    /// started from inside that runtime.
    pub fn dispatch_now(&self, name: &str, payload: serde_json::Value) -> Result<Dispatch> {
        let mut dispatch: BoxFuture<'static, Result<serde_json::Value>> =
            Box::pin(self.dispatch(name, payload));
        let mut cx = Context::from_waker(futures::task::noop_waker_ref());
        match dispatch.as_mut().poll(&mut cx) {
            Poll::Ready(result) => result.map(Dispatch::Ready),
            Poll::Pending => Ok(Dispatch::Pending(dispatch)),
        }
    }

    /// Register a subscriber.
    ///
    /// Use a [`PathSet`] from [`Store::track`] to be notified only when
    /// something read there changes, or [`Interest::Everything`].
    pub fn subscribe(
        &self,
        interest: impl Into<Interest>,
        label: impl Into<String>,
        callback: impl Fn(&Snapshot) + Send + Sync + 'static,
    ) -> Subscription {
        self.inner
            .core
            .registry
            .subscribe(interest.into(), label, callback)
    }

    /// Global subscriber that fires only when `selector`'s result changes.
    pub fn subscribe_computed<T, S, C>(
        &self,
        label: impl Into<String>,
        selector: S,
        callback: C,
    ) -> Subscription
    where
        T: PartialEq + Clone + Send + 'static,
        S: Fn(&Snapshot) -> T + Send + Sync + 'static,
        C: Fn(&T) + Send + Sync + 'static,
    {
        let last = Mutex::new(selector(&self.state()));
        self.subscribe(Interest::Everything, label, move |snapshot| {
            let next = selector(snapshot);
            {
                let mut last = last.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                if *last == next {
                    return;
                }
                *last = next.clone();
            }
            callback(&next);
        })
    }

    /// Run `render` against tracked state now and again whenever something it
    /// read changes. Each run re-subscribes with the paths that run read.
    pub fn observe(
        &self,
        label: impl Into<String>,
        render: impl Fn(&Arc<TrackedView>) + Send + Sync + 'static,
    ) -> Observer {
        self.start_observer(
            label.into(),
            Box::new(move |session: &TrackingSession| render(&session.root())),
        )
    }

    /// Like [`Store::observe`], but scoped to the path `selector` points at.
    ///
    /// Each run re-resolves the target, records it, and hands `render` a view
    /// anchored there (`None` if nothing is there). Reads on the way to the
    /// target are not tracked, so siblings of the target never re-render.
    pub fn observe_at<R, S>(
        &self,
        label: impl Into<String>,
        selector: S,
        render: impl Fn(Option<&Tracked>) + Send + Sync + 'static,
    ) -> Observer
    where
        R: 'static,
        S: Fn(&Arc<TrackedView>) -> R + Send + Sync + 'static,
    {
        self.start_observer(
            label.into(),
            Box::new(move |session: &TrackingSession| {
                let target = TrackingSession::target(session.snapshot(), &selector).path;
                session.paths().record(&target);
                render(session.view_at(&target).as_ref());
            }),
        )
    }

    fn start_observer(&self, label: String, render: Render) -> Observer {
        let inner = Arc::new(ObserverInner {
            label,
            render,
            subscription: Mutex::new(None),
            paths: Mutex::new(PathSet::new()),
            renders: AtomicUsize::new(0),
        });
        ObserverInner::render(&inner, &self.inner.core, &self.state());
        Observer { inner }
    }

    /// Run `f` against tracked state; return its result and the paths it read.
    pub fn track<R>(&self, f: impl FnOnce(&Arc<TrackedView>) -> R) -> (R, PathSet) {
        let session = TrackingSession::new(&self.state());
        let result = f(&session.root());
        (result, session.paths().clone())
    }

    /// Run a selector and keep only the last path it read.
    pub fn select<R>(&self, selector: impl FnOnce(&Arc<TrackedView>) -> R) -> Target<R> {
        TrackingSession::target(&self.state(), selector)
    }

    /// Commit operations produced outside any action (a replayed log, a
    /// patch from elsewhere). Notifies like a flush.
    pub fn apply_patch(
        &self,
        origin: &str,
        operations: impl IntoIterator<Item = Operation>,
    ) -> Result<ChangeSet> {
        let log: MutationLog = operations.into_iter().collect();
        let (_, changes) = self.inner.core.commit(origin, None, &log)?;
        Ok(changes)
    }

    /// Receive every future commit on another task.
    pub fn commits(&self) -> broadcast::Receiver<CommitEvent> {
        self.inner.core.bus.subscribe()
    }
}

impl<E: Send + Sync + 'static> std::fmt::Debug for Store<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("version", &self.inner.core.current().version())
            .field("actions", &self.inner.actions.len())
            .field("subscriptions", &self.inner.core.registry.len())
            .finish()
    }
}

/// Outcome of [`Store::dispatch_now`].
pub enum Dispatch {
    Ready(serde_json::Value),
    Pending(BoxFuture<'static, Result<serde_json::Value>>),
}

impl Dispatch {
    pub fn is_pending(&self) -> bool {
        matches!(self, Dispatch::Pending(_))
    }

    pub async fn settle(self) -> Result<serde_json::Value> {
        match self {
            Dispatch::Ready(value) => Ok(value),
            Dispatch::Pending(pending) => pending.await,
        }
    }
}

impl std::fmt::Debug for Dispatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Dispatch::Ready(value) => f.debug_tuple("Ready").field(value).finish(),
            Dispatch::Pending(_) => f.write_str("Pending"),
        }
    }
}

type Render = Box<dyn Fn(&TrackingSession) + Send + Sync>;

struct ObserverInner {
    label: String,
    render: Render,
    subscription: Mutex<Option<Subscription>>,
    paths: Mutex<PathSet>,
    renders: AtomicUsize,
}

impl ObserverInner {
    fn render(inner: &Arc<Self>, core: &Arc<StoreCore>, snapshot: &Snapshot) {
        let session = TrackingSession::new(snapshot);
        (inner.render)(&session);
        let paths = session.paths().clone();

        let count = inner.renders.fetch_add(1, Ordering::Relaxed) + 1;
        if count > 1 {
            core.debug.log(LogKind::ComponentRender, || {
                format!("\"{}\", tracking \"{}\"", inner.label, paths.paths().join(", "))
            });
        }

        let observer = Arc::downgrade(inner);
        let store: Weak<StoreCore> = Arc::downgrade(core);
        let subscription = core.registry.subscribe(
            Interest::from(&paths),
            inner.label.clone(),
            move |snapshot| {
                if let (Some(observer), Some(core)) = (observer.upgrade(), store.upgrade()) {
                    ObserverInner::render(&observer, &core, snapshot);
                }
            },
        );

        *inner.paths.lock().unwrap_or_else(|p| p.into_inner()) = paths;
        let previous = inner
            .subscription
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .replace(subscription);
        drop(previous);
    }
}

/// A tracked render loop started by [`Store::observe`]. Dropping it stops
/// the loop.
pub struct Observer {
    inner: Arc<ObserverInner>,
}

impl Observer {
    pub fn label(&self) -> &str {
        &self.inner.label
    }

    /// How many times the render closure has run.
    pub fn renders(&self) -> usize {
        self.inner.renders.load(Ordering::Relaxed)
    }

    /// Paths read by the latest render.
    pub fn paths(&self) -> Vec<String> {
        self.inner
            .paths
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .paths()
    }
}

impl std::fmt::Debug for Observer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observer")
            .field("label", &self.inner.label)
            .field("renders", &self.renders())
            .finish()
    }
}

/// Builder for [`Store`].
pub struct StoreBuilder<E> {
    state: Value,
    effects: Arc<E>,
    actions: ActionRegistry<E>,
    options: StoreOptions,
    sink: Option<Arc<dyn DebugSink>>,
    errors: Vec<RippleError>,
}

impl<E: Send + Sync + 'static> StoreBuilder<E> {
    /// `state` must be a map.
    pub fn new(state: impl Into<Value>, effects: E) -> Self {
        Self::with_arc(state, Arc::new(effects))
    }

    /// Use effects that are already shared.
    pub fn with_arc(state: impl Into<Value>, effects: Arc<E>) -> Self {
        Self {
            state: state.into(),
            effects,
            actions: ActionRegistry::new(),
            options: StoreOptions::default(),
            sink: None,
            errors: Vec::new(),
        }
    }

    /// Register an action. Name clashes surface from [`StoreBuilder::build`].
    pub fn with_action<A: Action<E>>(mut self, name: &str, action: A) -> Self {
        if let Err(err) = self.actions.register(name, action) {
            self.errors.push(err);
        }
        self
    }

    /// Register a group of actions under `prefix.`.
    pub fn with_namespace(mut self, prefix: &str, build: impl FnOnce(&mut Namespace<'_, E>)) -> Self {
        let mut namespace = Namespace::new(prefix, &mut self.actions, &mut self.errors);
        build(&mut namespace);
        self
    }

    pub fn with_options(mut self, options: StoreOptions) -> Self {
        self.options = options;
        self
    }

    /// Where debug output goes when enabled. Defaults to [`TracingSink`].
    pub fn with_debug_sink(mut self, sink: Arc<dyn DebugSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn build(self) -> Result<Store<E>> {
        if let Some(err) = self.errors.into_iter().next() {
            return Err(err);
        }
        let snapshot = Snapshot::new(self.state)?;

        let debug_log = if self.options.debug_enabled() {
            DebugLog::new(self.sink.unwrap_or_else(|| Arc::new(TracingSink)))
        } else {
            DebugLog::disabled()
        };
        let bus = CommitBus::with_capacity(self.options.commit_channel_capacity);

        info!(
            actions = self.actions.len(),
            environment = %self.options.environment,
            debug = debug_log.is_enabled(),
            "store built"
        );

        Ok(Store {
            inner: Arc::new(StoreInner {
                core: Arc::new(StoreCore::new(snapshot, debug_log, bus)),
                actions: self.actions,
                effects: self.effects,
                options: self.options,
            }),
        })
    }
}
