//! Actions and the context they run in.
//!
//! An action is a named state transition. It receives an [`ActionContext`]
//! and a JSON payload, changes state through [`ActionContext::state`], and
//! returns a JSON result. It may await freely: pending writes are flushed
//! every time the action suspends (see [`crate::scheduler`]).
//!
//! # Example
//!
//! ```ignore
//! struct AddItem;
//!
//! #[async_trait]
//! impl Action<Deps> for AddItem {
//!     async fn run(&self, ctx: ActionContext<Deps>, payload: serde_json::Value) -> Result<serde_json::Value> {
//!         ctx.state().sequence("list")?.push(payload)?;
//!         let saved = ctx.effects().api.save().await?;
//!         // the draft above is committed; ask for state again
//!         ctx.state().set("saved", saved)?;
//!         Ok(serde_json::Value::Null)
//!     }
//! }
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::differ::ChangeSet;
use crate::error::RippleError;
use crate::scheduler::{ActionPhase, InvocationId, PendingAction, StateHandle};

/// Context passed to a running action.
///
/// Cheap to clone. Clones refer to the same invocation.
pub struct ActionContext<E> {
    pending: Arc<PendingAction>,
    effects: Arc<E>,
}

impl<E> Clone for ActionContext<E> {
    fn clone(&self) -> Self {
        Self {
            pending: self.pending.clone(),
            effects: self.effects.clone(),
        }
    }
}

impl<E> ActionContext<E> {
    pub(crate) fn new(pending: Arc<PendingAction>, effects: Arc<E>) -> Self {
        Self { pending, effects }
    }

    /// Writable view of state.
    ///
    /// Call again after every `.await` that follows a write: the flush at that
    /// suspension retires the previous handle.
    pub fn state(&self) -> StateHandle {
        self.pending.handle()
    }

    /// Shared services the store was built with.
    pub fn effects(&self) -> &E {
        &self.effects
    }

    pub fn action_name(&self) -> &str {
        self.pending.name()
    }

    pub fn invocation(&self) -> InvocationId {
        self.pending.invocation()
    }

    pub fn phase(&self) -> ActionPhase {
        self.pending.phase()
    }

    /// Commit pending writes immediately instead of at the next suspension.
    pub fn flush(&self) -> crate::error::Result<Option<ChangeSet>> {
        self.pending.flush_now()
    }
}

impl<E> std::fmt::Debug for ActionContext<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionContext")
            .field("pending", &self.pending)
            .finish()
    }
}

/// A named state transition.
#[async_trait]
pub trait Action<E>: Send + Sync + 'static {
    async fn run(&self, ctx: ActionContext<E>, payload: serde_json::Value)
        -> Result<serde_json::Value>;
}

/// Action backed by an async closure. See [`action_fn`].
pub struct FnAction<F>(F);

/// Wrap an async closure as an [`Action`].
///
/// ```ignore
/// builder.with_action("load", action_fn(|ctx: ActionContext<Deps>, _| async move {
///     let items = ctx.effects().api.items().await?;
///     ctx.state().set("items", items)?;
///     Ok(serde_json::Value::Null)
/// }))
/// ```
pub fn action_fn<E, F, Fut>(f: F) -> FnAction<F>
where
    E: Send + Sync + 'static,
    F: Fn(ActionContext<E>, serde_json::Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<serde_json::Value>> + Send + 'static,
{
    FnAction(f)
}

#[async_trait]
impl<E, F, Fut> Action<E> for FnAction<F>
where
    E: Send + Sync + 'static,
    F: Fn(ActionContext<E>, serde_json::Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<serde_json::Value>> + Send + 'static,
{
    async fn run(
        &self,
        ctx: ActionContext<E>,
        payload: serde_json::Value,
    ) -> Result<serde_json::Value> {
        (self.0)(ctx, payload).await
    }
}

/// Action backed by a synchronous closure. See [`sync_action`].
pub struct SyncAction<F>(F);

/// Wrap a synchronous closure as an [`Action`].
///
/// The body never suspends, so its writes are flushed once, before dispatch
/// returns.
pub fn sync_action<E, F>(f: F) -> SyncAction<F>
where
    E: Send + Sync + 'static,
    F: Fn(&ActionContext<E>, serde_json::Value) -> Result<serde_json::Value>
        + Send
        + Sync
        + 'static,
{
    SyncAction(f)
}

#[async_trait]
impl<E, F> Action<E> for SyncAction<F>
where
    E: Send + Sync + 'static,
    F: Fn(&ActionContext<E>, serde_json::Value) -> Result<serde_json::Value>
        + Send
        + Sync
        + 'static,
{
    async fn run(
        &self,
        ctx: ActionContext<E>,
        payload: serde_json::Value,
    ) -> Result<serde_json::Value> {
        (self.0)(&ctx, payload)
    }
}

/// Name separator for namespaced actions.
pub const NAMESPACE_SEPARATOR: char = '.';

fn validate_name(name: &str) -> crate::error::Result<()> {
    let valid = !name.is_empty()
        && name.split(NAMESPACE_SEPARATOR).all(|segment| {
            !segment.is_empty() && !segment.chars().any(char::is_whitespace)
        });
    if valid {
        Ok(())
    } else {
        Err(RippleError::InvalidActionName {
            name: name.to_string(),
        })
    }
}

/// Flat table of actions keyed by (possibly namespaced) name.
pub struct ActionRegistry<E> {
    actions: HashMap<String, Arc<dyn Action<E>>>,
}

impl<E: Send + Sync + 'static> ActionRegistry<E> {
    pub fn new() -> Self {
        Self {
            actions: HashMap::new(),
        }
    }

    pub fn register<A>(&mut self, name: impl Into<String>, action: A) -> crate::error::Result<()>
    where
        A: Action<E>,
    {
        self.register_arc(name.into(), Arc::new(action))
    }

    fn register_arc(&mut self, name: String, action: Arc<dyn Action<E>>) -> crate::error::Result<()> {
        validate_name(&name)?;
        if self.actions.contains_key(&name) {
            return Err(RippleError::ActionAlreadyRegistered { name });
        }
        self.actions.insert(name, action);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Action<E>>> {
        self.actions.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.actions.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.actions.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

impl<E: Send + Sync + 'static> Default for ActionRegistry<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// Registers actions under a common prefix.
pub struct Namespace<'a, E> {
    prefix: String,
    registry: &'a mut ActionRegistry<E>,
    errors: &'a mut Vec<RippleError>,
}

impl<'a, E: Send + Sync + 'static> Namespace<'a, E> {
    pub(crate) fn new(
        prefix: impl Into<String>,
        registry: &'a mut ActionRegistry<E>,
        errors: &'a mut Vec<RippleError>,
    ) -> Self {
        Self {
            prefix: prefix.into(),
            registry,
            errors,
        }
    }

    fn qualify(&self, name: &str) -> String {
        format!("{}{}{}", self.prefix, NAMESPACE_SEPARATOR, name)
    }

    /// Register `prefix.name`. Failures surface when the store is built.
    pub fn action<A: Action<E>>(&mut self, name: &str, action: A) -> &mut Self {
        let qualified = self.qualify(name);
        if let Err(err) = self.registry.register(qualified, action) {
            self.errors.push(err);
        }
        self
    }

    /// Nested namespace `prefix.name`.
    pub fn namespace(&mut self, name: &str, build: impl FnOnce(&mut Namespace<'_, E>)) -> &mut Self {
        let prefix = self.qualify(name);
        let mut nested = Namespace::new(prefix, self.registry, self.errors);
        build(&mut nested);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn noop() -> impl Action<()> {
        sync_action(|_: &ActionContext<()>, payload| Ok(payload))
    }

    #[test]
    fn test_register_and_lookup() {
        let mut registry = ActionRegistry::<()>::new();
        registry.register("increment", noop()).unwrap();

        assert!(registry.contains("increment"));
        assert!(registry.get("increment").is_some());
        assert!(registry.get("decrement").is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let mut registry = ActionRegistry::<()>::new();
        registry.register("increment", noop()).unwrap();

        let err = registry.register("increment", noop()).unwrap_err();
        assert!(matches!(err, RippleError::ActionAlreadyRegistered { name } if name == "increment"));
    }

    #[test]
    fn test_invalid_names_rejected() {
        let mut registry = ActionRegistry::<()>::new();
        for name in ["", "a..b", ".a", "a.", "has space"] {
            assert!(
                matches!(
                    registry.register(name, noop()),
                    Err(RippleError::InvalidActionName { .. })
                ),
                "{name:?} should be rejected"
            );
        }
        assert!(registry.is_empty());
    }

    #[test]
    fn test_namespaces_qualify_names() {
        let mut registry = ActionRegistry::<()>::new();
        let mut errors = Vec::new();
        {
            let mut ns = Namespace::new("todos", &mut registry, &mut errors);
            ns.action("add", noop()).namespace("filters", |nested| {
                nested.action("set", noop());
            });
            ns.action("add", noop());
        }

        assert_eq!(registry.names(), vec!["todos.add", "todos.filters.set"]);
        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0], RippleError::ActionAlreadyRegistered { .. }));
    }

    #[tokio::test]
    async fn test_fn_action_runs_closure() {
        let action = action_fn(|ctx: ActionContext<u32>, payload: serde_json::Value| async move {
            Ok(json!({ "payload": payload, "effects": *ctx.effects() }))
        });
        let core = crate::store::StoreCore::for_tests(json!({}));
        let pending = Arc::new(PendingAction::new("echo", core));
        let ctx = ActionContext::new(pending, Arc::new(7u32));

        let result = action.run(ctx, json!(1)).await.unwrap();
        assert_eq!(result, json!({ "payload": 1, "effects": 7 }));
    }
}
