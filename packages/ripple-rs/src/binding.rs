//! A slot a host binds a store into.
//!
//! UI layers and other consumers hold a [`StoreBinding`] instead of a store so
//! they can be created before the store exists. Reading state, dispatching or
//! subscribing through an empty binding fails with
//! [`RippleError::MissingStore`].

use std::sync::{Arc, RwLock};

use crate::error::{Result, RippleError};
use crate::registry::{Interest, Subscription};
use crate::snapshot::Snapshot;
use crate::store::Store;

pub struct StoreBinding<E = ()> {
    slot: Arc<RwLock<Option<Store<E>>>>,
}

impl<E> Clone for StoreBinding<E> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<E: Send + Sync + 'static> Default for StoreBinding<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Send + Sync + 'static> StoreBinding<E> {
    /// An empty binding.
    pub fn new() -> Self {
        Self {
            slot: Arc::new(RwLock::new(None)),
        }
    }

    pub fn bound(store: Store<E>) -> Self {
        let binding = Self::new();
        binding.provide(store);
        binding
    }

    /// Bind `store`, returning whatever was bound before.
    pub fn provide(&self, store: Store<E>) -> Option<Store<E>> {
        self.slot
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .replace(store)
    }

    pub fn clear(&self) -> Option<Store<E>> {
        self.slot
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }

    pub fn is_bound(&self) -> bool {
        self.slot
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .is_some()
    }

    pub fn store(&self) -> Result<Store<E>> {
        self.slot
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
            .ok_or(RippleError::MissingStore)
    }

    pub fn state(&self) -> Result<Snapshot> {
        Ok(self.store()?.state())
    }

    pub async fn dispatch(
        &self,
        name: &str,
        payload: serde_json::Value,
    ) -> Result<serde_json::Value> {
        let store = self.store()?;
        store.dispatch(name, payload).await
    }

    pub fn subscribe(
        &self,
        interest: impl Into<Interest>,
        label: impl Into<String>,
        callback: impl Fn(&Snapshot) + Send + Sync + 'static,
    ) -> Result<Subscription> {
        Ok(self.store()?.subscribe(interest, label, callback))
    }
}

impl<E> std::fmt::Debug for StoreBinding<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let bound = self
            .slot
            .read()
            .map(|slot| slot.is_some())
            .unwrap_or(false);
        f.debug_struct("StoreBinding").field("bound", &bound).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{sync_action, ActionContext};
    use crate::store::StoreBuilder;
    use serde_json::json;

    fn store() -> Store<()> {
        StoreBuilder::new(json!({ "foo": "bar" }), ())
            .with_action(
                "shout",
                sync_action(|ctx: &ActionContext<()>, _| {
                    ctx.state().set("foo", "BAR")?;
                    Ok(serde_json::Value::Null)
                }),
            )
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_unbound_binding_fails_with_missing_store() {
        let binding = StoreBinding::<()>::new();

        assert!(matches!(binding.state(), Err(RippleError::MissingStore)));
        assert!(matches!(
            binding.dispatch("shout", json!(null)).await,
            Err(RippleError::MissingStore)
        ));
        assert!(matches!(
            binding.subscribe(Interest::Everything, "view", |_: &Snapshot| {}),
            Err(RippleError::MissingStore)
        ));
    }

    #[tokio::test]
    async fn test_bound_binding_forwards() {
        let binding = StoreBinding::new();
        let consumer = binding.clone();
        assert!(binding.provide(store()).is_none());

        consumer.dispatch("shout", json!(null)).await.unwrap();
        let state = consumer.state().unwrap();
        assert_eq!(state.get("foo").and_then(|v| v.as_str()), Some("BAR"));
    }

    #[test]
    fn test_clear_unbinds() {
        let binding = StoreBinding::bound(store());
        assert!(binding.is_bound());
        assert!(binding.clear().is_some());
        assert!(matches!(binding.store(), Err(RippleError::MissingStore)));
    }
}
