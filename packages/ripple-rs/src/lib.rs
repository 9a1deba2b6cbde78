//! # Ripple
//!
//! A fine-grained reactive state store: actions change state through a
//! recorded draft, commits compute exactly which paths changed, and only the
//! observers that read those paths are notified.
//!
//! ## Core Concepts
//!
//! - [`Snapshot`] = committed state (immutable, versioned, structurally shared)
//! - [`Action`] = a named state transition, run through [`Store::dispatch`]
//! - [`PathSet`] = what an observer read, recorded by [`Store::track`]
//!
//! ## Architecture
//!
//! ```text
//! dispatch("name", payload)
//!     │
//!     ▼
//! PendingAction ── ctx.state() ──► MutationRecorder ──► Draft
//!     │                                  │
//!     │ suspend / finish                 ▼ MutationLog
//!     ▼                                  │
//! flush ─────────────────────────► Differ::commit
//!                                        │
//!                           ┌────────────┴─────────────┐
//!                           ▼                          ▼
//!                  new Snapshot + ChangeSet     CommitBus (other tasks)
//!                           │
//!                           ▼
//!                 SubscriptionRegistry::notify
//!                           │
//!                           ├─► path subscribers whose paths changed (once each)
//!                           └─► global subscribers (always)
//! ```
//!
//! ## Key Invariants
//!
//! 1. **Snapshots are immutable** - a commit produces a new snapshot that
//!    shares every untouched subtree with its predecessor
//! 2. **Drafts are single-use** - a flush retires the draft and every handle to it
//! 3. **Flush at every suspension** - writes never wait for the whole action
//! 4. **No rollback** - a failing action keeps what it already committed
//! 5. **Over-notify, never under-notify** - unknown operations mark the root changed
//!
//! ## Example
//!
//! ```ignore
//! use ripple::{action_fn, ActionContext, Interest, StoreBuilder};
//! use serde_json::json;
//!
//! let store = StoreBuilder::new(json!({ "todos": [], "status": "idle" }), api)
//!     .with_action("load", action_fn(|ctx: ActionContext<Api>, _| async move {
//!         ctx.state().set("status", "loading")?;
//!         // flushed here: observers of "status" see "loading"
//!         let todos = ctx.effects().todos().await?;
//!         let state = ctx.state();
//!         state.set("todos", todos)?;
//!         state.set("status", "ready")?;
//!         Ok(json!(null))
//!     }))
//!     .build()?;
//!
//! let (_, paths) = store.track(|state| state.get("status"));
//! let _status = store.subscribe(&paths, "StatusBar", |snapshot| {
//!     println!("status: {:?}", snapshot.get("status"));
//! });
//!
//! store.dispatch("load", json!(null)).await?;
//! ```

// Core modules
mod action;
mod binding;
mod bus;
mod config;
mod debug;
mod differ;
mod draft;
mod error;
mod path;
mod recorder;
mod registry;
mod scheduler;
mod snapshot;
mod store;
mod tracker;
mod tree;
mod value;

// Testing utilities (feature-gated)
#[cfg(any(test, feature = "testing"))]
pub mod testing;


// State
pub use path::{Path, Segment};
pub use snapshot::Snapshot;
pub use value::{List, Map, Value};

// Mutation recording and diffing
pub use differ::{ChangeSet, Differ};
pub use draft::Draft;
pub use recorder::{sequence_ops, LogEntry, MutationLog, MutationRecorder, OpKind, Operation};

// Read tracking
pub use tracker::{PathSet, Target, Tracked, TrackedView, TrackingSession};

// Subscriptions
pub use registry::{Callback, Interest, Subscription, SubscriptionId, SubscriptionRegistry};

// Actions and scheduling
pub use action::{
    action_fn, sync_action, Action, ActionContext, ActionRegistry, FnAction, Namespace,
    SyncAction, NAMESPACE_SEPARATOR,
};
pub use scheduler::{
    ActionPhase, InvocationId, Node, ObjectView, PendingAction, SequenceView, StateHandle,
};

// Store surface
pub use binding::StoreBinding;
pub use bus::{CommitBus, CommitEvent};
pub use store::{Dispatch, Observer, Store, StoreBuilder};

// Configuration, debug output, errors
pub use config::{Environment, StoreOptions, DEFAULT_COMMIT_CAPACITY};
pub use debug::{DebugEntry, DebugLog, DebugSink, LogKind, MemorySink, TracingSink};
pub use error::{Result, RippleError};

// Re-export async_trait for implementing Action
pub use async_trait::async_trait;
