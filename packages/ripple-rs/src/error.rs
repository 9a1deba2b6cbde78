//! Structured error types for ripple.
//!
//! `RippleError` provides pattern-matchable errors instead of generic `anyhow::Error`.
//!
//! # The Error Boundary Rule
//!
//! > **Action bodies speak `anyhow`; the store speaks `RippleError`.**
//!
//! - `anyhow` is internal transport (ergonomic inside action handlers)
//! - `RippleError` is what `dispatch` and the accessor API hand back
//!
//! A `RippleError` raised inside an action body (for example a write through a
//! stale handle) is recovered from the `anyhow` chain and surfaced as itself,
//! so callers can still match on it.
//!
//! # Example
//!
//! ```ignore
//! use ripple::RippleError;
//!
//! match store.dispatch("todos.add", payload).await {
//!     Ok(result) => println!("added: {result}"),
//!     Err(RippleError::StaleDraft { action }) => {
//!         eprintln!("{action} wrote through a handle captured before an await");
//!     }
//!     Err(e) => eprintln!("dispatch failed: {e}"),
//! }
//! ```

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, RippleError>;

/// Structured error type for ripple operations.
#[derive(Debug, Error)]
pub enum RippleError {
    /// State was read or an action dispatched through a binding with no store.
    #[error(
        "no store is bound: provide a store to the binding before reading state or dispatching actions"
    )]
    MissingStore,

    /// A write (or read) went through a draft handle that a flush has already retired.
    #[error(
        "you are asynchronously changing state in the action \"{action}\": re-acquire state from the action context, the previous draft has been committed"
    )]
    StaleDraft {
        /// Name of the action that used the stale handle.
        action: String,
    },

    /// No action is registered under this name.
    #[error("no action registered under \"{name}\"")]
    UnknownAction {
        /// The requested action name.
        name: String,
    },

    /// An action is already registered under this name.
    #[error("action already registered under \"{name}\"")]
    ActionAlreadyRegistered {
        /// The duplicated action name.
        name: String,
    },

    /// Action names are dot-separated, non-empty segments.
    #[error("invalid action name \"{name}\"")]
    InvalidActionName {
        /// The rejected name.
        name: String,
    },

    /// The state tree root must be a map.
    #[error("state root must be a map of keys to values")]
    InvalidRoot,

    /// A map key contains the path separator, so no path can address it.
    #[error("map key \"{key}\" may not contain '.'")]
    InvalidKey {
        /// The rejected key.
        key: String,
    },

    /// Nothing exists at the given path.
    #[error("no value at path \"{path}\"")]
    PathNotFound {
        /// Canonical path.
        path: String,
    },

    /// A path traversed through a primitive value.
    #[error("value at \"{path}\" is not a container")]
    NotAContainer {
        /// Canonical path of the primitive.
        path: String,
    },

    /// The value at a path has a different shape than the operation needs.
    #[error("value at \"{path}\" is not a {expected}")]
    TypeMismatch {
        /// Canonical path.
        path: String,
        /// The shape the caller needed.
        expected: &'static str,
    },

    /// A sequence index was past the end.
    #[error("index {index} out of bounds for sequence \"{path}\" of length {len}")]
    IndexOutOfBounds {
        /// Canonical path of the sequence.
        path: String,
        /// The offending index.
        index: usize,
        /// Sequence length at the time of access.
        len: usize,
    },

    /// The action body returned an error. Already-flushed mutations stay committed.
    #[error("action \"{action}\" failed: {source}")]
    ActionFailed {
        /// Name of the failing action.
        action: String,
        /// The error returned by the action body.
        #[source]
        source: anyhow::Error,
    },

    /// Payload or result could not be converted for typed dispatch.
    #[error("payload conversion failed for action \"{action}\": {source}")]
    Payload {
        /// Name of the action.
        action: String,
        /// The serde error.
        #[source]
        source: serde_json::Error,
    },
}

impl RippleError {
    /// Convert an action body failure into a store error.
    ///
    /// A `RippleError` anywhere in the chain root wins over the generic
    /// `ActionFailed` wrapper.
    pub(crate) fn from_action(action: &str, error: anyhow::Error) -> Self {
        match error.downcast::<RippleError>() {
            Ok(inner) => inner,
            Err(error) => RippleError::ActionFailed {
                action: action.to_string(),
                source: error,
            },
        }
    }

    /// Returns true for errors caused by writing through a retired draft.
    pub fn is_stale_draft(&self) -> bool {
        matches!(self, RippleError::StaleDraft { .. })
    }
}
