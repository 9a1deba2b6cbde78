//! Path-copying updates on a state tree.
//!
//! Every write goes through [`Arc::make_mut`] on the containers along the
//! target path only. A container still shared with an older snapshot is
//! cloned shallowly (its children stay shared); one already owned by the
//! working copy is mutated in place. Siblings of the path are never touched,
//! which is what keeps untouched subtrees reference-identical across versions.

use std::sync::Arc;

use crate::error::{Result, RippleError};
use crate::path::{Path, Segment};
use crate::recorder::{OpKind, Operation};
use crate::value::Value;

/// Look up the value at `path`.
pub fn lookup<'a>(root: &'a Value, path: &Path) -> Option<&'a Value> {
    path.segments()
        .iter()
        .try_fold(root, |node, segment| child(node, segment))
}

fn child<'a>(node: &'a Value, segment: &Segment) -> Option<&'a Value> {
    match node {
        Value::Map(entries) => entries.get(&segment.as_key()),
        Value::List(items) => items.get(segment.as_index()?),
        _ => None,
    }
}

/// Mutable access to the container at `path`, copying shared nodes on the way.
pub fn resolve_mut<'a>(root: &'a mut Value, path: &Path) -> Result<&'a mut Value> {
    let mut node = root;
    for (depth, segment) in path.segments().iter().enumerate() {
        let here = || path.segments()[..depth].iter().cloned().collect::<Path>();
        node = match node {
            Value::Map(entries) => Arc::make_mut(entries)
                .get_mut(&segment.as_key())
                .ok_or_else(|| RippleError::PathNotFound {
                    path: here().child(segment.clone()).canonical(),
                })?,
            Value::List(items) => {
                let len = items.len();
                let index = segment.as_index().ok_or_else(|| RippleError::TypeMismatch {
                    path: here().canonical(),
                    expected: "map",
                })?;
                Arc::make_mut(items)
                    .get_mut(index)
                    .ok_or_else(|| RippleError::IndexOutOfBounds {
                        path: here().canonical(),
                        index,
                        len,
                    })?
            }
            _ => {
                return Err(RippleError::NotAContainer {
                    path: here().canonical(),
                })
            }
        };
    }
    Ok(node)
}

/// Apply one primitive operation to `root`.
///
/// Operations the tree does not recognize are ignored here; the differ is
/// responsible for over-reporting them.
pub fn apply(root: &mut Value, op: &Operation) -> Result<()> {
    let Some((parent_path, last)) = op.path.split_last() else {
        return apply_to_root(root, op);
    };
    let value = op.value.clone().unwrap_or(Value::Null);
    let parent = resolve_mut(root, &parent_path)?;

    match (parent, &op.kind) {
        (_, OpKind::Unrecognized) => Ok(()),
        (Value::Map(entries), OpKind::Set | OpKind::Add | OpKind::Replace) => {
            Arc::make_mut(entries).insert(last.as_key(), value);
            Ok(())
        }
        (Value::Map(entries), OpKind::Remove) => Arc::make_mut(entries)
            .remove(&last.as_key())
            .map(|_| ())
            .ok_or_else(|| RippleError::PathNotFound {
                path: op.path.canonical(),
            }),
        (Value::List(items), kind) => {
            let index = last.as_index().ok_or_else(|| RippleError::TypeMismatch {
                path: parent_path.canonical(),
                expected: "map",
            })?;
            let len = items.len();
            let out_of_bounds = || RippleError::IndexOutOfBounds {
                path: parent_path.canonical(),
                index,
                len,
            };
            let items = Arc::make_mut(items);
            match kind {
                OpKind::Set | OpKind::Replace if index < len => items[index] = value,
                OpKind::Set | OpKind::Replace if index == len => items.push(value),
                OpKind::Add if index <= len => items.insert(index, value),
                OpKind::Remove if index < len => {
                    items.remove(index);
                }
                _ => return Err(out_of_bounds()),
            }
            Ok(())
        }
        _ => Err(RippleError::NotAContainer {
            path: parent_path.canonical(),
        }),
    }
}

fn apply_to_root(root: &mut Value, op: &Operation) -> Result<()> {
    match op.kind {
        OpKind::Set | OpKind::Replace => match &op.value {
            Some(value @ Value::Map(_)) => {
                *root = value.clone();
                Ok(())
            }
            _ => Err(RippleError::InvalidRoot),
        },
        OpKind::Unrecognized => Ok(()),
        OpKind::Add | OpKind::Remove => Err(RippleError::InvalidRoot),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tree() -> Value {
        Value::from(json!({"user": {"name": "ada", "tags": ["a", "b"]}, "other": {"x": 1}}))
    }

    #[test]
    fn test_lookup_through_maps_and_lists() {
        let root = tree();
        assert_eq!(
            lookup(&root, &Path::parse("user.tags.1")).and_then(Value::as_str),
            Some("b")
        );
        assert!(lookup(&root, &Path::parse("user.tags.9")).is_none());
        assert!(lookup(&root, &Path::parse("user.name.first")).is_none());
    }

    #[test]
    fn test_apply_copies_only_the_touched_branch() {
        let before = tree();
        let mut after = before.clone();

        apply(&mut after, &Operation::set("user.name", "grace")).unwrap();

        assert_eq!(lookup(&before, &Path::parse("user.name")).unwrap().as_str(), Some("ada"));
        assert_eq!(lookup(&after, &Path::parse("user.name")).unwrap().as_str(), Some("grace"));

        let untouched = Path::parse("other");
        assert!(lookup(&before, &untouched)
            .unwrap()
            .same(lookup(&after, &untouched).unwrap()));
        let sibling = Path::parse("user.tags");
        assert!(lookup(&before, &sibling)
            .unwrap()
            .same(lookup(&after, &sibling).unwrap()));
        assert!(!lookup(&before, &Path::parse("user"))
            .unwrap()
            .same(lookup(&after, &Path::parse("user")).unwrap()));
    }

    #[test]
    fn test_list_add_and_remove() {
        let mut root = tree();
        apply(&mut root, &Operation::add("user.tags.2", "c")).unwrap();
        apply(&mut root, &Operation::remove("user.tags.0")).unwrap();
        assert_eq!(
            lookup(&root, &Path::parse("user.tags")).unwrap().to_json(),
            json!(["b", "c"])
        );
    }

    #[test]
    fn test_out_of_bounds_is_reported() {
        let mut root = tree();
        let err = apply(&mut root, &Operation::add("user.tags.7", "z")).unwrap_err();
        assert!(matches!(err, RippleError::IndexOutOfBounds { index: 7, len: 2, .. }));
    }

    #[test]
    fn test_remove_missing_key_fails() {
        let mut root = tree();
        let err = apply(&mut root, &Operation::remove("user.age")).unwrap_err();
        assert!(matches!(err, RippleError::PathNotFound { path } if path == "user.age"));
    }

    #[test]
    fn test_write_through_primitive_fails() {
        let mut root = tree();
        let err = apply(&mut root, &Operation::set("user.name.first", "x")).unwrap_err();
        assert!(matches!(err, RippleError::NotAContainer { .. }));
    }
}
