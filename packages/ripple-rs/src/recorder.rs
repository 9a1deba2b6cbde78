//! Mutation recording.
//!
//! The [`MutationRecorder`] owns a [`Draft`] and is the only way to write to
//! it. Each write is applied to the draft immediately and appended to an
//! ordered [`MutationLog`]. Sequence edits (push, pop, splice, sort, ...) are
//! logged once under their method name for debugging, but carry the
//! index-level operations they imply so the differ can replay and diff them.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::draft::Draft;
use crate::error::{Result, RippleError};
use crate::path::{Path, Segment};
use crate::value::{List, Value};

/// Kind of a recorded primitive mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpKind {
    /// Overwrite an existing entry.
    Set,
    /// Insert a new map key or sequence element.
    Add,
    /// Delete a map key or sequence element.
    Remove,
    /// Replace a value wholesale (index rewrites inside sequence edits).
    Replace,
    /// Anything a foreign log carries that this crate does not know.
    #[serde(other)]
    Unrecognized,
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OpKind::Set => "set",
            OpKind::Add => "add",
            OpKind::Remove => "remove",
            OpKind::Replace => "replace",
            OpKind::Unrecognized => "unrecognized",
        };
        f.write_str(name)
    }
}

/// One recorded primitive mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    #[serde(rename = "op")]
    pub kind: OpKind,
    pub path: Path,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl Operation {
    pub fn new(kind: OpKind, path: impl Into<Path>, value: Option<Value>) -> Self {
        Self {
            kind,
            path: path.into(),
            value,
        }
    }

    pub fn set(path: impl Into<Path>, value: impl Into<Value>) -> Self {
        Self::new(OpKind::Set, path, Some(value.into()))
    }

    pub fn add(path: impl Into<Path>, value: impl Into<Value>) -> Self {
        Self::new(OpKind::Add, path, Some(value.into()))
    }

    pub fn replace(path: impl Into<Path>, value: impl Into<Value>) -> Self {
        Self::new(OpKind::Replace, path, Some(value.into()))
    }

    pub fn remove(path: impl Into<Path>) -> Self {
        Self::new(OpKind::Remove, path, None)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} \"{}\"", self.kind, self.path)
    }
}

/// One entry of a [`MutationLog`].
#[derive(Debug, Clone, PartialEq)]
pub enum LogEntry {
    /// A single set/add/remove/replace.
    Primitive(Operation),
    /// A sequence method call, the index-level operations it expanded to,
    /// and the sequence it left behind.
    Composite {
        method: String,
        container: Path,
        ops: Vec<Operation>,
        after: List,
    },
}

impl LogEntry {
    /// The primitive operations of this entry, in application order.
    pub fn operations(&self) -> &[Operation] {
        match self {
            LogEntry::Primitive(op) => std::slice::from_ref(op),
            LogEntry::Composite { ops, .. } => ops,
        }
    }

    /// Short description for debug output, e.g. `push "list"`.
    pub fn describe(&self) -> String {
        match self {
            LogEntry::Primitive(op) => op.to_string(),
            LogEntry::Composite {
                method, container, ..
            } => format!("{method} \"{container}\""),
        }
    }
}

/// Ordered log of everything written to one draft.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MutationLog {
    entries: Vec<LogEntry>,
}

impl MutationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: LogEntry) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    /// Every primitive operation, flattened, in recorded order.
    pub fn operations(&self) -> impl Iterator<Item = &Operation> {
        self.entries.iter().flat_map(LogEntry::operations)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<Operation> for MutationLog {
    fn from_iter<I: IntoIterator<Item = Operation>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().map(LogEntry::Primitive).collect(),
        }
    }
}

/// Index-level operations turning `old` into `new` at `container`.
///
/// Order: rewrites of shared indices, appends ascending, removals from the
/// end. Replaying them in that order reproduces `new` exactly.
pub fn sequence_ops(container: &Path, old: &[Value], new: &[Value]) -> Vec<Operation> {
    let shared = old.len().min(new.len());
    let mut ops = Vec::new();

    for (index, (before, after)) in old.iter().zip(new).enumerate().take(shared) {
        if !before.same(after) {
            ops.push(Operation::replace(container.child(index), after.clone()));
        }
    }
    for (index, item) in new.iter().enumerate().skip(shared) {
        ops.push(Operation::add(container.child(index), item.clone()));
    }
    for index in (shared..old.len()).rev() {
        ops.push(Operation::remove(container.child(index)));
    }
    ops
}

/// Writes against a [`Draft`], recorded as a [`MutationLog`].
pub struct MutationRecorder {
    draft: Draft,
    log: MutationLog,
}

impl MutationRecorder {
    pub fn new(draft: Draft) -> Self {
        Self {
            draft,
            log: MutationLog::new(),
        }
    }

    pub fn draft(&self) -> &Draft {
        &self.draft
    }

    pub fn log(&self) -> &MutationLog {
        &self.log
    }

    /// True once anything has been recorded.
    pub fn is_dirty(&self) -> bool {
        !self.log.is_empty()
    }

    pub fn get(&self, path: &Path) -> Option<&Value> {
        self.draft.get(path)
    }

    /// Write `value` at `path`.
    ///
    /// Logged as `add` when the key or index is new (the container changed
    /// shape) and as `set` when it overwrites.
    pub fn set(&mut self, path: &Path, value: Value) -> Result<()> {
        let Some((parent, last)) = path.split_last() else {
            return self.record(LogEntry::Primitive(Operation::new(
                OpKind::Replace,
                Path::root(),
                Some(value),
            )));
        };

        let kind = match self.container(&parent)? {
            Value::Map(entries) if entries.contains_key(&last.as_key()) => OpKind::Set,
            Value::Map(_) => OpKind::Add,
            Value::List(items) => {
                let index = list_index(&parent, last)?;
                match index.cmp(&items.len()) {
                    std::cmp::Ordering::Less => OpKind::Set,
                    std::cmp::Ordering::Equal => OpKind::Add,
                    std::cmp::Ordering::Greater => {
                        return Err(RippleError::IndexOutOfBounds {
                            path: parent.canonical(),
                            index,
                            len: items.len(),
                        })
                    }
                }
            }
            _ => unreachable!("container() only returns maps and lists"),
        };

        self.record(LogEntry::Primitive(Operation::new(
            kind,
            path.clone(),
            Some(value),
        )))
    }

    /// Delete the value at `path` and return it.
    ///
    /// Removing a sequence element is a `splice` of one element.
    pub fn remove(&mut self, path: &Path) -> Result<Value> {
        let Some((parent, last)) = path.split_last() else {
            return Err(RippleError::InvalidRoot);
        };

        match self.container(&parent)? {
            Value::Map(entries) => {
                let removed = entries
                    .get(&last.as_key())
                    .cloned()
                    .ok_or_else(|| RippleError::PathNotFound {
                        path: path.canonical(),
                    })?;
                self.record(LogEntry::Primitive(Operation::remove(path.clone())))?;
                Ok(removed)
            }
            Value::List(items) => {
                let index = list_index(&parent, last)?;
                if index >= items.len() {
                    return Err(RippleError::IndexOutOfBounds {
                        path: parent.canonical(),
                        index,
                        len: items.len(),
                    });
                }
                self.edit_sequence(&parent, "splice", |items| items.remove(index))
            }
            _ => unreachable!("container() only returns maps and lists"),
        }
    }

    /// Run `edit` on a copy of the sequence at `path` and record the difference.
    ///
    /// Nothing is recorded when the edit leaves the sequence unchanged.
    pub fn edit_sequence<R>(
        &mut self,
        path: &Path,
        method: &str,
        edit: impl FnOnce(&mut List) -> R,
    ) -> Result<R> {
        let mut items = self.sequence(path)?.as_ref().clone();
        let result = edit(&mut items);
        self.replace_sequence(path, method, items)?;
        Ok(result)
    }

    /// Record `method` as turning the sequence at `path` into `after`.
    ///
    /// The difference is taken against the draft's current sequence.
    pub fn replace_sequence(&mut self, path: &Path, method: &str, after: List) -> Result<()> {
        let before = self.sequence(path)?;
        let ops = sequence_ops(path, &before, &after);
        if ops.is_empty() {
            return Ok(());
        }
        self.record(LogEntry::Composite {
            method: method.to_string(),
            container: path.clone(),
            ops,
            after,
        })
    }

    /// The sequence at `path` in the draft.
    pub fn sequence(&self, path: &Path) -> Result<Arc<List>> {
        match self.draft.get(path) {
            Some(Value::List(items)) => Ok(Arc::clone(items)),
            Some(_) => Err(RippleError::TypeMismatch {
                path: path.canonical(),
                expected: "sequence",
            }),
            None => Err(RippleError::PathNotFound {
                path: path.canonical(),
            }),
        }
    }

    /// Give up the draft and the log. The draft must not be written again.
    pub fn finish(self) -> (Draft, MutationLog) {
        (self.draft, self.log)
    }

    fn container(&self, path: &Path) -> Result<&Value> {
        match self.draft.get(path) {
            Some(value @ (Value::Map(_) | Value::List(_))) => Ok(value),
            Some(_) => Err(RippleError::NotAContainer {
                path: path.canonical(),
            }),
            None => Err(RippleError::PathNotFound {
                path: path.canonical(),
            }),
        }
    }

    fn record(&mut self, entry: LogEntry) -> Result<()> {
        for op in entry.operations() {
            self.draft.apply(op)?;
        }
        trace!(mutation = %entry.describe(), "recorded mutation");
        self.log.push(entry);
        Ok(())
    }
}

fn list_index(parent: &Path, segment: &Segment) -> Result<usize> {
    segment.as_index().ok_or_else(|| RippleError::TypeMismatch {
        path: parent.canonical(),
        expected: "map",
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::Snapshot;
    use serde_json::json;

    fn recorder(json: serde_json::Value) -> MutationRecorder {
        MutationRecorder::new(Draft::new(&Snapshot::from_json(json).unwrap()))
    }

    #[test]
    fn test_set_existing_key_is_set_new_key_is_add() {
        let mut rec = recorder(json!({"foo": "bar"}));
        rec.set(&Path::parse("foo"), "bar!".into()).unwrap();
        rec.set(&Path::parse("baz"), 1.into()).unwrap();

        let kinds: Vec<_> = rec.log().operations().map(|op| op.kind).collect();
        assert_eq!(kinds, vec![OpKind::Set, OpKind::Add]);
        assert_eq!(rec.get(&Path::parse("foo")).unwrap().as_str(), Some("bar!"));
    }

    #[test]
    fn test_push_expands_to_add() {
        let mut rec = recorder(json!({"list": ["a"]}));
        rec.edit_sequence(&Path::parse("list"), "push", |items| items.push("b".into()))
            .unwrap();

        match &rec.log().entries()[0] {
            LogEntry::Composite {
                method,
                container,
                ops,
                after,
            } => {
                assert_eq!(method, "push");
                assert_eq!(after, &vec![Value::from("a"), Value::from("b")]);
                assert_eq!(container.canonical(), "list");
                assert_eq!(ops, &vec![Operation::add("list.1", "b")]);
            }
            other => panic!("expected composite entry, got {other:?}"),
        }
    }

    #[test]
    fn test_sort_expands_to_replacements() {
        let mut rec = recorder(json!({"n": [3, 1, 2]}));
        rec.edit_sequence(&Path::parse("n"), "sort", |items| {
            items.sort_by_key(|v| v.as_i64())
        })
        .unwrap();

        let ops: Vec<_> = rec.log().operations().cloned().collect();
        assert_eq!(
            ops,
            vec![
                Operation::replace("n.0", 1),
                Operation::replace("n.1", 2),
                Operation::replace("n.2", 3),
            ]
        );
        assert_eq!(rec.get(&Path::parse("n")).unwrap().to_json(), json!([1, 2, 3]));
    }

    #[test]
    fn test_remove_from_middle_of_sequence() {
        let mut rec = recorder(json!({"l": ["a", "b", "c"]}));
        let removed = rec.remove(&Path::parse("l.0")).unwrap();
        assert_eq!(removed.as_str(), Some("a"));
        assert_eq!(rec.get(&Path::parse("l")).unwrap().to_json(), json!(["b", "c"]));

        let ops: Vec<_> = rec.log().operations().cloned().collect();
        assert_eq!(
            ops,
            vec![
                Operation::replace("l.0", "b"),
                Operation::replace("l.1", "c"),
                Operation::remove("l.2"),
            ]
        );
    }

    #[test]
    fn test_noop_edit_records_nothing() {
        let mut rec = recorder(json!({"n": [1, 2]}));
        rec.edit_sequence(&Path::parse("n"), "sort", |items| {
            items.sort_by_key(|v| v.as_i64())
        })
        .unwrap();
        assert!(!rec.is_dirty());
    }

    #[test]
    fn test_replace_sequence_diffs_against_current_draft() {
        let mut rec = recorder(json!({"l": ["a", "b", "c"]}));
        rec.replace_sequence(&Path::parse("l"), "filter", vec!["a".into(), "c".into()])
            .unwrap();

        let ops: Vec<_> = rec.log().operations().cloned().collect();
        assert_eq!(ops, vec![Operation::replace("l.1", "c"), Operation::remove("l.2")]);
        assert_eq!(rec.get(&Path::parse("l")).unwrap().to_json(), json!(["a", "c"]));
    }

    #[test]
    fn test_numeric_representation_change_is_recorded() {
        let mut rec = recorder(json!({"n": [1]}));
        rec.edit_sequence(&Path::parse("n"), "map", |items| items[0] = Value::Float(1.0))
            .unwrap();

        assert_eq!(
            rec.log().operations().cloned().collect::<Vec<_>>(),
            vec![Operation::replace("n.0", Value::Float(1.0))]
        );
        assert!(matches!(
            rec.get(&Path::parse("n.0")),
            Some(Value::Float(f)) if *f == 1.0
        ));
    }

    #[test]
    fn test_set_past_end_fails_without_recording() {
        let mut rec = recorder(json!({"l": []}));
        let err = rec.set(&Path::parse("l.3"), 1.into()).unwrap_err();
        assert!(matches!(err, RippleError::IndexOutOfBounds { index: 3, len: 0, .. }));
        assert!(!rec.is_dirty());
    }

    #[test]
    fn test_operation_serde_uses_op_field() {
        let op: Operation =
            serde_json::from_value(json!({"op": "move", "path": "a.b"})).unwrap();
        assert_eq!(op.kind, OpKind::Unrecognized);

        let json = serde_json::to_value(Operation::add("list.1", "b")).unwrap();
        assert_eq!(json, json!({"op": "add", "path": "list.1", "value": "b"}));
    }
}
