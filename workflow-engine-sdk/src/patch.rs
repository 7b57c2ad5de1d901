//! Structural patches over JSON state snapshots
//!
//! A state mutation is recorded as a pair of patch lists computed by diffing
//! the pre- and post-mutation snapshots:
//!
//! - applying the forward list to the pre-state yields the post-state
//! - applying the inverse list to the post-state yields the pre-state
//!
//! Mutators never build patches by hand; [`diff`] derives both lists.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// One step into a JSON document
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSegment::Key(k) => write!(f, "/{}", k),
            PathSegment::Index(i) => write!(f, "/{}", i),
        }
    }
}

/// Location inside a JSON document; empty means the root
pub type PatchPath = Vec<PathSegment>;

/// A single patch operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum PatchOp {
    /// Insert a key into an object, or an element into an array at `path`'s
    /// final index (shifting later elements right).
    Add { path: PatchPath, value: Value },
    /// Remove a key from an object, or an element from an array.
    Remove { path: PatchPath },
    /// Overwrite an existing value.
    Replace { path: PatchPath, value: Value },
}

impl PatchOp {
    pub fn path(&self) -> &[PathSegment] {
        match self {
            PatchOp::Add { path, .. } | PatchOp::Remove { path } | PatchOp::Replace { path, .. } => {
                path
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PatchError {
    #[error("path {path} does not exist")]
    MissingPath { path: String },
    #[error("cannot address {segment} inside a {found}")]
    TypeMismatch { segment: String, found: &'static str },
    #[error("index {index} out of bounds (len {len})")]
    OutOfBounds { index: usize, len: usize },
    #[error("cannot remove the document root")]
    RemoveRoot,
}

fn render(path: &[PathSegment]) -> String {
    if path.is_empty() {
        return "/".to_string();
    }
    path.iter().map(|s| s.to_string()).collect()
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Compute `(forward, inverse)` patches that move `before` to `after` and back.
pub fn diff(before: &Value, after: &Value) -> (Vec<PatchOp>, Vec<PatchOp>) {
    let mut forward = Vec::new();
    let mut inverse = Vec::new();
    diff_at(&mut Vec::new(), before, after, &mut forward, &mut inverse);
    (forward, inverse)
}

fn diff_at(
    path: &mut PatchPath,
    before: &Value,
    after: &Value,
    forward: &mut Vec<PatchOp>,
    inverse: &mut Vec<PatchOp>,
) {
    if before == after {
        return;
    }

    match (before, after) {
        (Value::Object(old), Value::Object(new)) => {
            for (key, old_value) in old {
                path.push(PathSegment::Key(key.clone()));
                match new.get(key) {
                    Some(new_value) => diff_at(path, old_value, new_value, forward, inverse),
                    None => {
                        forward.push(PatchOp::Remove { path: path.clone() });
                        inverse.push(PatchOp::Add {
                            path: path.clone(),
                            value: old_value.clone(),
                        });
                    }
                }
                path.pop();
            }
            for (key, new_value) in new {
                if old.contains_key(key) {
                    continue;
                }
                path.push(PathSegment::Key(key.clone()));
                forward.push(PatchOp::Add {
                    path: path.clone(),
                    value: new_value.clone(),
                });
                inverse.push(PatchOp::Remove { path: path.clone() });
                path.pop();
            }
        }
        (Value::Array(old), Value::Array(new)) => {
            let common = old.len().min(new.len());
            for i in 0..common {
                path.push(PathSegment::Index(i));
                diff_at(path, &old[i], &new[i], forward, inverse);
                path.pop();
            }
            // Growth appends ascending and is undone descending; shrinking is
            // the mirror image, so each list is valid when applied in order.
            if new.len() > old.len() {
                for (i, value) in new.iter().enumerate().skip(common) {
                    path.push(PathSegment::Index(i));
                    forward.push(PatchOp::Add {
                        path: path.clone(),
                        value: value.clone(),
                    });
                    path.pop();
                }
                for i in (common..new.len()).rev() {
                    path.push(PathSegment::Index(i));
                    inverse.push(PatchOp::Remove { path: path.clone() });
                    path.pop();
                }
            } else if old.len() > new.len() {
                for i in (common..old.len()).rev() {
                    path.push(PathSegment::Index(i));
                    forward.push(PatchOp::Remove { path: path.clone() });
                    path.pop();
                }
                for (i, value) in old.iter().enumerate().skip(common) {
                    path.push(PathSegment::Index(i));
                    inverse.push(PatchOp::Add {
                        path: path.clone(),
                        value: value.clone(),
                    });
                    path.pop();
                }
            }
        }
        _ => {
            forward.push(PatchOp::Replace {
                path: path.clone(),
                value: after.clone(),
            });
            inverse.push(PatchOp::Replace {
                path: path.clone(),
                value: before.clone(),
            });
        }
    }
}

/// Apply a patch list to a document, returning the patched copy.
pub fn apply_patches(doc: &Value, ops: &[PatchOp]) -> Result<Value, PatchError> {
    let mut result = doc.clone();
    for op in ops {
        apply_op(&mut result, op)?;
    }
    Ok(result)
}

/// Apply one operation in place.
pub fn apply_op(doc: &mut Value, op: &PatchOp) -> Result<(), PatchError> {
    let path = op.path();
    let Some((last, parents)) = path.split_last() else {
        return match op {
            PatchOp::Add { value, .. } | PatchOp::Replace { value, .. } => {
                *doc = value.clone();
                Ok(())
            }
            PatchOp::Remove { .. } => Err(PatchError::RemoveRoot),
        };
    };

    let parent = resolve_mut(doc, parents)?;
    match (parent, last) {
        (Value::Object(map), PathSegment::Key(key)) => apply_to_object(map, key, op, path),
        (Value::Array(items), PathSegment::Index(index)) => apply_to_array(items, *index, op),
        (other, segment) => Err(PatchError::TypeMismatch {
            segment: segment.to_string(),
            found: type_name(other),
        }),
    }
}

fn resolve_mut<'a>(doc: &'a mut Value, path: &[PathSegment]) -> Result<&'a mut Value, PatchError> {
    let mut current = doc;
    for (depth, segment) in path.iter().enumerate() {
        current = match (current, segment) {
            (Value::Object(map), PathSegment::Key(key)) => {
                map.get_mut(key).ok_or_else(|| PatchError::MissingPath {
                    path: render(&path[..=depth]),
                })?
            }
            (Value::Array(items), PathSegment::Index(index)) => {
                let len = items.len();
                items
                    .get_mut(*index)
                    .ok_or(PatchError::OutOfBounds { index: *index, len })?
            }
            (other, segment) => {
                return Err(PatchError::TypeMismatch {
                    segment: segment.to_string(),
                    found: type_name(other),
                })
            }
        };
    }
    Ok(current)
}

fn apply_to_object(
    map: &mut Map<String, Value>,
    key: &str,
    op: &PatchOp,
    path: &[PathSegment],
) -> Result<(), PatchError> {
    match op {
        PatchOp::Add { value, .. } => {
            map.insert(key.to_string(), value.clone());
        }
        PatchOp::Replace { value, .. } => {
            let slot = map.get_mut(key).ok_or_else(|| PatchError::MissingPath {
                path: render(path),
            })?;
            *slot = value.clone();
        }
        PatchOp::Remove { .. } => {
            map.remove(key).ok_or_else(|| PatchError::MissingPath {
                path: render(path),
            })?;
        }
    }
    Ok(())
}

fn apply_to_array(items: &mut Vec<Value>, index: usize, op: &PatchOp) -> Result<(), PatchError> {
    let len = items.len();
    match op {
        PatchOp::Add { value, .. } => {
            if index > len {
                return Err(PatchError::OutOfBounds { index, len });
            }
            items.insert(index, value.clone());
        }
        PatchOp::Replace { value, .. } => {
            let slot = items
                .get_mut(index)
                .ok_or(PatchError::OutOfBounds { index, len })?;
            *slot = value.clone();
        }
        PatchOp::Remove { .. } => {
            if index >= len {
                return Err(PatchError::OutOfBounds { index, len });
            }
            items.remove(index);
        }
    }
    Ok(())
}
