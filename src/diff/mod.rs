// Plans the row changes that take a key from one document to another.
//
// A changed leaf is always deleted and re-inserted rather than updated in
// place: a change of shape (a scalar becoming a container or the reverse)
// changes the set of leaf paths, and clearing then re-adding handles both
// cases the same way. Deletes for a path are always planned before the insert
// for that same path.
use serde_json::{Map, Value};
use tracing::debug;

use crate::{
    codec::{self, Document, Flat, MAX_LIST_GAP},
    error::{Error, Result},
    path::{self, Segment},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    Delete {
        key: String,
        path: String,
    },
    Insert {
        key: String,
        path: String,
        value: String,
    },
}

impl Op {
    pub fn key(&self) -> &str {
        match self {
            Op::Delete { key, .. } | Op::Insert { key, .. } => key,
        }
    }

    pub fn path(&self) -> &str {
        match self {
            Op::Delete { path, .. } | Op::Insert { path, .. } => path,
        }
    }
}

pub fn plan(
    key: &str,
    old: Option<&Document>,
    new: &Document,
    max_depth: usize,
) -> Result<Vec<Op>> {
    let old_paths = match old {
        Some(doc) => codec::flatten(doc, max_depth)?,
        None => Flat::new(),
    };
    let new_paths = codec::flatten(new, max_depth)?;
    let ops = plan_flat(key, old_paths, new_paths);
    debug!(key, ops = ops.len(), "planned diff");
    Ok(ops)
}

fn plan_flat(key: &str, old_paths: Flat, mut new_paths: Flat) -> Vec<Op> {
    let mut ops = Vec::new();
    for (path, old_value) in old_paths {
        match new_paths.remove(&path) {
            Some(value) if value == old_value => {}
            Some(value) => {
                ops.push(Op::Delete {
                    key: key.to_owned(),
                    path: path.clone(),
                });
                ops.push(Op::Insert {
                    key: key.to_owned(),
                    path,
                    value,
                });
            }
            None => ops.push(Op::Delete {
                key: key.to_owned(),
                path,
            }),
        }
    }
    for (path, value) in new_paths {
        ops.push(Op::Insert {
            key: key.to_owned(),
            path,
            value,
        });
    }
    ops
}

/// Copy `doc` with `value` written at `segments`. Missing containers along
/// the way are created (mappings for fields, null-padded lists for indexes)
/// and anything of the wrong shape in the way is replaced. An index more than
/// `MAX_LIST_GAP` past the end of its list is a format error.
pub fn set_at(doc: &Document, segments: &[Segment], value: Document) -> Result<Document> {
    place(doc.clone(), segments, 0, value)
}

fn place(node: Value, segments: &[Segment], depth: usize, value: Document) -> Result<Value> {
    let segment = match segments.get(depth) {
        Some(segment) => segment,
        None => return Ok(value),
    };
    match segment {
        Segment::Field(name) => {
            let mut fields = match node {
                Value::Object(fields) => fields,
                _ => Map::new(),
            };
            let child = fields.remove(name).unwrap_or(Value::Null);
            fields.insert(name.clone(), place(child, segments, depth + 1, value)?);
            Ok(Value::Object(fields))
        }
        Segment::Index(idx) => {
            let idx = *idx;
            let mut items = match node {
                Value::Array(items) => items,
                _ => Vec::new(),
            };
            if idx >= items.len() {
                if idx - items.len() > MAX_LIST_GAP {
                    return Err(Error::format(
                        path::render(&segments[..=depth]),
                        format!(
                            "index {} is more than {} past the end of the list",
                            idx, MAX_LIST_GAP
                        ),
                    ));
                }
                items.resize(idx + 1, Value::Null);
            }
            let child = std::mem::take(&mut items[idx]);
            items[idx] = place(child, segments, depth + 1, value)?;
            Ok(Value::Array(items))
        }
    }
}

/// Copy `doc` with the node at `segments` removed. Removing a list element
/// shifts the ones after it down. Returns `None` if nothing lives there.
pub fn unset_at(doc: &Document, segments: &[Segment]) -> Option<Document> {
    let (last, parents) = segments.split_last()?;
    let mut out = doc.clone();
    let parent = path::lookup_mut(&mut out, parents)?;
    let removed = match (parent, last) {
        (Value::Object(fields), Segment::Field(name)) => fields.remove(name).is_some(),
        (Value::Array(items), Segment::Index(idx)) if *idx < items.len() => {
            items.remove(*idx);
            true
        }
        _ => false,
    };
    if removed {
        Some(out)
    } else {
        None
    }
}
