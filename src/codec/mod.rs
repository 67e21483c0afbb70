// Converts documents to and from their stored form: a set of
// (path, serialized leaf) pairs. Containers are never stored; they are implied
// by the paths of their leaves, which means an empty list or mapping leaves no
// trace at all.
use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::{
    error::{Error, Result},
    path::{self, Segment, ROOT},
};

pub type Document = Value;

/// Leaf rows of one document, keyed by path.
pub type Flat = BTreeMap<String, String>;

/// Longest run of list elements that may leave no rows (empty containers).
/// Reconstruction pads such runs with nulls, so a stored index further past
/// its predecessor than this is treated as corrupt rather than allocated.
pub const MAX_LIST_GAP: usize = 4096;

pub fn flatten(doc: &Document, max_depth: usize) -> Result<Flat> {
    let mut out = Flat::new();
    match doc {
        Value::Array(_) | Value::Object(_) => visit(doc, String::new(), 0, max_depth, &mut out)?,
        scalar => {
            out.insert(ROOT.to_owned(), encode_leaf(scalar)?);
        }
    }
    Ok(out)
}

fn visit(node: &Value, at: String, depth: usize, max_depth: usize, out: &mut Flat) -> Result<()> {
    match node {
        Value::Object(map) => {
            if depth >= max_depth {
                return Err(too_deep(&at, max_depth));
            }
            for (name, child) in map {
                if name.is_empty() {
                    return Err(Error::format(at, "field names must not be empty"));
                }
                let child_path = path::child_field(&at, name);
                if child_path == ROOT {
                    return Err(Error::format(
                        name.as_str(),
                        "field name collides with the root sentinel",
                    ));
                }
                visit(child, child_path, depth + 1, max_depth, out)?;
            }
        }
        Value::Array(items) => {
            if depth >= max_depth {
                return Err(too_deep(&at, max_depth));
            }
            let mut empty_run = 0;
            for (idx, child) in items.iter().enumerate() {
                let before = out.len();
                visit(child, path::child_index(&at, idx), depth + 1, max_depth, out)?;
                if out.len() > before {
                    empty_run = 0;
                    continue;
                }
                empty_run += 1;
                if empty_run > MAX_LIST_GAP {
                    return Err(Error::format(
                        at,
                        format!(
                            "list has more than {} consecutive empty elements",
                            MAX_LIST_GAP
                        ),
                    ));
                }
            }
        }
        leaf => {
            out.insert(at, encode_leaf(leaf)?);
        }
    }
    Ok(())
}

fn too_deep(at: &str, max_depth: usize) -> Error {
    Error::format(
        at,
        format!("document nests deeper than {} levels", max_depth),
    )
}

pub fn encode_leaf(leaf: &Value) -> Result<String> {
    if leaf.is_array() || leaf.is_object() {
        return Err(Error::format(leaf.to_string(), "not a scalar"));
    }
    serde_json::to_string(leaf).map_err(|e| Error::format(leaf.to_string(), e.to_string()))
}

pub fn decode_leaf(key: &str, path: &str, raw: &str) -> Result<Value> {
    let v: Value =
        serde_json::from_str(raw).map_err(|e| Error::corruption(key, path, e.to_string()))?;
    if v.is_array() || v.is_object() {
        return Err(Error::corruption(key, path, "stored leaf is a container"));
    }
    Ok(v)
}

const OCCUPIED: &str = "two rows claim the same location";

// The shape of a document under reconstruction. Lists are sparse until the
// end so that rows can arrive in any order.
#[derive(Debug)]
enum Node {
    Leaf(Value),
    List(BTreeMap<usize, Node>),
    Map(BTreeMap<String, Node>),
}

impl Node {
    fn container_for(segment: &Segment) -> Node {
        match segment {
            Segment::Field(_) => Node::Map(BTreeMap::new()),
            Segment::Index(_) => Node::List(BTreeMap::new()),
        }
    }

    fn insert(
        &mut self,
        segments: &[Segment],
        leaf: Value,
    ) -> std::result::Result<(), &'static str> {
        let (head, rest) = match segments.split_first() {
            Some(x) => x,
            None => return Err(OCCUPIED),
        };
        let child = match (self, head) {
            (Node::Map(fields), Segment::Field(name)) => match rest.first() {
                None => {
                    if fields.contains_key(name) {
                        return Err(OCCUPIED);
                    }
                    fields.insert(name.clone(), Node::Leaf(leaf));
                    return Ok(());
                }
                Some(next) => fields
                    .entry(name.clone())
                    .or_insert_with(|| Node::container_for(next)),
            },
            (Node::List(items), Segment::Index(idx)) => match rest.first() {
                None => {
                    if items.contains_key(idx) {
                        return Err(OCCUPIED);
                    }
                    items.insert(*idx, Node::Leaf(leaf));
                    return Ok(());
                }
                Some(next) => items.entry(*idx).or_insert_with(|| Node::container_for(next)),
            },
            (Node::Leaf(_), _) => return Err("a container is nested under a leaf"),
            (Node::Map(_), Segment::Index(_)) => return Err("a list index addresses a mapping"),
            (Node::List(_), Segment::Field(_)) => return Err("a field name addresses a list"),
        };
        child.insert(rest, leaf)
    }

    fn into_value(self, key: &str, at: &str) -> Result<Value> {
        match self {
            Node::Leaf(v) => Ok(v),
            Node::Map(fields) => {
                let mut out = Map::new();
                for (name, node) in fields {
                    let child = node.into_value(key, &path::child_field(at, &name))?;
                    out.insert(name, child);
                }
                Ok(Value::Object(out))
            }
            Node::List(items) => {
                // Holes are left by elements that were empty containers.
                let mut out = Vec::with_capacity(items.len());
                for (idx, node) in items {
                    if idx - out.len() > MAX_LIST_GAP {
                        return Err(Error::corruption(
                            key,
                            if at.is_empty() { ROOT } else { at },
                            format!(
                                "list index {} is more than {} past the previous element",
                                idx, MAX_LIST_GAP
                            ),
                        ));
                    }
                    out.resize(idx, Value::Null);
                    out.push(node.into_value(key, &path::child_index(at, idx))?);
                }
                Ok(Value::Array(out))
            }
        }
    }
}

const SENTINEL_MIXED: &str = "root sentinel mixed with other rows";

/// Rebuild the document owned by `key` from its rows. Returns `None` when
/// there are no rows.
pub fn unflatten<'a, I>(key: &str, rows: I, max_depth: usize) -> Result<Option<Document>>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut root: Option<Node> = None;
    for (at, raw) in rows {
        let segments = path::parse(at)?;
        if segments.len() > max_depth {
            return Err(too_deep(at, max_depth));
        }
        let leaf = decode_leaf(key, at, raw)?;
        match segments.first() {
            None => {
                if root.is_some() {
                    return Err(Error::corruption(key, at, SENTINEL_MIXED));
                }
                root = Some(Node::Leaf(leaf));
            }
            Some(first) => match &mut root {
                Some(Node::Leaf(_)) => return Err(Error::corruption(key, at, SENTINEL_MIXED)),
                slot => slot
                    .get_or_insert_with(|| Node::container_for(first))
                    .insert(&segments, leaf)
                    .map_err(|reason| Error::corruption(key, at, reason))?,
            },
        }
    }
    root.map(|node| node.into_value(key, "")).transpose()
}

#[cfg(test)]
mod test {
    use rand::{rngs::StdRng, Rng, SeedableRng};
    use serde_json::json;

    use super::*;

    fn run_unflatten(input: &str) -> Result<Option<Document>> {
        let rows: Vec<(&str, &str)> = input
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| l.split_once('=').expect("rows are path=value"))
            .collect();
        unflatten("k", rows, 64)
    }

    #[test]
    fn test_codec() {
        datadriven::walk("src/codec/testdata/", |f| {
            f.run(|test_case| match test_case.directive.as_str() {
                "flatten" => {
                    let max_depth = test_case
                        .args
                        .get("depth")
                        .map(|v| v[0].parse().unwrap())
                        .unwrap_or(64);
                    let doc: Document = serde_json::from_str(test_case.input.trim()).unwrap();
                    match flatten(&doc, max_depth) {
                        Ok(flat) => flat
                            .iter()
                            .map(|(p, v)| format!("{}={}\n", p, v))
                            .collect::<String>(),
                        Err(e) => format!("error: {}\n", e),
                    }
                }
                "unflatten" => match run_unflatten(&test_case.input) {
                    Ok(Some(doc)) => format!("{}\n", doc),
                    Ok(None) => "absent\n".into(),
                    Err(e) => format!("error: {}\n", e),
                },
                _ => {
                    panic!("unhandled");
                }
            })
        })
    }

    #[test]
    fn test_scalar_leaves_roundtrip() {
        for leaf in [
            json!(null),
            json!(true),
            json!(false),
            json!(0),
            json!(-17),
            json!(u64::MAX),
            json!(1.5),
            json!(""),
            json!("quote \" and newline \n"),
        ] {
            let flat = flatten(&leaf, 64).unwrap();
            assert_eq!(flat.keys().collect::<Vec<_>>(), vec![ROOT]);
            let back = unflatten("k", flat.iter().map(|(p, v)| (p.as_str(), v.as_str())), 64)
                .unwrap();
            assert_eq!(back, Some(leaf));
        }
    }

    fn random_name(rng: &mut StdRng) -> String {
        const ALPHABET: &[char] = &['a', 'b', 'z', '.', '[', ']', '\\', ' ', 'é'];
        (0..rng.gen_range(1..4))
            .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())])
            .collect()
    }

    // Containers always get at least one child: empty ones do not survive
    // flattening.
    fn random_doc(rng: &mut StdRng, depth: usize) -> Document {
        let container = depth < 4 && rng.gen_bool(0.6);
        if !container {
            return match rng.gen_range(0..5) {
                0 => Value::Null,
                1 => json!(rng.gen_bool(0.5)),
                2 => json!(rng.gen_range(-1000_i64..1000)),
                // Quarters print and parse back exactly.
                3 => json!(f64::from(rng.gen_range(-40_i32..40)) / 4.0),
                _ => json!(random_name(rng)),
            };
        }
        let len = rng.gen_range(1..4);
        if rng.gen_bool(0.5) {
            Value::Array((0..len).map(|_| random_doc(rng, depth + 1)).collect())
        } else {
            let mut map = Map::new();
            for _ in 0..len {
                map.insert(random_name(rng), random_doc(rng, depth + 1));
            }
            Value::Object(map)
        }
    }

    #[test]
    fn test_random_roundtrip() {
        let mut rng = StdRng::seed_from_u64(0x1eaf);
        for _ in 0..500 {
            let doc = random_doc(&mut rng, 0);
            let flat = flatten(&doc, 64).unwrap();
            let back = unflatten("k", flat.iter().map(|(p, v)| (p.as_str(), v.as_str())), 64)
                .unwrap();
            assert_eq!(back.as_ref(), Some(&doc), "rows: {:#?}", flat);
        }
    }

    #[test]
    fn test_depth_limit() {
        let doc = json!({"a": {"b": {"c": 1}}});
        assert!(flatten(&doc, 3).is_ok());
        assert!(matches!(flatten(&doc, 2), Err(Error::Format { .. })));

        let err = unflatten("k", [("a.b.c", "1")], 2).unwrap_err();
        assert!(matches!(err, Error::Format { .. }));
    }

    #[test]
    fn test_list_gap_limit() {
        let mut items = vec![json!([]); MAX_LIST_GAP];
        items.push(json!(1));
        let flat = flatten(&json!({ "l": items }), 64).unwrap();
        assert_eq!(flat.len(), 1);
        let back = unflatten("k", flat.iter().map(|(p, v)| (p.as_str(), v.as_str())), 64)
            .unwrap()
            .unwrap();
        assert_eq!(back["l"].as_array().map(Vec::len), Some(MAX_LIST_GAP + 1));

        let mut items = vec![json!({}); MAX_LIST_GAP + 1];
        items.push(json!(1));
        assert!(matches!(
            flatten(&json!({ "l": items }), 64),
            Err(Error::Format { input, .. }) if input == "l"
        ));
    }

    #[test]
    fn test_leaf_errors_carry_location() {
        match unflatten("user", [("a", "{not json")], 64) {
            Err(Error::Corruption { key, path, .. }) => {
                assert_eq!(key, "user");
                assert_eq!(path, "a");
            }
            other => panic!("expected corruption, got {:?}", other),
        }
        assert!(matches!(
            decode_leaf("k", "a", "[1]"),
            Err(Error::Corruption { .. })
        ));
        assert!(matches!(
            encode_leaf(&json!({"a": 1})),
            Err(Error::Format { .. })
        ));
    }
}
