// Shape checks run before a read-modify-write, so that a mutation against a
// value of the wrong kind fails with a typed error instead of clobbering it.
// Missing nodes are fine (the mutation creates them); a node of the wrong
// kind anywhere along the path is not.
use std::fmt;

use serde_json::{Number, Value};

use crate::{
    codec::Document,
    error::{Error, Result},
    path::{self, Segment},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    Null,
    Bool,
    Number,
    String,
    List,
    Mapping,
}

impl Shape {
    pub fn of(v: &Value) -> Shape {
        match v {
            Value::Null => Shape::Null,
            Value::Bool(_) => Shape::Bool,
            Value::Number(_) => Shape::Number,
            Value::String(_) => Shape::String,
            Value::Array(_) => Shape::List,
            Value::Object(_) => Shape::Mapping,
        }
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Shape::Null => "null",
            Shape::Bool => "bool",
            Shape::Number => "number",
            Shape::String => "string",
            Shape::List => "list",
            Shape::Mapping => "mapping",
        })
    }
}

fn mismatch(key: &str, path: Option<&str>, expected: Shape, found: Option<&Value>) -> Error {
    Error::TypeMismatch {
        key: key.to_owned(),
        path: path.map(str::to_owned),
        expected: expected.to_string(),
        found: found.map_or_else(|| "absent".to_owned(), |v| Shape::of(v).to_string()),
    }
}

/// The document stored under `key`, or `MissingKey` if there is none.
pub fn require_key(key: &str, doc: Option<Document>) -> Result<Document> {
    doc.ok_or_else(|| Error::MissingKey {
        key: key.to_owned(),
    })
}

/// Walk `segments` through `doc`. Every node met on the way must be the
/// container the next segment addresses. Returns the node at the end, or
/// `None` once the walk runs off the existing tree.
pub fn resolve<'a>(key: &str, doc: &'a Value, segments: &[Segment]) -> Result<Option<&'a Value>> {
    let mut node = doc;
    for (depth, segment) in segments.iter().enumerate() {
        let child = match (node, segment) {
            (Value::Object(fields), Segment::Field(name)) => fields.get(name),
            (Value::Array(items), Segment::Index(idx)) => items.get(*idx),
            (other, segment) => {
                let expected = match segment {
                    Segment::Field(_) => Shape::Mapping,
                    Segment::Index(_) => Shape::List,
                };
                let at = (depth > 0).then(|| path::render(&segments[..depth]));
                return Err(mismatch(key, at.as_deref(), expected, Some(other)));
            }
        };
        match child {
            Some(next) => node = next,
            None => return Ok(None),
        }
    }
    Ok(Some(node))
}

/// The list at `path`, or `TypeMismatch` if `target` is anything else.
pub fn expect_list<'a>(
    key: &str,
    path: Option<&str>,
    target: Option<&'a Value>,
) -> Result<&'a Vec<Value>> {
    match target {
        Some(Value::Array(items)) => Ok(items),
        other => Err(mismatch(key, path, Shape::List, other)),
    }
}

pub fn expect_number<'a>(
    key: &str,
    path: Option<&str>,
    target: Option<&'a Value>,
) -> Result<&'a Number> {
    match target {
        Some(Value::Number(n)) => Ok(n),
        other => Err(mismatch(key, path, Shape::Number, other)),
    }
}

#[cfg(test)]
mod test {
    use serde_json::json;

    use super::*;
    use crate::path::parse;

    #[test]
    fn test_shapes() {
        assert_eq!(Shape::of(&json!(null)), Shape::Null);
        assert_eq!(Shape::of(&json!(1.5)), Shape::Number);
        assert_eq!(Shape::of(&json!([])), Shape::List);
        assert_eq!(Shape::of(&json!({})).to_string(), "mapping");
    }

    #[test]
    fn test_expect_shape() {
        let v = json!([1]);
        assert_eq!(expect_list("k", None, Some(&v)).unwrap(), &vec![json!(1)]);
        assert_eq!(
            expect_number("k", None, Some(&json!(3))).unwrap(),
            &Number::from(3)
        );

        let err = expect_number("k", Some("a"), Some(&json!("s"))).unwrap_err();
        assert_eq!(err.to_string(), "expected number at k @ a, found string");

        let err = expect_list("k", Some("a"), None).unwrap_err();
        assert_eq!(err.to_string(), "expected list at k @ a, found absent");
    }

    #[test]
    fn test_resolve() {
        let doc = json!({"a": {"b": [1, 2]}, "s": "text"});
        let at = |p: &str| resolve("k", &doc, &parse(p).unwrap());

        assert_eq!(at("a.b[1]").unwrap(), Some(&json!(2)));
        assert_eq!(at("a.b[7]").unwrap(), None);
        assert_eq!(at("a.missing.deeper").unwrap(), None);
        assert_eq!(at(path::ROOT).unwrap(), Some(&doc));

        let err = at("s.x").unwrap_err();
        assert_eq!(err.to_string(), "expected mapping at k @ s, found string");
        let err = at("a.b.c").unwrap_err();
        assert_eq!(err.to_string(), "expected mapping at k @ a.b, found list");
        let err = at("a[0]").unwrap_err();
        assert_eq!(err.to_string(), "expected list at k @ a, found mapping");

        let err = resolve("k", &json!(5), &parse("x").unwrap()).unwrap_err();
        assert_eq!(err.to_string(), "expected mapping at k, found number");
    }

    #[test]
    fn test_require_key() {
        assert_eq!(require_key("k", Some(json!(1))).unwrap(), json!(1));
        assert!(matches!(
            require_key("k", None),
            Err(Error::MissingKey { key }) if key == "k"
        ));
    }
}
