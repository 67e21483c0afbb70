// Paths locate one leaf inside a document.
//
//   {"a": {"b": [10, {"c": true}]}}
//
// flattens to the two leaf paths `a.b[0]` and `a.b[1].c`. Mapping levels are
// dot-separated field names, list levels are bracketed indexes, and a
// document that is itself a scalar lives at the sentinel path `::ROOT::`.
// Inside a field name the characters `.`, `[`, `]` and `\` are escaped with
// a backslash.
use std::{fmt::Write, iter::Peekable, str::Chars};

use serde_json::Value;

use crate::error::{Error, Result};

/// Path of a document that is a bare scalar.
pub const ROOT: &str = "::ROOT::";

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum Segment {
    Field(String),
    Index(usize),
}

pub fn parse(path: &str) -> Result<Vec<Segment>> {
    if path == ROOT {
        return Ok(Vec::new());
    }
    if path.is_empty() {
        return Err(Error::format(path, "path must not be empty"));
    }

    let mut segments = Vec::new();
    let mut chars = path.chars().peekable();
    while let Some(&c) = chars.peek() {
        match c {
            '[' => {
                chars.next();
                let mut digits = String::new();
                loop {
                    match chars.next() {
                        Some(']') => break,
                        Some(d) if d.is_ascii_digit() => digits.push(d),
                        Some(other) => {
                            return Err(Error::format(
                                path,
                                format!("unexpected {:?} in list index", other),
                            ))
                        }
                        None => return Err(Error::format(path, "unterminated list index")),
                    }
                }
                segments.push(Segment::Index(parse_index(path, &digits)?));
            }
            '.' => {
                if segments.is_empty() {
                    return Err(Error::format(path, "path must not start with '.'"));
                }
                chars.next();
                segments.push(Segment::Field(read_field(path, &mut chars)?));
            }
            _ if segments.is_empty() => {
                segments.push(Segment::Field(read_field(path, &mut chars)?));
            }
            other => {
                return Err(Error::format(
                    path,
                    format!("expected '.' or '[' before {:?}", other),
                ))
            }
        }
    }

    Ok(segments)
}

fn parse_index(path: &str, digits: &str) -> Result<usize> {
    if digits.is_empty() {
        return Err(Error::format(path, "empty list index"));
    }
    if digits.len() > 1 && digits.starts_with('0') {
        return Err(Error::format(path, "list index has leading zeros"));
    }
    digits
        .parse()
        .map_err(|_| Error::format(path, "list index out of range"))
}

// Reads up to (not including) the next unescaped '.' or '['.
fn read_field(path: &str, chars: &mut Peekable<Chars>) -> Result<String> {
    let mut name = String::new();
    while let Some(&c) = chars.peek() {
        match c {
            '.' | '[' => break,
            ']' => return Err(Error::format(path, "unescaped ']' in field name")),
            '\\' => {
                chars.next();
                match chars.next() {
                    Some(e @ ('.' | '[' | ']' | '\\')) => name.push(e),
                    Some(other) => {
                        return Err(Error::format(
                            path,
                            format!("invalid escape \\{}", other),
                        ))
                    }
                    None => return Err(Error::format(path, "dangling escape")),
                }
            }
            _ => {
                name.push(c);
                chars.next();
            }
        }
    }
    if name.is_empty() {
        return Err(Error::format(path, "empty field name"));
    }
    Ok(name)
}

pub fn render(segments: &[Segment]) -> String {
    if segments.is_empty() {
        return ROOT.to_owned();
    }
    let mut out = String::new();
    for segment in segments {
        match segment {
            Segment::Field(name) => push_field(&mut out, name),
            Segment::Index(idx) => push_index(&mut out, *idx),
        }
    }
    out
}

/// Parse and re-render, so that caller-supplied paths compare equal to the
/// paths the codec stores.
pub fn canonicalize(path: &str) -> Result<String> {
    Ok(render(&parse(path)?))
}

pub fn child_field(parent: &str, name: &str) -> String {
    let mut out = parent.to_owned();
    push_field(&mut out, name);
    out
}

pub fn child_index(parent: &str, idx: usize) -> String {
    let mut out = parent.to_owned();
    push_index(&mut out, idx);
    out
}

fn push_field(out: &mut String, name: &str) {
    if !out.is_empty() {
        out.push('.');
    }
    for c in name.chars() {
        if matches!(c, '.' | '[' | ']' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
}

fn push_index(out: &mut String, idx: usize) {
    // Writing into a String cannot fail.
    let _ = write!(out, "[{}]", idx);
}

/// Navigate a document, returning whatever node (leaf or container) sits at
/// `segments`.
pub fn lookup<'a>(doc: &'a Value, segments: &[Segment]) -> Option<&'a Value> {
    segments.iter().try_fold(doc, |node, segment| match segment {
        Segment::Field(name) => node.get(name.as_str()),
        Segment::Index(idx) => node.get(*idx),
    })
}

pub fn lookup_mut<'a>(doc: &'a mut Value, segments: &[Segment]) -> Option<&'a mut Value> {
    segments.iter().try_fold(doc, |node, segment| match segment {
        Segment::Field(name) => node.get_mut(name.as_str()),
        Segment::Index(idx) => node.get_mut(*idx),
    })
}

#[cfg(test)]
mod test {
    use serde_json::json;

    use super::*;

    fn field(s: &str) -> Segment {
        Segment::Field(s.to_owned())
    }

    #[test]
    fn test_parse() {
        assert_eq!(parse("a").unwrap(), vec![field("a")]);
        assert_eq!(
            parse("a.b[2].c").unwrap(),
            vec![field("a"), field("b"), Segment::Index(2), field("c")]
        );
        assert_eq!(
            parse("[0][10]").unwrap(),
            vec![Segment::Index(0), Segment::Index(10)]
        );
        assert_eq!(parse(ROOT).unwrap(), vec![]);
        assert_eq!(parse(r"a\.b").unwrap(), vec![field("a.b")]);
        assert_eq!(parse(r"x.\[y\]\\").unwrap(), vec![field("x"), field(r"[y]\")]);
        assert_eq!(parse("héllo wörld").unwrap(), vec![field("héllo wörld")]);
    }

    #[test]
    fn test_parse_errors() {
        for bad in [
            "", ".a", "a.", "a..b", "a[", "a[]", "a[x]", "a[01]", "a[0]b", "a]", r"a\", r"a\q",
            "a[-1]",
        ] {
            match parse(bad) {
                Err(Error::Format { input, .. }) => assert_eq!(input, bad),
                other => panic!("expected format error for {:?}, got {:?}", bad, other),
            }
        }
    }

    #[test]
    fn test_render_roundtrip() {
        for path in ["a", "a.b[2].c", "[0][10]", r"a\.b", r"x.\[y\]\\", ROOT] {
            assert_eq!(canonicalize(path).unwrap(), path);
        }
        assert_eq!(child_field("", "a.b"), r"a\.b");
        assert_eq!(child_field("x", "y"), "x.y");
        assert_eq!(child_index("", 3), "[3]");
        assert_eq!(child_index("x", 0), "x[0]");
    }

    #[test]
    fn test_lookup() {
        let doc = json!({"a": {"b": [10, {"c": true}]}});
        let at = |p: &str| lookup(&doc, &parse(p).unwrap()).cloned();
        assert_eq!(at("a.b[1].c"), Some(json!(true)));
        assert_eq!(at("a.b"), Some(json!([10, {"c": true}])));
        assert_eq!(at(ROOT), Some(doc.clone()));
        assert_eq!(at("a.b[2]"), None);
        assert_eq!(at("a[0]"), None);
        assert_eq!(at("a.b.c"), None);

        let mut doc = doc.clone();
        *lookup_mut(&mut doc, &parse("a.b[0]").unwrap()).unwrap() = json!(11);
        assert_eq!(doc, json!({"a": {"b": [11, {"c": true}]}}));
    }
}
