use crate::error::{Error, Result};

/// A document key as callers hand it in. Numeric keys are stored under their
/// decimal rendering, so `Key::Number(7)` and `Key::Text("7")` name the same
/// document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Key {
    Text(String),
    Number(i64),
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key::Text(s.to_owned())
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Key::Text(s)
    }
}

impl From<&String> for Key {
    fn from(s: &String) -> Self {
        Key::Text(s.clone())
    }
}

impl From<i64> for Key {
    fn from(n: i64) -> Self {
        Key::Number(n)
    }
}

impl From<i32> for Key {
    fn from(n: i32) -> Self {
        Key::Number(n.into())
    }
}

impl From<u32> for Key {
    fn from(n: u32) -> Self {
        Key::Number(n.into())
    }
}

/// Canonicalize a key into the string stored in the `key` column.
pub fn normalize(key: impl Into<Key>) -> Result<String> {
    match key.into() {
        Key::Number(n) => Ok(n.to_string()),
        Key::Text(s) => {
            if s.is_empty() {
                return Err(Error::format(s, "key must not be empty"));
            }
            if s.contains('\0') {
                return Err(Error::format(s, "key must not contain null bytes"));
            }
            Ok(s)
        }
    }
}

#[test]
fn test_normalize() {
    assert_eq!(normalize("user:1").unwrap(), "user:1");
    assert_eq!(normalize(42).unwrap(), "42");
    assert_eq!(normalize(-3_i64).unwrap(), "-3");
    assert_eq!(normalize(String::from("a b")).unwrap(), "a b");

    assert!(matches!(normalize(""), Err(Error::Format { .. })));
    assert!(matches!(normalize("a\0b"), Err(Error::Format { .. })));
}
