use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("malformed input {input:?}: {reason}")]
    Format { input: String, reason: String },

    #[error("expected {expected} at {key}{}, found {found}", display_path(.path))]
    TypeMismatch {
        key: String,
        path: Option<String>,
        expected: String,
        found: String,
    },

    #[error("no document stored under key {key:?}")]
    MissingKey { key: String },

    #[error("corrupt row {key:?} @ {path:?}: {reason}")]
    Corruption {
        key: String,
        path: String,
        reason: String,
    },

    #[error("table provider failed: {0:#}")]
    Provider(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Fieldless mirror of [`Error`], for callers that only need to branch on the
/// category of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Format,
    TypeMismatch,
    MissingKey,
    Corruption,
    Provider,
}

impl Error {
    pub(crate) fn format(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Format {
            input: input.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn corruption(
        key: impl Into<String>,
        path: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Error::Corruption {
            key: key.into(),
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Format { .. } => ErrorKind::Format,
            Error::TypeMismatch { .. } => ErrorKind::TypeMismatch,
            Error::MissingKey { .. } => ErrorKind::MissingKey,
            Error::Corruption { .. } => ErrorKind::Corruption,
            Error::Provider(_) => ErrorKind::Provider,
        }
    }
}

fn display_path(path: &Option<String>) -> String {
    match path {
        Some(p) => format!(" @ {}", p),
        None => String::new(),
    }
}

#[test]
fn test_error_messages() {
    let e = Error::TypeMismatch {
        key: "k".into(),
        path: Some("a.b".into()),
        expected: "list".into(),
        found: "number".into(),
    };
    assert_eq!(e.to_string(), "expected list at k @ a.b, found number");
    assert_eq!(e.kind(), ErrorKind::TypeMismatch);

    let e = Error::TypeMismatch {
        key: "k".into(),
        path: None,
        expected: "number".into(),
        found: "string".into(),
    };
    assert_eq!(e.to_string(), "expected number at k, found string");

    let e: Error = anyhow::anyhow!("disk on fire").into();
    assert_eq!(e.kind(), ErrorKind::Provider);
    assert_eq!(e.to_string(), "table provider failed: disk on fire");
}
