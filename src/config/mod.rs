use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Settings for a [`Store`](crate::Store) handle, independent of the table
/// provider behind it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoreConfig {
    /// Deepest container nesting a document may have. Flattening or
    /// reconstructing anything deeper fails with a format error.
    /// Default: 64
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,

    /// Seed for the sampling RNG behind `random` and `random_key`. Seeded
    /// from OS entropy when absent.
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_max_depth() -> usize {
    64
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
            seed: None,
        }
    }
}

impl StoreConfig {
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

/// Configuration for the SQLite table provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqliteConfig {
    /// Path to the SQLite database file
    pub path: PathBuf,

    /// Enable WAL mode
    /// Default: true
    #[serde(default = "default_wal_mode")]
    pub wal_mode: bool,

    /// SQLite synchronous mode
    #[serde(default)]
    pub synchronous: SynchronousMode,

    /// SQLite cache size (in pages, negative = KB)
    /// Default: -64000 (64MB)
    #[serde(default = "default_cache_size")]
    pub cache_size: i32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum SynchronousMode {
    /// Full fsync (safest, slowest)
    Full,
    /// fsync at critical moments (good balance)
    #[default]
    Normal,
    /// No fsync (fastest, least safe)
    Off,
}

impl SynchronousMode {
    pub(crate) fn pragma_value(self) -> &'static str {
        match self {
            SynchronousMode::Full => "FULL",
            SynchronousMode::Normal => "NORMAL",
            SynchronousMode::Off => "OFF",
        }
    }
}

fn default_wal_mode() -> bool {
    true
}

fn default_cache_size() -> i32 {
    -64000
}

impl SqliteConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            wal_mode: default_wal_mode(),
            synchronous: SynchronousMode::default(),
            cache_size: default_cache_size(),
        }
    }

    pub fn with_synchronous(mut self, synchronous: SynchronousMode) -> Self {
        self.synchronous = synchronous;
        self
    }

    pub fn with_wal_mode(mut self, wal_mode: bool) -> Self {
        self.wal_mode = wal_mode;
        self
    }

    pub fn with_cache_size(mut self, cache_size: i32) -> Self {
        self.cache_size = cache_size;
        self
    }
}

#[test]
fn test_config_defaults_from_json() {
    let store: StoreConfig = serde_json::from_str("{}").unwrap();
    assert_eq!(store, StoreConfig::default());
    assert_eq!(store.max_depth, 64);

    let store: StoreConfig = serde_json::from_str(r#"{"max_depth": 3, "seed": 7}"#).unwrap();
    assert_eq!(store, StoreConfig::default().with_max_depth(3).with_seed(7));

    let sqlite: SqliteConfig =
        serde_json::from_str(r#"{"path": "/tmp/x.db", "synchronous": "Full"}"#).unwrap();
    assert!(sqlite.wal_mode);
    assert_eq!(sqlite.cache_size, -64000);
    assert_eq!(sqlite.synchronous.pragma_value(), "FULL");
}
