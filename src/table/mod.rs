// The backing storage a store is built on: a flat table of
// (key, path, value) rows plus a named counter. Providers report failures as
// `anyhow` errors; the store lifts them into `Error::Provider`.
pub(crate) mod mock_table;
pub(crate) mod sqlite_table;

pub use mock_table::{Event, MockState, MockTable};
pub use sqlite_table::SqliteTable;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Row {
    pub key: String,
    pub path: String,
    pub value: String,
}

/// A unit of writes against a table. Nothing written through a transaction
/// is visible until `commit`; dropping it uncommitted discards everything.
pub trait TableTxn {
    fn delete_row(&mut self, key: &str, path: &str) -> anyhow::Result<()>;

    /// Write the row for `(key, path)`, replacing it if it already exists.
    fn put_row(&mut self, key: &str, path: &str, value: &str) -> anyhow::Result<()>;

    fn commit(self) -> anyhow::Result<()>;
}

pub trait Table {
    type Txn<'a>: TableTxn
    where
        Self: 'a;

    /// The store name this table was opened under.
    fn name(&self) -> &str;

    fn begin(&mut self) -> anyhow::Result<Self::Txn<'_>>;

    /// All rows for `key`, ordered by path.
    fn rows_for_key(&mut self, key: &str) -> anyhow::Result<Vec<Row>>;

    /// The value stored at exactly `(key, path)`.
    fn row(&mut self, key: &str, path: &str) -> anyhow::Result<Option<String>>;

    /// Every row, ordered by key then path.
    fn rows(&mut self) -> anyhow::Result<Vec<Row>>;

    /// Distinct keys, ordered.
    fn keys(&mut self) -> anyhow::Result<Vec<String>>;

    /// Distinct keys owning a row at `path` whose value is exactly `value`.
    fn keys_with_leaf(&mut self, path: &str, value: &str) -> anyhow::Result<Vec<String>>;

    fn count_keys(&mut self) -> anyhow::Result<usize>;

    /// Remove every row for `key`, returning how many went.
    fn delete_key(&mut self, key: &str) -> anyhow::Result<usize>;

    /// Remove every row, returning how many went.
    fn clear(&mut self) -> anyhow::Result<usize>;

    fn close(self) -> anyhow::Result<()>
    where
        Self: Sized,
    {
        Ok(())
    }
}

/// Named monotonic counters. A counter that was never incremented reads as 0.
pub trait Counter {
    fn counter(&mut self, name: &str) -> anyhow::Result<i64>;

    /// Increment and return the new value, as one step.
    fn increment(&mut self, name: &str) -> anyhow::Result<i64>;
}
