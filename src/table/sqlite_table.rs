use rusqlite::{
    params, Connection, OpenFlags, OptionalExtension, Transaction, TransactionBehavior,
};
use tracing::info;

use crate::{
    config::SqliteConfig,
    error::{Error, Result},
};

use super::{Counter, Row, Table, TableTxn};

const COUNTER_TABLE: &str = "leafdb_counters";

/// SQLite-backed row table. Each store name gets its own table; the
/// counters for every store in a database file share one table.
pub struct SqliteTable {
    conn: Connection,
    name: String,
    sql: Statements,
}

// SQL for one row table, with the sanitized table name baked in. Executed
// through the connection's prepared statement cache.
struct Statements {
    rows_for_key: String,
    row: String,
    rows: String,
    keys: String,
    keys_with_leaf: String,
    count_keys: String,
    delete_row: String,
    update_row: String,
    insert_row: String,
    delete_key: String,
    clear: String,
}

impl Statements {
    fn new(table: &str) -> Self {
        Statements {
            rows_for_key: format!(
                "SELECT key, path, value FROM \"{table}\" WHERE key = ?1 ORDER BY path"
            ),
            row: format!("SELECT value FROM \"{table}\" WHERE key = ?1 AND path = ?2 LIMIT 1"),
            rows: format!("SELECT key, path, value FROM \"{table}\" ORDER BY key, path"),
            keys: format!("SELECT DISTINCT key FROM \"{table}\" ORDER BY key"),
            keys_with_leaf: format!(
                "SELECT DISTINCT key FROM \"{table}\" WHERE path = ?1 AND value = ?2 ORDER BY key"
            ),
            count_keys: format!("SELECT COUNT(DISTINCT key) FROM \"{table}\""),
            delete_row: format!("DELETE FROM \"{table}\" WHERE key = ?1 AND path = ?2"),
            update_row: format!("UPDATE \"{table}\" SET value = ?3 WHERE key = ?1 AND path = ?2"),
            insert_row: format!("INSERT INTO \"{table}\" (key, path, value) VALUES (?1, ?2, ?3)"),
            delete_key: format!("DELETE FROM \"{table}\" WHERE key = ?1"),
            clear: format!("DELETE FROM \"{table}\""),
        }
    }
}

/// Store names become SQL identifiers, so only `[A-Za-z0-9_]` is allowed.
fn sanitize_name(name: &str) -> Result<&str> {
    if name.is_empty() {
        return Err(Error::format(name, "store name must not be empty"));
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(Error::format(
            name,
            "store name may only contain ASCII letters, digits and '_'",
        ));
    }
    if name.eq_ignore_ascii_case(COUNTER_TABLE) || name.to_ascii_lowercase().starts_with("sqlite_")
    {
        return Err(Error::format(name, "store name is reserved"));
    }
    Ok(name)
}

impl SqliteTable {
    pub fn open(cfg: &SqliteConfig, name: &str) -> Result<Self> {
        let name = sanitize_name(name)?;
        if let Some(parent) = cfg.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(anyhow::Error::from)?;
            }
        }

        let conn = Connection::open_with_flags(
            &cfg.path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
        )
        .map_err(anyhow::Error::from)?;
        Self::configure_connection(&conn, cfg)?;

        let table = Self::init(conn, name)?;
        info!(store = name, path = %cfg.path.display(), "opened sqlite table");
        Ok(table)
    }

    /// A private in-memory database, gone when the table is dropped.
    pub fn open_in_memory(name: &str) -> Result<Self> {
        let name = sanitize_name(name)?;
        let conn = Connection::open_in_memory().map_err(anyhow::Error::from)?;
        Self::init(conn, name)
    }

    fn configure_connection(conn: &Connection, cfg: &SqliteConfig) -> anyhow::Result<()> {
        if cfg.wal_mode {
            // journal_mode answers with the resulting mode.
            let _mode: String =
                conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        }
        conn.pragma_update(None, "synchronous", cfg.synchronous.pragma_value())?;
        conn.pragma_update(None, "cache_size", cfg.cache_size)?;
        Ok(())
    }

    fn init(conn: Connection, name: &str) -> Result<Self> {
        Self::init_schema(&conn, name)?;
        Ok(SqliteTable {
            conn,
            name: name.to_owned(),
            sql: Statements::new(name),
        })
    }

    // Uniqueness of (key, path) is kept by the writers, not the schema, so
    // the index is deliberately non-unique.
    fn init_schema(conn: &Connection, name: &str) -> anyhow::Result<()> {
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS \"{name}\" (
                key TEXT NOT NULL,
                path TEXT NOT NULL,
                value TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS \"{name}_key_path\" ON \"{name}\" (key, path);
            CREATE TABLE IF NOT EXISTS {COUNTER_TABLE} (
                name TEXT NOT NULL UNIQUE,
                last_value INTEGER NOT NULL
            );"
        ))?;
        conn.execute(
            &format!("INSERT OR IGNORE INTO {COUNTER_TABLE} (name, last_value) VALUES (?1, 0)"),
            params![name],
        )?;
        Ok(())
    }

    fn query_rows(&self, sql: &str, args: impl rusqlite::Params) -> anyhow::Result<Vec<Row>> {
        let mut stmt = self.conn.prepare_cached(sql)?;
        let rows = stmt
            .query_map(args, |row| {
                Ok(Row {
                    key: row.get(0)?,
                    path: row.get(1)?,
                    value: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn query_keys(&self, sql: &str, args: impl rusqlite::Params) -> anyhow::Result<Vec<String>> {
        let mut stmt = self.conn.prepare_cached(sql)?;
        let keys = stmt
            .query_map(args, |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(keys)
    }
}

pub struct SqliteTxn<'a> {
    tx: Transaction<'a>,
    sql: &'a Statements,
}

impl<'a> TableTxn for SqliteTxn<'a> {
    fn delete_row(&mut self, key: &str, path: &str) -> anyhow::Result<()> {
        self.tx
            .prepare_cached(&self.sql.delete_row)?
            .execute(params![key, path])?;
        Ok(())
    }

    fn put_row(&mut self, key: &str, path: &str, value: &str) -> anyhow::Result<()> {
        let updated = self
            .tx
            .prepare_cached(&self.sql.update_row)?
            .execute(params![key, path, value])?;
        if updated == 0 {
            self.tx
                .prepare_cached(&self.sql.insert_row)?
                .execute(params![key, path, value])?;
        }
        Ok(())
    }

    fn commit(self) -> anyhow::Result<()> {
        self.tx.commit()?;
        Ok(())
    }
}

impl Table for SqliteTable {
    type Txn<'a> = SqliteTxn<'a> where Self: 'a;

    fn name(&self) -> &str {
        &self.name
    }

    fn begin(&mut self) -> anyhow::Result<SqliteTxn<'_>> {
        // Dropping a rusqlite transaction rolls it back.
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        Ok(SqliteTxn { tx, sql: &self.sql })
    }

    fn rows_for_key(&mut self, key: &str) -> anyhow::Result<Vec<Row>> {
        self.query_rows(&self.sql.rows_for_key, params![key])
    }

    fn row(&mut self, key: &str, path: &str) -> anyhow::Result<Option<String>> {
        let value = self
            .conn
            .prepare_cached(&self.sql.row)?
            .query_row(params![key, path], |row| row.get(0))
            .optional()?;
        Ok(value)
    }

    fn rows(&mut self) -> anyhow::Result<Vec<Row>> {
        self.query_rows(&self.sql.rows, [])
    }

    fn keys(&mut self) -> anyhow::Result<Vec<String>> {
        self.query_keys(&self.sql.keys, [])
    }

    fn keys_with_leaf(&mut self, path: &str, value: &str) -> anyhow::Result<Vec<String>> {
        self.query_keys(&self.sql.keys_with_leaf, params![path, value])
    }

    fn count_keys(&mut self) -> anyhow::Result<usize> {
        let n: i64 = self
            .conn
            .prepare_cached(&self.sql.count_keys)?
            .query_row([], |row| row.get(0))?;
        Ok(usize::try_from(n)?)
    }

    fn delete_key(&mut self, key: &str) -> anyhow::Result<usize> {
        Ok(self
            .conn
            .prepare_cached(&self.sql.delete_key)?
            .execute(params![key])?)
    }

    fn clear(&mut self) -> anyhow::Result<usize> {
        let removed = self.conn.prepare_cached(&self.sql.clear)?.execute([])?;
        info!(store = %self.name, removed, "cleared table");
        Ok(removed)
    }

    fn close(self) -> anyhow::Result<()> {
        self.conn.close().map_err(|(_, e)| e)?;
        Ok(())
    }
}

impl Counter for SqliteTable {
    fn counter(&mut self, name: &str) -> anyhow::Result<i64> {
        let value = self
            .conn
            .prepare_cached(&format!(
                "SELECT last_value FROM {COUNTER_TABLE} WHERE name = ?1"
            ))?
            .query_row(params![name], |row| row.get(0))
            .optional()?;
        Ok(value.unwrap_or(0))
    }

    // Read-then-write, so the whole step runs under one immediate
    // transaction.
    fn increment(&mut self, name: &str) -> anyhow::Result<i64> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute(
            &format!("INSERT OR IGNORE INTO {COUNTER_TABLE} (name, last_value) VALUES (?1, 0)"),
            params![name],
        )?;
        tx.execute(
            &format!("UPDATE {COUNTER_TABLE} SET last_value = last_value + 1 WHERE name = ?1"),
            params![name],
        )?;
        let value: i64 = tx.query_row(
            &format!("SELECT last_value FROM {COUNTER_TABLE} WHERE name = ?1"),
            params![name],
            |row| row.get(0),
        )?;
        tx.commit()?;
        Ok(value)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_sanitize_name() {
        assert!(sanitize_name("users_2").is_ok());
        for bad in ["", "a-b", "a\"b", "drop table", "leafdb_counters", "sqlite_master"] {
            assert!(
                matches!(sanitize_name(bad), Err(Error::Format { .. })),
                "{:?} should be rejected",
                bad
            );
        }
    }

    #[test]
    fn test_rows_and_txn() -> anyhow::Result<()> {
        let mut table = SqliteTable::open_in_memory("docs")?;

        let mut txn = table.begin()?;
        txn.put_row("a", "x", "1")?;
        txn.put_row("a", "y", "2")?;
        txn.put_row("b", "::ROOT::", "true")?;
        // A second put replaces rather than duplicating.
        txn.put_row("a", "x", "10")?;
        txn.commit()?;

        assert_eq!(table.rows_for_key("a")?.len(), 2);
        assert_eq!(table.row("a", "x")?, Some("10".to_owned()));
        assert_eq!(table.row("a", "nope")?, None);
        assert_eq!(table.keys()?, vec!["a", "b"]);
        assert_eq!(table.keys_with_leaf("::ROOT::", "true")?, vec!["b"]);
        assert_eq!(table.count_keys()?, 2);

        {
            let mut txn = table.begin()?;
            txn.delete_row("a", "x")?;
            txn.put_row("c", "z", "3")?;
        }
        assert_eq!(table.rows()?.len(), 3);

        assert_eq!(table.delete_key("a")?, 2);
        assert_eq!(table.clear()?, 1);
        assert_eq!(table.count_keys()?, 0);
        Ok(())
    }

    #[test]
    fn test_counter_survives_reopen() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let cfg = SqliteConfig::new(dir.path().join("nested").join("store.db"));

        let mut table = SqliteTable::open(&cfg, "things")?;
        assert_eq!(table.counter("things")?, 0);
        assert_eq!(table.increment("things")?, 1);
        assert_eq!(table.increment("things")?, 2);
        table.close()?;

        let mut table = SqliteTable::open(&cfg, "things")?;
        assert_eq!(table.counter("things")?, 2);
        assert_eq!(table.increment("things")?, 3);
        Ok(())
    }
}
