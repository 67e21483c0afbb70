// The store handle: every public read and write. Reads rebuild documents from
// their rows on each call; writes read the current document, compute the new
// one in memory, and hand the row diff between them to the executor.
use std::{collections::BTreeMap, future::Future};

use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use serde_json::{Number, Value};
use tracing::{info, warn};

use crate::{
    codec::{self, Document},
    config::{SqliteConfig, StoreConfig},
    diff::{self, Op},
    error::{Error, Result},
    executor,
    guard,
    key::{self, Key},
    path::{self, Segment, ROOT},
    table::{Counter, Row, SqliteTable, Table},
};

#[cfg(test)]
mod trace_test;

#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub key: String,
    pub value: Document,
}

/// The result of a random draw. `One` is only produced for a request of
/// exactly one item; larger requests are clamped to the number of keys.
#[derive(Debug, Clone, PartialEq)]
pub enum Sample<V> {
    Empty,
    One(V),
    Many(Vec<V>),
}

pub struct Store<T: Table + Counter> {
    table: T,
    config: StoreConfig,
    rng: StdRng,
}

impl Store<SqliteTable> {
    pub fn open_sqlite(sqlite: &SqliteConfig, name: &str, config: StoreConfig) -> Result<Self> {
        Ok(Store::new(SqliteTable::open(sqlite, name)?, config))
    }
}

impl<T: Table + Counter> Store<T> {
    pub fn new(table: T, config: StoreConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Store { table, config, rng }
    }

    pub fn name(&self) -> &str {
        self.table.name()
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    // A path can be no deeper than a document may nest.
    fn segments_of(&self, path: Option<&str>) -> Result<Vec<Segment>> {
        let p = match path {
            Some(p) => p,
            None => return Ok(Vec::new()),
        };
        let segments = path::parse(p)?;
        if segments.len() > self.config.max_depth {
            return Err(Error::format(
                p,
                format!("path is deeper than {} levels", self.config.max_depth),
            ));
        }
        Ok(segments)
    }

    fn load(&mut self, key: &str) -> Result<Option<Document>> {
        let rows = self.table.rows_for_key(key)?;
        codec::unflatten(
            key,
            rows.iter().map(|r| (r.path.as_str(), r.value.as_str())),
            self.config.max_depth,
        )
    }

    fn write(&mut self, key: &str, old: Option<&Document>, new: &Document) -> Result<()> {
        let ops = diff::plan(key, old, new, self.config.max_depth)?;
        executor::apply(&mut self.table, &ops)
    }

    /// The whole document under `key`, or with `path`, the leaf stored at
    /// exactly that path. A path naming a list or mapping finds nothing, since
    /// only leaves have rows.
    pub fn get(&mut self, key: impl Into<Key>, path: Option<&str>) -> Result<Option<Document>> {
        let key = key::normalize(key)?;
        match path {
            None => self.load(&key),
            Some(p) => {
                let p = path::canonicalize(p)?;
                match self.table.row(&key, &p)? {
                    Some(raw) => Ok(Some(codec::decode_leaf(&key, &p, &raw)?)),
                    None => Ok(None),
                }
            }
        }
    }

    pub fn has(&mut self, key: impl Into<Key>, path: Option<&str>) -> Result<bool> {
        let key = key::normalize(key)?;
        match path {
            None => Ok(!self.table.rows_for_key(&key)?.is_empty()),
            Some(p) => Ok(self.table.row(&key, &path::canonicalize(p)?)?.is_some()),
        }
    }

    /// Every document in key order. A document whose rows are corrupt is
    /// reported and returned as null rather than failing the whole read.
    pub fn get_all(&mut self) -> Result<Vec<Entry>> {
        let rows = self.table.rows()?;
        let mut out = Vec::new();
        let mut start = 0;
        while start < rows.len() {
            let key = &rows[start].key;
            let end = start + rows[start..].iter().take_while(|r| &r.key == key).count();
            let value = self.rebuild_or_null(key, &rows[start..end])?;
            out.push(Entry {
                key: key.clone(),
                value,
            });
            start = end;
        }
        Ok(out)
    }

    fn rebuild_or_null(&self, key: &str, rows: &[Row]) -> Result<Document> {
        let rebuilt = codec::unflatten(
            key,
            rows.iter().map(|r| (r.path.as_str(), r.value.as_str())),
            self.config.max_depth,
        );
        match rebuilt {
            Ok(doc) => Ok(doc.unwrap_or(Value::Null)),
            Err(e @ Error::Corruption { .. }) => {
                warn!(
                    store = %self.table.name(),
                    key,
                    error = %e,
                    "substituting null for corrupt document"
                );
                Ok(Value::Null)
            }
            Err(e) => Err(e),
        }
    }

    pub fn values(&mut self) -> Result<Vec<Document>> {
        Ok(self.get_all()?.into_iter().map(|e| e.value).collect())
    }

    /// The documents for whichever of `keys` exist.
    pub fn get_many<K, I>(&mut self, keys: I) -> Result<BTreeMap<String, Document>>
    where
        K: Into<Key>,
        I: IntoIterator<Item = K>,
    {
        let mut out = BTreeMap::new();
        for key in keys {
            let key = key::normalize(key)?;
            if let Some(doc) = self.load(&key)? {
                out.insert(key, doc);
            }
        }
        Ok(out)
    }

    pub fn keys(&mut self) -> Result<Vec<String>> {
        Ok(self.table.keys()?)
    }

    pub fn count(&mut self) -> Result<usize> {
        Ok(self.table.count_keys()?)
    }

    pub fn random_key(&mut self, n: usize) -> Result<Sample<String>> {
        let keys = self.table.keys()?;
        let mut picked: Vec<String> = keys.choose_multiple(&mut self.rng, n).cloned().collect();
        Ok(match (n, picked.len()) {
            (_, 0) => Sample::Empty,
            (1, _) => Sample::One(picked.remove(0)),
            _ => Sample::Many(picked),
        })
    }

    pub fn random(&mut self, n: usize) -> Result<Sample<Document>> {
        Ok(match self.random_key(n)? {
            Sample::Empty => Sample::Empty,
            Sample::One(key) => match self.load(&key)? {
                Some(doc) => Sample::One(doc),
                None => Sample::Empty,
            },
            Sample::Many(keys) => {
                let mut docs = Vec::with_capacity(keys.len());
                for key in keys {
                    docs.extend(self.load(&key)?);
                }
                Sample::Many(docs)
            }
        })
    }

    /// Store `value` as the whole document under `key`, or with `path`, at
    /// that location inside the existing document. Containers missing along
    /// the path are created.
    pub fn set(&mut self, key: impl Into<Key>, path: Option<&str>, value: Document) -> Result<()> {
        let key = key::normalize(key)?;
        let segments = self.segments_of(path)?;
        let old = self.load(&key)?;
        let new = diff::set_at(old.as_ref().unwrap_or(&Value::Null), &segments, value)?;
        self.write(&key, old.as_ref(), &new)
    }

    /// Store several whole documents as one atomic unit. Later entries for a
    /// key win over earlier ones.
    pub fn set_many<K, I>(&mut self, entries: I) -> Result<()>
    where
        K: Into<Key>,
        I: IntoIterator<Item = (K, Document)>,
    {
        let mut pending: BTreeMap<String, Option<Document>> = BTreeMap::new();
        let mut ops: Vec<Op> = Vec::new();
        for (key, value) in entries {
            let key = key::normalize(key)?;
            let old = match pending.remove(&key) {
                Some(doc) => doc,
                None => self.load(&key)?,
            };
            ops.extend(diff::plan(
                &key,
                old.as_ref(),
                &value,
                self.config.max_depth,
            )?);
            pending.insert(key, Some(value));
        }
        executor::apply(&mut self.table, &ops)
    }

    /// Remove `key` entirely, or with `path`, only the node there. Removing a
    /// list element shifts the elements after it.
    pub fn delete(&mut self, key: impl Into<Key>, path: Option<&str>) -> Result<()> {
        let key = key::normalize(key)?;
        let segments = self.segments_of(path)?;
        if segments.is_empty() {
            self.table.delete_key(&key)?;
            return Ok(());
        }
        let old = match self.load(&key)? {
            Some(doc) => doc,
            None => return Ok(()),
        };
        match diff::unset_at(&old, &segments) {
            Some(new) => self.write(&key, Some(&old), &new),
            None => Ok(()),
        }
    }

    pub fn clear(&mut self) -> Result<()> {
        let removed = self.table.clear()?;
        info!(store = %self.table.name(), removed, "cleared store");
        Ok(())
    }

    /// Append `value` to the list at `path`. A missing list is created.
    pub fn push(&mut self, key: impl Into<Key>, path: Option<&str>, value: Document) -> Result<()> {
        let key = key::normalize(key)?;
        let segments = self.segments_of(path)?;
        let old = self.load(&key)?;
        let target = match old.as_ref() {
            Some(doc) => guard::resolve(&key, doc, &segments)?,
            None => None,
        };
        let mut list = match target {
            Some(found) => guard::expect_list(&key, path, Some(found))?.clone(),
            None => Vec::new(),
        };
        list.push(value);
        let new = diff::set_at(
            old.as_ref().unwrap_or(&Value::Null),
            &segments,
            Value::Array(list),
        )?;
        self.write(&key, old.as_ref(), &new)
    }

    /// Remove every element equal to `value` from the list at `path`,
    /// returning how many went.
    pub fn remove(
        &mut self,
        key: impl Into<Key>,
        path: Option<&str>,
        value: &Document,
    ) -> Result<usize> {
        let key = key::normalize(key)?;
        let segments = self.segments_of(path)?;
        let old = guard::require_key(&key, self.load(&key)?)?;
        let target = guard::resolve(&key, &old, &segments)?;
        let mut items = guard::expect_list(&key, path, target)?.clone();
        let before = items.len();
        items.retain(|item| item != value);
        let removed = before - items.len();
        if removed > 0 {
            let new = diff::set_at(&old, &segments, Value::Array(items))?;
            self.write(&key, Some(&old), &new)?;
        }
        Ok(removed)
    }

    /// Add `by` to the number at `path`, treating a missing number as 0.
    /// Returns the new value.
    pub fn inc(
        &mut self,
        key: impl Into<Key>,
        path: Option<&str>,
        by: impl Into<Number>,
    ) -> Result<Number> {
        self.step(key.into(), path, by.into(), false)
    }

    pub fn dec(
        &mut self,
        key: impl Into<Key>,
        path: Option<&str>,
        by: impl Into<Number>,
    ) -> Result<Number> {
        self.step(key.into(), path, by.into(), true)
    }

    fn step(&mut self, key: Key, path: Option<&str>, by: Number, negate: bool) -> Result<Number> {
        let key = key::normalize(key)?;
        let segments = self.segments_of(path)?;
        let old = self.load(&key)?;
        let target = match old.as_ref() {
            Some(doc) => guard::resolve(&key, doc, &segments)?,
            None => None,
        };
        let current = match target {
            Some(found) => guard::expect_number(&key, path, Some(found))?.clone(),
            None => Number::from(0),
        };
        let next = arithmetic(&current, &by, negate)?;
        let new = diff::set_at(
            old.as_ref().unwrap_or(&Value::Null),
            &segments,
            Value::Number(next.clone()),
        )?;
        self.write(&key, old.as_ref(), &new)?;
        Ok(next)
    }

    fn keys_matching(&mut self, path: Option<&str>, value: &Document) -> Result<Vec<String>> {
        let at = match path {
            Some(p) => path::canonicalize(p)?,
            None => ROOT.to_owned(),
        };
        let leaf = codec::encode_leaf(value)?;
        Ok(self.table.keys_with_leaf(&at, &leaf)?)
    }

    /// The first document (in key order) whose leaf at `path` equals
    /// `value`. Without a path, matches documents that are that scalar.
    pub fn find_by_value(&mut self, path: Option<&str>, value: &Document) -> Result<Option<Entry>> {
        for key in self.keys_matching(path, value)? {
            if let Some(doc) = self.load(&key)? {
                return Ok(Some(Entry { key, value: doc }));
            }
        }
        Ok(None)
    }

    pub fn filter_by_value(&mut self, path: Option<&str>, value: &Document) -> Result<Vec<Entry>> {
        let mut out = Vec::new();
        for key in self.keys_matching(path, value)? {
            if let Some(doc) = self.load(&key)? {
                out.push(Entry { key, value: doc });
            }
        }
        Ok(out)
    }

    /// Scan documents in key order, awaiting `predicate` on each before
    /// reading the next, and return the first it accepts. With `path` the
    /// predicate sees only the node there, and documents lacking it are
    /// skipped.
    pub async fn find_by_function<F, Fut>(
        &mut self,
        predicate: F,
        path: Option<&str>,
    ) -> Result<Option<Entry>>
    where
        F: FnMut(&Document) -> Fut,
        Fut: Future<Output = bool>,
    {
        Ok(self.scan(predicate, path, true).await?.pop())
    }

    pub async fn filter_by_function<F, Fut>(
        &mut self,
        predicate: F,
        path: Option<&str>,
    ) -> Result<Vec<Entry>>
    where
        F: FnMut(&Document) -> Fut,
        Fut: Future<Output = bool>,
    {
        self.scan(predicate, path, false).await
    }

    async fn scan<F, Fut>(
        &mut self,
        mut predicate: F,
        path: Option<&str>,
        first_only: bool,
    ) -> Result<Vec<Entry>>
    where
        F: FnMut(&Document) -> Fut,
        Fut: Future<Output = bool>,
    {
        let segments = self.segments_of(path)?;
        let mut out = Vec::new();
        for key in self.table.keys()? {
            let doc = match self.load(&key)? {
                Some(doc) => doc,
                None => continue,
            };
            let accepted = match path::lookup(&doc, &segments) {
                Some(projected) => predicate(projected).await,
                None => false,
            };
            if accepted {
                out.push(Entry { key, value: doc });
                if first_only {
                    break;
                }
            }
        }
        Ok(out)
    }

    /// Next value of this store's counter, as a key string. Values are
    /// strictly increasing and never reused, even across `clear`.
    pub fn auto_id(&mut self) -> Result<String> {
        let name = self.table.name().to_owned();
        Ok(self.table.increment(&name)?.to_string())
    }

    pub fn close(self) -> Result<()> {
        let name = self.table.name().to_owned();
        self.table.close()?;
        info!(store = %name, "closed store");
        Ok(())
    }
}

fn as_integer(n: &Number) -> Option<i128> {
    n.as_i64()
        .map(i128::from)
        .or_else(|| n.as_u64().map(i128::from))
}

// Integers stay exact while the result fits an i64 or a u64.
fn arithmetic(current: &Number, by: &Number, negate: bool) -> Result<Number> {
    if let (Some(a), Some(b)) = (as_integer(current), as_integer(by)) {
        let exact = if negate { a - b } else { a + b };
        if let Ok(n) = i64::try_from(exact) {
            return Ok(Number::from(n));
        }
        if let Ok(n) = u64::try_from(exact) {
            return Ok(Number::from(n));
        }
    }
    let (a, b) = (
        current.as_f64().unwrap_or_default(),
        by.as_f64().unwrap_or_default(),
    );
    let n = if negate { a - b } else { a + b };
    Number::from_f64(n).ok_or_else(|| Error::format(n.to_string(), "result is not a finite number"))
}
