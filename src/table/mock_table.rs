use std::{cell::RefCell, collections::BTreeMap, rc::Rc};

use anyhow::bail;

use super::{Counter, Row, Table, TableTxn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Begin,
    DeleteRow(String, String),
    PutRow(String, String, String),
    Commit,
    Rollback,
    DeleteKey(String),
    Clear,
    Increment(String),
}

impl Event {
    pub fn write_abbrev<W: std::fmt::Write>(&self, w: &mut W) -> std::fmt::Result {
        match self {
            Event::Begin => write!(w, "Begin"),
            Event::DeleteRow(key, path) => write!(w, "DeleteRow({}, {})", key, path),
            Event::PutRow(key, path, value) => write!(w, "PutRow({}, {}, {})", key, path, value),
            Event::Commit => write!(w, "Commit"),
            Event::Rollback => write!(w, "Rollback"),
            Event::DeleteKey(key) => write!(w, "DeleteKey({})", key),
            Event::Clear => write!(w, "Clear"),
            Event::Increment(name) => write!(w, "Increment({})", name),
        }
    }
}

#[derive(Debug, Default)]
pub struct MockState {
    rows: BTreeMap<(String, String), String>,
    counters: BTreeMap<String, i64>,
    events: Vec<Event>,

    // After this many writes, "crash" the table, meaning fail every read and
    // write until recovered.
    time_to_crash: Option<usize>,
}

impl MockState {
    fn check_crashed(&self) -> anyhow::Result<()> {
        if self.time_to_crash == Some(0) {
            bail!("table is down")
        } else {
            Ok(())
        }
    }

    pub fn schedule_crash(&mut self, ops: usize) {
        self.time_to_crash = Some(ops);
    }

    pub fn recover(&mut self) {
        self.time_to_crash = None;
    }

    fn perform_op(&mut self) -> anyhow::Result<()> {
        self.check_crashed()?;
        if let Some(x) = self.time_to_crash {
            self.time_to_crash = Some(x - 1);
        }
        Ok(())
    }

    fn record(&mut self, e: Event) {
        self.events.push(e);
    }

    pub fn take_events(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.events)
    }

    /// Write a row directly, bypassing transactions and crash scheduling.
    /// Lets tests plant rows the codec would never produce.
    pub fn plant_row(&mut self, key: &str, path: &str, value: &str) {
        self.rows
            .insert((key.to_owned(), path.to_owned()), value.to_owned());
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn dump(&self) -> Vec<Row> {
        self.rows
            .iter()
            .map(|((key, path), value)| Row {
                key: key.clone(),
                path: path.clone(),
                value: value.clone(),
            })
            .collect()
    }
}

/// In-memory table that records every write as an [`Event`] and can be made
/// to fail after a chosen number of writes. Clones share the same state.
#[derive(Clone, Debug)]
pub struct MockTable {
    name: String,
    pub state: Rc<RefCell<MockState>>,
}

impl MockTable {
    pub fn new(name: &str) -> Self {
        MockTable {
            name: name.to_owned(),
            state: Rc::new(RefCell::new(MockState::default())),
        }
    }
}

pub struct MockTxn<'a> {
    table: &'a mut MockTable,
    staged: BTreeMap<(String, String), String>,
    committed: bool,
}

impl<'a> TableTxn for MockTxn<'a> {
    fn delete_row(&mut self, key: &str, path: &str) -> anyhow::Result<()> {
        let mut state = (*self.table.state).borrow_mut();
        state.perform_op()?;
        state.record(Event::DeleteRow(key.to_owned(), path.to_owned()));
        self.staged.remove(&(key.to_owned(), path.to_owned()));
        Ok(())
    }

    fn put_row(&mut self, key: &str, path: &str, value: &str) -> anyhow::Result<()> {
        let mut state = (*self.table.state).borrow_mut();
        state.perform_op()?;
        state.record(Event::PutRow(
            key.to_owned(),
            path.to_owned(),
            value.to_owned(),
        ));
        self.staged
            .insert((key.to_owned(), path.to_owned()), value.to_owned());
        Ok(())
    }

    fn commit(mut self) -> anyhow::Result<()> {
        let mut state = (*self.table.state).borrow_mut();
        state.check_crashed()?;
        state.rows = std::mem::take(&mut self.staged);
        state.record(Event::Commit);
        self.committed = true;
        Ok(())
    }
}

impl<'a> Drop for MockTxn<'a> {
    fn drop(&mut self) {
        if !self.committed {
            (*self.table.state).borrow_mut().record(Event::Rollback);
        }
    }
}

impl Table for MockTable {
    type Txn<'a> = MockTxn<'a> where Self: 'a;

    fn name(&self) -> &str {
        &self.name
    }

    fn begin(&mut self) -> anyhow::Result<MockTxn<'_>> {
        let staged = {
            let mut state = (*self.state).borrow_mut();
            state.check_crashed()?;
            state.record(Event::Begin);
            state.rows.clone()
        };
        Ok(MockTxn {
            table: self,
            staged,
            committed: false,
        })
    }

    fn rows_for_key(&mut self, key: &str) -> anyhow::Result<Vec<Row>> {
        let state = (*self.state).borrow();
        state.check_crashed()?;
        Ok(state
            .dump()
            .into_iter()
            .filter(|row| row.key == key)
            .collect())
    }

    fn row(&mut self, key: &str, path: &str) -> anyhow::Result<Option<String>> {
        let state = (*self.state).borrow();
        state.check_crashed()?;
        Ok(state
            .rows
            .get(&(key.to_owned(), path.to_owned()))
            .cloned())
    }

    fn rows(&mut self) -> anyhow::Result<Vec<Row>> {
        let state = (*self.state).borrow();
        state.check_crashed()?;
        Ok(state.dump())
    }

    fn keys(&mut self) -> anyhow::Result<Vec<String>> {
        let state = (*self.state).borrow();
        state.check_crashed()?;
        let mut keys: Vec<String> = state
            .rows
            .keys()
            .map(|(key, _)| key.clone())
            .collect();
        keys.dedup();
        Ok(keys)
    }

    fn keys_with_leaf(&mut self, path: &str, value: &str) -> anyhow::Result<Vec<String>> {
        let state = (*self.state).borrow();
        state.check_crashed()?;
        let mut keys: Vec<String> = state
            .rows
            .iter()
            .filter(|((_, p), v)| p == path && v.as_str() == value)
            .map(|((key, _), _)| key.clone())
            .collect();
        keys.dedup();
        Ok(keys)
    }

    fn count_keys(&mut self) -> anyhow::Result<usize> {
        Ok(self.keys()?.len())
    }

    fn delete_key(&mut self, key: &str) -> anyhow::Result<usize> {
        let mut state = (*self.state).borrow_mut();
        state.perform_op()?;
        state.record(Event::DeleteKey(key.to_owned()));
        let before = state.rows.len();
        state.rows.retain(|(k, _), _| k != key);
        Ok(before - state.rows.len())
    }

    fn clear(&mut self) -> anyhow::Result<usize> {
        let mut state = (*self.state).borrow_mut();
        state.perform_op()?;
        state.record(Event::Clear);
        let removed = state.rows.len();
        state.rows.clear();
        Ok(removed)
    }
}

impl Counter for MockTable {
    fn counter(&mut self, name: &str) -> anyhow::Result<i64> {
        let state = (*self.state).borrow();
        state.check_crashed()?;
        Ok(state
            .counters
            .get(name)
            .copied()
            .unwrap_or(0))
    }

    fn increment(&mut self, name: &str) -> anyhow::Result<i64> {
        let mut state = (*self.state).borrow_mut();
        state.perform_op()?;
        state.record(Event::Increment(name.to_owned()));
        let value = state.counters.entry(name.to_owned()).or_insert(0);
        *value += 1;
        Ok(*value)
    }
}

#[test]
fn test_mock_txn() -> anyhow::Result<()> {
    let mut table = MockTable::new("t");

    let mut txn = table.begin()?;
    txn.put_row("a", "x", "1")?;
    txn.put_row("a", "y", "2")?;
    txn.put_row("b", "::ROOT::", "true")?;
    txn.commit()?;

    assert_eq!(table.keys()?, vec!["a", "b"]);
    assert_eq!(table.row("a", "y")?, Some("2".to_owned()));
    assert_eq!(table.count_keys()?, 2);

    // Uncommitted writes vanish.
    {
        let mut txn = table.begin()?;
        txn.delete_row("a", "x")?;
        txn.put_row("c", "z", "3")?;
    }
    assert_eq!((*table.state).borrow().row_count(), 3);

    let events = (*table.state).borrow_mut().take_events();
    assert_eq!(events.first(), Some(&Event::Begin));
    assert_eq!(events.last(), Some(&Event::Rollback));

    Ok(())
}

#[test]
fn test_mock_crash() -> anyhow::Result<()> {
    let mut table = MockTable::new("t");
    (*table.state).borrow_mut().schedule_crash(1);

    let mut txn = table.begin()?;
    txn.put_row("a", "x", "1")?;
    assert!(txn.put_row("a", "y", "2").is_err());
    drop(txn);

    assert_eq!((*table.state).borrow().row_count(), 0);
    assert!(table.increment("t").is_err());
    assert!(table.keys().is_err());
    assert!(table.row("a", "x").is_err());

    (*table.state).borrow_mut().recover();
    assert_eq!(table.increment("t")?, 1);
    assert_eq!(table.increment("t")?, 2);
    assert_eq!(table.counter("t")?, 2);
    assert_eq!(table.counter("other")?, 0);
    Ok(())
}
