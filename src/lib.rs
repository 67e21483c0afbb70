// A document store that keeps nested JSON values as flat (key, path, leaf)
// rows in a relational table.
mod codec;
mod config;
mod diff;
mod error;
mod executor;
mod guard;
mod key;
mod path;
mod store;
mod table;

pub use codec::{flatten, unflatten, Document, Flat};
pub use config::{SqliteConfig, StoreConfig, SynchronousMode};
pub use diff::{plan, Op};
pub use error::{Error, ErrorKind, Result};
pub use executor::apply;
pub use guard::Shape;
pub use key::Key;
pub use path::{Segment, ROOT};
pub use store::{Entry, Sample, Store};
pub use table::{Counter, Event, MockState, MockTable, Row, SqliteTable, Table, TableTxn};
