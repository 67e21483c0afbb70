use anyhow::Context;
use tracing::debug;

use crate::{
    diff::Op,
    error::Result,
    table::{Table, TableTxn},
};

/// Apply `ops` to `table` as one atomic unit, in the order given. If any op
/// fails the transaction is dropped uncommitted and none of the batch is
/// visible.
pub fn apply<T: Table>(table: &mut T, ops: &[Op]) -> Result<()> {
    if ops.is_empty() {
        return Ok(());
    }
    let name = table.name().to_owned();
    let mut txn = table
        .begin()
        .with_context(|| format!("beginning batch on {}", name))?;
    for op in ops {
        match op {
            Op::Delete { key, path } => txn
                .delete_row(key, path)
                .with_context(|| format!("deleting {} @ {}", key, path))?,
            Op::Insert { key, path, value } => txn
                .put_row(key, path, value)
                .with_context(|| format!("inserting {} @ {}", key, path))?,
        }
    }
    txn.commit()
        .with_context(|| format!("committing batch on {}", name))?;
    debug!(table = %name, ops = ops.len(), "applied batch");
    Ok(())
}

#[cfg(test)]
mod test {
    use serde_json::json;

    use super::*;
    use crate::{
        diff::plan,
        error::Error,
        table::{Event, MockTable},
    };

    #[test]
    fn test_apply_in_order() -> anyhow::Result<()> {
        let mut table = MockTable::new("t");
        let ops = plan("k", None, &json!({"a": 1, "b": [true]}), 64)?;
        apply(&mut table, &ops)?;
        assert_eq!(
            (*table.state).borrow_mut().take_events(),
            vec![
                Event::Begin,
                Event::PutRow("k".into(), "a".into(), "1".into()),
                Event::PutRow("k".into(), "b[0]".into(), "true".into()),
                Event::Commit,
            ]
        );

        // Nothing to do means no transaction at all.
        apply(&mut table, &[])?;
        assert!((*table.state).borrow_mut().take_events().is_empty());
        Ok(())
    }

    #[test]
    fn test_reapply_is_idempotent() -> anyhow::Result<()> {
        let mut table = MockTable::new("t");
        let old = json!({"a": 1, "b": {"c": "x"}});
        let new = json!({"a": {"z": 2}, "b": {"c": "y"}, "d": null});
        apply(&mut table, &plan("k", None, &old, 64)?)?;

        let ops = plan("k", Some(&old), &new, 64)?;
        apply(&mut table, &ops)?;
        let once = (*table.state).borrow().dump();

        apply(&mut table, &ops)?;
        assert_eq!((*table.state).borrow().dump(), once);
        assert_eq!(once.len(), 3);
        Ok(())
    }

    #[test]
    fn test_failed_batch_leaves_nothing() -> anyhow::Result<()> {
        let mut table = MockTable::new("t");
        apply(&mut table, &plan("k", None, &json!([1, 2]), 64)?)?;
        let before = (*table.state).borrow().dump();

        let ops = plan("k", Some(&json!([1, 2])), &json!([3, 4, 5]), 64)?;
        (*table.state).borrow_mut().schedule_crash(3);
        let err = apply(&mut table, &ops).unwrap_err();
        assert!(matches!(err, Error::Provider(_)));
        assert!(err.to_string().contains("table is down"));
        assert_eq!((*table.state).borrow().dump(), before);
        assert_eq!(
            (*table.state).borrow_mut().take_events().last(),
            Some(&Event::Rollback)
        );
        Ok(())
    }
}
