use std::fmt::Write;

use crate::{config::StoreConfig, table::MockTable};

use super::{Document, Store};

fn parse_doc(text: &str) -> Document {
    serde_json::from_str(text.trim()).unwrap()
}

#[test]
fn test_store_trace() {
    datadriven::walk("src/store/testdata/", |f| {
        let table = MockTable::new("docs");
        let mut store = Store::new(table.clone(), StoreConfig::default().with_seed(1));
        f.run(|test_case| {
            let key = test_case.args.get("key").map(|v| v[0].clone());
            let path = test_case.args.get("path").map(|v| v[0].clone());
            let result = match test_case.directive.as_str() {
                "set" => store
                    .set(key.unwrap(), path.as_deref(), parse_doc(&test_case.input))
                    .map(|()| "ok".to_owned()),
                "set-many" => {
                    let entries = test_case
                        .input
                        .lines()
                        .map(|line| {
                            let (k, v) = line.split_once('=').unwrap();
                            (k.to_owned(), parse_doc(v))
                        })
                        .collect::<Vec<_>>();
                    store.set_many(entries).map(|()| "ok".to_owned())
                }
                "delete" => store
                    .delete(key.unwrap(), path.as_deref())
                    .map(|()| "ok".to_owned()),
                "push" => store
                    .push(key.unwrap(), path.as_deref(), parse_doc(&test_case.input))
                    .map(|()| "ok".to_owned()),
                "remove" => store
                    .remove(key.unwrap(), path.as_deref(), &parse_doc(&test_case.input))
                    .map(|n| format!("removed {}", n)),
                "inc" => {
                    let by: i64 = test_case.input.trim().parse().unwrap();
                    store
                        .inc(key.unwrap(), path.as_deref(), by)
                        .map(|n| n.to_string())
                }
                "get" => store
                    .get(key.unwrap(), path.as_deref())
                    .map(|doc| doc.map_or_else(|| "absent".to_owned(), |d| d.to_string())),
                "clear" => store.clear().map(|()| "ok".to_owned()),
                "crash" => {
                    let ops = test_case.args["ops"][0].parse().unwrap();
                    (*table.state).borrow_mut().schedule_crash(ops);
                    Ok("ok".to_owned())
                }
                "recover" => {
                    (*table.state).borrow_mut().recover();
                    Ok("ok".to_owned())
                }
                "dump" => {
                    let mut out = String::new();
                    for row in (*table.state).borrow().dump() {
                        writeln!(&mut out, "{} @ {} = {}", row.key, row.path, row.value).unwrap();
                    }
                    return out;
                }
                "trace" => {
                    let mut out = String::new();
                    for event in (*table.state).borrow_mut().take_events() {
                        event.write_abbrev(&mut out).unwrap();
                        out.push('\n');
                    }
                    return out;
                }
                _ => {
                    panic!("unhandled");
                }
            };
            match result {
                Ok(s) => format!("{}\n", s),
                Err(e) => format!("error: {}\n", e),
            }
        })
    })
}
