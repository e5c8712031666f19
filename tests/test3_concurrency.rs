#![cfg(feature = "sqlite")]

use std::collections::HashSet;

use serde_json::json;
use sql_dispatch::prelude::*;
use tempfile::tempdir;

const COUNTER_SQL: &str = "-- #!sqlite
-- #{ counter
-- #  { init
CREATE TABLE IF NOT EXISTS hits (id INTEGER PRIMARY KEY, worker TEXT NOT NULL);
-- #  }
-- #  { hit
-- #    :worker string
INSERT INTO hits (worker) VALUES (:worker);
-- #  }
-- #  { total
SELECT COUNT(*) AS n FROM hits;
-- #  }
-- #  { ping
SELECT 1 AS one;
-- #  }
-- #}
";

#[test]
fn hundred_queries_on_four_workers() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let sql = SqlMap::new().with_source(Dialect::Sqlite, TemplateSource::new("counter.sql", COUNTER_SQL));
    let db = create(
        &json!({
            "type": "sqlite",
            "worker-limit": 4,
            "sqlite": {"file": "hits.sqlite", "busy-timeout-ms": 20000}
        }),
        &sql,
        ConnectorOptions::new().with_data_dir(dir.path()),
    )?;
    db.execute_generic("counter.init", &Args::new())?;
    assert_eq!(db.wait_all(), 1);

    let mut handles = Vec::with_capacity(100);
    for i in 0..100 {
        handles.push(db.execute("counter.hit", &Args::new().with("worker", format!("q{i}")))?);
    }
    let ids: HashSet<QueryId> = handles.iter().map(QueryHandle::id).collect();
    assert_eq!(ids.len(), 100, "ids are unique");
    assert_eq!(db.pending_count(), 100);

    assert_eq!(db.wait_all(), 100);
    assert_eq!(db.pending_count(), 0);
    for mut handle in handles {
        let result = handle.try_take().expect("resolved")?;
        assert_eq!(result.affected_rows(), Some(1));
    }
    // Delivered exactly once: nothing left for a later tick.
    assert_eq!(db.tick(), 0);

    let mut total = db.execute_select_one("counter.total", &Args::new())?;
    db.wait_all();
    let total = total.try_take().expect("resolved")?;
    assert_eq!(
        total.row().and_then(|row| row.get("n")).and_then(RowValues::as_int),
        Some(&100)
    );
    Ok(())
}

#[test]
fn continuations_run_once_each() -> Result<(), Box<dyn std::error::Error>> {
    use std::cell::RefCell;
    use std::rc::Rc;

    let sql = SqlMap::new().with_source(Dialect::Sqlite, TemplateSource::new("counter.sql", COUNTER_SQL));
    let db = create(
        &json!({"type": "sqlite", "worker-limit": 2, "sqlite": {"file": ":memory:"}}),
        &sql,
        ConnectorOptions::default(),
    )?;

    let seen: Rc<RefCell<Vec<QueryId>>> = Rc::new(RefCell::new(Vec::new()));
    let mut submitted = HashSet::new();
    for _ in 0..20 {
        let seen = Rc::clone(&seen);
        let slot = Rc::new(RefCell::new(None));
        let slot_in_callback = Rc::clone(&slot);
        let id = db.execute_then("counter.ping", &Args::new(), move |outcome| {
            assert!(outcome.is_ok());
            if let Some(id) = *slot_in_callback.borrow() {
                seen.borrow_mut().push(id);
            }
        })?;
        *slot.borrow_mut() = Some(id);
        submitted.insert(id);
    }
    assert_eq!(db.wait_all(), 20);
    assert_eq!(db.tick(), 0);

    let delivered: HashSet<QueryId> = seen.borrow().iter().copied().collect();
    assert_eq!(seen.borrow().len(), 20);
    assert_eq!(delivered, submitted);
    Ok(())
}
