use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use sql_dispatch::connection::{ConnectionFactory, SqlConnection};
use sql_dispatch::pool::SqlThreadPool;
use sql_dispatch::prelude::*;
use sql_dispatch::template::{RenderedQuery, TemplateRegistry};

/// Takes `delay` per statement and echoes the statement's first parameter.
struct SlowConnection {
    delay: Duration,
}

impl SqlConnection for SlowConnection {
    fn execute(
        &mut self,
        query: &RenderedQuery,
        _shape: ResultShape,
    ) -> Result<QueryResult, SqlDispatchError> {
        std::thread::sleep(self.delay);
        let value = query.params.first().cloned().unwrap_or(RowValues::Null);
        let mut rows = ResultSet::new(vec!["value".into()]);
        rows.add_row_values(vec![value]);
        Ok(QueryResult::Rows(rows))
    }
}

struct SlowFactory {
    delay: Duration,
}

impl ConnectionFactory for SlowFactory {
    fn dialect(&self) -> Dialect {
        Dialect::Mysql
    }

    fn describe(&self) -> String {
        "slow".into()
    }

    fn connect(&self) -> Result<Box<dyn SqlConnection>, SqlDispatchError> {
        Ok(Box::new(SlowConnection { delay: self.delay }))
    }
}

const ECHO_SQL: &str = "-- #!mysql
-- #{ echo
-- #  :n int
SELECT :n AS value;
-- #}
";

fn connector(delay: Duration, max_in_flight: Option<usize>) -> DataConnector {
    let pool = SqlThreadPool::create(Arc::new(SlowFactory { delay }), 1, ReconnectPolicy::default())
        .expect("pool");
    assert!(pool.wait_settled(Duration::from_secs(5)));
    let mut registry = TemplateRegistry::new();
    registry
        .load(&TemplateSource::new("echo.sql", ECHO_SQL), Dialect::Mysql)
        .expect("templates");
    DataConnector::new(Dialect::Mysql, pool, registry, max_in_flight)
}

fn echoed(outcome: &QueryOutcome) -> Option<i64> {
    outcome
        .as_ref()
        .ok()
        .and_then(QueryResult::rows)
        .and_then(|rows| rows.results.first())
        .and_then(|row| row.get("value"))
        .and_then(RowValues::as_int)
        .copied()
}

#[test]
fn close_resolves_every_pending_query_once() {
    let db = connector(Duration::from_millis(30), None);
    let mut handles: Vec<QueryHandle> = (0..10)
        .map(|n| db.execute("echo", &Args::new().with("n", n)).expect("submitted"))
        .collect();
    std::thread::sleep(Duration::from_millis(10));

    db.close();
    assert!(db.is_closed());
    assert_eq!(db.pending_count(), 0);

    let outcomes: Vec<QueryOutcome> = handles
        .iter_mut()
        .map(|handle| handle.try_take().expect("resolved by close"))
        .collect();
    let finished = outcomes.iter().filter(|o| o.is_ok()).count();
    let cancelled = outcomes
        .iter()
        .filter(|o| matches!(o, Err(SqlDispatchError::ShutDown)))
        .count();
    assert!(finished >= 1, "the in-flight query completes");
    assert!(cancelled >= 1, "queued queries are cancelled");
    assert_eq!(finished + cancelled, 10);
    for (n, outcome) in outcomes.iter().enumerate().take(finished) {
        assert_eq!(echoed(outcome), Some(n as i64));
    }

    assert!(matches!(
        db.execute("echo", &Args::new().with("n", 1)),
        Err(SqlDispatchError::ShutDown)
    ));
    db.close();
}

#[test]
fn continuations_can_queue_follow_up_queries() {
    let db = Rc::new(connector(Duration::ZERO, None));
    let log: Rc<RefCell<Vec<i64>>> = Rc::new(RefCell::new(Vec::new()));

    fn step(db: &Rc<DataConnector>, log: &Rc<RefCell<Vec<i64>>>, n: i64) {
        let weak = Rc::downgrade(db);
        let log_in_callback = Rc::clone(log);
        db.execute_then("echo", &Args::new().with("n", n), move |outcome| {
            let value = echoed(&outcome).expect("echo value");
            log_in_callback.borrow_mut().push(value);
            if value < 3 {
                if let Some(db) = weak.upgrade() {
                    step(&db, &log_in_callback, value + 1);
                }
            }
        })
        .expect("submitted");
    }

    step(&db, &log, 1);
    db.wait_all();
    assert_eq!(*log.borrow(), vec![1, 2, 3]);
    assert_eq!(db.pending_count(), 0);
}

#[test]
fn close_inside_a_continuation_still_delivers_finished_results() {
    let db = Rc::new(connector(Duration::ZERO, None));
    let weak = Rc::downgrade(&db);
    db.execute_then("echo", &Args::new().with("n", 0), move |_| {
        if let Some(db) = weak.upgrade() {
            db.close();
        }
    })
    .expect("submitted");
    let mut handles: Vec<QueryHandle> = (1..=5)
        .map(|n| db.execute("echo", &Args::new().with("n", n)).expect("submitted"))
        .collect();
    // One worker, so all six results are produced before the tick below.
    std::thread::sleep(Duration::from_millis(200));

    db.tick();
    assert!(db.is_closed());
    assert_eq!(db.pending_count(), 0);
    for (n, handle) in (1..=5).zip(handles.iter_mut()) {
        let outcome = handle.try_take().expect("resolved");
        assert_eq!(echoed(&outcome), Some(n));
    }
}

#[test]
fn in_flight_limit_applies_backpressure() {
    let db = connector(Duration::from_millis(5), Some(3));
    let handles: Vec<QueryHandle> = (0..3)
        .map(|n| db.execute("echo", &Args::new().with("n", n)).expect("submitted"))
        .collect();
    let err = db.execute("echo", &Args::new().with("n", 4)).unwrap_err();
    assert!(matches!(err, SqlDispatchError::Backpressure(3)));

    db.wait_all();
    drop(handles);
    assert!(db.execute("echo", &Args::new().with("n", 5)).is_ok());
}

#[test]
fn dropped_handles_do_not_disturb_delivery() {
    let db = connector(Duration::ZERO, None);
    db.set_logging_enabled(true);
    drop(db.execute("echo", &Args::new().with("n", 1)).expect("submitted"));
    let mut kept = db.execute("echo", &Args::new().with("n", 2)).expect("submitted");
    assert_eq!(db.wait_all(), 2);
    assert_eq!(echoed(&kept.try_take().expect("resolved")), Some(2));
}

#[tokio::test]
async fn handles_are_futures() -> Result<(), SqlDispatchError> {
    let db = connector(Duration::ZERO, None);
    let handle = db.execute("echo", &Args::new().with("n", 42))?;
    db.wait_all();
    let outcome = handle.await;
    assert_eq!(echoed(&outcome), Some(42));
    Ok(())
}
