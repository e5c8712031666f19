use std::cell::RefCell;
use std::rc::Rc;
use std::time::Instant;

use rand::Rng;
use rand_chacha::ChaCha8Rng;
use serde_json::json;
use sql_dispatch::prelude::*;

use crate::args::SimConfig;
use crate::logging::EventLog;
use crate::model::{Op, SIM_SQL, SimState};
use crate::oracle::Oracle;

type Shared = Rc<RefCell<SimState>>;

pub(crate) fn run(config: &SimConfig, rng: &mut ChaCha8Rng) -> Result<(), String> {
    let dir = tempfile::tempdir().map_err(|err| format!("tempdir: {err}"))?;
    let sql = SqlMap::new().with_source(Dialect::Sqlite, TemplateSource::new("sim.sql", SIM_SQL));
    let mut options = ConnectorOptions::new().with_data_dir(dir.path());
    if let Some(limit) = config.max_in_flight {
        options = options.with_max_in_flight(limit);
    }
    let db = create(
        &json!({
            "type": "sqlite",
            "worker-limit": config.workers,
            "sqlite": {"file": "sim.sqlite", "busy-timeout-ms": 30000}
        }),
        &sql,
        options,
    )
    .map_err(|err| format!("create: {err}"))?;

    let mut init = db
        .execute_generic("sim.init", &Args::new())
        .map_err(|err| format!("init: {err}"))?;
    db.wait_all();
    init.try_take()
        .ok_or("init never delivered")?
        .map_err(|err| format!("init: {err}"))?;

    let state: Shared = Rc::new(RefCell::new(SimState::default()));
    let mut events = EventLog::new(config.first_steps, config.tail_steps);
    let started = Instant::now();
    let max_steps = config.iterations.unwrap_or(u64::MAX);
    let max_time = config.duration_ms.unwrap_or(u64::MAX);

    let mut step: u64 = 0;
    while step < max_steps && elapsed_ms(started) <= max_time {
        let op = next_op(&state.borrow(), config, rng);
        let label = apply(&db, &state, &op);
        events.record(format!(
            "step={step} op={op:?} in_flight={} result={label}",
            state.borrow().in_flight()
        ));

        if let Some(reason) = state.borrow().violations.first() {
            events.dump_failure(reason);
            return Err(reason.clone());
        }
        step += 1;
    }

    db.wait_all();
    if let Some(reason) = state.borrow().violations.first() {
        events.dump_failure(reason);
        return Err(reason.clone());
    }

    let (users, visits) = totals(&db)?;
    if let Err(reason) = Oracle::check_totals(&state.borrow(), users, visits) {
        events.dump_failure(&reason);
        return Err(reason);
    }

    {
        let snapshot = state.borrow();
        tracing::info!(
            "complete: steps={} elapsed={}ms users={} visits={} errors={} rejected={}",
            step,
            elapsed_ms(started),
            users,
            visits,
            snapshot.query_errors,
            snapshot.rejected
        );
    }
    db.close();
    Ok(())
}

fn next_op(state: &SimState, config: &SimConfig, rng: &mut ChaCha8Rng) -> Op {
    let roll: f64 = rng.random();
    let mut threshold = config.missing_rate;
    if roll < threshold {
        return Op::Missing;
    }
    threshold += config.tick_rate;
    if roll < threshold {
        return Op::Tick;
    }
    threshold += config.insert_rate;
    if roll < threshold || state.users.is_empty() {
        return Op::Insert(format!("user-{}", rng.random_range(0..1_000_000u32)));
    }
    let user = random_user(state, rng);
    threshold += config.touch_rate;
    if roll < threshold {
        Op::Touch(user)
    } else {
        Op::Select(user)
    }
}

fn random_user(state: &SimState, rng: &mut ChaCha8Rng) -> i64 {
    let idx = rng.random_range(0..state.users.len());
    state.users.keys().nth(idx).copied().unwrap_or(1)
}

fn apply(db: &DataConnector, state: &Shared, op: &Op) -> String {
    let submitted = match op {
        Op::Tick => return format!("delivered {}", db.tick()),
        Op::Missing => {
            return match db.execute("sim.missing", &Args::new()) {
                Err(SqlDispatchError::MissingQuery(_)) => "MissingQuery".to_string(),
                other => {
                    let reason = format!("missing query was accepted: {other:?}");
                    state.borrow_mut().violations.push(reason.clone());
                    reason
                }
            };
        }
        Op::Insert(name) => {
            let name = name.clone();
            submit(db, state, "sim.insert", &Args::new().with("name", name.clone()), move |s, outcome| {
                if let Some(id) = outcome.as_ref().ok().and_then(QueryResult::insert_id) {
                    if s.users.insert(id, name).is_some() {
                        s.violations.push(format!("insert id {id} handed out twice"));
                    }
                }
            })
        }
        Op::Select(user) => {
            let user = *user;
            submit(db, state, "sim.select", &Args::new().with("id", user), move |s, outcome| {
                if let Err(reason) = Oracle::check_select(s, user, outcome) {
                    s.violations.push(reason);
                }
            })
        }
        Op::Touch(user) => submit(db, state, "sim.touch", &Args::new().with("id", *user), |s, outcome| {
            if outcome.as_ref().ok().and_then(QueryResult::affected_rows) == Some(1) {
                s.touches += 1;
            }
        }),
    };

    match submitted {
        Ok(id) => format!("queued {id}"),
        Err(SqlDispatchError::Backpressure(limit)) => {
            state.borrow_mut().rejected += 1;
            db.tick();
            format!("Backpressure({limit})")
        }
        Err(err) => {
            let reason = format!("submit failed: {err}");
            state.borrow_mut().violations.push(reason.clone());
            reason
        }
    }
}

fn submit<F>(
    db: &DataConnector,
    state: &Shared,
    name: &str,
    args: &Args,
    check: F,
) -> Result<QueryId, SqlDispatchError>
where
    F: FnOnce(&mut SimState, &QueryOutcome) + 'static,
{
    let shared = Rc::clone(state);
    let id_slot: Rc<RefCell<Option<QueryId>>> = Rc::new(RefCell::new(None));
    let slot = Rc::clone(&id_slot);
    let id = db.execute_then(name, args, move |outcome| {
        let mut s = shared.borrow_mut();
        if let Some(id) = *slot.borrow() {
            if let Err(reason) = Oracle::delivered(&mut s, id) {
                s.violations.push(reason);
            }
        }
        if outcome.is_err() {
            s.query_errors += 1;
        }
        check(&mut s, &outcome);
    })?;
    *id_slot.borrow_mut() = Some(id);
    state.borrow_mut().submitted.insert(id);
    Ok(id)
}

fn totals(db: &DataConnector) -> Result<(i64, i64), String> {
    let mut handle = db
        .execute_select_one("sim.totals", &Args::new())
        .map_err(|err| format!("totals: {err}"))?;
    db.wait_all();
    let result = handle
        .try_take()
        .ok_or("totals never delivered")?
        .map_err(|err| format!("totals: {err}"))?;
    let row = result.row().ok_or("totals returned no row")?;
    let read = |column: &str| {
        row.get(column)
            .and_then(RowValues::as_int)
            .copied()
            .ok_or_else(|| format!("totals.{column} missing"))
    };
    Ok((read("users")?, read("visits")?))
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
