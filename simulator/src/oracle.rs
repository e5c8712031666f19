use sql_dispatch::{QueryId, QueryOutcome, RowValues};

use crate::model::SimState;

pub(crate) struct Oracle;

impl Oracle {
    /// Every submitted query is delivered exactly once.
    pub(crate) fn delivered(state: &mut SimState, id: QueryId) -> Result<(), String> {
        if !state.submitted.contains(&id) {
            return Err(format!("query {id} delivered but never submitted"));
        }
        if !state.delivered.insert(id) {
            return Err(format!("query {id} delivered twice"));
        }
        Ok(())
    }

    /// Names never change, so a confirmed user must read back as inserted.
    pub(crate) fn check_select(state: &SimState, user: i64, outcome: &QueryOutcome) -> Result<(), String> {
        let Some(expected) = state.users.get(&user) else {
            return Ok(());
        };
        let result = outcome
            .as_ref()
            .map_err(|err| format!("select of user {user} failed: {err}"))?;
        let name = result
            .rows()
            .and_then(|rows| rows.results.first())
            .and_then(|row| row.get("name"))
            .and_then(RowValues::as_text);
        match name {
            Some(name) if name == expected => Ok(()),
            other => Err(format!("user {user}: expected name {expected:?}, read {other:?}")),
        }
    }

    /// Database totals match what the continuations observed.
    pub(crate) fn check_totals(state: &SimState, users: i64, visits: i64) -> Result<(), String> {
        if state.in_flight() != 0 {
            return Err(format!("{} queries never delivered", state.in_flight()));
        }
        let expected_users = i64::try_from(state.users.len()).unwrap_or(i64::MAX);
        if users != expected_users {
            return Err(format!("expected {expected_users} users, table has {users}"));
        }
        let expected_visits = i64::try_from(state.touches).unwrap_or(i64::MAX);
        if visits != expected_visits {
            return Err(format!("expected {expected_visits} visits, table has {visits}"));
        }
        Ok(())
    }
}
