use std::collections::{BTreeMap, HashSet};

use sql_dispatch::QueryId;

pub(crate) const SIM_SQL: &str = "-- #!sqlite
-- #{ sim
-- #  { init
CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    visits INTEGER NOT NULL DEFAULT 0
);
-- #  }
-- #  { insert
-- #    :name string
INSERT INTO users (name) VALUES (:name);
-- #  }
-- #  { select
-- #    :id int
SELECT name, visits FROM users WHERE id = :id;
-- #  }
-- #  { touch
-- #    :id int
UPDATE users SET visits = visits + 1 WHERE id = :id;
-- #  }
-- #  { totals
SELECT COUNT(*) AS users, COALESCE(SUM(visits), 0) AS visits FROM users;
-- #  }
-- #}
";

#[derive(Debug, Clone)]
pub(crate) enum Op {
    Insert(String),
    Select(i64),
    Touch(i64),
    Missing,
    Tick,
}

/// What the host has observed so far; updated from continuations.
#[derive(Debug, Default)]
pub(crate) struct SimState {
    pub(crate) submitted: HashSet<QueryId>,
    pub(crate) delivered: HashSet<QueryId>,
    /// Users whose insert has been confirmed, by row id
    pub(crate) users: BTreeMap<i64, String>,
    pub(crate) touches: u64,
    pub(crate) query_errors: u64,
    pub(crate) rejected: u64,
    pub(crate) violations: Vec<String>,
}

impl SimState {
    pub(crate) fn in_flight(&self) -> usize {
        self.submitted.len() - self.delivered.len()
    }
}
