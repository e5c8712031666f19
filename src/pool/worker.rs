use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::mpsc::Sender;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::connection::{ConnectionFactory, SqlConnection};
use crate::error::SqlDispatchError;

use super::item::{ResultItem, WorkItem};
use super::queue::Popped;
use super::{PoolShared, ReconnectPolicy};

/// One pool thread and the single connection it owns.
pub(super) struct Worker {
    pub(super) index: usize,
    pub(super) factory: Arc<dyn ConnectionFactory>,
    pub(super) shared: Arc<PoolShared>,
    pub(super) results: Sender<ResultItem>,
    pub(super) reconnect: ReconnectPolicy,
}

/// Backoff bookkeeping while the worker has no connection.
///
/// Only the initial connect escalates; after a mid-session loss every retry waits the
/// base delay so a recovered server is picked up promptly.
struct Backoff {
    delay: Duration,
    next_attempt: Instant,
    escalate: bool,
}

impl Worker {
    pub(super) fn spawn(self) -> io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name(format!("sql-worker-{}", self.index))
            .spawn(move || self.run())
    }

    fn run(self) {
        let target = self.factory.describe();
        tracing::debug!(worker = self.index, %target, "connecting");

        let mut conn = match self.factory.connect() {
            Ok(conn) => {
                tracing::info!(worker = self.index, %target, "connected");
                self.shared.report_settled(None);
                Some(conn)
            }
            Err(err) => {
                tracing::warn!(worker = self.index, %target, error = %err, "initial connection failed");
                self.shared.report_settled(Some(&err));
                None
            }
        };
        let mut backoff = self.backoff_from_now(self.reconnect.delay, true);

        loop {
            if let Some(active) = conn.as_mut() {
                let Some(item) = self.shared.queue.pop() else {
                    break;
                };
                let (result, lost) = self.execute(active.as_mut(), item);
                let _ = self.results.send(result);
                if lost {
                    tracing::warn!(worker = self.index, %target, "connection lost; reconnecting");
                    conn = None;
                    backoff = self.backoff_from_now(self.reconnect.delay, false);
                }
                continue;
            }

            let now = Instant::now();
            if now >= backoff.next_attempt {
                if self.shared.queue.is_closed() {
                    break;
                }
                match self.factory.connect() {
                    Ok(fresh) => {
                        tracing::info!(worker = self.index, %target, "reconnected");
                        conn = Some(fresh);
                    }
                    Err(err) => {
                        let delay = if backoff.escalate {
                            self.reconnect.next_delay(backoff.delay)
                        } else {
                            self.reconnect.delay
                        };
                        tracing::warn!(
                            worker = self.index,
                            %target,
                            error = %err,
                            retry_in = ?delay,
                            "reconnect failed"
                        );
                        backoff = self.backoff_from_now(delay, backoff.escalate);
                    }
                }
                continue;
            }

            match self.shared.queue.pop_timeout(backoff.next_attempt - now) {
                Popped::Item(item) => {
                    tracing::debug!(worker = self.index, id = %item.id, "failing query while disconnected");
                    let _ = self.results.send(ResultItem::failed(
                        item.id,
                        SqlDispatchError::ConnectionLost("connection unavailable".into()),
                    ));
                }
                Popped::Timeout => {}
                Popped::Closed => break,
            }
        }

        drop(conn);
        tracing::debug!(worker = self.index, "stopped");
    }

    fn backoff_from_now(&self, delay: Duration, escalate: bool) -> Backoff {
        Backoff {
            delay,
            next_attempt: Instant::now() + delay,
            escalate,
        }
    }

    /// Run every statement of `item`, stopping at the first failure.
    ///
    /// The flag reports whether the connection must be replaced.
    fn execute(&self, conn: &mut dyn SqlConnection, item: WorkItem) -> (ResultItem, bool) {
        let WorkItem {
            id,
            query_name,
            statements,
            shape,
        } = item;
        tracing::trace!(worker = self.index, %id, query = %query_name, "executing");

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            statements
                .iter()
                .map(|statement| conn.execute(statement, shape))
                .collect::<Result<Vec<_>, _>>()
        }));

        match outcome {
            Ok(Ok(results)) => (
                ResultItem {
                    id,
                    outcome: Ok(results),
                },
                false,
            ),
            Ok(Err(err)) => {
                let lost = err.is_connection_loss();
                tracing::debug!(worker = self.index, %id, query = %query_name, error = %err, "query failed");
                (ResultItem::failed(id, err), lost)
            }
            Err(_) => {
                tracing::error!(worker = self.index, %id, query = %query_name, "driver panicked; dropping connection");
                (
                    ResultItem::failed(
                        id,
                        SqlDispatchError::ExecutionError(format!(
                            "worker panicked while running {query_name}"
                        )),
                    ),
                    true,
                )
            }
        }
    }
}
