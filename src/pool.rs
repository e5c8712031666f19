//! Worker thread pool with a shared send queue and a single receive queue.
//!
//! Each worker is an OS thread owning one connection. The application thread submits
//! [`WorkItem`]s without blocking and later drains [`ResultItem`]s; the two sides never
//! share anything else.

mod item;
mod queue;
mod worker;

use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::{Arc, Condvar, Mutex, OnceLock, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

pub use item::{ResultItem, WorkItem};

use crate::connection::ConnectionFactory;
use crate::error::SqlDispatchError;

use queue::SendQueue;
use worker::Worker;

/// Delay between reconnect attempts.
///
/// A worker whose first connect fails retries after `delay`, doubling up to `max_delay`.
/// A connection lost mid-session is retried every `delay` without escalation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub delay: Duration,
    pub max_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl ReconnectPolicy {
    #[must_use]
    pub fn next_delay(&self, current: Duration) -> Duration {
        current.saturating_mul(2).min(self.max_delay).max(self.delay)
    }
}

/// State shared between the pool handle and its workers.
#[derive(Debug, Default)]
pub(crate) struct PoolShared {
    queue: SendQueue,
    settled: Mutex<usize>,
    settled_cv: Condvar,
    first_error: OnceLock<String>,
}

impl PoolShared {
    /// Called exactly once per worker after its first connection attempt.
    fn report_settled(&self, error: Option<&SqlDispatchError>) {
        if let Some(err) = error {
            let message = match err {
                SqlDispatchError::ConnectionError(message) => message.clone(),
                other => other.to_string(),
            };
            let _ = self.first_error.set(message);
        }
        let mut settled = self.settled.lock().unwrap_or_else(PoisonError::into_inner);
        *settled += 1;
        drop(settled);
        self.settled_cv.notify_all();
    }

    fn settled_count(&self) -> usize {
        *self.settled.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Fixed-size pool of database worker threads.
pub struct SqlThreadPool {
    shared: Arc<PoolShared>,
    results: Receiver<ResultItem>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    worker_count: usize,
}

impl SqlThreadPool {
    /// Spawn `worker_count` workers, each opening its own connection from `factory`.
    ///
    /// Returns as soon as the threads exist; use [`SqlThreadPool::wait_settled`] to
    /// learn whether they connected.
    ///
    /// # Errors
    /// [`SqlDispatchError::ConfigError`] for a zero worker count and
    /// [`SqlDispatchError::ConnectionError`] if a thread cannot be spawned. Workers that
    /// did start are shut down first.
    pub fn create(
        factory: Arc<dyn ConnectionFactory>,
        worker_count: usize,
        reconnect: ReconnectPolicy,
    ) -> Result<Self, SqlDispatchError> {
        if worker_count == 0 {
            return Err(SqlDispatchError::ConfigError(
                "worker count must be at least 1".into(),
            ));
        }

        let shared = Arc::new(PoolShared::default());
        let (sender, results) = mpsc::channel();
        let mut workers = Vec::with_capacity(worker_count);

        for index in 0..worker_count {
            let worker = Worker {
                index,
                factory: Arc::clone(&factory),
                shared: Arc::clone(&shared),
                results: sender.clone(),
                reconnect,
            };
            match worker.spawn() {
                Ok(handle) => workers.push(handle),
                Err(err) => {
                    shared.queue.close();
                    for handle in workers {
                        let _ = handle.join();
                    }
                    return Err(SqlDispatchError::ConnectionError(format!(
                        "cannot spawn worker thread {index}: {err}"
                    )));
                }
            }
        }

        tracing::info!(
            workers = worker_count,
            target = %factory.describe(),
            "thread pool started"
        );
        Ok(Self {
            shared,
            results,
            workers: Mutex::new(workers),
            worker_count,
        })
    }

    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Whether every worker has finished its first connection attempt.
    #[must_use]
    pub fn connections_settled(&self) -> bool {
        self.shared.settled_count() >= self.worker_count
    }

    /// Block until every worker has settled or `timeout` elapses; `true` if settled.
    #[must_use]
    pub fn wait_settled(&self, timeout: Duration) -> bool {
        let guard = self
            .shared
            .settled
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let (guard, _) = self
            .shared
            .settled_cv
            .wait_timeout_while(guard, timeout, |settled| *settled < self.worker_count)
            .unwrap_or_else(PoisonError::into_inner);
        *guard >= self.worker_count
    }

    /// Message of the first failed initial connection, if any.
    #[must_use]
    pub fn first_connection_error(&self) -> Option<&str> {
        self.shared.first_error.get().map(String::as_str)
    }

    /// Queue an item for the next idle worker. Never blocks.
    ///
    /// # Errors
    /// Hands the item back if the pool has been shut down.
    pub fn submit(&self, item: WorkItem) -> Result<(), WorkItem> {
        self.shared.queue.push(item)
    }

    /// Results produced so far, without blocking.
    pub fn drain(&self) -> impl Iterator<Item = ResultItem> + '_ {
        self.results.try_iter()
    }

    /// Wait up to `timeout` for the next result.
    #[must_use]
    pub fn recv_timeout(&self, timeout: Duration) -> Option<ResultItem> {
        match self.results.recv_timeout(timeout) {
            Ok(item) => Some(item),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Items waiting in the send queue.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.shared.queue.len()
    }

    /// Close the send queue, join every worker and return the items never started.
    ///
    /// Workers finish the item they are running, so its result stays drainable.
    /// Calling this again returns an empty list.
    pub fn shutdown(&self) -> Vec<WorkItem> {
        let leftover = self.shared.queue.close();
        let handles = std::mem::take(
            &mut *self.workers.lock().unwrap_or_else(PoisonError::into_inner),
        );
        if handles.is_empty() {
            return leftover;
        }
        tracing::info!(
            workers = handles.len(),
            dropped = leftover.len(),
            "shutting down thread pool"
        );
        for handle in handles {
            let name = handle.thread().name().unwrap_or("sql-worker").to_owned();
            if handle.join().is_err() {
                tracing::error!(worker = %name, "worker thread panicked");
            }
        }
        leftover
    }
}

impl Drop for SqlThreadPool {
    fn drop(&mut self) {
        let leftover = self.shutdown();
        if !leftover.is_empty() {
            tracing::warn!(dropped = leftover.len(), "thread pool dropped with queued work");
        }
    }
}

impl std::fmt::Debug for SqlThreadPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlThreadPool")
            .field("workers", &self.worker_count)
            .field("settled", &self.connections_settled())
            .field("queued", &self.queued())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    use super::*;
    use crate::connection::SqlConnection;
    use crate::results::QueryResult;
    use crate::template::RenderedQuery;
    use crate::types::{Dialect, QueryId, ResultShape};

    /// Answers every statement with `Change { affected_rows: <param count> }`.
    struct EchoConnection;

    impl SqlConnection for EchoConnection {
        fn execute(
            &mut self,
            query: &RenderedQuery,
            _shape: ResultShape,
        ) -> Result<QueryResult, SqlDispatchError> {
            if query.sql == "lose" {
                return Err(SqlDispatchError::ConnectionLost("gone".into()));
            }
            Ok(QueryResult::Change {
                affected_rows: query.params.len() as u64,
            })
        }
    }

    /// Fails the connection attempts whose ordinal is listed in `fail_on`.
    struct ScriptedFactory {
        attempts: AtomicUsize,
        fail_on: Vec<usize>,
    }

    impl ScriptedFactory {
        fn new(fail_on: Vec<usize>) -> Arc<Self> {
            Arc::new(Self {
                attempts: AtomicUsize::new(0),
                fail_on,
            })
        }
    }

    impl ConnectionFactory for ScriptedFactory {
        fn dialect(&self) -> Dialect {
            Dialect::Sqlite
        }

        fn describe(&self) -> String {
            "scripted".into()
        }

        fn connect(&self) -> Result<Box<dyn SqlConnection>, SqlDispatchError> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
            if self.fail_on.contains(&attempt) {
                Err(SqlDispatchError::ConnectionError(format!("attempt {attempt} refused")))
            } else {
                Ok(Box::new(EchoConnection))
            }
        }
    }

    fn item(id: u64, sql: &str) -> WorkItem {
        WorkItem {
            id: QueryId(id),
            query_name: "test".into(),
            statements: vec![RenderedQuery {
                sql: sql.into(),
                params: Vec::new(),
            }],
            shape: ResultShape::AffectedRows,
        }
    }

    fn fast_reconnect() -> ReconnectPolicy {
        ReconnectPolicy {
            delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(20),
        }
    }

    #[test]
    fn backoff_doubles_up_to_cap() {
        let policy = ReconnectPolicy {
            delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
        };
        assert_eq!(policy.next_delay(Duration::from_millis(100)), Duration::from_millis(200));
        assert_eq!(policy.next_delay(Duration::from_millis(200)), Duration::from_millis(350));
        assert_eq!(policy.next_delay(Duration::from_millis(350)), Duration::from_millis(350));
    }

    #[test]
    fn zero_workers_rejected() {
        let err = SqlThreadPool::create(ScriptedFactory::new(vec![]), 0, fast_reconnect())
            .unwrap_err();
        assert!(matches!(err, SqlDispatchError::ConfigError(_)));
    }

    #[test]
    fn every_item_answered_once() {
        let pool =
            SqlThreadPool::create(ScriptedFactory::new(vec![]), 3, fast_reconnect()).unwrap();
        assert!(pool.wait_settled(Duration::from_secs(5)));
        assert!(pool.first_connection_error().is_none());

        for id in 1..=30 {
            pool.submit(item(id, "ok")).unwrap();
        }
        let mut seen = Vec::new();
        while seen.len() < 30 {
            let result = pool
                .recv_timeout(Duration::from_secs(5))
                .expect("result within timeout");
            assert!(result.outcome.is_ok());
            seen.push(result.id.get());
        }
        seen.sort_unstable();
        assert_eq!(seen, (1..=30).collect::<Vec<_>>());
        assert!(pool.drain().next().is_none());
        assert!(pool.shutdown().is_empty());
    }

    #[test]
    fn initial_failure_is_recorded_and_worker_recovers() {
        let pool =
            SqlThreadPool::create(ScriptedFactory::new(vec![0]), 1, fast_reconnect()).unwrap();
        assert!(pool.wait_settled(Duration::from_secs(5)));
        assert_eq!(pool.first_connection_error(), Some("attempt 0 refused"));

        // Keep submitting until the worker is back; items caught mid-outage fail fast.
        let mut id = 0;
        loop {
            id += 1;
            pool.submit(item(id, "ok")).unwrap();
            let result = pool.recv_timeout(Duration::from_secs(5)).unwrap();
            match result.outcome {
                Ok(_) => break,
                Err(err) => assert!(matches!(err, SqlDispatchError::ConnectionLost(_))),
            }
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn lost_connection_is_replaced() {
        let factory = ScriptedFactory::new(vec![]);
        let pool = SqlThreadPool::create(factory.clone(), 1, fast_reconnect()).unwrap();
        assert!(pool.wait_settled(Duration::from_secs(5)));

        pool.submit(item(1, "lose")).unwrap();
        let lost = pool.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(lost.outcome.unwrap_err().is_connection_loss());

        std::thread::sleep(Duration::from_millis(50));
        pool.submit(item(2, "ok")).unwrap();
        let recovered = pool.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(recovered.outcome.is_ok());
        assert_eq!(factory.attempts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn mid_session_reconnect_does_not_escalate() {
        // First connect succeeds, the next six fail, then the target is back.
        let factory = ScriptedFactory::new((1..=6).collect());
        let policy = ReconnectPolicy {
            delay: Duration::from_millis(10),
            max_delay: Duration::from_secs(10),
        };
        let pool = SqlThreadPool::create(factory.clone(), 1, policy).unwrap();
        assert!(pool.wait_settled(Duration::from_secs(5)));

        pool.submit(item(1, "lose")).unwrap();
        assert!(pool.recv_timeout(Duration::from_secs(5)).is_some());

        // Doubling would put the seventh attempt more than a second out.
        let deadline = Instant::now() + Duration::from_millis(500);
        while factory.attempts.load(Ordering::SeqCst) < 8 {
            assert!(Instant::now() < deadline, "reconnect attempts escalated");
            std::thread::sleep(Duration::from_millis(5));
        }
        pool.submit(item(2, "ok")).unwrap();
        let recovered = pool.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(recovered.outcome.is_ok());
    }

    #[test]
    fn submit_after_shutdown_hands_item_back() {
        let pool =
            SqlThreadPool::create(ScriptedFactory::new(vec![]), 2, fast_reconnect()).unwrap();
        assert!(pool.wait_settled(Duration::from_secs(5)));
        pool.shutdown();
        assert!(pool.shutdown().is_empty());
        let rejected = pool.submit(item(7, "ok")).unwrap_err();
        assert_eq!(rejected.id.get(), 7);
    }
}
