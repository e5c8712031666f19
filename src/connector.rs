//! Application-facing façade: named queries in, correlated results out.
//!
//! `DataConnector` lives on the host's application thread. `execute*` renders a
//! registered template and queues it; [`DataConnector::tick`] drains finished work and
//! completes the matching [`QueryHandle`] or runs the registered continuation.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::sync::oneshot;

use crate::error::SqlDispatchError;
use crate::pool::{ResultItem, SqlThreadPool, WorkItem};
use crate::results::QueryResult;
use crate::template::{Args, TemplateRegistry, TemplateSource};
use crate::types::{Dialect, QueryId, ResultShape};

/// Outcome of one query as delivered to the host.
pub type QueryOutcome = Result<QueryResult, SqlDispatchError>;

/// Callback run on the application thread inside [`DataConnector::tick`].
pub type Continuation = Box<dyn FnOnce(QueryOutcome)>;

/// How `wait_all` slices its blocking receive.
const WAIT_SLICE: Duration = Duration::from_millis(100);

enum Completion {
    Handle(oneshot::Sender<QueryOutcome>),
    Callback(Continuation),
}

struct PendingQuery {
    query_name: String,
    batch: bool,
    completion: Completion,
}

impl PendingQuery {
    fn complete(self, outcome: QueryOutcome) {
        match self.completion {
            // The host may have dropped the handle; nothing is waiting then.
            Completion::Handle(sender) => {
                let _ = sender.send(outcome);
            }
            Completion::Callback(callback) => callback(outcome),
        }
    }
}

/// Resolves once the tick that delivers its result has run.
///
/// Await it from async hosts or poll it with [`QueryHandle::try_take`].
#[derive(Debug)]
pub struct QueryHandle {
    id: QueryId,
    rx: oneshot::Receiver<QueryOutcome>,
}

impl QueryHandle {
    #[must_use]
    pub fn id(&self) -> QueryId {
        self.id
    }

    /// Take the outcome if it has been delivered.
    ///
    /// Yields the outcome once; later calls report [`SqlDispatchError::ShutDown`].
    pub fn try_take(&mut self) -> Option<QueryOutcome> {
        match self.rx.try_recv() {
            Ok(outcome) => Some(outcome),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(SqlDispatchError::ShutDown)),
        }
    }
}

impl Future for QueryHandle {
    type Output = QueryOutcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            Poll::Ready(Err(_)) => Poll::Ready(Err(SqlDispatchError::ShutDown)),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Runs named queries on a worker pool and hands results back on [`DataConnector::tick`].
///
/// Not `Sync`: all methods are meant for the single application thread. Methods take
/// `&self` so continuations holding an `Rc<DataConnector>` may queue follow-up queries.
pub struct DataConnector {
    dialect: Dialect,
    pool: SqlThreadPool,
    registry: TemplateRegistry,
    pending: RefCell<HashMap<QueryId, PendingQuery>>,
    /// Results drained from the pool but not yet delivered.
    ready: RefCell<VecDeque<ResultItem>>,
    next_id: Cell<u64>,
    log_queries: Cell<bool>,
    closed: Cell<bool>,
    max_in_flight: Option<usize>,
}

impl DataConnector {
    /// Wrap a running pool. [`crate::create`] is the usual way in.
    #[must_use]
    pub fn new(
        dialect: Dialect,
        pool: SqlThreadPool,
        registry: TemplateRegistry,
        max_in_flight: Option<usize>,
    ) -> Self {
        Self {
            dialect,
            pool,
            registry,
            pending: RefCell::new(HashMap::new()),
            ready: RefCell::new(VecDeque::new()),
            next_id: Cell::new(1),
            log_queries: Cell::new(false),
            closed: Cell::new(false),
            max_in_flight,
        }
    }

    #[must_use]
    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Queries registered for the active dialect, sorted.
    #[must_use]
    pub fn query_names(&self) -> Vec<&str> {
        self.registry.names(self.dialect)
    }

    #[must_use]
    pub fn registry(&self) -> &TemplateRegistry {
        &self.registry
    }

    /// Queries submitted and not yet delivered.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.borrow().len()
    }

    /// Queries not yet picked up by a worker.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.pool.queued()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.get()
    }

    /// Log every submitted query at `debug`, with its id and SQL.
    pub fn set_logging_enabled(&self, enabled: bool) {
        self.log_queries.set(enabled);
    }

    /// Parse `source` and register its queries for the active dialect.
    ///
    /// # Errors
    /// [`SqlDispatchError::MalformedTemplate`] if the file does not parse; nothing from it
    /// is registered then.
    pub fn load_query_file(&mut self, source: &TemplateSource) -> Result<usize, SqlDispatchError> {
        self.registry.load(source, self.dialect)
    }

    /// Run `name`, choosing the result shape from the statement's leading keyword.
    ///
    /// # Errors
    /// Fails without queueing anything for an unknown query, missing or ill-typed
    /// arguments, a full in-flight window, or a closed connector.
    pub fn execute(&self, name: &str, args: &Args) -> Result<QueryHandle, SqlDispatchError> {
        self.submit_with_handle(name, args, None, false)
    }

    /// Run `name` and discard whatever it returns.
    ///
    /// # Errors
    /// As [`DataConnector::execute`].
    pub fn execute_generic(&self, name: &str, args: &Args) -> Result<QueryHandle, SqlDispatchError> {
        self.execute_with_shape(name, args, ResultShape::None)
    }

    /// Run `name` and report the affected row count.
    ///
    /// # Errors
    /// As [`DataConnector::execute`].
    pub fn execute_change(&self, name: &str, args: &Args) -> Result<QueryHandle, SqlDispatchError> {
        self.execute_with_shape(name, args, ResultShape::AffectedRows)
    }

    /// Run `name` and report the generated row id.
    ///
    /// # Errors
    /// As [`DataConnector::execute`].
    pub fn execute_insert(&self, name: &str, args: &Args) -> Result<QueryHandle, SqlDispatchError> {
        self.execute_with_shape(name, args, ResultShape::InsertId)
    }

    /// Run `name` and collect every row.
    ///
    /// # Errors
    /// As [`DataConnector::execute`].
    pub fn execute_select(&self, name: &str, args: &Args) -> Result<QueryHandle, SqlDispatchError> {
        self.execute_with_shape(name, args, ResultShape::Rows)
    }

    /// Run `name` and keep only the first row.
    ///
    /// # Errors
    /// As [`DataConnector::execute`].
    pub fn execute_select_one(
        &self,
        name: &str,
        args: &Args,
    ) -> Result<QueryHandle, SqlDispatchError> {
        self.execute_with_shape(name, args, ResultShape::SingleRow)
    }

    /// # Errors
    /// As [`DataConnector::execute`].
    pub fn execute_with_shape(
        &self,
        name: &str,
        args: &Args,
        shape: ResultShape,
    ) -> Result<QueryHandle, SqlDispatchError> {
        self.submit_with_handle(name, args, Some(shape), false)
    }

    /// Run every statement of `name` in order on one worker.
    ///
    /// Resolves to [`QueryResult::Batch`] with one entry per statement.
    ///
    /// # Errors
    /// As [`DataConnector::execute`].
    pub fn execute_multi(
        &self,
        name: &str,
        args: &Args,
        shape: ResultShape,
    ) -> Result<QueryHandle, SqlDispatchError> {
        self.submit_with_handle(name, args, Some(shape), true)
    }

    /// Run `name` and call `continuation` with the outcome during a later tick.
    ///
    /// # Errors
    /// As [`DataConnector::execute`]; the continuation is dropped uncalled then.
    pub fn execute_then<F>(
        &self,
        name: &str,
        args: &Args,
        continuation: F,
    ) -> Result<QueryId, SqlDispatchError>
    where
        F: FnOnce(QueryOutcome) + 'static,
    {
        let item = self.prepare(name, args, None, false)?;
        self.enqueue(item, false, Completion::Callback(Box::new(continuation)))
    }

    fn submit_with_handle(
        &self,
        name: &str,
        args: &Args,
        shape: Option<ResultShape>,
        batch: bool,
    ) -> Result<QueryHandle, SqlDispatchError> {
        let item = self.prepare(name, args, shape, batch)?;
        let (tx, rx) = oneshot::channel();
        let id = self.enqueue(item, batch, Completion::Handle(tx))?;
        Ok(QueryHandle { id, rx })
    }

    fn prepare(
        &self,
        name: &str,
        args: &Args,
        shape: Option<ResultShape>,
        batch: bool,
    ) -> Result<WorkItem, SqlDispatchError> {
        if self.closed.get() {
            return Err(SqlDispatchError::ShutDown);
        }
        if let Some(limit) = self.max_in_flight {
            if self.pending_count() >= limit {
                return Err(SqlDispatchError::Backpressure(limit));
            }
        }

        let template = self
            .registry
            .get(self.dialect, name)
            .ok_or_else(|| SqlDispatchError::MissingQuery(name.to_owned()))?;
        let statements = template.render(args)?;
        if !batch && statements.len() > 1 {
            return Err(SqlDispatchError::ExecutionError(format!(
                "query {name} has {} statements; run it with execute_multi",
                statements.len()
            )));
        }
        let shape = shape.unwrap_or_else(|| {
            statements
                .first()
                .map_or(ResultShape::None, |statement| ResultShape::infer(&statement.sql))
        });

        let id = QueryId(self.next_id.get());
        self.next_id.set(id.0 + 1);
        Ok(WorkItem {
            id,
            query_name: name.to_owned(),
            statements,
            shape,
        })
    }

    fn enqueue(
        &self,
        item: WorkItem,
        batch: bool,
        completion: Completion,
    ) -> Result<QueryId, SqlDispatchError> {
        let id = item.id;
        let query_name = item.query_name.clone();
        if self.log_queries.get() {
            for statement in &item.statements {
                tracing::debug!(%id, query = %query_name, sql = %statement.sql, "submitting query");
            }
        }
        if self.pool.submit(item).is_err() {
            return Err(SqlDispatchError::ShutDown);
        }
        self.pending.borrow_mut().insert(
            id,
            PendingQuery {
                query_name,
                batch,
                completion,
            },
        );
        Ok(id)
    }

    /// Deliver every result produced since the last tick. Never blocks.
    ///
    /// Returns how many pending queries were completed. Continuations run here, on the
    /// calling thread, and may queue further queries.
    pub fn tick(&self) -> usize {
        self.ready.borrow_mut().extend(self.pool.drain());
        let mut delivered = 0;
        // One item at a time: a continuation that closes the connector delivers the rest.
        loop {
            let next = self.ready.borrow_mut().pop_front();
            let Some(item) = next else {
                break;
            };
            if self.deliver_item(item) {
                delivered += 1;
            }
        }
        delivered
    }

    /// Block until no query is pending, delivering results as they arrive.
    ///
    /// Returns how many were delivered.
    pub fn wait_all(&self) -> usize {
        let mut delivered = self.tick();
        while self.pending_count() > 0 {
            if let Some(item) = self.pool.recv_timeout(WAIT_SLICE) {
                delivered += usize::from(self.deliver_item(item));
            }
            delivered += self.tick();
        }
        delivered
    }

    /// Shut the pool down and resolve everything still pending.
    ///
    /// Results already produced are delivered normally; queries that never ran resolve
    /// with [`SqlDispatchError::ShutDown`]. Safe to call more than once.
    pub fn close(&self) {
        if self.closed.replace(true) {
            return;
        }
        let dropped = self.pool.shutdown();
        let delivered = self.tick();
        let leftover: Vec<PendingQuery> = self
            .pending
            .borrow_mut()
            .drain()
            .map(|(_, pending)| pending)
            .collect();
        tracing::info!(
            delivered,
            never_started = dropped.len(),
            cancelled = leftover.len(),
            "connector closed"
        );
        for pending in leftover {
            tracing::debug!(query = %pending.query_name, "resolving pending query at shutdown");
            pending.complete(Err(SqlDispatchError::ShutDown));
        }
    }

    fn deliver_item(&self, item: ResultItem) -> bool {
        let ResultItem { id, outcome } = item;
        // Release the table borrow before completing, continuations may re-enter.
        let entry = self.pending.borrow_mut().remove(&id);
        let Some(pending) = entry else {
            tracing::warn!(%id, "result for unknown query id");
            return false;
        };
        let outcome = outcome.map(|mut results| {
            if pending.batch {
                QueryResult::Batch(results)
            } else if results.is_empty() {
                QueryResult::Generic
            } else {
                results.swap_remove(0)
            }
        });
        if let Err(err) = &outcome {
            tracing::debug!(%id, query = %pending.query_name, error = %err, "query failed");
        }
        pending.complete(outcome);
        true
    }
}

impl Drop for DataConnector {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for DataConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataConnector")
            .field("dialect", &self.dialect)
            .field("pool", &self.pool)
            .field("queries", &self.registry.len())
            .field("pending", &self.pending_count())
            .field("closed", &self.closed.get())
            .finish_non_exhaustive()
    }
}
