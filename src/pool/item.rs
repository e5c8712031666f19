use crate::error::SqlDispatchError;
use crate::results::QueryResult;
use crate::template::RenderedQuery;
use crate::types::{QueryId, ResultShape};

/// One fully rendered query request waiting for a worker.
///
/// Consumed exactly once: either a worker runs it and answers with a [`ResultItem`], or
/// shutdown hands it back to the submitter.
#[derive(Debug, Clone)]
pub struct WorkItem {
    pub id: QueryId,
    /// Registry name, for logs.
    pub query_name: String,
    /// Run in order on the same connection.
    pub statements: Vec<RenderedQuery>,
    pub shape: ResultShape,
}

/// The answer to one [`WorkItem`], correlated by `id`.
///
/// On success there is one [`QueryResult`] per statement.
#[derive(Debug)]
pub struct ResultItem {
    pub id: QueryId,
    pub outcome: Result<Vec<QueryResult>, SqlDispatchError>,
}

impl ResultItem {
    pub(crate) fn failed(id: QueryId, err: SqlDispatchError) -> Self {
        Self {
            id,
            outcome: Err(err),
        }
    }
}
