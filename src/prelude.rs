//! Convenient imports for common functionality.
//!
//! This module re-exports the types most hosts need to create a connector and run
//! queries.

pub use crate::builder::{SqlMap, create};
pub use crate::config::{ConnectorOptions, DeploymentMode};
pub use crate::connector::{DataConnector, QueryHandle, QueryOutcome};
pub use crate::error::SqlDispatchError;
pub use crate::pool::ReconnectPolicy;
pub use crate::results::{CustomDbRow, QueryResult, ResultSet};
pub use crate::template::{ArgValue, Args, TemplateSource};
pub use crate::types::{Dialect, QueryId, ResultShape, RowValues};
