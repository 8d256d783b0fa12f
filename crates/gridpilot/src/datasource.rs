//! Tabular data source contract.
//!
//! The engine reads rows and writes per-row status through this trait; the
//! spreadsheet file format, column mapping, and persistence are the
//! implementation's concern. Status writes are expected to be durable when
//! the call returns — the engine persists each row's outcome immediately
//! after the row finishes, so a crash after row K leaves rows ≤ K recorded.

use async_trait::async_trait;

use crate::error::DataSourceError;
use crate::vars::RowBindings;

/// Persisted status label for a successfully completed row. Rows carrying
/// any other label (or none) count as incomplete.
pub const STATUS_COMPLETE: &str = "complete";

#[async_trait]
pub trait ExcelDataSource: Send + Sync {
    async fn row_count(&self) -> Result<usize, DataSourceError>;

    /// Returns the row's cells keyed by column name.
    async fn get_row(&self, index: usize) -> Result<RowBindings, DataSourceError>;

    /// Returns the row's persisted status label, empty if never processed.
    async fn get_status(&self, index: usize) -> Result<String, DataSourceError>;

    async fn set_status(&self, index: usize, status: &str) -> Result<(), DataSourceError>;

    async fn columns(&self) -> Result<Vec<String>, DataSourceError>;
}
