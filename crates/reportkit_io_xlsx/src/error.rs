//! Report engine error taxonomy.

use thiserror::Error;

/// Errors returned by every public report operation.
///
/// Propagation is fail-fast: nothing is retried internally, and a failure in
/// the middle of a stream leaves the destination unusable.
#[derive(Debug, Error)]
pub enum ReportError {
    /// Malformed declarative document or template (empty input, duplicate ids).
    #[error("config error: {0}")]
    Config(String),
    /// Data bound to an unknown section, or a stream write out of order.
    #[error("binding error: {0}")]
    Binding(String),
    /// Cross-section reference or formatter that cannot be resolved.
    #[error("resolution error: {0}")]
    Resolution(String),
    /// Position cannot be parsed or placed within worksheet limits.
    #[error("layout error: {0}")]
    Layout(String),
    /// Underlying file/writer failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Workbook assembly or serialization failure.
    #[error("xlsx write error: {0}")]
    Xlsx(#[from] rust_xlsxwriter::XlsxError),
    /// CSV export failure.
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    /// DataFrame access failure while binding tabular data.
    #[error("dataframe error: {0}")]
    DataFrame(#[from] polars::error::PolarsError),
}

/// Convenience alias for results returned by this crate.
pub type Result<T> = std::result::Result<T, ReportError>;
