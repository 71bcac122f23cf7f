use thiserror::Error;

use crate::formula::FormulaFormatError;

#[derive(Debug, Error)]
pub enum SpreadsheetError {
    #[error("invalid cell name '{0}'")]
    InvalidName(String),

    #[error("invalid formula: {0}")]
    FormulaFormat(#[from] FormulaFormatError),

    /// Carries the cell whose edit was rejected
    #[error("circular reference through cell '{0}'")]
    Circular(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed spreadsheet document: {0}")]
    Json(#[from] serde_json::Error),

    #[error("version mismatch: expected '{expected}', found '{found}'")]
    VersionMismatch { expected: String, found: String },

    #[error("cannot load cell '{cell}': {source}")]
    Load {
        cell: String,
        #[source]
        source: Box<SpreadsheetError>,
    },
}
