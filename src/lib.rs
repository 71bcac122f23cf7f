//! Spreadsheet evaluation engine.
//!
//! A [`Spreadsheet`] maps cell names to text, numbers or formulas. Formulas
//! are arithmetic expressions over `+ - * /`, parentheses, numbers and other
//! cells. Each edit recalculates every cell that depends on the edited one,
//! in dependency order, and edits that would form a circular reference are
//! rejected with no effect.
//!
//! ```
//! use sheetcalc::{CellValue, Spreadsheet};
//!
//! let mut sheet = Spreadsheet::default();
//! sheet.set_contents_of_cell("A1", "2").unwrap();
//! sheet.set_contents_of_cell("B1", "=A1 * (3 + 4)").unwrap();
//! assert_eq!(sheet.get_cell_value("B1").unwrap(), CellValue::Number(14.0));
//! ```

mod cell;
mod document;
mod engine;
mod error;
mod formula;
mod graph;
mod sheet;

pub use cell::{parse_input, CellContents, CellValue};
pub use document::saved_version;
pub use error::SpreadsheetError;
pub use formula::{is_variable_syntax, Formula, FormulaError, FormulaFormatError};
pub use graph::DependencyGraph;
pub use sheet::{Normalizer, Spreadsheet, Validator, DEFAULT_VERSION};
