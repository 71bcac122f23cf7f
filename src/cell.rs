use crate::formula::{Formula, FormulaError, FormulaFormatError};

/// What a cell holds, as entered
#[derive(Clone, Debug, PartialEq)]
pub enum CellContents {
    Text(String),
    Number(f64),
    Formula(Formula),
}

impl CellContents {
    /// Contents of a cell that was never assigned
    pub fn empty() -> Self {
        CellContents::Text(String::new())
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, CellContents::Text(s) if s.is_empty())
    }

    /// Rendering used by the saved document: raw text, the decimal number,
    /// or `=` followed by the canonical formula.
    pub fn string_form(&self) -> String {
        match self {
            CellContents::Text(s) => s.clone(),
            CellContents::Number(n) => n.to_string(),
            CellContents::Formula(f) => format!("={}", f),
        }
    }
}

/// What a cell evaluates to
#[derive(Clone, Debug, PartialEq)]
pub enum CellValue {
    Text(String),
    Number(f64),
    Error(FormulaError),
}

impl CellValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            CellValue::Number(n) => Some(*n),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Cell {
    pub(crate) contents: CellContents,
    pub(crate) value: CellValue,
}

impl Cell {
    pub(crate) fn new(contents: CellContents, value: CellValue) -> Self {
        Cell { contents, value }
    }

    pub(crate) fn formula(&self) -> Option<&Formula> {
        match &self.contents {
            CellContents::Formula(f) => Some(f),
            _ => None,
        }
    }
}

/// Parse raw input into cell contents.
///
/// Anything that reads as a finite number is a number, input starting with
/// `=` is a formula over the rest, and everything else is text.
pub fn parse_input(
    input: &str,
    normalize: &dyn Fn(&str) -> String,
    is_valid: &dyn Fn(&str) -> bool,
) -> Result<CellContents, FormulaFormatError> {
    let trimmed = input.trim();

    if let Ok(n) = trimmed.parse::<f64>() {
        if n.is_finite() {
            return Ok(CellContents::Number(n));
        }
    }

    if let Some(expr) = input.strip_prefix('=') {
        return Formula::parse_with(expr, normalize, is_valid).map(CellContents::Formula);
    }

    Ok(CellContents::Text(input.to_string()))
}
