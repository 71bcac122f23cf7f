use std::collections::HashSet;

use indexmap::{IndexMap, IndexSet};
use log::{debug, trace, warn};

use crate::cell::{self, Cell, CellContents, CellValue};
use crate::error::SpreadsheetError;
use crate::formula::is_variable_syntax;
use crate::graph::DependencyGraph;

/// Decides whether a normalized cell name is acceptable
pub type Validator = Box<dyn Fn(&str) -> bool>;
/// Maps a cell name to the form used for identity
pub type Normalizer = Box<dyn Fn(&str) -> String>;

pub const DEFAULT_VERSION: &str = "default";

/// A sparse sheet of named cells with automatic recalculation.
///
/// Every successful edit recomputes the edited cell and everything that
/// depends on it, directly or transitively, before returning. Edits that
/// would create a circular reference are rejected and leave the sheet
/// exactly as it was.
pub struct Spreadsheet {
    cells: IndexMap<String, Cell>,
    graph: DependencyGraph,
    is_valid: Validator,
    normalize: Normalizer,
    version: String,
    changed: bool,
}

impl Default for Spreadsheet {
    fn default() -> Self {
        Spreadsheet::new(
            Box::new(|_: &str| true),
            Box::new(|name: &str| name.to_string()),
            DEFAULT_VERSION,
        )
    }
}

impl Spreadsheet {
    pub fn new(is_valid: Validator, normalize: Normalizer, version: impl Into<String>) -> Self {
        Spreadsheet {
            cells: IndexMap::new(),
            graph: DependencyGraph::new(),
            is_valid,
            normalize,
            version: version.into(),
            changed: false,
        }
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// True if the sheet was modified since it was created, loaded or saved
    pub fn changed(&self) -> bool {
        self.changed
    }

    pub fn get_cell_contents(&self, name: &str) -> Result<CellContents, SpreadsheetError> {
        let name = self.normalize_name(name)?;
        Ok(self
            .cells
            .get(&name)
            .map(|cell| cell.contents.clone())
            .unwrap_or_else(CellContents::empty))
    }

    pub fn get_cell_value(&self, name: &str) -> Result<CellValue, SpreadsheetError> {
        let name = self.normalize_name(name)?;
        Ok(self
            .cells
            .get(&name)
            .map(|cell| cell.value.clone())
            .unwrap_or_else(|| CellValue::Text(String::new())))
    }

    /// Names of all non-empty cells, in order of first assignment
    pub fn get_names_of_all_nonempty_cells(&self) -> Vec<String> {
        self.cells.keys().cloned().collect()
    }

    /// Cells whose formulas reference `name` directly
    pub fn direct_dependents(&self, name: &str) -> Result<Vec<String>, SpreadsheetError> {
        let name = self.normalize_name(name)?;
        Ok(self.graph.dependents(&name).map(str::to_string).collect())
    }

    /// Set a cell from raw input and recalculate.
    ///
    /// Returns the edited cell followed by every cell that depends on it,
    /// each listed after all the cells it depends on. Setting an empty
    /// string clears the cell.
    pub fn set_contents_of_cell(
        &mut self,
        name: &str,
        input: &str,
    ) -> Result<Vec<String>, SpreadsheetError> {
        let name = self.normalize_name(name)?;
        let contents = cell::parse_input(input, &*self.normalize, &*self.is_valid)?;

        if contents.is_empty() && !self.cells.contains_key(&name) {
            return Ok(Vec::new());
        }

        let dependees = match &contents {
            CellContents::Formula(f) => f.variables(),
            _ => IndexSet::new(),
        };

        // Nothing is written until the new edges are known to be acyclic.
        let order = self.recompute_order(&name, &dependees).inspect_err(|_| {
            warn!("rejected edit of {}: circular reference", name);
        })?;

        let altered = match self.cells.get(&name) {
            Some(cell) => cell.contents != contents,
            None => true,
        };

        self.graph.replace_dependees(&name, &dependees);
        if contents.is_empty() {
            self.cells.shift_remove(&name);
        } else {
            let value = self.evaluate(&contents);
            self.cells.insert(name.clone(), Cell::new(contents, value));
        }
        if altered {
            self.changed = true;
        }

        debug!("set {}, recalculating {:?}", name, order);
        // The edited cell heads the order and was evaluated on insert.
        self.recalculate(&order[1..]);
        Ok(order)
    }

    pub(crate) fn cells(&self) -> &IndexMap<String, Cell> {
        &self.cells
    }

    pub(crate) fn mark_saved(&mut self) {
        self.changed = false;
    }

    fn normalize_name(&self, name: &str) -> Result<String, SpreadsheetError> {
        let normalized = (self.normalize)(name);
        if is_variable_syntax(&normalized) && (self.is_valid)(&normalized) {
            Ok(normalized)
        } else {
            Err(SpreadsheetError::InvalidName(name.to_string()))
        }
    }

    /// Value of a cell as seen by formulas. Only numbers resolve.
    fn lookup(&self, name: &str) -> Option<f64> {
        self.cells.get(name).and_then(|cell| cell.value.as_number())
    }

    fn evaluate(&self, contents: &CellContents) -> CellValue {
        match contents {
            CellContents::Text(s) => CellValue::Text(s.clone()),
            CellContents::Number(n) => CellValue::Number(*n),
            CellContents::Formula(formula) => match formula.evaluate(|var| self.lookup(var)) {
                Ok(n) => CellValue::Number(n),
                Err(e) => CellValue::Error(e),
            },
        }
    }

    /// Direct dependents of `node` as they will be once `name` depends on
    /// exactly `staged`.
    fn staged_dependents(
        &self,
        node: &str,
        name: &str,
        staged: &IndexSet<String>,
    ) -> Vec<String> {
        let mut next: Vec<String> = self
            .graph
            .dependents(node)
            .filter(|t| *t != name)
            .map(str::to_string)
            .collect();
        if staged.contains(node) {
            next.push(name.to_string());
        }
        next
    }

    /// `name` and all its transitive dependents in evaluation order.
    ///
    /// Depth-first over the staged edges with an explicit stack, so long
    /// chains do not grow the call stack. A dependent that is still on the
    /// current path closes a cycle.
    fn recompute_order(
        &self,
        name: &str,
        staged: &IndexSet<String>,
    ) -> Result<Vec<String>, SpreadsheetError> {
        let mut visited = HashSet::new();
        let mut path = HashSet::new();
        let mut order = Vec::new();

        visited.insert(name.to_string());
        path.insert(name.to_string());
        let mut stack = vec![(
            name.to_string(),
            self.staged_dependents(name, name, staged).into_iter(),
        )];

        loop {
            let next = match stack.last_mut() {
                Some((_, remaining)) => remaining.next(),
                None => break,
            };
            match next {
                Some(next) => {
                    if path.contains(&next) {
                        return Err(SpreadsheetError::Circular(name.to_string()));
                    }
                    if visited.insert(next.clone()) {
                        path.insert(next.clone());
                        let remaining = self.staged_dependents(&next, name, staged).into_iter();
                        stack.push((next, remaining));
                    }
                }
                None => {
                    if let Some((node, _)) = stack.pop() {
                        path.remove(&node);
                        order.push(node);
                    }
                }
            }
        }

        order.reverse();
        Ok(order)
    }

    fn recalculate(&mut self, order: &[String]) {
        for name in order {
            let value = match self.cells.get(name) {
                Some(cell) if cell.formula().is_some() => self.evaluate(&cell.contents),
                _ => continue,
            };
            trace!("{} = {:?}", name, value);
            if let Some(cell) = self.cells.get_mut(name) {
                cell.value = value;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formula::{Formula, FormulaError, FormulaFormatError};

    fn upper_sheet() -> Spreadsheet {
        Spreadsheet::new(
            Box::new(|name: &str| name.len() <= 3),
            Box::new(|name: &str| name.to_uppercase()),
            "v1",
        )
    }

    fn number(sheet: &Spreadsheet, name: &str) -> f64 {
        match sheet.get_cell_value(name).unwrap() {
            CellValue::Number(n) => n,
            other => panic!("{} is not a number: {:?}", name, other),
        }
    }

    /// Every cell in `order` comes after the cells it depends on.
    fn assert_topological(sheet: &Spreadsheet, order: &[String]) {
        for (i, name) in order.iter().enumerate() {
            for dependee in sheet.graph.dependees(name) {
                if let Some(j) = order.iter().position(|n| n == dependee) {
                    assert!(j < i, "{} evaluated before its dependee {}", name, dependee);
                }
            }
        }
    }

    #[test]
    fn test_literal_contents() {
        let mut sheet = Spreadsheet::default();
        assert_eq!(sheet.set_contents_of_cell("A1", "2.5").unwrap(), vec!["A1"]);
        sheet.set_contents_of_cell("B1", "hello").unwrap();
        assert_eq!(sheet.get_cell_contents("A1").unwrap(), CellContents::Number(2.5));
        assert_eq!(sheet.get_cell_value("A1").unwrap(), CellValue::Number(2.5));
        assert_eq!(sheet.get_cell_value("B1").unwrap(), CellValue::Text("hello".into()));
    }

    #[test]
    fn test_absent_cell_is_empty_text() {
        let sheet = Spreadsheet::default();
        assert_eq!(sheet.get_cell_contents("Z9").unwrap(), CellContents::empty());
        assert_eq!(sheet.get_cell_value("Z9").unwrap(), CellValue::Text(String::new()));
    }

    #[test]
    fn test_chain_recalculation() {
        let mut sheet = Spreadsheet::default();
        sheet.set_contents_of_cell("A1", "2").unwrap();
        sheet.set_contents_of_cell("B2", "=A1+3").unwrap();
        sheet.set_contents_of_cell("C3", "=B2+3").unwrap();
        assert_eq!(number(&sheet, "C3"), 8.0);

        let order = sheet.set_contents_of_cell("A1", "4").unwrap();
        assert_eq!(order, vec!["A1", "B2", "C3"]);
        assert_eq!(number(&sheet, "B2"), 7.0);
        assert_eq!(number(&sheet, "C3"), 10.0);
    }

    #[test]
    fn test_diamond_order() {
        let mut sheet = Spreadsheet::default();
        sheet.set_contents_of_cell("A1", "1").unwrap();
        sheet.set_contents_of_cell("B1", "=A1*2").unwrap();
        sheet.set_contents_of_cell("C1", "=A1*3").unwrap();
        sheet.set_contents_of_cell("D1", "=B1+C1").unwrap();
        sheet.set_contents_of_cell("E1", "=D1-A1").unwrap();

        let order = sheet.set_contents_of_cell("A1", "10").unwrap();
        assert_eq!(order[0], "A1");
        assert_eq!(order.len(), 5);
        assert_topological(&sheet, &order);
        assert_eq!(order, vec!["A1", "C1", "B1", "D1", "E1"]);
        assert_eq!(number(&sheet, "D1"), 50.0);
        assert_eq!(number(&sheet, "E1"), 40.0);
    }

    #[test]
    fn test_order_is_stable() {
        let build = || {
            let mut sheet = Spreadsheet::default();
            sheet.set_contents_of_cell("A1", "1").unwrap();
            sheet.set_contents_of_cell("B1", "=A1").unwrap();
            sheet.set_contents_of_cell("C1", "=A1").unwrap();
            sheet.set_contents_of_cell("D1", "=A1").unwrap();
            sheet
        };
        let first = build().set_contents_of_cell("A1", "2").unwrap();
        let second = build().set_contents_of_cell("A1", "2").unwrap();
        assert_eq!(first, vec!["A1", "D1", "C1", "B1"]);
        assert_eq!(first, second);
    }

    #[test]
    fn test_circular_reference_is_rejected() {
        let mut sheet = Spreadsheet::default();
        sheet.set_contents_of_cell("B2", "=A1+3").unwrap();
        sheet.set_contents_of_cell("C3", "=B2+3").unwrap();

        let err = sheet.set_contents_of_cell("A1", "=C3*2").unwrap_err();
        assert!(matches!(err, SpreadsheetError::Circular(ref n) if n == "A1"));
        assert_eq!(sheet.get_names_of_all_nonempty_cells(), vec!["B2", "C3"]);
        assert_eq!(sheet.get_cell_contents("A1").unwrap(), CellContents::empty());
    }

    #[test]
    fn test_self_reference_is_rejected() {
        let mut sheet = Spreadsheet::default();
        let err = sheet.set_contents_of_cell("A1", "=A1+1").unwrap_err();
        assert!(matches!(err, SpreadsheetError::Circular(_)));
        assert!(sheet.get_names_of_all_nonempty_cells().is_empty());
        assert!(sheet.graph.is_empty());
        assert!(!sheet.changed());
    }

    #[test]
    fn test_rejected_edit_leaves_state_untouched() {
        let mut sheet = Spreadsheet::default();
        sheet.set_contents_of_cell("A1", "=B1*2").unwrap();
        sheet.set_contents_of_cell("B1", "=C1+1").unwrap();
        sheet.set_contents_of_cell("C1", "5").unwrap();
        sheet.set_contents_of_cell("D1", "=A1").unwrap();

        let cells = sheet.cells.clone();
        let graph = sheet.graph.clone();

        assert!(sheet.set_contents_of_cell("C1", "=D1").is_err());
        assert_eq!(sheet.cells, cells);
        assert_eq!(sheet.graph, graph);
        assert_eq!(number(&sheet, "D1"), 12.0);

        // the old formula of C1 stays intact through a rejected replacement
        sheet.set_contents_of_cell("C1", "=E1").unwrap();
        assert!(sheet.set_contents_of_cell("E1", "=A1").is_err());
        assert_eq!(
            sheet.get_cell_contents("C1").unwrap(),
            CellContents::Formula(Formula::parse("E1").unwrap())
        );
    }

    #[test]
    fn test_replacing_formula_drops_old_edges() {
        let mut sheet = Spreadsheet::default();
        sheet.set_contents_of_cell("A1", "=B1+C1").unwrap();
        sheet.set_contents_of_cell("A1", "=D1").unwrap();
        assert!(sheet.direct_dependents("B1").unwrap().is_empty());
        assert_eq!(sheet.direct_dependents("D1").unwrap(), vec!["A1"]);

        // B1 -> A1 no longer exists, so this is not a cycle
        sheet.set_contents_of_cell("B1", "=A1").unwrap();
        sheet.set_contents_of_cell("A1", "7").unwrap();
        assert_eq!(number(&sheet, "B1"), 7.0);
        assert!(sheet.direct_dependents("D1").unwrap().is_empty());
    }

    #[test]
    fn test_evaluation_errors_propagate() {
        let mut sheet = Spreadsheet::default();
        sheet.set_contents_of_cell("A1", "0").unwrap();
        sheet.set_contents_of_cell("B1", "=1/A1").unwrap();
        sheet.set_contents_of_cell("C1", "=B1+1").unwrap();
        assert_eq!(
            sheet.get_cell_value("B1").unwrap(),
            CellValue::Error(FormulaError::DivisionByZero)
        );
        assert_eq!(
            sheet.get_cell_value("C1").unwrap(),
            CellValue::Error(FormulaError::UnknownVariable("B1".into()))
        );

        sheet.set_contents_of_cell("A1", "4").unwrap();
        assert_eq!(number(&sheet, "C1"), 1.25);
    }

    #[test]
    fn test_text_and_missing_references_are_errors() {
        let mut sheet = Spreadsheet::default();
        sheet.set_contents_of_cell("A1", "text").unwrap();
        sheet.set_contents_of_cell("B1", "=A1*2").unwrap();
        sheet.set_contents_of_cell("C1", "=Z1").unwrap();
        assert!(matches!(sheet.get_cell_value("B1").unwrap(), CellValue::Error(_)));
        assert!(matches!(sheet.get_cell_value("C1").unwrap(), CellValue::Error(_)));

        // assigning the missing cell later resolves the dependent
        assert_eq!(sheet.set_contents_of_cell("Z1", "3").unwrap(), vec!["Z1", "C1"]);
        assert_eq!(number(&sheet, "C1"), 3.0);
    }

    #[test]
    fn test_clearing_a_cell() {
        let mut sheet = Spreadsheet::default();
        sheet.set_contents_of_cell("A1", "1").unwrap();
        sheet.set_contents_of_cell("B1", "=A1").unwrap();

        assert_eq!(sheet.set_contents_of_cell("A1", "").unwrap(), vec!["A1", "B1"]);
        assert_eq!(sheet.get_names_of_all_nonempty_cells(), vec!["B1"]);
        assert!(matches!(sheet.get_cell_value("B1").unwrap(), CellValue::Error(_)));
        // B1 still references A1
        assert_eq!(sheet.direct_dependents("A1").unwrap(), vec!["B1"]);
    }

    #[test]
    fn test_clearing_an_absent_cell_is_a_no_op() {
        let mut sheet = Spreadsheet::default();
        assert!(sheet.set_contents_of_cell("A1", "").unwrap().is_empty());
        assert!(sheet.get_names_of_all_nonempty_cells().is_empty());
        assert!(!sheet.changed());
    }

    #[test]
    fn test_clearing_a_formula_cell_drops_its_edges() {
        let mut sheet = Spreadsheet::default();
        sheet.set_contents_of_cell("B1", "=A1").unwrap();
        sheet.set_contents_of_cell("B1", "").unwrap();
        assert!(sheet.graph.is_empty());
    }

    #[test]
    fn test_names_keep_first_assignment_order() {
        let mut sheet = Spreadsheet::default();
        for name in ["C1", "A1", "B1"] {
            sheet.set_contents_of_cell(name, "1").unwrap();
        }
        sheet.set_contents_of_cell("C1", "2").unwrap();
        assert_eq!(sheet.get_names_of_all_nonempty_cells(), vec!["C1", "A1", "B1"]);
    }

    #[test]
    fn test_invalid_names() {
        let mut sheet = upper_sheet();
        for name in ["", "1A", "A-1", "ABCD1"] {
            assert!(matches!(
                sheet.set_contents_of_cell(name, "1"),
                Err(SpreadsheetError::InvalidName(_))
            ));
            assert!(matches!(
                sheet.get_cell_value(name),
                Err(SpreadsheetError::InvalidName(_))
            ));
        }
    }

    #[test]
    fn test_names_are_normalized() {
        let mut sheet = upper_sheet();
        sheet.set_contents_of_cell("a1", "3").unwrap();
        sheet.set_contents_of_cell("B1", "=a1*a1").unwrap();
        assert_eq!(number(&sheet, "b1"), 9.0);
        assert_eq!(sheet.get_names_of_all_nonempty_cells(), vec!["A1", "B1"]);
        assert_eq!(sheet.get_cell_contents("b1").unwrap().string_form(), "=A1*A1");
    }

    #[test]
    fn test_formula_errors_leave_sheet_untouched() {
        let mut sheet = upper_sheet();
        sheet.set_contents_of_cell("A1", "1").unwrap();
        let err = sheet.set_contents_of_cell("A1", "=2 +").unwrap_err();
        assert!(matches!(
            err,
            SpreadsheetError::FormulaFormat(FormulaFormatError::InvalidEnd(_))
        ));
        let err = sheet.set_contents_of_cell("A1", "=ABCD9").unwrap_err();
        assert!(matches!(
            err,
            SpreadsheetError::FormulaFormat(FormulaFormatError::InvalidVariable(_))
        ));
        assert_eq!(number(&sheet, "A1"), 1.0);
    }

    #[test]
    fn test_changed_flag() {
        let mut sheet = Spreadsheet::default();
        assert!(!sheet.changed());
        sheet.set_contents_of_cell("A1", "1").unwrap();
        assert!(sheet.changed());
        sheet.mark_saved();
        assert!(!sheet.changed());
        assert!(sheet.set_contents_of_cell("A1", "=A1").is_err());
        assert!(!sheet.changed());
    }

    #[test]
    fn test_same_contents_do_not_mark_changed() {
        let mut sheet = Spreadsheet::default();
        sheet.set_contents_of_cell("A1", "1").unwrap();
        sheet.set_contents_of_cell("B1", "=A1 + 1").unwrap();
        sheet.mark_saved();

        assert_eq!(sheet.set_contents_of_cell("A1", "1.0").unwrap(), vec!["A1", "B1"]);
        sheet.set_contents_of_cell("B1", "=A1+1").unwrap();
        sheet.set_contents_of_cell("Z1", "").unwrap();
        assert!(!sheet.changed());

        sheet.set_contents_of_cell("B1", "=A1+2").unwrap();
        assert!(sheet.changed());
    }

    #[test]
    fn test_formula_cell_is_evaluated_on_insert() {
        let mut sheet = Spreadsheet::default();
        sheet.set_contents_of_cell("A1", "=B1").unwrap();
        assert_eq!(
            sheet.get_cell_value("A1").unwrap(),
            CellValue::Error(FormulaError::UnknownVariable("B1".into()))
        );
        sheet.set_contents_of_cell("C1", "=4/2").unwrap();
        assert_eq!(sheet.cells()["C1"].value, CellValue::Number(2.0));
    }

    fn long_chain(len: usize) -> Spreadsheet {
        let mut sheet = Spreadsheet::default();
        sheet.set_contents_of_cell("C0", "1").unwrap();
        for i in 1..=len {
            let formula = format!("=C{}+1", i - 1);
            sheet.set_contents_of_cell(&format!("C{}", i), &formula).unwrap();
        }
        sheet
    }

    #[test]
    fn test_long_chain_recalculation() {
        let mut sheet = long_chain(10_000);
        assert_eq!(number(&sheet, "C10000"), 10_001.0);

        let order = sheet.set_contents_of_cell("C0", "2").unwrap();
        assert_eq!(order.len(), 10_001);
        assert_eq!(order[0], "C0");
        assert_eq!(order[10_000], "C10000");
        assert_eq!(number(&sheet, "C10000"), 10_002.0);
    }

    #[test]
    fn test_long_chain_cycle_is_rejected() {
        let mut sheet = long_chain(10_000);
        let cells = sheet.cells.clone();
        let graph = sheet.graph.clone();

        let err = sheet.set_contents_of_cell("C0", "=C10000+1").unwrap_err();
        assert!(matches!(err, SpreadsheetError::Circular(ref name) if name == "C0"));
        assert_eq!(sheet.cells, cells);
        assert_eq!(sheet.graph, graph);
        assert_eq!(number(&sheet, "C10000"), 10_001.0);
    }

    #[test]
    fn test_version() {
        assert_eq!(Spreadsheet::default().version(), DEFAULT_VERSION);
        assert_eq!(upper_sheet().version(), "v1");
    }
}
