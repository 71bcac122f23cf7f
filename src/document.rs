//! JSON document format for saved spreadsheets.
//!
//! ```json
//! { "version": "v1", "cells": { "A1": { "stringForm": "=B1*2" } } }
//! ```

use std::fs;
use std::io::{Read, Write};
use std::path::Path;

use indexmap::IndexMap;
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::error::SpreadsheetError;
use crate::sheet::{Normalizer, Spreadsheet, Validator};

#[derive(Serialize, Deserialize)]
struct SpreadsheetFile {
    version: String,
    cells: IndexMap<String, CellData>,
}

#[derive(Serialize, Deserialize)]
struct CellData {
    #[serde(rename = "stringForm")]
    string_form: String,
}

#[derive(Deserialize)]
struct VersionOnly {
    version: String,
}

fn read_file(path: &Path) -> Result<String, SpreadsheetError> {
    let mut file = fs::File::open(path)?;
    let mut contents = String::new();
    file.read_to_string(&mut contents)?;
    Ok(contents)
}

/// Version tag of a saved document, without loading its cells
pub fn saved_version(path: impl AsRef<Path>) -> Result<String, SpreadsheetError> {
    let contents = read_file(path.as_ref())?;
    let header: VersionOnly = serde_json::from_str(&contents)?;
    Ok(header.version)
}

impl Spreadsheet {
    pub fn to_json(&self) -> Result<String, SpreadsheetError> {
        let cells = self
            .cells()
            .iter()
            .map(|(name, cell)| {
                let data = CellData {
                    string_form: cell.contents.string_form(),
                };
                (name.clone(), data)
            })
            .collect();
        let file_data = SpreadsheetFile {
            version: self.version().to_string(),
            cells,
        };
        Ok(serde_json::to_string_pretty(&file_data)?)
    }

    /// Write the sheet to `path` and clear the changed flag
    pub fn save(&mut self, path: impl AsRef<Path>) -> Result<(), SpreadsheetError> {
        let json = self.to_json()?;
        let mut file = fs::File::create(path.as_ref())?;
        file.write_all(json.as_bytes())?;
        self.mark_saved();
        debug!("saved {} cells to {}", self.cells().len(), path.as_ref().display());
        Ok(())
    }

    /// Rebuild a sheet from a saved document.
    ///
    /// The document must carry `version`. Cells are replayed in document
    /// order, so references to cells saved later resolve once those load.
    pub fn from_json(
        json: &str,
        is_valid: Validator,
        normalize: Normalizer,
        version: impl Into<String>,
    ) -> Result<Self, SpreadsheetError> {
        let file_data: SpreadsheetFile = serde_json::from_str(json)?;
        let version = version.into();
        if file_data.version != version {
            return Err(SpreadsheetError::VersionMismatch {
                expected: version,
                found: file_data.version,
            });
        }

        let mut sheet = Spreadsheet::new(is_valid, normalize, version);
        for (name, data) in file_data.cells {
            if let Err(e) = sheet.set_contents_of_cell(&name, &data.string_form) {
                warn!("failed to load cell {}: {}", name, e);
                return Err(SpreadsheetError::Load {
                    cell: name,
                    source: Box::new(e),
                });
            }
        }
        sheet.mark_saved();
        Ok(sheet)
    }

    pub fn load(
        path: impl AsRef<Path>,
        is_valid: Validator,
        normalize: Normalizer,
        version: impl Into<String>,
    ) -> Result<Self, SpreadsheetError> {
        let contents = read_file(path.as_ref())?;
        let sheet = Spreadsheet::from_json(&contents, is_valid, normalize, version)?;
        debug!(
            "loaded {} cells from {}",
            sheet.cells().len(),
            path.as_ref().display()
        );
        Ok(sheet)
    }
}
