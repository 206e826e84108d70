//! # Spreadsheet readers
//!
//! Format readers turn a file into [`RawSheet`]s: OpenXML (`.xlsx` family), OpenDocument
//! (`.ods`), BIFF8 (`.xls`), delimited text, and a salvage reader for damaged OpenXML
//! packages. [`loader::FileLoader`] chains them with per-attempt isolation.

pub mod cell;
pub(crate) mod delimited;
pub(crate) mod excel;
pub mod loader;
pub(crate) mod ods;
pub mod range;
pub mod reference;
pub(crate) mod salvage;
pub mod sheet;
pub(crate) mod xls;
pub(crate) mod xlsx;

use crate::config::EngineConfig;
use crate::error::SheetSleuthError;
use crate::helpers::budget::Budget;
use crate::spreadsheet::sheet::RawSheet;
use thiserror::Error;
use tracing::debug;
use tracing::warn;

#[derive(Error, Debug)]
pub enum SpreadsheetError {
    #[error("Spreadsheet '{0}' is password protected")]
    PasswordProtectedError(String),

    #[error("Spreadsheet '{0}' contains no worksheets")]
    EmptyWorkbookError(String),

    #[error("Missing package part '{0}'")]
    FileError(String),

    #[error("Worksheet index {0} out of range")]
    SheetIndexError(usize),
}

/// A sheet that could not be read, or was only read in part.
#[derive(Clone, Debug, PartialEq)]
pub struct SheetFailure {
    pub sheet: String,
    pub reason: String,
}

/// Sheets produced by one successful strategy attempt.
#[derive(Clone, Debug, Default)]
pub struct Workbook {
    pub sheets: Vec<RawSheet>,
    pub failures: Vec<SheetFailure>,
}

/// A format reader over one opened file.
pub(crate) trait Spreadsheet {
    /// Worksheet names in workbook order.
    fn sheet_names(&self) -> Vec<String>;

    /// Reads one worksheet, checking the budget between rows.
    fn read_sheet(&mut self, index: usize, budget: &Budget) -> Result<RawSheet, SheetSleuthError>;

    /// Reads every worksheet accepted by the configured sheet patterns. A failing sheet is
    /// recorded and skipped; only budget exhaustion aborts the whole workbook.
    fn read_sheets(&mut self, config: &EngineConfig, budget: &Budget) -> Result<Workbook, SheetSleuthError> {
        let mut workbook = Workbook::default();
        for (index, sheet_name) in self.sheet_names().into_iter().enumerate() {
            if !config.accepts_sheet(&sheet_name) {
                debug!(sheet = %sheet_name, "Sheet skipped by pattern");
                continue;
            }
            budget.check()?;
            match self.read_sheet(index, budget) {
                Ok(sheet) => workbook.sheets.push(sheet),
                Err(error) if error.is_file_fatal() => return Err(error),
                Err(error) => {
                    warn!(sheet = %sheet_name, %error, "Sheet could not be read");
                    workbook.failures.push(SheetFailure {
                        sheet: sheet_name,
                        reason: error.to_string(),
                    });
                }
            }
        }
        if workbook.sheets.is_empty() && !workbook.failures.is_empty() {
            let reasons: Vec<String> = workbook
                .failures
                .iter()
                .map(|failure| format!("{}: {}", failure.sheet, failure.reason))
                .collect();
            Err(SheetSleuthError::WithContextError(reasons.join("; ")))?;
        }
        Ok(workbook)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spreadsheet::cell::Cell;
    use crate::spreadsheet::sheet::SheetBuilder;

    struct FakeSpreadsheet {
        names: Vec<&'static str>,
        broken: usize,
    }

    impl Spreadsheet for FakeSpreadsheet {
        fn sheet_names(&self) -> Vec<String> {
            self.names.iter().map(|name| name.to_string()).collect()
        }

        fn read_sheet(&mut self, index: usize, _budget: &Budget) -> Result<RawSheet, SheetSleuthError> {
            if index == self.broken {
                Err(SpreadsheetError::FileError(format!("xl/worksheets/sheet{}.xml", index + 1)))?
            }
            let mut builder = SheetBuilder::new("fake.xlsx", self.names[index]);
            builder.push(Cell::text(0, 0, "value"));
            Ok(builder.finish())
        }
    }

    #[test]
    fn failing_sheet_is_recorded() -> Result<(), SheetSleuthError> {
        let mut spreadsheet = FakeSpreadsheet { names: vec!["Summary", "Detail", "Notes"], broken: 1 };
        let workbook = spreadsheet.read_sheets(&EngineConfig::default(), &Budget::unbounded())?;
        assert_eq!(workbook.sheets.len(), 2);
        assert_eq!(workbook.failures.len(), 1);
        assert_eq!(workbook.failures[0].sheet, "Detail");
        Ok(())
    }

    #[test]
    fn sheet_patterns_filter() -> Result<(), SheetSleuthError> {
        let config = EngineConfig {
            sheet_patterns: Some(vec!["N*".to_owned()]),
            ..EngineConfig::default()
        };
        let mut spreadsheet = FakeSpreadsheet { names: vec!["Summary", "Detail", "Notes"], broken: 1 };
        let workbook = spreadsheet.read_sheets(&config, &Budget::unbounded())?;
        assert_eq!(workbook.sheets.len(), 1);
        assert_eq!(workbook.sheets[0].name, "Notes");
        assert!(workbook.failures.is_empty());
        Ok(())
    }

    #[test]
    fn all_sheets_failing_fails_the_attempt() {
        let mut spreadsheet = FakeSpreadsheet { names: vec!["Only"], broken: 0 };
        assert!(spreadsheet.read_sheets(&EngineConfig::default(), &Budget::unbounded()).is_err());
    }
}
