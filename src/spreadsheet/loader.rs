//! Reader selection and fallback.
//!
//! A file is tried with every applicable [`Strategy`] in turn. Each attempt opens a fresh
//! reader, runs under its own child budget and is isolated from panics; the first attempt
//! that yields sheets wins.

use crate::config::EngineConfig;
use crate::error::SheetSleuthError;
use crate::helpers::budget::Budget;
use crate::helpers::reader::Input;
use crate::helpers::reader::Signature;
use crate::metadata::Warning;
use crate::metadata::WarningKind;
use crate::spreadsheet::delimited::DelimitedSpreadsheet;
use crate::spreadsheet::ods::OdsSpreadsheet;
use crate::spreadsheet::salvage::salvage;
use crate::spreadsheet::sheet::RawSheet;
use crate::spreadsheet::xls::XlsSpreadsheet;
use crate::spreadsheet::xlsx::XlsxSpreadsheet;
use crate::spreadsheet::SheetFailure;
use crate::spreadsheet::Spreadsheet;
use crate::spreadsheet::SpreadsheetError;
use crate::spreadsheet::Workbook;
use serde::Deserialize;
use serde::Serialize;
use std::any::Any;
use std::fmt::Display;
use std::panic::catch_unwind;
use std::panic::AssertUnwindSafe;
use std::time::Instant;
use tracing::debug;
use tracing::info;
use tracing::warn;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    OpenXml,
    OpenDocument,
    Biff8,
    Salvage,
    Delimited,
}

impl Strategy {
    /// Every strategy, in fallback order.
    pub const ALL: [Strategy; 5] = [
        Strategy::OpenXml,
        Strategy::OpenDocument,
        Strategy::Biff8,
        Strategy::Salvage,
        Strategy::Delimited,
    ];

    pub const fn as_str(&self) -> &'static str {
        match self {
            Strategy::OpenXml => "open_xml",
            Strategy::OpenDocument => "open_document",
            Strategy::Biff8 => "biff8",
            Strategy::Salvage => "salvage",
            Strategy::Delimited => "delimited",
        }
    }

    /// Returns true when the extension names this strategy's format.
    fn matches_extension(&self, extension: &str) -> bool {
        match self {
            Strategy::OpenXml | Strategy::Salvage => matches!(extension, "xlsx" | "xlsm" | "xltx" | "xltm" | "xlam"),
            Strategy::OpenDocument => matches!(extension, "ods" | "ots"),
            Strategy::Biff8 => matches!(extension, "xls" | "xla" | "xlt"),
            Strategy::Delimited => matches!(extension, "csv" | "tsv" | "txt" | "tab"),
        }
    }

    fn applies(&self, extension: Option<&str>, signature: Signature) -> bool {
        let by_extension = extension.map(|extension| self.matches_extension(extension)).unwrap_or(false);
        match self {
            Strategy::OpenXml | Strategy::OpenDocument => signature == Signature::Zip,
            Strategy::Biff8 => signature == Signature::Ole,
            Strategy::Salvage => signature == Signature::Zip || by_extension,
            Strategy::Delimited => signature == Signature::Other || by_extension,
        }
    }

    fn attempt(&self, input: &Input, config: &EngineConfig, budget: &Budget) -> Result<Workbook, SheetSleuthError> {
        match self {
            Strategy::OpenXml => XlsxSpreadsheet::open(input)?.read_sheets(config, budget),
            Strategy::OpenDocument => OdsSpreadsheet::open(input)?.read_sheets(config, budget),
            Strategy::Biff8 => XlsSpreadsheet::open(input)?.read_sheets(config, budget),
            Strategy::Salvage => salvage(input, config, budget),
            Strategy::Delimited => DelimitedSpreadsheet::open(input)?.read_sheets(config, budget),
        }
    }
}

impl Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Applicable strategies: those matching the extension first, then the rest in fallback order.
pub(crate) fn plan(extension: Option<&str>, signature: Signature) -> Vec<Strategy> {
    let applicable = Strategy::ALL
        .into_iter()
        .filter(|strategy| strategy.applies(extension, signature));
    let (mut preferred, rest): (Vec<Strategy>, Vec<Strategy>) = applicable
        .partition(|strategy| extension.map(|extension| strategy.matches_extension(extension)).unwrap_or(false));
    preferred.extend(rest);
    preferred
}

/// Sheets of a loaded file plus what went wrong on the way.
#[derive(Clone, Debug)]
pub struct LoadOutcome {
    pub strategy: Strategy,
    pub sheets: Vec<RawSheet>,
    /// Sheets lost or only partly read by the winning strategy
    pub failures: Vec<SheetFailure>,
    /// One `LoaderFallback` entry per failed attempt
    pub warnings: Vec<Warning>,
}

pub struct FileLoader<'a> {
    config: &'a EngineConfig,
}

impl<'a> FileLoader<'a> {
    pub fn new(config: &'a EngineConfig) -> Self {
        FileLoader { config }
    }

    /// Loads every sheet of the input through the fallback chain.
    ///
    /// # Returns
    ///
    /// The first successful attempt, `UnreadableFileError` when every strategy fails or the
    /// file is password protected or too large, and `TimeoutError` / `CancelledError` when
    /// the file budget runs out.
    pub fn load(&self, input: &Input, budget: &Budget) -> Result<LoadOutcome, SheetSleuthError> {
        let file = input.identity();
        let unreadable = |reason: String| SheetSleuthError::UnreadableFileError {
            file: file.to_owned(),
            reason,
        };

        let size = input.size().map_err(|error| unreadable(error.to_string()))?;
        if size > self.config.max_file_size {
            return Err(unreadable(format!(
                "File size {size} bytes exceeds the {} byte limit",
                self.config.max_file_size
            )));
        }
        let signature = input.signature().map_err(|error| unreadable(error.to_string()))?;
        let extension = input.extension();
        let strategies = plan(extension.as_deref(), signature);
        debug!(file = %file, ?signature, ?strategies, "Load plan");

        let mut warnings = Vec::new();
        let mut reasons = Vec::new();
        for strategy in strategies {
            budget.check()?;
            let attempt_budget = budget.child(self.config.strategy_timeout);
            let started = Instant::now();
            let result = catch_unwind(AssertUnwindSafe(|| strategy.attempt(input, self.config, &attempt_budget)))
                .unwrap_or_else(|panic| Err(SheetSleuthError::WithContextError(format!("Reader panicked: {}", panic_message(&*panic)))));
            let elapsed_ms = started.elapsed().as_millis() as u64;

            match result {
                Ok(workbook) => {
                    info!(
                        file = %file,
                        strategy = %strategy,
                        sheets = workbook.sheets.len(),
                        failures = workbook.failures.len(),
                        elapsed_ms,
                        "File loaded"
                    );
                    return Ok(LoadOutcome {
                        strategy,
                        sheets: workbook.sheets,
                        failures: workbook.failures,
                        warnings,
                    });
                }
                Err(error @ SheetSleuthError::SpreadsheetError(SpreadsheetError::PasswordProtectedError(_))) => {
                    warn!(file = %file, strategy = %strategy, "Password protected");
                    return Err(unreadable(error.to_string()));
                }
                Err(error) => {
                    // Only the file budget ends the chain; an expired attempt budget falls through
                    budget.check()?;
                    warn!(file = %file, strategy = %strategy, %error, elapsed_ms, "Load strategy failed");
                    warnings.push(Warning::new(WarningKind::LoaderFallback, format!("{strategy}: {error}")));
                    reasons.push(format!("{strategy}: {error}"));
                }
            }
        }

        if reasons.is_empty() {
            reasons.push("no reader applies to this file".to_owned());
        }
        Err(unreadable(reasons.join("; ")))
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.to_owned()
    } else {
        "unknown panic".to_owned()
    }
}
