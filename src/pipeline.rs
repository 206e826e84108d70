//! Per-file analysis.
//!
//! A [`Pipeline`] loads one input and runs every sheet through detection, extraction and
//! aggregation, in that order. Whatever happens, it produces exactly one [`FileResult`].

use crate::config::EngineConfig;
use crate::error::SheetSleuthError;
use crate::helpers::budget::Budget;
use crate::helpers::reader::Input;
use crate::inference::keyvalue::CuePolicy;
use crate::inference::keyvalue::KeyValueExtractor;
use crate::inference::structure::StructureDetector;
use crate::inference::table::TableExtractor;
use crate::inference::StructureType;
use crate::metadata::FileResult;
use crate::metadata::MetadataAggregator;
use crate::metadata::SheetAnalysis;
use crate::metadata::SheetMetadata;
use crate::metadata::Status;
use crate::metadata::Warning;
use crate::metadata::WarningKind;
use crate::spreadsheet::loader::FileLoader;
use crate::spreadsheet::sheet::RawSheet;
use crate::spreadsheet::SheetFailure;
use std::panic::catch_unwind;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;
use tracing::info;
use tracing::warn;

/// Turns one input into one result. Implementations must never fail or panic outward.
pub trait FileProcessor: Send + Sync {
    fn process(&self, input: &Input, budget: &Budget) -> FileResult;
}

pub struct Pipeline {
    config: Arc<EngineConfig>,
    detector: StructureDetector,
    tables: TableExtractor,
    key_values: KeyValueExtractor,
    aggregator: MetadataAggregator,
}

impl Pipeline {
    pub fn new(config: Arc<EngineConfig>) -> Self {
        Pipeline {
            detector: StructureDetector::new(&config),
            tables: TableExtractor::new(&config),
            key_values: KeyValueExtractor::default(),
            aggregator: MetadataAggregator::new(&config),
            config,
        }
    }

    /// Replaces the cue order used for key-value hierarchies.
    pub fn with_cue_policy(mut self, policy: CuePolicy) -> Self {
        self.key_values = KeyValueExtractor::new(policy);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Runs detection, extraction and aggregation over one sheet.
    pub fn analyze_sheet(&self, sheet: &RawSheet, budget: &Budget) -> Result<(SheetMetadata, Vec<Warning>), SheetSleuthError> {
        let detection = self.detector.detect(sheet);
        let mut warnings = detection.warnings;
        let mut tables = Vec::new();
        let mut key_values = Vec::new();
        for region in &detection.regions {
            budget.check()?;
            match region.kind {
                StructureType::Tabular => {
                    let (table, table_warnings) = self.tables.extract(sheet, region);
                    warnings.extend(table_warnings);
                    tables.push(table);
                }
                StructureType::KeyValue => key_values.extend(self.key_values.extract(sheet, region)),
                StructureType::Mixed | StructureType::Empty => (),
            }
        }
        let analysis = SheetAnalysis {
            sheet,
            regions: detection.regions,
            tables,
            key_values,
        };
        let (metadata, aggregate_warnings) = self.aggregator.aggregate(&analysis);
        warnings.extend(aggregate_warnings);
        debug!(
            sheet = %sheet.name,
            structure = %metadata.structure,
            tables = metadata.tables.len(),
            entities = metadata.entities.len(),
            "Sheet analyzed"
        );
        Ok((metadata, warnings))
    }

    fn run(&self, input: &Input, budget: &Budget, result: &mut FileResult) -> Result<(), SheetSleuthError> {
        let outcome = FileLoader::new(&self.config).load(input, budget)?;
        result.strategy = Some(outcome.strategy);
        result.warnings.extend(outcome.warnings);

        let mut failures = outcome.failures;
        for failure in &failures {
            let error = SheetSleuthError::PartialExtractionError {
                sheet: failure.sheet.to_owned(),
                reason: failure.reason.to_owned(),
            };
            result
                .warnings
                .push(Warning::on_sheet(WarningKind::SheetFailure, &failure.sheet, error.to_string()));
        }

        for sheet in &outcome.sheets {
            budget.check()?;
            let analysis = catch_unwind(AssertUnwindSafe(|| self.analyze_sheet(sheet, budget)));
            match analysis {
                Ok(Ok((metadata, warnings))) => {
                    result.sheets.push(metadata);
                    result.warnings.extend(warnings);
                }
                Ok(Err(error)) if error.is_file_fatal() => return Err(error),
                Ok(Err(error)) => failures.push(self.sheet_failed(result, sheet, error.to_string())),
                Err(_) => failures.push(self.sheet_failed(result, sheet, "analysis panicked".to_owned())),
            }
        }
        result.status = status_of(result.sheets.len(), failures.len());
        Ok(())
    }

    fn sheet_failed(&self, result: &mut FileResult, sheet: &RawSheet, reason: String) -> SheetFailure {
        warn!(file = %result.file, sheet = %sheet.name, %reason, "Sheet analysis failed");
        let error = SheetSleuthError::PartialExtractionError {
            sheet: sheet.name.to_owned(),
            reason: reason.to_owned(),
        };
        result
            .warnings
            .push(Warning::on_sheet(WarningKind::PartialExtraction, &sheet.name, error.to_string()));
        SheetFailure {
            sheet: sheet.name.to_owned(),
            reason,
        }
    }
}

impl FileProcessor for Pipeline {
    fn process(&self, input: &Input, budget: &Budget) -> FileResult {
        let started = Instant::now();
        let mut result = FileResult::failed(input.identity(), Vec::new(), 0);
        if let Err(error) = self.run(input, budget, &mut result) {
            warn!(file = %result.file, %error, "File failed");
            result.sheets.clear();
            result.status = Status::Failed;
            result.warnings.push(Warning::new(warning_kind(&error), error.to_string()));
        }
        result.elapsed_ms = started.elapsed().as_millis() as u64;
        info!(
            file = %result.file,
            strategy = ?result.strategy,
            status = ?result.status,
            sheets = result.sheets.len(),
            warnings = result.warnings.len(),
            elapsed_ms = result.elapsed_ms,
            "File processed"
        );
        result
    }
}

/// OK when nothing failed, PARTIAL when some sheets survived a failure, FAILED otherwise.
pub(crate) fn status_of(analyzed: usize, failed: usize) -> Status {
    match (analyzed, failed) {
        (_, 0) => Status::Ok,
        (0, _) => Status::Failed,
        _ => Status::Partial,
    }
}

/// Warning kind recording a file-fatal error.
pub(crate) fn warning_kind(error: &SheetSleuthError) -> WarningKind {
    match error {
        SheetSleuthError::TimeoutError(_) => WarningKind::Timeout,
        SheetSleuthError::CancelledError => WarningKind::Cancelled,
        _ => WarningKind::Unreadable,
    }
}
