//! # Privacy-safe metadata
//!
//! [`MetadataAggregator`] turns the transient results of one sheet (regions, tables,
//! key-value trees) into a [`SheetMetadata`]. Only names, types, counts, statistics and
//! bounded samples survive; raw rows and key-value values are never copied.
//! [`FileResult`] and [`BatchResult`] are the serializable outputs of the engine.

use crate::config::EngineConfig;
use crate::helpers::string::collapse_whitespace;
use crate::helpers::string::truncate_chars;
use crate::inference::column::ColumnProfile;
use crate::inference::column::TypeInferencer;
use crate::inference::column::ValueType;
use crate::inference::dates::DateMatch;
use crate::inference::dates::DateRecognizer;
use crate::inference::dates::DateSpan;
use crate::inference::dates::DateSummary;
use crate::inference::entity::is_entity_label;
use crate::inference::entity::EntityDetector;
use crate::inference::entity::EntityMention;
use crate::inference::keyvalue::KeyValueNode;
use crate::inference::table::Table;
use crate::inference::Region;
use crate::inference::StructureType;
use crate::spreadsheet::cell::CellType;
use crate::spreadsheet::loader::Strategy;
use crate::spreadsheet::range::CellRange;
use crate::spreadsheet::sheet::RawSheet;
use serde::Deserialize;
use serde::Serialize;
use std::collections::BTreeMap;
use std::collections::HashSet;
use std::fmt::Display;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    /// Every load strategy failed
    Unreadable,
    /// A load strategy failed and the next one was tried
    LoaderFallback,
    /// A sheet could not be read, or was read in part
    SheetFailure,
    /// A block matched neither a table nor a key-value layout
    StructureDetection,
    SynthesizedHeader,
    PartialExtraction,
    Timeout,
    Cancelled,
    /// Day and month order was guessed from the configured preference
    LowConfidenceDate,
    /// Values whose type disagrees with their column
    MinorityValues,
    ProcessPoolUnavailable,
    WorkerFailure,
}

impl WarningKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            WarningKind::Unreadable => "unreadable",
            WarningKind::LoaderFallback => "loader_fallback",
            WarningKind::SheetFailure => "sheet_failure",
            WarningKind::StructureDetection => "structure_detection",
            WarningKind::SynthesizedHeader => "synthesized_header",
            WarningKind::PartialExtraction => "partial_extraction",
            WarningKind::Timeout => "timeout",
            WarningKind::Cancelled => "cancelled",
            WarningKind::LowConfidenceDate => "low_confidence_date",
            WarningKind::MinorityValues => "minority_values",
            WarningKind::ProcessPoolUnavailable => "process_pool_unavailable",
            WarningKind::WorkerFailure => "worker_failure",
        }
    }
}

/// A recoverable condition met while processing a file.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Warning {
    pub kind: WarningKind,
    pub sheet: Option<String>,
    pub message: String,
}

impl Warning {
    pub fn new(kind: WarningKind, message: impl Into<String>) -> Self {
        Warning {
            kind,
            sheet: None,
            message: message.into(),
        }
    }

    pub fn on_sheet(kind: WarningKind, sheet: &str, message: impl Into<String>) -> Self {
        Warning {
            kind,
            sheet: Some(sheet.to_owned()),
            message: message.into(),
        }
    }
}

impl Display for Warning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.sheet {
            Some(sheet) => write!(f, "[{}] {}: {}", self.kind.as_str(), sheet, self.message),
            None => write!(f, "[{}] {}", self.kind.as_str(), self.message),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Ok,
    Partial,
    Failed,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RegionSummary {
    pub range: CellRange,
    pub kind: StructureType,
    pub confidence: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ColumnSummary {
    /// Header name, cut to `max_label_chars`
    pub name: String,
    pub value_type: ValueType,
    pub profile: ColumnProfile,
    /// Distinct values, each cut to `max_sample_chars`
    pub samples: Vec<String>,
    pub is_entity_column: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TableSummary {
    pub range: CellRange,
    pub header_rows: usize,
    pub row_count: usize,
    pub columns: Vec<ColumnSummary>,
    pub completeness: f64,
}

/// Shape of a key-value tree: keys and value types, never values.
///
/// A key longer than `max_label_chars` with no value is narrative text. Its outline keeps
/// the length and an empty key.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct KeyValueOutline {
    pub key: String,
    /// Length of the full key, in characters
    pub key_chars: usize,
    pub narrative: bool,
    pub value_type: Option<ValueType>,
    pub depth: usize,
    pub children: Vec<KeyValueOutline>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SheetMetadata {
    pub name: String,
    pub structure: StructureType,
    pub row_count: usize,
    pub column_count: usize,
    pub regions: Vec<RegionSummary>,
    pub tables: Vec<TableSummary>,
    pub key_values: Vec<KeyValueOutline>,
    pub dates: DateSummary,
    pub entities: Vec<EntityMention>,
    pub completeness: f64,
}

impl SheetMetadata {
    pub fn primary_entity(&self) -> Option<&EntityMention> {
        self.entities.iter().find(|entity| entity.primary)
    }
}

/// Outcome of one input file. Every input yields exactly one.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FileResult {
    pub file: String,
    pub strategy: Option<Strategy>,
    pub sheets: Vec<SheetMetadata>,
    pub status: Status,
    pub warnings: Vec<Warning>,
    pub elapsed_ms: u64,
}

impl FileResult {
    /// A result for a file that produced no sheets.
    pub fn failed(file: impl Into<String>, warnings: Vec<Warning>, elapsed_ms: u64) -> Self {
        FileResult {
            file: file.into(),
            strategy: None,
            sheets: Vec::new(),
            status: Status::Failed,
            warnings,
            elapsed_ms,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total: usize,
    pub ok: usize,
    pub partial: usize,
    pub failed: usize,
    /// Sheets per structure type
    pub structures: BTreeMap<StructureType, usize>,
    /// Primary entity names across files, first seen first
    pub primary_entities: Vec<String>,
    pub earliest: Option<DateSpan>,
    pub latest: Option<DateSpan>,
}

impl BatchSummary {
    pub fn from_results(results: &[FileResult]) -> BatchSummary {
        let mut summary = BatchSummary {
            total: results.len(),
            ..BatchSummary::default()
        };
        let mut dates = DateSummary::default();
        let mut seen = HashSet::new();
        for result in results {
            match result.status {
                Status::Ok => summary.ok += 1,
                Status::Partial => summary.partial += 1,
                Status::Failed => summary.failed += 1,
            }
            for sheet in &result.sheets {
                *summary.structures.entry(sheet.structure).or_default() += 1;
                if let Some(entity) = sheet.primary_entity() {
                    if seen.insert(entity.canonical.to_owned()) {
                        summary.primary_entities.push(entity.name.to_owned());
                    }
                }
                dates.merge(&sheet.dates);
            }
        }
        summary.earliest = dates.earliest;
        summary.latest = dates.latest;
        summary
    }
}

/// File results in input order plus their summary.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BatchResult {
    pub files: Vec<FileResult>,
    pub summary: BatchSummary,
}

impl BatchResult {
    pub fn new(files: Vec<FileResult>) -> Self {
        let summary = BatchSummary::from_results(&files);
        BatchResult { files, summary }
    }
}

/// Transient results of one sheet, handed to the aggregator.
pub struct SheetAnalysis<'a> {
    pub sheet: &'a RawSheet,
    pub regions: Vec<Region>,
    pub tables: Vec<Table<'a>>,
    pub key_values: Vec<KeyValueNode>,
}

pub struct MetadataAggregator {
    inferencer: TypeInferencer,
    max_samples: usize,
    max_sample_chars: usize,
    max_label_chars: usize,
}

impl MetadataAggregator {
    pub fn new(config: &EngineConfig) -> Self {
        MetadataAggregator {
            inferencer: TypeInferencer::new(DateRecognizer::from_config(config)),
            max_samples: config.max_samples,
            max_sample_chars: config.max_sample_chars,
            max_label_chars: config.max_label_chars.max(1),
        }
    }

    /// Summarizes one analyzed sheet. Low-confidence dates and minority values come back as warnings.
    pub fn aggregate(&self, analysis: &SheetAnalysis) -> (SheetMetadata, Vec<Warning>) {
        let sheet = analysis.sheet;
        let recognizer = self.inferencer.recognizer();
        let mut entities = EntityDetector::new();
        let mut dates: Vec<DateMatch> = Vec::new();
        let mut warnings = Vec::new();

        let mut tables = Vec::with_capacity(analysis.tables.len());
        for table in &analysis.tables {
            // Period headers of wide tables ("Q1 2024", "FY2025") count as coverage
            dates.extend(table.columns.iter().filter_map(|name| recognizer.recognize(name).ok()));
            dates.extend(table.dates.iter().copied());
            let summary = self.summarize_table(table, &mut entities);
            for column in summary.columns.iter().filter(|column| column.profile.minority > 0) {
                warnings.push(Warning::on_sheet(
                    WarningKind::MinorityValues,
                    &sheet.name,
                    format!(
                        "Column '{}' in {} has {} value(s) not of type {}",
                        column.name, table.range, column.profile.minority, column.value_type
                    ),
                ));
            }
            tables.push(summary);
        }

        let mut key_values = Vec::with_capacity(analysis.key_values.len());
        for root in &analysis.key_values {
            for node in root.walk() {
                entities.observe(&node.key, None);
                let Some(value) = &node.value else {
                    continue;
                };
                if value.kind == CellType::Text {
                    entities.observe(&value.value, Some(&node.key));
                }
                if let Some(date) = self.inferencer.infer(value).and_then(|inferred| inferred.date) {
                    dates.push(date);
                }
            }
            key_values.push(self.outline(root));
        }

        let dates = DateSummary::from_matches(&dates, recognizer);
        if dates.low_confidence > 0 {
            warnings.push(Warning::on_sheet(
                WarningKind::LowConfidenceDate,
                &sheet.name,
                format!(
                    "{} of {} date(s) have an ambiguous day/month order",
                    dates.low_confidence, dates.count
                ),
            ));
        }

        let bounds = sheet.bounds().filter(|_| !sheet.is_empty());
        let metadata = SheetMetadata {
            name: sheet.name.to_owned(),
            structure: classify(&analysis.regions),
            row_count: bounds.map(|range| range.height()).unwrap_or(0),
            column_count: bounds.map(|range| range.width()).unwrap_or(0),
            regions: analysis
                .regions
                .iter()
                .map(|region| RegionSummary {
                    range: region.range,
                    kind: region.kind,
                    confidence: region.confidence,
                })
                .collect(),
            completeness: completeness(sheet, bounds, &analysis.tables),
            tables,
            key_values,
            dates,
            entities: entities.finish(),
        };
        (metadata, warnings)
    }

    fn summarize_table(&self, table: &Table, entities: &mut EntityDetector) -> TableSummary {
        let columns = table
            .columns
            .iter()
            .zip(&table.profiles)
            .enumerate()
            .map(|(index, (name, profile))| {
                let values = table.column(index);
                let is_entity_column = is_entity_label(name);
                let mut entity_values = 0;
                for cell in values.iter().flatten().filter(|cell| cell.kind == CellType::Text) {
                    if entities.observe(&cell.value, Some(name)) {
                        entity_values += 1;
                    }
                }
                ColumnSummary {
                    name: truncate_chars(name, self.max_label_chars),
                    value_type: profile.value_type,
                    profile: profile.clone(),
                    samples: self.samples(values.iter().flatten().map(|cell| cell.to_string())),
                    is_entity_column: is_entity_column || (entity_values > 0 && entity_values * 2 >= profile.non_null),
                }
            })
            .collect();
        TableSummary {
            range: table.range,
            header_rows: table.header_rows,
            row_count: table.rows.len(),
            columns,
            completeness: table.completeness(),
        }
    }

    /// First distinct values, cut to the sample length; none when samples are disabled.
    fn samples(&self, values: impl Iterator<Item = String>) -> Vec<String> {
        if self.max_samples == 0 || self.max_sample_chars == 0 {
            return Vec::new();
        }
        let mut samples: Vec<String> = Vec::with_capacity(self.max_samples);
        for value in values {
            let value = truncate_chars(&collapse_whitespace(&value), self.max_sample_chars);
            if !value.is_empty() && !samples.contains(&value) {
                samples.push(value);
                if samples.len() == self.max_samples {
                    break;
                }
            }
        }
        samples
    }

    fn outline(&self, node: &KeyValueNode) -> KeyValueOutline {
        let key_chars = node.key.chars().count();
        let narrative = node.value.is_none() && key_chars > self.max_label_chars;
        let value_type = match &node.value {
            Some(value) => self.inferencer.infer(value).map(|inferred| inferred.value_type),
            None if narrative => Some(ValueType::Text),
            None => None,
        };
        KeyValueOutline {
            key: if narrative { String::new() } else { truncate_chars(&node.key, self.max_label_chars) },
            key_chars,
            narrative,
            value_type,
            depth: node.depth,
            children: node.children.iter().map(|child| self.outline(child)).collect(),
        }
    }
}

/// Sheet classification from its regions: the common kind, or MIXED when kinds differ.
fn classify(regions: &[Region]) -> StructureType {
    let kinds: HashSet<StructureType> = regions
        .iter()
        .map(|region| region.kind)
        .filter(|kind| *kind != StructureType::Empty)
        .collect();
    match kinds.len() {
        0 => StructureType::Empty,
        1 => kinds.into_iter().next().unwrap_or(StructureType::Mixed),
        _ => StructureType::Mixed,
    }
}

/// Table completeness weighted by table size, or the occupied share of the used range.
fn completeness(sheet: &RawSheet, bounds: Option<CellRange>, tables: &[Table]) -> f64 {
    let cells: usize = tables.iter().map(|table| table.rows.len() * table.columns.len()).sum();
    if cells > 0 {
        let filled: f64 = tables
            .iter()
            .map(|table| table.completeness() * (table.rows.len() * table.columns.len()) as f64)
            .sum();
        return filled / cells as f64;
    }
    match bounds {
        Some(range) if range.area() > 0 => sheet.len() as f64 / range.area() as f64,
        _ => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::keyvalue::KeyValueExtractor;
    use crate::inference::dates::Granularity;
    use crate::inference::structure::tests::fiscal_statement;
    use crate::inference::structure::tests::offset_table;
    use crate::inference::structure::StructureDetector;
    use crate::inference::table::TableExtractor;

    fn analyze<'a>(sheet: &'a RawSheet, config: &EngineConfig) -> (SheetMetadata, Vec<Warning>) {
        let detection = StructureDetector::new(config).detect(sheet);
        let extractor = TableExtractor::new(config);
        let tables = detection
            .regions
            .iter()
            .filter(|region| region.kind == StructureType::Tabular)
            .map(|region| extractor.extract(sheet, region).0)
            .collect();
        let key_values = detection
            .regions
            .iter()
            .filter(|region| region.kind == StructureType::KeyValue)
            .flat_map(|region| KeyValueExtractor::default().extract(sheet, region))
            .collect();
        let analysis = SheetAnalysis {
            sheet,
            regions: detection.regions,
            tables,
            key_values,
        };
        MetadataAggregator::new(config).aggregate(&analysis)
    }

    #[test]
    fn table_metadata_is_bounded() {
        let sheet = offset_table();
        let config = EngineConfig {
            max_samples: 2,
            max_sample_chars: 6,
            ..EngineConfig::default()
        };
        let (metadata, _) = analyze(&sheet, &config);
        assert_eq!(metadata.name, "Receivables");
        assert_eq!(metadata.tables.len(), 1);
        let table = &metadata.tables[0];
        assert_eq!(table.range.to_string(), "B5:E15");
        assert_eq!(table.row_count, 10);
        let names: Vec<&str> = table.columns.iter().map(|column| column.name.as_str()).collect();
        assert_eq!(names, vec!["Date", "Client", "Amount", "Status"]);
        assert_eq!(table.columns[1].samples, vec!["Clien…"]);
        assert!(table.columns[1].is_entity_column);
        assert_eq!(table.columns[3].samples, vec!["Open", "Paid"]);
        assert!(table.columns.iter().all(|column| column.samples.len() <= 2));
        assert_eq!(metadata.dates.count, 10);
        assert_eq!(metadata.dates.fiscal_years, vec!["FY2024"]);
        assert_eq!(metadata.entities.len(), 10);
        assert_eq!(metadata.entities.iter().filter(|entity| entity.primary).count(), 1);
    }

    #[test]
    fn samples_can_be_disabled() {
        let sheet = offset_table();
        let config = EngineConfig {
            max_samples: 0,
            ..EngineConfig::default()
        };
        let (metadata, _) = analyze(&sheet, &config);
        assert!(metadata.tables[0].columns.iter().all(|column| column.samples.is_empty()));
    }

    #[test]
    fn key_value_outline_drops_values() {
        let sheet = RawSheet::from_grid(
            "Profile",
            &[
                vec!["Company:", "Acme Holdings Ltd"],
                vec!["Founded:", "2011"],
                vec!["Report date:", "31 Dec 2024"],
                vec!["Employees:", "250"],
                vec!["Country:", "Portugal"],
            ],
        );
        let (metadata, _) = analyze(&sheet, &EngineConfig::default());
        assert_eq!(metadata.structure, StructureType::KeyValue);
        let keys: Vec<&str> = metadata.key_values.iter().map(|outline| outline.key.as_str()).collect();
        assert_eq!(keys, vec!["Company", "Founded", "Report date", "Employees", "Country"]);
        assert_eq!(metadata.key_values[0].value_type, Some(ValueType::Text));
        assert_eq!(metadata.key_values[2].value_type, Some(ValueType::Date));
        assert_eq!(metadata.key_values[3].value_type, Some(ValueType::Integer));
        assert_eq!(metadata.primary_entity().map(|entity| entity.name.as_str()), Some("Acme Holdings Ltd"));

        let json = serde_json::to_string(&metadata).unwrap();
        assert!(!json.contains("Portugal"));
        assert!(!json.contains("31 Dec 2024"));
    }

    fn flatten(outlines: &[KeyValueOutline]) -> Vec<&KeyValueOutline> {
        outlines
            .iter()
            .flat_map(|outline| std::iter::once(outline).chain(flatten(&outline.children)))
            .collect()
    }

    #[test]
    fn narrative_rows_keep_only_their_length() {
        let note = "Note the borrower John Smith passport 123456789 must countersign every drawdown request";
        let sheet = RawSheet::from_grid(
            "Profile",
            &[
                vec!["Company:", "Acme Holdings Ltd"],
                vec!["Founded:", "2011"],
                vec![note, ""],
                vec!["Country:", "Portugal"],
            ],
        );
        let (metadata, _) = analyze(&sheet, &EngineConfig::default());
        assert_eq!(metadata.structure, StructureType::KeyValue);
        let outlines = flatten(&metadata.key_values);
        let narrative: Vec<&&KeyValueOutline> = outlines.iter().filter(|outline| outline.narrative).collect();
        assert_eq!(narrative.len(), 1);
        assert_eq!(narrative[0].key, "");
        assert_eq!(narrative[0].key_chars, note.chars().count());
        assert_eq!(narrative[0].value_type, Some(ValueType::Text));
        assert!(outlines.iter().any(|outline| outline.key == "Company" && !outline.narrative));

        let json = serde_json::to_string(&metadata).unwrap();
        assert!(!json.contains("passport"));
        assert!(!json.contains("123456789"));
    }

    #[test]
    fn labels_are_cut_to_the_label_limit() {
        let config = EngineConfig {
            max_label_chars: 4,
            ..EngineConfig::default()
        };
        let (metadata, _) = analyze(&offset_table(), &config);
        let names: Vec<&str> = metadata.tables[0].columns.iter().map(|column| column.name.as_str()).collect();
        assert_eq!(names, vec!["Date", "Cli…", "Amo…", "Sta…"]);

        let sheet = RawSheet::from_grid(
            "Profile",
            &[vec!["Company:", "Acme Holdings Ltd"], vec!["Founded:", "2011"], vec!["Country:", "Portugal"]],
        );
        let (metadata, _) = analyze(&sheet, &config);
        let outlines = flatten(&metadata.key_values);
        let keys: Vec<&str> = outlines.iter().map(|outline| outline.key.as_str()).collect();
        assert!(keys.iter().all(|key| key.chars().count() <= 4), "{keys:?}");
        assert!(keys.contains(&"Com…"));
    }

    #[test]
    fn period_headers_count_as_dates() {
        let (metadata, _) = analyze(&fiscal_statement(), &EngineConfig::default());
        assert_eq!(metadata.structure, StructureType::Tabular);
        assert_eq!(metadata.tables.len(), 1);
        assert_eq!(metadata.tables[0].row_count, 4);
        assert_eq!(metadata.dates.count, 3);
        assert_eq!(metadata.dates.fiscal_years, vec!["FY2022", "FY2023", "FY2024"]);
        assert_eq!(metadata.dates.dominant_granularity, Some(Granularity::FiscalYear));
    }

    #[test]
    fn ambiguous_dates_warn() {
        let sheet = RawSheet::from_grid("Dates", &[vec!["Date", "Value"], vec!["03/04/2024", "1"], vec!["05/06/2024", "2"]]);
        let (metadata, warnings) = analyze(&sheet, &EngineConfig::default());
        assert_eq!(metadata.dates.low_confidence, 2);
        assert!(warnings.iter().any(|warning| warning.kind == WarningKind::LowConfidenceDate));
    }

    #[test]
    fn empty_sheet_metadata() {
        let sheet = RawSheet::from_grid::<Vec<&str>, &str>("Blank", &[]);
        let (metadata, warnings) = analyze(&sheet, &EngineConfig::default());
        assert_eq!(metadata.structure, StructureType::Empty);
        assert_eq!(metadata.row_count, 0);
        assert_eq!(metadata.completeness, 0.0);
        assert!(warnings.is_empty());
    }

    #[test]
    fn batch_summary_counts() {
        let sheet = offset_table();
        let (metadata, _) = analyze(&sheet, &EngineConfig::default());
        let ok = FileResult {
            file: "a.xlsx".to_owned(),
            strategy: Some(Strategy::OpenXml),
            sheets: vec![metadata],
            status: Status::Ok,
            warnings: Vec::new(),
            elapsed_ms: 5,
        };
        let failed = FileResult::failed("b.xlsx", vec![Warning::new(WarningKind::Timeout, "timed out")], 10);
        let batch = BatchResult::new(vec![ok, failed]);
        assert_eq!(batch.summary.total, 2);
        assert_eq!(batch.summary.ok, 1);
        assert_eq!(batch.summary.failed, 1);
        assert_eq!(batch.summary.structures.values().sum::<usize>(), 1);
        assert_eq!(batch.summary.primary_entities.len(), 1);
        assert_eq!(batch.summary.earliest.map(|span| span.start.to_string()), Some("2024-03-13".to_owned()));

        let json = serde_json::to_value(&batch).unwrap();
        assert_eq!(json["files"][1]["status"], "FAILED");
        assert_eq!(json["files"][1]["warnings"][0]["kind"], "timeout");
    }
}
