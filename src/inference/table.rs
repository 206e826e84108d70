use crate::config::EngineConfig;
use crate::helpers::string::collapse_whitespace;
use crate::inference::column::ColumnProfile;
use crate::inference::column::TypeInferencer;
use crate::inference::dates::DateMatch;
use crate::inference::dates::DateRecognizer;
use crate::inference::structure::is_header_text;
use crate::inference::Region;
use crate::metadata::Warning;
use crate::metadata::WarningKind;
use crate::spreadsheet::cell::Cell;
use crate::spreadsheet::range::CellRange;
use crate::spreadsheet::sheet::RawSheet;
use std::collections::HashSet;
use tracing::debug;

/// A table read from a tabular region. Every row holds exactly one value per column.
#[derive(Clone, Debug)]
pub struct Table<'a> {
    pub range: CellRange,
    pub header_rows: usize,
    /// Unique column names
    pub columns: Vec<String>,
    /// Data rows; covered cells of merged areas are `None`
    pub rows: Vec<Vec<Option<&'a Cell>>>,
    /// One profile per column
    pub profiles: Vec<ColumnProfile>,
    /// Dates found in date-typed columns
    pub dates: Vec<DateMatch>,
    pub synthesized_header: bool,
}

impl<'a> Table<'a> {
    /// Values of one column, top to bottom.
    pub fn column(&self, index: usize) -> Vec<Option<&'a Cell>> {
        self.rows.iter().map(|row| row.get(index).copied().flatten()).collect()
    }

    /// Share of non-null values over all cells.
    pub fn completeness(&self) -> f64 {
        let total = self.rows.len() * self.columns.len();
        if total == 0 {
            return 0.0;
        }
        let filled: usize = self.rows.iter().map(|row| row.iter().filter(|value| value.is_some()).count()).sum();
        filled as f64 / total as f64
    }
}

pub struct TableExtractor {
    inferencer: TypeInferencer,
}

impl TableExtractor {
    pub fn new(config: &EngineConfig) -> Self {
        TableExtractor {
            inferencer: TypeInferencer::new(DateRecognizer::from_config(config)),
        }
    }

    /// Reads a tabular region: resolves header rows and column names, collects the data rows
    /// and profiles each column.
    pub fn extract<'a>(&self, sheet: &'a RawSheet, region: &Region) -> (Table<'a>, Vec<Warning>) {
        let range = region.range;
        let mut warnings = Vec::new();
        let header_rows = match region.header {
            Some(band) if band.row == range.top => band.rows.min(range.height()),
            _ if looks_like_header(sheet, range) => 1,
            _ => 0,
        };

        let columns = if header_rows == 0 {
            warnings.push(Warning::on_sheet(
                WarningKind::SynthesizedHeader,
                &sheet.name,
                format!("No header row in {range}; column names synthesized"),
            ));
            (0..range.width()).map(|index| format!("Column_{}", index + 1)).collect()
        } else {
            column_names(sheet, range, header_rows)
        };

        let rows: Vec<Vec<Option<&'a Cell>>> = (range.top + header_rows..=range.bottom)
            .map(|row| (range.left..=range.right).map(|col| sheet.get(row, col)).collect::<Vec<_>>())
            .filter(|values| values.iter().any(Option::is_some))
            .collect();

        let mut profiles = Vec::with_capacity(columns.len());
        let mut dates = Vec::new();
        for index in 0..columns.len() {
            let values: Vec<Option<&Cell>> = rows.iter().map(|row| row[index]).collect();
            let analysis = self.inferencer.analyze_column(&values);
            profiles.push(analysis.profile);
            dates.extend(analysis.dates);
        }

        debug!(
            sheet = %sheet.name,
            range = %range,
            columns = columns.len(),
            rows = rows.len(),
            "Table extracted"
        );
        let table = Table {
            range,
            header_rows,
            columns,
            rows,
            profiles,
            dates,
            synthesized_header: header_rows == 0,
        };
        (table, warnings)
    }
}

/// Re-checks the first region row: at least two populated cells, all distinct, mostly labels.
fn looks_like_header(sheet: &RawSheet, range: CellRange) -> bool {
    if range.height() < 2 {
        return false;
    }
    let cells = sheet.row_span(range.top, range.left, range.right);
    let distinct: HashSet<String> = cells.iter().map(|cell| cell.value.trim().to_lowercase()).collect();
    let labels = cells.iter().filter(|cell| is_header_text(cell)).count();
    cells.len() >= 2 && distinct.len() == cells.len() && labels * 2 > cells.len()
}

/// Names from one or two header rows. Merged header cells repeat across their span, and a
/// second row under a group row combines as `"Group Sub"`.
fn column_names(sheet: &RawSheet, range: CellRange, header_rows: usize) -> Vec<String> {
    let text = |row: usize, col: usize| {
        sheet
            .visible(row, col)
            .map(|cell| collapse_whitespace(&cell.to_string()))
            .filter(|name| !name.is_empty())
    };
    let names: Vec<String> = (range.left..=range.right)
        .enumerate()
        .map(|(index, col)| {
            let top = text(range.top, col);
            let sub = if header_rows > 1 { text(range.top + 1, col) } else { None };
            match (top, sub) {
                (Some(top), Some(sub)) if top != sub => format!("{top} {sub}"),
                (Some(name), _) | (None, Some(name)) => name,
                (None, None) => format!("Column_{}", index + 1),
            }
        })
        .collect();
    deduplicate(names)
}

/// Appends `_1`, `_2`... to repeated names, skipping suffixes already taken.
pub(crate) fn deduplicate(names: Vec<String>) -> Vec<String> {
    let mut taken: HashSet<String> = HashSet::new();
    let mut result = Vec::with_capacity(names.len());
    for name in names {
        let mut unique = name.to_owned();
        let mut suffix = 1;
        while taken.contains(&unique) {
            unique = format!("{name}_{suffix}");
            suffix += 1;
        }
        taken.insert(unique.to_owned());
        result.push(unique);
    }
    result
}
