//! Region detection.
//!
//! A sheet is cut into blocks by recursive projection: rows split at two or more blank
//! rows, columns at one or more blank columns. Each block is then scored as a table
//! (a header row over aligned, consistently typed body rows) and as a key-value list
//! (narrow rows led by text labels). The better candidate wins; a block that is neither
//! becomes `MIXED`.

use crate::config::EngineConfig;
use crate::error::SheetSleuthError;
use crate::helpers::string::leading_indent;
use crate::inference::column::parse_currency;
use crate::inference::column::parse_number;
use crate::inference::column::TypeInferencer;
use crate::inference::column::ValueType;
use crate::inference::dates::DateRecognizer;
use crate::inference::dates::Granularity;
use crate::inference::HeaderBand;
use crate::inference::Region;
use crate::inference::StructureType;
use crate::metadata::Warning;
use crate::metadata::WarningKind;
use crate::spreadsheet::cell::Cell;
use crate::spreadsheet::cell::CellType;
use crate::spreadsheet::range::CellRange;
use crate::spreadsheet::sheet::RawSheet;
use std::collections::HashSet;
use std::sync::LazyLock;
use tracing::debug;

/// Blank rows that separate two blocks.
const ROW_GAP: usize = 2;
/// Blank columns that separate two blocks.
const COL_GAP: usize = 1;
/// Body rows inspected when validating a header candidate.
const BODY_SAMPLE_ROWS: usize = 20;
const MIN_BODY_ALIGNMENT: f64 = 0.5;
const MIN_COLUMN_CONSISTENCY: f64 = 0.6;
const MAX_KEY_VALUE_WIDTH: f64 = 2.5;
const MIN_LABEL_SHARE: f64 = 0.6;

const HEADER_KEYWORDS: [&str; 32] = [
    "name", "date", "amount", "total", "id", "description", "type", "value", "qty", "quantity", "price", "balance",
    "account", "period", "year", "month", "code", "status", "category", "number", "no", "rate", "currency", "client",
    "company", "customer", "vendor", "country", "city", "address", "email", "phone",
];

static LABEL_DATES: LazyLock<DateRecognizer> = LazyLock::new(DateRecognizer::default);

/// Text that reads as a label: not a number, amount, percentage or date.
pub(crate) fn is_label(cell: &Cell) -> bool {
    if cell.kind != CellType::Text {
        return false;
    }
    let text = cell.value.trim();
    !text.is_empty()
        && parse_number(text).is_none()
        && parse_currency(text).is_none()
        && text.strip_suffix('%').and_then(parse_number).is_none()
        && LABEL_DATES.recognize(text).is_err()
}

/// Text that can name a header column: a label, or a period such as `FY2024`, `Q1 2025`
/// or `Jan-24`. Bare numbers and single days stay data.
pub(crate) fn is_header_text(cell: &Cell) -> bool {
    if is_label(cell) {
        return true;
    }
    let text = cell.value.trim();
    cell.kind == CellType::Text
        && parse_number(text).is_none()
        && LABEL_DATES
            .recognize(text)
            .map(|date| date.span.granularity != Granularity::Day)
            .unwrap_or(false)
}

/// Components of a header-row score, each in `[0, 1]`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct HeaderScore {
    pub score: f64,
    /// Populated cells in the scored span
    pub populated: usize,
    /// Share of populated cells that are labels or period names
    pub text_share: f64,
    /// Distinct values over populated cells
    pub distinctness: f64,
    /// Populated share of the span
    pub fill: f64,
    /// Share of header columns whose next value differs in type or weight
    pub contrast: f64,
    /// Share of cells holding a header keyword or starting with a capital
    pub keyword_share: f64,
}

/// Scores how much `row` (between columns `left` and `right`) looks like a table header.
pub fn score_header_row(sheet: &RawSheet, row: usize, left: usize, right: usize) -> HeaderScore {
    let cells: Vec<(usize, &Cell)> = (left..=right)
        .filter_map(|col| sheet.visible(row, col).filter(|cell| !cell.is_blank()).map(|cell| (col, cell)))
        .collect();
    if cells.is_empty() {
        return HeaderScore::default();
    }
    let populated = cells.len() as f64;

    let labels = cells.iter().filter(|(_, cell)| is_header_text(cell)).count();
    let distinct: HashSet<String> = cells.iter().map(|(_, cell)| cell.value.trim().to_lowercase()).collect();
    let keywords = cells
        .iter()
        .filter(|(_, cell)| {
            let text = cell.value.trim();
            let lower = text.to_lowercase();
            text.chars().next().map(char::is_uppercase).unwrap_or(false)
                || lower
                    .split(|character: char| !character.is_alphanumeric())
                    .any(|word| HEADER_KEYWORDS.contains(&word))
        })
        .count();

    // The next populated row, skipping at most one blank row
    let below = (row + 1..=row + 2).find(|next| !sheet.row_span(*next, left, right).is_empty());
    let contrast = match below {
        Some(below) => {
            let mut compared = 0usize;
            let mut differing = 0usize;
            for (col, cell) in &cells {
                let Some(next) = sheet.get(below, *col) else {
                    continue;
                };
                compared += 1;
                if is_header_text(cell) && (!is_header_text(next) || (cell.style.bold && !next.style.bold)) {
                    differing += 1;
                }
            }
            if compared == 0 { 0.5 } else { differing as f64 / compared as f64 }
        }
        None => 0.5,
    };

    let text_share = labels as f64 / populated;
    let distinctness = distinct.len() as f64 / populated;
    let fill = populated / (right - left + 1) as f64;
    let keyword_share = keywords as f64 / populated;
    let score = 0.3 * text_share + 0.15 * distinctness + 0.15 * fill + 0.25 * contrast + 0.15 * keyword_share;
    HeaderScore {
        score,
        populated: cells.len(),
        text_share,
        distinctness,
        fill,
        contrast,
        keyword_share,
    }
}

/// Regions of a sheet plus the warnings raised while classifying them.
#[derive(Clone, Debug, Default)]
pub struct Detection {
    pub regions: Vec<Region>,
    pub warnings: Vec<Warning>,
}

/// A header row that passed every table check.
struct TableCandidate {
    header: HeaderBand,
    range: CellRange,
    confidence: f64,
    /// Rows after a blank row where a second table starts
    remainder: Option<CellRange>,
}

pub struct StructureDetector {
    max_scan_rows: usize,
    max_scan_cols: usize,
    min_data_density: f64,
    header_confidence_threshold: f64,
    inferencer: TypeInferencer,
}

impl StructureDetector {
    pub fn new(config: &EngineConfig) -> Self {
        StructureDetector {
            max_scan_rows: config.max_scan_rows.max(1),
            max_scan_cols: config.max_scan_cols.max(1),
            min_data_density: config.min_data_density,
            header_confidence_threshold: config.header_confidence_threshold,
            inferencer: TypeInferencer::new(DateRecognizer::from_config(config)),
        }
    }

    /// Classifies every non-empty area of the sheet. Regions are disjoint and ordered by (top, left).
    pub fn detect(&self, sheet: &RawSheet) -> Detection {
        let Some(bounds) = sheet.bounds().filter(|_| !sheet.is_empty()) else {
            return Detection {
                regions: vec![Region {
                    range: CellRange::cell(0, 0),
                    kind: StructureType::Empty,
                    confidence: 1.0,
                    header: None,
                }],
                warnings: Vec::new(),
            };
        };

        let mut detection = Detection::default();
        for block in blocks(sheet, bounds) {
            self.classify(sheet, block, &mut detection);
        }
        merge_adjacent(sheet, &mut detection.regions);
        detection
            .regions
            .sort_by_key(|region| (region.range.top, region.range.left));
        debug!(
            sheet = %sheet.name,
            regions = detection.regions.len(),
            "Structure detected"
        );
        detection
    }

    fn classify(&self, sheet: &RawSheet, block: CellRange, detection: &mut Detection) {
        let table = self.find_table(sheet, block);
        let key_value = self.key_value_confidence(sheet, block);
        match (table, key_value) {
            (Some(table), key_value) if key_value.map(|confidence| confidence <= table.confidence).unwrap_or(true) => {
                if table.header.row > block.top {
                    let above = CellRange::new(block.top, block.left, table.header.row - 1, block.right);
                    for part in blocks(sheet, above) {
                        self.classify(sheet, part, detection);
                    }
                }
                detection.regions.push(Region {
                    range: bounding(sheet, table.range).unwrap_or(table.range),
                    kind: StructureType::Tabular,
                    confidence: table.confidence.clamp(0.0, 1.0),
                    header: Some(table.header),
                });
                if let Some(remainder) = table.remainder {
                    for part in blocks(sheet, remainder) {
                        self.classify(sheet, part, detection);
                    }
                }
            }
            (_, Some(confidence)) => detection.regions.push(Region {
                range: block,
                kind: StructureType::KeyValue,
                confidence,
                header: None,
            }),
            _ => {
                let confidence = self.best_header_score(sheet, block) * 0.5;
                let error = SheetSleuthError::StructureDetectionError {
                    range: block.to_string(),
                    confidence,
                };
                detection
                    .warnings
                    .push(Warning::on_sheet(WarningKind::StructureDetection, &sheet.name, error.to_string()));
                detection.regions.push(Region {
                    range: block,
                    kind: StructureType::Mixed,
                    confidence,
                    header: None,
                });
            }
        }
    }

    fn scan_right(&self, block: CellRange) -> usize {
        (block.left + self.max_scan_cols - 1).min(block.right)
    }

    fn best_header_score(&self, sheet: &RawSheet, block: CellRange) -> f64 {
        let last = (block.top + self.max_scan_rows - 1).min(block.bottom);
        (block.top..=last)
            .map(|row| score_header_row(sheet, row, block.left, self.scan_right(block)).score)
            .fold(0.0, f64::max)
    }

    /// Picks the best header row within the scan window and splits off a stacked table below it.
    fn find_table(&self, sheet: &RawSheet, block: CellRange) -> Option<TableCandidate> {
        let last = (block.top + self.max_scan_rows - 1).min(block.bottom);
        let mut best: Option<TableCandidate> = None;
        for row in block.top..=last {
            if let Some(candidate) = self.evaluate_header(sheet, block, row) {
                if best.as_ref().map(|best| candidate.confidence > best.confidence).unwrap_or(true) {
                    best = Some(candidate);
                }
            }
        }
        let mut table = best?;

        let body_top = table.header.row + table.header.rows;
        for gap in body_top..block.bottom {
            if !is_blank_row(sheet, gap, block.left, block.right) {
                continue;
            }
            let rest = CellRange::new(gap + 1, block.left, block.bottom, block.right);
            if self.evaluate_header(sheet, rest, gap + 1).is_some() {
                table.range.bottom = gap - 1;
                table.remainder = Some(rest);
                break;
            }
        }
        Some(table)
    }

    /// Checks a header at `row`: score, at least two labels, aligned and consistently typed
    /// body rows, and enough density below it.
    fn evaluate_header(&self, sheet: &RawSheet, block: CellRange, row: usize) -> Option<TableCandidate> {
        let score = score_header_row(sheet, row, block.left, self.scan_right(block));
        if score.score < self.header_confidence_threshold || score.populated < 2 {
            return None;
        }
        let rows = header_rows(sheet, block, row);
        let body_top = row + rows;
        if body_top > block.bottom {
            return None;
        }

        let header_cols: HashSet<usize> = (row..body_top)
            .flat_map(|header_row| (block.left..=block.right).filter(move |col| sheet.is_occupied(header_row, *col)))
            .collect();
        let body_bottom = (body_top + BODY_SAMPLE_ROWS - 1).min(block.bottom);
        let mut aligned = 0usize;
        let mut total = 0usize;
        let mut columns: Vec<Vec<ValueType>> = vec![Vec::new(); block.width()];
        for body_row in body_top..=body_bottom {
            for cell in sheet.row_span(body_row, block.left, block.right) {
                total += 1;
                if header_cols.contains(&cell.col) {
                    aligned += 1;
                }
                if let Some(inferred) = self.inferencer.infer(cell) {
                    columns[cell.col - block.left].push(inferred.value_type);
                }
            }
        }
        if total == 0 {
            return None;
        }
        let alignment = aligned as f64 / total as f64;
        if alignment <= MIN_BODY_ALIGNMENT {
            return None;
        }
        let consistency = columns
            .iter()
            .filter(|types| !types.is_empty())
            .map(|types| {
                let majority = ValueType::detect(types);
                types.iter().filter(|kind| kind.conforms_to(majority)).count() as f64 / types.len() as f64
            })
            .fold(1.0, f64::min);
        if consistency < MIN_COLUMN_CONSISTENCY {
            return None;
        }

        let range = CellRange::new(row, block.left, block.bottom, block.right);
        let populated: usize = (range.top..=range.bottom)
            .map(|row| sheet.row_span(row, range.left, range.right).len())
            .sum();
        let density = populated as f64 / range.area() as f64;
        if density < self.min_data_density {
            return None;
        }

        let confidence = (score.score + alignment + consistency) / 3.0 * (0.75 + 0.25 * score.contrast);
        Some(TableCandidate {
            header: HeaderBand { row, rows },
            range,
            confidence,
            remainder: None,
        })
    }

    /// Confidence of a key-value reading, or `None` when the block is too wide or not label-led.
    fn key_value_confidence(&self, sheet: &RawSheet, block: CellRange) -> Option<f64> {
        let leads: Vec<(&Cell, usize)> = (block.top..=block.bottom)
            .filter_map(|row| {
                let cells = sheet.row_span(row, block.left, block.right);
                cells.first().map(|first| (first, cells.len()))
            })
            .collect();
        if leads.is_empty() {
            return None;
        }
        let width = leads.iter().map(|(_, count)| *count).sum::<usize>() as f64 / leads.len() as f64;
        if width > MAX_KEY_VALUE_WIDTH {
            return None;
        }
        let label_share = leads.iter().filter(|(cell, _)| is_label(cell)).count() as f64 / leads.len() as f64;
        if label_share < MIN_LABEL_SHARE {
            return None;
        }

        let indentation = leads
            .iter()
            .any(|(cell, _)| cell.style.indent > 0 || leading_indent(&cell.value) > 0);
        let bold = leads.iter().any(|(cell, _)| cell.style.bold);
        let colon = leads.iter().any(|(cell, _)| cell.value.contains(':'));
        let offsets: HashSet<usize> = leads.iter().map(|(cell, _)| cell.col).collect();
        let cues = [indentation, bold, colon, offsets.len() > 1].iter().filter(|cue| **cue).count();
        Some((0.4 + 0.3 * label_share + 0.075 * cues as f64).min(1.0))
    }
}

/// Two header rows when the first holds a horizontal merge and the second reads as labels.
fn header_rows(sheet: &RawSheet, block: CellRange, row: usize) -> usize {
    let has_group = sheet
        .merges()
        .iter()
        .any(|merge| merge.top == row && merge.width() > 1 && merge.overlaps_columns(&block));
    if has_group && row < block.bottom {
        let next = score_header_row(sheet, row + 1, block.left, block.right);
        if next.populated >= 2 && next.text_share >= 0.5 {
            return 2;
        }
    }
    1
}

fn is_blank_row(sheet: &RawSheet, row: usize, left: usize, right: usize) -> bool {
    (left..=right).all(|col| !sheet.is_occupied(row, col))
}

/// Splits a range into blocks separated by blank rows and columns, until no cut applies.
pub(crate) fn blocks(sheet: &RawSheet, range: CellRange) -> Vec<CellRange> {
    let mut result = Vec::new();
    let mut pending = vec![range];
    while let Some(range) = pending.pop() {
        let parts = split(sheet, range);
        if parts.len() == 1 && parts[0] == range {
            result.push(range);
        } else {
            pending.extend(parts);
        }
    }
    result.sort();
    result
}

fn split(sheet: &RawSheet, range: CellRange) -> Vec<CellRange> {
    let mut parts = Vec::new();
    for (top, bottom) in runs(&row_occupancy(sheet, range), ROW_GAP) {
        let band = CellRange::new(range.top + top, range.left, range.top + bottom, range.right);
        for (left, right) in runs(&col_occupancy(sheet, band), COL_GAP) {
            let block = CellRange::new(band.top, range.left + left, band.bottom, range.left + right);
            if let Some(block) = bounding(sheet, block) {
                parts.push(block);
            }
        }
    }
    parts
}

/// Tightest range around the occupied cells of `range`.
fn bounding(sheet: &RawSheet, range: CellRange) -> Option<CellRange> {
    let rows = row_occupancy(sheet, range);
    let top = rows.iter().position(|occupied| *occupied)?;
    let bottom = rows.iter().rposition(|occupied| *occupied)?;
    let band = CellRange::new(range.top + top, range.left, range.top + bottom, range.right);
    let cols = col_occupancy(sheet, band);
    let left = cols.iter().position(|occupied| *occupied)?;
    let right = cols.iter().rposition(|occupied| *occupied)?;
    Some(CellRange::new(band.top, range.left + left, band.bottom, range.left + right))
}

/// Merged areas anchored on a value, clipped to `range`.
fn valued_merges<'a>(sheet: &'a RawSheet, range: CellRange) -> impl Iterator<Item = CellRange> + 'a {
    sheet
        .merges()
        .iter()
        .filter(move |merge| merge.intersects(&range) && sheet.get(merge.top, merge.left).is_some())
        .map(move |merge| {
            CellRange::new(
                merge.top.max(range.top),
                merge.left.max(range.left),
                merge.bottom.min(range.bottom),
                merge.right.min(range.right),
            )
        })
}

fn row_occupancy(sheet: &RawSheet, range: CellRange) -> Vec<bool> {
    let mut rows: Vec<bool> = (range.top..=range.bottom)
        .map(|row| !sheet.row_span(row, range.left, range.right).is_empty())
        .collect();
    for merge in valued_merges(sheet, range) {
        for row in merge.top..=merge.bottom {
            rows[row - range.top] = true;
        }
    }
    rows
}

fn col_occupancy(sheet: &RawSheet, range: CellRange) -> Vec<bool> {
    let mut cols = vec![false; range.width()];
    for row in range.top..=range.bottom {
        for cell in sheet.row_span(row, range.left, range.right) {
            cols[cell.col - range.left] = true;
        }
    }
    for merge in valued_merges(sheet, range) {
        for col in merge.left..=merge.right {
            cols[col - range.left] = true;
        }
    }
    cols
}

/// Runs of occupied indices, broken where `gap` or more unoccupied indices separate them.
fn runs(occupied: &[bool], gap: usize) -> Vec<(usize, usize)> {
    let mut runs = Vec::new();
    let mut current: Option<(usize, usize)> = None;
    for (index, is_occupied) in occupied.iter().enumerate() {
        if !is_occupied {
            continue;
        }
        current = match current {
            Some((start, end)) if index - end - 1 < gap => Some((start, index)),
            Some(run) => {
                runs.push(run);
                Some((index, index))
            }
            None => Some((index, index)),
        };
    }
    runs.extend(current);
    runs
}

/// Joins `MIXED` or `KEY_VALUE` regions of the same kind that sit above one another,
/// share columns and are separated only by blank rows, when the union touches no other region.
fn merge_adjacent(sheet: &RawSheet, regions: &mut Vec<Region>) {
    regions.sort_by_key(|region| (region.range.top, region.range.left));
    loop {
        let mut merged = None;
        'search: for upper in 0..regions.len() {
            for lower in upper + 1..regions.len() {
                let (first, second) = (&regions[upper], &regions[lower]);
                if first.kind != second.kind
                    || !matches!(first.kind, StructureType::Mixed | StructureType::KeyValue)
                    || first.range.bottom >= second.range.top
                    || !first.range.overlaps_columns(&second.range)
                {
                    continue;
                }
                let union = first.range.union(&second.range);
                let separated_by_blanks = (first.range.bottom + 1..second.range.top)
                    .all(|row| is_blank_row(sheet, row, union.left, union.right));
                let touches_other = regions
                    .iter()
                    .enumerate()
                    .any(|(index, region)| index != upper && index != lower && region.range.intersects(&union));
                if separated_by_blanks && !touches_other {
                    merged = Some((upper, lower, union));
                    break 'search;
                }
            }
        }
        let Some((upper, lower, union)) = merged else {
            break;
        };
        let removed = regions.remove(lower);
        let region = &mut regions[upper];
        region.range = union;
        region.confidence = region.confidence.min(removed.confidence);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::spreadsheet::cell::CellStyle;

    fn detect(sheet: &RawSheet) -> Detection {
        StructureDetector::new(&EngineConfig::default()).detect(sheet)
    }

    /// Title at A1 and a table with its header at B5.
    pub(crate) fn offset_table() -> RawSheet {
        let mut rows: Vec<Vec<String>> = vec![vec!["Quarterly receivables".to_owned()], vec![], vec![], vec![]];
        rows.push(["", "Date", "Client", "Amount", "Status"].map(String::from).to_vec());
        for index in 1..=10 {
            rows.push(vec![
                String::new(),
                format!("{:02}/03/2024", index + 12),
                format!("Client {index} Ltd"),
                format!("{}", index * 150),
                if index % 2 == 0 { "Paid".to_owned() } else { "Open".to_owned() },
            ]);
        }
        RawSheet::from_grid("Receivables", &rows)
    }

    #[test]
    fn table_at_offset() {
        let detection = detect(&offset_table());
        let table = detection
            .regions
            .iter()
            .find(|region| region.kind == StructureType::Tabular)
            .unwrap();
        assert_eq!(table.range, CellRange::new(4, 1, 14, 4));
        assert_eq!(table.range.to_string(), "B5:E15");
        assert_eq!(table.header, Some(HeaderBand { row: 4, rows: 1 }));
        assert!(table.confidence > 0.5);
        assert_eq!(detection.regions[0].range, CellRange::cell(0, 0));
        assert_ne!(detection.regions[0].kind, StructureType::Tabular);
    }

    /// A profit and loss statement with one column per fiscal year.
    pub(crate) fn fiscal_statement() -> RawSheet {
        RawSheet::from_grid(
            "P&L",
            &[
                vec!["Particulars", "FY2022", "FY2023", "FY2024"],
                vec!["Revenue", "1200", "1350", "1500"],
                vec!["Cost of sales", "700", "760", "820"],
                vec!["Gross profit", "500", "590", "680"],
                vec!["Net profit", "210", "260", "300"],
            ],
        )
    }

    #[test]
    fn period_columns_form_a_table() {
        let regions = detect(&fiscal_statement()).regions;
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].kind, StructureType::Tabular);
        assert_eq!(regions[0].range.to_string(), "A1:D5");
        assert_eq!(regions[0].header, Some(HeaderBand { row: 0, rows: 1 }));

        let monthly = RawSheet::from_grid(
            "Monthly",
            &[
                vec!["Particulars", "Jan-24", "Feb-24", "Mar-24"],
                vec!["Revenue", "100", "110", "120"],
                vec!["Expenses", "80", "85", "90"],
            ],
        );
        let regions = detect(&monthly).regions;
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].kind, StructureType::Tabular);
        assert_eq!(regions[0].range.to_string(), "A1:D3");
    }

    #[test]
    fn period_names_are_header_text_but_not_labels() {
        let sheet = RawSheet::from_grid("Periods", &[vec!["FY2023", "Q1 2025", "Jan-24", "31/12/2024", "2024", "Revenue"]]);
        let header_text: Vec<bool> = (0..6).map(|col| is_header_text(sheet.get(0, col).unwrap())).collect();
        assert_eq!(header_text, vec![true, true, true, false, false, true]);
        let labels: Vec<bool> = (0..6).map(|col| is_label(sheet.get(0, col).unwrap())).collect();
        assert_eq!(labels, vec![false, false, false, false, false, true]);
    }

    /// Rows 1 to 4 and column A blank, header in B5.
    #[test]
    fn blank_padding_around_a_table() {
        let mut rows: Vec<Vec<String>> = vec![vec![]; 4];
        rows.push(["", "Date", "Client", "Amount", "Status"].map(String::from).to_vec());
        for index in 1..=6 {
            rows.push(vec![
                String::new(),
                format!("{:02}/02/2025", index + 12),
                format!("Client {index} Ltd"),
                format!("{}", index * 75),
                "Open".to_owned(),
            ]);
        }
        let detection = detect(&RawSheet::from_grid("Padded", &rows));
        assert_eq!(detection.regions.len(), 1);
        assert_eq!(detection.regions[0].kind, StructureType::Tabular);
        assert_eq!(detection.regions[0].range.to_string(), "B5:E11");
        assert_eq!(detection.regions[0].header, Some(HeaderBand { row: 4, rows: 1 }));
    }

    #[test]
    fn detection_is_idempotent() {
        let sheet = offset_table();
        assert_eq!(detect(&sheet).regions, detect(&sheet).regions);
    }

    #[test]
    fn empty_sheet() {
        let detection = detect(&RawSheet::from_grid::<Vec<&str>, &str>("Blank", &[]));
        assert_eq!(detection.regions.len(), 1);
        assert_eq!(detection.regions[0].kind, StructureType::Empty);
    }

    #[test]
    fn header_scores_prefer_labels_over_data() {
        let sheet = offset_table();
        let header = score_header_row(&sheet, 4, 1, 4);
        let data = score_header_row(&sheet, 5, 1, 4);
        assert!(header.score >= 0.7, "{header:?}");
        assert!(data.score < 0.7, "{data:?}");
        assert_eq!(header.populated, 4);
        assert_eq!(header.text_share, 1.0);
        assert_eq!(score_header_row(&sheet, 2, 0, 4), HeaderScore::default());
    }

    #[test]
    fn key_value_block() {
        let sheet = RawSheet::from_grid(
            "Profile",
            &[
                vec!["Company overview", ""],
                vec!["Name:", "Acme Ltd"],
                vec!["Founded", "2009"],
                vec!["  Headcount", "120"],
                vec!["Revenue", "$4,500,000"],
                vec!["Auditor", "Smith & Sons"],
            ],
        )
        .with_style(0, 0, CellStyle { bold: true, indent: 0 });
        let detection = detect(&sheet);
        assert_eq!(detection.regions.len(), 1);
        assert_eq!(detection.regions[0].kind, StructureType::KeyValue);
        assert!(detection.warnings.is_empty());
    }

    #[test]
    fn numeric_block_is_mixed_with_warning() {
        let sheet = RawSheet::from_grid("Numbers", &[vec!["1", "2", "3"], vec!["4", "5", "6"], vec!["7", "8", "9"]]);
        let detection = detect(&sheet);
        assert_eq!(detection.regions[0].kind, StructureType::Mixed);
        assert_eq!(detection.warnings.len(), 1);
        assert_eq!(detection.warnings[0].kind, WarningKind::StructureDetection);
        assert!(detection.warnings[0].message.contains("A1:C3"));
    }

    #[test]
    fn stacked_tables_split_on_single_blank_row() {
        let sheet = RawSheet::from_grid(
            "Stacked",
            &[
                vec!["Region", "Units", "Revenue"],
                vec!["North", "10", "1500"],
                vec!["South", "12", "1800"],
                vec![],
                vec!["Product", "Price", "Stock"],
                vec!["Widget", "2.5", "40"],
                vec!["Gadget", "3.75", "15"],
            ],
        );
        let regions = detect(&sheet).regions;
        assert_eq!(regions.len(), 2);
        assert_eq!(regions[0].range, CellRange::new(0, 0, 2, 2));
        assert_eq!(regions[1].range, CellRange::new(4, 0, 6, 2));
        assert!(regions.iter().all(|region| region.kind == StructureType::Tabular));
    }

    #[test]
    fn projection_cuts() {
        let sheet = RawSheet::from_grid(
            "Blocks",
            &[
                vec!["a", "b", "", "c"],
                vec!["d", "e", "", "f"],
                vec![],
                vec![],
                vec!["g", "h", "", ""],
            ],
        );
        let found = blocks(&sheet, sheet.bounds().unwrap());
        assert_eq!(
            found,
            vec![CellRange::new(0, 0, 1, 1), CellRange::new(0, 3, 1, 3), CellRange::new(4, 0, 4, 1)]
        );
        assert_eq!(runs(&[true, false, true, false, false, true], 2), vec![(0, 2), (5, 5)]);
    }

    #[test]
    fn separated_mixed_blocks_merge() {
        let sheet = RawSheet::from_grid("Numbers", &[vec!["1", "2", "3"], vec![], vec![], vec!["4", "5", "6"]]);
        let detection = detect(&sheet);
        assert_eq!(detection.regions.len(), 1);
        assert_eq!(detection.regions[0].range, CellRange::new(0, 0, 3, 2));
        assert_eq!(detection.regions[0].kind, StructureType::Mixed);
    }
}
