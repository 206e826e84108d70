use crate::inference::dates::DateMatch;
use crate::inference::dates::DateRecognizer;
use crate::spreadsheet::cell::Cell;
use crate::spreadsheet::cell::CellType;
use regex::Regex;
use serde::Deserialize;
use serde::Serialize;
use std::collections::HashMap;
use std::collections::HashSet;
use std::fmt::Display;
use std::sync::LazyLock;

/// Rows listed per column for values outside the column's type.
pub const MAX_MINORITY_ROWS: usize = 10;

const MISSING_MARKERS: [&str; 9] = ["n/a", "na", "null", "none", "-", "--", "---", "#n/a", "nan"];
const TRUE_LITERALS: [&str; 5] = ["true", "yes", "y", "on", "enabled"];
const FALSE_LITERALS: [&str; 5] = ["false", "no", "n", "off", "disabled"];
/// Longest first, so `US$` is stripped before `$`.
const CURRENCY_SYMBOLS: [&str; 9] = ["US$", "A$", "C$", "$", "€", "£", "¥", "₹", "₩"];
const CURRENCY_CODES: [&str; 14] = [
    "USD", "EUR", "GBP", "JPY", "CHF", "CAD", "AUD", "NZD", "INR", "CNY", "HKD", "SGD", "SEK", "ZAR",
];

static NUMBER_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[+-]?(?:\d{1,3}(?:,\d{3})+|\d+)?(\.\d+)?([eE][+-]?\d+)?$").expect("Hardcode regex pattern")
});

/// Value types assigned to columns and key-value leaves.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    Integer,
    Float,
    Currency,
    Boolean,
    Date,
    Text,
}

impl ValueType {
    pub const fn as_str(&self) -> &'static str {
        match self {
            ValueType::Integer => "integer",
            ValueType::Float => "float",
            ValueType::Currency => "currency",
            ValueType::Boolean => "boolean",
            ValueType::Date => "date",
            ValueType::Text => "text",
        }
    }

    #[inline]
    pub fn is_numeric(&self) -> bool {
        matches!(self, ValueType::Integer | ValueType::Float | ValueType::Currency)
    }

    /// Whether a value of this type fits a column of `column` type.
    #[inline]
    pub fn conforms_to(&self, column: ValueType) -> bool {
        *self == column || (*self == ValueType::Integer && column == ValueType::Float)
    }

    /// Majority vote over non-null value types; integers count towards a float column.
    /// Ties go to the more specific type. Falls back to `Text` when there are no values.
    pub fn detect(types: &[ValueType]) -> ValueType {
        let mut counts = HashMap::<ValueType, usize>::new();
        for kind in types {
            *counts.entry(*kind).or_default() += 1;
        }
        if let Some(integers) = counts.get(&ValueType::Integer).copied() {
            if let Some(floats) = counts.get_mut(&ValueType::Float) {
                *floats += integers;
            }
        }
        counts
            .into_iter()
            .max_by_key(|(kind, count)| (*count, std::cmp::Reverse(*kind)))
            .map(|(kind, _)| kind)
            .unwrap_or(ValueType::Text)
    }
}

impl Display for ValueType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The type of one non-null value, with its numeric value or recognized date.
#[derive(Clone, Debug, PartialEq)]
pub struct Inferred {
    pub value_type: ValueType,
    pub number: Option<f64>,
    pub date: Option<DateMatch>,
}

impl Inferred {
    fn of(value_type: ValueType) -> Self {
        Inferred {
            value_type,
            number: None,
            date: None,
        }
    }

    fn number(value_type: ValueType, number: f64) -> Self {
        Inferred {
            value_type,
            number: Some(number),
            date: None,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NumericStats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
}

impl NumericStats {
    fn from_values(values: &[f64]) -> Option<NumericStats> {
        if values.is_empty() {
            return None;
        }
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let mean = values.iter().sum::<f64>() / values.len() as f64;
        Some(NumericStats { min, max, mean })
    }
}

/// Statistics of one column; never holds the values themselves.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ColumnProfile {
    pub value_type: ValueType,
    pub non_null: usize,
    pub nulls: usize,
    pub unique: usize,
    /// Non-null values whose type does not conform to the column type
    pub minority: usize,
    /// Sheet rows (0-based) of the first minority values
    pub minority_rows: Vec<usize>,
    pub numeric: Option<NumericStats>,
    pub text_length: Option<NumericStats>,
    /// Share of non-null values
    pub completeness: f64,
}

/// A profiled column plus the dates it holds, for the sheet's date summary.
#[derive(Clone, Debug)]
pub struct ColumnAnalysis {
    pub profile: ColumnProfile,
    pub dates: Vec<DateMatch>,
}

/// Assigns value types to cells and profiles columns.
#[derive(Clone, Debug, Default)]
pub struct TypeInferencer {
    recognizer: DateRecognizer,
}

impl TypeInferencer {
    pub fn new(recognizer: DateRecognizer) -> Self {
        TypeInferencer { recognizer }
    }

    pub fn recognizer(&self) -> &DateRecognizer {
        &self.recognizer
    }

    /// Types one cell. Blank cells, error literals and missing markers yield `None`.
    pub fn infer(&self, cell: &Cell) -> Option<Inferred> {
        infer_with(&self.recognizer, cell)
    }

    /// Profiles one column of cells (`None` for absent values). Ambiguous numeric dates
    /// follow the day order proven by other values of the same column.
    pub fn analyze_column(&self, cells: &[Option<&Cell>]) -> ColumnAnalysis {
        let texts = cells
            .iter()
            .flatten()
            .filter(|cell| cell.kind == CellType::Text)
            .map(|cell| cell.value.as_str());
        let evidence = self.recognizer.column_evidence(texts);
        let recognizer = self.recognizer.with_evidence(evidence);

        let inferred: Vec<Option<(&Cell, Inferred)>> = cells
            .iter()
            .map(|cell| cell.and_then(|cell| infer_with(&recognizer, cell).map(|inferred| (cell, inferred))))
            .collect();
        let types: Vec<ValueType> = inferred.iter().flatten().map(|(_, value)| value.value_type).collect();
        let value_type = ValueType::detect(&types);

        let mut unique = HashSet::<String>::new();
        let mut minority_rows = Vec::new();
        let mut minority = 0;
        let mut numbers = Vec::new();
        let mut lengths = Vec::new();
        let mut dates = Vec::new();
        for (cell, value) in inferred.iter().flatten() {
            unique.insert(cell.to_string().trim().to_lowercase());
            if !value.value_type.conforms_to(value_type) {
                minority += 1;
                if minority_rows.len() < MAX_MINORITY_ROWS {
                    minority_rows.push(cell.row);
                }
                continue;
            }
            if let Some(number) = value.number {
                numbers.push(number);
            }
            if let Some(date) = value.date {
                dates.push(date);
            }
            if value_type == ValueType::Text {
                lengths.push(cell.value.trim().chars().count() as f64);
            }
        }

        let non_null = types.len();
        let profile = ColumnProfile {
            value_type,
            non_null,
            nulls: cells.len() - non_null,
            unique: unique.len(),
            minority,
            minority_rows,
            numeric: if value_type.is_numeric() { NumericStats::from_values(&numbers) } else { None },
            text_length: NumericStats::from_values(&lengths),
            completeness: if cells.is_empty() { 0.0 } else { non_null as f64 / cells.len() as f64 },
        };
        ColumnAnalysis { profile, dates }
    }
}

fn infer_with(recognizer: &DateRecognizer, cell: &Cell) -> Option<Inferred> {
    if cell.is_blank() {
        return None;
    }
    match cell.kind {
        CellType::Empty | CellType::Error => None,
        CellType::Boolean => Some(Inferred::of(ValueType::Boolean)),
        kind if kind.is_serial_date() || kind == CellType::IsoDateTime => match recognizer.recognize_cell(cell) {
            Ok(date) => Some(Inferred {
                value_type: ValueType::Date,
                number: None,
                date: Some(date),
            }),
            Err(_) => Some(Inferred::of(ValueType::Text)),
        },
        // Times of day carry no calendar date
        kind if kind.is_serial_time() => Some(Inferred::of(ValueType::Text)),
        CellType::IsoDuration => Some(Inferred::of(ValueType::Text)),
        CellType::Number => {
            let number = cell.as_number()?;
            if number.fract() == 0.0 && number.abs() < 9.0e15 {
                Some(Inferred::number(ValueType::Integer, number))
            } else {
                Some(Inferred::number(ValueType::Float, number))
            }
        }
        _ => infer_text(recognizer, &cell.value),
    }
}

fn infer_text(recognizer: &DateRecognizer, value: &str) -> Option<Inferred> {
    let text = value.trim();
    let lower = text.to_lowercase();
    if MISSING_MARKERS.contains(&lower.as_str()) {
        return None;
    }
    if TRUE_LITERALS.contains(&lower.as_str()) || FALSE_LITERALS.contains(&lower.as_str()) {
        return Some(Inferred::of(ValueType::Boolean));
    }
    if let Some((number, is_integer)) = parse_number(text) {
        let value_type = if is_integer { ValueType::Integer } else { ValueType::Float };
        return Some(Inferred::number(value_type, number));
    }
    if let Some(percent) = text.strip_suffix('%') {
        if let Some((number, _)) = parse_number(percent) {
            return Some(Inferred::number(ValueType::Float, number / 100.0));
        }
    }
    if let Some(number) = parse_currency(text) {
        return Some(Inferred::number(ValueType::Currency, number));
    }
    if let Ok(date) = recognizer.recognize(text) {
        return Some(Inferred {
            value_type: ValueType::Date,
            number: None,
            date: Some(date),
        });
    }
    Some(Inferred::of(ValueType::Text))
}

/// Parses `1,234`, `-12.5`, `(42)` (negative) and exponent forms.
///
/// # Returns
/// The value and whether it was written as an integer
pub(crate) fn parse_number(text: &str) -> Option<(f64, bool)> {
    let text = text.trim();
    let (negative, text) = match text.strip_prefix('(').and_then(|inner| inner.strip_suffix(')')) {
        Some(inner) => (true, inner.trim()),
        None => (false, text),
    };
    if !text.bytes().any(|byte| byte.is_ascii_digit()) {
        return None;
    }
    let captures = NUMBER_PATTERN.captures(text)?;
    let number: f64 = text.replace(',', "").parse().ok()?;
    if !number.is_finite() {
        return None;
    }
    let is_integer = captures.get(1).is_none() && captures.get(2).is_none();
    Some((if negative { -number } else { number }, is_integer))
}

/// Parses amounts carrying a currency symbol or ISO code before or after the number.
pub(crate) fn parse_currency(text: &str) -> Option<f64> {
    let text = text.trim();
    let (negative, text) = match text.strip_prefix('-') {
        Some(rest) => (true, rest.trim_start()),
        None => (false, text),
    };
    let amount = CURRENCY_SYMBOLS
        .iter()
        .chain(CURRENCY_CODES.iter())
        .find_map(|marker| {
            text.strip_prefix(marker)
                .or_else(|| text.strip_suffix(marker))
                .map(str::trim)
        })?;
    let (number, _) = parse_number(amount)?;
    Some(if negative { -number } else { number })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn infer(value: &str) -> Option<ValueType> {
        TypeInferencer::default().infer(&Cell::text(0, 0, value)).map(|inferred| inferred.value_type)
    }

    #[test]
    fn text_values() {
        assert_eq!(infer("1,234"), Some(ValueType::Integer));
        assert_eq!(infer("(42)"), Some(ValueType::Integer));
        assert_eq!(infer("12.50"), Some(ValueType::Float));
        assert_eq!(infer("12.5%"), Some(ValueType::Float));
        assert_eq!(infer("$1,200.00"), Some(ValueType::Currency));
        assert_eq!(infer("1200 EUR"), Some(ValueType::Currency));
        assert_eq!(infer("-£30"), Some(ValueType::Currency));
        assert_eq!(infer("Yes"), Some(ValueType::Boolean));
        assert_eq!(infer("disabled"), Some(ValueType::Boolean));
        assert_eq!(infer("31/12/2024"), Some(ValueType::Date));
        assert_eq!(infer("Q4 2024"), Some(ValueType::Date));
        assert_eq!(infer("Acme Ltd"), Some(ValueType::Text));
        assert_eq!(infer("1,23"), Some(ValueType::Text));
        for marker in ["N/A", "na", "NULL", "None", "-", "---", "#N/A", "nan", "  "] {
            assert_eq!(infer(marker), None, "{marker}");
        }
    }

    #[test]
    fn native_values() {
        let inferencer = TypeInferencer::default();
        let kind = |cell: Cell| inferencer.infer(&cell).map(|inferred| inferred.value_type);
        assert_eq!(kind(Cell::new(0, 0, CellType::Number, "3")), Some(ValueType::Integer));
        assert_eq!(kind(Cell::new(0, 0, CellType::Number, "3.25")), Some(ValueType::Float));
        assert_eq!(kind(Cell::new(0, 0, CellType::Boolean, "1")), Some(ValueType::Boolean));
        assert_eq!(kind(Cell::new(0, 0, CellType::NumberDate1900, "45658")), Some(ValueType::Date));
        assert_eq!(kind(Cell::new(0, 0, CellType::Error, "#DIV/0!")), None);
    }

    #[test]
    fn numbers_parse_with_separators() {
        assert_eq!(parse_number("1,234,567"), Some((1_234_567.0, true)));
        assert_eq!(parse_number("(1,000.5)"), Some((-1000.5, false)));
        assert_eq!(parse_number("1e3"), Some((1000.0, false)));
        assert_eq!(parse_number("12,34"), None);
        assert_eq!(parse_number("."), None);
        assert_eq!(parse_currency("US$ 12"), Some(12.0));
        assert_eq!(parse_currency("12 apples"), None);
    }

    #[test]
    fn majority_vote_lets_integers_join_floats() {
        use ValueType::*;
        assert_eq!(ValueType::detect(&[Integer, Float, Integer, Text]), Float);
        assert_eq!(ValueType::detect(&[Text, Text, Integer]), Text);
        assert_eq!(ValueType::detect(&[Integer, Date]), Integer);
        assert_eq!(ValueType::detect(&[]), Text);
    }

    #[test]
    fn column_profile_flags_minority_without_altering() {
        let cells: Vec<Cell> = ["10", "12.5", "n/a", "unknown", "7"]
            .iter()
            .enumerate()
            .map(|(row, value)| Cell::text(row + 1, 0, *value))
            .collect();
        let mut column: Vec<Option<&Cell>> = cells.iter().map(Some).collect();
        column.push(None);

        let analysis = TypeInferencer::default().analyze_column(&column);
        let profile = analysis.profile;
        assert_eq!(profile.value_type, ValueType::Float);
        assert_eq!(profile.non_null, 4);
        assert_eq!(profile.nulls, 2);
        assert_eq!(profile.unique, 4);
        assert_eq!(profile.minority, 1);
        assert_eq!(profile.minority_rows, vec![4]);
        let numeric = profile.numeric.unwrap();
        assert_eq!((numeric.min, numeric.max), (7.0, 12.5));
        assert!((numeric.mean - 29.5 / 3.0).abs() < 1e-9);
        assert!((profile.completeness - 4.0 / 6.0).abs() < 1e-9);
        assert_eq!(cells[3].value, "unknown");
    }

    #[test]
    fn column_evidence_resolves_day_order() {
        let cells = vec![Cell::text(0, 0, "03/04/2024"), Cell::text(1, 0, "12/31/2024")];
        let column: Vec<Option<&Cell>> = cells.iter().map(Some).collect();
        let analysis = TypeInferencer::default().analyze_column(&column);
        assert_eq!(analysis.profile.value_type, ValueType::Date);
        assert_eq!(analysis.dates.len(), 2);
        assert_eq!(analysis.dates[0].span.start, chrono::NaiveDate::from_ymd_opt(2024, 3, 4).unwrap());
        assert!(analysis.dates.iter().all(|date| !date.low_confidence));
    }

    #[test]
    fn text_columns_record_lengths() {
        let cells = vec![Cell::text(0, 0, "ab"), Cell::text(1, 0, "abcd")];
        let column: Vec<Option<&Cell>> = cells.iter().map(Some).collect();
        let profile = TypeInferencer::default().analyze_column(&column).profile;
        assert_eq!(profile.text_length, Some(NumericStats { min: 2.0, max: 4.0, mean: 3.0 }));
        assert_eq!(profile.numeric, None);
    }
}
