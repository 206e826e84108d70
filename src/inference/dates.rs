//! Recognition of heterogeneous date and period expressions.
//!
//! Every recognized value becomes a [`DateSpan`]: a closed calendar interval with the
//! granularity it was written at. [`DateRecognizer::format`] renders a span in canonical
//! form, and recognizing that text again yields the same span.

use crate::config::DateLocale;
use crate::config::EngineConfig;
use crate::error::SheetSleuthError;
use crate::spreadsheet::cell::Cell;
use crate::spreadsheet::cell::CellType;
use chrono::Datelike;
use chrono::Months;
use chrono::NaiveDate;
use regex::Regex;
use serde::Deserialize;
use serde::Serialize;
use std::collections::BTreeSet;
use std::collections::HashMap;
use std::fmt::Display;
use std::sync::LazyLock;

/// Qualifiers that may precede a date, longest first.
const QUALIFIERS: [&str; 16] = [
    "for the period ending",
    "for the period ended",
    "for the year ending",
    "for the year ended",
    "period ending",
    "period ended",
    "quarter ending",
    "quarter ended",
    "year ending",
    "year ended",
    "as of",
    "as at",
    "dated",
    "ending",
    "ended",
    "effective",
];

const TIME: &str = r"(?:[ t]\d{1,2}:\d{2}(?::\d{2}(?:\.\d+)?)?\s*(?:am|pm)?(?:z|[+-]\d{2}:?\d{2})?)?";

fn pattern(text: &str) -> Regex {
    Regex::new(&format!("(?i)^{text}$")).expect("Hardcode regex pattern")
}

static ISO_DAY: LazyLock<Regex> = LazyLock::new(|| pattern(&format!(r"(\d{{4}})[-/._ ](\d{{1,2}})[-/._ ](\d{{1,2}}){TIME}")));
static COMPACT_DAY: LazyLock<Regex> = LazyLock::new(|| pattern(r"(\d{4})(\d{2})(\d{2})"));
static NUMERIC_DAY: LazyLock<Regex> = LazyLock::new(|| pattern(&format!(r"(\d{{1,2}})[-/._ ](\d{{1,2}})[-/._ ](\d{{2}}|\d{{4}}){TIME}")));
static DAY_MONTH_NAME: LazyLock<Regex> =
    LazyLock::new(|| pattern(r"(\d{1,2})(?:st|nd|rd|th)?[-/ .,]*([a-z]{3,9})\.?[-/ .,]*(\d{2}|\d{4})"));
static MONTH_NAME_DAY: LazyLock<Regex> =
    LazyLock::new(|| pattern(r"([a-z]{3,9})\.?[-/ ]*(\d{1,2})(?:st|nd|rd|th)?(?:,\s*|[-/ ]+)(\d{2}|\d{4})"));
static QUARTER_YEAR: LazyLock<Regex> = LazyLock::new(|| pattern(r"q([1-4])[-/ ']*(?:cy)?(\d{2}|\d{4})"));
static YEAR_QUARTER: LazyLock<Regex> = LazyLock::new(|| pattern(r"(\d{4})[-/ ]*q([1-4])"));
static COMPACT_QUARTER: LazyLock<Regex> = LazyLock::new(|| pattern(r"([1-4])q[-/ ']*(\d{2}|\d{4})"));
static FISCAL_QUARTER: LazyLock<Regex> = LazyLock::new(|| pattern(r"q([1-4])[-/ ]*fy[-/ ']*(\d{2}|\d{4})"));
static FISCAL_YEAR_QUARTER: LazyLock<Regex> = LazyLock::new(|| pattern(r"fy[-/ ']*(\d{2}|\d{4})[-/ ]*q([1-4])"));
static FISCAL_RANGE: LazyLock<Regex> = LazyLock::new(|| pattern(r"fy[-/ ']*(\d{4})[-/](\d{2}|\d{4})"));
static FISCAL_YEAR: LazyLock<Regex> = LazyLock::new(|| pattern(r"fy[-/ ']*(\d{2}|\d{4})"));
static MONTH_NAME_YEAR: LazyLock<Regex> = LazyLock::new(|| pattern(r"([a-z]{3,9})\.?[-/ ,']*(\d{2}|\d{4})"));
static MONTH_YEAR: LazyLock<Regex> = LazyLock::new(|| pattern(r"(\d{1,2})[-/.](\d{4})"));
static YEAR_MONTH: LazyLock<Regex> = LazyLock::new(|| pattern(r"(\d{4})[-/.](\d{1,2})"));
static YEAR: LazyLock<Regex> = LazyLock::new(|| pattern(r"(?:cy[-/ ]*)?(\d{4})"));

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    Day,
    Month,
    Quarter,
    FiscalYear,
    Year,
}

/// A closed calendar interval. Single-day values have `start == end`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateSpan {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub granularity: Granularity,
}

impl DateSpan {
    pub fn day(date: NaiveDate) -> DateSpan {
        DateSpan {
            start: date,
            end: date,
            granularity: Granularity::Day,
        }
    }

    /// Span of `months` whole months starting at the first of `month`.
    fn months(year: i32, month: u32, months: u32, granularity: Granularity) -> Option<DateSpan> {
        let start = NaiveDate::from_ymd_opt(year, month, 1)?;
        let end = start.checked_add_months(Months::new(months))?.pred_opt()?;
        Some(DateSpan { start, end, granularity })
    }
}

/// A recognized value with its ambiguity flag.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct DateMatch {
    pub span: DateSpan,
    /// Day and month could be swapped; the order came from configuration.
    pub low_confidence: bool,
}

impl DateMatch {
    fn confident(span: DateSpan) -> DateMatch {
        DateMatch {
            span,
            low_confidence: false,
        }
    }
}

#[derive(Clone, Debug)]
pub struct DateRecognizer {
    preference: DateLocale,
    /// Day order proven by unambiguous values in the same column
    evidence: Option<DateLocale>,
    fiscal_year_start_month: u32,
}

impl Default for DateRecognizer {
    fn default() -> Self {
        DateRecognizer::new(DateLocale::DayFirst, 1)
    }
}

impl DateRecognizer {
    pub fn new(preference: DateLocale, fiscal_year_start_month: u32) -> Self {
        DateRecognizer {
            preference,
            evidence: None,
            fiscal_year_start_month: fiscal_year_start_month.clamp(1, 12),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        DateRecognizer::new(config.date_locale_preference, config.fiscal_year_start_month)
    }

    /// Returns a recognizer that resolves ambiguous day/month values with proven column evidence.
    pub fn with_evidence(&self, evidence: Option<DateLocale>) -> Self {
        DateRecognizer {
            evidence,
            ..self.clone()
        }
    }

    /// Recognizes a date cell: native date serials and ISO values directly, text by its notation.
    pub fn recognize_cell(&self, cell: &Cell) -> Result<DateMatch, SheetSleuthError> {
        match cell.kind {
            kind if kind.is_serial_date() || kind == CellType::IsoDateTime => cell
                .as_date()
                .map(|date| DateMatch::confident(DateSpan::day(date)))
                .ok_or_else(|| SheetSleuthError::NotADateError(cell.value.to_owned())),
            CellType::Text => self.recognize(&cell.value),
            _ => Err(SheetSleuthError::NotADateError(cell.value.to_owned())),
        }
    }

    /// Recognizes a textual date or period expression.
    pub fn recognize(&self, text: &str) -> Result<DateMatch, SheetSleuthError> {
        let normalized = strip_qualifiers(text);
        self.recognize_normalized(&normalized)
            .ok_or_else(|| SheetSleuthError::NotADateError(text.to_owned()))
    }

    /// Parses canonical (or any recognized) text back into a span.
    pub fn parse(&self, text: &str) -> Result<DateSpan, SheetSleuthError> {
        Ok(self.recognize(text)?.span)
    }

    fn recognize_normalized(&self, text: &str) -> Option<DateMatch> {
        if text.is_empty() || text.len() > 40 {
            return None;
        }
        if let Some(captures) = ISO_DAY.captures(text) {
            let date = ymd(number(&captures[1])?, number(&captures[2])?, number(&captures[3])?)?;
            return Some(DateMatch::confident(DateSpan::day(date)));
        }
        if let Some(captures) = COMPACT_DAY.captures(text) {
            let year = number(&captures[1])?;
            if !(1900..=2100).contains(&year) {
                return None;
            }
            let date = ymd(year, number(&captures[2])?, number(&captures[3])?)?;
            return Some(DateMatch::confident(DateSpan::day(date)));
        }
        if let Some(captures) = NUMERIC_DAY.captures(text) {
            return self.numeric_day(number(&captures[1])?, number(&captures[2])?, expand_year(&captures[3])?);
        }
        if let Some(captures) = DAY_MONTH_NAME.captures(text) {
            let date = ymd(expand_year(&captures[3])?, month_from_name(&captures[2])? as i32, number(&captures[1])?)?;
            return Some(DateMatch::confident(DateSpan::day(date)));
        }
        if let Some(captures) = MONTH_NAME_DAY.captures(text) {
            let date = ymd(expand_year(&captures[3])?, month_from_name(&captures[1])? as i32, number(&captures[2])?)?;
            return Some(DateMatch::confident(DateSpan::day(date)));
        }
        if let Some(captures) = FISCAL_QUARTER.captures(text) {
            return self.fiscal_quarter(expand_year(&captures[2])?, number(&captures[1])? as u32).map(DateMatch::confident);
        }
        if let Some(captures) = FISCAL_YEAR_QUARTER.captures(text) {
            return self.fiscal_quarter(expand_year(&captures[1])?, number(&captures[2])? as u32).map(DateMatch::confident);
        }
        if let Some(captures) = QUARTER_YEAR.captures(text) {
            return calendar_quarter(expand_year(&captures[2])?, number(&captures[1])? as u32).map(DateMatch::confident);
        }
        if let Some(captures) = YEAR_QUARTER.captures(text) {
            return calendar_quarter(number(&captures[1])?, number(&captures[2])? as u32).map(DateMatch::confident);
        }
        if let Some(captures) = COMPACT_QUARTER.captures(text) {
            return calendar_quarter(expand_year(&captures[2])?, number(&captures[1])? as u32).map(DateMatch::confident);
        }
        if let Some(captures) = FISCAL_RANGE.captures(text) {
            let start_year = number(&captures[1])?;
            let end_year = match captures[2].len() {
                2 => start_year / 100 * 100 + number(&captures[2])?,
                _ => number(&captures[2])?,
            };
            if end_year != start_year + 1 {
                return None;
            }
            return self.fiscal_year(end_year).map(DateMatch::confident);
        }
        if let Some(captures) = FISCAL_YEAR.captures(text) {
            return self.fiscal_year(expand_year(&captures[1])?).map(DateMatch::confident);
        }
        if let Some(captures) = MONTH_NAME_YEAR.captures(text) {
            let month = month_from_name(&captures[1])?;
            return DateSpan::months(expand_year(&captures[2])?, month, 1, Granularity::Month).map(DateMatch::confident);
        }
        if let Some(captures) = MONTH_YEAR.captures(text) {
            let month = number(&captures[1])? as u32;
            return DateSpan::months(number(&captures[2])?, month, 1, Granularity::Month).map(DateMatch::confident);
        }
        if let Some(captures) = YEAR_MONTH.captures(text) {
            let month = number(&captures[2])? as u32;
            return DateSpan::months(number(&captures[1])?, month, 1, Granularity::Month).map(DateMatch::confident);
        }
        if let Some(captures) = YEAR.captures(text) {
            let year = number(&captures[1])?;
            if !(1900..=2100).contains(&year) {
                return None;
            }
            return DateSpan::months(year, 1, 12, Granularity::Year).map(DateMatch::confident);
        }
        None
    }

    /// Resolves `first/second/year` where either of the first two may be the day.
    fn numeric_day(&self, first: i32, second: i32, year: i32) -> Option<DateMatch> {
        let (order, low_confidence) = match (first > 12, second > 12) {
            (true, true) => return None,
            (true, false) => (DateLocale::DayFirst, false),
            (false, true) => (DateLocale::MonthFirst, false),
            (false, false) => match self.evidence {
                Some(order) => (order, false),
                None => (self.preference, first != second),
            },
        };
        let date = match order {
            DateLocale::DayFirst => ymd(year, second, first)?,
            DateLocale::MonthFirst => ymd(year, first, second)?,
        };
        Some(DateMatch {
            span: DateSpan::day(date),
            low_confidence,
        })
    }

    /// The fiscal year named by the calendar year in which it ends.
    fn fiscal_year(&self, year: i32) -> Option<DateSpan> {
        let (start_year, month) = self.fiscal_start(year);
        DateSpan::months(start_year, month, 12, Granularity::FiscalYear)
    }

    fn fiscal_quarter(&self, year: i32, quarter: u32) -> Option<DateSpan> {
        let (start_year, month) = self.fiscal_start(year);
        let start = NaiveDate::from_ymd_opt(start_year, month, 1)?.checked_add_months(Months::new((quarter - 1) * 3))?;
        DateSpan::months(start.year(), start.month(), 3, Granularity::Quarter)
    }

    fn fiscal_start(&self, year: i32) -> (i32, u32) {
        match self.fiscal_year_start_month {
            1 => (year, 1),
            month => (year - 1, month),
        }
    }

    /// Name (ending calendar year) of the fiscal year containing `date`.
    pub fn fiscal_year_of(&self, date: NaiveDate) -> i32 {
        match self.fiscal_year_start_month {
            1 => date.year(),
            month if date.month() >= month => date.year() + 1,
            _ => date.year(),
        }
    }

    /// Canonical text: `2025-01-01`, `2025-01`, `2025-Q1` (or `Q1 FY2025` for fiscal
    /// quarters off the calendar grid), `FY2025` and `2025`.
    pub fn format(&self, span: &DateSpan) -> String {
        match span.granularity {
            Granularity::Day => span.start.format("%Y-%m-%d").to_string(),
            Granularity::Month => span.start.format("%Y-%m").to_string(),
            Granularity::Quarter if (span.start.month() - 1) % 3 == 0 => {
                format!("{}-Q{}", span.start.year(), (span.start.month() - 1) / 3 + 1)
            }
            Granularity::Quarter => {
                let fiscal_year = self.fiscal_year_of(span.start);
                let (start_year, month) = self.fiscal_start(fiscal_year);
                let offset = (span.start.year() - start_year) * 12 + span.start.month() as i32 - month as i32;
                format!("Q{} FY{}", offset / 3 + 1, fiscal_year)
            }
            Granularity::FiscalYear => format!("FY{}", self.fiscal_year_of(span.start)),
            Granularity::Year => span.start.year().to_string(),
        }
    }

    /// Looks for unambiguous numeric dates (a component above 12) among column values.
    /// Returns the proven order when all such values agree.
    pub fn column_evidence<'a>(&self, values: impl IntoIterator<Item = &'a str>) -> Option<DateLocale> {
        let mut day_first = false;
        let mut month_first = false;
        for value in values {
            let normalized = strip_qualifiers(value);
            if let Some(captures) = NUMERIC_DAY.captures(&normalized) {
                let first = number(&captures[1]).unwrap_or(0);
                let second = number(&captures[2]).unwrap_or(0);
                day_first |= first > 12 && second <= 12;
                month_first |= second > 12 && first <= 12;
            }
        }
        match (day_first, month_first) {
            (true, false) => Some(DateLocale::DayFirst),
            (false, true) => Some(DateLocale::MonthFirst),
            _ => None,
        }
    }
}

fn strip_qualifiers(text: &str) -> String {
    let mut text = text.trim().trim_end_matches(['.', ',', ';', ':']).trim().to_lowercase();
    for qualifier in QUALIFIERS {
        if let Some(rest) = text.strip_prefix(qualifier) {
            if rest.starts_with([' ', ':', '-']) {
                text = rest.trim_start_matches([' ', ':', '-']).to_owned();
                break;
            }
        }
    }
    text
}

fn number(text: &str) -> Option<i32> {
    text.parse().ok()
}

fn ymd(year: i32, month: i32, day: i32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(year, u32::try_from(month).ok()?, u32::try_from(day).ok()?)
}

/// Two-digit years below 50 are 2000s, the rest 1900s.
fn expand_year(text: &str) -> Option<i32> {
    let year = number(text)?;
    Some(match text.len() {
        2 if year < 50 => 2000 + year,
        2 => 1900 + year,
        _ => year,
    })
}

fn month_from_name(name: &str) -> Option<u32> {
    const MONTHS: [&str; 12] = [
        "january", "february", "march", "april", "may", "june", "july", "august", "september", "october", "november", "december",
    ];
    let name = name.to_lowercase();
    if name.len() < 3 {
        return None;
    }
    MONTHS
        .iter()
        .position(|month| month.starts_with(&name))
        .map(|index| index as u32 + 1)
}

fn calendar_quarter(year: i32, quarter: u32) -> Option<DateSpan> {
    DateSpan::months(year, (quarter - 1) * 3 + 1, 3, Granularity::Quarter)
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cadence {
    Daily,
    Weekly,
    Monthly,
    Quarterly,
    Yearly,
    Irregular,
}

impl Display for Cadence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Cadence::Daily => "daily",
            Cadence::Weekly => "weekly",
            Cadence::Monthly => "monthly",
            Cadence::Quarterly => "quarterly",
            Cadence::Yearly => "yearly",
            Cadence::Irregular => "irregular",
        };
        f.write_str(name)
    }
}

/// Aggregated date coverage of a sheet (or a batch).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DateSummary {
    pub count: usize,
    pub low_confidence: usize,
    pub earliest: Option<DateSpan>,
    pub latest: Option<DateSpan>,
    pub fiscal_years: Vec<String>,
    pub quarters: Vec<String>,
    pub dominant_granularity: Option<Granularity>,
    pub cadence: Option<Cadence>,
}

impl DateSummary {
    pub fn from_matches(matches: &[DateMatch], recognizer: &DateRecognizer) -> DateSummary {
        if matches.is_empty() {
            return DateSummary::default();
        }
        let earliest = matches.iter().map(|item| item.span).min_by_key(|span| (span.start, span.end));
        let latest = matches.iter().map(|item| item.span).max_by_key(|span| (span.end, span.start));

        let mut fiscal_years = BTreeSet::<i32>::new();
        let mut quarters = BTreeSet::<(i32, u32)>::new();
        let mut granularities = HashMap::<Granularity, usize>::new();
        let mut days = BTreeSet::<NaiveDate>::new();
        for item in matches {
            let span = item.span;
            fiscal_years.insert(recognizer.fiscal_year_of(span.start));
            quarters.insert((span.start.year(), (span.start.month() - 1) / 3 + 1));
            *granularities.entry(span.granularity).or_default() += 1;
            if span.granularity == Granularity::Day {
                days.insert(span.start);
            }
        }
        let dominant_granularity = granularities
            .into_iter()
            .max_by_key(|(granularity, count)| (*count, std::cmp::Reverse(*granularity)))
            .map(|(granularity, _)| granularity);

        DateSummary {
            count: matches.len(),
            low_confidence: matches.iter().filter(|item| item.low_confidence).count(),
            earliest,
            latest,
            fiscal_years: fiscal_years.into_iter().map(|year| format!("FY{year}")).collect(),
            quarters: quarters.into_iter().map(|(year, quarter)| format!("{year}-Q{quarter}")).collect(),
            dominant_granularity,
            cadence: cadence(&days),
        }
    }

    /// Widens this summary's range and counts with another one.
    pub fn merge(&mut self, other: &DateSummary) {
        self.count += other.count;
        self.low_confidence += other.low_confidence;
        self.earliest = match (self.earliest, other.earliest) {
            (Some(left), Some(right)) => Some(if (right.start, right.end) < (left.start, left.end) { right } else { left }),
            (left, right) => left.or(right),
        };
        self.latest = match (self.latest, other.latest) {
            (Some(left), Some(right)) => Some(if (right.end, right.start) > (left.end, left.start) { right } else { left }),
            (left, right) => left.or(right),
        };
        for year in &other.fiscal_years {
            if !self.fiscal_years.contains(year) {
                self.fiscal_years.push(year.to_owned());
            }
        }
        self.fiscal_years.sort();
        for quarter in &other.quarters {
            if !self.quarters.contains(quarter) {
                self.quarters.push(quarter.to_owned());
            }
        }
        self.quarters.sort();
        if self.dominant_granularity.is_none() {
            self.dominant_granularity = other.dominant_granularity;
        }
    }
}

/// Classifies the median gap between consecutive distinct days.
fn cadence(days: &BTreeSet<NaiveDate>) -> Option<Cadence> {
    if days.len() < 3 {
        return None;
    }
    let days: Vec<&NaiveDate> = days.iter().collect();
    let mut gaps: Vec<i64> = days.windows(2).map(|pair| (*pair[1] - *pair[0]).num_days()).collect();
    gaps.sort_unstable();
    let median = gaps[gaps.len() / 2];
    Some(match median {
        1 => Cadence::Daily,
        6..=8 => Cadence::Weekly,
        28..=31 => Cadence::Monthly,
        89..=92 => Cadence::Quarterly,
        365..=366 => Cadence::Yearly,
        _ => Cadence::Irregular,
    })
}
