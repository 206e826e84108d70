use crate::spreadsheet::reference::index_to_reference;
use chrono::Duration;
use chrono::NaiveDate;
use chrono::NaiveDateTime;
use iso8601_duration::Duration as IsoDuration;
use std::fmt::Display;

/// Native kinds of cell data as stored by the source format.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum CellType {
    #[default]
    Empty,
    Boolean,
    Number,
    /// Serial date-time counted from the 1900 epoch
    NumberDateTime1900,
    NumberDate1900,
    NumberTime1900,
    /// Serial date-time counted from the 1904 epoch
    NumberDateTime1904,
    NumberDate1904,
    NumberTime1904,
    /// ISO 8601 date or date-time text
    IsoDateTime,
    /// ISO 8601 duration text (OpenDocument times)
    IsoDuration,
    Text,
    /// Spreadsheet error literal such as `#N/A`
    Error,
}

impl CellType {
    /// Maps built-in Excel number format IDs to date/time kinds.
    pub(crate) fn parse_builtin_number_format_id(id: &str, is_1904: bool) -> Option<Self> {
        match id {
            "22" => Some(if is_1904 { Self::NumberDateTime1904 } else { Self::NumberDateTime1900 }),
            "14" | "15" | "16" | "17" => Some(if is_1904 { Self::NumberDate1904 } else { Self::NumberDate1900 }),
            "18" | "19" | "20" | "21" | "45" | "46" | "47" => Some(if is_1904 { Self::NumberTime1904 } else { Self::NumberTime1900 }),
            _ => None,
        }
    }

    /// Classifies a custom number format code by scanning for date and time tokens
    /// outside of literals, escapes and bracketed sections.
    pub(crate) fn parse_custom_number_format(format: &str, is_1904: bool) -> Self {
        let mut is_escaped = false;
        let mut is_literal = false;
        let mut is_bracket = false;
        let mut is_date = false;
        let mut is_time = false;
        for character in format.chars() {
            match character {
                _ if is_escaped => is_escaped = false,
                '_' | '\\' => is_escaped = true,

                '"' if is_literal => is_literal = false,
                '"' if !is_bracket => is_literal = true,

                ']' if is_bracket => is_bracket = false,
                '[' if !is_literal => is_bracket = true,
                _ if is_literal || is_bracket => (),

                'Y' | 'y' | 'D' | 'd' => is_date = true,
                'H' | 'h' | 'S' | 's' => is_time = true,
                _ => (),
            }
        }

        match (is_date, is_time, is_1904) {
            (true, true, false) => Self::NumberDateTime1900,
            (true, true, true) => Self::NumberDateTime1904,
            (true, false, false) => Self::NumberDate1900,
            (true, false, true) => Self::NumberDate1904,
            (false, true, false) => Self::NumberTime1900,
            (false, true, true) => Self::NumberTime1904,
            (false, false, _) => Self::Number,
        }
    }

    /// Serial numbers carrying a date component.
    pub fn is_serial_date(&self) -> bool {
        matches!(
            self,
            Self::NumberDateTime1900 | Self::NumberDate1900 | Self::NumberDateTime1904 | Self::NumberDate1904
        )
    }

    pub fn is_serial_time(&self) -> bool {
        matches!(self, Self::NumberTime1900 | Self::NumberTime1904)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Number) || self.is_serial_date() || self.is_serial_time()
    }

    fn is_1904(&self) -> bool {
        matches!(self, Self::NumberDateTime1904 | Self::NumberDate1904 | Self::NumberTime1904)
    }
}

/// Converts BIFF error codes to their display literals.
pub(crate) fn to_error_value(value: u8) -> &'static str {
    match value {
        0x00 => "#NULL!",
        0x07 => "#DIV/0!",
        0x0F => "#VALUE!",
        0x17 => "#REF!",
        0x1D => "#NAME?",
        0x24 => "#NUM!",
        0x2A => "#N/A",
        0x2B => "#GETTING_DATA",
        _ => "#ERROR!",
    }
}

/// Formatting hints kept from the source; only the ones structure inference uses.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct CellStyle {
    pub bold: bool,
    /// Alignment indent level
    pub indent: u8,
}

/// One populated cell: position, native kind, raw value text and style hints.
#[derive(Clone, Debug, PartialEq)]
pub struct Cell {
    pub row: usize,
    pub col: usize,
    pub kind: CellType,
    pub value: String,
    pub style: CellStyle,
}

impl Cell {
    pub fn new(row: usize, col: usize, kind: CellType, value: impl Into<String>) -> Self {
        Cell {
            row,
            col,
            kind,
            value: value.into(),
            style: CellStyle::default(),
        }
    }

    pub fn text(row: usize, col: usize, value: impl Into<String>) -> Self {
        Cell::new(row, col, CellType::Text, value)
    }

    pub fn with_style(mut self, style: CellStyle) -> Self {
        self.style = style;
        self
    }

    /// Excel-style reference such as "B5".
    pub fn reference(&self) -> String {
        index_to_reference(self.row, self.col)
    }

    /// True when the cell holds nothing but whitespace.
    pub fn is_blank(&self) -> bool {
        self.kind == CellType::Empty || self.value.trim().is_empty()
    }

    pub fn as_boolean(&self) -> Option<bool> {
        match self.kind {
            CellType::Boolean => Some(matches!(self.value.as_str(), "1" | "true" | "TRUE")),
            _ => None,
        }
    }

    /// Numeric value of number-typed cells; text is never parsed here.
    pub fn as_number(&self) -> Option<f64> {
        if self.kind.is_numeric() {
            self.value.trim().parse::<f64>().ok().filter(|number| number.is_finite())
        } else {
            None
        }
    }

    /// Calendar date of natively date-typed cells.
    pub fn as_date(&self) -> Option<NaiveDate> {
        match self.kind {
            kind if kind.is_serial_date() => serial_to_date(self.as_number()?, kind.is_1904()),
            CellType::IsoDateTime => {
                let value = self.value.trim();
                let date = value.get(..10).unwrap_or(value);
                NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()
            }
            _ => None,
        }
    }
}

/// Converts an Excel serial day number to a date, honouring the 1900 leap-year bug
/// and the 1904 epoch. Out-of-range serials yield `None`.
pub fn serial_to_date(serial: f64, is_1904: bool) -> Option<NaiveDate> {
    if !serial.is_finite() || serial < 0.0 || serial > 2_958_465.0 {
        return None;
    }
    let days = serial.trunc() as i64;
    let offset = if is_1904 {
        1462
    } else if days < 60 {
        1
    } else {
        0
    };
    NaiveDate::from_ymd_opt(1899, 12, 30)?.checked_add_signed(Duration::days(days + offset))
}

/// Formats a day fraction as `HH:MM:SS`, with milliseconds when present.
pub(crate) fn to_time_string(fraction: f64) -> String {
    let mut total = (fraction.fract().abs() * 86_400_000f64).round() as i64;
    let milliseconds = total % 1_000;
    total /= 1_000;
    let seconds = total % 60;
    total /= 60;
    let minutes = total % 60;
    let hours = total / 60;
    if milliseconds > 0 {
        format!("{hours:02}:{minutes:02}:{seconds:02}.{milliseconds:03}")
    } else {
        format!("{hours:02}:{minutes:02}:{seconds:02}")
    }
}

impl Display for Cell {
    /// Human-readable value: serial dates become ISO text, booleans become words.
    /// Values that cannot be converted are shown raw rather than failing.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let value = match self.kind {
            CellType::Boolean => match self.as_boolean() {
                Some(true) => "true".to_owned(),
                _ => "false".to_owned(),
            },
            CellType::NumberDate1900 | CellType::NumberDate1904 => match self.as_date() {
                Some(date) => date.format("%Y-%m-%d").to_string(),
                None => self.value.to_owned(),
            },
            CellType::NumberDateTime1900 | CellType::NumberDateTime1904 => {
                match self.as_date().zip(self.as_number()) {
                    Some((date, serial)) => format!("{} {}", date.format("%Y-%m-%d"), to_time_string(serial)),
                    None => self.value.to_owned(),
                }
            }
            CellType::NumberTime1900 | CellType::NumberTime1904 => match self.as_number() {
                Some(serial) => to_time_string(serial),
                None => self.value.to_owned(),
            },
            CellType::IsoDateTime => match NaiveDateTime::parse_from_str(&self.value, "%Y-%m-%dT%H:%M:%S%.f") {
                Ok(datetime) if datetime.time() == chrono::NaiveTime::MIN => datetime.date().format("%Y-%m-%d").to_string(),
                Ok(datetime) => datetime.format("%Y-%m-%d %H:%M:%S").to_string(),
                Err(_) => self.value.replace('T', " "),
            },
            CellType::IsoDuration => match self.value.parse::<IsoDuration>() {
                Ok(duration) => format!(
                    "{:02}:{:02}:{:02}",
                    duration.hour as i64,
                    duration.minute as i64,
                    duration.second as i64
                ),
                Err(_) => self.value.to_owned(),
            },
            _ => self.value.to_owned(),
        };
        write!(f, "{}", value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn custom_number_formats() {
        assert_eq!(CellType::parse_custom_number_format("yyyy-mm-dd", false), CellType::NumberDate1900);
        assert_eq!(CellType::parse_custom_number_format("dd/mm/yyyy hh:mm", true), CellType::NumberDateTime1904);
        assert_eq!(CellType::parse_custom_number_format("hh:mm:ss", false), CellType::NumberTime1900);
        assert_eq!(CellType::parse_custom_number_format("#,##0.00", false), CellType::Number);
        assert_eq!(CellType::parse_custom_number_format("[Red]\"Days\" 0", false), CellType::Number);
        assert_eq!(CellType::parse_custom_number_format("0\\d", false), CellType::Number);
        assert_eq!(CellType::parse_builtin_number_format_id("14", false), Some(CellType::NumberDate1900));
        assert_eq!(CellType::parse_builtin_number_format_id("2", false), None);
    }

    #[test]
    fn serial_dates() {
        assert_eq!(serial_to_date(45658.0, false), NaiveDate::from_ymd_opt(2025, 1, 1));
        assert_eq!(serial_to_date(1.0, false), NaiveDate::from_ymd_opt(1900, 1, 1));
        assert_eq!(serial_to_date(61.0, false), NaiveDate::from_ymd_opt(1900, 3, 1));
        assert_eq!(serial_to_date(44196.0, true), NaiveDate::from_ymd_opt(2025, 1, 1));
        assert_eq!(serial_to_date(-3.0, false), None);
        assert_eq!(serial_to_date(f64::NAN, false), None);
    }

    #[test]
    fn display_values() {
        assert_eq!(Cell::new(0, 0, CellType::NumberDate1900, "45658").to_string(), "2025-01-01");
        assert_eq!(Cell::new(0, 0, CellType::NumberDateTime1900, "45658.5").to_string(), "2025-01-01 12:00:00");
        assert_eq!(Cell::new(0, 0, CellType::NumberTime1900, "0.25").to_string(), "06:00:00");
        assert_eq!(Cell::new(0, 0, CellType::Boolean, "1").to_string(), "true");
        assert_eq!(Cell::new(0, 0, CellType::IsoDateTime, "2025-03-31T00:00:00").to_string(), "2025-03-31");
        assert_eq!(Cell::new(0, 0, CellType::IsoDuration, "PT13H30M00S").to_string(), "13:30:00");
        assert_eq!(Cell::new(0, 0, CellType::NumberDate1900, "garbage").to_string(), "garbage");
    }

    #[test]
    fn typed_accessors() {
        let cell = Cell::new(2, 3, CellType::IsoDateTime, "2024-12-31");
        assert_eq!(cell.as_date(), NaiveDate::from_ymd_opt(2024, 12, 31));
        assert_eq!(cell.reference(), "D3");
        assert_eq!(Cell::text(0, 0, "12").as_number(), None);
        assert_eq!(Cell::new(0, 0, CellType::Number, " 12.5 ").as_number(), Some(12.5));
        assert!(Cell::text(0, 0, "   ").is_blank());
    }
}
