use std::time::Duration;
use thiserror::Error;

/// Main error type for the sheet_sleuth engine.
/// Aggregates errors from the standard library, dependencies, and internal modules,
/// and carries the engine's own failure taxonomy.
#[derive(Error, Debug)]
pub enum SheetSleuthError {
    #[error("{0}")]
    WithContextError(String),

    // Engine taxonomy
    /// Every load strategy was exhausted; fatal for that file only.
    #[error("Unreadable file '{file}': {reason}")]
    UnreadableFileError { file: String, reason: String },

    /// A region could not be classified above minimal confidence.
    #[error("Region {range} could not be classified (confidence {confidence:.2})")]
    StructureDetectionError { range: String, confidence: f64 },

    /// A candidate value does not match any recognized date form.
    #[error("'{0}' is not a recognized date")]
    NotADateError(String),

    /// The per-file (or per-strategy) budget was exceeded.
    #[error("Processing exceeded the {0:?} budget")]
    TimeoutError(Duration),

    #[error("Processing was cancelled")]
    CancelledError,

    /// One sheet failed while others in the same file succeeded.
    #[error("Sheet '{sheet}' failed: {reason}")]
    PartialExtractionError { sheet: String, reason: String },

    #[error("{0}")]
    AnyhowError(#[from] anyhow::Error),

    // Standard library errors
    #[error("{0}")]
    IoError(#[from] std::io::Error),

    #[error("{0}")]
    ParseIntError(#[from] std::num::ParseIntError),

    #[error("{0}")]
    ParseFloatError(#[from] std::num::ParseFloatError),

    #[error("{0}")]
    ParseDateTimeError(#[from] chrono::ParseError),

    #[error("{0}")]
    StringEncodingError(#[from] std::str::Utf8Error),

    #[error("{0}")]
    PatternError(#[from] glob::PatternError),

    #[error("{0}")]
    GlobError(#[from] glob::GlobError),

    // Third-party library errors
    #[error("{0}")]
    ZipError(#[from] zip::result::ZipError),

    #[error("{0}")]
    XmlError(#[from] quick_xml::Error),

    #[error("{0}")]
    XmlEncodingError(#[from] quick_xml::encoding::EncodingError),

    #[error("{0}")]
    XmlAttributeError(#[from] quick_xml::events::attributes::AttrError),

    #[error("{0}")]
    CsvError(#[from] csv::Error),

    #[error("{0}")]
    JsonError(#[from] serde_json::Error),

    #[error("{0}")]
    TomlError(#[from] toml::de::Error),

    #[error("{0}")]
    JoinError(#[from] tokio::task::JoinError),

    // Helper module errors
    #[error("{0}")]
    CfbHelperError(#[from] crate::helpers::cfb::CfbError),

    #[error("{0}")]
    XmlHelperError(#[from] crate::helpers::xml::XmlError),

    #[error("{0}")]
    Biff8HelperError(#[from] crate::helpers::biff8::Biff8Error),

    #[error("{0}")]
    SourceReaderError(#[from] crate::helpers::reader::SourceReaderError),

    // Spreadsheet module errors
    #[error("{0}")]
    SpreadsheetError(#[from] crate::spreadsheet::SpreadsheetError),

    #[error("{0}")]
    OdsError(#[from] crate::spreadsheet::ods::OdsError),

    #[error("{0}")]
    XlsError(#[from] crate::spreadsheet::xls::XlsError),

    #[error("{0}")]
    DelimitedError(#[from] crate::spreadsheet::delimited::DelimitedError),

    #[error("{0}")]
    RangeError(#[from] crate::spreadsheet::range::RangeError),

    // Configuration errors
    #[error("{0}")]
    ConfigError(#[from] crate::config::ConfigError),
}

impl SheetSleuthError {
    /// Returns true for failures that end the whole file rather than a single sheet.
    pub fn is_file_fatal(&self) -> bool {
        matches!(
            self,
            SheetSleuthError::UnreadableFileError { .. }
                | SheetSleuthError::TimeoutError(_)
                | SheetSleuthError::CancelledError
        )
    }
}

pub(crate) trait ResultOptionChain {
    fn ok_none_else<F>(self, f: F) -> Self
    where
        F: FnOnce() -> Self;
}

impl<T, E> ResultOptionChain for Result<Option<T>, E> {
    fn ok_none_else<F>(self, f: F) -> Self
    where
        F: FnOnce() -> Self,
    {
        match self {
            Ok(None) => f(),
            _ => self,
        }
    }
}

pub(crate) trait ResultMessage {
    fn with_prefix(self, message: &str) -> Self;
}

impl<T> ResultMessage for Result<T, SheetSleuthError> {
    fn with_prefix(self, message: &str) -> Self {
        self.map_err(|e| match e {
            // Taxonomy variants keep their identity so callers can still match on them
            e @ (SheetSleuthError::TimeoutError(_) | SheetSleuthError::CancelledError) => e,
            e => SheetSleuthError::WithContextError(format!("{}: {}", message, e)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ok_none_else_only_replaces_none() {
        let first: Result<Option<u8>, ()> = Ok(Some(1));
        assert_eq!(first.ok_none_else(|| Ok(Some(2))), Ok(Some(1)));
        let empty: Result<Option<u8>, ()> = Ok(None);
        assert_eq!(empty.ok_none_else(|| Ok(Some(2))), Ok(Some(2)));
    }

    #[test]
    fn with_prefix_keeps_timeouts() {
        let result: Result<(), SheetSleuthError> = Err(SheetSleuthError::TimeoutError(Duration::from_secs(1)));
        assert!(matches!(result.with_prefix("book.xlsx"), Err(SheetSleuthError::TimeoutError(_))));

        let result: Result<(), SheetSleuthError> = Err(SheetSleuthError::NotADateError("x".to_owned()));
        let message = result.with_prefix("book.xlsx").unwrap_err().to_string();
        assert_eq!(message, "book.xlsx: 'x' is not a recognized date");
    }
}
