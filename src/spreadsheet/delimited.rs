//! Delimited text reader (`.csv`, `.tsv`, `.txt`, ...). The delimiter is sniffed from a
//! sample of lines; text without a consistent delimiter is read as one raw column.

use crate::error::SheetSleuthError;
use crate::helpers::budget::Budget;
use crate::helpers::reader::Input;
use crate::spreadsheet::cell::Cell;
use crate::spreadsheet::sheet::RawSheet;
use crate::spreadsheet::sheet::SheetBuilder;
use crate::spreadsheet::Spreadsheet;
use crate::spreadsheet::SpreadsheetError;
use csv::ReaderBuilder;
use encoding_rs::Encoding;
use std::collections::HashMap;
use thiserror::Error;
use tracing::debug;

const CANDIDATES: [u8; 4] = [b',', b';', b'\t', b'|'];
const SAMPLE_LINES: usize = 50;
const BINARY_SCAN_BYTES: usize = 1024;

#[derive(Error, Debug)]
pub enum DelimitedError {
    #[error("Input contains no text")]
    EmptyInputError,

    #[error("Input looks like binary data")]
    BinaryContentError,
}

pub(crate) struct DelimitedSpreadsheet {
    source: String,
    name: String,
    text: String,
    delimiter: Option<u8>,
}

impl DelimitedSpreadsheet {
    pub(crate) fn open(input: &Input) -> Result<Self, SheetSleuthError> {
        let data = input.read_all()?;
        if data.iter().take(BINARY_SCAN_BYTES).any(|byte| *byte == 0) {
            Err(DelimitedError::BinaryContentError)?
        }
        let text = decode(&data);
        if text.trim().is_empty() {
            Err(DelimitedError::EmptyInputError)?
        }
        let delimiter = sniff_delimiter(&text);
        debug!(file = %input.identity(), delimiter = ?delimiter.map(char::from), "Opened delimited text");
        Ok(DelimitedSpreadsheet {
            source: input.identity(),
            name: input.stem(),
            text,
            delimiter,
        })
    }
}

impl Spreadsheet for DelimitedSpreadsheet {
    fn sheet_names(&self) -> Vec<String> {
        vec![self.name.to_owned()]
    }

    fn read_sheet(&mut self, index: usize, budget: &Budget) -> Result<RawSheet, SheetSleuthError> {
        if index != 0 {
            Err(SpreadsheetError::SheetIndexError(index))?
        }
        let mut builder = SheetBuilder::new(&self.source, &self.name);
        match self.delimiter {
            Some(delimiter) => {
                let mut reader = ReaderBuilder::new()
                    .has_headers(false)
                    .flexible(true)
                    .delimiter(delimiter)
                    .from_reader(self.text.as_bytes());
                for (row, record) in reader.records().enumerate() {
                    let record = record?;
                    for (col, field) in record.iter().enumerate() {
                        builder.push(Cell::text(row, col, field));
                    }
                    budget.check()?;
                }
            }
            None => {
                for (row, line) in self.text.lines().enumerate() {
                    builder.push(Cell::text(row, 0, line.trim_end_matches('\r')));
                    budget.check()?;
                }
            }
        }
        Ok(builder.finish())
    }
}

/// Decodes by byte-order mark, then strict UTF-8, then Windows-1252.
fn decode(data: &[u8]) -> String {
    if let Some((encoding, bom_length)) = Encoding::for_bom(data) {
        let (text, _) = encoding.decode_without_bom_handling(&data[bom_length..]);
        return text.into_owned();
    }
    match std::str::from_utf8(data) {
        Ok(text) => text.to_owned(),
        Err(_) => {
            let (text, _, _) = encoding_rs::WINDOWS_1252.decode(data);
            text.into_owned()
        }
    }
}

/// Picks the candidate delimiter splitting the sample lines most consistently.
///
/// # Returns
/// The delimiter, or `None` when no candidate yields more than one field on most lines
fn sniff_delimiter(text: &str) -> Option<u8> {
    let sample: String = text
        .lines()
        .filter(|line| !line.trim().is_empty())
        .take(SAMPLE_LINES)
        .collect::<Vec<_>>()
        .join("\n");
    let mut best: Option<(u8, f64)> = None;
    for delimiter in CANDIDATES {
        let mut reader = ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .delimiter(delimiter)
            .from_reader(sample.as_bytes());
        let counts: Vec<usize> = reader.records().map_while(Result::ok).map(|record| record.len()).collect();
        if counts.is_empty() {
            continue;
        }

        let mut frequency: HashMap<usize, usize> = HashMap::new();
        for count in &counts {
            *frequency.entry(*count).or_default() += 1;
        }
        let Some((mode, mode_count)) = frequency.into_iter().max_by_key(|(count, frequency)| (*frequency, *count)) else {
            continue;
        };
        let split_share = counts.iter().filter(|count| **count > 1).count() as f64 / counts.len() as f64;
        if mode < 2 || split_share < 0.5 {
            continue;
        }
        // Consistency first, wider rows break ties
        let score = mode_count as f64 / counts.len() as f64 + (mode as f64).ln() / 100.0;
        if best.map(|(_, best_score)| score > best_score).unwrap_or(true) {
            best = Some((delimiter, score));
        }
    }
    best.map(|(delimiter, _)| delimiter)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read(name: &str, data: &[u8]) -> Result<RawSheet, SheetSleuthError> {
        DelimitedSpreadsheet::open(&Input::bytes(name, data.to_vec()))?.read_sheet(0, &Budget::unbounded())
    }

    #[test]
    fn sniffs_common_delimiters() {
        assert_eq!(sniff_delimiter("a,b,c\n1,2,3\n4,5,6"), Some(b','));
        assert_eq!(sniff_delimiter("a;b;c\n1,5;2;3\n4;5;6"), Some(b';'));
        assert_eq!(sniff_delimiter("a\tb\n1\t2"), Some(b'\t'));
        assert_eq!(sniff_delimiter("a|b|c\n1|2|3"), Some(b'|'));
        assert_eq!(sniff_delimiter("just a note\nanother line"), None);
    }

    #[test]
    fn quoted_fields_keep_delimiters() -> Result<(), SheetSleuthError> {
        let sheet = read("clients.csv", b"Name,City\n\"Acme, Inc\",Paris\n")?;
        assert_eq!(sheet.name, "clients");
        assert_eq!(sheet.get(1, 0).unwrap().value, "Acme, Inc");
        assert_eq!(sheet.get(1, 1).unwrap().value, "Paris");
        Ok(())
    }

    #[test]
    fn decodes_bom_and_legacy_text() -> Result<(), SheetSleuthError> {
        let sheet = read("bom.csv", b"\xEF\xBB\xBFName;Amount\nCaf\xC3\xA9;3")?;
        assert_eq!(sheet.get(0, 0).unwrap().value, "Name");
        assert_eq!(sheet.get(1, 0).unwrap().value, "Café");

        let sheet = read("legacy.csv", b"Name;Amount\nCaf\xE9;3")?;
        assert_eq!(sheet.get(1, 0).unwrap().value, "Café");
        Ok(())
    }

    #[test]
    fn plain_text_becomes_one_column() -> Result<(), SheetSleuthError> {
        let sheet = read("notes.txt", b"Summary of accounts\r\n  Opening balance 100\r\n")?;
        assert_eq!(sheet.get(1, 0).unwrap().value, "  Opening balance 100");
        assert!(sheet.get(1, 1).is_none());
        Ok(())
    }

    #[test]
    fn binary_and_empty_inputs_fail() {
        assert!(matches!(
            DelimitedSpreadsheet::open(&Input::bytes("blob.csv", vec![0x50, 0x00, 0x01])),
            Err(SheetSleuthError::DelimitedError(DelimitedError::BinaryContentError))
        ));
        assert!(matches!(
            DelimitedSpreadsheet::open(&Input::bytes("empty.csv", b" \n".to_vec())),
            Err(SheetSleuthError::DelimitedError(DelimitedError::EmptyInputError))
        ));
    }
}
