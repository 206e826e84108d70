//! Legacy `.xls` (BIFF8) workbook reader.

use crate::error::ResultOptionChain;
use crate::error::SheetSleuthError;
use crate::helpers::biff8::Biff8Reader;
use crate::helpers::budget::Budget;
use crate::helpers::cfb::Cfb;
use crate::helpers::reader::Input;
use crate::match_biff8_record;
use crate::spreadsheet::cell::to_error_value;
use crate::spreadsheet::cell::Cell;
use crate::spreadsheet::cell::CellType;
use crate::spreadsheet::excel;
use crate::spreadsheet::excel::CellFormat;
use crate::spreadsheet::excel::XfEntry;
use crate::spreadsheet::range::CellRange;
use crate::spreadsheet::sheet::RawSheet;
use crate::spreadsheet::sheet::SheetBuilder;
use crate::spreadsheet::Spreadsheet;
use crate::spreadsheet::SpreadsheetError;
use either::Either;
use std::collections::HashMap;
use thiserror::Error;
use tracing::debug;

// BIFF8 record types
const FORMULA: u16 = 6;
const EOF: u16 = 10;
const DATE1904: u16 = 34;
const FILE_PASS: u16 = 47;
const FONT: u16 = 49;
const CODE_PAGE: u16 = 66;
const BOUND_SHEET8: u16 = 133;
const MUL_RK: u16 = 189;
const XF: u16 = 224;
const MERGED_CELLS: u16 = 229;
const SST: u16 = 252;
const LABEL_SST: u16 = 253;
const NUMBER: u16 = 515;
const LABEL: u16 = 516;
const BOOL_ERR: u16 = 517;
const STRING: u16 = 519;
const RK: u16 = 638;
const FORMAT: u16 = 1054;
const BOF: u16 = 2057;

/// Font weight from which a font counts as bold
const BOLD_WEIGHT: u16 = 700;

#[derive(Error, Debug)]
pub enum XlsError {
    #[error("Invalid Code page '{0}'")]
    CodePageError(u16),

    #[error("Invalid Formula value '{0}'")]
    FormulaValueError(u64),
}

pub(crate) struct XlsSpreadsheet {
    source: String,
    reader: Biff8Reader,
    shared_strings: Vec<String>,
    formats: Vec<CellFormat>,
    /// Worksheets as (name, BOF offset) pairs
    sheets: Vec<(String, usize)>,
}

impl XlsSpreadsheet {
    /// Opens a compound file and reads the workbook globals substream.
    pub(crate) fn open(input: &Input) -> Result<XlsSpreadsheet, SheetSleuthError> {
        let source = input.identity();
        let mut file = input.open()?;
        let cfb = Cfb::new(&mut file)?;
        if cfb.exists("EncryptedPackage") {
            Err(SpreadsheetError::PasswordProtectedError(source.to_owned()))?
        }
        let mut reader = cfb
            .read("Workbook")
            .ok_none_else(|| cfb.read("Book"))?
            .map(Biff8Reader::new)
            .ok_or_else(|| SpreadsheetError::EmptyWorkbookError(source.to_owned()))?;

        let mut is_1904 = false;
        let mut shared_strings = Vec::new();
        let mut custom_formats: HashMap<String, CellType> = HashMap::new();
        let mut bold_fonts: Vec<bool> = Vec::new();
        let mut xfs: Vec<XfEntry> = Vec::new();
        let mut sheets: Vec<(String, usize)> = Vec::new();
        match_biff8_record!(reader => {
            EOF => break,
            FILE_PASS => Err(SpreadsheetError::PasswordProtectedError(source.to_owned()))?,
            DATE1904 if reader.read_u16()? == 1 => is_1904 = true,
            CODE_PAGE => {
                let code_page = reader.read_u16()?;
                reader.encoding = codepage::to_encoding(code_page).ok_or(XlsError::CodePageError(code_page))?;
            }
            FONT => {
                reader.skip(6)?;
                bold_fonts.push(reader.read_u16()? >= BOLD_WEIGHT);
            }
            FORMAT => {
                let id = reader.read_u16()?;
                let format = reader.read_xl_unicode_string()?;
                custom_formats.insert(id.to_string(), CellType::parse_custom_number_format(&format, is_1904));
            }
            XF => {
                let font = reader.read_u16()? as usize;
                let format = reader.read_u16()?;
                reader.skip(4)?;
                let indent = reader.read_u8()? & 0x0F;
                xfs.push(XfEntry {
                    format_id: format.to_string(),
                    // Font index 4 is never written, so later indexes are shifted by one
                    font_id: if font >= 4 { font - 1 } else { font },
                    indent,
                });
            }
            SST => shared_strings = load_shared_strings(&mut reader)?,
            BOUND_SHEET8 => {
                let pointer = reader.read_u32()? as usize;
                let _visibility = reader.read_u8()?;
                let sheet_type = reader.read_u8()?;
                let sheet_name = reader.read_short_xl_unicode_string()?;
                // Chart, macro and VBA sheets hold no cells
                if sheet_type == 0 {
                    sheets.push((sheet_name, pointer));
                }
            }
        });
        if sheets.is_empty() {
            Err(SpreadsheetError::EmptyWorkbookError(source.to_owned()))?
        }
        debug!(file = %source, sheets = sheets.len(), shared_strings = shared_strings.len(), "Opened BIFF8 workbook");

        Ok(XlsSpreadsheet {
            source,
            reader,
            shared_strings,
            formats: excel::resolve_formats(&xfs, &custom_formats, &bold_fonts, is_1904),
            sheets,
        })
    }

    fn format(&self, index: usize) -> CellFormat {
        self.formats.get(index).copied().unwrap_or(CellFormat {
            kind: CellType::Number,
            ..CellFormat::default()
        })
    }
}

impl Spreadsheet for XlsSpreadsheet {
    fn sheet_names(&self) -> Vec<String> {
        self.sheets.iter().map(|(name, _)| name.to_owned()).collect()
    }

    fn read_sheet(&mut self, index: usize, budget: &Budget) -> Result<RawSheet, SheetSleuthError> {
        let (sheet_name, pointer) = self.sheets.get(index).cloned().ok_or(SpreadsheetError::SheetIndexError(index))?;
        let mut builder = SheetBuilder::new(&self.source, &sheet_name);
        let mut last_row = None::<usize>;

        self.reader.goto(pointer);
        self.reader.next()?;
        while let Some(tag) = self.reader.next()? {
            match tag {
                BOF | EOF => break,
                MUL_RK => {
                    let row = self.reader.read_u16()? as usize;
                    let first_col = self.reader.read_u16()? as usize;
                    check_row(&mut last_row, row, budget)?;
                    // Each RkRec is 6 bytes; the record ends with the last column index
                    let count = self.reader.remaining().saturating_sub(2) / 6;
                    for col in first_col..first_col + count {
                        let xf = self.reader.read_u16()? as usize;
                        let format = self.format(xf);
                        let value = self.reader.read_rk_number()?;
                        builder.push(Cell::new(row, col, format.kind, value.to_string()).with_style(format.style));
                    }
                }
                BOOL_ERR | NUMBER | RK | LABEL_SST | LABEL | FORMULA => {
                    let row = self.reader.read_u16()? as usize;
                    let col = self.reader.read_u16()? as usize;
                    check_row(&mut last_row, row, budget)?;
                    let xf = self.reader.read_u16()? as usize;
                    let format = self.format(xf);
                    let (either, value) = match tag {
                        BOOL_ERR => read_bool_or_error_cell(&mut self.reader)?,
                        NUMBER => (Either::Right(()), self.reader.read_f64()?.to_string()),
                        RK => (Either::Right(()), self.reader.read_rk_number()?.to_string()),
                        LABEL_SST => {
                            let index = self.reader.read_u32()? as usize;
                            let value = self.shared_strings.get(index).cloned().unwrap_or_default();
                            (Either::Left(CellType::Text), value)
                        }
                        LABEL => (Either::Left(CellType::Text), self.reader.read_xl_unicode_string()?),
                        _ => read_formula_cell(&mut self.reader)?,
                    };
                    let kind = either.left_or(format.kind);
                    builder.push(Cell::new(row, col, kind, value).with_style(format.style));
                }
                MERGED_CELLS => {
                    let count = self.reader.read_u16()?;
                    for _ in 0..count {
                        let top = self.reader.read_u16()? as usize;
                        let bottom = self.reader.read_u16()? as usize;
                        let left = self.reader.read_u16()? as usize;
                        let right = self.reader.read_u16()? as usize;
                        builder.merge(CellRange::new(top, left, bottom, right));
                    }
                }
                _ => (),
            }
        }
        Ok(builder.finish())
    }
}

/// Checks the budget whenever the reader moves to a new row.
fn check_row(last_row: &mut Option<usize>, row: usize, budget: &Budget) -> Result<(), SheetSleuthError> {
    if *last_row != Some(row) {
        *last_row = Some(row);
        budget.check()?;
    }
    Ok(())
}

/// Loads the shared string table from the SST record.
fn load_shared_strings(reader: &mut Biff8Reader) -> Result<Vec<String>, SheetSleuthError> {
    reader.skip(4)?;
    let count = reader.read_u32()? as usize;
    let mut shared_strings: Vec<String> = Vec::with_capacity(count.min(65_536));
    for _ in 0..count {
        shared_strings.push(reader.read_xl_unicode_rich_extended_string()?);
    }
    Ok(shared_strings)
}

/// Reads the value part of a BOOL_ERR record.
fn read_bool_or_error_cell(reader: &mut Biff8Reader) -> Result<(Either<CellType, ()>, String), SheetSleuthError> {
    let value = reader.read_u8()?;
    let flag = reader.read_u8()?;
    if flag == 0 {
        Ok((Either::Left(CellType::Boolean), value.to_string()))
    } else {
        Ok((Either::Left(CellType::Error), to_error_value(value).to_owned()))
    }
}

/// Reads the cached result of a FORMULA record. String results live in the
/// STRING record that follows.
///
/// # Returns
/// The native kind (or `Right` to use the cell format) and the value text
fn read_formula_cell(reader: &mut Biff8Reader) -> Result<(Either<CellType, ()>, String), SheetSleuthError> {
    let formula = reader.read_u64()?;
    let is_number = (formula & 0xFFFF_0000_0000_0000) != 0xFFFF_0000_0000_0000;
    let flag = formula & 0xFF;
    if is_number {
        Ok((Either::Right(()), f64::from_bits(formula).to_string()))
    } else if flag == 0 {
        match reader.next()? {
            Some(STRING) => Ok((Either::Left(CellType::Text), reader.read_xl_unicode_string()?)),
            _ => Err(XlsError::FormulaValueError(formula))?,
        }
    } else if flag == 1 {
        let value = if (formula & 0xFF_0000) > 0 { "1" } else { "0" };
        Ok((Either::Left(CellType::Boolean), value.to_owned()))
    } else if flag == 2 {
        let code = ((formula >> 16) & 0xFF) as u8;
        Ok((Either::Left(CellType::Error), to_error_value(code).to_owned()))
    } else if flag == 3 {
        Ok((Either::Left(CellType::Text), String::new()))
    } else {
        Err(XlsError::FormulaValueError(formula))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::helpers::biff8::tests::record;
    use crate::helpers::cfb::tests::compound_file;

    fn short_string(text: &str) -> Vec<u8> {
        let mut bytes = vec![text.len() as u8, 0];
        bytes.extend_from_slice(text.as_bytes());
        bytes
    }

    fn long_string(text: &str) -> Vec<u8> {
        let mut bytes = (text.len() as u16).to_le_bytes().to_vec();
        bytes.push(0);
        bytes.extend_from_slice(text.as_bytes());
        bytes
    }

    fn cell_header(row: u16, col: u16, xf: u16) -> Vec<u8> {
        [row.to_le_bytes(), col.to_le_bytes(), xf.to_le_bytes()].concat()
    }

    fn font(weight: u16) -> Vec<u8> {
        let mut payload = vec![0u8; 6];
        payload.extend_from_slice(&weight.to_le_bytes());
        payload.extend_from_slice(&[0u8; 8]);
        record(FONT, &payload)
    }

    fn xf(font: u16, format: u16, indent: u8) -> Vec<u8> {
        let mut payload = [font.to_le_bytes(), format.to_le_bytes()].concat();
        payload.extend_from_slice(&[0, 0, 0, 0, indent]);
        payload.extend_from_slice(&[0u8; 11]);
        record(XF, &payload)
    }

    /// Workbook stream with one worksheet named "Ledger".
    fn workbook_stream(sheet_records: &[Vec<u8>]) -> Vec<u8> {
        let mut globals = record(BOF, &[0x00, 0x06, 0x05, 0x00]);
        globals.extend(record(CODE_PAGE, &1252u16.to_le_bytes()));
        for weight in [400, 400, 400, 400, 700] {
            globals.extend(font(weight));
        }
        let mut date_format = 164u16.to_le_bytes().to_vec();
        date_format.extend(long_string("yyyy-mm-dd"));
        globals.extend(record(FORMAT, &date_format));
        globals.extend(xf(0, 0, 0));
        globals.extend(xf(5, 0, 0));
        globals.extend(xf(0, 164, 0));
        globals.extend(xf(0, 0, 1));

        let mut sst = 2u32.to_le_bytes().to_vec();
        sst.extend(2u32.to_le_bytes());
        sst.extend(long_string("Account"));
        sst.extend(long_string("Cash"));
        globals.extend(record(SST, &sst));

        let bound_sheet_size = 4 + 4 + 2 + 2 + "Ledger".len();
        let eof_size = 4;
        let pointer = (globals.len() + bound_sheet_size + eof_size) as u32;
        let mut bound_sheet = pointer.to_le_bytes().to_vec();
        bound_sheet.extend([0, 0]);
        bound_sheet.extend(short_string("Ledger"));
        globals.extend(record(BOUND_SHEET8, &bound_sheet));
        globals.extend(record(EOF, &[]));

        globals.extend(record(BOF, &[0x00, 0x06, 0x10, 0x00]));
        for sheet_record in sheet_records {
            globals.extend_from_slice(sheet_record);
        }
        globals.extend(record(EOF, &[]));
        globals
    }

    fn open(stream: Vec<u8>) -> Result<XlsSpreadsheet, SheetSleuthError> {
        XlsSpreadsheet::open(&Input::bytes("ledger.xls", compound_file("Workbook", &stream)))
    }

    #[test]
    fn read_cells_formats_and_merges() -> Result<(), SheetSleuthError> {
        let mut header = cell_header(0, 0, 1);
        header.extend(0u32.to_le_bytes());
        let mut label = cell_header(1, 0, 3);
        label.extend(1u32.to_le_bytes());
        let mut date = cell_header(1, 1, 2);
        date.extend(45658f64.to_le_bytes());
        let mut inline = cell_header(2, 0, 0);
        inline.extend(long_string("Total"));
        let mut mul_rk = [2u16.to_le_bytes(), 1u16.to_le_bytes()].concat();
        for value in [10u32, 20u32] {
            mul_rk.extend(0u16.to_le_bytes());
            mul_rk.extend(((value << 2) | 0x02).to_le_bytes());
        }
        mul_rk.extend(2u16.to_le_bytes());
        let mut merged = 1u16.to_le_bytes().to_vec();
        for value in [3u16, 3, 0, 2] {
            merged.extend(value.to_le_bytes());
        }

        let stream = workbook_stream(&[
            record(LABEL_SST, &header),
            record(LABEL_SST, &label),
            record(NUMBER, &date),
            record(LABEL, &inline),
            record(MUL_RK, &mul_rk),
            record(MERGED_CELLS, &merged),
        ]);
        let mut spreadsheet = open(stream)?;
        assert_eq!(spreadsheet.sheet_names(), vec!["Ledger"]);
        let sheet = spreadsheet.read_sheet(0, &Budget::unbounded())?;

        let account = sheet.get(0, 0).unwrap();
        assert_eq!(account.value, "Account");
        assert!(account.style.bold);
        assert_eq!(sheet.get(1, 0).unwrap().style.indent, 1);
        assert_eq!(sheet.get(1, 1).unwrap().to_string(), "2025-01-01");
        assert_eq!(sheet.get(2, 0).unwrap().value, "Total");
        assert_eq!(sheet.get(2, 1).unwrap().as_number(), Some(10.0));
        assert_eq!(sheet.get(2, 2).unwrap().as_number(), Some(20.0));
        assert_eq!(sheet.merges(), &[CellRange::new(3, 0, 3, 2)]);
        Ok(())
    }

    #[test]
    fn formula_results() -> Result<(), SheetSleuthError> {
        let mut number = cell_header(0, 0, 0);
        number.extend(12.5f64.to_le_bytes());
        number.extend([0u8; 6]);
        let mut string = cell_header(0, 1, 0);
        string.extend(0xFFFF_0000_0000_0000u64.to_le_bytes());
        string.extend([0u8; 6]);
        let mut boolean = cell_header(0, 2, 0);
        boolean.extend(0xFFFF_0000_0001_0001u64.to_le_bytes());
        boolean.extend([0u8; 6]);

        let stream = workbook_stream(&[
            record(FORMULA, &number),
            record(FORMULA, &string),
            record(STRING, &long_string("North")),
            record(FORMULA, &boolean),
        ]);
        let sheet = open(stream)?.read_sheet(0, &Budget::unbounded())?;
        assert_eq!(sheet.get(0, 0).unwrap().as_number(), Some(12.5));
        assert_eq!(sheet.get(0, 1).unwrap().value, "North");
        assert_eq!(sheet.get(0, 2).unwrap().as_boolean(), Some(true));
        Ok(())
    }

    #[test]
    fn password_protected_workbook() {
        let mut stream = record(BOF, &[0x00, 0x06, 0x05, 0x00]);
        stream.extend(record(FILE_PASS, &[1, 0]));
        stream.extend(record(EOF, &[]));
        assert!(matches!(
            open(stream),
            Err(SheetSleuthError::SpreadsheetError(SpreadsheetError::PasswordProtectedError(_)))
        ));
    }

    #[test]
    fn missing_workbook_stream() {
        let data = compound_file("Other", b"nothing");
        assert!(XlsSpreadsheet::open(&Input::bytes("ledger.xls", data)).is_err());
    }
}
