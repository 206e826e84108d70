//! OpenDocument spreadsheet reader (`.ods`, `.ots`).

use crate::error::SheetSleuthError;
use crate::helpers::budget::Budget;
use crate::helpers::reader::Input;
use crate::helpers::reader::SourceReader;
use crate::helpers::xml::XmlNodeHelper;
use crate::helpers::xml::XmlReader;
use crate::helpers::xml::XmlTextContextHelper;
use crate::helpers::zip::ZipHelper;
use crate::match_xml_events;
use crate::spreadsheet::cell::Cell;
use crate::spreadsheet::cell::CellStyle;
use crate::spreadsheet::cell::CellType;
use crate::spreadsheet::range::CellRange;
use crate::spreadsheet::sheet::RawSheet;
use crate::spreadsheet::sheet::SheetBuilder;
use crate::spreadsheet::Spreadsheet;
use crate::spreadsheet::SpreadsheetError;
use quick_xml::events::Event;
use quick_xml::name::QName;
use std::collections::HashMap;
use std::io::BufRead;
use std::io::Read;
use thiserror::Error;
use tracing::debug;
use zip::ZipArchive;

const MIME_TYPE: &[u8] = b"application/vnd.oasis.opendocument.spreadsheet";
const CONTENT: &str = "content.xml";

const STYLE: QName = QName(b"style:style");
const TEXT_PROPERTIES: QName = QName(b"style:text-properties");
const PARAGRAPH_PROPERTIES: QName = QName(b"style:paragraph-properties");
const TABLE: QName = QName(b"table:table");
const TABLE_ROW: QName = QName(b"table:table-row");
const TABLE_CELL: QName = QName(b"table:table-cell");
const TABLE_COVERED_CELL: QName = QName(b"table:covered-table-cell");
const ANNOTATION: QName = QName(b"office:annotation");
const PARAGRAPH: QName = QName(b"text:p");
const SPACE: QName = QName(b"text:s");
const TAB: QName = QName(b"text:tab");

#[derive(Error, Debug)]
pub enum OdsError {
    #[error("Invalid ODS MIME type")]
    MimeTypeError,
}

pub(crate) struct OdsSpreadsheet {
    source: String,
    zip: ZipArchive<SourceReader>,
    sheet_names: Vec<String>,
    styles: HashMap<String, CellStyle>,
}

impl OdsSpreadsheet {
    pub(crate) fn open(input: &Input) -> Result<Self, SheetSleuthError> {
        let source = input.identity();
        let mut zip = ZipArchive::new(input.open()?)?;
        check_mime(&mut zip)?;
        if is_password_protected(&mut zip)? {
            Err(SpreadsheetError::PasswordProtectedError(source.to_owned()))?;
        }
        let (sheet_names, styles) = match zip.xml_reader(CONTENT)? {
            Some(mut reader) => load_outline(&mut reader)?,
            None => Err(SpreadsheetError::FileError(CONTENT.to_owned()))?,
        };
        if sheet_names.is_empty() {
            Err(SpreadsheetError::EmptyWorkbookError(source.to_owned()))?;
        }
        debug!(file = %source, sheets = sheet_names.len(), "Opened OpenDocument workbook");
        Ok(OdsSpreadsheet {
            source,
            zip,
            sheet_names,
            styles,
        })
    }
}

impl Spreadsheet for OdsSpreadsheet {
    fn sheet_names(&self) -> Vec<String> {
        self.sheet_names.to_owned()
    }

    fn read_sheet(&mut self, index: usize, budget: &Budget) -> Result<RawSheet, SheetSleuthError> {
        let sheet_name = self.sheet_names.get(index).ok_or(SpreadsheetError::SheetIndexError(index))?;
        let mut reader = self
            .zip
            .xml_reader(CONTENT)?
            .ok_or_else(|| SpreadsheetError::FileError(CONTENT.to_owned()))?;
        let mut builder = SheetBuilder::new(&self.source, sheet_name);
        if seek_table(&mut reader, index)? {
            read_table(&mut reader, &self.styles, &mut builder, budget)?;
        }
        Ok(builder.finish())
    }
}

/// Collects table names and the cell styles that carry bold text or an indent.
fn load_outline<R: BufRead>(reader: &mut XmlReader<R>) -> Result<(Vec<String>, HashMap<String, CellStyle>), SheetSleuthError> {
    let mut sheet_names = Vec::<String>::new();
    let mut styles = HashMap::<String, CellStyle>::new();
    let mut style_name = None::<String>;
    match_xml_events!(reader => {
        Event::Start(event) if event.name() == STYLE => {
            style_name = event.get_attribute_value("style:name")?.map(|name| name.into_owned());
        }
        Event::End(event) if event.name() == STYLE => style_name = None,
        Event::Start(event) if event.name() == TEXT_PROPERTIES => {
            let is_bold = event.get_attribute_value("fo:font-weight")?
                .map(|weight| weight == "bold" || weight.parse::<u16>().map(|weight| weight >= 700).unwrap_or(false))
                .unwrap_or(false);
            if let Some(name) = style_name.as_ref().filter(|_| is_bold) {
                styles.entry(name.to_owned()).or_default().bold = true;
            }
        }
        Event::Start(event) if event.name() == PARAGRAPH_PROPERTIES => {
            let has_margin = event.get_attribute_value("fo:margin-left")?
                .map(|margin| margin.trim_end_matches(char::is_alphabetic).parse::<f64>().map(|value| value > 0.0).unwrap_or(false))
                .unwrap_or(false);
            if let Some(name) = style_name.as_ref().filter(|_| has_margin) {
                styles.entry(name.to_owned()).or_default().indent = 1;
            }
        }
        Event::Start(event) if event.name() == TABLE => {
            let name = event.get_attribute_value("table:name")?
                .map(|name| name.into_owned())
                .unwrap_or_else(|| format!("Sheet{}", sheet_names.len() + 1));
            sheet_names.push(name);
        }
    });
    Ok((sheet_names, styles))
}

/// Advances the reader past the start of the `index`-th table.
fn seek_table<R: BufRead>(reader: &mut XmlReader<R>, index: usize) -> Result<bool, SheetSleuthError> {
    let mut count = 0usize;
    match_xml_events!(reader => {
        Event::Start(event) if event.name() == TABLE => {
            if count == index {
                return Ok(true);
            }
            count += 1;
        }
    });
    Ok(false)
}

/// Reads rows and cells up to the end of the current table.
fn read_table<R: BufRead>(
    reader: &mut XmlReader<R>,
    styles: &HashMap<String, CellStyle>,
    builder: &mut SheetBuilder,
    budget: &Budget,
) -> Result<(), SheetSleuthError> {
    let mut row = 0usize;
    let mut col = 0usize;
    let mut row_count = 1usize;
    let mut col_count = 1usize;
    let mut kind = CellType::Empty;
    let mut style = CellStyle::default();
    let mut value = String::new();
    let mut row_style = None::<String>;
    // Inside a string cell, outside annotations
    let mut text_context = false;
    let mut comment_context = false;
    let mut paragraph_count = 0usize;

    match_xml_events!(reader => {
        Event::End(event) if event.name() == TABLE => break,
        Event::Start(event) if event.name() == TABLE_ROW => {
            row_count = event.parse_attribute_value::<usize>("table:number-rows-repeated")?.unwrap_or(1).max(1);
            row_style = event.get_attribute_value("table:default-cell-style-name")?.map(|name| name.into_owned());
            col = 0;
        }
        Event::End(event) if event.name() == TABLE_ROW => {
            row += row_count;
            budget.check()?;
        }
        Event::Start(event) if event.name() == TABLE_CELL || event.name() == TABLE_COVERED_CELL => {
            value.clear();
            paragraph_count = 0;
            col_count = event.parse_attribute_value::<usize>("table:number-columns-repeated")?.unwrap_or(1).max(1);
            style = event.get_attribute_value("table:style-name")?
                .map(|name| name.into_owned())
                .or_else(|| row_style.to_owned())
                .and_then(|name| styles.get(&name).copied())
                .unwrap_or_default();

            let rows_spanned = event.parse_attribute_value::<usize>("table:number-rows-spanned")?.unwrap_or(1);
            let cols_spanned = event.parse_attribute_value::<usize>("table:number-columns-spanned")?.unwrap_or(1);
            if rows_spanned > 1 || cols_spanned > 1 {
                builder.merge(CellRange::new(row, col, row + rows_spanned.max(1) - 1, col + cols_spanned.max(1) - 1));
            }

            let is_error = event.get_attribute_value("calcext:value-type")?.map(|kind| kind == "error").unwrap_or(false);
            let value_type = event.get_attribute_value("office:value-type")?;
            kind = match value_type.as_deref() {
                _ if is_error => CellType::Error,
                Some("boolean") => CellType::Boolean,
                Some("date") => CellType::IsoDateTime,
                Some("time") => CellType::IsoDuration,
                Some("string") => CellType::Text,
                Some(_) => CellType::Number,
                None => CellType::Empty,
            };
            text_context = matches!(kind, CellType::Text | CellType::Error);
            match kind {
                CellType::Boolean => {
                    let is_true = event.get_attribute_value("office:boolean-value")?
                        .map(|flag| flag != "false" && flag != "0")
                        .unwrap_or(false);
                    value.push_str(if is_true { "1" } else { "0" });
                }
                CellType::IsoDateTime => if let Some(data) = event.get_attribute_value("office:date-value")? {
                    value.push_str(&data);
                },
                CellType::IsoDuration => if let Some(data) = event.get_attribute_value("office:time-value")? {
                    value.push_str(&data);
                },
                CellType::Number => if let Some(data) = event.get_attribute_value("office:value")? {
                    value.push_str(&data);
                },
                _ => (),
            }
        }
        Event::End(event) if event.name() == TABLE_CELL || event.name() == TABLE_COVERED_CELL => {
            if kind != CellType::Empty && !value.is_empty() {
                for row_number in row..row + row_count {
                    for col_number in col..col + col_count {
                        builder.push(Cell::new(row_number, col_number, kind, value.to_owned()).with_style(style));
                    }
                }
            }
            col += col_count;
            kind = CellType::Empty;
            text_context = false;
            comment_context = false;
        }
        Event::Start(event) if text_context && event.name() == ANNOTATION => comment_context = true,
        Event::End(event) if text_context && event.name() == ANNOTATION => comment_context = false,
        Event::Start(event) if text_context && !comment_context && event.name() == PARAGRAPH => {
            if paragraph_count > 0 {
                value.push('\n');
            }
            paragraph_count += 1;
        }
        Event::Start(event) if text_context && !comment_context && event.name() == SPACE => {
            let count = event.parse_attribute_value::<usize>("text:c")?.unwrap_or(1);
            value.extend(std::iter::repeat_n(' ', count));
        }
        Event::Start(event) if text_context && !comment_context && event.name() == TAB => value.push('\t'),
        Event::Text(event) if text_context && !comment_context => value.push_bytes_text(&event)?,
        Event::GeneralRef(event) if text_context && !comment_context => value.push_bytes_ref(&event)?,
    });
    Ok(())
}

fn check_mime(zip: &mut ZipArchive<SourceReader>) -> Result<(), SheetSleuthError> {
    if let Some(file) = &mut zip.file("mimetype")? {
        let mut buffer = Vec::with_capacity(MIME_TYPE.len());
        file.take(MIME_TYPE.len() as u64 + 16).read_to_end(&mut buffer)?;
        if !buffer.starts_with(MIME_TYPE) {
            Err(OdsError::MimeTypeError)?;
        }
    }
    Ok(())
}

/// Encrypted packages list `manifest:encryption-data` under a file entry.
/// A package without a manifest is treated as unencrypted.
fn is_password_protected(zip: &mut ZipArchive<SourceReader>) -> Result<bool, SheetSleuthError> {
    let Some(mut reader) = zip.xml_reader("META-INF/manifest.xml")? else {
        return Ok(false);
    };
    let mut in_file_entry = false;
    match_xml_events!(reader => {
        Event::Start(event) if event.name() == QName(b"manifest:file-entry") => in_file_entry = true,
        Event::End(event) if event.name() == QName(b"manifest:file-entry") => in_file_entry = false,
        Event::Start(event) if in_file_entry && event.name() == QName(b"manifest:encryption-data") => {
            return Ok(true);
        }
    });
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::io::Write;
    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    fn ods_package(body: &str, manifest: Option<&str>) -> Vec<u8> {
        let content = format!(
            r#"<office:document-content xmlns:office="urn:oasis:names:tc:opendocument:xmlns:office:1.0" xmlns:table="urn:oasis:names:tc:opendocument:xmlns:table:1.0" xmlns:text="urn:oasis:names:tc:opendocument:xmlns:text:1.0" xmlns:style="urn:oasis:names:tc:opendocument:xmlns:style:1.0" xmlns:fo="urn:oasis:names:tc:opendocument:xmlns:xsl-fo-compatible:1.0">
            <office:automatic-styles>
                <style:style style:name="ce1" style:family="table-cell"><style:text-properties fo:font-weight="bold"/></style:style>
                <style:style style:name="ce2" style:family="table-cell"><style:paragraph-properties fo:margin-left="0.25in"/></style:style>
            </office:automatic-styles>
            <office:body><office:spreadsheet>{body}</office:spreadsheet></office:body></office:document-content>"#
        );
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
        writer.start_file("mimetype", options).unwrap();
        writer.write_all(MIME_TYPE).unwrap();
        writer.start_file(CONTENT, options).unwrap();
        writer.write_all(content.as_bytes()).unwrap();
        if let Some(manifest) = manifest {
            writer.start_file("META-INF/manifest.xml", options).unwrap();
            writer.write_all(manifest.as_bytes()).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn read_values_spans_and_styles() -> Result<(), SheetSleuthError> {
        let body = r#"
            <table:table table:name="Empty"/>
            <table:table table:name="Budget">
                <table:table-row>
                    <table:table-cell table:style-name="ce1" office:value-type="string" table:number-columns-spanned="2"><text:p>Region</text:p></table:table-cell>
                    <table:covered-table-cell/>
                    <table:table-cell office:value-type="string"><text:p>a<text:s text:c="2"/>b</text:p><office:annotation><text:p>note</text:p></office:annotation></table:table-cell>
                </table:table-row>
                <table:table-row table:number-rows-repeated="2">
                    <table:table-cell table:style-name="ce2" office:value-type="float" office:value="12.5"/>
                    <table:table-cell office:value-type="date" office:date-value="2024-03-31"/>
                    <table:table-cell office:value-type="boolean" office:boolean-value="true"/>
                </table:table-row>
                <table:table-row table:number-rows-repeated="1000"><table:table-cell table:number-columns-repeated="1024"/></table:table-row>
                <table:table-row>
                    <table:table-cell table:number-columns-repeated="2"/>
                    <table:table-cell office:value-type="time" office:time-value="PT01H30M00S"/>
                    <table:table-cell office:value-type="string" calcext:value-type="error"><text:p>#DIV/0!</text:p></table:table-cell>
                </table:table-row>
            </table:table>"#;
        let data = ods_package(body, None);
        let mut spreadsheet = OdsSpreadsheet::open(&Input::bytes("budget.ods", data))?;
        assert_eq!(spreadsheet.sheet_names(), vec!["Empty", "Budget"]);
        assert!(spreadsheet.read_sheet(0, &Budget::unbounded())?.is_empty());

        let sheet = spreadsheet.read_sheet(1, &Budget::unbounded())?;
        assert_eq!(sheet.get(0, 0).unwrap().value, "Region");
        assert!(sheet.get(0, 0).unwrap().style.bold);
        assert_eq!(sheet.get(0, 2).unwrap().value, "a  b");
        assert_eq!(sheet.merges(), &[CellRange::new(0, 0, 0, 1)]);
        assert_eq!(sheet.get(2, 0).unwrap().as_number(), Some(12.5));
        assert_eq!(sheet.get(2, 0).unwrap().style.indent, 1);
        assert_eq!(sheet.get(1, 1).unwrap().kind, CellType::IsoDateTime);
        assert_eq!(sheet.get(2, 2).unwrap().as_boolean(), Some(true));
        assert_eq!(sheet.get(1003, 2).unwrap().kind, CellType::IsoDuration);
        assert_eq!(sheet.get(1003, 3).unwrap().kind, CellType::Error);
        Ok(())
    }

    #[test]
    fn encrypted_package_is_rejected() {
        let manifest = r#"<manifest:manifest><manifest:file-entry manifest:full-path="content.xml"><manifest:encryption-data/></manifest:file-entry></manifest:manifest>"#;
        let data = ods_package(r#"<table:table table:name="Sheet1"/>"#, Some(manifest));
        assert!(matches!(
            OdsSpreadsheet::open(&Input::bytes("secret.ods", data)),
            Err(SheetSleuthError::SpreadsheetError(SpreadsheetError::PasswordProtectedError(_)))
        ));
    }

    #[test]
    fn missing_content_part_fails() {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
        writer.start_file("mimetype", options).unwrap();
        writer.write_all(MIME_TYPE).unwrap();
        let data = writer.finish().unwrap().into_inner();
        assert!(matches!(
            OdsSpreadsheet::open(&Input::bytes("hollow.ods", data)),
            Err(SheetSleuthError::SpreadsheetError(SpreadsheetError::FileError(_)))
        ));
    }

    #[test]
    fn wrong_mime_type_is_rejected() {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        writer.start_file("mimetype", SimpleFileOptions::default()).unwrap();
        writer.write_all(b"application/vnd.oasis.opendocument.text").unwrap();
        let data = writer.finish().unwrap().into_inner();
        assert!(matches!(
            OdsSpreadsheet::open(&Input::bytes("letter.ods", data)),
            Err(SheetSleuthError::OdsError(OdsError::MimeTypeError))
        ));
    }
}
