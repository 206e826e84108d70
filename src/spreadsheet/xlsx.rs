//! OpenXML workbook reader (`.xlsx`, `.xlsm`, `.xltx`, `.xltm`).

use crate::error::ResultMessage;
use crate::error::SheetSleuthError;
use crate::helpers::budget::Budget;
use crate::helpers::reader::Input;
use crate::helpers::reader::SourceReader;
use crate::helpers::xml::XmlAttributeHelper;
use crate::helpers::xml::XmlNodeHelper;
use crate::helpers::xml::XmlReader;
use crate::helpers::zip::ZipHelper;
use crate::match_xml_events;
use crate::spreadsheet::cell::Cell;
use crate::spreadsheet::cell::CellType;
use crate::spreadsheet::excel;
use crate::spreadsheet::excel::CellFormat;
use crate::spreadsheet::excel::XfEntry;
use crate::spreadsheet::range::CellRange;
use crate::spreadsheet::reference::reference_to_index;
use crate::spreadsheet::sheet::RawSheet;
use crate::spreadsheet::sheet::SheetBuilder;
use crate::spreadsheet::Spreadsheet;
use crate::spreadsheet::SpreadsheetError;
use quick_xml::events::Event;
use std::borrow::Cow;
use std::collections::HashMap;
use std::io::BufRead;
use tracing::debug;
use zip::ZipArchive;

// Local names of the SpreadsheetML elements we read
const TAG_CUSTOM_FORMAT: &[u8] = b"numFmt";
const TAG_FONTS: &[u8] = b"fonts";
const TAG_FONT: &[u8] = b"font";
const TAG_BOLD: &[u8] = b"b";
const TAG_FORMAT_INDEXES: &[u8] = b"cellXfs";
const TAG_FORMAT_INDEX: &[u8] = b"xf";
const TAG_ALIGNMENT: &[u8] = b"alignment";
const TAG_SHARED_STRING_ITEM: &[u8] = b"si";
const TAG_WORKBOOK_PROPERTIES: &[u8] = b"workbookPr";
const TAG_SHEET: &[u8] = b"sheet";
const TAG_ROW: &[u8] = b"row";
const TAG_CELL: &[u8] = b"c";
const TAG_INLINE_STRING: &[u8] = b"is";
const TAG_VALUE: &[u8] = b"v";
const TAG_MERGE_CELL: &[u8] = b"mergeCell";

pub(crate) struct XlsxSpreadsheet {
    source: String,
    zip: ZipArchive<SourceReader>,
    shared_strings: Vec<String>,
    formats: Vec<CellFormat>,
    /// Worksheets as (name, package path) pairs
    sheets: Vec<(String, String)>,
}

impl XlsxSpreadsheet {
    /// Opens an OpenXML package and loads the workbook, styles and shared strings.
    pub(crate) fn open(input: &Input) -> Result<XlsxSpreadsheet, SheetSleuthError> {
        let source = input.identity();
        let mut zip = ZipArchive::new(input.open()?)?;

        let relationships = match zip.xml_reader("xl/_rels/workbook.xml.rels")? {
            Some(mut reader) => excel::load_relationships(&mut reader)?,
            None => HashMap::new(),
        };
        let (sheets, is_1904) = match zip.xml_reader("xl/workbook.xml")? {
            Some(mut reader) => load_workbook(&mut reader, &relationships)?,
            None => Err(SpreadsheetError::FileError("xl/workbook.xml".to_owned()))?,
        };
        if sheets.is_empty() {
            Err(SpreadsheetError::EmptyWorkbookError(source.to_owned()))?
        }

        let formats = match zip.xml_reader("xl/styles.xml")? {
            Some(mut reader) => load_styles(&mut reader, is_1904).with_prefix("xl/styles.xml")?,
            None => Vec::new(),
        };
        let shared_strings = match zip.xml_reader("xl/sharedStrings.xml")? {
            Some(mut reader) => load_shared_strings(&mut reader).with_prefix("xl/sharedStrings.xml")?,
            None => Vec::new(),
        };
        debug!(file = %source, sheets = sheets.len(), shared_strings = shared_strings.len(), "Opened OpenXML workbook");

        Ok(XlsxSpreadsheet {
            source,
            zip,
            shared_strings,
            formats,
            sheets,
        })
    }
}

impl Spreadsheet for XlsxSpreadsheet {
    fn sheet_names(&self) -> Vec<String> {
        self.sheets.iter().map(|(name, _)| name.to_owned()).collect()
    }

    fn read_sheet(&mut self, index: usize, budget: &Budget) -> Result<RawSheet, SheetSleuthError> {
        let (sheet_name, zip_path) = self.sheets.get(index).ok_or(SpreadsheetError::SheetIndexError(index))?;
        let mut reader = self
            .zip
            .xml_reader(zip_path)?
            .ok_or_else(|| SpreadsheetError::FileError(zip_path.to_owned()))?;
        let context = WorksheetContext {
            shared_strings: &self.shared_strings,
            formats: &self.formats,
        };
        let mut builder = SheetBuilder::new(&self.source, sheet_name);
        read_worksheet(&mut reader, &context, &mut builder, budget)?;
        Ok(builder.finish())
    }
}

/// Reads sheet names with their package paths, plus the 1904 date-system flag.
/// Sheets without a resolvable relationship fall back to the conventional path.
pub(crate) fn load_workbook<R: BufRead>(
    reader: &mut XmlReader<R>,
    relationships: &HashMap<String, String>,
) -> Result<(Vec<(String, String)>, bool), SheetSleuthError> {
    let mut sheets: Vec<(String, String)> = Vec::new();
    let mut is_1904 = false;
    match_xml_events!(reader => {
        Event::Start(event) if event.local_name().as_ref() == TAG_SHEET => {
            let mut name = None::<Cow<str>>;
            let mut id = None::<Cow<str>>;
            for result in event.attributes() {
                let attribute = result?;
                let key = attribute.key.local_name();
                if key.as_ref() == b"name" {
                    name = Some(attribute.get_value()?);
                } else if key.as_ref() == b"id" {
                    id = Some(attribute.get_value()?);
                }
            }
            if let Some(name) = name {
                let path = id
                    .and_then(|id| relationships.get(id.as_ref()).cloned())
                    .unwrap_or_else(|| format!("xl/worksheets/sheet{}.xml", sheets.len() + 1));
                sheets.push((name.into_owned(), path));
            }
        }
        Event::Start(event) if event.local_name().as_ref() == TAG_WORKBOOK_PROPERTIES => {
            is_1904 = event.get_attribute_value("date1904")?
                .map(|value| value == "1" || value == "true")
                .unwrap_or(false);
        }
    });
    Ok((sheets, is_1904))
}

/// Loads number formats, bold fonts and indents from `styles.xml`, resolved per XF index.
pub(crate) fn load_styles<R: BufRead>(reader: &mut XmlReader<R>, is_1904: bool) -> Result<Vec<CellFormat>, SheetSleuthError> {
    let mut custom_formats = HashMap::<String, CellType>::new();
    let mut bold_fonts = Vec::<bool>::new();
    let mut xfs = Vec::<XfEntry>::new();

    let mut fonts_context = false;
    let mut font_context = false;
    let mut format_indexes_context = false;
    let mut xf_context = false;

    match_xml_events!(reader => {
        Event::Start(event) if event.local_name().as_ref() == TAG_CUSTOM_FORMAT => {
            let id = event.get_attribute_value("numFmtId")?;
            let format = event.get_attribute_value("formatCode")?;
            if let Some((id, format)) = id.zip(format) {
                custom_formats.insert(id.to_string(), CellType::parse_custom_number_format(&format, is_1904));
            }
        }
        Event::Start(event) if event.local_name().as_ref() == TAG_FONTS => fonts_context = true,
        Event::End(event) if event.local_name().as_ref() == TAG_FONTS => fonts_context = false,
        Event::Start(event) if fonts_context && event.local_name().as_ref() == TAG_FONT => {
            font_context = true;
            bold_fonts.push(false);
        }
        Event::End(event) if fonts_context && event.local_name().as_ref() == TAG_FONT => font_context = false,
        Event::Start(event) if font_context && event.local_name().as_ref() == TAG_BOLD => {
            if let Some(bold) = bold_fonts.last_mut() {
                *bold = event.flag_attribute("val")?;
            }
        }
        Event::Start(event) if event.local_name().as_ref() == TAG_FORMAT_INDEXES => format_indexes_context = true,
        Event::End(event) if event.local_name().as_ref() == TAG_FORMAT_INDEXES => format_indexes_context = false,
        Event::Start(event) if format_indexes_context && event.local_name().as_ref() == TAG_FORMAT_INDEX => {
            xf_context = true;
            xfs.push(XfEntry {
                format_id: event.get_attribute_value("numFmtId")?.map(Cow::into_owned).unwrap_or_else(|| "0".to_owned()),
                font_id: event.parse_attribute_value("fontId")?.unwrap_or(0),
                indent: 0,
            });
        }
        Event::End(event) if xf_context && event.local_name().as_ref() == TAG_FORMAT_INDEX => xf_context = false,
        Event::Start(event) if xf_context && event.local_name().as_ref() == TAG_ALIGNMENT => {
            if let Some(xf) = xfs.last_mut() {
                xf.indent = event.parse_attribute_value::<u8>("indent")?.unwrap_or(0);
            }
        }
    });

    Ok(excel::resolve_formats(&xfs, &custom_formats, &bold_fonts, is_1904))
}

/// Loads the whole shared string table.
pub(crate) fn load_shared_strings<R: BufRead>(reader: &mut XmlReader<R>) -> Result<Vec<String>, SheetSleuthError> {
    let mut shared_strings = Vec::<String>::new();
    read_shared_strings(reader, &mut shared_strings)?;
    Ok(shared_strings)
}

/// Appends shared string items to `shared_strings`; items read before an error are kept.
pub(crate) fn read_shared_strings<R: BufRead>(reader: &mut XmlReader<R>, shared_strings: &mut Vec<String>) -> Result<(), SheetSleuthError> {
    match_xml_events!(reader => {
        Event::Start(event) if event.local_name().as_ref() == TAG_SHARED_STRING_ITEM => {
            shared_strings.push(reader.read_text(TAG_SHARED_STRING_ITEM, false)?);
        }
    });
    Ok(())
}

/// Workbook-level lookups a worksheet needs.
pub(crate) struct WorksheetContext<'a> {
    pub(crate) shared_strings: &'a [String],
    pub(crate) formats: &'a [CellFormat],
}

/// Streams one worksheet into `builder`. On error, the cells read so far stay in the
/// builder, which lets the salvage reader keep the readable part of a broken sheet.
pub(crate) fn read_worksheet<R: BufRead>(
    reader: &mut XmlReader<R>,
    context: &WorksheetContext,
    builder: &mut SheetBuilder,
    budget: &Budget,
) -> Result<(), SheetSleuthError> {
    let mut row_count = 0usize;
    let mut col_count = 0usize;
    let mut row = 0usize;
    let mut col = 0usize;
    let mut kind = CellType::Empty;
    let mut is_shared_string = false;
    let mut format = CellFormat::default();
    let mut value = String::new();
    match_xml_events!(reader => {
        Event::Start(event) if event.local_name().as_ref() == TAG_ROW => {
            row_count = event.parse_attribute_value::<usize>("r")?
                .filter(|row| *row > 0)
                .map(|row| row - 1)
                .unwrap_or(row_count);
            col_count = 0;
        }
        Event::End(event) if event.local_name().as_ref() == TAG_ROW => {
            row_count += 1;
            budget.check()?;
        }
        Event::Start(event) if event.local_name().as_ref() == TAG_CELL => {
            (row, col) = event.get_attribute_value("r")?
                .and_then(|reference| reference_to_index(&reference))
                .unwrap_or((row_count, col_count));
            col_count = col + 1;
            value.clear();
            format = event.parse_attribute_value::<usize>("s")?
                .and_then(|index| context.formats.get(index).copied())
                .unwrap_or_default();
            let cell_type = event.get_attribute_value("t")?;
            is_shared_string = cell_type.as_deref() == Some("s");
            kind = match cell_type.as_deref() {
                Some("s") | Some("inlineStr") | Some("str") => CellType::Text,
                Some("b") => CellType::Boolean,
                Some("e") => CellType::Error,
                Some("d") => CellType::IsoDateTime,
                _ => format.kind,
            };
        }
        Event::Start(event) if event.local_name().as_ref() == TAG_INLINE_STRING => {
            value = reader.read_text(TAG_INLINE_STRING, false)?;
        }
        Event::Start(event) if event.local_name().as_ref() == TAG_VALUE => {
            value = reader.read_text(TAG_VALUE, true)?;
        }
        Event::End(event) if event.local_name().as_ref() == TAG_CELL => {
            let (cell_kind, cell_value) = if is_shared_string {
                match value.trim().parse::<usize>().ok().and_then(|index| context.shared_strings.get(index)) {
                    Some(string) => (CellType::Text, string.to_owned()),
                    None => (CellType::Empty, String::new()),
                }
            } else {
                (kind, std::mem::take(&mut value))
            };
            if cell_kind != CellType::Empty {
                builder.push(Cell::new(row, col, cell_kind, cell_value).with_style(format.style));
            }
            value.clear();
        }
        Event::Start(event) if event.local_name().as_ref() == TAG_MERGE_CELL => {
            if let Some(reference) = event.get_attribute_value("ref")? {
                if let Ok(range) = CellRange::try_from(reference.as_ref()) {
                    builder.merge(range);
                }
            }
        }
    });
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use std::io::Cursor;
    use std::io::Write;
    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    pub(crate) const CONTENT_TYPES: &str = r#"<?xml version="1.0" encoding="UTF-8"?><Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"/>"#;

    /// Builds an xlsx package with the given worksheets, each as (name, sheetData XML).
    pub(crate) fn xlsx_package(sheets: &[(&str, &str)], shared_strings: &[&str]) -> Vec<u8> {
        let mut workbook = String::from(r#"<workbook xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><workbookPr/><sheets>"#);
        let mut relationships = String::from("<Relationships>");
        for (index, (name, _)) in sheets.iter().enumerate() {
            workbook.push_str(&format!(r#"<sheet name="{name}" sheetId="{id}" r:id="rId{id}"/>"#, id = index + 1));
            relationships.push_str(&format!(
                r#"<Relationship Id="rId{id}" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet{id}.xml"/>"#,
                id = index + 1
            ));
        }
        workbook.push_str("</sheets></workbook>");
        relationships.push_str("</Relationships>");

        let styles = r#"<styleSheet>
            <numFmts count="1"><numFmt numFmtId="164" formatCode="dd/mm/yyyy"/></numFmts>
            <fonts count="2"><font><sz val="11"/></font><font><b/><sz val="11"/></font></fonts>
            <cellXfs count="4">
                <xf numFmtId="0" fontId="0"/>
                <xf numFmtId="0" fontId="1"/>
                <xf numFmtId="164" fontId="0"/>
                <xf numFmtId="0" fontId="0"><alignment indent="2"/></xf>
            </cellXfs>
        </styleSheet>"#;

        let mut strings = String::from("<sst>");
        for string in shared_strings {
            strings.push_str(&format!("<si><t>{string}</t></si>"));
        }
        strings.push_str("</sst>");

        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default();
        let mut parts: Vec<(String, String)> = vec![
            ("[Content_Types].xml".to_owned(), CONTENT_TYPES.to_owned()),
            ("xl/workbook.xml".to_owned(), workbook),
            ("xl/_rels/workbook.xml.rels".to_owned(), relationships),
            ("xl/styles.xml".to_owned(), styles.to_owned()),
            ("xl/sharedStrings.xml".to_owned(), strings),
        ];
        for (index, (_, data)) in sheets.iter().enumerate() {
            parts.push((format!("xl/worksheets/sheet{}.xml", index + 1), format!("<worksheet>{data}</worksheet>")));
        }
        for (name, content) in parts {
            writer.start_file(name, options).unwrap();
            writer.write_all(content.as_bytes()).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn read_cells_styles_and_merges() -> Result<(), SheetSleuthError> {
        let sheet_data = r#"<sheetData>
            <row r="1"><c r="A1" t="s" s="1"><v>0</v></c><c r="B1" t="s" s="1"><v>1</v></c></row>
            <row r="2"><c r="A2" t="inlineStr"><is><t>Acme &amp; Co</t></is></c><c r="B2" s="2"><v>45658</v></c><c r="C2" t="b"><v>1</v></c></row>
            <row r="3"><c r="A3" t="s" s="3"><v>2</v></c><c r="B3"><f>SUM(B2)</f><v>42.5</v></c><c r="C3" t="e"><v>#N/A</v></c></row>
        </sheetData><mergeCells count="1"><mergeCell ref="A4:C4"/></mergeCells>"#;
        let data = xlsx_package(&[("Summary", sheet_data)], &["Name", "Date", "Cash"]);

        let mut spreadsheet = XlsxSpreadsheet::open(&Input::bytes("book.xlsx", data))?;
        assert_eq!(spreadsheet.sheet_names(), vec!["Summary"]);
        let sheet = spreadsheet.read_sheet(0, &Budget::unbounded())?;

        let header = sheet.get(0, 0).unwrap();
        assert_eq!(header.value, "Name");
        assert!(header.style.bold);
        assert_eq!(sheet.get(1, 0).unwrap().value, "Acme & Co");
        assert_eq!(sheet.get(1, 1).unwrap().kind, CellType::NumberDate1900);
        assert_eq!(sheet.get(1, 1).unwrap().to_string(), "2025-01-01");
        assert_eq!(sheet.get(1, 2).unwrap().as_boolean(), Some(true));
        assert_eq!(sheet.get(2, 0).unwrap().style.indent, 2);
        assert_eq!(sheet.get(2, 1).unwrap().as_number(), Some(42.5));
        assert_eq!(sheet.get(2, 2).unwrap().kind, CellType::Error);
        assert_eq!(sheet.merges(), &[CellRange::new(3, 0, 3, 2)]);
        Ok(())
    }

    #[test]
    fn cells_without_references_are_positioned_sequentially() -> Result<(), SheetSleuthError> {
        let sheet_data = r#"<sheetData><row><c t="inlineStr"><is><t>a</t></is></c><c t="inlineStr"><is><t>b</t></is></c></row><row><c><v>1</v></c></row></sheetData>"#;
        let data = xlsx_package(&[("Data", sheet_data)], &[]);
        let workbook = XlsxSpreadsheet::open(&Input::bytes("book.xlsx", data))?
            .read_sheets(&EngineConfig::default(), &Budget::unbounded())?;
        let sheet = &workbook.sheets[0];
        assert_eq!(sheet.get(0, 1).unwrap().value, "b");
        assert_eq!(sheet.get(1, 0).unwrap().value, "1");
        Ok(())
    }

    #[test]
    fn missing_workbook_part_fails() {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        writer.start_file("hello.txt", SimpleFileOptions::default()).unwrap();
        writer.write_all(b"hello").unwrap();
        let data = writer.finish().unwrap().into_inner();
        assert!(XlsxSpreadsheet::open(&Input::bytes("book.xlsx", data)).is_err());
    }

    #[test]
    fn expired_budget_stops_reading() -> Result<(), SheetSleuthError> {
        let data = xlsx_package(&[("Data", "<sheetData><row r=\"1\"><c r=\"A1\"><v>1</v></c></row></sheetData>")], &[]);
        let mut spreadsheet = XlsxSpreadsheet::open(&Input::bytes("book.xlsx", data))?;
        let budget = Budget::new(std::time::Duration::ZERO, tokio_util::sync::CancellationToken::new());
        assert!(matches!(spreadsheet.read_sheet(0, &budget), Err(SheetSleuthError::TimeoutError(_))));
        Ok(())
    }
}
