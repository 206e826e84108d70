//! Best-effort recovery of damaged OpenXML packages.
//!
//! Local ZIP entries are streamed front to back without the central directory, so a
//! truncated or corrupted archive still yields the entries before the damage. Workbook,
//! styles and shared strings are parsed leniently, and a worksheet whose XML breaks
//! mid-way keeps the rows read before the break.

use crate::config::EngineConfig;
use crate::error::SheetSleuthError;
use crate::helpers::budget::Budget;
use crate::helpers::reader::Input;
use crate::helpers::xml::XmlReader;
use crate::helpers::zip::normalize_part_name;
use crate::spreadsheet::excel;
use crate::spreadsheet::sheet::SheetBuilder;
use crate::spreadsheet::xlsx;
use crate::spreadsheet::xlsx::WorksheetContext;
use crate::spreadsheet::SheetFailure;
use crate::spreadsheet::SpreadsheetError;
use crate::spreadsheet::Workbook;
use std::io::Read;
use tracing::debug;
use tracing::warn;
use zip::read::read_zipfile_from_stream;

/// One local entry recovered from the stream.
struct Entry {
    name: String,
    data: Vec<u8>,
    complete: bool,
}

/// Recovers what it can from a damaged OpenXML package.
pub(crate) fn salvage(input: &Input, config: &EngineConfig, budget: &Budget) -> Result<Workbook, SheetSleuthError> {
    let source = input.identity();
    let entries = read_entries(input, budget)?;
    let find = |name: &str| entries.iter().find(|entry| entry.name.eq_ignore_ascii_case(name));

    let relationships = find("xl/_rels/workbook.xml.rels")
        .and_then(|entry| excel::load_relationships(&mut XmlReader::new(entry.data.as_slice())).ok())
        .unwrap_or_default();
    let (mut sheets, is_1904) = find("xl/workbook.xml")
        .and_then(|entry| xlsx::load_workbook(&mut XmlReader::new(entry.data.as_slice()), &relationships).ok())
        .unwrap_or_default();
    if sheets.is_empty() {
        // Without a readable workbook part, every worksheet entry becomes a sheet
        let mut paths: Vec<&str> = entries
            .iter()
            .map(|entry| entry.name.as_str())
            .filter(|name| name.starts_with("xl/worksheets/") && name.ends_with(".xml"))
            .collect();
        paths.sort_by_key(|path| sheet_number(path));
        sheets = paths
            .into_iter()
            .enumerate()
            .map(|(index, path)| (format!("Sheet{}", index + 1), path.to_owned()))
            .collect();
    }
    if sheets.is_empty() {
        Err(SpreadsheetError::EmptyWorkbookError(source.to_owned()))?
    }

    let formats = find("xl/styles.xml")
        .and_then(|entry| xlsx::load_styles(&mut XmlReader::new(entry.data.as_slice()), is_1904).ok())
        .unwrap_or_default();
    let mut shared_strings = Vec::new();
    if let Some(entry) = find("xl/sharedStrings.xml") {
        if let Err(error) = xlsx::read_shared_strings(&mut XmlReader::new(entry.data.as_slice()), &mut shared_strings) {
            debug!(file = %source, %error, recovered = shared_strings.len(), "Shared strings truncated");
        }
    }
    let context = WorksheetContext {
        shared_strings: &shared_strings,
        formats: &formats,
    };

    let mut workbook = Workbook::default();
    for (sheet_name, path) in sheets {
        if !config.accepts_sheet(&sheet_name) {
            continue;
        }
        budget.check()?;
        let Some(entry) = find(&path) else {
            workbook.failures.push(SheetFailure {
                sheet: sheet_name,
                reason: format!("Worksheet part '{path}' not recoverable"),
            });
            continue;
        };

        let mut builder = SheetBuilder::new(&source, &sheet_name);
        let result = xlsx::read_worksheet(&mut XmlReader::new(entry.data.as_slice()), &context, &mut builder, budget);
        let is_broken = match result {
            Ok(()) => !entry.complete,
            Err(error) if error.is_file_fatal() => return Err(error),
            Err(_) => true,
        };
        let sheet = builder.finish();
        if is_broken {
            let rows = sheet.bounds().map(|bounds| bounds.bottom + 1).unwrap_or(0);
            warn!(file = %source, sheet = %sheet_name, rows, "Worksheet recovered in part");
            workbook.failures.push(SheetFailure {
                sheet: sheet_name,
                reason: format!("XML broken after row {rows}"),
            });
        }
        if !sheet.is_empty() {
            workbook.sheets.push(sheet);
        }
    }

    if workbook.sheets.is_empty() {
        let reasons: Vec<String> = workbook.failures.iter().map(|failure| failure.reason.to_owned()).collect();
        Err(SheetSleuthError::WithContextError(format!("Nothing salvageable: {}", reasons.join("; "))))?
    }
    Ok(workbook)
}

/// Streams local entries until the central directory, the end of input, or the first damaged entry.
fn read_entries(input: &Input, budget: &Budget) -> Result<Vec<Entry>, SheetSleuthError> {
    let mut reader = input.open()?;
    let mut entries = Vec::<Entry>::new();
    loop {
        budget.check()?;
        let mut file = match read_zipfile_from_stream(&mut reader) {
            Ok(Some(file)) => file,
            Ok(None) => break,
            Err(error) => {
                debug!(file = %input.identity(), %error, entries = entries.len(), "Stopped reading local entries");
                break;
            }
        };
        let name = normalize_part_name(file.name());
        let declared = file.size();
        let mut data = Vec::new();
        // Bytes read before an error are kept in `data`
        let result = file.read_to_end(&mut data);
        let complete = result.is_ok() && data.len() as u64 == declared;
        entries.push(Entry { name, data, complete });
        if !complete {
            break;
        }
    }
    Ok(entries)
}

fn sheet_number(path: &str) -> usize {
    path.trim_end_matches(".xml")
        .rsplit(|character: char| !character.is_ascii_digit())
        .next()
        .and_then(|digits| digits.parse().ok())
        .unwrap_or(usize::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spreadsheet::xlsx::tests::CONTENT_TYPES;
    use std::io::Cursor;
    use std::io::Write;
    use zip::write::SimpleFileOptions;
    use zip::CompressionMethod;
    use zip::ZipWriter;

    fn stored_package(parts: &[(&str, String)]) -> Vec<u8> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
        for (name, content) in parts {
            writer.start_file(*name, options).unwrap();
            writer.write_all(content.as_bytes()).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    fn rows(count: usize) -> String {
        let mut data = String::from("<worksheet><sheetData>");
        for row in 1..=count {
            data.push_str(&format!(r#"<row r="{row}"><c r="A{row}" t="inlineStr"><is><t>Item {row}</t></is></c><c r="B{row}"><v>{row}</v></c></row>"#));
        }
        data.push_str("</sheetData></worksheet>");
        data
    }

    fn package() -> Vec<u8> {
        let workbook = r#"<workbook><sheets><sheet name="Intact" sheetId="1" r:id="rId1"/><sheet name="Damaged" sheetId="2" r:id="rId2"/></sheets></workbook>"#;
        let relationships = r#"<Relationships>
            <Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet1.xml"/>
            <Relationship Id="rId2" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet2.xml"/>
        </Relationships>"#;
        stored_package(&[
            ("[Content_Types].xml", CONTENT_TYPES.to_owned()),
            ("xl/workbook.xml", workbook.to_owned()),
            ("xl/_rels/workbook.xml.rels", relationships.to_owned()),
            ("xl/worksheets/sheet1.xml", rows(5)),
            ("xl/worksheets/sheet2.xml", rows(200)),
        ])
    }

    #[test]
    fn truncated_package_keeps_rows_before_the_break() -> Result<(), SheetSleuthError> {
        let data = package();
        let marker = br#"<row r="100""#;
        let cut = data.windows(marker.len()).position(|window| window == marker).unwrap() + 5;
        let input = Input::bytes("broken.xlsx", data[..cut].to_vec());

        let workbook = salvage(&input, &EngineConfig::default(), &Budget::unbounded())?;
        assert_eq!(workbook.sheets.len(), 2);
        assert_eq!(workbook.sheets[0].name, "Intact");
        assert_eq!(workbook.sheets[0].len(), 10);
        let damaged = &workbook.sheets[1];
        assert_eq!(damaged.bounds().map(|bounds| bounds.bottom), Some(98));
        assert_eq!(workbook.failures.len(), 1);
        assert_eq!(workbook.failures[0].sheet, "Damaged");
        assert_eq!(workbook.failures[0].reason, "XML broken after row 99");
        Ok(())
    }

    #[test]
    fn worksheets_without_workbook_part() -> Result<(), SheetSleuthError> {
        let data = stored_package(&[
            ("xl/worksheets/sheet10.xml", rows(1)),
            ("xl/worksheets/sheet2.xml", rows(2)),
        ]);
        let workbook = salvage(&Input::bytes("orphan.xlsx", data), &EngineConfig::default(), &Budget::unbounded())?;
        let names: Vec<&str> = workbook.sheets.iter().map(|sheet| sheet.name.as_str()).collect();
        assert_eq!(names, vec!["Sheet1", "Sheet2"]);
        assert_eq!(workbook.sheets[0].len(), 4);
        Ok(())
    }

    #[test]
    fn nothing_recoverable() {
        let input = Input::bytes("noise.xlsx", b"PK\x03\x04garbage".to_vec());
        assert!(salvage(&input, &EngineConfig::default(), &Budget::unbounded()).is_err());
    }

    #[test]
    fn sheet_numbers_sort_numerically() {
        assert_eq!(sheet_number("xl/worksheets/sheet12.xml"), 12);
        assert_eq!(sheet_number("xl/worksheets/data.xml"), usize::MAX);
    }
}
