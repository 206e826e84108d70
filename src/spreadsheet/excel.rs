//! Helpers shared by the Excel readers (OpenXML, BIFF8 and salvage).

use crate::error::SheetSleuthError;
use crate::helpers::xml::XmlNodeHelper;
use crate::helpers::xml::XmlReader;
use crate::match_xml_events;
use crate::spreadsheet::cell::CellStyle;
use crate::spreadsheet::cell::CellType;
use quick_xml::events::Event;
use std::collections::HashMap;
use std::io::BufRead;

/// XML tag name for relationship elements in Excel files
const TAG_RELATIONSHIP: &[u8] = b"Relationship";

/// Native kind and style hints resolved for one cell format (XF) index.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub(crate) struct CellFormat {
    pub(crate) kind: CellType,
    pub(crate) style: CellStyle,
}

/// One raw XF record before number formats and fonts are resolved.
#[derive(Clone, Debug, Default)]
pub(crate) struct XfEntry {
    pub(crate) format_id: String,
    pub(crate) font_id: usize,
    pub(crate) indent: u8,
}

/// Resolves XF entries against custom number formats and bold fonts.
///
/// # Arguments
/// * `xfs` - Cell format records in workbook order
/// * `custom_formats` - Custom number formats keyed by format id
/// * `bold_fonts` - Bold flag per font index
/// * `is_1904` - Whether the workbook uses the 1904 date system
///
/// # Returns
/// One [`CellFormat`] per XF index
pub(crate) fn resolve_formats(
    xfs: &[XfEntry],
    custom_formats: &HashMap<String, CellType>,
    bold_fonts: &[bool],
    is_1904: bool,
) -> Vec<CellFormat> {
    xfs.iter()
        .map(|xf| CellFormat {
            kind: custom_formats
                .get(&xf.format_id)
                .copied()
                .or_else(|| CellType::parse_builtin_number_format_id(&xf.format_id, is_1904))
                .unwrap_or(CellType::Number),
            style: CellStyle {
                bold: bold_fonts.get(xf.font_id).copied().unwrap_or(false),
                indent: xf.indent,
            },
        })
        .collect()
}

/// Reads worksheet relationships (id → package path) from a `.rels` part.
pub(crate) fn load_relationships<R: BufRead>(reader: &mut XmlReader<R>) -> Result<HashMap<String, String>, SheetSleuthError> {
    let mut relationships: HashMap<String, String> = HashMap::new();
    match_xml_events!(reader => {
        Event::Start(event) if event.local_name().as_ref() == TAG_RELATIONSHIP => {
            let id = event.get_attribute_value("Id")?;
            let kind = event.get_attribute_value("Type")?;
            let target = event.get_attribute_value("Target")?;
            if kind.map(|it| it.ends_with("/worksheet")).unwrap_or(true) {
                if let Some((id, target)) = id.zip(target) {
                    relationships.insert(id.to_string(), to_zip_path(&target));
                }
            }
        }
    });
    Ok(relationships)
}

/// Normalizes a relationship target to a package path under `xl/`.
pub(crate) fn to_zip_path(path: &str) -> String {
    let path = path.replace('\\', "/");
    if let Some(stripped) = path.strip_prefix('/') {
        stripped.to_owned()
    } else if path.starts_with("xl/") {
        path
    } else if let Some(stripped) = path.strip_prefix("../") {
        stripped.to_owned()
    } else {
        format!("xl/{path}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zip_paths() {
        assert_eq!(to_zip_path("worksheets/sheet1.xml"), "xl/worksheets/sheet1.xml");
        assert_eq!(to_zip_path("/xl/worksheets/sheet1.xml"), "xl/worksheets/sheet1.xml");
        assert_eq!(to_zip_path("xl/worksheets/sheet1.xml"), "xl/worksheets/sheet1.xml");
    }

    #[test]
    fn formats_resolve_dates_and_bold() {
        let xfs = vec![
            XfEntry { format_id: "0".to_owned(), font_id: 0, indent: 0 },
            XfEntry { format_id: "14".to_owned(), font_id: 1, indent: 0 },
            XfEntry { format_id: "164".to_owned(), font_id: 0, indent: 2 },
        ];
        let custom = HashMap::from([("164".to_owned(), CellType::NumberDateTime1900)]);
        let formats = resolve_formats(&xfs, &custom, &[false, true], false);
        assert_eq!(formats[0].kind, CellType::Number);
        assert_eq!(formats[1].kind, CellType::NumberDate1900);
        assert!(formats[1].style.bold);
        assert_eq!(formats[2].kind, CellType::NumberDateTime1900);
        assert_eq!(formats[2].style.indent, 2);
    }

    #[test]
    fn relationships_keep_worksheets() -> Result<(), SheetSleuthError> {
        let xml = r#"<Relationships>
            <Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet1.xml"/>
            <Relationship Id="rId2" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/styles" Target="styles.xml"/>
        </Relationships>"#;
        let relationships = load_relationships(&mut XmlReader::new(xml.as_bytes()))?;
        assert_eq!(relationships.len(), 1);
        assert_eq!(relationships["rId1"], "xl/worksheets/sheet1.xml");
        Ok(())
    }
}
