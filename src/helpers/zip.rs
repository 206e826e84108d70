//! ZIP container access for the OpenXML and OpenDocument readers.

use crate::error::SheetSleuthError;
use crate::helpers::xml::XmlReader;
use std::io::BufReader;
use std::io::Read;
use std::io::Seek;
use zip::read::ZipFile;
use zip::result::ZipError;
use zip::ZipArchive;

/// Lookup helpers over a ZIP archive. Part names inside spreadsheet packages are
/// matched case-insensitively and with either path separator, since producers disagree.
pub(crate) trait ZipHelper<RS: Read + Seek> {
    /// Gets an entry by name, or `None` if the package has no such part.
    fn file(&'_ mut self, name: &str) -> Result<Option<ZipFile<'_, RS>>, SheetSleuthError>;

    /// Opens an entry as a lenient XML reader.
    fn xml_reader(&'_ mut self, name: &str) -> Result<Option<XmlReader<BufReader<ZipFile<'_, RS>>>>, SheetSleuthError>;

    /// Whether the archive contains an entry with this name.
    fn contains(&self, name: &str) -> bool;
}

impl<RS: Read + Seek> ZipHelper<RS> for ZipArchive<RS> {
    fn file(&'_ mut self, name: &str) -> Result<Option<ZipFile<'_, RS>>, SheetSleuthError> {
        let Some(path) = find_entry(self.file_names(), name) else {
            return Ok(None);
        };
        match self.by_name(&path) {
            Ok(file) => Ok(Some(file)),
            Err(ZipError::FileNotFound) => Ok(None),
            Err(error) => Err(error)?,
        }
    }

    fn xml_reader(&'_ mut self, name: &str) -> Result<Option<XmlReader<BufReader<ZipFile<'_, RS>>>>, SheetSleuthError> {
        Ok(self.file(name)?.map(|file| XmlReader::new(BufReader::new(file))))
    }

    fn contains(&self, name: &str) -> bool {
        find_entry(self.file_names(), name).is_some()
    }
}

/// Normalizes a part name: forward slashes, no leading slash.
pub(crate) fn normalize_part_name(name: &str) -> String {
    name.replace('\\', "/").trim_start_matches('/').to_owned()
}

fn find_entry<'a>(mut names: impl Iterator<Item = &'a str>, name: &str) -> Option<String> {
    let pattern = normalize_part_name(name);
    names
        .find(|file_name| normalize_part_name(file_name).eq_ignore_ascii_case(&pattern))
        .map(|file_name| file_name.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::io::Write;
    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    fn archive() -> ZipArchive<Cursor<Vec<u8>>> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        writer.start_file("xl/Workbook.xml", SimpleFileOptions::default()).unwrap();
        writer.write_all(b"<workbook/>").unwrap();
        let cursor = writer.finish().unwrap();
        ZipArchive::new(Cursor::new(cursor.into_inner())).unwrap()
    }

    #[test]
    fn case_and_separator_insensitive_lookup() -> Result<(), SheetSleuthError> {
        let mut archive = archive();
        assert!(archive.contains("xl/workbook.xml"));
        assert!(archive.contains("/xl\\WORKBOOK.xml"));
        assert!(archive.file("xl/styles.xml")?.is_none());

        let mut content = String::new();
        archive.file("XL/workbook.xml")?.unwrap().read_to_string(&mut content)?;
        assert_eq!(content, "<workbook/>");
        Ok(())
    }
}
