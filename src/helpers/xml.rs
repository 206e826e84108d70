//! XML parsing utilities shared by the OpenXML, OpenDocument and salvage readers.
//! Provides a lenient reader wrapper and helper traits for attributes and text content.

use crate::error::SheetSleuthError;
use quick_xml::escape::resolve_xml_entity;
use quick_xml::events::attributes::Attribute;
use quick_xml::events::BytesRef;
use quick_xml::events::BytesStart;
use quick_xml::events::BytesText;
use quick_xml::events::Event;
use quick_xml::Reader;
use std::borrow::Cow;
use std::io::BufRead;
use std::str::FromStr;
use thiserror::Error;

/// Errors specific to XML parsing operations
#[derive(Error, Debug)]
pub enum XmlError {
    #[error("Parse entity '{0}' failed")]
    ParseEntityError(String),

    #[error("Parse attribute value '{0}' failed")]
    ParseAttributeValueError(String),
}

/// XML reader wrapper configured for spreadsheet markup: empty elements are expanded
/// into start/end pairs, mismatched end tags are tolerated, and text is kept untrimmed.
pub(crate) struct XmlReader<R: BufRead> {
    reader: Reader<R>,
    buffer: Vec<u8>,
}

impl<R: BufRead> XmlReader<R> {
    pub(crate) fn new(buf_reader: R) -> XmlReader<R> {
        let mut reader = Reader::from_reader(buf_reader);
        let config = reader.config_mut();
        config.check_comments = false;
        config.check_end_names = false;
        config.expand_empty_elements = true;
        config.trim_text(false);

        XmlReader {
            reader,
            buffer: Vec::with_capacity(1024),
        }
    }

    /// Reads the next XML event, or `None` at end of input.
    pub(crate) fn next(&'_ mut self) -> Result<Option<Event<'_>>, SheetSleuthError> {
        self.buffer.clear();
        match self.reader.read_event_into(&mut self.buffer) {
            Ok(Event::Eof) => Ok(None),
            Ok(event) => Ok(Some(event)),
            Err(error) => Err(SheetSleuthError::XmlError(error)),
        }
    }

    /// Collects the text up to the element closing with local name `end_tag`.
    ///
    /// When `is_text_content` is false, only text inside `<t>` children is kept, and
    /// phonetic runs (`<rPh>`) are skipped, which matches rich-text string items.
    pub(crate) fn read_text(&mut self, end_tag: &[u8], is_text_content: bool) -> Result<String, SheetSleuthError> {
        let mut is_phonetic_text = false;
        let mut is_text = is_text_content;
        let mut text = String::new();
        while let Some(event) = self.next()? {
            match event {
                Event::End(event) if event.local_name().as_ref() == end_tag => break,
                Event::Start(event) if event.local_name().as_ref() == b"rPh" => is_phonetic_text = true,
                Event::End(event) if event.local_name().as_ref() == b"rPh" => is_phonetic_text = false,
                Event::Start(event) if !is_phonetic_text && event.local_name().as_ref() == b"t" => is_text = true,
                Event::End(event) if is_text && event.local_name().as_ref() == b"t" => is_text = is_text_content,
                Event::Text(event) if is_text => text.push_bytes_text(&event)?,
                Event::CData(event) if is_text => text.push_str(&event.xml_content()?),
                Event::GeneralRef(event) if is_text => text.push_bytes_ref(&event)?,
                _ => (),
            }
        }
        Ok(text)
    }
}

/// Helper trait for XML attributes providing convenient value extraction and parsing
pub(crate) trait XmlAttributeHelper<'a> {
    /// Gets the unescaped attribute value as a string
    fn get_value(&self) -> Result<Cow<'a, str>, SheetSleuthError>;

    /// Parses the attribute value to the specified type
    fn parse_value<T: FromStr>(&self) -> Result<T, SheetSleuthError>;
}

impl<'a> XmlAttributeHelper<'a> for Attribute<'a> {
    fn get_value(&self) -> Result<Cow<'a, str>, SheetSleuthError> {
        Ok(self.unescape_value()?)
    }

    fn parse_value<T: FromStr>(&self) -> Result<T, SheetSleuthError> {
        let value = self.get_value()?;
        value
            .trim()
            .parse()
            .map_err(|_| XmlError::ParseAttributeValueError(value.to_string()).into())
    }
}

/// Helper trait for XML nodes providing attribute access methods
pub(crate) trait XmlNodeHelper<'a> {
    /// Gets an attribute value by name
    fn get_attribute_value(&'a self, name: &str) -> Result<Option<Cow<'a, str>>, SheetSleuthError>;

    /// Parses an attribute value to the specified type
    fn parse_attribute_value<T: FromStr>(&self, name: &str) -> Result<Option<T>, SheetSleuthError>;

    /// Reads a boolean flag attribute; a missing `val` on a flag element means true.
    fn flag_attribute(&'a self, name: &str) -> Result<bool, SheetSleuthError>;
}

impl<'a> XmlNodeHelper<'a> for BytesStart<'a> {
    fn get_attribute_value(&'a self, name: &str) -> Result<Option<Cow<'a, str>>, SheetSleuthError> {
        self.try_get_attribute(name)?
            .map(|attribute| attribute.get_value())
            .transpose()
    }

    fn parse_attribute_value<T: FromStr>(&self, name: &str) -> Result<Option<T>, SheetSleuthError> {
        self.try_get_attribute(name)?
            .map(|attribute| attribute.parse_value())
            .transpose()
    }

    fn flag_attribute(&'a self, name: &str) -> Result<bool, SheetSleuthError> {
        Ok(self
            .get_attribute_value(name)?
            .map(|value| !matches!(value.as_ref(), "0" | "false" | "off"))
            .unwrap_or(true))
    }
}

/// Helper trait for building text content from XML events
pub(crate) trait XmlTextContextHelper {
    /// Appends text content from BytesText event
    fn push_bytes_text(&mut self, text: &BytesText) -> Result<(), SheetSleuthError>;

    /// Appends text content from BytesRef event (handles entities and character references)
    fn push_bytes_ref(&mut self, bytes: &BytesRef) -> Result<(), SheetSleuthError>;
}

impl XmlTextContextHelper for String {
    fn push_bytes_text(&mut self, text: &BytesText) -> Result<(), SheetSleuthError> {
        self.push_str(&text.xml_content()?);
        Ok(())
    }

    fn push_bytes_ref(&mut self, bytes: &BytesRef) -> Result<(), SheetSleuthError> {
        let raw = bytes.xml_content()?;
        if let Some(number) = raw.strip_prefix('#') {
            let code = if let Some(hex) = number.strip_prefix('x').or_else(|| number.strip_prefix('X')) {
                u32::from_str_radix(hex, 16)?
            } else {
                number.parse::<u32>()?
            };
            if let Some(character) = std::char::from_u32(code) {
                self.push(character);
            }
        } else if let Some(entity) = resolve_xml_entity(&raw) {
            self.push_str(entity);
        } else {
            Err(XmlError::ParseEntityError(raw.to_string()))?;
        }

        Ok(())
    }
}

#[macro_export]
macro_rules! match_xml_events {
    ($reader:expr => { $($arms:tt)* }) => {
        while let Some(result) = $reader.next()? {
            match result {
                Event::Eof => break,
                $($arms)*
                _ => (),
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use quick_xml::name::QName;

    #[test]
    fn read_rich_text_skips_phonetic_runs() -> Result<(), SheetSleuthError> {
        let xml = r#"<si><r><t>ABC </t></r><r><t>Corp &amp; Co</t></r><rPh><t>ignored</t></rPh></si>"#;
        let mut reader = XmlReader::new(xml.as_bytes());
        let mut text = String::new();
        match_xml_events!(reader => {
            Event::Start(event) if event.name() == QName(b"si") => {
                text = reader.read_text(b"si", false)?;
            }
        });
        assert_eq!(text, "ABC Corp & Co");
        Ok(())
    }

    #[test]
    fn character_references() -> Result<(), SheetSleuthError> {
        let xml = "<v>&#65;&#x42;&lt;</v>";
        let mut reader = XmlReader::new(xml.as_bytes());
        let mut text = String::new();
        match_xml_events!(reader => {
            Event::Start(event) if event.name() == QName(b"v") => {
                text = reader.read_text(b"v", true)?;
            }
        });
        assert_eq!(text, "AB<");
        Ok(())
    }

    #[test]
    fn flag_attributes() -> Result<(), SheetSleuthError> {
        let xml = r#"<font><b/><i val="0"/></font>"#;
        let mut reader = XmlReader::new(xml.as_bytes());
        let mut flags = Vec::new();
        match_xml_events!(reader => {
            Event::Start(event) if event.name() == QName(b"b") || event.name() == QName(b"i") => {
                flags.push(event.flag_attribute("val")?);
            }
        });
        assert_eq!(flags, vec![true, false]);
        Ok(())
    }
}
