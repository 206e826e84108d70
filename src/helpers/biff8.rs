//! Record reader for the BIFF8 stream inside legacy `.xls` workbooks.
//! Records may be split by CONTINUE records; the reader stitches them together
//! transparently so callers read a record as one logical byte sequence.

use crate::error::SheetSleuthError;
use crate::helpers::string::get_f64;
use crate::helpers::string::get_u16;
use crate::helpers::string::get_u32;
use crate::helpers::string::get_u64;
use encoding_rs::Encoding;
use thiserror::Error;

const CONTINUE: u16 = 60;

#[derive(Error, Debug)]
pub enum Biff8Error {
    #[error("Fewer than {0} bytes remaining in record")]
    NoEnoughDataError(usize),
}

/// Cursor over BIFF8 records. `next` positions the reader on a record and the
/// `read_*` methods consume its payload, crossing CONTINUE boundaries as needed.
pub(crate) struct Biff8Reader {
    /// Code page for 8-bit strings, updated from the CODEPAGE record.
    pub(crate) encoding: &'static Encoding,
    buffer: Vec<u8>,
    pointer: usize,
    chunks: Vec<(usize, usize)>,
    index: usize,
    offset: usize,
}

impl Biff8Reader {
    pub(crate) fn new(data: Vec<u8>) -> Biff8Reader {
        Biff8Reader {
            encoding: encoding_rs::WINDOWS_1252,
            buffer: data,
            pointer: 0,
            chunks: Vec::new(),
            index: 0,
            offset: 0,
        }
    }

    /// Advances to the next record and returns its type, or `None` at end of stream.
    pub(crate) fn next(&mut self) -> Result<Option<u16>, SheetSleuthError> {
        let Some(kind) = self.header_at(self.pointer) else {
            return Ok(None);
        };
        self.index = 0;
        self.offset = 0;
        self.chunks.clear();

        let (kind, size) = kind;
        self.push_chunk(size);
        while let Some((CONTINUE, size)) = self.header_at(self.pointer) {
            self.push_chunk(size);
        }
        Ok(Some(kind))
    }

    /// Moves to an absolute stream offset, such as a BOUNDSHEET position.
    pub(crate) fn goto(&mut self, pointer: usize) {
        self.pointer = pointer;
        self.chunks.clear();
    }

    /// Bytes left in the current record.
    pub(crate) fn remaining(&self) -> usize {
        self.chunks
            .iter()
            .skip(self.index)
            .map(|(lower, upper)| upper - lower)
            .sum::<usize>()
            .saturating_sub(self.offset)
    }

    fn header_at(&self, pointer: usize) -> Option<(u16, usize)> {
        let kind = get_u16(&self.buffer, pointer)?;
        let size = get_u16(&self.buffer, pointer + 2)? as usize;
        Some((kind, size))
    }

    fn push_chunk(&mut self, size: usize) {
        let lower = (self.pointer + 4).min(self.buffer.len());
        let upper = (lower + size).min(self.buffer.len());
        self.pointer = lower + size;
        self.chunks.push((lower, upper));
    }

    /// Reads up to `length` bytes without crossing into the next chunk.
    fn read(&mut self, length: usize) -> &[u8] {
        while let Some((lower, upper)) = self.chunks.get(self.index).copied() {
            let source = lower + self.offset;
            if source >= upper {
                self.index += 1;
                self.offset = 0;
                continue;
            }
            let target = upper.min(source + length);
            if target == upper {
                self.index += 1;
                self.offset = 0;
            } else {
                self.offset += target - source;
            }
            return &self.buffer[source..target];
        }
        &[]
    }

    /// Reads exactly `length` bytes, joining chunks when a value straddles a boundary.
    fn read_exact(&mut self, length: usize) -> Result<Vec<u8>, SheetSleuthError> {
        let mut bytes = Vec::with_capacity(length);
        while bytes.len() < length {
            let data = self.read(length - bytes.len());
            if data.is_empty() {
                Err(Biff8Error::NoEnoughDataError(length))?;
            }
            bytes.extend_from_slice(data);
        }
        Ok(bytes)
    }

    pub(crate) fn skip(&mut self, length: usize) -> Result<(), SheetSleuthError> {
        let mut skipped = 0usize;
        while skipped < length {
            let size = self.read(length - skipped).len();
            if size == 0 {
                Err(Biff8Error::NoEnoughDataError(length))?;
            }
            skipped += size;
        }
        Ok(())
    }

    pub(crate) fn read_u8(&mut self) -> Result<u8, SheetSleuthError> {
        Ok(self.read_exact(1)?[0])
    }

    pub(crate) fn read_u16(&mut self) -> Result<u16, SheetSleuthError> {
        get_u16(&self.read_exact(2)?, 0).ok_or_else(|| Biff8Error::NoEnoughDataError(2).into())
    }

    pub(crate) fn read_u32(&mut self) -> Result<u32, SheetSleuthError> {
        get_u32(&self.read_exact(4)?, 0).ok_or_else(|| Biff8Error::NoEnoughDataError(4).into())
    }

    pub(crate) fn read_u64(&mut self) -> Result<u64, SheetSleuthError> {
        get_u64(&self.read_exact(8)?, 0).ok_or_else(|| Biff8Error::NoEnoughDataError(8).into())
    }

    pub(crate) fn read_f64(&mut self) -> Result<f64, SheetSleuthError> {
        get_f64(&self.read_exact(8)?, 0).ok_or_else(|| Biff8Error::NoEnoughDataError(8).into())
    }

    /// Decodes an RK value: a 30-bit integer or truncated double, optionally divided by 100.
    pub(crate) fn read_rk_number(&mut self) -> Result<f64, SheetSleuthError> {
        Ok(decode_rk(self.read_u32()?))
    }

    /// ShortXLUnicodeString: one-byte character count.
    pub(crate) fn read_short_xl_unicode_string(&mut self) -> Result<String, SheetSleuthError> {
        let chars = self.read_u8()? as usize;
        let mut string = String::new();
        self.read_string_into(chars, false, &mut string)?;
        Ok(string)
    }

    /// XLUnicodeString: two-byte character count.
    pub(crate) fn read_xl_unicode_string(&mut self) -> Result<String, SheetSleuthError> {
        let chars = self.read_u16()? as usize;
        let mut string = String::new();
        self.read_string_into(chars, false, &mut string)?;
        Ok(string)
    }

    /// XLUnicodeRichExtendedString as stored in the shared string table. When the
    /// characters run past a CONTINUE boundary, the continuation restates the
    /// high-byte flag, so the remainder is read as a fresh segment.
    pub(crate) fn read_xl_unicode_rich_extended_string(&mut self) -> Result<String, SheetSleuthError> {
        let mut expected = self.read_u16()? as usize;
        let mut string = String::new();
        let (mut actual, mut trailing) = self.read_segment(expected, true, &mut string)?;
        while actual < expected {
            expected -= actual;
            let (count, _) = self.read_segment(expected, false, &mut string)?;
            if count == 0 {
                Err(Biff8Error::NoEnoughDataError(expected))?;
            }
            actual = count;
        }
        while trailing > 0 {
            let size = self.read(trailing).len();
            if size == 0 {
                break;
            }
            trailing -= size;
        }
        Ok(string)
    }

    fn read_string_into(&mut self, chars: usize, is_extended: bool, content: &mut String) -> Result<(), SheetSleuthError> {
        let (_, trailing) = self.read_segment(chars, is_extended, content)?;
        self.skip(trailing)
    }

    /// Reads one string segment from the current chunk. Returns the characters read
    /// and the number of trailing formatting bytes (runs and phonetic data) to skip.
    fn read_segment(&mut self, chars: usize, is_extended: bool, content: &mut String) -> Result<(usize, usize), SheetSleuthError> {
        let flag = self.read_u8()?;
        let is_high_byte = flag & 0x01 != 0;
        let runs = if is_extended && flag & 0x08 != 0 {
            self.read_u16()? as usize
        } else {
            0
        };
        let phonetic = if is_extended && flag & 0x04 != 0 {
            self.read_u32()? as usize
        } else {
            0
        };

        let expected = if is_high_byte { chars * 2 } else { chars };
        let bytes = self.read(expected).to_vec();
        if is_high_byte {
            let (string, _, _) = encoding_rs::UTF_16LE.decode(&bytes);
            content.push_str(&string);
        } else {
            content.push_str(&self.decode(&bytes));
        }
        let actual = if is_high_byte { bytes.len() / 2 } else { bytes.len() };
        Ok((actual, runs * 4 + phonetic))
    }

    /// Decodes an 8-bit string with the workbook code page.
    pub(crate) fn decode(&self, bytes: &[u8]) -> String {
        let (string, _, _) = self.encoding.decode(bytes);
        string.into_owned()
    }
}

pub(crate) fn decode_rk(value: u32) -> f64 {
    let is_percentage = value & 0x01 != 0;
    let is_integer = value & 0x02 != 0;
    let number = if is_integer {
        ((value as i32) >> 2) as f64
    } else {
        f64::from_bits(((value & 0xFFFF_FFFC) as u64) << 32)
    };
    if is_percentage {
        number / 100.0
    } else {
        number
    }
}

#[macro_export]
macro_rules! match_biff8_record {
    ($reader:expr => { $($arms:tt)* }) => {
        while let Some(kind) = $reader.next()? {
            match kind {
                $($arms)*
                _ => (),
            }
        }
    };
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Serializes one record: type, length and payload.
    pub(crate) fn record(kind: u16, payload: &[u8]) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(payload.len() + 4);
        bytes.extend_from_slice(&kind.to_le_bytes());
        bytes.extend_from_slice(&(payload.len() as u16).to_le_bytes());
        bytes.extend_from_slice(payload);
        bytes
    }

    #[test]
    fn records_and_continuations() -> Result<(), SheetSleuthError> {
        let mut stream = record(0x0809, &[0x00, 0x06, 0x10, 0x00]);
        stream.extend(record(0x00FC, &[0x02, 0x00, 0x00, 0x00, 0x01, 0x00]));
        stream.extend(record(CONTINUE, &[0x02, 0x00, 0x00, 0x41]));
        stream.extend(record(CONTINUE, &[0x00, 0x42, 0x43]));

        let mut reader = Biff8Reader::new(stream);
        assert_eq!(reader.next()?, Some(0x0809));
        assert_eq!(reader.read_u16()?, 0x0600);
        assert_eq!(reader.next()?, Some(0x00FC));
        assert_eq!(reader.remaining(), 13);
        assert_eq!(reader.read_u32()?, 2);
        assert_eq!(reader.read_u8()?, 1);
        // A value straddling a CONTINUE boundary is joined
        assert_eq!(reader.read_u32()?, 0x0000_0200);
        assert_eq!(reader.read_u8()?, 0x41);
        assert_eq!(reader.read_u8()?, 0x00);
        assert_eq!(reader.remaining(), 2);
        assert_eq!(reader.next()?, None);
        Ok(())
    }

    #[test]
    fn shared_string_split_across_continue() -> Result<(), SheetSleuthError> {
        // "Revenue" split after "Rev"; the continuation switches to UTF-16
        let mut first = vec![7, 0, 0];
        first.extend_from_slice(b"Rev");
        let mut second = vec![1];
        for unit in "enue".encode_utf16() {
            second.extend_from_slice(&unit.to_le_bytes());
        }
        let mut stream = record(0x00FC, &first);
        stream.extend(record(CONTINUE, &second));

        let mut reader = Biff8Reader::new(stream);
        reader.next()?;
        assert_eq!(reader.read_xl_unicode_rich_extended_string()?, "Revenue");
        Ok(())
    }

    #[test]
    fn short_reads_fail() -> Result<(), SheetSleuthError> {
        let mut reader = Biff8Reader::new(record(0x0203, &[1, 2, 3]));
        reader.next()?;
        assert!(matches!(
            reader.read_u32(),
            Err(SheetSleuthError::Biff8HelperError(Biff8Error::NoEnoughDataError(4)))
        ));
        Ok(())
    }

    #[test]
    fn rk_numbers() {
        assert_eq!(decode_rk((42 << 2) | 0x02), 42.0);
        assert_eq!(decode_rk((1234 << 2) | 0x03), 12.34);
        let bits = (1.5f64.to_bits() >> 32) as u32;
        assert_eq!(decode_rk(bits), 1.5);
    }
}
