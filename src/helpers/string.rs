//! Byte and text conversion utilities.
//! Little-endian readers for binary containers, and whitespace helpers shared by the
//! readers and the inference passes.

/// Converts a byte slice into an iterator of little-endian u32 values widened to usize.
/// A trailing partial chunk is ignored.
pub(crate) fn to_usize_iter(bytes: &[u8]) -> impl Iterator<Item = usize> + '_ {
    bytes
        .chunks_exact(4)
        .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]) as usize)
}

/// Reads a little-endian u16 at `offset`, if the slice is long enough.
#[inline]
pub(crate) fn get_u16(bytes: &[u8], offset: usize) -> Option<u16> {
    let chunk = bytes.get(offset..offset + 2)?;
    Some(u16::from_le_bytes([chunk[0], chunk[1]]))
}

/// Reads a little-endian u32 at `offset`, if the slice is long enough.
#[inline]
pub(crate) fn get_u32(bytes: &[u8], offset: usize) -> Option<u32> {
    let chunk = bytes.get(offset..offset + 4)?;
    Some(u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
}

/// Reads a little-endian u32 at `offset` widened to usize.
#[inline]
pub(crate) fn get_usize(bytes: &[u8], offset: usize) -> Option<usize> {
    get_u32(bytes, offset).map(|value| value as usize)
}

/// Reads a little-endian u64 at `offset`.
#[inline]
pub(crate) fn get_u64(bytes: &[u8], offset: usize) -> Option<u64> {
    let chunk: [u8; 8] = bytes.get(offset..offset + 8)?.try_into().ok()?;
    Some(u64::from_le_bytes(chunk))
}

/// Reads a little-endian f64 at `offset`.
#[inline]
pub(crate) fn get_f64(bytes: &[u8], offset: usize) -> Option<f64> {
    get_u64(bytes, offset).map(f64::from_bits)
}

/// Trims the text and collapses every internal whitespace run into a single space.
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Counts leading whitespace as indentation units: two spaces, one tab or one
/// non-breaking/ideographic space pair make one level.
pub(crate) fn leading_indent(text: &str) -> usize {
    let mut width = 0usize;
    for character in text.chars() {
        match character {
            ' ' | '\u{00A0}' => width += 1,
            '\u{3000}' => width += 2,
            '\t' => width += 2,
            _ => break,
        }
    }
    width / 2
}

/// Truncates text to at most `limit` characters, appending an ellipsis when shortened.
pub(crate) fn truncate_chars(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        text.to_owned()
    } else {
        let mut truncated: String = text.chars().take(limit.saturating_sub(1)).collect();
        truncated.push('…');
        truncated
    }
}
