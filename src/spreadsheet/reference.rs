//! Conversions between A1-style references and 0-based (row, col) indexes.

/// Converts a 0-based column index to letters: 0 → "A", 27 → "AB".
pub fn index_to_col(col: usize) -> String {
    let mut letters = Vec::new();
    let mut index = col + 1;
    while index > 0 {
        let remainder = (index - 1) % 26;
        letters.push(b'A' + remainder as u8);
        index = (index - 1) / 26;
    }
    letters.reverse();
    String::from_utf8_lossy(&letters).into_owned()
}

/// Converts 0-based indexes to a cell reference: (4, 1) → "B5".
pub fn index_to_reference(row: usize, col: usize) -> String {
    format!("{}{}", index_to_col(col), row + 1)
}

/// Converts column letters to a 0-based index. Returns `None` for empty or non-letter input.
pub fn col_to_index(letters: &str) -> Option<usize> {
    if letters.is_empty() || letters.len() > 3 {
        return None;
    }
    letters.bytes().try_fold(0usize, |index, byte| {
        let byte = byte.to_ascii_uppercase();
        byte.is_ascii_uppercase()
            .then(|| index * 26 + (byte - b'A' + 1) as usize)
    })
    .map(|index| index - 1)
}

/// Converts a 1-based row number to a 0-based index.
pub fn row_to_index(digits: &str) -> Option<usize> {
    digits.parse::<usize>().ok().filter(|row| *row > 0).map(|row| row - 1)
}

/// Parses a cell reference such as "B5" or "$B$5" into 0-based (row, col).
pub fn reference_to_index(reference: &str) -> Option<(usize, usize)> {
    let reference = reference.replace('$', "");
    let split = reference.find(|character: char| character.is_ascii_digit())?;
    let (letters, digits) = reference.split_at(split);
    Some((row_to_index(digits)?, col_to_index(letters)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn columns() {
        assert_eq!(index_to_col(0), "A");
        assert_eq!(index_to_col(25), "Z");
        assert_eq!(index_to_col(26), "AA");
        assert_eq!(index_to_col(16383), "XFD");
        assert_eq!(col_to_index("A"), Some(0));
        assert_eq!(col_to_index("ab"), Some(27));
        assert_eq!(col_to_index("XFD"), Some(16383));
        assert_eq!(col_to_index(""), None);
        assert_eq!(col_to_index("A1"), None);
    }

    #[test]
    fn references() {
        assert_eq!(index_to_reference(4, 1), "B5");
        assert_eq!(reference_to_index("B5"), Some((4, 1)));
        assert_eq!(reference_to_index("$AA$10"), Some((9, 26)));
        assert_eq!(reference_to_index("B0"), None);
        assert_eq!(reference_to_index("12"), None);
        assert_eq!(reference_to_index("B"), None);
    }
}
