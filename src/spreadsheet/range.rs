use crate::error::SheetSleuthError;
use crate::spreadsheet::reference::col_to_index;
use crate::spreadsheet::reference::index_to_reference;
use crate::spreadsheet::reference::row_to_index;
use regex::Regex;
use serde::Deserialize;
use serde::Serialize;
use std::fmt::Display;
use std::sync::LazyLock;
use thiserror::Error;

static RANGE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\$?([A-Z]{1,3})\$?(\d+)(?::\$?([A-Z]{1,3})\$?(\d+))?$").expect("Hardcode regex pattern"));

#[derive(Error, Debug)]
pub enum RangeError {
    #[error("Invalid range format '{0}'")]
    FormatError(String),
}

/// A rectangular block of cells, 0-based and inclusive on every side.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CellRange {
    pub top: usize,
    pub left: usize,
    pub bottom: usize,
    pub right: usize,
}

impl CellRange {
    /// Creates a range from two corners given in any order.
    pub fn new(top: usize, left: usize, bottom: usize, right: usize) -> Self {
        CellRange {
            top: top.min(bottom),
            left: left.min(right),
            bottom: top.max(bottom),
            right: left.max(right),
        }
    }

    pub fn cell(row: usize, col: usize) -> Self {
        CellRange::new(row, col, row, col)
    }

    pub fn height(&self) -> usize {
        self.bottom - self.top + 1
    }

    pub fn width(&self) -> usize {
        self.right - self.left + 1
    }

    pub fn area(&self) -> usize {
        self.height() * self.width()
    }

    pub fn contains(&self, row: usize, col: usize) -> bool {
        (self.top..=self.bottom).contains(&row) && (self.left..=self.right).contains(&col)
    }

    pub fn intersects(&self, other: &CellRange) -> bool {
        self.top <= other.bottom && other.top <= self.bottom && self.left <= other.right && other.left <= self.right
    }

    /// Whether the column spans share at least one column.
    pub fn overlaps_columns(&self, other: &CellRange) -> bool {
        self.left <= other.right && other.left <= self.right
    }

    /// Smallest range covering both.
    pub fn union(&self, other: &CellRange) -> CellRange {
        CellRange {
            top: self.top.min(other.top),
            left: self.left.min(other.left),
            bottom: self.bottom.max(other.bottom),
            right: self.right.max(other.right),
        }
    }

    /// Expands the range to include one more cell.
    pub fn extend(&mut self, row: usize, col: usize) {
        self.top = self.top.min(row);
        self.left = self.left.min(col);
        self.bottom = self.bottom.max(row);
        self.right = self.right.max(col);
    }

    /// A single-cell range is not a real merge.
    pub fn is_single_cell(&self) -> bool {
        self.top == self.bottom && self.left == self.right
    }
}

impl TryFrom<&str> for CellRange {
    type Error = SheetSleuthError;

    /// Parses "B5", "B5:E20" or "$B$5:$E$20".
    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let value = value.trim().to_ascii_uppercase();
        let captures = RANGE_PATTERN
            .captures(&value)
            .ok_or_else(|| RangeError::FormatError(value.to_owned()))?;
        let corner = |letters: usize, digits: usize| -> Option<(usize, usize)> {
            let col = col_to_index(captures.get(letters)?.as_str())?;
            let row = row_to_index(captures.get(digits)?.as_str())?;
            Some((row, col))
        };
        let (top, left) = corner(1, 2).ok_or_else(|| RangeError::FormatError(value.to_owned()))?;
        let (bottom, right) = corner(3, 4).unwrap_or((top, left));
        Ok(CellRange::new(top, left, bottom, right))
    }
}

impl Display for CellRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_single_cell() {
            write!(f, "{}", index_to_reference(self.top, self.left))
        } else {
            write!(
                f,
                "{}:{}",
                index_to_reference(self.top, self.left),
                index_to_reference(self.bottom, self.right)
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_ranges() -> Result<(), SheetSleuthError> {
        assert_eq!(CellRange::try_from("B5:E20")?, CellRange::new(4, 1, 19, 4));
        assert_eq!(CellRange::try_from("$b$5")?, CellRange::cell(4, 1));
        assert_eq!(CellRange::try_from("E20:B5")?, CellRange::new(4, 1, 19, 4));
        assert!(CellRange::try_from("B:E").is_err());
        assert!(CellRange::try_from("5:20").is_err());
        Ok(())
    }

    #[test]
    fn display_ranges() {
        assert_eq!(CellRange::new(4, 1, 19, 4).to_string(), "B5:E20");
        assert_eq!(CellRange::cell(0, 0).to_string(), "A1");
    }

    #[test]
    fn geometry() {
        let range = CellRange::new(4, 1, 9, 4);
        assert_eq!(range.height(), 6);
        assert_eq!(range.width(), 4);
        assert!(range.contains(4, 4));
        assert!(!range.contains(3, 4));
        assert!(range.intersects(&CellRange::new(9, 4, 12, 8)));
        assert!(!range.intersects(&CellRange::new(10, 0, 12, 8)));
        assert!(range.overlaps_columns(&CellRange::new(20, 0, 22, 1)));
        assert_eq!(range.union(&CellRange::cell(0, 0)), CellRange::new(0, 0, 9, 4));
    }
}
