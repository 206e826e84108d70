//! # Layout and content inference
//!
//! Passes run per sheet, in order: [`structure`] finds regions, [`table`] and
//! [`keyvalue`] extract them, [`column`] types values, [`dates`] and [`entity`]
//! recognize periods and names. Every pass is a pure function of the sheet and the
//! configuration.

pub mod column;
pub mod dates;
pub mod entity;
pub mod keyvalue;
pub mod structure;
pub mod table;

use crate::spreadsheet::range::CellRange;
use serde::Deserialize;
use serde::Serialize;
use std::fmt::Display;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StructureType {
    Tabular,
    KeyValue,
    Mixed,
    Empty,
}

impl StructureType {
    pub const fn as_str(&self) -> &'static str {
        match self {
            StructureType::Tabular => "TABULAR",
            StructureType::KeyValue => "KEY_VALUE",
            StructureType::Mixed => "MIXED",
            StructureType::Empty => "EMPTY",
        }
    }
}

impl Display for StructureType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Header rows found by detection: the first header row and how many rows the band spans.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderBand {
    pub row: usize,
    pub rows: usize,
}

/// A classified rectangular area of a sheet. Regions of one sheet never overlap.
#[derive(Clone, Debug, PartialEq)]
pub struct Region {
    pub range: CellRange,
    pub kind: StructureType,
    /// In `[0, 1]`
    pub confidence: f64,
    /// Header hint for tabular regions
    pub header: Option<HeaderBand>,
}
