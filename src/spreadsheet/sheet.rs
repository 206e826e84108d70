use crate::spreadsheet::cell::Cell;
use crate::spreadsheet::cell::CellStyle;
use crate::spreadsheet::cell::CellType;
use crate::spreadsheet::range::CellRange;

/// Accumulates cells while a reader walks a worksheet, tracking the populated bounds.
pub(crate) struct SheetBuilder {
    source: String,
    name: String,
    cells: Vec<Cell>,
    merges: Vec<CellRange>,
    is_sorted: bool,
    last_position: Option<(usize, usize)>,
    bounds: Option<CellRange>,
}

impl SheetBuilder {
    pub(crate) fn new(source: &str, name: &str) -> Self {
        SheetBuilder {
            source: source.to_owned(),
            name: name.to_owned(),
            cells: Vec::new(),
            merges: Vec::new(),
            is_sorted: true,
            last_position: None,
            bounds: None,
        }
    }

    /// Adds a cell; blank values are dropped so the grid stays sparse.
    pub(crate) fn push(&mut self, cell: Cell) {
        if cell.is_blank() {
            return;
        }
        let position = (cell.row, cell.col);
        if self.last_position.map(|last| last >= position).unwrap_or(false) {
            self.is_sorted = false;
        }
        self.last_position = Some(position);
        self.update_bound(cell.row, cell.col);
        self.cells.push(cell);
    }

    /// Records a merged area. Single-cell merges carry no information and are ignored.
    pub(crate) fn merge(&mut self, range: CellRange) {
        if !range.is_single_cell() {
            self.merges.push(range);
        }
    }

    fn update_bound(&mut self, row: usize, col: usize) {
        match &mut self.bounds {
            Some(bounds) => bounds.extend(row, col),
            None => self.bounds = Some(CellRange::cell(row, col)),
        }
    }

    /// Sorts cells by position (later duplicates win) and freezes the sheet.
    pub(crate) fn finish(mut self) -> RawSheet {
        if !self.is_sorted {
            // Stable sort keeps write order among duplicates, so the last write survives dedup
            self.cells.sort_by_key(|cell| (cell.row, cell.col));
            let mut cells: Vec<Cell> = Vec::with_capacity(self.cells.len());
            for cell in self.cells {
                match cells.last_mut() {
                    Some(last) if last.row == cell.row && last.col == cell.col => *last = cell,
                    _ => cells.push(cell),
                }
            }
            self.cells = cells;
        }
        self.merges.sort();
        self.merges.dedup();
        RawSheet {
            source: self.source,
            name: self.name,
            cells: self.cells,
            merges: self.merges,
            bounds: self.bounds,
        }
    }
}

/// An immutable, sparse 2-D grid of populated cells with merged areas.
#[derive(Clone, Debug)]
pub struct RawSheet {
    pub source: String,
    pub name: String,
    /// Populated cells ordered by (row, col)
    cells: Vec<Cell>,
    merges: Vec<CellRange>,
    bounds: Option<CellRange>,
}

impl RawSheet {
    /// Builds a sheet of text cells from rows of strings; empty strings leave cells unset.
    /// Leading whitespace is kept, so indentation survives as a cue.
    pub fn from_grid<R, S>(name: &str, rows: &[R]) -> RawSheet
    where
        R: AsRef<[S]>,
        S: AsRef<str>,
    {
        let mut builder = SheetBuilder::new(name, name);
        for (row, values) in rows.iter().enumerate() {
            for (col, value) in values.as_ref().iter().enumerate() {
                builder.push(Cell::text(row, col, value.as_ref()));
            }
        }
        builder.finish()
    }

    /// Returns a copy with the given cells replaced or added.
    pub fn with_cells(self, cells: impl IntoIterator<Item = Cell>) -> RawSheet {
        let mut builder = SheetBuilder::new(&self.source, &self.name);
        for cell in self.cells.into_iter().chain(cells) {
            builder.push(cell);
        }
        for merge in self.merges {
            builder.merge(merge);
        }
        builder.finish()
    }

    /// Returns a copy with an added merged area.
    pub fn with_merge(mut self, range: CellRange) -> RawSheet {
        if !range.is_single_cell() {
            self.merges.push(range);
            self.merges.sort();
            self.merges.dedup();
        }
        self
    }

    /// Returns a copy where the given cell carries the style.
    pub fn with_style(mut self, row: usize, col: usize, style: CellStyle) -> RawSheet {
        if let Ok(index) = self.position(row, col) {
            self.cells[index].style = style;
        }
        self
    }

    fn position(&self, row: usize, col: usize) -> Result<usize, usize> {
        self.cells.binary_search_by(|cell| (cell.row, cell.col).cmp(&(row, col)))
    }

    pub fn get(&self, row: usize, col: usize) -> Option<&Cell> {
        self.position(row, col).ok().map(|index| &self.cells[index])
    }

    /// Populated cells of one row, ordered by column.
    pub fn row(&self, row: usize) -> &[Cell] {
        let lower = self.cells.partition_point(|cell| cell.row < row);
        let upper = self.cells.partition_point(|cell| cell.row <= row);
        &self.cells[lower..upper]
    }

    /// Populated cells of one row restricted to `left..=right`.
    pub fn row_span(&self, row: usize, left: usize, right: usize) -> &[Cell] {
        let cells = self.row(row);
        let lower = cells.partition_point(|cell| cell.col < left);
        let upper = cells.partition_point(|cell| cell.col <= right);
        &cells[lower..upper]
    }

    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    pub fn merges(&self) -> &[CellRange] {
        &self.merges
    }

    /// The merged area covering the position, if any.
    pub fn merge_at(&self, row: usize, col: usize) -> Option<&CellRange> {
        self.merges.iter().find(|merge| merge.contains(row, col))
    }

    /// Bounding box of all populated cells and merged areas.
    pub fn bounds(&self) -> Option<CellRange> {
        let merged = self.merges.iter().copied().reduce(|left, right| left.union(&right));
        match (self.bounds, merged) {
            (Some(cells), Some(merges)) => Some(cells.union(&merges)),
            (cells, merges) => cells.or(merges),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Whether the position holds a value, directly or through a merge anchored on a value.
    pub fn is_occupied(&self, row: usize, col: usize) -> bool {
        self.get(row, col).is_some()
            || self
                .merge_at(row, col)
                .map(|merge| self.get(merge.top, merge.left).is_some())
                .unwrap_or(false)
    }

    /// The value visible at a position: its own cell, or the anchor of a covering merge.
    pub fn visible(&self, row: usize, col: usize) -> Option<&Cell> {
        self.get(row, col).or_else(|| {
            let merge = self.merge_at(row, col)?;
            self.get(merge.top, merge.left)
        })
    }

    /// Number of populated cells, excluding cells only covered by merges.
    pub fn len(&self) -> usize {
        self.cells.len()
    }
}

impl PartialEq for RawSheet {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.cells == other.cells && self.merges == other.merges
    }
}
