/// Grid state: one row per instrument, one column per step.
///
/// Every operation is a value transformation returning a new grid, so the
/// playback thread can hold onto a snapshot while the UI commits the next one.
use arc_swap::ArcSwap;
use std::sync::Arc;

pub const MIN_COLUMNS: usize = 1;
pub const MAX_COLUMNS: usize = 32;
pub const DEFAULT_COLUMNS: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grid {
    cells: Vec<Vec<bool>>,
    columns: usize,
}

impl Grid {
    /// All-inactive grid. `columns` is clamped to the supported range.
    pub fn new(rows: usize, columns: usize) -> Self {
        let columns = clamp_columns(columns);
        Self {
            cells: vec![vec![false; columns]; rows],
            columns,
        }
    }

    /// Builds a grid of `rows` x `columns` from previously saved rows of any
    /// shape, copying the overlapping prefix.
    pub fn restore(rows: usize, columns: usize, saved: &[Vec<bool>]) -> Self {
        let mut grid = Self::new(rows, columns);
        for (row, saved_row) in grid.cells.iter_mut().zip(saved) {
            for (cell, &value) in row.iter_mut().zip(saved_row) {
                *cell = value;
            }
        }
        grid
    }

    pub fn rows(&self) -> usize {
        self.cells.len()
    }

    pub fn columns(&self) -> usize {
        self.columns
    }

    pub fn is_active(&self, row: usize, col: usize) -> bool {
        self.cells
            .get(row)
            .and_then(|r| r.get(col))
            .copied()
            .unwrap_or(false)
    }

    /// Rows with an active cell in `col`, in row order.
    pub fn active_rows(&self, col: usize) -> impl Iterator<Item = usize> + '_ {
        self.cells
            .iter()
            .enumerate()
            .filter(move |(_, row)| row.get(col).copied().unwrap_or(false))
            .map(|(index, _)| index)
    }

    pub fn active_count(&self) -> usize {
        self.cells.iter().flatten().filter(|&&cell| cell).count()
    }

    /// Each row truncated or padded to `columns`, existing values kept.
    pub fn resized(&self, columns: usize) -> Self {
        let columns = clamp_columns(columns);
        let cells = self
            .cells
            .iter()
            .map(|row| {
                let mut resized = vec![false; columns];
                let keep = row.len().min(columns);
                resized[..keep].copy_from_slice(&row[..keep]);
                resized
            })
            .collect();
        Self { cells, columns }
    }

    /// Copy with one cell flipped. Out of range returns an unchanged copy.
    pub fn toggled(&self, row: usize, col: usize) -> Self {
        let mut next = self.clone();
        if let Some(cell) = next.cells.get_mut(row).and_then(|r| r.get_mut(col)) {
            *cell = !*cell;
        }
        next
    }

    /// Same dimensions, every cell inactive.
    pub fn cleared(&self) -> Self {
        Self::new(self.rows(), self.columns)
    }

    pub fn to_rows(&self) -> Vec<Vec<bool>> {
        self.cells.clone()
    }

    /// Grid sized to the saved rows themselves; ragged rows are padded to the
    /// longest one.
    pub fn from_rows(saved: &[Vec<bool>]) -> Self {
        let columns = saved.iter().map(Vec::len).max().unwrap_or(DEFAULT_COLUMNS);
        Self::restore(saved.len(), columns, saved)
    }
}

fn clamp_columns(columns: usize) -> usize {
    columns.clamp(MIN_COLUMNS, MAX_COLUMNS)
}

/// Shared grid slot. Readers always see the latest committed grid; there is
/// no captured copy to go stale between steps.
#[derive(Debug)]
pub struct GridCell {
    current: ArcSwap<Grid>,
}

impl GridCell {
    pub fn new(grid: Grid) -> Self {
        Self {
            current: ArcSwap::from_pointee(grid),
        }
    }

    pub fn load(&self) -> Arc<Grid> {
        self.current.load_full()
    }

    pub fn store(&self, grid: Grid) {
        self.current.store(Arc::new(grid));
    }

    /// Applies `f` to the latest grid and commits the result, returning it.
    pub fn update<F>(&self, f: F) -> Arc<Grid>
    where
        F: Fn(&Grid) -> Grid,
    {
        let next = Arc::new(f(&self.current.load()));
        self.current.store(Arc::clone(&next));
        next
    }
}

impl Default for GridCell {
    fn default() -> Self {
        Self::new(Grid::new(0, DEFAULT_COLUMNS))
    }
}
