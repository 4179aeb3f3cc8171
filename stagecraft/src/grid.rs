//! Uniform grid used as a collision broad phase.
//!
//! The covered area is split into `rows × cols` equal cells. An item is
//! stored in every cell its rectangular footprint overlaps. The span an item
//! was inserted with is remembered, so removal always clears exactly the
//! cells it was added to.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;

use serde::{Deserialize, Serialize};

use crate::error::{Result, StageError};
use crate::math::{Rect, Vec2};

/// Size and resolution of a [`Grid`].
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    /// World units covered horizontally.
    pub width: f32,
    /// World units covered vertically.
    pub height: f32,
    pub rows: usize,
    pub cols: usize,
    /// World position of the grid's minimum corner.
    pub origin: Vec2,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            width: 2000.0,
            height: 2000.0,
            rows: 20,
            cols: 20,
            origin: Vec2::ZERO,
        }
    }
}

impl GridConfig {
    /// Parse and validate a JSON config. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|err| StageError::InvalidConfig(format!("grid config: {err}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.width.is_finite() && self.width > 0.0 && self.height.is_finite() && self.height > 0.0) {
            return Err(StageError::InvalidConfig(format!(
                "grid size must be positive, got {}x{}",
                self.width, self.height
            )));
        }
        if self.rows == 0 || self.cols == 0 {
            return Err(StageError::InvalidConfig(format!(
                "grid needs at least one row and column, got {}x{}",
                self.rows, self.cols
            )));
        }
        Ok(())
    }

    pub fn cell_width(&self) -> f32 {
        self.width / self.cols as f32
    }

    pub fn cell_height(&self) -> f32 {
        self.height / self.rows as f32
    }
}

/// Inclusive range of cells, clamped to the grid.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CellSpan {
    pub min_row: usize,
    pub max_row: usize,
    pub min_col: usize,
    pub max_col: usize,
}

impl CellSpan {
    /// Every `(row, col)` in the span, row by row.
    pub fn cells(&self) -> impl Iterator<Item = (usize, usize)> {
        let (min_col, max_col) = (self.min_col, self.max_col);
        (self.min_row..=self.max_row).flat_map(move |row| (min_col..=max_col).map(move |col| (row, col)))
    }

    /// Number of cells covered. Never zero.
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        (self.max_row - self.min_row + 1) * (self.max_col - self.min_col + 1)
    }
}

/// The items stored in one cell. Holds each key at most once.
#[derive(Clone, Debug)]
pub struct GridCell<K> {
    items: Vec<K>,
}

impl<K> Default for GridCell<K> {
    fn default() -> Self {
        Self { items: Vec::new() }
    }
}

impl<K: Copy + Eq> GridCell<K> {
    /// Returns false if the key was already present.
    pub fn insert(&mut self, key: K) -> bool {
        if self.items.contains(&key) {
            return false;
        }
        self.items.push(key);
        true
    }

    pub fn remove(&mut self, key: K) -> bool {
        match self.items.iter().position(|item| *item == key) {
            Some(index) => {
                self.items.swap_remove(index);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, key: K) -> bool {
        self.items.contains(&key)
    }

    pub fn items(&self) -> &[K] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[derive(Clone, Copy, Debug)]
struct Entry {
    span: CellSpan,
    flags: u32,
}

/// Spatial hash over a fixed rectangle.
#[derive(Clone, Debug)]
pub struct Grid<K> {
    config: GridConfig,
    cells: Vec<GridCell<K>>, // row-major: [row * cols + col]
    entries: HashMap<K, Entry>,
}

impl<K: Copy + Eq + Hash> Grid<K> {
    pub fn new(config: GridConfig) -> Result<Self> {
        config.validate()?;
        let cells = std::iter::repeat_with(GridCell::default)
            .take(config.rows * config.cols)
            .collect();
        Ok(Self {
            config,
            cells,
            entries: HashMap::new(),
        })
    }

    pub fn config(&self) -> &GridConfig {
        &self.config
    }

    pub fn rows(&self) -> usize {
        self.config.rows
    }

    pub fn cols(&self) -> usize {
        self.config.cols
    }

    /// Number of items stored.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: K) -> bool {
        self.entries.contains_key(&key)
    }

    pub fn cell(&self, row: usize, col: usize) -> Option<&GridCell<K>> {
        if row >= self.config.rows || col >= self.config.cols {
            return None;
        }
        self.cells.get(row * self.config.cols + col)
    }

    /// Cells overlapped by `bounds`, clamped to the grid.
    pub fn span_of(&self, bounds: Rect) -> CellSpan {
        let GridConfig {
            rows, cols, origin, ..
        } = self.config;
        let to_cell = |value: f32, origin: f32, size: f32, count: usize| -> usize {
            let cell = ((value - origin) / size).floor();
            if cell.is_nan() || cell < 0.0 {
                0
            } else {
                (cell as usize).min(count - 1)
            }
        };
        let (cell_w, cell_h) = (self.config.cell_width(), self.config.cell_height());
        CellSpan {
            min_row: to_cell(bounds.min.y, origin.y, cell_h, rows),
            max_row: to_cell(bounds.max.y, origin.y, cell_h, rows),
            min_col: to_cell(bounds.min.x, origin.x, cell_w, cols),
            max_col: to_cell(bounds.max.x, origin.x, cell_w, cols),
        }
    }

    /// Span the item was stored with.
    pub fn stored_span(&self, key: K) -> Option<CellSpan> {
        self.entries.get(&key).map(|entry| entry.span)
    }

    /// Store `key` in every cell its footprint overlaps.
    ///
    /// Adding a key that is already stored moves it: its previous cells are
    /// cleared first.
    pub fn add_item(&mut self, key: K, bounds: Rect, flags: u32) -> CellSpan {
        self.remove_item(key);
        let span = self.span_of(bounds);
        for (row, col) in span.cells() {
            let index = row * self.config.cols + col;
            self.cells[index].insert(key);
        }
        self.entries.insert(key, Entry { span, flags });
        span
    }

    /// Clear `key` from exactly the cells it was added to.
    pub fn remove_item(&mut self, key: K) -> bool {
        let Some(entry) = self.entries.remove(&key) else {
            return false;
        };
        for (row, col) in entry.span.cells() {
            let index = row * self.config.cols + col;
            self.cells[index].remove(key);
        }
        true
    }

    /// Collision flags the item was stored with.
    pub fn flags_of(&self, key: K) -> Option<u32> {
        self.entries.get(&key).map(|entry| entry.flags)
    }

    /// Append every other item sharing a cell with `key` whose flags intersect
    /// `hit_mask` to `results`. A mask of zero matches every item. Each hit is
    /// reported once. Returns the number of hits appended.
    pub fn get_hits(&self, key: K, hit_mask: u32, results: &mut Vec<K>) -> usize {
        let Some(entry) = self.entries.get(&key) else {
            return 0;
        };
        let mut seen: HashSet<K> = results.iter().copied().collect();
        seen.insert(key);
        let before = results.len();

        for (row, col) in entry.span.cells() {
            for &other in self.cells[row * self.config.cols + col].items() {
                if seen.contains(&other) {
                    continue;
                }
                let flags = self.entries.get(&other).map_or(0, |entry| entry.flags);
                if hit_mask == 0 || flags & hit_mask != 0 {
                    seen.insert(other);
                    results.push(other);
                }
            }
        }
        results.len() - before
    }

    /// Distinct items stored in the cells `bounds` overlaps, in cell order.
    pub fn get_items(&self, bounds: Rect) -> Vec<K> {
        let mut seen = HashSet::new();
        let mut items = Vec::new();
        for (row, col) in self.span_of(bounds).cells() {
            for &item in self.cells[row * self.config.cols + col].items() {
                if seen.insert(item) {
                    items.push(item);
                }
            }
        }
        items
    }

    /// Cells that currently hold `key`, found by scanning the whole grid.
    pub fn cells_of(&self, key: K) -> Vec<(usize, usize)> {
        let cols = self.config.cols;
        self.cells
            .iter()
            .enumerate()
            .filter(|(_, cell)| cell.contains(key))
            .map(|(index, _)| (index / cols, index % cols))
            .collect()
    }

    pub fn keys(&self) -> impl Iterator<Item = K> + '_ {
        self.entries.keys().copied()
    }

    pub fn clear(&mut self) {
        for cell in &mut self.cells {
            cell.items.clear();
        }
        self.entries.clear();
    }
}

impl<K: Copy + Eq + Hash> Default for Grid<K> {
    fn default() -> Self {
        let config = GridConfig::default();
        Self {
            cells: std::iter::repeat_with(GridCell::default)
                .take(config.rows * config.cols)
                .collect(),
            config,
            entries: HashMap::new(),
        }
    }
}
