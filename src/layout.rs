use log::debug;
use serde::{Deserialize, Serialize};

/// Container widths (in layout units) at which the grid drops a column.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Breakpoints {
    pub one_column: f64,
    pub two_columns: f64,
    pub three_columns: f64,
}

impl Default for Breakpoints {
    fn default() -> Self {
        Breakpoints {
            one_column: 640.0,
            two_columns: 1024.0,
            three_columns: 1280.0,
        }
    }
}

impl Breakpoints {
    pub fn columns_for(&self, width: f64) -> usize {
        if width <= self.one_column {
            1
        } else if width <= self.two_columns {
            2
        } else if width <= self.three_columns {
            3
        } else {
            4
        }
    }
}

/// Row-major masonry packing: item `i` sits in column `i % n`, row `i / n`,
/// so left-to-right, top-to-bottom reading order is index order.
#[derive(Debug, Clone)]
pub struct GridLayout {
    breakpoints: Breakpoints,
    column_count: usize,
    item_count: usize,
    columns: Vec<Vec<usize>>,
}

impl GridLayout {
    pub fn new(breakpoints: Breakpoints) -> Self {
        let mut grid = GridLayout {
            breakpoints,
            column_count: 4,
            item_count: 0,
            columns: Vec::new(),
        };
        grid.pack();
        grid
    }

    /// Container-size notification. Returns true if the packing changed;
    /// repeated notifications that keep the column count do nothing.
    pub fn resize(&mut self, width: f64) -> bool {
        let count = self.breakpoints.columns_for(width);
        if count == self.column_count {
            return false;
        }
        debug!(
            "grid width {} -> {} columns (was {})",
            width, count, self.column_count
        );
        self.column_count = count;
        self.pack();
        true
    }

    pub fn set_item_count(&mut self, count: usize) -> bool {
        if count == self.item_count {
            return false;
        }
        self.item_count = count;
        self.pack();
        true
    }

    pub fn column_count(&self) -> usize {
        self.column_count
    }

    /// Item indices per column, top to bottom.
    pub fn columns(&self) -> &[Vec<usize>] {
        &self.columns
    }

    /// `(column, row)` of an item.
    pub fn cell_of(&self, index: usize) -> Option<(usize, usize)> {
        if index >= self.item_count {
            return None;
        }
        Some((index % self.column_count, index / self.column_count))
    }

    /// Order cells are emitted when drawing: column by column.
    pub fn render_order(&self) -> Vec<usize> {
        self.columns.iter().flatten().copied().collect()
    }

    fn pack(&mut self) {
        let mut columns = vec![Vec::new(); self.column_count];
        for index in 0..self.item_count {
            columns[index % self.column_count].push(index);
        }
        self.columns = columns;
    }
}
