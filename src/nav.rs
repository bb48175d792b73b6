use crate::model::Filter;
use crate::spatial::{Direction, SpatialIndex};
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

/// Result of feeding a key to a navigable group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NavOutcome<T> {
    Moved(T),
    Activate(T),
    Ignored,
}

/// Linear roving-focus group (filter options, toolbar buttons). Arrow keys
/// wrap at both ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RovingGroup {
    len: usize,
    index: usize,
}

impl RovingGroup {
    pub fn new(len: usize) -> Self {
        RovingGroup { len, index: 0 }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn focus(&mut self, index: usize) {
        if index < self.len {
            self.index = index;
        }
    }

    pub fn handle_key(&mut self, key: &KeyEvent) -> NavOutcome<usize> {
        if self.len == 0 {
            return NavOutcome::Ignored;
        }
        let last = self.len - 1;
        let next = match key.code {
            KeyCode::Left | KeyCode::Up => {
                if self.index == 0 {
                    last
                } else {
                    self.index - 1
                }
            }
            KeyCode::Right | KeyCode::Down => {
                if self.index >= last {
                    0
                } else {
                    self.index + 1
                }
            }
            KeyCode::Home => 0,
            KeyCode::End => last,
            KeyCode::Enter | KeyCode::Char(' ') => return NavOutcome::Activate(self.index),
            _ => return NavOutcome::Ignored,
        };
        self.index = next;
        NavOutcome::Moved(next)
    }
}

/// Grid keys: arrows ask the spatial index, Ctrl+Home / Ctrl+End jump to the
/// ends of the filtered order. A missing target is `Ignored`, never an error.
pub fn grid_key(
    key: &KeyEvent,
    current: &str,
    order: &[String],
    index: &SpatialIndex,
) -> NavOutcome<String> {
    let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
    let direction = match key.code {
        KeyCode::Up => Direction::Up,
        KeyCode::Down => Direction::Down,
        KeyCode::Left => Direction::Left,
        KeyCode::Right => Direction::Right,
        KeyCode::Home if ctrl => {
            return order
                .first()
                .map_or(NavOutcome::Ignored, |id| NavOutcome::Moved(id.clone()))
        }
        KeyCode::End if ctrl => {
            return order
                .last()
                .map_or(NavOutcome::Ignored, |id| NavOutcome::Moved(id.clone()))
        }
        KeyCode::Enter => {
            if order.iter().any(|id| id == current) {
                return NavOutcome::Activate(current.to_string());
            }
            return NavOutcome::Ignored;
        }
        _ => return NavOutcome::Ignored,
    };
    index
        .query(current, direction)
        .map_or(NavOutcome::Ignored, NavOutcome::Moved)
}

/// Keeps grid focus on a live item after the visible order changes.
///
/// A still-visible item keeps focus. Otherwise focus goes to whatever now
/// occupies its old index, then to the new last item. `None` means the grid is
/// empty and the caller should fall back to the toolbar.
pub fn reconcile_focus(focused: Option<&str>, before: &[String], after: &[String]) -> Option<String> {
    if let Some(id) = focused {
        if after.iter().any(|a| a == id) {
            return Some(id.to_string());
        }
        if let Some(pos) = before.iter().position(|b| b == id) {
            return after.get(pos).or_else(|| after.last()).cloned();
        }
    }
    after.first().cloned()
}

pub fn successor_after_delete(order_before: &[String], deleted: &str) -> Option<String> {
    let after: Vec<String> = order_before
        .iter()
        .filter(|id| id.as_str() != deleted)
        .cloned()
        .collect();
    reconcile_focus(Some(deleted), order_before, &after)
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FocusRegion {
    Toolbar,
    Filter,
    Grid,
}

impl FocusRegion {
    pub fn next(self) -> Self {
        match self {
            FocusRegion::Toolbar => FocusRegion::Filter,
            FocusRegion::Filter => FocusRegion::Grid,
            FocusRegion::Grid => FocusRegion::Toolbar,
        }
    }

    pub fn prev(self) -> Self {
        match self {
            FocusRegion::Toolbar => FocusRegion::Grid,
            FocusRegion::Filter => FocusRegion::Toolbar,
            FocusRegion::Grid => FocusRegion::Filter,
        }
    }
}

pub const TOOLBAR_ACTIONS: [ToolbarAction; 2] = [ToolbarAction::NewProject, ToolbarAction::Quit];

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ToolbarAction {
    NewProject,
    Quit,
}

impl ToolbarAction {
    pub fn label(&self) -> &'static str {
        match self {
            ToolbarAction::NewProject => "New project",
            ToolbarAction::Quit => "Quit",
        }
    }
}

/// What the page should do after a navigation key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    None,
    Toolbar(ToolbarAction),
    SelectFilter(Filter),
    OpenProject(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct SavedFocus {
    region: FocusRegion,
    toolbar: usize,
    filter: usize,
    grid: Option<String>,
}

/// Which element holds focus across the three independent groups, plus the
/// focus saved while modals are open.
#[derive(Debug, Clone)]
pub struct FocusController {
    region: FocusRegion,
    toolbar: RovingGroup,
    filter: RovingGroup,
    grid: Option<String>,
    saved: Vec<SavedFocus>,
}

impl Default for FocusController {
    fn default() -> Self {
        Self::new()
    }
}

impl FocusController {
    pub fn new() -> Self {
        FocusController {
            region: FocusRegion::Grid,
            toolbar: RovingGroup::new(TOOLBAR_ACTIONS.len()),
            filter: RovingGroup::new(Filter::ALL.len()),
            grid: None,
            saved: Vec::new(),
        }
    }

    pub fn region(&self) -> FocusRegion {
        self.region
    }

    pub fn toolbar_index(&self) -> usize {
        self.toolbar.index()
    }

    pub fn filter_index(&self) -> usize {
        self.filter.index()
    }

    pub fn grid_focus(&self) -> Option<&str> {
        self.grid.as_deref()
    }

    pub fn focus_region(&mut self, region: FocusRegion) {
        self.region = region;
    }

    pub fn focus_grid_item(&mut self, id: impl Into<String>) {
        self.region = FocusRegion::Grid;
        self.grid = Some(id.into());
    }

    /// Re-validates grid focus against a new visible order. An emptied grid
    /// moves focus to the "New project" button.
    pub fn reconcile(&mut self, before: &[String], after: &[String]) {
        self.grid = reconcile_focus(self.grid.as_deref(), before, after);
        if self.grid.is_none() && self.region == FocusRegion::Grid {
            self.region = FocusRegion::Toolbar;
            self.toolbar.focus(0);
        }
    }

    /// Moves focus off an item that is about to disappear.
    pub fn item_deleted(&mut self, order_before: &[String], deleted: &str) {
        if self.grid.as_deref() != Some(deleted) {
            return;
        }
        self.grid = successor_after_delete(order_before, deleted);
        if self.grid.is_none() {
            self.region = FocusRegion::Toolbar;
            self.toolbar.focus(0);
        }
    }

    pub fn open_modal(&mut self) {
        self.saved.push(SavedFocus {
            region: self.region,
            toolbar: self.toolbar.index(),
            filter: self.filter.index(),
            grid: self.grid.clone(),
        });
    }

    /// Returns focus to where it was when the innermost modal opened.
    pub fn close_modal(&mut self) {
        if let Some(saved) = self.saved.pop() {
            self.region = saved.region;
            self.toolbar.focus(saved.toolbar);
            self.filter.focus(saved.filter);
            self.grid = saved.grid;
        }
    }

    #[cfg(test)]
    pub fn modal_depth(&self) -> usize {
        self.saved.len()
    }

    pub fn handle_key(&mut self, key: &KeyEvent, order: &[String], index: &SpatialIndex) -> Intent {
        match key.code {
            KeyCode::Tab => {
                self.region = self.region.next();
                self.ensure_grid_target(order);
                return Intent::None;
            }
            KeyCode::BackTab => {
                self.region = self.region.prev();
                self.ensure_grid_target(order);
                return Intent::None;
            }
            _ => {}
        }
        match self.region {
            FocusRegion::Toolbar => match self.toolbar.handle_key(key) {
                NavOutcome::Activate(i) => TOOLBAR_ACTIONS
                    .get(i)
                    .map_or(Intent::None, |action| Intent::Toolbar(*action)),
                _ => Intent::None,
            },
            FocusRegion::Filter => match self.filter.handle_key(key) {
                NavOutcome::Activate(i) => Filter::ALL
                    .get(i)
                    .map_or(Intent::None, |filter| Intent::SelectFilter(*filter)),
                _ => Intent::None,
            },
            FocusRegion::Grid => {
                let Some(current) = self.grid.clone() else {
                    self.ensure_grid_target(order);
                    return Intent::None;
                };
                match grid_key(key, &current, order, index) {
                    NavOutcome::Moved(id) => {
                        self.grid = Some(id);
                        Intent::None
                    }
                    NavOutcome::Activate(id) => Intent::OpenProject(id),
                    NavOutcome::Ignored => Intent::None,
                }
            }
        }
    }

    fn ensure_grid_target(&mut self, order: &[String]) {
        if self.region == FocusRegion::Grid && self.grid.is_none() {
            self.grid = order.first().cloned();
        }
    }
}
