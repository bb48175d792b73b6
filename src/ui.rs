use crate::commands::FileStore;
use crate::config::{Config, LayoutConfig};
use crate::layout::GridLayout;
use crate::model::{Field, Filter, Project, StoreError, TaskStatus, ValidationError};
use crate::nav::{FocusController, FocusRegion, Intent, ToolbarAction, TOOLBAR_ACTIONS};
use crate::spatial::{ItemPosition, SpatialIndex};
use crate::storage::Storage;
use crate::store::{ProjectStore, Snapshot};
use anyhow::Result;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::execute;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use log::debug;
use ratatui::backend::CrosstermBackend;
use ratatui::buffer::Buffer;
use ratatui::layout::{Constraint, Direction, Layout};
use ratatui::prelude::{Alignment, Color, Modifier, Rect, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Clear, Paragraph, Widget, Wrap};
use ratatui::Terminal;
use std::io::{stdout, Stdout};
use std::sync::mpsc::Receiver;
use std::time::{Duration, Instant};

pub fn run(store: FileStore, config: Config) -> Result<()> {
    let location = store.storage().path().display().to_string();
    let mut terminal = setup_terminal()?;
    let mut app = App::new(store, config, location);
    let result = app.event_loop(&mut terminal);
    teardown_terminal(&mut terminal)?;
    result
}

struct App<S: Storage> {
    store: ProjectStore<S>,
    updates: Receiver<Snapshot>,
    location: String,
    filter: Filter,
    order: Vec<String>,
    grid: GridLayout,
    spatial: SpatialIndex,
    focus: FocusController,
    layout: LayoutConfig,
    scroll: u16,
    status: String,
    mode: Mode,
}

enum Mode {
    Normal,
    Tasks {
        project_id: String,
        cursor: usize,
    },
    EditingTask {
        project_id: String,
        task_id: Option<String>,
        field: FieldValue,
        cursor: usize,
    },
    ProjectForm(ProjectForm),
    ConfirmDelete {
        project_id: String,
    },
}

struct ProjectForm {
    editing: Option<String>,
    id: FieldValue,
    name: FieldValue,
    description: FieldValue,
    field: Field,
    errors: Vec<ValidationError>,
}

#[derive(Clone)]
struct FieldValue {
    value: String,
    cursor: usize,
}

/// Card placement in grid cells, relative to the top of the scrolled grid.
struct CardSlot {
    index: usize,
    x: u16,
    y: u16,
    width: u16,
    height: u16,
}

impl FieldValue {
    fn new(value: &str) -> Self {
        FieldValue {
            value: value.to_string(),
            cursor: value.len(),
        }
    }

    fn move_left(&mut self) {
        if self.cursor == 0 {
            return;
        }
        self.cursor = prev_grapheme(self.cursor, &self.value);
    }

    fn move_right(&mut self) {
        if self.cursor >= self.value.len() {
            return;
        }
        self.cursor = next_grapheme(self.cursor, &self.value);
    }

    fn backspace(&mut self) {
        if self.cursor == 0 {
            return;
        }
        let prev = prev_grapheme(self.cursor, &self.value);
        self.value.drain(prev..self.cursor);
        self.cursor = prev;
    }

    fn insert_char(&mut self, ch: char) {
        self.value.insert(self.cursor, ch);
        self.cursor += ch.len_utf8();
    }

    fn with_caret(&self) -> String {
        let mut text = self.value.clone();
        text.insert_str(self.cursor, "▌");
        text
    }

    fn apply_key(&mut self, key: &KeyEvent) {
        match key.code {
            KeyCode::Left => self.move_left(),
            KeyCode::Right => self.move_right(),
            KeyCode::Home => self.cursor = 0,
            KeyCode::End => self.cursor = self.value.len(),
            KeyCode::Backspace => self.backspace(),
            KeyCode::Char(c) => {
                if !key
                    .modifiers
                    .intersects(KeyModifiers::CONTROL | KeyModifiers::ALT)
                {
                    self.insert_char(c);
                }
            }
            _ => {}
        }
    }
}

impl ProjectForm {
    fn create() -> Self {
        ProjectForm {
            editing: None,
            id: FieldValue::new(""),
            name: FieldValue::new(""),
            description: FieldValue::new(""),
            field: Field::Id,
            errors: Vec::new(),
        }
    }

    fn edit(project: &Project) -> Self {
        ProjectForm {
            editing: Some(project.id.clone()),
            id: FieldValue::new(&project.id),
            name: FieldValue::new(&project.name),
            description: FieldValue::new(&project.description),
            field: Field::Name,
            errors: Vec::new(),
        }
    }

    // The ID is immutable once a project exists, so edit forms skip it.
    fn next_field(&mut self) {
        self.field = match (self.field, self.editing.is_some()) {
            (Field::Id, _) => Field::Name,
            (Field::Name, _) => Field::Description,
            (Field::Description, true) => Field::Name,
            (Field::Description, false) => Field::Id,
        };
    }

    fn prev_field(&mut self) {
        self.field = match (self.field, self.editing.is_some()) {
            (Field::Id, _) => Field::Description,
            (Field::Name, true) => Field::Description,
            (Field::Name, false) => Field::Id,
            (Field::Description, _) => Field::Name,
        };
    }

    fn active_field_mut(&mut self) -> &mut FieldValue {
        match self.field {
            Field::Id => &mut self.id,
            Field::Name => &mut self.name,
            Field::Description => &mut self.description,
        }
    }

    fn error_for(&self, field: Field) -> Option<&ValidationError> {
        self.errors.iter().find(|e| e.field() == field)
    }
}

impl<S: Storage> App<S> {
    fn new(mut store: ProjectStore<S>, config: Config, location: String) -> Self {
        let updates = store.subscribe();
        let filter = Filter::All;
        let order = visible_ids(&store, filter);
        let mut grid = GridLayout::new(config.layout.breakpoints);
        grid.set_item_count(order.len());
        let mut focus = FocusController::new();
        match order.first() {
            Some(first) => focus.focus_grid_item(first.clone()),
            None => focus.focus_region(FocusRegion::Toolbar),
        }
        let status = format!("Loaded {} projects from {}", order.len(), location);
        App {
            store,
            updates,
            location,
            filter,
            order,
            grid,
            spatial: SpatialIndex::new(config.layout.column_threshold, config.layout.row_threshold),
            focus,
            layout: config.layout,
            scroll: 0,
            status,
            mode: Mode::Normal,
        }
    }

    fn event_loop(&mut self, terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
        loop {
            terminal.draw(|f| self.draw(f))?;
            if event::poll(Duration::from_millis(200))? {
                match event::read()? {
                    Event::Key(key) => {
                        if key.kind != KeyEventKind::Press {
                            continue;
                        }
                        if self.handle_key(key)? {
                            break;
                        }
                    }
                    Event::Resize(width, _) => self.notify_resize(width),
                    _ => {}
                }
            }
        }
        Ok(())
    }

    fn notify_resize(&mut self, width: u16) {
        self.grid.resize(f64::from(width) * self.layout.cell_width);
    }

    fn handle_key(&mut self, key: KeyEvent) -> Result<bool> {
        let quit = match self.mode {
            Mode::Normal => self.handle_normal_key(key),
            Mode::Tasks { .. } => {
                self.handle_tasks_key(key);
                false
            }
            Mode::EditingTask { .. } => {
                self.handle_task_edit_key(key);
                false
            }
            Mode::ProjectForm(_) => {
                self.handle_form_key(key);
                false
            }
            Mode::ConfirmDelete { .. } => {
                self.handle_confirm_key(key);
                false
            }
        };
        self.sync_view();
        Ok(quit)
    }

    fn handle_normal_key(&mut self, key: KeyEvent) -> bool {
        match key.code {
            KeyCode::Char('q') => return true,
            KeyCode::Char('n') => {
                self.open_project_form(None);
                return false;
            }
            KeyCode::Char('e') => {
                match self.focused_project() {
                    Some(id) => self.open_project_form(Some(id)),
                    None => self.status = "No project selected to edit".into(),
                }
                return false;
            }
            KeyCode::Char('d') => {
                match self.focused_project() {
                    Some(id) => {
                        self.focus.open_modal();
                        self.status = format!("Delete {}? (y to confirm, n/Esc to cancel)", id);
                        self.mode = Mode::ConfirmDelete { project_id: id };
                    }
                    None => self.status = "No project selected to delete".into(),
                }
                return false;
            }
            _ => {}
        }

        match self.focus.handle_key(&key, &self.order, &self.spatial) {
            Intent::None => {}
            Intent::Toolbar(ToolbarAction::NewProject) => self.open_project_form(None),
            Intent::Toolbar(ToolbarAction::Quit) => return true,
            Intent::SelectFilter(filter) => self.set_filter(filter),
            Intent::OpenProject(id) => {
                self.status =
                    "Tasks: ↑↓ select, Space cycle status, Enter/e edit, a add, x delete, Esc back"
                        .into();
                self.mode = Mode::Tasks {
                    project_id: id,
                    cursor: 0,
                };
            }
        }
        false
    }

    fn handle_tasks_key(&mut self, key: KeyEvent) {
        let (project_id, cursor) = match &self.mode {
            Mode::Tasks { project_id, cursor } => (project_id.clone(), *cursor),
            _ => return,
        };
        let tasks = self.visible_task_ids(&project_id);
        let add_row = tasks.len();
        match key.code {
            KeyCode::Esc => {
                self.focus.focus_grid_item(project_id);
                self.mode = Mode::Normal;
                self.status = "Back to projects".into();
            }
            KeyCode::Up | KeyCode::Char('k') => {
                self.mode = Mode::Tasks {
                    project_id,
                    cursor: cursor.saturating_sub(1),
                };
            }
            KeyCode::Down | KeyCode::Char('j') => {
                self.mode = Mode::Tasks {
                    project_id,
                    cursor: (cursor + 1).min(add_row),
                };
            }
            KeyCode::Char(' ') => {
                if let Some(task_id) = tasks.get(cursor) {
                    match self.store.cycle_task_status(&project_id, task_id) {
                        Ok(status) => self.status = format!("Task is now {}", status.label()),
                        Err(err) => self.report(err),
                    }
                }
            }
            KeyCode::Enter | KeyCode::Char('e') => match tasks.get(cursor) {
                Some(task_id) => {
                    let current = self
                        .store
                        .project(&project_id)
                        .and_then(|p| p.task(task_id))
                        .map(|t| t.description.clone())
                        .unwrap_or_default();
                    self.mode = Mode::EditingTask {
                        project_id,
                        task_id: Some(task_id.clone()),
                        field: FieldValue::new(&current),
                        cursor,
                    };
                    self.status = "Enter to save (empty deletes), Esc to cancel".into();
                }
                None => self.start_new_task(project_id, add_row),
            },
            KeyCode::Char('a') => self.start_new_task(project_id, add_row),
            KeyCode::Char('x') | KeyCode::Delete => {
                if let Some(task_id) = tasks.get(cursor) {
                    if self.store.delete_task(&project_id, task_id) {
                        self.status = format!("Deleted task {}", task_id);
                    }
                }
            }
            _ => {}
        }
    }

    fn start_new_task(&mut self, project_id: String, add_row: usize) {
        self.mode = Mode::EditingTask {
            project_id,
            task_id: None,
            field: FieldValue::new(""),
            cursor: add_row,
        };
        self.status = "New task: Enter to add, Esc to finish".into();
    }

    fn handle_task_edit_key(&mut self, key: KeyEvent) {
        if !matches!(self.mode, Mode::EditingTask { .. }) {
            return;
        }
        let mut mode = std::mem::replace(&mut self.mode, Mode::Normal);
        let Mode::EditingTask {
            project_id,
            task_id,
            field,
            cursor,
        } = &mut mode
        else {
            return;
        };
        match key.code {
            KeyCode::Esc => {
                self.mode = Mode::Tasks {
                    project_id: project_id.clone(),
                    cursor: *cursor,
                };
                self.status = "Edit canceled".into();
                return;
            }
            KeyCode::Enter => match task_id {
                Some(task_id) => {
                    let blank = field.value.trim().is_empty();
                    match self
                        .store
                        .edit_task_description(project_id, task_id, &field.value)
                    {
                        Ok(()) => {
                            self.status = if blank {
                                format!("Deleted task {}", task_id)
                            } else {
                                format!("Updated task {}", task_id)
                            };
                            self.mode = Mode::Tasks {
                                project_id: project_id.clone(),
                                cursor: *cursor,
                            };
                        }
                        Err(err) => self.report(err),
                    }
                    return;
                }
                None => match self.store.add_task(project_id, &field.value) {
                    Ok(Some(new_id)) => {
                        self.status = format!("Added task {}", new_id);
                        *field = FieldValue::new("");
                        *cursor = self.visible_task_ids(project_id).len();
                    }
                    Ok(None) => {
                        self.mode = Mode::Tasks {
                            project_id: project_id.clone(),
                            cursor: *cursor,
                        };
                        return;
                    }
                    Err(err) => {
                        self.report(err);
                        return;
                    }
                },
            },
            _ => field.apply_key(&key),
        }
        self.mode = mode;
    }

    fn handle_form_key(&mut self, key: KeyEvent) {
        let mut mode = std::mem::replace(&mut self.mode, Mode::Normal);
        let mut close_form = false;
        if let Mode::ProjectForm(form) = &mut mode {
            match key.code {
                KeyCode::Esc => {
                    close_form = true;
                    self.status = "Canceled".into();
                }
                KeyCode::Tab | KeyCode::Down => form.next_field(),
                KeyCode::BackTab | KeyCode::Up => form.prev_field(),
                KeyCode::Enter => close_form = self.submit_form(form),
                _ => form.active_field_mut().apply_key(&key),
            }
        }
        if close_form {
            self.focus.close_modal();
        } else {
            self.mode = mode;
        }
    }

    fn submit_form(&mut self, form: &mut ProjectForm) -> bool {
        let name = form.name.value.clone();
        let description = form.description.value.clone();
        let id = match form.editing {
            Some(_) => String::new(),
            None => form.id.value.clone(),
        };
        form.errors = self.store.validate_draft(&id, &name, &description);
        if !form.errors.is_empty() {
            self.status = "Fix the highlighted fields".into();
            return false;
        }
        let result = match &form.editing {
            None => self
                .store
                .create_project(&name, &description, Some(&id))
                .map(|p| format!("Created project {}", p.id)),
            Some(existing) => self
                .store
                .edit_project(existing, &name, &description)
                .map(|_| format!("Updated project {}", existing)),
        };
        match result {
            Ok(message) => {
                self.status = message;
                true
            }
            Err(StoreError::Validation(err)) => {
                form.errors.push(err);
                false
            }
            Err(err) => {
                self.report(err);
                true
            }
        }
    }

    fn handle_confirm_key(&mut self, key: KeyEvent) {
        let project_id = match &self.mode {
            Mode::ConfirmDelete { project_id } => project_id.clone(),
            _ => return,
        };
        match key.code {
            KeyCode::Char('y') | KeyCode::Enter => {
                let before = self.order.clone();
                self.focus.close_modal();
                self.focus.item_deleted(&before, &project_id);
                if self.store.delete_project(&project_id) {
                    self.status = format!("Deleted {}", project_id);
                }
                self.mode = Mode::Normal;
            }
            KeyCode::Char('n') | KeyCode::Esc => {
                self.focus.close_modal();
                self.status = "Delete canceled".into();
                self.mode = Mode::Normal;
            }
            _ => {}
        }
    }

    fn open_project_form(&mut self, project_id: Option<String>) {
        let form = match project_id.as_deref().and_then(|id| self.store.project(id)) {
            Some(project) => ProjectForm::edit(project),
            None => ProjectForm::create(),
        };
        self.focus.open_modal();
        self.status = "Tab/Shift-Tab move, Enter save, Esc cancel".into();
        self.mode = Mode::ProjectForm(form);
    }

    fn set_filter(&mut self, filter: Filter) {
        if self.filter == filter {
            return;
        }
        self.filter = filter;
        self.status = format!("Showing {}", filter.label().to_lowercase());
        self.refresh_order();
    }

    fn report(&mut self, err: StoreError) {
        match err {
            StoreError::NotFound(err) => {
                debug!("ignoring action on missing item: {}", err);
                self.status = "That item no longer exists".into();
                self.mode = Mode::Normal;
            }
            StoreError::Validation(err) => self.status = err.to_string(),
        }
    }

    /// Drains store snapshots; any new one means the visible order must be
    /// recomputed.
    fn sync_view(&mut self) {
        if let Some(snapshot) = self.updates.try_iter().last() {
            debug!(
                "refreshing view at revision {} ({} projects)",
                snapshot.revision,
                snapshot.projects.len()
            );
            self.refresh_order();
        }
    }

    fn refresh_order(&mut self) {
        let next = visible_ids(&self.store, self.filter);
        self.focus.reconcile(&self.order, &next);
        self.grid.set_item_count(next.len());
        self.spatial.retain(next.iter().map(String::as_str));
        self.order = next;
        self.settle_mode();
    }

    /// Leaves task mode when its project disappeared and clamps the cursor.
    fn settle_mode(&mut self) {
        let (project_id, cursor) = match &mut self.mode {
            Mode::Tasks { project_id, cursor } | Mode::EditingTask { project_id, cursor, .. } => {
                (project_id.clone(), cursor)
            }
            _ => return,
        };
        if !self.order.contains(&project_id) {
            self.mode = Mode::Normal;
            return;
        }
        let len = visible_task_count(&self.store, &project_id, self.filter);
        *cursor = (*cursor).min(len);
    }

    fn focused_project(&self) -> Option<String> {
        if self.focus.region() != FocusRegion::Grid {
            return None;
        }
        let id = self.focus.grid_focus()?;
        self.order.iter().find(|o| o.as_str() == id).cloned()
    }

    fn visible_task_ids(&self, project_id: &str) -> Vec<String> {
        self.store
            .project(project_id)
            .map(|p| {
                p.visible_tasks(self.filter)
                    .into_iter()
                    .map(|t| t.id.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn draw(&mut self, f: &mut ratatui::Frame<'_>) {
        let layout = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(2),
                Constraint::Length(1),
                Constraint::Length(2),
                Constraint::Min(3),
                Constraint::Length(4),
            ])
            .split(f.size());

        self.draw_header(f, layout[0]);
        self.draw_toolbar(f, layout[1]);
        self.draw_filter(f, layout[2]);
        self.draw_grid(f, layout[3]);
        self.draw_footer(f, layout[4]);

        match &self.mode {
            Mode::ProjectForm(form) => self.draw_form(f, form),
            Mode::ConfirmDelete { project_id } => self.draw_confirm(f, project_id),
            _ => {}
        }
    }

    fn draw_header(&self, f: &mut ratatui::Frame<'_>, area: Rect) {
        let saved = self
            .store
            .last_save()
            .map(|at| format!("saved {}", format_elapsed(at)))
            .unwrap_or_else(|| "no changes".into());
        let title = Line::from(vec![
            Span::styled(
                "taskgrid ",
                Style::default()
                    .fg(Color::Cyan)
                    .add_modifier(Modifier::BOLD),
            ),
            Span::styled(
                format!("{} projects", self.store.projects().len()),
                Style::default().add_modifier(Modifier::BOLD),
            ),
            Span::styled(
                format!(" (rev {})", self.store.revision()),
                Style::default().fg(Color::DarkGray),
            ),
            Span::raw("  •  "),
            Span::styled(self.location.clone(), Style::default().fg(Color::DarkGray)),
            Span::raw("  •  "),
            Span::styled(saved, Style::default().fg(Color::Gray)),
            Span::raw("  •  "),
            Span::styled(
                format!("{} columns", self.grid.column_count()),
                Style::default().fg(Color::Magenta),
            ),
        ]);
        let block = Block::default()
            .borders(Borders::BOTTOM)
            .border_style(Style::default().fg(Color::DarkGray));
        let paragraph = Paragraph::new(title)
            .alignment(Alignment::Center)
            .block(block);
        f.render_widget(paragraph, area);
    }

    fn draw_toolbar(&self, f: &mut ratatui::Frame<'_>, area: Rect) {
        let active = self.focus.region() == FocusRegion::Toolbar;
        let mut spans = Vec::new();
        for (idx, action) in TOOLBAR_ACTIONS.iter().enumerate() {
            let style = if active && idx == self.focus.toolbar_index() {
                Style::default()
                    .bg(Color::Cyan)
                    .fg(Color::Black)
                    .add_modifier(Modifier::BOLD)
            } else {
                Style::default().fg(Color::Gray)
            };
            spans.push(Span::styled(format!("[ {} ]", action.label()), style));
            spans.push(Span::raw(" "));
        }
        f.render_widget(Paragraph::new(Line::from(spans)), area);
    }

    fn draw_filter(&self, f: &mut ratatui::Frame<'_>, area: Rect) {
        if self.store.projects().is_empty() {
            return;
        }
        let active = self.focus.region() == FocusRegion::Filter;
        let mut spans = vec![Span::styled("Filter: ", Style::default().fg(Color::DarkGray))];
        for (idx, filter) in Filter::ALL.iter().enumerate() {
            let mark = if *filter == self.filter { "(•)" } else { "( )" };
            let mut style = match filter.status() {
                Some(status) => status_style(status),
                None => Style::default().fg(Color::White),
            };
            if active && idx == self.focus.filter_index() {
                style = style.add_modifier(Modifier::REVERSED | Modifier::BOLD);
            }
            spans.push(Span::styled(format!("{} {}", mark, filter.label()), style));
            spans.push(Span::raw("  "));
        }
        f.render_widget(Paragraph::new(Line::from(spans)), area);
    }

    fn draw_grid(&mut self, f: &mut ratatui::Frame<'_>, area: Rect) {
        self.spatial.begin_pass();
        self.grid.resize(f64::from(area.width) * self.layout.cell_width);

        if self.store.projects().is_empty() {
            let msg = Paragraph::new(vec![
                Line::from("Create your first project to get started!"),
                Line::from(Span::styled(
                    "Press n or activate [ New project ]",
                    Style::default().fg(Color::DarkGray),
                )),
            ])
            .alignment(Alignment::Center)
            .block(Block::default().borders(Borders::ALL).title("Projects"));
            f.render_widget(msg, area);
            return;
        }
        if self.order.is_empty() {
            let msg = Paragraph::new(format!(
                "No tasks found with current filter: {}",
                self.filter.label()
            ))
            .alignment(Alignment::Center)
            .block(Block::default().borders(Borders::ALL).title("Projects"));
            f.render_widget(msg, area);
            return;
        }

        let projects: Vec<&Project> = self
            .order
            .iter()
            .filter_map(|id| self.store.project(id))
            .collect();
        self.grid.set_item_count(projects.len());

        let expanded = match &self.mode {
            Mode::Tasks { project_id, .. } | Mode::EditingTask { project_id, .. } => {
                Some(project_id.as_str())
            }
            _ => None,
        };
        let col_width = (area.width / self.grid.column_count() as u16).max(1);
        let mut column_heights = vec![0u16; self.grid.column_count()];
        let mut slots = Vec::with_capacity(projects.len());
        for index in self.grid.render_order() {
            let (Some(project), Some((col, _))) = (projects.get(index), self.grid.cell_of(index))
            else {
                continue;
            };
            let height = card_height(project, self.filter, expanded == Some(project.id.as_str()));
            let y = column_heights[col];
            slots.push(CardSlot {
                index,
                x: col as u16 * col_width,
                y,
                width: col_width.saturating_sub(1).max(1),
                height,
            });
            column_heights[col] = y.saturating_add(height);
        }

        for slot in &slots {
            self.spatial.record(ItemPosition {
                id: projects[slot.index].id.clone(),
                x: f64::from(slot.x) * self.layout.cell_width,
                y: f64::from(slot.y) * self.layout.cell_height,
                width: f64::from(slot.width) * self.layout.cell_width,
                height: f64::from(slot.height) * self.layout.cell_height,
            });
        }

        let focused = if self.focus.region() == FocusRegion::Grid {
            self.focus.grid_focus()
        } else {
            None
        };
        let viewport = area.height;
        if let Some(slot) = slots
            .iter()
            .find(|s| Some(projects[s.index].id.as_str()) == focused)
        {
            if slot.y < self.scroll {
                self.scroll = slot.y;
            } else if slot.y.saturating_add(slot.height) > self.scroll.saturating_add(viewport) {
                self.scroll = slot
                    .y
                    .saturating_add(slot.height)
                    .saturating_sub(viewport)
                    .min(slot.y);
            }
        }
        // The order may have shrunk since the last frame.
        let content_height = column_heights.iter().copied().max().unwrap_or(0);
        self.scroll = self.scroll.min(content_height.saturating_sub(viewport));

        let bottom = self.scroll.saturating_add(viewport);
        let frame_buf = f.buffer_mut();
        for slot in &slots {
            if slot.y.saturating_add(slot.height) <= self.scroll || slot.y >= bottom {
                continue;
            }
            let project = projects[slot.index];
            let is_focused = focused == Some(project.id.as_str());
            let card_area = Rect::new(0, 0, slot.width, slot.height);
            let mut card_buf = Buffer::empty(card_area);
            render_card(&mut card_buf, card_area, project, self.filter, is_focused, &self.mode);

            // Cards straddling the viewport edges are clipped row by row.
            let first_row = self.scroll.saturating_sub(slot.y);
            let end_row = slot.height.min(bottom - slot.y);
            for row in first_row..end_row {
                let y = area.y + (slot.y.saturating_add(row) - self.scroll);
                for col in 0..slot.width {
                    *frame_buf.get_mut(area.x + slot.x + col, y) = card_buf.get(col, row).clone();
                }
            }
        }
    }

    fn draw_footer(&self, f: &mut ratatui::Frame<'_>, area: Rect) {
        let rows = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Length(2), Constraint::Length(2)])
            .split(area);

        let help_bar = Paragraph::new(self.footer_help_line())
            .alignment(Alignment::Center)
            .block(
                Block::default()
                    .borders(Borders::TOP)
                    .border_style(Style::default().fg(Color::DarkGray)),
            );
        f.render_widget(help_bar, rows[0]);

        let status = Paragraph::new(self.status.clone())
            .wrap(Wrap { trim: true })
            .block(
                Block::default()
                    .borders(Borders::TOP)
                    .border_style(Style::default().fg(Color::DarkGray)),
            );
        f.render_widget(status, rows[1]);
    }

    fn footer_help_line(&self) -> Line<'static> {
        let key = Style::default().fg(Color::LightCyan);
        let pairs: &[(&str, &str)] = match self.mode {
            Mode::Normal => &[
                ("Tab", " region  "),
                ("←↑↓→", " move  "),
                ("Ctrl+Home/End", " first/last  "),
                ("Enter", " open  "),
                ("n", " new  "),
                ("e", " edit  "),
                ("d", " delete  "),
                ("q", " quit"),
            ],
            Mode::Tasks { .. } => &[
                ("↑↓", " task  "),
                ("Space", " cycle  "),
                ("Enter/e", " edit  "),
                ("a", " add  "),
                ("x", " delete  "),
                ("Esc", " back"),
            ],
            Mode::EditingTask { .. } => &[("Enter", " save  "), ("Esc", " cancel")],
            Mode::ProjectForm(_) => &[
                ("Tab", " next field  "),
                ("Enter", " save  "),
                ("Esc", " cancel"),
            ],
            Mode::ConfirmDelete { .. } => &[("y", " delete  "), ("n/Esc", " keep")],
        };
        let spans: Vec<Span<'static>> = pairs
            .iter()
            .flat_map(|(k, label)| [Span::styled(*k, key), Span::raw(*label)])
            .collect();
        Line::from(spans)
    }

    fn draw_form(&self, f: &mut ratatui::Frame<'_>, form: &ProjectForm) {
        let area = centered_rect(70, 60, f.size());
        let title = if form.editing.is_some() {
            "Edit Project"
        } else {
            "New Project"
        };
        let intro = if form.editing.is_some() {
            "Update your project details below."
        } else {
            "Leave the ID empty to auto-generate one."
        };
        let mut lines = vec![
            Line::from(Span::styled(intro, Style::default().fg(Color::Gray))),
            Line::from(""),
        ];
        let fields: &[(Field, &FieldValue)] = &[
            (Field::Id, &form.id),
            (Field::Name, &form.name),
            (Field::Description, &form.description),
        ];
        for (field, value) in fields {
            let read_only = *field == Field::Id && form.editing.is_some();
            let label = if read_only {
                format!("{} (fixed)", field)
            } else {
                field.to_string()
            };
            lines.push(field_line(&label, value, form.field == *field && !read_only));
            if let Some(err) = form.error_for(*field) {
                lines.push(Line::from(Span::styled(
                    format!("  {}", err),
                    Style::default().fg(Color::LightRed),
                )));
            }
        }
        lines.push(Line::from(""));
        lines.push(Line::from(Span::styled(
            "Enter to save • Esc to cancel • Tab/Shift-Tab to move",
            Style::default().fg(Color::Gray),
        )));
        let dialog = Paragraph::new(lines)
            .block(
                Block::default()
                    .title(Span::styled(
                        title,
                        Style::default()
                            .fg(Color::Cyan)
                            .add_modifier(Modifier::BOLD),
                    ))
                    .borders(Borders::ALL)
                    .border_style(Style::default().fg(Color::Cyan)),
            )
            .wrap(Wrap { trim: true });

        f.render_widget(Clear, area);
        f.render_widget(dialog, area);
    }

    fn draw_confirm(&self, f: &mut ratatui::Frame<'_>, project_id: &str) {
        let area = centered_rect(50, 30, f.size());
        let name = self
            .store
            .project(project_id)
            .map(|p| p.name.clone())
            .unwrap_or_else(|| project_id.to_string());
        let body = vec![
            Line::from(Span::styled(
                format!("Delete \"{}\"?", name),
                Style::default()
                    .fg(Color::LightRed)
                    .add_modifier(Modifier::BOLD),
            )),
            Line::from("This action cannot be undone."),
            Line::from(""),
            Line::from("Press y to confirm, n or Esc to cancel"),
        ];
        let dialog = Paragraph::new(body).alignment(Alignment::Center).block(
            Block::default()
                .title(Span::styled(
                    "Delete Project",
                    Style::default()
                        .fg(Color::LightRed)
                        .add_modifier(Modifier::BOLD),
                ))
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::LightRed)),
        );
        f.render_widget(Clear, area);
        f.render_widget(dialog, area);
    }
}

fn visible_ids<S: Storage>(store: &ProjectStore<S>, filter: Filter) -> Vec<String> {
    store
        .filtered(filter)
        .into_iter()
        .map(|p| p.id.clone())
        .collect()
}

fn visible_task_count<S: Storage>(store: &ProjectStore<S>, project_id: &str, filter: Filter) -> usize {
    store
        .project(project_id)
        .map_or(0, |p| p.visible_tasks(filter).len())
}

/// Rows a card needs: borders, description, task lines, the hidden-task
/// notice and, while its tasks are open, the add-task row.
fn card_height(project: &Project, filter: Filter, expanded: bool) -> u16 {
    let visible = project.visible_tasks(filter).len();
    let mut lines = 1 + visible;
    if project.tasks.is_empty() {
        lines += 1;
    }
    if project.hidden_count(filter) > 0 {
        lines += 1;
    }
    if expanded {
        lines += 1;
    }
    u16::try_from(lines + 2).unwrap_or(u16::MAX)
}

fn render_card(
    buf: &mut Buffer,
    area: Rect,
    project: &Project,
    filter: Filter,
    focused: bool,
    mode: &Mode,
) {
    let inner_width = area.width.saturating_sub(2) as usize;
    let (cursor, editing) = match mode {
        Mode::Tasks { project_id, cursor } if *project_id == project.id => (Some(*cursor), None),
        Mode::EditingTask {
            project_id,
            task_id,
            field,
            cursor,
        } if *project_id == project.id => (Some(*cursor), Some((task_id.as_deref(), field))),
        _ => (None, None),
    };
    let highlight = Style::default()
        .bg(Color::Rgb(40, 44, 56))
        .add_modifier(Modifier::BOLD);

    let mut lines = vec![Line::from(Span::styled(
        truncate_text(&project.description, inner_width),
        Style::default().fg(Color::Gray),
    ))];
    if project.tasks.is_empty() {
        lines.push(Line::from(Span::styled(
            "(no tasks)",
            Style::default().fg(Color::DarkGray),
        )));
    }
    for (idx, task) in project.visible_tasks(filter).into_iter().enumerate() {
        let base = if cursor == Some(idx) {
            highlight
        } else {
            Style::default()
        };
        let text = match editing {
            Some((Some(id), field)) if id == task.id => field.with_caret(),
            _ => task.description.clone(),
        };
        lines.push(Line::from(vec![
            Span::styled(
                format!("{} ", task.status.marker()),
                base.patch(status_style(task.status)),
            ),
            Span::styled(truncate_text(&text, inner_width.saturating_sub(4)), base),
        ]));
    }
    let hidden = project.hidden_count(filter);
    if hidden > 0 {
        lines.push(Line::from(Span::styled(
            format!(
                "{} task{} hidden by current filter",
                hidden,
                if hidden == 1 { "" } else { "s" }
            ),
            Style::default().fg(Color::DarkGray),
        )));
    }
    if let Some(cursor) = cursor {
        let add_row = project.visible_tasks(filter).len();
        let base = if cursor == add_row {
            highlight
        } else {
            Style::default().fg(Color::DarkGray)
        };
        let text = match editing {
            Some((None, field)) => format!("+ {}", field.with_caret()),
            _ => "+ Add new task...".into(),
        };
        lines.push(Line::from(Span::styled(
            truncate_text(&text, inner_width),
            base,
        )));
    }

    let border = if focused || cursor.is_some() {
        Style::default()
            .fg(Color::Cyan)
            .add_modifier(Modifier::BOLD)
    } else {
        Style::default().fg(Color::DarkGray)
    };
    let card = Paragraph::new(lines).block(
        Block::default()
            .title(Span::styled(
                truncate_text(&project.name, inner_width),
                Style::default().add_modifier(Modifier::BOLD),
            ))
            .borders(Borders::ALL)
            .border_style(border),
    );
    Clear.render(area, buf);
    card.render(area, buf);
}

fn status_style(status: TaskStatus) -> Style {
    match status {
        TaskStatus::Todo => Style::default().fg(Color::LightYellow),
        TaskStatus::Doing => Style::default().fg(Color::LightBlue),
        TaskStatus::Done => Style::default().fg(Color::LightGreen),
    }
}

fn setup_terminal() -> Result<Terminal<CrosstermBackend<Stdout>>> {
    enable_raw_mode()?;
    let mut stdout = stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let terminal = Terminal::new(backend)?;
    Ok(terminal)
}

fn teardown_terminal(terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    Ok(())
}

fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(r);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1])[1]
}

fn prev_grapheme(cursor: usize, text: &str) -> usize {
    if cursor == 0 {
        return 0;
    }
    let mut prev = 0;
    for (idx, _) in text.char_indices() {
        if idx >= cursor {
            break;
        }
        prev = idx;
    }
    prev
}

fn next_grapheme(cursor: usize, text: &str) -> usize {
    for (idx, ch) in text.char_indices() {
        if idx > cursor {
            return idx;
        }
        if idx == cursor {
            return cursor + ch.len_utf8();
        }
    }
    text.len()
}

fn truncate_text(text: &str, max: usize) -> String {
    if max == 0 {
        return String::new();
    }
    if text.chars().count() <= max {
        return text.to_string();
    }
    let keep = max.saturating_sub(3);
    let mut out: String = text.chars().take(keep).collect();
    out.push_str(&"...".chars().take(max - keep).collect::<String>());
    out
}

fn field_line(label: &str, field: &FieldValue, active: bool) -> Line<'static> {
    let label_style = Style::default()
        .fg(Color::Gray)
        .add_modifier(Modifier::BOLD | Modifier::DIM);
    let value_style = Style::default().fg(if active { Color::Cyan } else { Color::White });
    let text = if active {
        field.with_caret()
    } else {
        field.value.clone()
    };
    Line::from(vec![
        Span::styled(format!("{}: ", label), label_style),
        Span::styled(text, value_style),
    ])
}

fn format_elapsed(last: Instant) -> String {
    let secs = last.elapsed().as_secs();
    if secs < 60 {
        format!("{}s ago", secs)
    } else if secs < 3600 {
        format!("{}m ago", secs / 60)
    } else {
        format!("{}h ago", secs / 3600)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::IdPolicy;
    use crate::storage::MemoryStorage;
    use pretty_assertions::assert_eq;
    use ratatui::backend::TestBackend;

    const W: u16 = 200;
    const H: u16 = 48;

    fn app_with(count: usize) -> App<MemoryStorage> {
        let mut store = ProjectStore::load(MemoryStorage::default(), IdPolicy::default());
        for i in 0..count {
            store
                .create_project(&format!("Project {i}"), "desc", Some(&format!("p{i}")))
                .unwrap();
        }
        App::new(store, Config::default(), "memory".into())
    }

    fn render(app: &mut App<MemoryStorage>, w: u16, h: u16) -> String {
        let mut terminal = Terminal::new(TestBackend::new(w, h)).unwrap();
        terminal.draw(|f| app.draw(f)).unwrap();
        let buf = terminal.backend().buffer().clone();
        buf.content
            .chunks(buf.area.width as usize)
            .map(|row| {
                let s: String = row.iter().map(|cell| cell.symbol()).collect();
                s.trim_end().to_string()
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn press(app: &mut App<MemoryStorage>, code: KeyCode) {
        app.handle_key(KeyEvent::new(code, KeyModifiers::NONE)).unwrap();
    }

    fn type_text(app: &mut App<MemoryStorage>, text: &str) {
        for c in text.chars() {
            press(app, KeyCode::Char(c));
        }
    }

    #[test]
    fn grid_columns_follow_terminal_width() {
        let mut app = app_with(5);
        render(&mut app, W, H);
        assert_eq!(app.grid.column_count(), 4);
        assert_eq!(app.spatial.len(), 5);

        // 120 cells * 8 = 960 units: the two-column band
        render(&mut app, 120, H);
        assert_eq!(app.grid.column_count(), 2);
        assert_eq!(app.grid.columns(), &[vec![0, 2, 4], vec![1, 3]]);

        app.notify_resize(140);
        assert_eq!(app.grid.column_count(), 3);
    }

    #[test]
    fn arrows_move_between_cards_by_geometry() {
        let mut app = app_with(5);
        render(&mut app, W, H);
        assert_eq!(app.focus.grid_focus(), Some("p0"));

        press(&mut app, KeyCode::Down);
        assert_eq!(app.focus.grid_focus(), Some("p4"));
        // p1 sits a whole card higher than p4: outside the row band
        press(&mut app, KeyCode::Right);
        assert_eq!(app.focus.grid_focus(), Some("p4"));
        press(&mut app, KeyCode::Up);
        press(&mut app, KeyCode::Right);
        assert_eq!(app.focus.grid_focus(), Some("p1"));

        app.handle_key(KeyEvent::new(KeyCode::End, KeyModifiers::CONTROL))
            .unwrap();
        assert_eq!(app.focus.grid_focus(), Some("p4"));
    }

    #[test]
    fn deleting_focused_project_focuses_its_successor() {
        let mut app = app_with(3);
        render(&mut app, W, H);
        press(&mut app, KeyCode::Right);
        assert_eq!(app.focus.grid_focus(), Some("p1"));

        press(&mut app, KeyCode::Char('d'));
        press(&mut app, KeyCode::Char('y'));
        assert!(app.store.project("p1").is_none());
        assert_eq!(app.order, vec!["p0", "p2"]);
        assert_eq!(app.focus.grid_focus(), Some("p2"));
        assert_eq!(app.focus.region(), FocusRegion::Grid);

        render(&mut app, W, H);
        assert_eq!(app.spatial.len(), 2);
        assert!(app.spatial.position("p1").is_none());
    }

    #[test]
    fn closing_a_modal_restores_focus() {
        let mut app = app_with(3);
        render(&mut app, W, H);
        press(&mut app, KeyCode::Right);
        press(&mut app, KeyCode::Char('n'));
        assert!(matches!(app.mode, Mode::ProjectForm(_)));
        press(&mut app, KeyCode::Esc);
        assert!(matches!(app.mode, Mode::Normal));
        assert_eq!(app.focus.region(), FocusRegion::Grid);
        assert_eq!(app.focus.grid_focus(), Some("p1"));
    }

    #[test]
    fn project_form_creates_with_generated_id() {
        let mut app = app_with(0);
        press(&mut app, KeyCode::Char('n'));
        press(&mut app, KeyCode::Tab);
        type_text(&mut app, "Launch");
        press(&mut app, KeyCode::Tab);
        type_text(&mut app, "Q1");
        press(&mut app, KeyCode::Enter);

        assert!(matches!(app.mode, Mode::Normal));
        assert_eq!(app.store.projects().len(), 1);
        let project = &app.store.projects()[0];
        assert_eq!(project.name, "Launch");
        assert!(IdPolicy::default().validate(&project.id).is_ok());
        assert_eq!(app.order.len(), 1);
    }

    #[test]
    fn project_form_shows_inline_errors() {
        let mut app = app_with(1);
        press(&mut app, KeyCode::Char('n'));
        type_text(&mut app, "p0");
        press(&mut app, KeyCode::Enter);
        let Mode::ProjectForm(form) = &app.mode else {
            panic!("form should stay open");
        };
        assert!(form.error_for(Field::Id).is_some());
        assert!(form.error_for(Field::Name).is_some());
        assert!(form.error_for(Field::Description).is_some());
        let screen = render(&mut app, W, H);
        assert!(screen.contains("Project name is required"));
        assert_eq!(app.store.projects().len(), 1);
    }

    #[test]
    fn task_mode_adds_cycles_and_deletes() {
        let mut app = app_with(1);
        render(&mut app, W, H);
        press(&mut app, KeyCode::Enter);
        assert!(matches!(app.mode, Mode::Tasks { .. }));

        press(&mut app, KeyCode::Char('a'));
        type_text(&mut app, "Write brief");
        press(&mut app, KeyCode::Enter);
        press(&mut app, KeyCode::Esc);
        press(&mut app, KeyCode::Up);
        press(&mut app, KeyCode::Char(' '));
        let task = &app.store.project("p0").unwrap().tasks[0];
        assert_eq!(task.description, "Write brief");
        assert_eq!(task.status, TaskStatus::Doing);

        // blanking the description removes the task
        press(&mut app, KeyCode::Enter);
        for _ in 0.."Write brief".len() {
            press(&mut app, KeyCode::Backspace);
        }
        press(&mut app, KeyCode::Enter);
        assert!(app.store.project("p0").unwrap().tasks.is_empty());
        assert!(matches!(app.mode, Mode::Tasks { cursor: 0, .. }));
    }

    #[test]
    fn filter_change_moves_focus_to_visible_project() {
        let mut app = app_with(2);
        app.store.add_task("p1", "todo item").unwrap();
        app.sync_view();
        render(&mut app, W, H);
        assert_eq!(app.focus.grid_focus(), Some("p0"));

        press(&mut app, KeyCode::Tab);
        press(&mut app, KeyCode::Tab);
        assert_eq!(app.focus.region(), FocusRegion::Filter);
        press(&mut app, KeyCode::Right);
        press(&mut app, KeyCode::Enter);
        assert_eq!(app.filter, Filter::Todo);
        assert_eq!(app.order, vec!["p1"]);
        assert_eq!(app.focus.grid_focus(), Some("p1"));

        press(&mut app, KeyCode::Right);
        press(&mut app, KeyCode::Enter);
        let screen = render(&mut app, W, H);
        assert!(screen.contains("No tasks found with current filter: Doing"));
    }

    #[test]
    fn hidden_tasks_are_counted_on_cards() {
        let mut app = app_with(1);
        app.store.add_task("p0", "one").unwrap();
        let second = app.store.add_task("p0", "two").unwrap().unwrap();
        app.store.cycle_task_status("p0", &second).unwrap();
        app.sync_view();
        app.set_filter(Filter::Doing);
        let screen = render(&mut app, W, H);
        assert!(screen.contains("1 task hidden by current filter"));
        assert!(screen.contains("two"));
    }

    #[test]
    fn empty_store_prompts_for_first_project() {
        let mut app = app_with(0);
        let screen = render(&mut app, W, H);
        assert!(screen.contains("Create your first project to get started!"));
        assert_eq!(app.focus.region(), FocusRegion::Toolbar);
        press(&mut app, KeyCode::Enter);
        assert!(matches!(app.mode, Mode::ProjectForm(_)));
    }

    /// Twenty cards in a single column; only the first two have todo tasks.
    fn tall_column() -> App<MemoryStorage> {
        let mut store = ProjectStore::load(MemoryStorage::default(), IdPolicy::default());
        for i in 0..20 {
            store
                .create_project(&format!("Project {i}"), "desc", Some(&format!("p{i:02}")))
                .unwrap();
        }
        store.add_task("p00", "alpha").unwrap();
        store.add_task("p01", "beta").unwrap();
        App::new(store, Config::default(), "memory".into())
    }

    #[test]
    fn narrowing_the_filter_pulls_scrolled_grid_back_into_view() {
        let mut app = tall_column();
        render(&mut app, 80, H);
        assert_eq!(app.grid.column_count(), 1);
        for _ in 0..19 {
            press(&mut app, KeyCode::Down);
        }
        assert_eq!(app.focus.grid_focus(), Some("p19"));
        render(&mut app, 80, H);
        assert!(app.scroll > 0);

        press(&mut app, KeyCode::Tab);
        press(&mut app, KeyCode::Tab);
        press(&mut app, KeyCode::Right);
        press(&mut app, KeyCode::Enter);
        assert_eq!(app.order, vec!["p00", "p01"]);

        let screen = render(&mut app, 80, H);
        assert_eq!(app.scroll, 0);
        assert!(screen.contains("alpha"));
        assert!(screen.contains("beta"));
    }

    #[test]
    fn cards_cut_by_the_top_edge_are_drawn_clipped() {
        let mut app = tall_column();
        render(&mut app, 80, H);
        for _ in 0..19 {
            press(&mut app, KeyCode::Down);
        }
        render(&mut app, 80, H);
        // 20 cards of 4 rows against a 39-row viewport: p10 starts one row
        // above the top edge.
        assert_eq!(app.scroll, 41);
        let screen = render(&mut app, 80, H);
        let first_grid_row = screen.lines().nth(5).unwrap();
        assert!(first_grid_row.starts_with("│desc"), "{first_grid_row:?}");
    }

    #[test]
    fn truncate_text_respects_width() {
        assert_eq!(truncate_text("abcdef", 10), "abcdef");
        assert_eq!(truncate_text("abcdefghij", 6), "abc...");
        assert_eq!(truncate_text("abc", 0), "");
    }
}
