use std::collections::HashMap;
use std::mem;
use std::path::{Path, PathBuf};

use anyhow::Result;
use crossterm::event::KeyCode;
use open::that as open_link;
use ratatui::layout::{Alignment, Constraint, Direction, Layout, Rect};
use ratatui::prelude::*;
use ratatui::text::{Line, Span};
use ratatui::widgets::{
    Block, Borders, Cell, Clear, List, ListItem, ListState, Paragraph, Row, Table, TableState,
    Tabs, Wrap,
};
use ratatui::Frame;
use rusqlite::Connection;
use tracing::{error, info, warn};

use crate::db::{
    assign_items, create_backup, create_item, create_student, delete_student, fetch_holding_counts,
    fetch_items, fetch_items_for_student, fetch_outstanding, fetch_student, fetch_students,
    import_students_csv, release_all_for_student, release_item, restore_backup, set_item_status,
    update_item, update_student,
};
use crate::models::{Item, ItemKind, ItemRef, ItemStatus, Section, Student};

use super::forms::{
    ConfirmStudentDelete, ItemForm, Notice, PathPrompt, ReleaseDialog, StudentField, StudentForm,
};
use super::helpers::{centered_rect, key_hints, mailto_link, status_style, surface_error};
use super::screens::{
    next_section_filter, AssignState, BackupPicker, InventoryScreen, OutstandingScreen, StudentDetailScreen,
    StudentsScreen,
};

/// Footer space reserved for status messages and instructions.
const FOOTER_HEIGHT: u16 = 3;
/// Rows skipped by PageUp/PageDown.
const PAGE: isize = 10;

/// High-level navigation states.
enum Screen {
    Students,
    StudentDetail(StudentDetailScreen),
    Inventory(InventoryScreen),
    Outstanding(OutstandingScreen),
}

/// Popups and input modes layered over the current screen.
#[derive(Clone)]
enum Mode {
    Normal,
    AddingStudent(StudentForm),
    EditingStudent(StudentForm),
    ConfirmStudentDelete(ConfirmStudentDelete),
    AddingItem(ItemForm),
    EditingItem { item: Item, form: ItemForm },
    Assigning(AssignState),
    Releasing(ReleaseDialog),
    Notice(Notice),
    Searching(SearchState),
    PickingBackup(BackupPicker),
    ImportingCsv(PathPrompt),
}

/// Which screen the search is targeting.
#[derive(Clone, Copy)]
enum SearchTarget {
    Students,
    Inventory,
}

/// State for an active inline search.
#[derive(Clone)]
struct SearchState {
    target: SearchTarget,
    query: String,
}

/// Holds the footer message text plus its severity.
struct StatusMessage {
    text: String,
    kind: StatusKind,
}

/// Severity levels shown in the footer.
enum StatusKind {
    Info,
    Error,
}

impl StatusKind {
    fn style(&self) -> Style {
        match self {
            StatusKind::Info => Style::default().fg(Color::Green),
            StatusKind::Error => Style::default().fg(Color::Red),
        }
    }
}

fn items_label(count: usize) -> String {
    if count == 1 {
        "1 item".to_string()
    } else {
        format!("{count} items")
    }
}

fn or_dash(value: &str) -> &str {
    if value.trim().is_empty() {
        "-"
    } else {
        value
    }
}

fn filter_from(query: &str) -> Option<String> {
    if query.trim().is_empty() {
        None
    } else {
        Some(query.to_string())
    }
}

fn render_table(
    frame: &mut Frame,
    area: Rect,
    title: String,
    header: &[&'static str],
    widths: &[Constraint],
    rows: Vec<Row<'static>>,
    selected: usize,
) {
    let header = Row::new(header.iter().copied())
        .style(Style::default().add_modifier(Modifier::BOLD))
        .bottom_margin(1);
    let table = Table::new(rows, widths.to_vec())
        .header(header)
        .block(Block::default().borders(Borders::ALL).title(title))
        .row_highlight_style(
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD),
        )
        .highlight_symbol("▶ ");

    let mut state = TableState::default().with_selected(Some(selected));
    frame.render_stateful_widget(table, area, &mut state);
}

fn draw_empty(frame: &mut Frame, area: Rect, title: String, message: &str) {
    let paragraph = Paragraph::new(message.to_string())
        .alignment(Alignment::Center)
        .block(Block::default().borders(Borders::ALL).title(title));
    frame.render_widget(paragraph, area);
}

/// Central application state shared across the TUI.
pub struct App {
    conn: Connection,
    roster: StudentsScreen,
    screen: Screen,
    mode: Mode,
    status: Option<StatusMessage>,
    backup_dir: PathBuf,
}

impl App {
    pub fn new(
        conn: Connection,
        students: Vec<Student>,
        holdings: HashMap<String, usize>,
        backup_dir: PathBuf,
    ) -> Self {
        Self {
            conn,
            roster: StudentsScreen::new(students, holdings),
            screen: Screen::Students,
            mode: Mode::Normal,
            status: None,
            backup_dir,
        }
    }

    /// Apply one key press. Returns true when the user asked to quit.
    ///
    /// Failures inside a handler land in the footer and the previous mode is
    /// restored, so a broken query never takes the terminal down.
    pub fn handle_key(&mut self, code: KeyCode) -> Result<bool> {
        let mut exit = false;
        let previous = self.mode.clone();
        let mode = mem::replace(&mut self.mode, Mode::Normal);

        match self.dispatch_key(code, mode, &mut exit) {
            Ok(mode) => self.mode = mode,
            Err(err) => {
                error!(error = %format!("{err:#}"), "key handling failed");
                self.set_status(surface_error(&err), StatusKind::Error);
                self.mode = previous;
            }
        }
        Ok(exit)
    }

    fn dispatch_key(&mut self, code: KeyCode, mode: Mode, exit: &mut bool) -> Result<Mode> {
        let mode = match mode {
            Mode::Normal => self.handle_normal_key(code, exit)?,
            Mode::AddingStudent(form) | Mode::EditingStudent(form) => {
                self.handle_student_form(code, form)?
            }
            Mode::ConfirmStudentDelete(confirm) => {
                self.handle_confirm_student_delete(code, confirm)?
            }
            Mode::AddingItem(form) => self.handle_item_form(code, None, form)?,
            Mode::EditingItem { item, form } => self.handle_item_form(code, Some(item), form)?,
            Mode::Assigning(state) => self.handle_assign(code, state)?,
            Mode::Releasing(dialog) => self.handle_release(code, dialog)?,
            Mode::Notice(notice) => match code {
                KeyCode::Enter | KeyCode::Esc | KeyCode::Char(' ') => Mode::Normal,
                _ => Mode::Notice(notice),
            },
            Mode::Searching(state) => self.handle_search(code, state)?,
            Mode::PickingBackup(picker) => self.handle_backup_picker(code, picker)?,
            Mode::ImportingCsv(prompt) => self.handle_csv_prompt(code, prompt)?,
        };
        Ok(mode)
    }

    fn handle_normal_key(&mut self, code: KeyCode, exit: &mut bool) -> Result<Mode> {
        match self.screen {
            Screen::Students => self.handle_students_key(code, exit),
            Screen::StudentDetail(_) => self.handle_detail_key(code, exit),
            Screen::Inventory(_) => self.handle_inventory_key(code, exit),
            Screen::Outstanding(_) => self.handle_outstanding_key(code, exit),
        }
    }

    fn handle_students_key(&mut self, code: KeyCode, exit: &mut bool) -> Result<Mode> {
        match code {
            KeyCode::Char('q') | KeyCode::Esc => {
                *exit = true;
            }
            KeyCode::Up => self.roster.move_selection(-1),
            KeyCode::Down => self.roster.move_selection(1),
            KeyCode::PageUp => self.roster.move_selection(-PAGE),
            KeyCode::PageDown => self.roster.move_selection(PAGE),
            KeyCode::Home => self.roster.select_first(),
            KeyCode::End => self.roster.select_last(),
            KeyCode::Char('f') => {
                return Ok(Mode::Searching(SearchState {
                    target: SearchTarget::Students,
                    query: String::new(),
                }));
            }
            KeyCode::Enter => {
                if let Some(student) = self.roster.current_student().cloned() {
                    self.clear_status();
                    self.open_student_detail(student)?;
                } else {
                    self.set_status("No student selected.", StatusKind::Error);
                }
            }
            KeyCode::Char('+') => {
                self.clear_status();
                return Ok(Mode::AddingStudent(StudentForm::new()));
            }
            KeyCode::Char('e') | KeyCode::Char('E') => {
                if let Some(student) = self.roster.current_student() {
                    let form = StudentForm::from_student(student);
                    self.clear_status();
                    return Ok(Mode::EditingStudent(form));
                }
                self.set_status("No student selected to edit.", StatusKind::Error);
            }
            KeyCode::Char('-') => {
                if let Some(student) = self.roster.current_student() {
                    let confirm =
                        ConfirmStudentDelete::new(student, self.roster.held_by(&student.student_id));
                    self.clear_status();
                    return Ok(Mode::ConfirmStudentDelete(confirm));
                }
                self.set_status("No student selected to delete.", StatusKind::Error);
            }
            KeyCode::Char('i') | KeyCode::Char('I') => {
                self.clear_status();
                self.open_inventory(ItemKind::Uniform)?;
            }
            KeyCode::Char('o') | KeyCode::Char('O') => {
                self.clear_status();
                self.open_outstanding(ItemKind::Uniform, None)?;
            }
            KeyCode::Char('b') | KeyCode::Char('B') => self.run_backup(),
            KeyCode::Char('u') | KeyCode::Char('U') => {
                let picker = BackupPicker::load(&self.backup_dir)?;
                if picker.is_empty() {
                    self.set_status(
                        format!("No backups found in {}.", self.backup_dir.display()),
                        StatusKind::Error,
                    );
                } else {
                    self.clear_status();
                    return Ok(Mode::PickingBackup(picker));
                }
            }
            KeyCode::Char('c') | KeyCode::Char('C') => {
                self.clear_status();
                return Ok(Mode::ImportingCsv(PathPrompt::default()));
            }
            _ => {}
        }
        Ok(Mode::Normal)
    }

    fn handle_detail_key(&mut self, code: KeyCode, exit: &mut bool) -> Result<Mode> {
        let Screen::StudentDetail(detail) = &mut self.screen else {
            return Ok(Mode::Normal);
        };

        match code {
            KeyCode::Char('q') => {
                *exit = true;
            }
            KeyCode::Esc => {
                let student_id = detail.student.student_id.clone();
                self.screen = Screen::Students;
                self.roster.focus(&student_id);
                self.clear_status();
            }
            KeyCode::Up => detail.move_selection(-1),
            KeyCode::Down => detail.move_selection(1),
            KeyCode::PageUp => detail.move_selection(-PAGE),
            KeyCode::PageDown => detail.move_selection(PAGE),
            KeyCode::Char('a') | KeyCode::Char('A') => {
                let state = AssignState::load(&self.conn, &detail.student)?;
                if state.is_empty() {
                    self.set_status("No available items to assign.", StatusKind::Error);
                } else {
                    self.clear_status();
                    return Ok(Mode::Assigning(state));
                }
            }
            KeyCode::Char('r') => {
                if let Some(item) = detail.current_item().cloned() {
                    self.clear_status();
                    return Ok(Mode::Releasing(ReleaseDialog::new(item)));
                }
                self.set_status("No item selected to release.", StatusKind::Error);
            }
            KeyCode::Char('R') => {
                let student = detail.student.clone();
                if detail.items.is_empty() {
                    self.set_status(
                        format!("{} holds no items.", student.full_name()),
                        StatusKind::Error,
                    );
                } else {
                    match release_all_for_student(&self.conn, &student.student_id) {
                        Ok(released) => {
                            self.set_status(
                                format!(
                                    "Released {} from {}.",
                                    items_label(released),
                                    student.full_name()
                                ),
                                StatusKind::Info,
                            );
                            self.refresh_views(None);
                        }
                        Err(err) => self.set_status(err.to_string(), StatusKind::Error),
                    }
                }
            }
            KeyCode::Char('m') | KeyCode::Char('M') => {
                let student = detail.student.clone();
                self.email_student(&student);
            }
            KeyCode::Char('e') | KeyCode::Char('E') => {
                let form = StudentForm::from_student(&detail.student);
                self.clear_status();
                return Ok(Mode::EditingStudent(form));
            }
            _ => {}
        }
        Ok(Mode::Normal)
    }

    fn handle_inventory_key(&mut self, code: KeyCode, exit: &mut bool) -> Result<Mode> {
        let Screen::Inventory(inventory) = &mut self.screen else {
            return Ok(Mode::Normal);
        };

        match code {
            KeyCode::Char('q') => {
                *exit = true;
            }
            KeyCode::Esc => {
                self.screen = Screen::Students;
                self.clear_status();
            }
            KeyCode::Tab | KeyCode::BackTab => {
                let kind = if code == KeyCode::Tab {
                    inventory.kind.next()
                } else {
                    inventory.kind.previous()
                };
                let items = fetch_items(&self.conn, kind)?;
                inventory.switch_kind(kind, items);
            }
            KeyCode::Up => inventory.move_selection(-1),
            KeyCode::Down => inventory.move_selection(1),
            KeyCode::PageUp => inventory.move_selection(-PAGE),
            KeyCode::PageDown => inventory.move_selection(PAGE),
            KeyCode::Home => inventory.select_first(),
            KeyCode::End => inventory.select_last(),
            KeyCode::Char('f') => {
                return Ok(Mode::Searching(SearchState {
                    target: SearchTarget::Inventory,
                    query: String::new(),
                }));
            }
            KeyCode::Char('+') => {
                let form = ItemForm::new(inventory.kind);
                self.clear_status();
                return Ok(Mode::AddingItem(form));
            }
            KeyCode::Char('e') | KeyCode::Char('E') => {
                if let Some(item) = inventory.current_item().cloned() {
                    self.clear_status();
                    return Ok(Mode::EditingItem {
                        form: ItemForm::from_item(&item),
                        item,
                    });
                }
                self.set_status("No item selected to edit.", StatusKind::Error);
            }
            KeyCode::Char('s') | KeyCode::Char('S') => {
                if let Some(item) = inventory.current_item().cloned() {
                    self.cycle_item_status(&item)?;
                } else {
                    self.set_status("No item selected.", StatusKind::Error);
                }
            }
            KeyCode::Char('r') | KeyCode::Char('R') => match inventory.current_item().cloned() {
                Some(item) if item.is_assigned() => {
                    self.clear_status();
                    return Ok(Mode::Releasing(ReleaseDialog::new(item)));
                }
                Some(item) => self.set_status(
                    format!("{} is not currently assigned.", item.display_name()),
                    StatusKind::Error,
                ),
                None => self.set_status("No item selected to release.", StatusKind::Error),
            },
            KeyCode::Enter => {
                if let Some(holder) = inventory
                    .current_item()
                    .and_then(|item| item.student_id.clone())
                {
                    self.open_student_by_id(&holder)?;
                }
            }
            _ => {}
        }
        Ok(Mode::Normal)
    }

    fn handle_outstanding_key(&mut self, code: KeyCode, exit: &mut bool) -> Result<Mode> {
        let Screen::Outstanding(outstanding) = &mut self.screen else {
            return Ok(Mode::Normal);
        };

        match code {
            KeyCode::Char('q') => {
                *exit = true;
            }
            KeyCode::Esc => {
                self.screen = Screen::Students;
                self.clear_status();
            }
            KeyCode::Tab | KeyCode::BackTab => {
                outstanding.kind = if code == KeyCode::Tab {
                    outstanding.kind.next()
                } else {
                    outstanding.kind.previous()
                };
                outstanding.selected = 0;
                let rows = fetch_outstanding(&self.conn, outstanding.kind, outstanding.section)?;
                outstanding.set_rows(rows);
            }
            KeyCode::Char('c') | KeyCode::Char('C') => {
                outstanding.section = next_section_filter(outstanding.section);
                outstanding.selected = 0;
                let rows = fetch_outstanding(&self.conn, outstanding.kind, outstanding.section)?;
                outstanding.set_rows(rows);
            }
            KeyCode::Up => outstanding.move_selection(-1),
            KeyCode::Down => outstanding.move_selection(1),
            KeyCode::PageUp => outstanding.move_selection(-PAGE),
            KeyCode::PageDown => outstanding.move_selection(PAGE),
            KeyCode::Enter => {
                if let Some(holder) = outstanding.current_row().map(|row| row.student_id.clone()) {
                    self.open_student_by_id(&holder)?;
                }
            }
            KeyCode::Char('r') | KeyCode::Char('R') => {
                if let Some(row) = outstanding.current_row() {
                    let dialog = ReleaseDialog::new(row.item.clone());
                    self.clear_status();
                    return Ok(Mode::Releasing(dialog));
                }
            }
            _ => {}
        }
        Ok(Mode::Normal)
    }

    fn handle_student_form(&mut self, code: KeyCode, mut form: StudentForm) -> Result<Mode> {
        let mut keep_open = true;
        match code {
            KeyCode::Esc => {
                let message = if form.editing {
                    "Edit cancelled."
                } else {
                    "Add student cancelled."
                };
                self.set_status(message, StatusKind::Info);
                keep_open = false;
            }
            KeyCode::Tab | KeyCode::Down => form.toggle_field(),
            KeyCode::BackTab | KeyCode::Up => form.previous_field(),
            KeyCode::Left => {
                form.cycle_choice(false);
            }
            KeyCode::Right => {
                form.cycle_choice(true);
            }
            KeyCode::Backspace => form.backspace(),
            KeyCode::Enter => match self.save_student(&form) {
                Ok(_) => keep_open = false,
                Err(err) => {
                    let message = surface_error(&err);
                    form.error = Some(message.clone());
                    self.set_status(message, StatusKind::Error);
                }
            },
            KeyCode::Char(' ') if form.active.is_choice() => {
                form.cycle_choice(true);
            }
            KeyCode::Char(ch) => {
                if form.push_char(ch) {
                    form.error = None;
                }
            }
            _ => {}
        }

        if !keep_open {
            Ok(Mode::Normal)
        } else if form.editing {
            Ok(Mode::EditingStudent(form))
        } else {
            Ok(Mode::AddingStudent(form))
        }
    }

    fn handle_confirm_student_delete(
        &mut self,
        code: KeyCode,
        confirm: ConfirmStudentDelete,
    ) -> Result<Mode> {
        match code {
            KeyCode::Esc | KeyCode::Char('n') | KeyCode::Char('N') => {
                self.set_status("Deletion cancelled.", StatusKind::Info);
                Ok(Mode::Normal)
            }
            KeyCode::Enter | KeyCode::Char('y') | KeyCode::Char('Y') => {
                match delete_student(&self.conn, &confirm.student_id) {
                    Ok(released) => {
                        self.screen = Screen::Students;
                        let message = if released == 0 {
                            format!("Deleted {}.", confirm.name)
                        } else {
                            format!(
                                "Deleted {}; {} returned to inventory.",
                                confirm.name,
                                items_label(released)
                            )
                        };
                        self.set_status(message, StatusKind::Info);
                        self.refresh_views(None);
                        Ok(Mode::Normal)
                    }
                    Err(err) => {
                        let message = surface_error(&err);
                        self.set_status(message, StatusKind::Error);
                        Ok(Mode::ConfirmStudentDelete(confirm))
                    }
                }
            }
            _ => Ok(Mode::ConfirmStudentDelete(confirm)),
        }
    }

    fn handle_item_form(
        &mut self,
        code: KeyCode,
        editing: Option<Item>,
        mut form: ItemForm,
    ) -> Result<Mode> {
        let mut keep_open = true;
        match code {
            KeyCode::Esc => {
                let message = if editing.is_some() {
                    "Edit cancelled."
                } else {
                    "Add item cancelled."
                };
                self.set_status(message, StatusKind::Info);
                keep_open = false;
            }
            KeyCode::Tab | KeyCode::Down => form.toggle_field(),
            KeyCode::BackTab | KeyCode::Up => form.previous_field(),
            KeyCode::Left => {
                form.cycle_choice(false);
            }
            KeyCode::Right => {
                form.cycle_choice(true);
            }
            KeyCode::Backspace => form.backspace(),
            KeyCode::Enter => match self.save_item(editing.as_ref(), &form) {
                Ok(_) => keep_open = false,
                Err(err) => {
                    let message = surface_error(&err);
                    form.error = Some(message.clone());
                    self.set_status(message, StatusKind::Error);
                }
            },
            KeyCode::Char(' ') if form.active_field().is_choice() => {
                form.cycle_choice(true);
            }
            KeyCode::Char(ch) => {
                if form.push_char(ch) {
                    form.error = None;
                }
            }
            _ => {}
        }

        match (keep_open, editing) {
            (false, _) => Ok(Mode::Normal),
            (true, Some(item)) => Ok(Mode::EditingItem { item, form }),
            (true, None) => Ok(Mode::AddingItem(form)),
        }
    }

    fn handle_assign(&mut self, code: KeyCode, mut state: AssignState) -> Result<Mode> {
        match code {
            KeyCode::Esc => {
                self.set_status("Assignment cancelled.", StatusKind::Info);
                return Ok(Mode::Normal);
            }
            KeyCode::Up => state.move_selection(-1),
            KeyCode::Down => state.move_selection(1),
            KeyCode::PageUp => state.move_selection(-PAGE),
            KeyCode::PageDown => state.move_selection(PAGE),
            KeyCode::Home => state.select_first(),
            KeyCode::End => state.select_last(),
            KeyCode::Char(' ') => state.toggle_current_selection(),
            KeyCode::Enter => return self.apply_assignment(state),
            _ => {}
        }
        Ok(Mode::Assigning(state))
    }

    /// Assign the picked items; anything refused ends up in a notice.
    fn apply_assignment(&mut self, state: AssignState) -> Result<Mode> {
        let requested = state.requested();
        if requested.is_empty() {
            return Ok(Mode::Normal);
        }

        let report = match assign_items(&self.conn, &state.student_id, &requested) {
            Ok(report) => report,
            Err(err) => {
                self.set_status(err.to_string(), StatusKind::Error);
                return Ok(Mode::Assigning(state));
            }
        };

        let assigned = report.assigned.len();
        if report.is_complete() {
            self.set_status(
                format!("Assigned {} to {}.", items_label(assigned), state.student_name),
                StatusKind::Info,
            );
            self.refresh_views(None);
            return Ok(Mode::Normal);
        }

        let mut lines: Vec<String> = report.failed.iter().map(|(_, err)| err.to_string()).collect();
        if assigned > 0 {
            lines.push(String::new());
            lines.push(format!(
                "The other {} went to {}.",
                items_label(assigned),
                state.student_name
            ));
        }
        self.set_status(
            format!("{} could not be assigned.", items_label(report.failed.len())),
            StatusKind::Error,
        );
        self.refresh_views(None);
        Ok(Mode::Notice(Notice::new("Assignment Conflict", lines)))
    }

    fn handle_release(&mut self, code: KeyCode, mut dialog: ReleaseDialog) -> Result<Mode> {
        match code {
            KeyCode::Esc => {
                self.set_status("Release cancelled.", StatusKind::Info);
                Ok(Mode::Normal)
            }
            KeyCode::Left | KeyCode::Up => {
                dialog.previous();
                Ok(Mode::Releasing(dialog))
            }
            KeyCode::Right | KeyCode::Down | KeyCode::Tab => {
                dialog.next();
                Ok(Mode::Releasing(dialog))
            }
            KeyCode::Enter => {
                let status = dialog.selection.status();
                let item_ref = dialog.item.item_ref();
                match release_item(&self.conn, item_ref, status) {
                    Ok(released) => self.set_status(
                        format!("Returned {} as {}.", released.display_name(), status),
                        StatusKind::Info,
                    ),
                    Err(err) => self.set_status(err.to_string(), StatusKind::Error),
                }
                self.refresh_views(Some(item_ref));
                Ok(Mode::Normal)
            }
            _ => Ok(Mode::Releasing(dialog)),
        }
    }

    fn handle_search(&mut self, code: KeyCode, mut state: SearchState) -> Result<Mode> {
        match state.target {
            SearchTarget::Students => {
                match code {
                    KeyCode::Esc => {
                        self.roster.set_filter(None);
                        return Ok(Mode::Normal);
                    }
                    KeyCode::Enter => return Ok(Mode::Normal),
                    KeyCode::Up => {
                        self.roster.move_selection(-1);
                        return Ok(Mode::Searching(state));
                    }
                    KeyCode::Down => {
                        self.roster.move_selection(1);
                        return Ok(Mode::Searching(state));
                    }
                    KeyCode::Backspace => {
                        state.query.pop();
                    }
                    KeyCode::Char(ch) if !ch.is_control() => state.query.push(ch),
                    _ => {}
                }
                self.roster.set_filter(filter_from(&state.query));
                Ok(Mode::Searching(state))
            }
            SearchTarget::Inventory => {
                let inventory = match &mut self.screen {
                    Screen::Inventory(inventory) => inventory,
                    _ => return Ok(Mode::Normal),
                };

                match code {
                    KeyCode::Esc => {
                        inventory.set_filter(None);
                        return Ok(Mode::Normal);
                    }
                    KeyCode::Enter => return Ok(Mode::Normal),
                    KeyCode::Up => {
                        inventory.move_selection(-1);
                        return Ok(Mode::Searching(state));
                    }
                    KeyCode::Down => {
                        inventory.move_selection(1);
                        return Ok(Mode::Searching(state));
                    }
                    KeyCode::Backspace => {
                        state.query.pop();
                    }
                    KeyCode::Char(ch) if !ch.is_control() => state.query.push(ch),
                    _ => {}
                }
                inventory.set_filter(filter_from(&state.query));
                Ok(Mode::Searching(state))
            }
        }
    }

    fn save_student(&mut self, form: &StudentForm) -> Result<()> {
        let student = form.parse_inputs()?;
        if form.editing {
            update_student(&self.conn, &student)?;
            self.set_status(format!("Updated {}.", student.full_name()), StatusKind::Info);
        } else {
            create_student(&self.conn, &student)?;
            self.set_status(format!("Added {}.", student.full_name()), StatusKind::Info);
        }
        self.refresh_views(None);
        self.roster.focus(&student.student_id);
        Ok(())
    }

    fn save_item(&mut self, editing: Option<&Item>, form: &ItemForm) -> Result<()> {
        let (item_ref, message) = match editing {
            Some(item) => {
                let edited = form.parse_edit(item)?;
                update_item(&self.conn, &edited)?;
                (edited.item_ref(), format!("Updated {}.", edited.display_name()))
            }
            None => {
                let created = create_item(&self.conn, &form.parse_new()?)?;
                (created.item_ref(), format!("Added {}.", created.display_name()))
            }
        };
        self.set_status(message, StatusKind::Info);
        self.refresh_views(Some(item_ref));
        Ok(())
    }

    /// Step an unassigned item to the next of Available, Maintenance, Retired.
    fn cycle_item_status(&mut self, item: &Item) -> Result<()> {
        if item.is_assigned() {
            self.set_status(
                format!("Release {} before changing its status.", item.display_name()),
                StatusKind::Error,
            );
            return Ok(());
        }

        let statuses = ItemStatus::UNASSIGNED;
        let idx = statuses.iter().position(|s| *s == item.status).unwrap_or(0);
        let next = statuses[(idx + 1) % statuses.len()];
        match set_item_status(&self.conn, item.item_ref(), next) {
            Ok(updated) => {
                self.set_status(
                    format!("{} is now {}.", updated.display_name(), updated.status),
                    StatusKind::Info,
                );
                self.refresh_views(Some(updated.item_ref()));
            }
            Err(err) => self.set_status(err.to_string(), StatusKind::Error),
        }
        Ok(())
    }

    fn run_backup(&mut self) {
        match create_backup(&self.conn, &self.backup_dir) {
            Ok(path) => self.set_status(
                format!("Backup written to {}.", path.display()),
                StatusKind::Info,
            ),
            Err(err) => self.set_status(surface_error(&err), StatusKind::Error),
        }
    }

    fn handle_backup_picker(&mut self, code: KeyCode, mut picker: BackupPicker) -> Result<Mode> {
        if picker.confirming {
            return match code {
                KeyCode::Char('y') | KeyCode::Char('Y') => match picker.current().cloned() {
                    Some(path) => {
                        self.restore_from(&path);
                        Ok(Mode::Normal)
                    }
                    None => Ok(Mode::Normal),
                },
                KeyCode::Esc | KeyCode::Char('n') | KeyCode::Char('N') => {
                    picker.confirming = false;
                    Ok(Mode::PickingBackup(picker))
                }
                _ => Ok(Mode::PickingBackup(picker)),
            };
        }

        match code {
            KeyCode::Esc => {
                self.set_status("Restore cancelled.", StatusKind::Info);
                return Ok(Mode::Normal);
            }
            KeyCode::Up => picker.move_selection(-1),
            KeyCode::Down => picker.move_selection(1),
            KeyCode::PageUp => picker.move_selection(-PAGE),
            KeyCode::PageDown => picker.move_selection(PAGE),
            KeyCode::Enter => picker.confirming = picker.current().is_some(),
            _ => {}
        }
        Ok(Mode::PickingBackup(picker))
    }

    /// Snapshot the current data, then replace it with the chosen backup.
    fn restore_from(&mut self, path: &Path) {
        let safety = match create_backup(&self.conn, &self.backup_dir) {
            Ok(safety) => safety,
            Err(err) => {
                self.set_status(
                    format!(
                        "Restore cancelled; the current data could not be backed up: {}",
                        surface_error(&err)
                    ),
                    StatusKind::Error,
                );
                return;
            }
        };

        match restore_backup(&self.conn, path) {
            Ok(report) => {
                self.screen = Screen::Students;
                let students = if report.students == 1 {
                    "1 student".to_string()
                } else {
                    format!("{} students", report.students)
                };
                self.set_status(
                    format!(
                        "Restored {students} and {} from {}. Previous data saved to {}.",
                        items_label(report.items),
                        BackupPicker::label(path),
                        BackupPicker::label(&safety)
                    ),
                    StatusKind::Info,
                );
                self.refresh_views(None);
            }
            Err(err) => self.set_status(surface_error(&err), StatusKind::Error),
        }
    }

    fn handle_csv_prompt(&mut self, code: KeyCode, mut prompt: PathPrompt) -> Result<Mode> {
        match code {
            KeyCode::Esc => {
                self.set_status("Import cancelled.", StatusKind::Info);
                return Ok(Mode::Normal);
            }
            KeyCode::Backspace => prompt.backspace(),
            KeyCode::Char(ch) => prompt.push_char(ch),
            KeyCode::Enter => {
                let Some(path) = prompt.path() else {
                    prompt.error = Some("Enter the path of a CSV file.".to_string());
                    return Ok(Mode::ImportingCsv(prompt));
                };
                match import_students_csv(&self.conn, &path) {
                    Ok(report) => {
                        self.screen = Screen::Students;
                        let kind = if report.skipped.is_empty() {
                            StatusKind::Info
                        } else {
                            StatusKind::Error
                        };
                        self.set_status(report.summary(), kind);
                        self.refresh_views(None);
                        if report.skipped.is_empty() {
                            return Ok(Mode::Normal);
                        }
                        let lines = report
                            .skipped
                            .iter()
                            .map(|(line, reason)| format!("Line {line}: {reason}"))
                            .collect();
                        return Ok(Mode::Notice(Notice::new("Rows Skipped", lines)));
                    }
                    Err(err) => {
                        let message = surface_error(&err);
                        prompt.error = Some(message.clone());
                        self.set_status(message, StatusKind::Error);
                    }
                }
            }
            _ => {}
        }
        Ok(Mode::ImportingCsv(prompt))
    }

    fn email_student(&mut self, student: &Student) {
        match mailto_link(&student.email) {
            None => self.set_status(
                format!("{} has no email address.", student.full_name()),
                StatusKind::Error,
            ),
            Some(link) => match open_link(&link) {
                Ok(()) => {
                    info!(student_id = %student.student_id, "opened mail client");
                    self.set_status(format!("Opened mail to {}.", student.email), StatusKind::Info)
                }
                Err(err) => {
                    self.set_status(format!("Failed to open mail client: {err}"), StatusKind::Error)
                }
            },
        }
    }

    fn set_status<S: Into<String>>(&mut self, text: S, kind: StatusKind) {
        self.status = Some(StatusMessage {
            text: text.into(),
            kind,
        });
    }

    fn clear_status(&mut self) {
        self.status = None;
    }

    fn open_student_detail(&mut self, student: Student) -> Result<()> {
        let items = fetch_items_for_student(&self.conn, &student.student_id)?;
        self.roster.focus(&student.student_id);
        self.screen = Screen::StudentDetail(StudentDetailScreen::new(student, items));
        Ok(())
    }

    fn open_student_by_id(&mut self, student_id: &str) -> Result<()> {
        match fetch_student(&self.conn, student_id)? {
            Some(student) => {
                self.clear_status();
                self.open_student_detail(student)
            }
            None => {
                self.set_status(format!("Student {student_id} not found."), StatusKind::Error);
                Ok(())
            }
        }
    }

    fn open_inventory(&mut self, kind: ItemKind) -> Result<()> {
        let items = fetch_items(&self.conn, kind)?;
        self.screen = Screen::Inventory(InventoryScreen::new(kind, items));
        Ok(())
    }

    fn open_outstanding(&mut self, kind: ItemKind, section: Option<Section>) -> Result<()> {
        let rows = fetch_outstanding(&self.conn, kind, section)?;
        self.screen = Screen::Outstanding(OutstandingScreen::new(kind, section, rows));
        Ok(())
    }

    /// Reload after a committed write. A failed reload keeps the write's own
    /// message and appends the reason.
    fn refresh_views(&mut self, focus: Option<ItemRef>) {
        if let Err(err) = self.reload_views(focus) {
            warn!(error = %format!("{err:#}"), "view reload failed");
            let reason = format!("The list could not be reloaded: {}", surface_error(&err));
            let text = match self.status.take() {
                Some(previous) => format!("{} {reason}", previous.text),
                None => reason,
            };
            self.set_status(text, StatusKind::Error);
        }
    }

    /// Reload the roster and whatever screen is showing.
    fn reload_views(&mut self, focus: Option<ItemRef>) -> Result<()> {
        let students = fetch_students(&self.conn)?;
        let holdings = fetch_holding_counts(&self.conn)?;
        self.roster.set_students(students, holdings);

        let mut student_gone = false;
        match &mut self.screen {
            Screen::Students => {}
            Screen::StudentDetail(detail) => {
                match fetch_student(&self.conn, &detail.student.student_id)? {
                    Some(student) => {
                        let items = fetch_items_for_student(&self.conn, &student.student_id)?;
                        detail.student = student;
                        detail.set_items(items);
                    }
                    None => student_gone = true,
                }
            }
            Screen::Inventory(inventory) => {
                let items = fetch_items(&self.conn, inventory.kind)?;
                inventory.set_items(items, focus);
            }
            Screen::Outstanding(outstanding) => {
                let rows = fetch_outstanding(&self.conn, outstanding.kind, outstanding.section)?;
                outstanding.set_rows(rows);
            }
        }

        if student_gone {
            self.screen = Screen::Students;
        }
        Ok(())
    }

    fn student_name(&self, student_id: &str) -> String {
        self.roster
            .students
            .iter()
            .find(|s| s.student_id == student_id)
            .map(Student::display_name)
            .unwrap_or_else(|| student_id.to_string())
    }

    pub(crate) fn draw(&self, frame: &mut Frame) {
        let area = frame.area();
        let footer_height = FOOTER_HEIGHT.min(area.height);

        let (content_area, footer_area) = if area.height > footer_height {
            let chunks = Layout::default()
                .direction(Direction::Vertical)
                .constraints([Constraint::Min(0), Constraint::Length(footer_height)])
                .split(area);
            (chunks[0], chunks[1])
        } else {
            (area, area)
        };

        match &self.screen {
            Screen::Students => self.draw_students(frame, content_area),
            Screen::StudentDetail(detail) => self.draw_student_detail(frame, content_area, detail),
            Screen::Inventory(inventory) => self.draw_inventory(frame, content_area, inventory),
            Screen::Outstanding(outstanding) => {
                self.draw_outstanding(frame, content_area, outstanding)
            }
        }

        if area.height >= footer_height {
            self.draw_footer(frame, footer_area);
        }

        match &self.mode {
            Mode::AddingStudent(form) => self.draw_student_form(frame, area, "Add Student", form),
            Mode::EditingStudent(form) => {
                self.draw_student_form(frame, area, "Edit Student", form)
            }
            Mode::ConfirmStudentDelete(confirm) => self.draw_confirm_delete(frame, area, confirm),
            Mode::AddingItem(form) => {
                let title = format!("Add {}", form.kind);
                self.draw_item_form(frame, area, &title, form)
            }
            Mode::EditingItem { item, form } => {
                let title = format!("Edit {}", item.display_name());
                self.draw_item_form(frame, area, &title, form)
            }
            Mode::Assigning(state) => self.draw_assign(frame, area, state),
            Mode::Releasing(dialog) => self.draw_release(frame, area, dialog),
            Mode::Notice(notice) => self.draw_notice(frame, area, notice),
            Mode::Searching(state) => self.draw_search_bar(frame, area, state),
            Mode::PickingBackup(picker) => self.draw_backup_picker(frame, area, picker),
            Mode::ImportingCsv(prompt) => self.draw_csv_prompt(frame, area, prompt),
            Mode::Normal => {}
        }
    }

    fn draw_students(&self, frame: &mut Frame, area: Rect) {
        let roster = &self.roster;
        let mut title = format!("Students ({})", roster.students.len());
        if let Some(filter) = &roster.filter {
            title.push_str(&format!(" • search: {filter}"));
        }

        if roster.students.is_empty() {
            draw_empty(frame, area, title, "No students yet. Press '+' to add one.");
            return;
        }
        if roster.filtered_students.is_empty() {
            draw_empty(frame, area, title, "No students match the current search.");
            return;
        }

        let rows = roster
            .filtered_students
            .iter()
            .map(|student| {
                Row::new(vec![
                    Cell::from(student.student_id.clone()),
                    Cell::from(student.display_name()),
                    Cell::from(student.section.as_str()),
                    Cell::from(student.status.as_str()),
                    Cell::from(roster.held_by(&student.student_id).to_string()),
                ])
            })
            .collect();

        render_table(
            frame,
            area,
            title,
            &["ID", "Name", "Section", "Status", "Items"],
            &[
                Constraint::Length(11),
                Constraint::Min(20),
                Constraint::Length(12),
                Constraint::Length(8),
                Constraint::Length(6),
            ],
            rows,
            roster.selected,
        );
    }

    fn draw_student_detail(&self, frame: &mut Frame, area: Rect, detail: &StudentDetailScreen) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Length(6), Constraint::Min(1)])
            .split(area);

        let s = &detail.student;
        let header = Paragraph::new(vec![
            Line::from(vec![
                Span::styled(
                    s.display_name(),
                    Style::default().add_modifier(Modifier::BOLD),
                ),
                Span::raw(format!(
                    "  •  {}  •  {}  •  {}",
                    s.student_id, s.section, s.status
                )),
            ]),
            Line::from(format!(
                "Phone: {}   Email: {}   Year came up: {}",
                or_dash(&s.phone),
                or_dash(&s.email),
                or_dash(&s.year_came_up)
            )),
            Line::from(format!(
                "Guardian: {}   Guardian phone: {}",
                or_dash(&s.guardian_name),
                or_dash(&s.guardian_phone)
            )),
            Line::from(format!(
                "Spats: {}   Gloves: {}",
                or_dash(&s.spats_size),
                or_dash(&s.gloves_size)
            )),
        ])
        .block(Block::default().borders(Borders::ALL).title("Student"));
        frame.render_widget(header, chunks[0]);

        let title = format!("Checked out ({})", detail.items.len());
        if detail.items.is_empty() {
            draw_empty(
                frame,
                chunks[1],
                title,
                "No items checked out. Press 'a' to assign.",
            );
            return;
        }

        let rows = detail
            .items
            .iter()
            .map(|item| {
                Row::new(vec![
                    Cell::from(item.kind.label()),
                    Cell::from(item.tag.clone()),
                    Cell::from(item.details.summary()),
                    Cell::from(item.notes.clone()),
                ])
            })
            .collect();

        render_table(
            frame,
            chunks[1],
            title,
            &["Kind", "Tag", "Details", "Notes"],
            &[
                Constraint::Length(12),
                Constraint::Length(14),
                Constraint::Percentage(45),
                Constraint::Min(10),
            ],
            rows,
            detail.selected,
        );
    }

    fn draw_kind_tabs(&self, frame: &mut Frame, area: Rect, kind: ItemKind, title: &str) {
        let selected = ItemKind::ALL.iter().position(|k| *k == kind).unwrap_or(0);
        let tabs = Tabs::new(ItemKind::ALL.iter().map(|k| k.label()))
            .select(selected)
            .block(Block::default().borders(Borders::ALL).title(title.to_string()))
            .highlight_style(
                Style::default()
                    .fg(Color::Yellow)
                    .add_modifier(Modifier::BOLD),
            );
        frame.render_widget(tabs, area);
    }

    fn draw_inventory(&self, frame: &mut Frame, area: Rect, inventory: &InventoryScreen) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Length(3), Constraint::Min(1)])
            .split(area);
        self.draw_kind_tabs(frame, chunks[0], inventory.kind, "Inventory");

        let mut title = format!("{} ({})", inventory.kind, inventory.items.len());
        if let Some(filter) = &inventory.filter {
            title.push_str(&format!(" • search: {filter}"));
        }
        if inventory.items.is_empty() {
            draw_empty(frame, chunks[1], title, "Nothing here yet. Press '+' to add one.");
            return;
        }
        if inventory.filtered_items.is_empty() {
            draw_empty(frame, chunks[1], title, "No items match the current search.");
            return;
        }

        let rows = inventory
            .filtered_items
            .iter()
            .map(|item| {
                let holder = item
                    .student_id
                    .as_deref()
                    .map(|id| self.student_name(id))
                    .unwrap_or_default();
                Row::new(vec![
                    Cell::from(item.tag.clone()),
                    Cell::from(item.status.as_str()).style(status_style(item.status)),
                    Cell::from(holder),
                    Cell::from(item.details.summary()),
                    Cell::from(item.notes.clone()),
                ])
            })
            .collect();

        render_table(
            frame,
            chunks[1],
            title,
            &[inventory.kind.tag_label(), "Status", "Holder", "Details", "Notes"],
            &[
                Constraint::Length(12),
                Constraint::Length(12),
                Constraint::Length(22),
                Constraint::Percentage(35),
                Constraint::Min(10),
            ],
            rows,
            inventory.selected,
        );
    }

    fn draw_outstanding(&self, frame: &mut Frame, area: Rect, outstanding: &OutstandingScreen) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Length(3), Constraint::Min(1)])
            .split(area);
        self.draw_kind_tabs(frame, chunks[0], outstanding.kind, "Outstanding");

        let section = outstanding
            .section
            .map(|s| s.to_string())
            .unwrap_or_else(|| "All sections".to_string());
        let title = format!(
            "{} checked out • {} ({})",
            outstanding.kind,
            section,
            outstanding.rows.len()
        );
        if outstanding.rows.is_empty() {
            draw_empty(frame, chunks[1], title, "Nothing checked out.");
            return;
        }

        let rows = outstanding
            .rows
            .iter()
            .map(|row| {
                Row::new(vec![
                    Cell::from(row.item.tag.clone()),
                    Cell::from(row.student_name.clone()),
                    Cell::from(row.student_id.clone()),
                    Cell::from(row.section.as_str()),
                    Cell::from(row.item.details.summary()),
                ])
            })
            .collect();

        render_table(
            frame,
            chunks[1],
            title,
            &[outstanding.kind.tag_label(), "Student", "ID", "Section", "Details"],
            &[
                Constraint::Length(12),
                Constraint::Length(24),
                Constraint::Length(11),
                Constraint::Length(12),
                Constraint::Min(10),
            ],
            rows,
            outstanding.selected,
        );
    }

    fn draw_footer(&self, frame: &mut Frame, area: Rect) {
        let block = Block::default().borders(Borders::TOP);
        frame.render_widget(block.clone(), area);
        let inner = block.inner(area);

        let status_line = if let Some(status) = &self.status {
            Line::from(vec![Span::styled(status.text.clone(), status.kind.style())])
        } else {
            Line::from("")
        };

        let instructions = self.footer_instructions();

        let paragraph = Paragraph::new(vec![status_line, instructions]).wrap(Wrap { trim: true });
        frame.render_widget(paragraph, inner);
    }

    fn footer_instructions(&self) -> Line<'static> {
        match (&self.screen, &self.mode) {
            (_, Mode::Assigning(_)) => key_hints(&[
                ("↑↓", "Navigate"),
                ("Space", "Toggle"),
                ("Enter", "Assign"),
                ("Esc", "Cancel"),
            ]),
            (_, Mode::Searching(_)) => {
                key_hints(&[("↑↓", "Select"), ("Enter", "Keep Filter"), ("Esc", "Clear")])
            }
            (_, Mode::Notice(_)) => key_hints(&[("Enter", "Dismiss")]),
            (_, Mode::PickingBackup(picker)) if picker.confirming => {
                key_hints(&[("y", "Restore"), ("n", "Back")])
            }
            (_, Mode::PickingBackup(_)) => {
                key_hints(&[("↑↓", "Select"), ("Enter", "Choose"), ("Esc", "Cancel")])
            }
            (_, Mode::ImportingCsv(_)) => key_hints(&[("Enter", "Import"), ("Esc", "Cancel")]),
            (
                _,
                Mode::AddingStudent(_)
                | Mode::EditingStudent(_)
                | Mode::AddingItem(_)
                | Mode::EditingItem { .. },
            ) => key_hints(&[
                ("Tab", "Next Field"),
                ("←→", "Change Choice"),
                ("Enter", "Save"),
                ("Esc", "Cancel"),
            ]),
            (Screen::StudentDetail(_), _) => key_hints(&[
                ("↑↓", "Select"),
                ("a", "Assign"),
                ("r", "Release"),
                ("R", "Release All"),
                ("m", "Email"),
                ("e", "Edit"),
                ("Esc", "Back"),
                ("q", "Quit"),
            ]),
            (Screen::Inventory(_), _) => key_hints(&[
                ("Tab", "Kind"),
                ("↑↓", "Select"),
                ("+", "Add"),
                ("e", "Edit"),
                ("s", "Status"),
                ("r", "Release"),
                ("Enter", "Holder"),
                ("f", "Search"),
                ("Esc", "Back"),
            ]),
            (Screen::Outstanding(_), _) => key_hints(&[
                ("Tab", "Kind"),
                ("c", "Section"),
                ("↑↓", "Select"),
                ("Enter", "Holder"),
                ("r", "Release"),
                ("Esc", "Back"),
            ]),
            (Screen::Students, _) => key_hints(&[
                ("↑↓", "Select"),
                ("Enter", "Open"),
                ("+", "Add"),
                ("e", "Edit"),
                ("-", "Delete"),
                ("f", "Search"),
                ("i", "Inventory"),
                ("o", "Outstanding"),
                ("b", "Backup"),
                ("u", "Restore"),
                ("c", "Import CSV"),
                ("q", "Quit"),
            ]),
        }
    }

    fn draw_form_lines(
        &self,
        frame: &mut Frame,
        area: Rect,
        title: &str,
        mut lines: Vec<Line<'static>>,
        error: Option<&String>,
    ) -> Rect {
        let popup_area = centered_rect(60, 80, area);
        frame.render_widget(Clear, popup_area);

        let block = Block::default().title(title.to_string()).borders(Borders::ALL);
        frame.render_widget(block.clone(), popup_area);
        let inner = block.inner(popup_area);

        lines.push(Line::from(""));
        if let Some(error) = error {
            lines.push(Line::from(Span::styled(
                error.clone(),
                Style::default().fg(Color::Red),
            )));
        } else {
            lines.push(Line::from(Span::styled(
                "Enter to save • Tab to switch • ←/→ to change • Esc to cancel",
                Style::default().fg(Color::Gray),
            )));
        }

        frame.render_widget(Paragraph::new(lines), inner);
        inner
    }

    fn draw_student_form(&self, frame: &mut Frame, area: Rect, title: &str, form: &StudentForm) {
        let lines = StudentField::ALL
            .iter()
            .map(|field| form.build_line(*field))
            .collect();
        let inner = self.draw_form_lines(frame, area, title, lines, form.error.as_ref());

        let field = form.active;
        if !field.is_choice() {
            let prefix = format!("{}: ", field.label()).len() as u16;
            frame.set_cursor_position((
                inner.x + prefix + form.value_len(field) as u16,
                inner.y + form.active_row() as u16,
            ));
        }
    }

    fn draw_item_form(&self, frame: &mut Frame, area: Rect, title: &str, form: &ItemForm) {
        let lines = form
            .fields
            .iter()
            .map(|field| form.build_line(*field))
            .collect();
        let inner = self.draw_form_lines(frame, area, title, lines, form.error.as_ref());

        let field = form.active_field();
        if !field.is_choice() {
            let prefix = format!("{}: ", field.label(form.kind)).len() as u16;
            frame.set_cursor_position((
                inner.x + prefix + form.value_len(field) as u16,
                inner.y + form.active as u16,
            ));
        }
    }

    fn draw_confirm_delete(&self, frame: &mut Frame, area: Rect, confirm: &ConfirmStudentDelete) {
        let popup_area = centered_rect(60, 30, area);
        frame.render_widget(Clear, popup_area);

        let block = Block::default()
            .title("Delete Student")
            .borders(Borders::ALL);
        frame.render_widget(block.clone(), popup_area);
        let inner = block.inner(popup_area);

        let consequence = if confirm.held == 0 {
            "They hold no equipment.".to_string()
        } else {
            format!(
                "Their {} will be returned as Available.",
                items_label(confirm.held)
            )
        };
        let lines = vec![
            Line::from(format!("Delete {} ({})?", confirm.name, confirm.student_id)),
            Line::from(consequence),
            Line::from(""),
            Line::from(Span::styled(
                "Press Y to confirm or N / Esc to cancel.",
                Style::default().fg(Color::Gray),
            )),
        ];

        let paragraph = Paragraph::new(lines)
            .alignment(Alignment::Left)
            .wrap(Wrap { trim: true });
        frame.render_widget(paragraph, inner);
    }

    fn draw_release(&self, frame: &mut Frame, area: Rect, dialog: &ReleaseDialog) {
        let popup_area = centered_rect(60, 30, area);
        frame.render_widget(Clear, popup_area);

        let block = Block::default().title("Release Item").borders(Borders::ALL);
        frame.render_widget(block.clone(), popup_area);
        let inner = block.inner(popup_area);

        let holder = dialog
            .item
            .student_id
            .as_deref()
            .map(|id| self.student_name(id))
            .unwrap_or_default();

        let mut option_spans = Vec::new();
        for (idx, label) in dialog.labels().iter().enumerate() {
            if idx > 0 {
                option_spans.push(Span::raw("   "));
            }
            let style = if dialog.selected_index() == idx {
                Style::default()
                    .fg(Color::Yellow)
                    .add_modifier(Modifier::BOLD)
            } else {
                Style::default()
            };
            option_spans.push(Span::styled(*label, style));
        }

        let lines = vec![
            Line::from(format!(
                "Return {} from {}?",
                dialog.item.display_name(),
                holder
            )),
            Line::from("Mark it as:"),
            Line::from(""),
            Line::from(option_spans),
            Line::from(""),
            Line::from(Span::styled(
                "Use ←/→ to choose • Enter to confirm • Esc to cancel",
                Style::default().fg(Color::Gray),
            )),
        ];

        let paragraph = Paragraph::new(lines).wrap(Wrap { trim: true });
        frame.render_widget(paragraph, inner);
    }

    fn draw_assign(&self, frame: &mut Frame, area: Rect, state: &AssignState) {
        let popup_area = centered_rect(70, 60, area);
        frame.render_widget(Clear, popup_area);

        let block = Block::default()
            .title(format!("Assign to {}", state.student_name))
            .borders(Borders::ALL);
        frame.render_widget(block.clone(), popup_area);
        let inner = block.inner(popup_area);

        let items: Vec<ListItem> = state
            .items
            .iter()
            .enumerate()
            .map(|(index, item)| {
                let checkbox = if state.is_checked(index) { "[x]" } else { "[ ]" };
                ListItem::new(format!(
                    "{checkbox} {:<12} {:<12} {}",
                    item.kind.label(),
                    item.tag,
                    item.details.summary()
                ))
            })
            .collect();

        let list = List::new(items)
            .block(Block::default().borders(Borders::NONE))
            .highlight_style(Style::default().fg(Color::Yellow))
            .highlight_symbol("▶ ");

        let mut list_state = ListState::default();
        list_state.select(Some(state.selected));
        frame.render_stateful_widget(list, inner, &mut list_state);
    }

    fn draw_notice(&self, frame: &mut Frame, area: Rect, notice: &Notice) {
        let popup_area = centered_rect(60, 40, area);
        frame.render_widget(Clear, popup_area);

        let block = Block::default()
            .title(notice.title.clone())
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Red));
        frame.render_widget(block.clone(), popup_area);
        let inner = block.inner(popup_area);

        let mut lines: Vec<Line> = notice.lines.iter().map(|l| Line::from(l.clone())).collect();
        lines.push(Line::from(""));
        lines.push(Line::from(Span::styled(
            "Press Enter to dismiss.",
            Style::default().fg(Color::Gray),
        )));

        let paragraph = Paragraph::new(lines).wrap(Wrap { trim: true });
        frame.render_widget(paragraph, inner);
    }

    fn draw_backup_picker(&self, frame: &mut Frame, area: Rect, picker: &BackupPicker) {
        let popup_area = centered_rect(60, 50, area);
        frame.render_widget(Clear, popup_area);

        let block = Block::default()
            .title("Restore Backup")
            .borders(Borders::ALL);
        frame.render_widget(block.clone(), popup_area);
        let inner = block.inner(popup_area);

        if picker.confirming {
            let chosen = picker.current().map(|p| BackupPicker::label(p)).unwrap_or_default();
            let lines = vec![
                Line::from(format!("Replace all students and items with {chosen}?")),
                Line::from("The current data is backed up first."),
                Line::from(""),
                Line::from(Span::styled(
                    "Press Y to restore or N / Esc to go back.",
                    Style::default().fg(Color::Gray),
                )),
            ];
            frame.render_widget(Paragraph::new(lines).wrap(Wrap { trim: true }), inner);
            return;
        }

        let items: Vec<ListItem> = picker
            .backups
            .iter()
            .map(|path| ListItem::new(BackupPicker::label(path)))
            .collect();
        let list = List::new(items)
            .highlight_style(Style::default().fg(Color::Yellow))
            .highlight_symbol("▶ ");

        let mut list_state = ListState::default();
        list_state.select(Some(picker.selected));
        frame.render_stateful_widget(list, inner, &mut list_state);
    }

    fn draw_csv_prompt(&self, frame: &mut Frame, area: Rect, prompt: &PathPrompt) {
        let popup_area = centered_rect(70, 30, area);
        frame.render_widget(Clear, popup_area);

        let block = Block::default()
            .title("Import Students CSV")
            .borders(Borders::ALL);
        frame.render_widget(block.clone(), popup_area);
        let inner = block.inner(popup_area);

        let footer = match &prompt.error {
            Some(error) => Span::styled(error.clone(), Style::default().fg(Color::Red)),
            None => Span::styled(
                "Rows are matched on Student ID; blank cells keep stored values.",
                Style::default().fg(Color::Gray),
            ),
        };
        let lines = vec![
            Line::from(format!("File: {}", prompt.input)),
            Line::from(""),
            Line::from(footer),
        ];
        frame.render_widget(Paragraph::new(lines).wrap(Wrap { trim: true }), inner);

        let cursor_x = inner.x + "File: ".len() as u16 + prompt.input.chars().count() as u16;
        frame.set_cursor_position((cursor_x, inner.y));
    }

    fn draw_search_bar(&self, frame: &mut Frame, area: Rect, state: &SearchState) {
        let height = 3u16.min(area.height);
        let popup_area = Rect {
            x: area.x,
            y: area.y,
            width: area.width,
            height,
        };
        frame.render_widget(Clear, popup_area);

        let block = Block::default().borders(Borders::ALL).title("Search");
        let paragraph = Paragraph::new(Span::raw(format!("Search: {}", state.query)))
            .block(block.clone())
            .wrap(Wrap { trim: true });
        frame.render_widget(paragraph, popup_area);

        let inner = block.inner(popup_area);
        let cursor_x = inner.x + "Search: ".len() as u16 + state.query.chars().count() as u16;
        let cursor_y = inner.y;
        frame.set_cursor_position((cursor_x, cursor_y));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{create_item, find_item, init_schema};
    use crate::models::NewItem;

    fn app_with(students: &[Student]) -> App {
        app_in(students, std::env::temp_dir())
    }

    fn app_in(students: &[Student], backup_dir: PathBuf) -> App {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        for student in students {
            create_student(&conn, student).unwrap();
        }
        let roster = fetch_students(&conn).unwrap();
        let holdings = fetch_holding_counts(&conn).unwrap();
        App::new(conn, roster, holdings, backup_dir)
    }

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("equipment-app-{name}-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    fn press(app: &mut App, keys: &[KeyCode]) {
        for key in keys {
            app.handle_key(*key).unwrap();
        }
    }

    fn type_text(app: &mut App, text: &str) {
        for ch in text.chars() {
            app.handle_key(KeyCode::Char(ch)).unwrap();
        }
    }

    #[test]
    fn adding_a_student_through_the_form() {
        let mut app = app_with(&[]);
        press(&mut app, &[KeyCode::Char('+')]);
        type_text(&mut app, "123456789");
        press(&mut app, &[KeyCode::Tab]);
        type_text(&mut app, "Ana");
        press(&mut app, &[KeyCode::Tab]);
        type_text(&mut app, "Lopez");
        press(&mut app, &[KeyCode::Enter]);

        assert!(matches!(app.mode, Mode::Normal));
        assert_eq!(app.roster.students.len(), 1);
        assert_eq!(app.roster.students[0].full_name(), "Ana Lopez");
    }

    #[test]
    fn invalid_student_keeps_form_open_with_error() {
        let mut app = app_with(&[]);
        press(&mut app, &[KeyCode::Char('+')]);
        type_text(&mut app, "1234");
        press(&mut app, &[KeyCode::Enter]);

        match &app.mode {
            Mode::AddingStudent(form) => assert_eq!(
                form.error.as_deref(),
                Some("Student ID must be exactly 9 digits.")
            ),
            _ => panic!("form should stay open"),
        }
    }

    #[test]
    fn conflict_opens_a_notice() {
        let mut app = app_with(&[
            Student::new("123456789", "Ana", "Lopez", Section::Trumpet),
            Student::new("987654321", "Ben", "Adams", Section::Tuba),
        ]);
        let ins = create_item(&app.conn, &NewItem::new(ItemKind::Instrument, "INS-100")).unwrap();

        // Roster is sorted by last name: Adams first.
        press(&mut app, &[KeyCode::Down, KeyCode::Enter, KeyCode::Char('a')]);
        let Mode::Assigning(state) = &app.mode else {
            panic!("picker should open");
        };
        assert_eq!(state.student_id, "123456789");

        // Someone else takes it while the picker is open.
        crate::db::assign_item(&app.conn, "987654321", ins.item_ref()).unwrap();
        press(&mut app, &[KeyCode::Enter]);

        assert!(matches!(app.mode, Mode::Notice(_)));
        let ins = find_item(&app.conn, ins.item_ref()).unwrap().unwrap();
        assert_eq!(ins.student_id.as_deref(), Some("987654321"));

        press(&mut app, &[KeyCode::Enter]);
        assert!(matches!(app.mode, Mode::Normal));
    }

    #[test]
    fn release_from_detail_screen() {
        let mut app = app_with(&[Student::new("123456789", "Ana", "Lopez", Section::Flute)]);
        let coat = create_item(&app.conn, &NewItem::new(ItemKind::Coat, "4")).unwrap();

        press(&mut app, &[KeyCode::Enter, KeyCode::Char('a'), KeyCode::Enter]);
        match &app.screen {
            Screen::StudentDetail(detail) => assert_eq!(detail.items.len(), 1),
            _ => panic!("detail screen expected"),
        }
        assert_eq!(app.roster.held_by("123456789"), 1);

        press(&mut app, &[KeyCode::Char('r'), KeyCode::Right, KeyCode::Enter]);
        let coat = find_item(&app.conn, coat.item_ref()).unwrap().unwrap();
        assert_eq!(coat.status, ItemStatus::Maintenance);
        assert_eq!(coat.student_id, None);
        assert_eq!(app.roster.held_by("123456789"), 0);
    }

    #[test]
    fn inventory_status_key_skips_assigned() {
        let mut app = app_with(&[]);
        create_item(&app.conn, &NewItem::new(ItemKind::Uniform, "")).unwrap();

        press(&mut app, &[KeyCode::Char('i'), KeyCode::Char('s')]);
        let Screen::Inventory(inventory) = &app.screen else {
            panic!("inventory expected");
        };
        assert_eq!(
            inventory.current_item().unwrap().status,
            ItemStatus::Maintenance
        );

        press(&mut app, &[KeyCode::Char('s'), KeyCode::Char('s')]);
        let Screen::Inventory(inventory) = &app.screen else {
            panic!("inventory expected");
        };
        assert_eq!(inventory.current_item().unwrap().status, ItemStatus::Available);
    }

    #[test]
    fn deleting_from_roster_requires_confirmation() {
        let mut app = app_with(&[Student::new("123456789", "Ana", "Lopez", Section::Flute)]);
        press(&mut app, &[KeyCode::Char('-'), KeyCode::Char('n')]);
        assert_eq!(app.roster.students.len(), 1);

        press(&mut app, &[KeyCode::Char('-'), KeyCode::Char('y')]);
        assert!(app.roster.students.is_empty());
    }

    #[test]
    fn database_error_stays_in_the_footer() {
        let mut app = app_with(&[]);
        press(&mut app, &[KeyCode::Char('i')]);
        app.conn.execute_batch("DROP TABLE instruments").unwrap();

        assert!(!app.handle_key(KeyCode::Tab).unwrap());
        let status = app.status.as_ref().expect("error footer");
        assert!(matches!(status.kind, StatusKind::Error));
        assert!(status.text.contains("no such table"), "{}", status.text);
        let Screen::Inventory(inventory) = &app.screen else {
            panic!("inventory should stay open");
        };
        assert_eq!(inventory.kind, ItemKind::Uniform);
        assert!(matches!(app.mode, Mode::Normal));
    }

    #[test]
    fn failed_reload_keeps_the_success_message() {
        let mut app = app_with(&[Student::new("123456789", "Ana", "Lopez", Section::Flute)]);
        let coat = create_item(&app.conn, &NewItem::new(ItemKind::Coat, "4")).unwrap();

        press(&mut app, &[KeyCode::Enter, KeyCode::Char('a')]);
        app.conn.execute_batch("DROP TABLE shakos").unwrap();
        press(&mut app, &[KeyCode::Enter]);

        let status = app.status.as_ref().expect("footer message");
        assert!(matches!(status.kind, StatusKind::Error));
        assert!(status.text.starts_with("Assigned 1 item to Ana Lopez."), "{}", status.text);
        assert!(status.text.contains("could not be reloaded"), "{}", status.text);
        assert!(matches!(app.mode, Mode::Normal));
        let coat = find_item(&app.conn, coat.item_ref()).unwrap().unwrap();
        assert_eq!(coat.student_id.as_deref(), Some("123456789"));
    }

    #[test]
    fn restore_brings_back_a_deleted_student() {
        let dir = scratch_dir("restore");
        let mut app = app_in(
            &[Student::new("123456789", "Ana", "Lopez", Section::Flute)],
            dir.clone(),
        );
        press(&mut app, &[KeyCode::Char('b'), KeyCode::Char('-'), KeyCode::Char('y')]);
        assert!(app.roster.students.is_empty());

        press(&mut app, &[KeyCode::Char('u'), KeyCode::Enter]);
        let Mode::PickingBackup(picker) = &app.mode else {
            panic!("backup picker should open");
        };
        assert!(picker.confirming);
        press(&mut app, &[KeyCode::Char('y')]);

        assert!(matches!(app.mode, Mode::Normal));
        assert_eq!(app.roster.students.len(), 1);
        let status = app.status.as_ref().expect("footer message");
        assert!(matches!(status.kind, StatusKind::Info));
        assert!(status.text.starts_with("Restored 1 student and 0 items"), "{}", status.text);
        // The pre-restore safety copy sits next to the original.
        assert_eq!(crate::db::list_backups(&dir).unwrap().len(), 2);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn restore_key_without_backups_reports_it() {
        let dir = scratch_dir("empty");
        let mut app = app_in(&[], dir);
        press(&mut app, &[KeyCode::Char('u')]);
        assert!(matches!(app.mode, Mode::Normal));
        assert!(app.status.as_ref().unwrap().text.starts_with("No backups found"));
    }

    #[test]
    fn csv_import_adds_students_and_lists_skipped_rows() {
        let dir = scratch_dir("csv");
        std::fs::create_dir_all(&dir).unwrap();
        let csv = dir.join("roster.csv");
        std::fs::write(
            &csv,
            "Student ID,First Name,Last Name,Section\n\
             123456789,Ana,Lopez,Flute\n\
             bad,Ben,Adams,Tuba\n",
        )
        .unwrap();

        let mut app = app_in(&[], dir.clone());
        press(&mut app, &[KeyCode::Char('c')]);
        type_text(&mut app, &csv.display().to_string());
        press(&mut app, &[KeyCode::Enter]);

        let Mode::Notice(notice) = &app.mode else {
            panic!("skipped rows should be listed");
        };
        assert_eq!(notice.lines, ["Line 3: Student ID must be exactly 9 digits."]);
        assert_eq!(app.roster.students.len(), 1);
        assert_eq!(app.roster.students[0].full_name(), "Ana Lopez");

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn csv_import_error_keeps_the_prompt_open() {
        let mut app = app_with(&[]);
        press(&mut app, &[KeyCode::Char('c')]);
        type_text(&mut app, "/nonexistent/roster.csv");
        press(&mut app, &[KeyCode::Enter]);

        let Mode::ImportingCsv(prompt) = &app.mode else {
            panic!("prompt should stay open");
        };
        assert!(prompt.error.is_some());
        assert!(matches!(app.status.as_ref().unwrap().kind, StatusKind::Error));
    }
}
