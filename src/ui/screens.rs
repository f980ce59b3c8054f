use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use anyhow::Result;
use rusqlite::Connection;

use crate::db::{fetch_available_items, list_backups};
use crate::models::{Item, ItemKind, ItemRef, OutstandingItem, Section, Student};

/// Clamp `selected + offset` into `0..len`.
fn offset_selection(selected: usize, len: usize, offset: isize) -> usize {
    if len == 0 {
        return 0;
    }
    let new = (selected as isize + offset).clamp(0, len as isize - 1);
    new as usize
}

fn matches_query(haystacks: &[&str], query: &str) -> bool {
    let query = query.trim().to_lowercase();
    query.is_empty() || haystacks.iter().any(|h| h.to_lowercase().contains(&query))
}

/// Roster shown on the home screen, with a per-student count of held items.
pub(crate) struct StudentsScreen {
    pub(crate) students: Vec<Student>,
    pub(crate) holdings: HashMap<String, usize>,
    pub(crate) filtered_students: Vec<Student>,
    pub(crate) filter: Option<String>,
    pub(crate) selected: usize,
}

impl StudentsScreen {
    pub(crate) fn new(students: Vec<Student>, holdings: HashMap<String, usize>) -> Self {
        let mut screen = Self {
            students,
            holdings,
            filtered_students: Vec::new(),
            filter: None,
            selected: 0,
        };
        screen.apply_filter();
        screen
    }

    fn apply_filter(&mut self) {
        let query = self.filter.clone().unwrap_or_default();
        self.filtered_students = self
            .students
            .iter()
            .filter(|s| {
                matches_query(
                    &[
                        s.first_name.as_str(),
                        s.last_name.as_str(),
                        s.student_id.as_str(),
                        s.section.as_str(),
                    ],
                    &query,
                )
            })
            .cloned()
            .collect();
        self.selected = offset_selection(self.selected, self.filtered_students.len(), 0);
    }

    pub(crate) fn set_filter(&mut self, filter: Option<String>) {
        self.filter = filter;
        self.apply_filter();
    }

    pub(crate) fn set_students(&mut self, students: Vec<Student>, holdings: HashMap<String, usize>) {
        self.students = students;
        self.holdings = holdings;
        self.apply_filter();
    }

    pub(crate) fn held_by(&self, student_id: &str) -> usize {
        self.holdings.get(student_id).copied().unwrap_or(0)
    }

    /// Move the cursor onto `student_id` if it is visible.
    pub(crate) fn focus(&mut self, student_id: &str) {
        if let Some(idx) = self
            .filtered_students
            .iter()
            .position(|s| s.student_id == student_id)
        {
            self.selected = idx;
        }
    }

    pub(crate) fn current_student(&self) -> Option<&Student> {
        self.filtered_students.get(self.selected)
    }

    pub(crate) fn move_selection(&mut self, offset: isize) {
        self.selected = offset_selection(self.selected, self.filtered_students.len(), offset);
    }

    pub(crate) fn select_first(&mut self) {
        self.selected = 0;
    }

    pub(crate) fn select_last(&mut self) {
        self.selected = self.filtered_students.len().saturating_sub(1);
    }
}

/// One student with everything they currently hold.
pub(crate) struct StudentDetailScreen {
    pub(crate) student: Student,
    pub(crate) items: Vec<Item>,
    pub(crate) selected: usize,
}

impl StudentDetailScreen {
    pub(crate) fn new(student: Student, items: Vec<Item>) -> Self {
        Self {
            student,
            items,
            selected: 0,
        }
    }

    pub(crate) fn set_items(&mut self, items: Vec<Item>) {
        self.items = items;
        self.selected = offset_selection(self.selected, self.items.len(), 0);
    }

    pub(crate) fn current_item(&self) -> Option<&Item> {
        self.items.get(self.selected)
    }

    pub(crate) fn move_selection(&mut self, offset: isize) {
        self.selected = offset_selection(self.selected, self.items.len(), offset);
    }
}

/// Items of one kind in status order.
pub(crate) struct InventoryScreen {
    pub(crate) kind: ItemKind,
    pub(crate) items: Vec<Item>,
    pub(crate) filtered_items: Vec<Item>,
    pub(crate) filter: Option<String>,
    pub(crate) selected: usize,
}

impl InventoryScreen {
    pub(crate) fn new(kind: ItemKind, items: Vec<Item>) -> Self {
        let mut screen = Self {
            kind,
            items,
            filtered_items: Vec::new(),
            filter: None,
            selected: 0,
        };
        screen.apply_filter();
        screen
    }

    fn apply_filter(&mut self) {
        let query = self.filter.clone().unwrap_or_default();
        self.filtered_items = self
            .items
            .iter()
            .filter(|item| {
                matches_query(
                    &[
                        item.tag.as_str(),
                        item.notes.as_str(),
                        item.student_id.as_deref().unwrap_or_default(),
                    ],
                    &query,
                )
            })
            .cloned()
            .collect();
        self.selected = offset_selection(self.selected, self.filtered_items.len(), 0);
    }

    pub(crate) fn set_filter(&mut self, filter: Option<String>) {
        self.filter = filter;
        self.apply_filter();
    }

    /// Replace the rows, keeping the cursor on `focus` when given.
    pub(crate) fn set_items(&mut self, items: Vec<Item>, focus: Option<ItemRef>) {
        self.items = items;
        self.apply_filter();
        if let Some(focus) = focus {
            if let Some(idx) = self
                .filtered_items
                .iter()
                .position(|item| item.item_ref() == focus)
            {
                self.selected = idx;
            }
        }
    }

    /// Switch to another kind. The filter is dropped since tags differ.
    pub(crate) fn switch_kind(&mut self, kind: ItemKind, items: Vec<Item>) {
        self.kind = kind;
        self.filter = None;
        self.selected = 0;
        self.items = items;
        self.apply_filter();
    }

    pub(crate) fn current_item(&self) -> Option<&Item> {
        self.filtered_items.get(self.selected)
    }

    pub(crate) fn move_selection(&mut self, offset: isize) {
        self.selected = offset_selection(self.selected, self.filtered_items.len(), offset);
    }

    pub(crate) fn select_first(&mut self) {
        self.selected = 0;
    }

    pub(crate) fn select_last(&mut self) {
        self.selected = self.filtered_items.len().saturating_sub(1);
    }
}

/// Checked-out items of one kind, optionally for one section.
pub(crate) struct OutstandingScreen {
    pub(crate) kind: ItemKind,
    pub(crate) section: Option<Section>,
    pub(crate) rows: Vec<OutstandingItem>,
    pub(crate) selected: usize,
}

impl OutstandingScreen {
    pub(crate) fn new(kind: ItemKind, section: Option<Section>, rows: Vec<OutstandingItem>) -> Self {
        Self {
            kind,
            section,
            rows,
            selected: 0,
        }
    }

    pub(crate) fn set_rows(&mut self, rows: Vec<OutstandingItem>) {
        self.rows = rows;
        self.selected = offset_selection(self.selected, self.rows.len(), 0);
    }

    pub(crate) fn current_row(&self) -> Option<&OutstandingItem> {
        self.rows.get(self.selected)
    }

    pub(crate) fn move_selection(&mut self, offset: isize) {
        self.selected = offset_selection(self.selected, self.rows.len(), offset);
    }
}

/// All sections → first → … → last → all sections.
pub(crate) fn next_section_filter(current: Option<Section>) -> Option<Section> {
    match current {
        None => Section::ALL.first().copied(),
        Some(section) => {
            let idx = Section::ALL.iter().position(|s| *s == section)?;
            Section::ALL.get(idx + 1).copied()
        }
    }
}

/// Multi-select picker of Available items for one student.
#[derive(Clone)]
pub(crate) struct AssignState {
    pub(crate) student_id: String,
    pub(crate) student_name: String,
    pub(crate) items: Vec<Item>,
    pub(crate) selected: usize,
    pub(crate) checked: HashSet<ItemRef>,
}

impl AssignState {
    pub(crate) fn load(conn: &Connection, student: &Student) -> Result<Self> {
        let items = fetch_available_items(conn)?;
        Ok(Self::new(student, items))
    }

    fn new(student: &Student, items: Vec<Item>) -> Self {
        Self {
            student_id: student.student_id.clone(),
            student_name: student.full_name(),
            items,
            selected: 0,
            checked: HashSet::new(),
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub(crate) fn move_selection(&mut self, offset: isize) {
        self.selected = offset_selection(self.selected, self.items.len(), offset);
    }

    pub(crate) fn select_first(&mut self) {
        self.selected = 0;
    }

    pub(crate) fn select_last(&mut self) {
        self.selected = self.items.len().saturating_sub(1);
    }

    pub(crate) fn is_checked(&self, index: usize) -> bool {
        self.items
            .get(index)
            .is_some_and(|item| self.checked.contains(&item.item_ref()))
    }

    pub(crate) fn toggle_current_selection(&mut self) {
        if let Some(item) = self.items.get(self.selected) {
            let item_ref = item.item_ref();
            if !self.checked.remove(&item_ref) {
                self.checked.insert(item_ref);
            }
        }
    }

    /// Checked items in list order, or the highlighted one when nothing is
    /// checked.
    pub(crate) fn requested(&self) -> Vec<ItemRef> {
        let checked: Vec<ItemRef> = self
            .items
            .iter()
            .map(Item::item_ref)
            .filter(|item_ref| self.checked.contains(item_ref))
            .collect();
        if checked.is_empty() {
            self.items.get(self.selected).map(Item::item_ref).into_iter().collect()
        } else {
            checked
        }
    }
}

/// Snapshots offered for a restore, newest first. Choosing one asks for a
/// second confirmation before anything is replaced.
#[derive(Clone)]
pub(crate) struct BackupPicker {
    pub(crate) backups: Vec<PathBuf>,
    pub(crate) selected: usize,
    pub(crate) confirming: bool,
}

impl BackupPicker {
    pub(crate) fn load(dir: &Path) -> Result<Self> {
        Ok(Self::new(list_backups(dir)?))
    }

    fn new(backups: Vec<PathBuf>) -> Self {
        Self {
            backups,
            selected: 0,
            confirming: false,
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.backups.is_empty()
    }

    pub(crate) fn current(&self) -> Option<&PathBuf> {
        self.backups.get(self.selected)
    }

    pub(crate) fn move_selection(&mut self, offset: isize) {
        self.selected = offset_selection(self.selected, self.backups.len(), offset);
    }

    /// File name of an entry, for display.
    pub(crate) fn label(path: &Path) -> String {
        path.file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ItemDetails, ItemStatus};

    fn item(kind: ItemKind, id: i64, tag: &str) -> Item {
        Item {
            id,
            kind,
            tag: tag.to_string(),
            status: ItemStatus::Available,
            student_id: None,
            notes: String::new(),
            details: ItemDetails::default_for(kind),
        }
    }

    fn roster() -> Vec<Student> {
        vec![
            Student::new("100000001", "Amy", "Adams", Section::Flute),
            Student::new("100000002", "Ben", "Baker", Section::Tuba),
            Student::new("100000003", "Cal", "Chen", Section::Tuba),
        ]
    }

    #[test]
    fn student_filter_matches_name_id_and_section() {
        let mut screen = StudentsScreen::new(roster(), HashMap::new());
        screen.set_filter(Some("tuba".to_string()));
        assert_eq!(screen.filtered_students.len(), 2);
        screen.set_filter(Some("0003".to_string()));
        assert_eq!(screen.current_student().unwrap().last_name, "Chen");
        screen.set_filter(None);
        assert_eq!(screen.filtered_students.len(), 3);
    }

    #[test]
    fn selection_stays_in_bounds() {
        let mut screen = StudentsScreen::new(roster(), HashMap::new());
        screen.move_selection(10);
        assert_eq!(screen.selected, 2);
        screen.set_filter(Some("Adams".to_string()));
        assert_eq!(screen.selected, 0);
        screen.move_selection(-3);
        assert_eq!(screen.selected, 0);
    }

    #[test]
    fn holdings_default_to_zero() {
        let mut holdings = HashMap::new();
        holdings.insert("100000002".to_string(), 3);
        let screen = StudentsScreen::new(roster(), holdings);
        assert_eq!(screen.held_by("100000002"), 3);
        assert_eq!(screen.held_by("100000001"), 0);
    }

    #[test]
    fn section_filter_cycles_back_to_all() {
        let mut filter = None;
        let mut seen = Vec::new();
        loop {
            filter = next_section_filter(filter);
            match filter {
                Some(section) => seen.push(section),
                None => break,
            }
        }
        assert_eq!(seen, Section::ALL.to_vec());
    }

    #[test]
    fn inventory_focus_survives_reload() {
        let items = vec![item(ItemKind::Shako, 1, "1"), item(ItemKind::Shako, 2, "2")];
        let mut screen = InventoryScreen::new(ItemKind::Shako, items.clone());
        screen.set_items(items, Some(ItemRef::new(ItemKind::Shako, 2)));
        assert_eq!(screen.current_item().unwrap().id, 2);

        screen.switch_kind(ItemKind::Coat, Vec::new());
        assert!(screen.current_item().is_none());
    }

    #[test]
    fn picker_requests_checked_items_or_highlighted_one() {
        let student = Student::new("123456789", "Ana", "Lopez", Section::Flute);
        let mut state = AssignState::new(
            &student,
            vec![
                item(ItemKind::Shako, 1, "1"),
                item(ItemKind::Coat, 1, "1"),
                item(ItemKind::Pants, 1, "1"),
            ],
        );
        state.move_selection(1);
        assert_eq!(state.requested(), vec![ItemRef::new(ItemKind::Coat, 1)]);

        state.move_selection(1);
        state.toggle_current_selection();
        state.select_first();
        state.toggle_current_selection();
        assert!(state.is_checked(0));
        assert!(!state.is_checked(1));
        assert_eq!(
            state.requested(),
            vec![ItemRef::new(ItemKind::Shako, 1), ItemRef::new(ItemKind::Pants, 1)]
        );
    }

    #[test]
    fn backup_picker_clamps_and_labels() {
        let mut picker = BackupPicker::new(vec![
            PathBuf::from("/backups/equipment-20250301-080000.sqlite"),
            PathBuf::from("/backups/equipment-20240101-080000.sqlite"),
        ]);
        picker.move_selection(5);
        assert_eq!(picker.selected, 1);
        let current = picker.current().unwrap();
        assert_eq!(BackupPicker::label(current), "equipment-20240101-080000.sqlite");
        assert!(BackupPicker::new(Vec::new()).current().is_none());
    }
}
