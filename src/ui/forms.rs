use std::path::PathBuf;

use anyhow::{anyhow, Result};
use ratatui::style::{Color, Style};
use ratatui::text::{Line, Span};

use crate::models::{
    Condition, Item, ItemDetails, ItemKind, ItemStatus, NewItem, Section, Student, PHONE_LEN,
    STUDENT_ID_LEN,
};

/// Fields of the student form, in display order.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub(crate) enum StudentField {
    StudentId,
    FirstName,
    LastName,
    Section,
    Status,
    Phone,
    Email,
    YearCameUp,
    GuardianName,
    GuardianPhone,
    SpatsSize,
    GlovesSize,
}

impl StudentField {
    pub(crate) const ALL: [StudentField; 12] = [
        StudentField::StudentId,
        StudentField::FirstName,
        StudentField::LastName,
        StudentField::Section,
        StudentField::Status,
        StudentField::Phone,
        StudentField::Email,
        StudentField::YearCameUp,
        StudentField::GuardianName,
        StudentField::GuardianPhone,
        StudentField::SpatsSize,
        StudentField::GlovesSize,
    ];

    pub(crate) fn label(self) -> &'static str {
        match self {
            StudentField::StudentId => "Student ID",
            StudentField::FirstName => "First Name",
            StudentField::LastName => "Last Name",
            StudentField::Section => "Section",
            StudentField::Status => "Status",
            StudentField::Phone => "Phone",
            StudentField::Email => "Email",
            StudentField::YearCameUp => "Year Came Up",
            StudentField::GuardianName => "Guardian Name",
            StudentField::GuardianPhone => "Guardian Phone",
            StudentField::SpatsSize => "Spats Size",
            StudentField::GlovesSize => "Gloves Size",
        }
    }

    /// Choice fields are cycled with the arrow keys instead of typed.
    pub(crate) fn is_choice(self) -> bool {
        matches!(self, StudentField::Section | StudentField::Status)
    }

    fn required(self) -> bool {
        matches!(
            self,
            StudentField::StudentId | StudentField::FirstName | StudentField::LastName
        )
    }

    /// Digit-only fields and their maximum length.
    fn digit_limit(self) -> Option<usize> {
        match self {
            StudentField::StudentId => Some(STUDENT_ID_LEN),
            StudentField::Phone | StudentField::GuardianPhone => Some(PHONE_LEN),
            _ => None,
        }
    }

    fn index(self) -> usize {
        Self::ALL.iter().position(|f| *f == self).unwrap_or(0)
    }
}

/// Add/edit state for a student. The id is locked while editing because it
/// is the primary key.
#[derive(Clone)]
pub(crate) struct StudentForm {
    pub(crate) student: Student,
    pub(crate) active: StudentField,
    pub(crate) editing: bool,
    pub(crate) error: Option<String>,
}

impl StudentForm {
    pub(crate) fn new() -> Self {
        Self {
            student: Student::new("", "", "", Section::Trumpet),
            active: StudentField::StudentId,
            editing: false,
            error: None,
        }
    }

    pub(crate) fn from_student(student: &Student) -> Self {
        Self {
            student: student.clone(),
            active: StudentField::FirstName,
            editing: true,
            error: None,
        }
    }

    fn text(&self, field: StudentField) -> Option<&String> {
        let s = &self.student;
        match field {
            StudentField::StudentId => Some(&s.student_id),
            StudentField::FirstName => Some(&s.first_name),
            StudentField::LastName => Some(&s.last_name),
            StudentField::Phone => Some(&s.phone),
            StudentField::Email => Some(&s.email),
            StudentField::YearCameUp => Some(&s.year_came_up),
            StudentField::GuardianName => Some(&s.guardian_name),
            StudentField::GuardianPhone => Some(&s.guardian_phone),
            StudentField::SpatsSize => Some(&s.spats_size),
            StudentField::GlovesSize => Some(&s.gloves_size),
            StudentField::Section | StudentField::Status => None,
        }
    }

    fn text_mut(&mut self, field: StudentField) -> Option<&mut String> {
        if self.editing && field == StudentField::StudentId {
            return None;
        }
        let s = &mut self.student;
        match field {
            StudentField::StudentId => Some(&mut s.student_id),
            StudentField::FirstName => Some(&mut s.first_name),
            StudentField::LastName => Some(&mut s.last_name),
            StudentField::Phone => Some(&mut s.phone),
            StudentField::Email => Some(&mut s.email),
            StudentField::YearCameUp => Some(&mut s.year_came_up),
            StudentField::GuardianName => Some(&mut s.guardian_name),
            StudentField::GuardianPhone => Some(&mut s.guardian_phone),
            StudentField::SpatsSize => Some(&mut s.spats_size),
            StudentField::GlovesSize => Some(&mut s.gloves_size),
            StudentField::Section | StudentField::Status => None,
        }
    }

    /// Move focus down, skipping the locked id.
    pub(crate) fn toggle_field(&mut self) {
        self.step_field(1);
    }

    pub(crate) fn previous_field(&mut self) {
        self.step_field(StudentField::ALL.len() - 1);
    }

    fn step_field(&mut self, step: usize) {
        let len = StudentField::ALL.len();
        let mut idx = self.active.index();
        loop {
            idx = (idx + step) % len;
            let field = StudentField::ALL[idx];
            if !(self.editing && field == StudentField::StudentId) {
                self.active = field;
                return;
            }
        }
    }

    pub(crate) fn push_char(&mut self, ch: char) -> bool {
        if ch.is_control() {
            return false;
        }
        let field = self.active;
        let Some(value) = self.text_mut(field) else {
            return false;
        };
        if let Some(limit) = field.digit_limit() {
            if !ch.is_ascii_digit() || value.chars().count() >= limit {
                return false;
            }
        }
        value.push(ch);
        true
    }

    pub(crate) fn backspace(&mut self) {
        let field = self.active;
        if let Some(value) = self.text_mut(field) {
            value.pop();
        }
    }

    /// Step the active choice field. Returns false on text fields.
    pub(crate) fn cycle_choice(&mut self, forward: bool) -> bool {
        match self.active {
            StudentField::Section => {
                let s = self.student.section;
                self.student.section = if forward { s.next() } else { s.previous() };
                true
            }
            StudentField::Status => {
                let s = self.student.status;
                self.student.status = if forward { s.next() } else { s.previous() };
                true
            }
            _ => false,
        }
    }

    /// Trim and validate the inputs into a student ready to save.
    pub(crate) fn parse_inputs(&self) -> Result<Student> {
        let mut student = self.student.clone();
        for value in [
            &mut student.student_id,
            &mut student.first_name,
            &mut student.last_name,
            &mut student.phone,
            &mut student.email,
            &mut student.year_came_up,
            &mut student.guardian_name,
            &mut student.guardian_phone,
            &mut student.spats_size,
            &mut student.gloves_size,
        ] {
            *value = value.trim().to_string();
        }
        student.validate()?;
        Ok(student)
    }

    pub(crate) fn build_line(&self, field: StudentField) -> Line<'static> {
        let is_active = self.active == field;
        let locked = self.editing && field == StudentField::StudentId;

        let (display, empty) = match field {
            StudentField::Section => (format!("< {} >", self.student.section), false),
            StudentField::Status => (format!("< {} >", self.student.status), false),
            _ => {
                let value = self.text(field).cloned().unwrap_or_default();
                if value.is_empty() {
                    let placeholder = if field.required() {
                        "<required>"
                    } else {
                        "<optional>"
                    };
                    (placeholder.to_string(), true)
                } else {
                    (value, false)
                }
            }
        };

        let style = if locked {
            Style::default().fg(Color::DarkGray)
        } else if is_active {
            Style::default().fg(Color::Yellow)
        } else if empty {
            Style::default().fg(Color::DarkGray)
        } else {
            Style::default()
        };

        Line::from(vec![
            Span::raw(format!("{}: ", field.label())),
            Span::styled(display, style),
        ])
    }

    pub(crate) fn value_len(&self, field: StudentField) -> usize {
        self.text(field).map(|v| v.chars().count()).unwrap_or(0)
    }

    /// Row of the active field inside the form, for cursor placement.
    pub(crate) fn active_row(&self) -> usize {
        self.active.index()
    }
}

/// Fields of the item form. Which ones appear depends on the kind.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub(crate) enum ItemField {
    Tag,
    ShakoNum,
    CoatNum,
    PantsNum,
    HangerNum,
    GarmentBag,
    Name,
    InstrumentSection,
    CaseNumber,
    Model,
    Condition,
    Status,
    Notes,
}

impl ItemField {
    pub(crate) fn label(self, kind: ItemKind) -> &'static str {
        match self {
            ItemField::Tag => kind.tag_label(),
            ItemField::ShakoNum => "Shako #",
            ItemField::CoatNum => "Coat #",
            ItemField::PantsNum => "Pants #",
            ItemField::HangerNum => "Hanger #",
            ItemField::GarmentBag => "Garment Bag",
            ItemField::Name => "Name",
            ItemField::InstrumentSection => "Section",
            ItemField::CaseNumber => "Case #",
            ItemField::Model => "Model",
            ItemField::Condition => "Condition",
            ItemField::Status => "Status",
            ItemField::Notes => "Notes",
        }
    }

    pub(crate) fn is_choice(self) -> bool {
        matches!(self, ItemField::Condition | ItemField::Status)
    }

    fn numeric(self, kind: ItemKind) -> bool {
        match self {
            ItemField::Tag => kind.numeric_tag(),
            ItemField::ShakoNum | ItemField::CoatNum | ItemField::PantsNum | ItemField::HangerNum => {
                true
            }
            _ => false,
        }
    }
}

fn item_fields(kind: ItemKind, is_new: bool) -> Vec<ItemField> {
    let mut fields = match kind {
        ItemKind::Uniform => vec![
            ItemField::ShakoNum,
            ItemField::CoatNum,
            ItemField::PantsNum,
            ItemField::HangerNum,
            ItemField::GarmentBag,
        ],
        ItemKind::Instrument => vec![
            ItemField::Tag,
            ItemField::Name,
            ItemField::InstrumentSection,
            ItemField::CaseNumber,
            ItemField::Model,
            ItemField::Condition,
        ],
        ItemKind::Coat => vec![ItemField::Tag, ItemField::HangerNum],
        ItemKind::Shako | ItemKind::Pants | ItemKind::GarmentBag => vec![ItemField::Tag],
    };
    if is_new {
        fields.push(ItemField::Status);
    }
    fields.push(ItemField::Notes);
    fields
}

fn number_text(value: Option<i64>) -> String {
    value.map(|n| n.to_string()).unwrap_or_default()
}

fn parse_number(label: &str, raw: &str) -> Result<Option<i64>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    trimmed
        .parse::<i64>()
        .map(Some)
        .map_err(|_| anyhow!("{label} must be a whole number."))
}

/// Add/edit state for an item of one kind.
#[derive(Clone)]
pub(crate) struct ItemForm {
    pub(crate) kind: ItemKind,
    pub(crate) fields: Vec<ItemField>,
    pub(crate) active: usize,
    tag: String,
    shako_num: String,
    coat_num: String,
    pants_num: String,
    hanger_num: String,
    garment_bag: String,
    name: String,
    instrument_section: String,
    case_number: String,
    model: String,
    pub(crate) condition: Condition,
    pub(crate) status: ItemStatus,
    notes: String,
    pub(crate) error: Option<String>,
}

impl ItemForm {
    pub(crate) fn new(kind: ItemKind) -> Self {
        Self {
            kind,
            fields: item_fields(kind, true),
            active: 0,
            tag: String::new(),
            shako_num: String::new(),
            coat_num: String::new(),
            pants_num: String::new(),
            hanger_num: String::new(),
            garment_bag: String::new(),
            name: String::new(),
            instrument_section: String::new(),
            case_number: String::new(),
            model: String::new(),
            condition: Condition::Good,
            status: ItemStatus::Available,
            notes: String::new(),
            error: None,
        }
    }

    /// Populate the form from an existing item. Status is left out; it
    /// changes through assignment and the status key.
    pub(crate) fn from_item(item: &Item) -> Self {
        let mut form = Self::new(item.kind);
        form.fields = item_fields(item.kind, false);
        form.tag = item.tag.clone();
        form.status = item.status;
        form.notes = item.notes.clone();
        match &item.details {
            ItemDetails::Uniform {
                shako_num,
                hanger_num,
                garment_bag,
                coat_num,
                pants_num,
            } => {
                form.shako_num = number_text(*shako_num);
                form.hanger_num = number_text(*hanger_num);
                form.garment_bag = garment_bag.clone();
                form.coat_num = number_text(*coat_num);
                form.pants_num = number_text(*pants_num);
            }
            ItemDetails::Instrument {
                name,
                section,
                case_number,
                model,
                condition,
            } => {
                form.name = name.clone();
                form.instrument_section = section.clone();
                form.case_number = case_number.clone();
                form.model = model.clone();
                form.condition = *condition;
            }
            ItemDetails::Coat { hanger_num } => form.hanger_num = number_text(*hanger_num),
            ItemDetails::Plain => {}
        }
        form
    }

    pub(crate) fn active_field(&self) -> ItemField {
        self.fields[self.active.min(self.fields.len() - 1)]
    }

    fn text(&self, field: ItemField) -> Option<&String> {
        match field {
            ItemField::Tag => Some(&self.tag),
            ItemField::ShakoNum => Some(&self.shako_num),
            ItemField::CoatNum => Some(&self.coat_num),
            ItemField::PantsNum => Some(&self.pants_num),
            ItemField::HangerNum => Some(&self.hanger_num),
            ItemField::GarmentBag => Some(&self.garment_bag),
            ItemField::Name => Some(&self.name),
            ItemField::InstrumentSection => Some(&self.instrument_section),
            ItemField::CaseNumber => Some(&self.case_number),
            ItemField::Model => Some(&self.model),
            ItemField::Notes => Some(&self.notes),
            ItemField::Condition | ItemField::Status => None,
        }
    }

    fn text_mut(&mut self, field: ItemField) -> Option<&mut String> {
        match field {
            ItemField::Tag => Some(&mut self.tag),
            ItemField::ShakoNum => Some(&mut self.shako_num),
            ItemField::CoatNum => Some(&mut self.coat_num),
            ItemField::PantsNum => Some(&mut self.pants_num),
            ItemField::HangerNum => Some(&mut self.hanger_num),
            ItemField::GarmentBag => Some(&mut self.garment_bag),
            ItemField::Name => Some(&mut self.name),
            ItemField::InstrumentSection => Some(&mut self.instrument_section),
            ItemField::CaseNumber => Some(&mut self.case_number),
            ItemField::Model => Some(&mut self.model),
            ItemField::Notes => Some(&mut self.notes),
            ItemField::Condition | ItemField::Status => None,
        }
    }

    pub(crate) fn toggle_field(&mut self) {
        self.active = (self.active + 1) % self.fields.len();
    }

    pub(crate) fn previous_field(&mut self) {
        self.active = (self.active + self.fields.len() - 1) % self.fields.len();
    }

    pub(crate) fn push_char(&mut self, ch: char) -> bool {
        if ch.is_control() {
            return false;
        }
        let field = self.active_field();
        let numeric = field.numeric(self.kind);
        match self.text_mut(field) {
            Some(value) if !numeric || ch.is_ascii_digit() => {
                value.push(ch);
                true
            }
            _ => false,
        }
    }

    pub(crate) fn backspace(&mut self) {
        let field = self.active_field();
        if let Some(value) = self.text_mut(field) {
            value.pop();
        }
    }

    pub(crate) fn cycle_choice(&mut self, forward: bool) -> bool {
        match self.active_field() {
            ItemField::Condition => {
                let c = self.condition;
                self.condition = if forward { c.next() } else { c.previous() };
                true
            }
            ItemField::Status => {
                let statuses = ItemStatus::UNASSIGNED;
                let idx = statuses
                    .iter()
                    .position(|s| *s == self.status)
                    .unwrap_or(0);
                let step = if forward { 1 } else { statuses.len() - 1 };
                self.status = statuses[(idx + step) % statuses.len()];
                true
            }
            _ => false,
        }
    }

    fn parse_details(&self) -> Result<ItemDetails> {
        let label = |field: ItemField| field.label(self.kind);
        let details = match self.kind {
            ItemKind::Uniform => ItemDetails::Uniform {
                shako_num: parse_number(label(ItemField::ShakoNum), &self.shako_num)?,
                hanger_num: parse_number(label(ItemField::HangerNum), &self.hanger_num)?,
                garment_bag: self.garment_bag.trim().to_string(),
                coat_num: parse_number(label(ItemField::CoatNum), &self.coat_num)?,
                pants_num: parse_number(label(ItemField::PantsNum), &self.pants_num)?,
            },
            ItemKind::Instrument => ItemDetails::Instrument {
                name: self.name.trim().to_string(),
                section: self.instrument_section.trim().to_string(),
                case_number: self.case_number.trim().to_string(),
                model: self.model.trim().to_string(),
                condition: self.condition,
            },
            ItemKind::Coat => ItemDetails::Coat {
                hanger_num: parse_number(label(ItemField::HangerNum), &self.hanger_num)?,
            },
            ItemKind::Shako | ItemKind::Pants | ItemKind::GarmentBag => ItemDetails::Plain,
        };
        Ok(details)
    }

    fn parsed_tag(&self) -> Result<String> {
        if !self.kind.has_user_tag() {
            return Ok(self.tag.clone());
        }
        Ok(self.kind.parse_tag(&self.tag)?.to_string())
    }

    pub(crate) fn parse_new(&self) -> Result<NewItem> {
        Ok(NewItem {
            kind: self.kind,
            tag: self.parsed_tag()?,
            status: self.status,
            notes: self.notes.trim().to_string(),
            details: self.parse_details()?,
        })
    }

    /// Apply the edits on top of `item`, keeping its status and holder.
    pub(crate) fn parse_edit(&self, item: &Item) -> Result<Item> {
        Ok(Item {
            tag: self.parsed_tag()?,
            notes: self.notes.trim().to_string(),
            details: self.parse_details()?,
            ..item.clone()
        })
    }

    pub(crate) fn build_line(&self, field: ItemField) -> Line<'static> {
        let is_active = self.active_field() == field;
        let (display, empty) = match field {
            ItemField::Condition => (format!("< {} >", self.condition), false),
            ItemField::Status => (format!("< {} >", self.status), false),
            _ => {
                let value = self.text(field).cloned().unwrap_or_default();
                if value.is_empty() {
                    let placeholder = if field == ItemField::Tag {
                        "<required>"
                    } else {
                        "<optional>"
                    };
                    (placeholder.to_string(), true)
                } else {
                    (value, false)
                }
            }
        };

        let style = if is_active {
            Style::default().fg(Color::Yellow)
        } else if empty {
            Style::default().fg(Color::DarkGray)
        } else {
            Style::default()
        };

        Line::from(vec![
            Span::raw(format!("{}: ", field.label(self.kind))),
            Span::styled(display, style),
        ])
    }

    pub(crate) fn value_len(&self, field: ItemField) -> usize {
        self.text(field).map(|v| v.chars().count()).unwrap_or(0)
    }
}

/// Confirmation state for deleting a student.
#[derive(Clone)]
pub(crate) struct ConfirmStudentDelete {
    pub(crate) student_id: String,
    pub(crate) name: String,
    pub(crate) held: usize,
}

impl ConfirmStudentDelete {
    pub(crate) fn new(student: &Student, held: usize) -> Self {
        Self {
            student_id: student.student_id.clone(),
            name: student.full_name(),
            held,
        }
    }
}

/// Where a released item goes.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub(crate) enum ReleaseChoice {
    Available,
    Maintenance,
    Retired,
}

impl ReleaseChoice {
    pub(crate) fn status(self) -> ItemStatus {
        match self {
            ReleaseChoice::Available => ItemStatus::Available,
            ReleaseChoice::Maintenance => ItemStatus::Maintenance,
            ReleaseChoice::Retired => ItemStatus::Retired,
        }
    }
}

/// Picks the status an item returns to.
#[derive(Clone)]
pub(crate) struct ReleaseDialog {
    pub(crate) item: Item,
    pub(crate) selection: ReleaseChoice,
}

impl ReleaseDialog {
    pub(crate) fn new(item: Item) -> Self {
        Self {
            item,
            selection: ReleaseChoice::Available,
        }
    }

    /// Available → Maintenance → Retired.
    pub(crate) fn next(&mut self) {
        self.selection = match self.selection {
            ReleaseChoice::Available => ReleaseChoice::Maintenance,
            ReleaseChoice::Maintenance => ReleaseChoice::Retired,
            ReleaseChoice::Retired => ReleaseChoice::Available,
        };
    }

    pub(crate) fn previous(&mut self) {
        self.selection = match self.selection {
            ReleaseChoice::Available => ReleaseChoice::Retired,
            ReleaseChoice::Maintenance => ReleaseChoice::Available,
            ReleaseChoice::Retired => ReleaseChoice::Maintenance,
        };
    }

    pub(crate) fn labels(&self) -> [&'static str; 3] {
        ["Available", "Maintenance", "Retired"]
    }

    pub(crate) fn selected_index(&self) -> usize {
        match self.selection {
            ReleaseChoice::Available => 0,
            ReleaseChoice::Maintenance => 1,
            ReleaseChoice::Retired => 2,
        }
    }
}

/// Blocking message that must be dismissed before anything else happens.
#[derive(Clone)]
pub(crate) struct Notice {
    pub(crate) title: String,
    pub(crate) lines: Vec<String>,
}

impl Notice {
    pub(crate) fn new(title: impl Into<String>, lines: Vec<String>) -> Self {
        Self {
            title: title.into(),
            lines,
        }
    }
}

/// One-line prompt for the CSV file to import.
#[derive(Clone, Default)]
pub(crate) struct PathPrompt {
    pub(crate) input: String,
    pub(crate) error: Option<String>,
}

impl PathPrompt {
    /// The typed path, with a leading `~/` resolved against the home folder.
    pub(crate) fn path(&self) -> Option<PathBuf> {
        let raw = self.input.trim();
        if raw.is_empty() {
            return None;
        }
        match (raw.strip_prefix("~/"), directories::BaseDirs::new()) {
            (Some(rest), Some(base)) => Some(base.home_dir().join(rest)),
            _ => Some(PathBuf::from(raw)),
        }
    }

    pub(crate) fn push_char(&mut self, ch: char) {
        if !ch.is_control() {
            self.input.push(ch);
            self.error = None;
        }
    }

    pub(crate) fn backspace(&mut self) {
        self.input.pop();
    }
}
