//! Domain models that mirror the SQLite schema and get passed throughout the
//! TUI. These stay light-weight data holders; the persistence layer owns the
//! queries and the UI owns presentation.

use std::fmt;
use std::str::FromStr;

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};

use crate::error::InventoryError;

/// Declare a closed set of values stored as TEXT in SQLite. The generated type
/// round-trips through `as_str`/`FromStr` and plugs straight into rusqlite
/// parameters and row getters.
macro_rules! text_enum {
    (
        $(#[$meta:meta])*
        $name:ident, $what:literal {
            $($variant:ident => $text:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }

            /// Next value in declaration order, wrapping around.
            pub fn next(self) -> Self {
                let idx = Self::ALL.iter().position(|v| *v == self).unwrap_or(0);
                Self::ALL[(idx + 1) % Self::ALL.len()]
            }

            /// Previous value in declaration order, wrapping around.
            pub fn previous(self) -> Self {
                let idx = Self::ALL.iter().position(|v| *v == self).unwrap_or(0);
                Self::ALL[(idx + Self::ALL.len() - 1) % Self::ALL.len()]
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = InventoryError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let wanted = s.trim();
                Self::ALL
                    .iter()
                    .copied()
                    .find(|v| v.as_str().eq_ignore_ascii_case(wanted))
                    .ok_or_else(|| {
                        InventoryError::validation(format!("Unknown {} '{}'.", $what, wanted))
                    })
            }
        }

        impl ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.as_str()))
            }
        }

        impl FromSql for $name {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                let text = value.as_str()?;
                text.parse()
                    .map_err(|err: InventoryError| FromSqlError::Other(Box::new(err)))
            }
        }
    };
}

text_enum! {
    /// Lifecycle state of an inventory item. Declaration order is the display
    /// precedence used by every status-sorted listing.
    ItemStatus, "status" {
        Assigned => "Assigned",
        Available => "Available",
        Maintenance => "Maintenance",
        Retired => "Retired",
    }
}

impl ItemStatus {
    /// Rank used when ordering tables: Assigned first, Retired last.
    pub fn precedence(self) -> u8 {
        match self {
            ItemStatus::Assigned => 1,
            ItemStatus::Available => 2,
            ItemStatus::Maintenance => 3,
            ItemStatus::Retired => 4,
        }
    }

    /// Statuses an item may be parked in while nobody holds it.
    pub const UNASSIGNED: &'static [ItemStatus] = &[
        ItemStatus::Available,
        ItemStatus::Maintenance,
        ItemStatus::Retired,
    ];
}

text_enum! {
    /// Enrollment status of a student.
    StudentStatus, "student status" {
        Student => "Student",
        Former => "Former",
        Alumni => "Alumni",
    }
}

text_enum! {
    /// Band section a student plays in.
    Section, "section" {
        Trumpet => "Trumpet",
        Trombone => "Trombone",
        Euphonium => "Euphonium",
        FrenchHorn => "French Horn",
        Tuba => "Tuba",
        Flute => "Flute",
        Clarinet => "Clarinet",
        Saxophone => "Saxophone",
        Bassoon => "Bassoon",
        Oboe => "Oboe",
        Percussion => "Percussion",
        Flags => "Flags",
    }
}

text_enum! {
    /// Physical condition recorded for instruments.
    Condition, "condition" {
        Excellent => "Excellent",
        Good => "Good",
        Fair => "Fair",
        Poor => "Poor",
    }
}

/// Length of a valid student identifier.
pub const STUDENT_ID_LEN: usize = 9;
/// Length of a valid phone number.
pub const PHONE_LEN: usize = 10;

/// Check that a student id is exactly nine ASCII digits.
pub fn validate_student_id(student_id: &str) -> Result<(), InventoryError> {
    if student_id.len() == STUDENT_ID_LEN && student_id.chars().all(|c| c.is_ascii_digit()) {
        Ok(())
    } else {
        Err(InventoryError::validation(
            "Student ID must be exactly 9 digits.",
        ))
    }
}

fn validate_phone(label: &str, value: &str) -> Result<(), InventoryError> {
    if value.is_empty()
        || (value.len() == PHONE_LEN && value.chars().all(|c| c.is_ascii_digit()))
    {
        Ok(())
    } else {
        Err(InventoryError::validation(format!(
            "{label} must be exactly 10 digits or left blank."
        )))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// A student who can hold equipment. Optional text columns are kept as empty
/// strings in memory and stored as NULL.
pub struct Student {
    /// Nine-digit school identifier, also the primary key.
    pub student_id: String,
    pub first_name: String,
    pub last_name: String,
    pub section: Section,
    pub status: StudentStatus,
    pub phone: String,
    pub email: String,
    pub year_came_up: String,
    pub guardian_name: String,
    pub guardian_phone: String,
    pub spats_size: String,
    pub gloves_size: String,
}

impl Student {
    /// Build a student with only the required fields filled in.
    pub fn new(student_id: &str, first_name: &str, last_name: &str, section: Section) -> Self {
        Self {
            student_id: student_id.to_string(),
            first_name: first_name.to_string(),
            last_name: last_name.to_string(),
            section,
            status: StudentStatus::Student,
            phone: String::new(),
            email: String::new(),
            year_came_up: String::new(),
            guardian_name: String::new(),
            guardian_phone: String::new(),
            spats_size: String::new(),
            gloves_size: String::new(),
        }
    }

    /// `First Last`, used in confirmations and notices.
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }

    /// `Last, First`, used in sorted tables.
    pub fn display_name(&self) -> String {
        format!("{}, {}", self.last_name, self.first_name)
    }

    /// Enforce the required-field and format rules before any write.
    pub fn validate(&self) -> Result<(), InventoryError> {
        validate_student_id(&self.student_id)?;
        if self.first_name.trim().is_empty() || self.last_name.trim().is_empty() {
            return Err(InventoryError::validation(
                "First Name and Last Name cannot be blank.",
            ));
        }
        validate_phone("Phone", &self.phone)?;
        validate_phone("Guardian Phone", &self.guardian_phone)?;
        Ok(())
    }
}

impl fmt::Display for Student {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.display_name(), self.student_id)
    }
}

/// The kinds of equipment tracked, one table each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ItemKind {
    Uniform,
    Instrument,
    Shako,
    Coat,
    Pants,
    GarmentBag,
}

impl ItemKind {
    pub const ALL: &'static [ItemKind] = &[
        ItemKind::Uniform,
        ItemKind::Instrument,
        ItemKind::Shako,
        ItemKind::Coat,
        ItemKind::Pants,
        ItemKind::GarmentBag,
    ];

    pub fn label(self) -> &'static str {
        match self {
            ItemKind::Uniform => "Uniform",
            ItemKind::Instrument => "Instrument",
            ItemKind::Shako => "Shako",
            ItemKind::Coat => "Coat",
            ItemKind::Pants => "Pants",
            ItemKind::GarmentBag => "Garment Bag",
        }
    }

    /// Name of the label shown next to the tag in forms.
    pub fn tag_label(self) -> &'static str {
        match self {
            ItemKind::Uniform => "Uniform #",
            ItemKind::Instrument => "Serial",
            ItemKind::Shako => "Shako #",
            ItemKind::Coat => "Coat #",
            ItemKind::Pants => "Pants #",
            ItemKind::GarmentBag => "Bag #",
        }
    }

    pub fn table(self) -> &'static str {
        match self {
            ItemKind::Uniform => "uniforms",
            ItemKind::Instrument => "instruments",
            ItemKind::Shako => "shakos",
            ItemKind::Coat => "coats",
            ItemKind::Pants => "pants",
            ItemKind::GarmentBag => "garment_bags",
        }
    }

    /// Column holding the human-facing identifier. Uniform sets have none of
    /// their own, so their row id doubles as the tag.
    pub fn tag_column(self) -> &'static str {
        match self {
            ItemKind::Uniform => "id",
            ItemKind::Instrument => "instrument_serial",
            ItemKind::Shako => "shako_num",
            ItemKind::Coat => "coat_num",
            ItemKind::Pants => "pants_num",
            ItemKind::GarmentBag => "bag_num",
        }
    }

    /// Whether the tag column stores integers.
    pub fn numeric_tag(self) -> bool {
        matches!(
            self,
            ItemKind::Uniform | ItemKind::Shako | ItemKind::Coat | ItemKind::Pants
        )
    }

    /// Whether the tag is entered by the user or assigned by the database.
    pub fn has_user_tag(self) -> bool {
        self != ItemKind::Uniform
    }

    /// Kind-specific columns in the order `ItemDetails` reads them.
    pub fn detail_columns(self) -> &'static [&'static str] {
        match self {
            ItemKind::Uniform => &[
                "shako_num",
                "hanger_num",
                "garment_bag",
                "coat_num",
                "pants_num",
            ],
            ItemKind::Instrument => &[
                "instrument_name",
                "instrument_section",
                "instrument_case",
                "model",
                "condition",
            ],
            ItemKind::Coat => &["hanger_num"],
            ItemKind::Shako | ItemKind::Pants | ItemKind::GarmentBag => &[],
        }
    }

    /// Column of the uniform table that names an item of this kind, for
    /// the kinds a uniform set is built from.
    pub fn uniform_column(self) -> Option<&'static str> {
        match self {
            ItemKind::Shako => Some("shako_num"),
            ItemKind::Coat => Some("coat_num"),
            ItemKind::Pants => Some("pants_num"),
            ItemKind::GarmentBag => Some("garment_bag"),
            ItemKind::Uniform | ItemKind::Instrument => None,
        }
    }

    pub fn next(self) -> Self {
        let idx = Self::ALL.iter().position(|k| *k == self).unwrap_or(0);
        Self::ALL[(idx + 1) % Self::ALL.len()]
    }

    pub fn previous(self) -> Self {
        let idx = Self::ALL.iter().position(|k| *k == self).unwrap_or(0);
        Self::ALL[(idx + Self::ALL.len() - 1) % Self::ALL.len()]
    }

    /// Parse user input into the value stored in the tag column.
    pub fn parse_tag(self, raw: &str) -> Result<TagValue, InventoryError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(InventoryError::validation(format!(
                "{} is required.",
                self.tag_label()
            )));
        }
        if self.numeric_tag() {
            trimmed
                .parse::<i64>()
                .map(TagValue::Number)
                .map_err(|_| {
                    InventoryError::validation(format!(
                        "{} must be a whole number.",
                        self.tag_label()
                    ))
                })
        } else {
            Ok(TagValue::Text(trimmed.to_string()))
        }
    }
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A parsed tag, bound with the column's native type so lookups hit the
/// unique index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagValue {
    Number(i64),
    Text(String),
}

impl ToSql for TagValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        match self {
            TagValue::Number(n) => n.to_sql(),
            TagValue::Text(s) => s.to_sql(),
        }
    }
}

impl fmt::Display for TagValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TagValue::Number(n) => write!(f, "{n}"),
            TagValue::Text(s) => f.write_str(s),
        }
    }
}

/// Stable handle to one item row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ItemRef {
    pub kind: ItemKind,
    pub id: i64,
}

impl ItemRef {
    pub fn new(kind: ItemKind, id: i64) -> Self {
        Self { kind, id }
    }
}

/// Columns that only exist for some kinds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemDetails {
    Uniform {
        shako_num: Option<i64>,
        hanger_num: Option<i64>,
        garment_bag: String,
        coat_num: Option<i64>,
        pants_num: Option<i64>,
    },
    Instrument {
        name: String,
        section: String,
        case_number: String,
        model: String,
        condition: Condition,
    },
    Coat {
        hanger_num: Option<i64>,
    },
    Plain,
}

impl ItemDetails {
    /// Empty details matching the given kind.
    pub fn default_for(kind: ItemKind) -> Self {
        match kind {
            ItemKind::Uniform => ItemDetails::Uniform {
                shako_num: None,
                hanger_num: None,
                garment_bag: String::new(),
                coat_num: None,
                pants_num: None,
            },
            ItemKind::Instrument => ItemDetails::Instrument {
                name: String::new(),
                section: String::new(),
                case_number: String::new(),
                model: String::new(),
                condition: Condition::Good,
            },
            ItemKind::Coat => ItemDetails::Coat { hanger_num: None },
            ItemKind::Shako | ItemKind::Pants | ItemKind::GarmentBag => ItemDetails::Plain,
        }
    }

    /// Whether these details belong to the given kind's table.
    pub fn matches(&self, kind: ItemKind) -> bool {
        matches!(
            (self, kind),
            (ItemDetails::Uniform { .. }, ItemKind::Uniform)
                | (ItemDetails::Instrument { .. }, ItemKind::Instrument)
                | (ItemDetails::Coat { .. }, ItemKind::Coat)
                | (
                    ItemDetails::Plain,
                    ItemKind::Shako | ItemKind::Pants | ItemKind::GarmentBag
                )
        )
    }

    /// Loose items a uniform set points at, as kind and tag. Empty for every
    /// other kind.
    pub fn components(&self) -> Vec<(ItemKind, TagValue)> {
        let ItemDetails::Uniform {
            shako_num,
            garment_bag,
            coat_num,
            pants_num,
            ..
        } = self
        else {
            return Vec::new();
        };

        let mut parts: Vec<(ItemKind, TagValue)> = [
            (ItemKind::Shako, *shako_num),
            (ItemKind::Coat, *coat_num),
            (ItemKind::Pants, *pants_num),
        ]
        .into_iter()
        .filter_map(|(kind, num)| num.map(|n| (kind, TagValue::Number(n))))
        .collect();
        let bag = garment_bag.trim();
        if !bag.is_empty() {
            parts.push((ItemKind::GarmentBag, TagValue::Text(bag.to_string())));
        }
        parts
    }

    /// One-line summary for table cells.
    pub fn summary(&self) -> String {
        fn num(label: &str, value: &Option<i64>) -> Option<String> {
            value.map(|n| format!("{label} {n}"))
        }
        match self {
            ItemDetails::Uniform {
                shako_num,
                hanger_num,
                garment_bag,
                coat_num,
                pants_num,
            } => {
                let mut parts: Vec<String> = [
                    num("Shako", shako_num),
                    num("Coat", coat_num),
                    num("Pants", pants_num),
                    num("Hanger", hanger_num),
                ]
                .into_iter()
                .flatten()
                .collect();
                if !garment_bag.is_empty() {
                    parts.push(format!("Bag {garment_bag}"));
                }
                parts.join(", ")
            }
            ItemDetails::Instrument {
                name,
                case_number,
                model,
                condition,
                ..
            } => {
                let mut parts = Vec::new();
                if !name.is_empty() {
                    parts.push(name.clone());
                }
                if !model.is_empty() {
                    parts.push(model.clone());
                }
                if !case_number.is_empty() {
                    parts.push(format!("Case {case_number}"));
                }
                parts.push(condition.to_string());
                parts.join(", ")
            }
            ItemDetails::Coat { hanger_num } => num("Hanger", hanger_num).unwrap_or_default(),
            ItemDetails::Plain => String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// One row from any of the item tables.
pub struct Item {
    pub id: i64,
    pub kind: ItemKind,
    /// Serial or component number rendered as text.
    pub tag: String,
    pub status: ItemStatus,
    /// Holder of the item; `Some` exactly when `status` is Assigned.
    pub student_id: Option<String>,
    pub notes: String,
    pub details: ItemDetails,
}

impl Item {
    pub fn item_ref(&self) -> ItemRef {
        ItemRef::new(self.kind, self.id)
    }

    pub fn is_assigned(&self) -> bool {
        self.status == ItemStatus::Assigned
    }

    /// `Kind tag`, for example `Instrument INS-100`.
    pub fn display_name(&self) -> String {
        format!("{} {}", self.kind, self.tag)
    }
}

/// Input for administratively adding an item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewItem {
    pub kind: ItemKind,
    /// Ignored for uniform sets, which take their row id.
    pub tag: String,
    pub status: ItemStatus,
    pub notes: String,
    pub details: ItemDetails,
}

impl NewItem {
    /// An Available item with empty details.
    pub fn new(kind: ItemKind, tag: &str) -> Self {
        Self {
            kind,
            tag: tag.to_string(),
            status: ItemStatus::Available,
            notes: String::new(),
            details: ItemDetails::default_for(kind),
        }
    }
}

/// Assigned item joined with its holder, for the outstanding report.
#[derive(Debug, Clone)]
pub struct OutstandingItem {
    pub item: Item,
    pub student_id: String,
    pub student_name: String,
    pub section: Section,
}
