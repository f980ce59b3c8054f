//! Persistence module split across logical submodules.

mod assignments;
mod backup;
mod connection;
mod import;
mod items;
mod students;

pub use assignments::{
    assign_item, assign_items, release_all_for_student, release_item, set_item_status,
    AssignmentReport,
};
pub use backup::{create_backup, list_backups, restore_backup, RestoreReport};
pub use connection::{ensure_schema, init_schema};
pub use import::{import_students_csv, ImportReport};
pub use items::{
    create_item, fetch_available_items, fetch_holding_counts, fetch_items,
    fetch_items_for_student, fetch_outstanding, find_item, find_item_by_tag, update_item,
};
pub use students::{create_student, delete_student, fetch_student, fetch_students, update_student};

/// Optional text columns store NULL rather than empty strings.
pub(crate) fn blank_to_null(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}
