//! Roster import from a spreadsheet export. Rows are matched on Student ID:
//! unknown ids become new students, known ids take every non-blank cell, and
//! a blank cell never erases what is already stored.

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use csv::{ReaderBuilder, StringRecord, Trim};
use rusqlite::Connection;
use tracing::{info, warn};

use crate::models::{validate_student_id, Section, Student, StudentStatus};

use super::students::{create_student, fetch_student, update_student};

const STUDENT_ID: &str = "Student ID";
const FIRST_NAME: &str = "First Name";
const LAST_NAME: &str = "Last Name";
const SECTION: &str = "Section";
const STATUS: &str = "Status";
const PHONE: &str = "Phone";
const EMAIL: &str = "Email";
const YEAR_CAME_UP: &str = "Year Came Up";
const GUARDIAN_NAME: &str = "Guardian Name";
const GUARDIAN_PHONE: &str = "Guardian Phone";
const SPATS_SIZE: &str = "Spats Size";
const GLOVES_SIZE: &str = "Gloves Size";

const KNOWN_HEADERS: [&str; 12] = [
    STUDENT_ID,
    FIRST_NAME,
    LAST_NAME,
    SECTION,
    STATUS,
    PHONE,
    EMAIL,
    YEAR_CAME_UP,
    GUARDIAN_NAME,
    GUARDIAN_PHONE,
    SPATS_SIZE,
    GLOVES_SIZE,
];

/// Tally of one import run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ImportReport {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    /// CSV line number and reason for every row left out.
    pub skipped: Vec<(u64, String)>,
}

impl ImportReport {
    pub fn summary(&self) -> String {
        format!(
            "Imported students: {} added, {} updated, {} unchanged, {} skipped.",
            self.created,
            self.updated,
            self.unchanged,
            self.skipped.len()
        )
    }
}

enum RowOutcome {
    Created,
    Updated,
    Unchanged,
    Skipped(String),
}

/// Header positions for the columns we understand; anything else, such as
/// the equipment columns of a full export, is ignored.
struct ColumnMap {
    positions: Vec<(&'static str, usize)>,
}

impl ColumnMap {
    fn new(headers: &StringRecord) -> Self {
        let positions = KNOWN_HEADERS
            .iter()
            .filter_map(|name| {
                headers
                    .iter()
                    .position(|header| header.eq_ignore_ascii_case(name))
                    .map(|idx| (*name, idx))
            })
            .collect();
        Self { positions }
    }

    fn has(&self, name: &str) -> bool {
        self.positions.iter().any(|(known, _)| *known == name)
    }

    fn cell<'r>(&self, record: &'r StringRecord, name: &str) -> &'r str {
        self.positions
            .iter()
            .find(|(known, _)| *known == name)
            .and_then(|(_, idx)| record.get(*idx))
            .unwrap_or("")
    }
}

fn overwrite(field: &mut String, cell: &str) {
    if !cell.is_empty() {
        *field = cell.to_string();
    }
}

fn digits(cell: &str) -> String {
    cell.chars().filter(char::is_ascii_digit).collect()
}

fn apply_row(conn: &Connection, columns: &ColumnMap, record: &StringRecord) -> Result<RowOutcome> {
    let student_id = columns.cell(record, STUDENT_ID);
    if let Err(err) = validate_student_id(student_id) {
        return Ok(RowOutcome::Skipped(err.to_string()));
    }

    let section = match columns.cell(record, SECTION) {
        "" => None,
        raw => match raw.parse::<Section>() {
            Ok(section) => Some(section),
            Err(err) => return Ok(RowOutcome::Skipped(err.to_string())),
        },
    };
    let status = match columns.cell(record, STATUS) {
        "" => None,
        raw => match raw.parse::<StudentStatus>() {
            Ok(status) => Some(status),
            Err(err) => return Ok(RowOutcome::Skipped(err.to_string())),
        },
    };

    let existing = fetch_student(conn, student_id)?;
    let mut student = match (&existing, section) {
        (Some(current), _) => current.clone(),
        (None, Some(section)) => Student::new(student_id, "", "", section),
        (None, None) => {
            return Ok(RowOutcome::Skipped(
                "Section is required for a new student.".to_string(),
            ))
        }
    };

    if let Some(section) = section {
        student.section = section;
    }
    if let Some(status) = status {
        student.status = status;
    }
    overwrite(&mut student.first_name, columns.cell(record, FIRST_NAME));
    overwrite(&mut student.last_name, columns.cell(record, LAST_NAME));
    overwrite(&mut student.phone, &digits(columns.cell(record, PHONE)));
    overwrite(&mut student.email, columns.cell(record, EMAIL));
    overwrite(&mut student.year_came_up, columns.cell(record, YEAR_CAME_UP));
    overwrite(&mut student.guardian_name, columns.cell(record, GUARDIAN_NAME));
    overwrite(
        &mut student.guardian_phone,
        &digits(columns.cell(record, GUARDIAN_PHONE)),
    );
    overwrite(&mut student.spats_size, columns.cell(record, SPATS_SIZE));
    overwrite(&mut student.gloves_size, columns.cell(record, GLOVES_SIZE));

    if let Err(err) = student.validate() {
        return Ok(RowOutcome::Skipped(err.to_string()));
    }

    match existing {
        None => {
            create_student(conn, &student)?;
            Ok(RowOutcome::Created)
        }
        Some(current) if current == student => Ok(RowOutcome::Unchanged),
        Some(_) => {
            update_student(conn, &student)?;
            Ok(RowOutcome::Updated)
        }
    }
}

/// Add or update students from the CSV file at `path`. Rows that fail
/// validation are reported and skipped; a database failure undoes the whole
/// import.
pub fn import_students_csv(conn: &Connection, path: &Path) -> Result<ImportReport> {
    let mut reader = ReaderBuilder::new()
        .trim(Trim::All)
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    let headers = reader
        .headers()
        .context("failed to read the CSV header")?
        .clone();
    let columns = ColumnMap::new(&headers);
    if !columns.has(STUDENT_ID) {
        return Err(anyhow!("The CSV file has no \"{STUDENT_ID}\" column."));
    }

    let tx = conn.unchecked_transaction()?;
    let mut report = ImportReport::default();
    for record in reader.records() {
        let record = record.context("failed to read a CSV row")?;
        let line = record.position().map_or(0, |pos| pos.line());
        match apply_row(&tx, &columns, &record)? {
            RowOutcome::Created => report.created += 1,
            RowOutcome::Updated => report.updated += 1,
            RowOutcome::Unchanged => report.unchanged += 1,
            RowOutcome::Skipped(reason) => {
                warn!(line, reason = %reason, "import row skipped");
                report.skipped.push((line, reason));
            }
        }
    }
    tx.commit()?;

    info!(
        path = %path.display(),
        created = report.created,
        updated = report.updated,
        unchanged = report.unchanged,
        skipped = report.skipped.len(),
        "students imported"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use super::*;
    use crate::db::{fetch_students, init_schema};

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        conn
    }

    fn write_csv(name: &str, body: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "equipment-import-{name}-{}.csv",
            std::process::id()
        ));
        fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn new_rows_are_added_and_bad_rows_reported() {
        let conn = setup();
        let path = write_csv(
            "new",
            "Student ID,First Name,Last Name,Section,Phone,Shako #,Year Came Up\n\
             123456789, Ana ,Lopez,flute,(555) 123-4567,12,2023\n\
             12345,Short,Id,Tuba,,,\n\
             987654321,Ben,Adams,,,,\n\
             555555555,Cara,Diaz,Kazoo,,,\n",
        );

        let report = import_students_csv(&conn, &path).unwrap();
        assert_eq!(report.created, 1);
        assert_eq!(
            report.skipped.iter().map(|(line, _)| *line).collect::<Vec<_>>(),
            [3, 4, 5]
        );
        assert_eq!(report.skipped[0].1, "Student ID must be exactly 9 digits.");
        assert_eq!(report.skipped[1].1, "Section is required for a new student.");

        let students = fetch_students(&conn).unwrap();
        assert_eq!(students.len(), 1);
        assert_eq!(students[0].first_name, "Ana");
        assert_eq!(students[0].section, Section::Flute);
        assert_eq!(students[0].phone, "5551234567");
        assert_eq!(students[0].year_came_up, "2023");

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn blank_cells_keep_existing_values() {
        let conn = setup();
        let mut ana = Student::new("123456789", "Ana", "Lopez", Section::Flute);
        ana.email = "ana@example.com".to_string();
        create_student(&conn, &ana).unwrap();

        let path = write_csv(
            "update",
            "student id,First Name,Last Name,Section,Email,Status\n\
             123456789,,Lopez-Diaz,,,Former\n",
        );

        let report = import_students_csv(&conn, &path).unwrap();
        assert_eq!((report.created, report.updated), (0, 1));
        let stored = fetch_student(&conn, "123456789").unwrap().unwrap();
        assert_eq!(stored.first_name, "Ana");
        assert_eq!(stored.last_name, "Lopez-Diaz");
        assert_eq!(stored.section, Section::Flute);
        assert_eq!(stored.email, "ana@example.com");
        assert_eq!(stored.status, StudentStatus::Former);

        let again = import_students_csv(&conn, &path).unwrap();
        assert_eq!((again.updated, again.unchanged), (0, 1));

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn file_without_student_id_column_is_refused() {
        let conn = setup();
        let path = write_csv("headers", "Name,Section\nAna Lopez,Flute\n");

        let err = import_students_csv(&conn, &path).unwrap_err();
        assert_eq!(err.to_string(), "The CSV file has no \"Student ID\" column.");
        assert!(fetch_students(&conn).unwrap().is_empty());

        fs::remove_file(&path).unwrap();
    }
}
