use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection, Error as SqlError, ErrorCode, OptionalExtension, Row};
use tracing::info;

use crate::models::{validate_student_id, Student};

use super::assignments::release_all_for_student_in;
use super::blank_to_null;

const STUDENT_COLUMNS: &str = "student_id, first_name, last_name, section, status, phone, email,
     year_came_up, guardian_name, guardian_phone, spats_size, gloves_size";

fn map_student_row(row: &Row<'_>) -> rusqlite::Result<Student> {
    let text = |idx: usize| -> rusqlite::Result<String> {
        Ok(row.get::<_, Option<String>>(idx)?.unwrap_or_default())
    };
    Ok(Student {
        student_id: row.get(0)?,
        first_name: row.get(1)?,
        last_name: row.get(2)?,
        section: row.get(3)?,
        status: row.get(4)?,
        phone: text(5)?,
        email: text(6)?,
        year_came_up: text(7)?,
        guardian_name: text(8)?,
        guardian_phone: text(9)?,
        spats_size: text(10)?,
        gloves_size: text(11)?,
    })
}

/// Retrieve every student sorted by last then first name, ignoring case. This
/// is the ordering the student table always shows.
pub fn fetch_students(conn: &Connection) -> Result<Vec<Student>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {STUDENT_COLUMNS} FROM students
             ORDER BY last_name COLLATE NOCASE, first_name COLLATE NOCASE, student_id"
        ))
        .context("failed to prepare student query")?;

    let students = stmt
        .query_map([], map_student_row)
        .context("failed to load students")?
        .collect::<Result<Vec<_>, _>>()
        .context("failed to collect students")?;

    Ok(students)
}

/// Look up one student by id. Returns `None` when nobody has that id.
pub fn fetch_student(conn: &Connection, student_id: &str) -> Result<Option<Student>> {
    conn.query_row(
        &format!("SELECT {STUDENT_COLUMNS} FROM students WHERE student_id = ?1"),
        [student_id],
        map_student_row,
    )
    .optional()
    .context("failed to load student")
}

/// Validate and insert a new student.
pub fn create_student(conn: &Connection, student: &Student) -> Result<()> {
    student.validate()?;

    conn.execute(
        "INSERT INTO students (
            student_id, first_name, last_name, section, status, phone, email,
            year_came_up, guardian_name, guardian_phone, spats_size, gloves_size
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            student.student_id,
            student.first_name.trim(),
            student.last_name.trim(),
            student.section,
            student.status,
            blank_to_null(&student.phone),
            blank_to_null(&student.email),
            blank_to_null(&student.year_came_up),
            blank_to_null(&student.guardian_name),
            blank_to_null(&student.guardian_phone),
            blank_to_null(&student.spats_size),
            blank_to_null(&student.gloves_size),
        ],
    )
    .map_err(|err| map_unique_constraint(err, &student.student_id))
    .context("failed to insert student")?;

    info!(student_id = %student.student_id, "student created");
    Ok(())
}

/// Overwrite every editable column of an existing student. The id itself is
/// the key and cannot change.
pub fn update_student(conn: &Connection, student: &Student) -> Result<()> {
    student.validate()?;

    let updated = conn
        .execute(
            "UPDATE students SET
                first_name = ?2, last_name = ?3, section = ?4, status = ?5, phone = ?6,
                email = ?7, year_came_up = ?8, guardian_name = ?9, guardian_phone = ?10,
                spats_size = ?11, gloves_size = ?12
             WHERE student_id = ?1",
            params![
                student.student_id,
                student.first_name.trim(),
                student.last_name.trim(),
                student.section,
                student.status,
                blank_to_null(&student.phone),
                blank_to_null(&student.email),
                blank_to_null(&student.year_came_up),
                blank_to_null(&student.guardian_name),
                blank_to_null(&student.guardian_phone),
                blank_to_null(&student.spats_size),
                blank_to_null(&student.gloves_size),
            ],
        )
        .context("failed to update student")?;

    if updated == 0 {
        Err(anyhow!("Student not found"))
    } else {
        info!(student_id = %student.student_id, "student updated");
        Ok(())
    }
}

/// Release everything the student holds and remove the student, in one
/// transaction. Returns how many items went back to Available.
pub fn delete_student(conn: &Connection, student_id: &str) -> Result<usize> {
    validate_student_id(student_id)?;

    let tx = conn
        .unchecked_transaction()
        .context("failed to start transaction")?;
    let released = release_all_for_student_in(&tx, student_id)?;
    let deleted = tx
        .execute("DELETE FROM students WHERE student_id = ?1", [student_id])
        .context("failed to delete student")?;

    if deleted == 0 {
        return Err(anyhow!("Student not found"));
    }
    tx.commit().context("failed to commit student deletion")?;

    info!(student_id, released, "student deleted");
    Ok(released)
}

/// Coerce the primary-key violation into the message the student form shows.
fn map_unique_constraint(err: SqlError, student_id: &str) -> anyhow::Error {
    if matches!(
        err.sqlite_error_code(),
        Some(ErrorCode::ConstraintViolation)
    ) {
        anyhow!("Student ID {student_id} already exists.")
    } else {
        err.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{assign_item, create_item, find_item, init_schema};
    use crate::models::{ItemKind, ItemStatus, NewItem, Section, StudentStatus};

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        conn
    }

    #[test]
    fn students_sort_by_last_name_case_insensitively() {
        let conn = setup();
        create_student(&conn, &Student::new("100000001", "Zed", "baker", Section::Tuba)).unwrap();
        create_student(&conn, &Student::new("100000002", "Amy", "Adams", Section::Flute)).unwrap();
        create_student(&conn, &Student::new("100000003", "Cal", "Chen", Section::Oboe)).unwrap();

        let names: Vec<String> = fetch_students(&conn)
            .unwrap()
            .iter()
            .map(|s| s.last_name.clone())
            .collect();
        assert_eq!(names, vec!["Adams", "baker", "Chen"]);
    }

    #[test]
    fn optional_fields_round_trip_as_empty_strings() {
        let conn = setup();
        let mut student = Student::new("123456789", "Ana", "Lopez", Section::FrenchHorn);
        student.phone = "5551234567".to_string();
        student.status = StudentStatus::Alumni;
        create_student(&conn, &student).unwrap();

        let loaded = fetch_student(&conn, "123456789").unwrap().unwrap();
        assert_eq!(loaded, student);
        assert!(fetch_student(&conn, "999999999").unwrap().is_none());
    }

    #[test]
    fn duplicate_id_is_reported() {
        let conn = setup();
        let student = Student::new("123456789", "Ana", "Lopez", Section::Flute);
        create_student(&conn, &student).unwrap();

        let err = create_student(&conn, &student).unwrap_err();
        assert_eq!(
            err.chain().last().unwrap().to_string(),
            "Student ID 123456789 already exists."
        );
    }

    #[test]
    fn invalid_student_is_not_written() {
        let conn = setup();
        let student = Student::new("12345", "Ana", "Lopez", Section::Flute);
        assert!(create_student(&conn, &student).is_err());
        assert!(fetch_students(&conn).unwrap().is_empty());
    }

    #[test]
    fn update_changes_fields() {
        let conn = setup();
        let mut student = Student::new("123456789", "Ana", "Lopez", Section::Flute);
        create_student(&conn, &student).unwrap();

        student.section = Section::Percussion;
        student.gloves_size = "L".to_string();
        update_student(&conn, &student).unwrap();

        let loaded = fetch_student(&conn, "123456789").unwrap().unwrap();
        assert_eq!(loaded.section, Section::Percussion);
        assert_eq!(loaded.gloves_size, "L");

        let missing = Student::new("999999999", "No", "Body", Section::Tuba);
        assert!(update_student(&conn, &missing).is_err());
    }

    #[test]
    fn deleting_student_releases_their_items() {
        let conn = setup();
        create_student(&conn, &Student::new("123456789", "Ana", "Lopez", Section::Flute)).unwrap();
        let coat = create_item(&conn, &NewItem::new(ItemKind::Coat, "7")).unwrap();
        assign_item(&conn, "123456789", coat.item_ref()).unwrap();

        let released = delete_student(&conn, "123456789").unwrap();
        assert_eq!(released, 1);
        assert!(fetch_student(&conn, "123456789").unwrap().is_none());

        let coat = find_item(&conn, coat.item_ref()).unwrap().unwrap();
        assert_eq!(coat.status, ItemStatus::Available);
        assert_eq!(coat.student_id, None);
    }
}
