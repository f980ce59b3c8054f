use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::Connection;
use tracing::info;

/// Status column shared by every item table. The CHECK pair keeps "Assigned"
/// and a non-null holder in lockstep at the storage level.
const STATUS_COLUMNS: &str = "
    status TEXT NOT NULL DEFAULT 'Available'
        CHECK(status IN ('Available','Assigned','Maintenance','Retired')),
    student_id TEXT NULL REFERENCES students(student_id),
    notes TEXT,
    CHECK((status = 'Assigned') = (student_id IS NOT NULL))";

/// Ensure the database file exists, run lazy migrations, and return a live
/// connection. The function also toggles `PRAGMA foreign_keys = ON` so item
/// holders always point at real students.
pub fn ensure_schema(db_path: &Path) -> Result<Connection> {
    if let Some(parent) = db_path.parent() {
        fs::create_dir_all(parent).context("failed to create data directory")?;
    }

    let conn = Connection::open(db_path).context("failed to open SQLite database")?;
    init_schema(&conn)?;
    info!(path = %db_path.display(), "database ready");
    Ok(conn)
}

/// Create every table and index on an already open connection. Safe to call
/// repeatedly.
pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute("PRAGMA foreign_keys = ON", [])
        .context("failed to enable foreign keys")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students (
            student_id TEXT PRIMARY KEY,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            phone TEXT,
            email TEXT,
            year_came_up TEXT,
            status TEXT NOT NULL DEFAULT 'Student'
                CHECK(status IN ('Student','Former','Alumni')),
            guardian_name TEXT,
            guardian_phone TEXT,
            section TEXT NOT NULL CHECK(section IN (
                'Trumpet','Trombone','Euphonium','French Horn','Tuba',
                'Flute','Clarinet','Saxophone','Bassoon','Oboe','Percussion',
                'Flags'
            ))
        )",
        [],
    )
    .context("failed to create students table")?;

    // Size columns arrived after the first release.
    ensure_column(conn, "students", "spats_size", "TEXT")?;
    ensure_column(conn, "students", "gloves_size", "TEXT")?;

    create_item_table(
        conn,
        "uniforms",
        "shako_num INTEGER,
            hanger_num INTEGER,
            garment_bag TEXT,
            coat_num INTEGER,
            pants_num INTEGER,",
    )?;
    create_item_table(
        conn,
        "instruments",
        "instrument_serial TEXT NOT NULL UNIQUE,
            instrument_name TEXT,
            instrument_section TEXT,
            instrument_case TEXT,
            model TEXT,
            condition TEXT NOT NULL DEFAULT 'Good'
                CHECK(condition IN ('Excellent','Good','Fair','Poor')),",
    )?;
    create_item_table(conn, "shakos", "shako_num INTEGER NOT NULL UNIQUE,")?;
    create_item_table(
        conn,
        "coats",
        "coat_num INTEGER NOT NULL UNIQUE,
            hanger_num INTEGER,",
    )?;
    create_item_table(conn, "pants", "pants_num INTEGER NOT NULL UNIQUE,")?;
    create_item_table(conn, "garment_bags", "bag_num TEXT NOT NULL UNIQUE,")?;

    Ok(())
}

fn create_item_table(conn: &Connection, table: &str, columns: &str) -> Result<()> {
    conn.execute(
        &format!(
            "CREATE TABLE IF NOT EXISTS {table} (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            {columns}
            {STATUS_COLUMNS}
        )"
        ),
        [],
    )
    .with_context(|| format!("failed to create {table} table"))?;

    conn.execute(
        &format!("CREATE INDEX IF NOT EXISTS idx_{table}_student ON {table}(student_id)"),
        [],
    )
    .with_context(|| format!("failed to index {table} holders"))?;

    Ok(())
}

/// Add `column` to `table` when an older database lacks it.
fn ensure_column(conn: &Connection, table: &str, column: &str, decl: &str) -> Result<()> {
    let mut stmt = conn
        .prepare(&format!("PRAGMA table_info({table})"))
        .context("failed to inspect table columns")?;
    let columns = stmt
        .query_map([], |row| row.get::<_, String>(1))
        .context("failed to read table columns")?
        .collect::<Result<Vec<_>, _>>()
        .context("failed to collect table columns")?;

    if !columns.iter().any(|existing| existing == column) {
        conn.execute(&format!("ALTER TABLE {table} ADD COLUMN {column} {decl}"), [])
            .with_context(|| format!("failed to add {table}.{column}"))?;
        info!(table, column, "added missing column");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        init_schema(&conn).unwrap();

        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'
                 AND name IN ('students','uniforms','instruments','shakos','coats','pants','garment_bags')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 7);
    }

    #[test]
    fn missing_size_columns_are_added() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute(
            "CREATE TABLE students (
                student_id TEXT PRIMARY KEY,
                first_name TEXT NOT NULL,
                last_name TEXT NOT NULL,
                phone TEXT,
                email TEXT,
                year_came_up TEXT,
                status TEXT NOT NULL DEFAULT 'Student',
                guardian_name TEXT,
                guardian_phone TEXT,
                section TEXT NOT NULL
            )",
            [],
        )
        .unwrap();

        init_schema(&conn).unwrap();

        conn.execute(
            "INSERT INTO students (student_id, first_name, last_name, section, spats_size)
             VALUES ('123456789', 'Ana', 'Lopez', 'Flute', 'M')",
            [],
        )
        .unwrap();
    }

    #[test]
    fn check_constraint_rejects_assigned_without_holder() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();

        let result = conn.execute(
            "INSERT INTO shakos (shako_num, status) VALUES (1, 'Assigned')",
            [],
        );
        assert!(result.is_err());
    }
}
