use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use chrono::Local;
use rusqlite::{Connection, OpenFlags};
use tracing::{info, warn};

use crate::models::ItemKind;

const BACKUP_PREFIX: &str = "equipment-";
const BACKUP_EXTENSION: &str = "sqlite";

/// Rows brought back by [`restore_backup`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestoreReport {
    pub students: usize,
    pub items: usize,
}

/// First free `equipment-YYYYMMDD-HHMMSS[-N].sqlite` name in `dir`.
fn next_backup_path(dir: &Path) -> Result<PathBuf> {
    let stamp = Local::now().format("%Y%m%d-%H%M%S").to_string();
    let first = dir.join(format!("{BACKUP_PREFIX}{stamp}.{BACKUP_EXTENSION}"));
    if !first.exists() {
        return Ok(first);
    }
    (1..100)
        .map(|n| dir.join(format!("{BACKUP_PREFIX}{stamp}-{n}.{BACKUP_EXTENSION}")))
        .find(|candidate| !candidate.exists())
        .ok_or_else(|| anyhow!("Too many backups were written at {stamp}."))
}

/// Write a consistent snapshot of the open database into `dir` as
/// `equipment-YYYYMMDD-HHMMSS.sqlite` and return its path. Existing files are
/// never overwritten; a second snapshot in the same second gets a `-N` suffix.
pub fn create_backup(conn: &Connection, dir: &Path) -> Result<PathBuf> {
    fs::create_dir_all(dir).context("failed to create backup directory")?;

    let target = next_backup_path(dir)?;
    let target_str = target
        .to_str()
        .ok_or_else(|| anyhow!("backup path is not valid UTF-8"))?;
    conn.execute("VACUUM INTO ?1", [target_str])
        .context("failed to write backup")?;

    info!(path = %target.display(), "backup written");
    Ok(target)
}

/// Snapshots in `dir`, newest first. A missing directory has none.
pub fn list_backups(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut found = Vec::new();
    for entry in fs::read_dir(dir).context("failed to read backup directory")? {
        let path = entry.context("failed to read backup directory")?.path();
        let is_backup = path.extension().is_some_and(|ext| ext == BACKUP_EXTENSION)
            && path
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.starts_with(BACKUP_PREFIX));
        if is_backup && path.is_file() {
            found.push(path);
        }
    }

    // Stems sort by timestamp, and `-N` suffixes sort after their base name.
    found.sort_by(|a, b| b.file_stem().cmp(&a.file_stem()));
    Ok(found)
}

/// Refuse anything that is not an intact equipment database.
fn check_backup_file(path: &Path) -> Result<()> {
    if !path.is_file() {
        return Err(anyhow!("Backup {} does not exist.", path.display()));
    }

    let file = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)
        .with_context(|| format!("failed to open {}", path.display()))?;
    let verdict: String = file
        .query_row("PRAGMA quick_check", [], |row| row.get(0))
        .map_err(|err| anyhow!("{} is not a readable SQLite database: {err}", path.display()))?;
    if verdict != "ok" {
        return Err(anyhow!(
            "Backup {} failed its integrity check: {verdict}",
            path.display()
        ));
    }

    let has_students: bool = file
        .query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'students')",
            [],
            |row| row.get(0),
        )
        .context("failed to inspect backup")?;
    if !has_students {
        return Err(anyhow!("{} is not an equipment database.", path.display()));
    }
    Ok(())
}

fn table_columns(conn: &Connection, schema: &str, table: &str) -> Result<Vec<String>> {
    let mut stmt = conn
        .prepare(&format!("PRAGMA {schema}.table_info({table})"))
        .with_context(|| format!("failed to inspect {schema}.{table}"))?;
    let columns = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(columns)
}

/// Copy the columns both schemas share. Tables missing from an older backup
/// stay empty.
fn copy_table(conn: &Connection, table: &str) -> Result<usize> {
    let source = table_columns(conn, "backup", table)?;
    if source.is_empty() {
        warn!(table, "backup has no such table");
        return Ok(0);
    }

    let shared = table_columns(conn, "main", table)?
        .into_iter()
        .filter(|column| source.contains(column))
        .collect::<Vec<_>>()
        .join(", ");
    let copied = conn
        .execute(
            &format!("INSERT INTO main.{table} ({shared}) SELECT {shared} FROM backup.{table}"),
            [],
        )
        .with_context(|| format!("failed to restore {table}"))?;
    Ok(copied)
}

fn replace_from_attached(conn: &Connection) -> Result<RestoreReport> {
    let tx = conn.unchecked_transaction()?;

    // Items reference students, so they go first and come back last.
    for kind in ItemKind::ALL {
        tx.execute(&format!("DELETE FROM main.{}", kind.table()), [])
            .with_context(|| format!("failed to clear {}", kind.table()))?;
    }
    tx.execute("DELETE FROM main.students", [])
        .context("failed to clear students")?;

    let students = copy_table(&tx, "students")?;
    let mut items = 0;
    for kind in ItemKind::ALL {
        items += copy_table(&tx, kind.table())?;
    }

    tx.commit()?;
    Ok(RestoreReport { students, items })
}

/// Replace every student and item with the contents of the snapshot at
/// `path`. The file is checked before anything is touched, and the swap runs
/// in one transaction, so a bad backup leaves the current data in place.
pub fn restore_backup(conn: &Connection, path: &Path) -> Result<RestoreReport> {
    check_backup_file(path)?;
    let path_str = path
        .to_str()
        .ok_or_else(|| anyhow!("backup path is not valid UTF-8"))?;

    conn.execute("ATTACH DATABASE ?1 AS backup", [path_str])
        .context("failed to attach backup")?;
    let restored = replace_from_attached(conn);
    let detached = conn
        .execute_batch("DETACH DATABASE backup")
        .context("failed to detach backup");

    let report = restored?;
    detached?;
    info!(
        path = %path.display(),
        students = report.students,
        items = report.items,
        "backup restored"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{
        assign_item, create_item, create_student, delete_student, fetch_items, fetch_students,
        init_schema,
    };
    use crate::models::{ItemStatus, NewItem, Section, Student};

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "equipment-backup-{name}-{}",
            std::process::id()
        ));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    fn memory_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        conn
    }

    #[test]
    fn backup_contains_current_rows() {
        let dir = scratch_dir("contents");
        let conn = memory_db();
        create_student(&conn, &Student::new("123456789", "Ana", "Lopez", Section::Flute)).unwrap();

        let path = create_backup(&conn, &dir).unwrap();
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("equipment-") && name.ends_with(".sqlite"));

        let copy = Connection::open(&path).unwrap();
        assert_eq!(fetch_students(&copy).unwrap().len(), 1);

        drop(copy);
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn back_to_back_backups_get_distinct_names() {
        let dir = scratch_dir("names");
        let conn = memory_db();

        let first = create_backup(&conn, &dir).unwrap();
        let second = create_backup(&conn, &dir).unwrap();
        assert_ne!(first, second);
        assert_eq!(list_backups(&dir).unwrap()[0], second);

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn restore_replaces_students_and_assignments() {
        let dir = scratch_dir("restore");
        let conn = memory_db();
        create_student(&conn, &Student::new("123456789", "Ana", "Lopez", Section::Flute)).unwrap();
        let coat = create_item(&conn, &NewItem::new(ItemKind::Coat, "7")).unwrap();
        assign_item(&conn, "123456789", coat.item_ref()).unwrap();
        let path = create_backup(&conn, &dir).unwrap();

        delete_student(&conn, "123456789").unwrap();
        create_student(&conn, &Student::new("987654321", "Ben", "Adams", Section::Tuba)).unwrap();
        create_item(&conn, &NewItem::new(ItemKind::Shako, "1")).unwrap();

        let report = restore_backup(&conn, &path).unwrap();
        assert_eq!(report, RestoreReport { students: 1, items: 1 });

        let students = fetch_students(&conn).unwrap();
        assert_eq!(students.len(), 1);
        assert_eq!(students[0].student_id, "123456789");
        let coats = fetch_items(&conn, ItemKind::Coat).unwrap();
        assert_eq!(coats[0].status, ItemStatus::Assigned);
        assert_eq!(coats[0].student_id.as_deref(), Some("123456789"));
        assert!(fetch_items(&conn, ItemKind::Shako).unwrap().is_empty());

        // The alias is gone, so a second restore can attach again.
        restore_backup(&conn, &path).unwrap();

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn restore_rejects_a_file_that_is_not_a_database() {
        let dir = scratch_dir("garbage");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("equipment-20240101-000000.sqlite");
        fs::write(&path, "Student ID,First Name\n123456789,Ana\n").unwrap();

        let conn = memory_db();
        create_student(&conn, &Student::new("987654321", "Ben", "Adams", Section::Tuba)).unwrap();

        assert!(restore_backup(&conn, &path).is_err());
        assert!(restore_backup(&conn, &dir.join("missing.sqlite")).is_err());
        assert_eq!(fetch_students(&conn).unwrap().len(), 1);

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn restore_rejects_a_foreign_database() {
        let dir = scratch_dir("foreign");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("equipment-20240101-000000.sqlite");
        Connection::open(&path)
            .unwrap()
            .execute_batch("CREATE TABLE songs (id INTEGER PRIMARY KEY)")
            .unwrap();

        let err = restore_backup(&memory_db(), &path).unwrap_err();
        assert!(err.to_string().contains("not an equipment database"));

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn list_backups_is_newest_first_and_ignores_other_files() {
        let dir = scratch_dir("listing");
        assert!(list_backups(&dir).unwrap().is_empty());

        fs::create_dir_all(&dir).unwrap();
        for name in [
            "equipment-20240101-080000.sqlite",
            "equipment-20250301-080000.sqlite",
            "equipment-20250301-080000-1.sqlite",
            "notes.txt",
            "other-20250301-080000.sqlite",
        ] {
            fs::write(dir.join(name), "").unwrap();
        }

        let names: Vec<String> = list_backups(&dir)
            .unwrap()
            .iter()
            .map(|path| path.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            names,
            [
                "equipment-20250301-080000-1.sqlite",
                "equipment-20250301-080000.sqlite",
                "equipment-20240101-080000.sqlite",
            ]
        );

        fs::remove_dir_all(&dir).unwrap();
    }
}
