use std::fs;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use equipment_manager::db::{
    assign_item, assign_items, create_item, create_student, delete_student, fetch_items,
    fetch_outstanding, find_item, release_item,
};
use equipment_manager::models::{ItemKind, ItemStatus, NewItem, Section, Student};
use equipment_manager::{ensure_schema, fetch_holding_counts, InventoryError};

fn scratch_db() -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    std::env::temp_dir()
        .join(format!("equipment-flow-{}-{nanos}", std::process::id()))
        .join("equipment.sqlite")
}

#[test]
fn assignments_survive_reopening_the_database() {
    let path = scratch_db();
    let (ins, coat) = {
        let conn = ensure_schema(&path).unwrap();
        create_student(&conn, &Student::new("123456789", "Ana", "Lopez", Section::Trumpet))
            .unwrap();
        create_student(&conn, &Student::new("987654321", "Ben", "Adams", Section::Tuba)).unwrap();
        let ins = create_item(&conn, &NewItem::new(ItemKind::Instrument, "INS-100")).unwrap();
        let coat = create_item(&conn, &NewItem::new(ItemKind::Coat, "12")).unwrap();

        let report =
            assign_items(&conn, "123456789", &[ins.item_ref(), coat.item_ref()]).unwrap();
        assert!(report.is_complete());
        (ins.item_ref(), coat.item_ref())
    };

    let conn = ensure_schema(&path).unwrap();
    let err = assign_item(&conn, "987654321", ins).unwrap_err();
    assert!(matches!(err, InventoryError::Conflict { .. }));
    assert_eq!(
        err.to_string(),
        "Instrument INS-100 is already assigned to student 123456789."
    );

    assert_eq!(fetch_holding_counts(&conn).unwrap().get("123456789"), Some(&2));
    let outstanding = fetch_outstanding(&conn, ItemKind::Coat, Some(Section::Trumpet)).unwrap();
    assert_eq!(outstanding.len(), 1);
    assert_eq!(outstanding[0].student_name, "Lopez, Ana");

    release_item(&conn, coat, ItemStatus::Maintenance).unwrap();
    let released = delete_student(&conn, "123456789").unwrap();
    assert_eq!(released, 1);

    let ins = find_item(&conn, ins).unwrap().unwrap();
    assert_eq!(ins.status, ItemStatus::Available);
    assert_eq!(ins.student_id, None);

    let coats = fetch_items(&conn, ItemKind::Coat).unwrap();
    assert_eq!(coats[0].status, ItemStatus::Maintenance);

    drop(conn);
    if let Some(dir) = path.parent() {
        let _ = fs::remove_dir_all(dir);
    }
}
