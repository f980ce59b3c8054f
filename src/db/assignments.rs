//! Assignment and release of items. Every status change goes through a
//! conditional `UPDATE` whose `WHERE` clause carries the precondition, so the
//! check and the write happen in one statement and an item can never end up
//! with two holders.

use std::collections::HashSet;

use rusqlite::{params, Connection, OptionalExtension};
use tracing::{info, warn};

use crate::error::{InventoryError, Result};
use crate::models::{validate_student_id, Item, ItemKind, ItemRef, ItemStatus, TagValue};

use super::items::load_item;

/// Outcome of assigning several items at once. Failures are per item; the
/// rest of the batch still goes through.
#[derive(Debug, Default)]
pub struct AssignmentReport {
    pub assigned: Vec<Item>,
    pub failed: Vec<(ItemRef, InventoryError)>,
}

impl AssignmentReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

fn unknown_item(item: ItemRef) -> InventoryError {
    InventoryError::NotFound(format!("{} #{}", item.kind, item.id))
}

/// Reject malformed ids and students that do not exist.
fn ensure_student(conn: &Connection, student_id: &str) -> Result<()> {
    validate_student_id(student_id)?;
    let exists = conn
        .query_row(
            "SELECT 1 FROM students WHERE student_id = ?1",
            [student_id],
            |_| Ok(()),
        )
        .optional()?
        .is_some();
    if exists {
        Ok(())
    } else {
        Err(InventoryError::NotFound(format!("Student {student_id}")))
    }
}

/// Work out why the conditional assignment touched no row.
fn explain_assign_failure(conn: &Connection, item: ItemRef) -> Result<InventoryError> {
    let err = match load_item(conn, item)? {
        None => unknown_item(item),
        Some(current) if current.status == ItemStatus::Assigned => InventoryError::Conflict {
            item: current.display_name(),
            holder: current.student_id.unwrap_or_default(),
        },
        Some(current) => InventoryError::Unavailable {
            item: current.display_name(),
            status: current.status,
        },
    };
    Ok(err)
}

/// Holder of the loose `kind` item tagged `tag`, unless it is `student_id`.
fn loose_part_holder(
    conn: &Connection,
    kind: ItemKind,
    tag: &TagValue,
    student_id: &str,
) -> Result<Option<String>> {
    let holder = conn
        .query_row(
            &format!(
                "SELECT student_id FROM {} WHERE {} = ?1
                 AND status = 'Assigned' AND student_id <> ?2",
                kind.table(),
                kind.tag_column()
            ),
            params![tag, student_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(holder)
}

/// A uniform set and the loose shako, coat, pants and bag it names count as
/// the same physical pieces, so neither may go out while another student
/// holds the other.
fn shared_part_conflict(
    conn: &Connection,
    student_id: &str,
    item: ItemRef,
) -> Result<Option<InventoryError>> {
    let Some(current) = load_item(conn, item)? else {
        return Ok(None);
    };
    if current.status != ItemStatus::Available {
        return Ok(None);
    }

    if item.kind == ItemKind::Uniform {
        for (kind, tag) in current.details.components() {
            if let Some(holder) = loose_part_holder(conn, kind, &tag, student_id)? {
                return Ok(Some(InventoryError::Conflict {
                    item: format!("{kind} {tag} (part of {})", current.display_name()),
                    holder,
                }));
            }
        }
        return Ok(None);
    }

    let Some(column) = item.kind.uniform_column() else {
        return Ok(None);
    };
    let tag = item.kind.parse_tag(&current.tag)?;
    let set = conn
        .query_row(
            &format!(
                "SELECT id, student_id FROM uniforms WHERE {column} = ?1
                 AND status = 'Assigned' AND student_id <> ?2
                 ORDER BY id LIMIT 1"
            ),
            params![tag, student_id],
            |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)),
        )
        .optional()?;

    Ok(set.map(|(id, holder)| InventoryError::Conflict {
        item: format!("{} (part of Uniform {id})", current.display_name()),
        holder,
    }))
}

/// Assign without re-validating the student; callers check once up front.
fn assign_checked(conn: &Connection, student_id: &str, item: ItemRef) -> Result<Item> {
    if let Some(err) = shared_part_conflict(conn, student_id, item)? {
        warn!(kind = %item.kind, id = item.id, student_id, error = %err, "assignment refused");
        return Err(err);
    }

    let updated = conn.execute(
        &format!(
            "UPDATE {} SET status = 'Assigned', student_id = ?1
             WHERE id = ?2 AND status = 'Available'",
            item.kind.table()
        ),
        params![student_id, item.id],
    )?;

    if updated == 0 {
        let err = explain_assign_failure(conn, item)?;
        warn!(kind = %item.kind, id = item.id, student_id, error = %err, "assignment refused");
        return Err(err);
    }

    let assigned = load_item(conn, item)?.ok_or_else(|| unknown_item(item))?;
    info!(item = %assigned.display_name(), student_id, "item assigned");
    Ok(assigned)
}

/// Hand one Available item to a student.
///
/// Fails with `Conflict` when someone already holds it, or holds a piece it
/// shares with a uniform set, and with `Unavailable` when it is in
/// Maintenance or Retired. The row is left untouched in every case.
pub fn assign_item(conn: &Connection, student_id: &str, item: ItemRef) -> Result<Item> {
    ensure_student(conn, student_id)?;
    let tx = conn.unchecked_transaction()?;
    let assigned = assign_checked(&tx, student_id, item)?;
    tx.commit()?;
    Ok(assigned)
}

/// Assign several items to one student. Items that cannot be assigned are
/// reported in `failed` without affecting the others. A database error rolls
/// the whole batch back.
pub fn assign_items(
    conn: &Connection,
    student_id: &str,
    items: &[ItemRef],
) -> Result<AssignmentReport> {
    ensure_student(conn, student_id)?;

    let tx = conn.unchecked_transaction()?;
    let mut report = AssignmentReport::default();
    let mut seen = HashSet::new();
    for &item in items {
        if !seen.insert(item) {
            continue;
        }
        match assign_checked(&tx, student_id, item) {
            Ok(assigned) => report.assigned.push(assigned),
            Err(InventoryError::Database(err)) => return Err(InventoryError::Database(err)),
            Err(err) => report.failed.push((item, err)),
        }
    }
    tx.commit()?;

    Ok(report)
}

/// Take an item back from its holder and park it in `new_status`, which must
/// be Available, Maintenance or Retired.
pub fn release_item(conn: &Connection, item: ItemRef, new_status: ItemStatus) -> Result<Item> {
    if new_status == ItemStatus::Assigned {
        return Err(InventoryError::validation(
            "Released items must become Available, Maintenance or Retired.",
        ));
    }

    let updated = conn.execute(
        &format!(
            "UPDATE {} SET status = ?1, student_id = NULL
             WHERE id = ?2 AND status = 'Assigned'",
            item.kind.table()
        ),
        params![new_status, item.id],
    )?;

    if updated == 0 {
        return Err(match load_item(conn, item)? {
            None => unknown_item(item),
            Some(current) => InventoryError::NotAssigned {
                item: current.display_name(),
            },
        });
    }

    let released = load_item(conn, item)?.ok_or_else(|| unknown_item(item))?;
    info!(item = %released.display_name(), status = %new_status, "item released");
    Ok(released)
}

/// Release every item a student holds back to Available, on a connection
/// that may already be inside a transaction.
pub(crate) fn release_all_for_student_in(conn: &Connection, student_id: &str) -> Result<usize> {
    let mut released = 0;
    for kind in ItemKind::ALL {
        released += conn.execute(
            &format!(
                "UPDATE {} SET status = 'Available', student_id = NULL
                 WHERE student_id = ?1 AND status = 'Assigned'",
                kind.table()
            ),
            [student_id],
        )?;
    }
    Ok(released)
}

/// Release everything a student holds. Returns the number of items returned
/// to Available.
pub fn release_all_for_student(conn: &Connection, student_id: &str) -> Result<usize> {
    validate_student_id(student_id)?;
    let tx = conn.unchecked_transaction()?;
    let released = release_all_for_student_in(&tx, student_id)?;
    tx.commit()?;
    info!(student_id, released, "released all items for student");
    Ok(released)
}

/// Move an unassigned item between Available, Maintenance and Retired.
/// Held items have to be released first.
pub fn set_item_status(conn: &Connection, item: ItemRef, status: ItemStatus) -> Result<Item> {
    if status == ItemStatus::Assigned {
        return Err(InventoryError::validation(
            "Assign the item to a student to mark it Assigned.",
        ));
    }

    let updated = conn.execute(
        &format!(
            "UPDATE {} SET status = ?1 WHERE id = ?2 AND status <> 'Assigned'",
            item.kind.table()
        ),
        params![status, item.id],
    )?;

    let current = load_item(conn, item)?.ok_or_else(|| unknown_item(item))?;
    if updated == 0 {
        return Err(InventoryError::validation(format!(
            "{} is assigned to student {}; release it first.",
            current.display_name(),
            current.student_id.as_deref().unwrap_or_default()
        )));
    }

    info!(item = %current.display_name(), status = %status, "item status changed");
    Ok(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{create_item, create_student, fetch_items, find_item, init_schema};
    use crate::models::{ItemDetails, NewItem, Section, Student};

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        create_student(&conn, &Student::new("123456789", "Ana", "Lopez", Section::Trumpet)).unwrap();
        create_student(&conn, &Student::new("987654321", "Ben", "Adams", Section::Tuba)).unwrap();
        conn
    }

    fn holder(conn: &Connection, item: ItemRef) -> (ItemStatus, Option<String>) {
        let item = find_item(conn, item).unwrap().unwrap();
        (item.status, item.student_id)
    }

    #[test]
    fn second_assignment_is_refused_and_first_holder_kept() {
        let conn = setup();
        let ins = create_item(&conn, &NewItem::new(ItemKind::Instrument, "INS-100")).unwrap();

        let assigned = assign_item(&conn, "123456789", ins.item_ref()).unwrap();
        assert_eq!(assigned.status, ItemStatus::Assigned);
        assert_eq!(assigned.student_id.as_deref(), Some("123456789"));

        let err = assign_item(&conn, "987654321", ins.item_ref()).unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(
            err.to_string(),
            "Instrument INS-100 is already assigned to student 123456789."
        );
        assert_eq!(
            holder(&conn, ins.item_ref()),
            (ItemStatus::Assigned, Some("123456789".to_string()))
        );
    }

    #[test]
    fn parked_items_cannot_be_assigned() {
        let conn = setup();
        let coat = create_item(&conn, &NewItem::new(ItemKind::Coat, "3")).unwrap();
        set_item_status(&conn, coat.item_ref(), ItemStatus::Maintenance).unwrap();

        let err = assign_item(&conn, "123456789", coat.item_ref()).unwrap_err();
        assert!(matches!(
            err,
            InventoryError::Unavailable {
                status: ItemStatus::Maintenance,
                ..
            }
        ));
        assert_eq!(holder(&conn, coat.item_ref()), (ItemStatus::Maintenance, None));
    }

    #[test]
    fn unknown_student_or_item_is_rejected() {
        let conn = setup();
        let shako = create_item(&conn, &NewItem::new(ItemKind::Shako, "1")).unwrap();

        assert!(matches!(
            assign_item(&conn, "111111111", shako.item_ref()),
            Err(InventoryError::NotFound(_))
        ));
        assert!(matches!(
            assign_item(&conn, "1234", shako.item_ref()),
            Err(InventoryError::Validation(_))
        ));
        assert!(matches!(
            assign_item(&conn, "123456789", ItemRef::new(ItemKind::Shako, 999)),
            Err(InventoryError::NotFound(_))
        ));
        assert_eq!(holder(&conn, shako.item_ref()), (ItemStatus::Available, None));
    }

    #[test]
    fn batch_assignment_skips_conflicts_only() {
        let conn = setup();
        let shako = create_item(&conn, &NewItem::new(ItemKind::Shako, "1")).unwrap();
        let coat = create_item(&conn, &NewItem::new(ItemKind::Coat, "1")).unwrap();
        let pants = create_item(&conn, &NewItem::new(ItemKind::Pants, "1")).unwrap();
        assign_item(&conn, "987654321", coat.item_ref()).unwrap();

        let report = assign_items(
            &conn,
            "123456789",
            &[shako.item_ref(), coat.item_ref(), pants.item_ref(), shako.item_ref()],
        )
        .unwrap();

        assert!(!report.is_complete());
        assert_eq!(report.assigned.len(), 2);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, coat.item_ref());
        assert!(report.failed[0].1.is_conflict());

        assert_eq!(
            holder(&conn, coat.item_ref()),
            (ItemStatus::Assigned, Some("987654321".to_string()))
        );
        assert_eq!(
            holder(&conn, pants.item_ref()),
            (ItemStatus::Assigned, Some("123456789".to_string()))
        );
    }

    #[test]
    fn release_clears_holder() {
        let conn = setup();
        let bag = create_item(&conn, &NewItem::new(ItemKind::GarmentBag, "B9")).unwrap();
        assign_item(&conn, "123456789", bag.item_ref()).unwrap();

        let released = release_item(&conn, bag.item_ref(), ItemStatus::Available).unwrap();
        assert_eq!(released.status, ItemStatus::Available);
        assert_eq!(released.student_id, None);

        let err = release_item(&conn, bag.item_ref(), ItemStatus::Available).unwrap_err();
        assert!(matches!(err, InventoryError::NotAssigned { .. }));
    }

    #[test]
    fn release_to_alternate_status() {
        let conn = setup();
        let coat = create_item(&conn, &NewItem::new(ItemKind::Coat, "8")).unwrap();
        assign_item(&conn, "123456789", coat.item_ref()).unwrap();

        assert!(release_item(&conn, coat.item_ref(), ItemStatus::Assigned).is_err());
        release_item(&conn, coat.item_ref(), ItemStatus::Retired).unwrap();
        assert_eq!(holder(&conn, coat.item_ref()), (ItemStatus::Retired, None));
    }

    #[test]
    fn release_all_returns_every_held_item() {
        let conn = setup();
        let shako = create_item(&conn, &NewItem::new(ItemKind::Shako, "2")).unwrap();
        let ins = create_item(&conn, &NewItem::new(ItemKind::Instrument, "T-1")).unwrap();
        let theirs = create_item(&conn, &NewItem::new(ItemKind::Pants, "2")).unwrap();
        assign_item(&conn, "123456789", shako.item_ref()).unwrap();
        assign_item(&conn, "123456789", ins.item_ref()).unwrap();
        assign_item(&conn, "987654321", theirs.item_ref()).unwrap();

        assert_eq!(release_all_for_student(&conn, "123456789").unwrap(), 2);
        assert_eq!(holder(&conn, ins.item_ref()), (ItemStatus::Available, None));
        assert_eq!(
            holder(&conn, theirs.item_ref()),
            (ItemStatus::Assigned, Some("987654321".to_string()))
        );
    }

    #[test]
    fn status_changes_require_release_first() {
        let conn = setup();
        let shako = create_item(&conn, &NewItem::new(ItemKind::Shako, "5")).unwrap();
        assign_item(&conn, "123456789", shako.item_ref()).unwrap();

        assert!(set_item_status(&conn, shako.item_ref(), ItemStatus::Retired).is_err());
        assert!(set_item_status(&conn, shako.item_ref(), ItemStatus::Assigned).is_err());
        assert_eq!(
            holder(&conn, shako.item_ref()),
            (ItemStatus::Assigned, Some("123456789".to_string()))
        );
    }

    #[test]
    fn assigned_status_always_has_a_holder() {
        let conn = setup();
        for tag in 1..=4 {
            create_item(&conn, &NewItem::new(ItemKind::Pants, &tag.to_string())).unwrap();
        }
        let items = fetch_items(&conn, ItemKind::Pants).unwrap();
        assign_item(&conn, "123456789", items[0].item_ref()).unwrap();
        assign_item(&conn, "987654321", items[1].item_ref()).unwrap();
        release_item(&conn, items[1].item_ref(), ItemStatus::Maintenance).unwrap();
        let err = assign_item(&conn, "987654321", items[0].item_ref()).unwrap_err();
        assert!(matches!(err, InventoryError::Conflict { ref holder, .. } if holder == "123456789"));

        for item in fetch_items(&conn, ItemKind::Pants).unwrap() {
            assert_eq!(item.is_assigned(), item.student_id.is_some(), "{item:?}");
        }
    }

    fn uniform_with(shako: Option<i64>, coat: Option<i64>, bag: &str) -> NewItem {
        NewItem {
            details: ItemDetails::Uniform {
                shako_num: shako,
                hanger_num: None,
                garment_bag: bag.to_string(),
                coat_num: coat,
                pants_num: None,
            },
            ..NewItem::new(ItemKind::Uniform, "")
        }
    }

    #[test]
    fn uniform_set_refused_while_its_shako_is_out() {
        let conn = setup();
        let shako = create_item(&conn, &NewItem::new(ItemKind::Shako, "4")).unwrap();
        assign_item(&conn, "987654321", shako.item_ref()).unwrap();
        let set = create_item(&conn, &uniform_with(Some(4), None, "")).unwrap();

        let err = assign_item(&conn, "123456789", set.item_ref()).unwrap_err();
        assert_eq!(
            err.to_string(),
            format!(
                "Shako 4 (part of Uniform {}) is already assigned to student 987654321.",
                set.id
            )
        );
        assert_eq!(holder(&conn, set.item_ref()), (ItemStatus::Available, None));
    }

    #[test]
    fn loose_piece_refused_while_its_uniform_set_is_out() {
        let conn = setup();
        let set = create_item(&conn, &uniform_with(None, Some(7), "B-2")).unwrap();
        let coat = create_item(&conn, &NewItem::new(ItemKind::Coat, "7")).unwrap();
        let bag = create_item(&conn, &NewItem::new(ItemKind::GarmentBag, "B-2")).unwrap();
        assign_item(&conn, "123456789", set.item_ref()).unwrap();

        for piece in [coat.item_ref(), bag.item_ref()] {
            let err = assign_item(&conn, "987654321", piece).unwrap_err();
            assert!(matches!(err, InventoryError::Conflict { ref holder, .. } if holder == "123456789"));
            assert_eq!(holder(&conn, piece), (ItemStatus::Available, None));
        }
    }

    #[test]
    fn same_student_may_hold_set_and_its_pieces() {
        let conn = setup();
        let shako = create_item(&conn, &NewItem::new(ItemKind::Shako, "4")).unwrap();
        let set = create_item(&conn, &uniform_with(Some(4), None, "")).unwrap();

        let report = assign_items(&conn, "123456789", &[shako.item_ref(), set.item_ref()]).unwrap();
        assert!(report.is_complete());
        assert_eq!(report.assigned.len(), 2);
    }

    #[test]
    fn database_error_rolls_back_the_whole_batch() {
        let conn = setup();
        let coat = create_item(&conn, &NewItem::new(ItemKind::Coat, "1")).unwrap();
        let shako = create_item(&conn, &NewItem::new(ItemKind::Shako, "1")).unwrap();
        conn.execute_batch("DROP TABLE shakos").unwrap();

        let err = assign_items(&conn, "123456789", &[coat.item_ref(), shako.item_ref()]).unwrap_err();
        assert!(matches!(err, InventoryError::Database(_)));
        assert_eq!(holder(&conn, coat.item_ref()), (ItemStatus::Available, None));
    }

    #[test]
    fn releasing_a_missing_item_is_not_found() {
        let conn = setup();
        let err = release_item(&conn, ItemRef::new(ItemKind::Pants, 42), ItemStatus::Available)
            .unwrap_err();
        assert!(matches!(err, InventoryError::NotFound(_)));
        assert_eq!(err.to_string(), "Pants #42 not found.");
    }
}
