use std::collections::HashMap;

use anyhow::{anyhow, Context, Result};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, Error as SqlError, ErrorCode, OptionalExtension, Params, Row};

use crate::error::InventoryError;
use crate::models::{
    Condition, Item, ItemDetails, ItemKind, ItemRef, ItemStatus, NewItem, OutstandingItem,
    Section, TagValue,
};

/// Fixed precedence every status-sorted listing uses.
const STATUS_ORDER: &str = "CASE status
        WHEN 'Assigned' THEN 1
        WHEN 'Available' THEN 2
        WHEN 'Maintenance' THEN 3
        WHEN 'Retired' THEN 4
    END";

/// Columns shared by every item table, before the kind-specific ones.
const COMMON_COLUMNS: usize = 5;

/// Select list for `kind`, optionally qualified with a table alias.
fn item_columns(kind: ItemKind, alias: &str) -> String {
    let prefix = if alias.is_empty() {
        String::new()
    } else {
        format!("{alias}.")
    };
    let mut columns = vec![
        format!("{prefix}id"),
        format!("CAST({prefix}{} AS TEXT)", kind.tag_column()),
        format!("{prefix}status"),
        format!("{prefix}student_id"),
        format!("{prefix}notes"),
    ];
    columns.extend(
        kind.detail_columns()
            .iter()
            .map(|column| format!("{prefix}{column}")),
    );
    columns.join(", ")
}

fn opt_text(row: &Row<'_>, idx: usize) -> rusqlite::Result<String> {
    Ok(row.get::<_, Option<String>>(idx)?.unwrap_or_default())
}

/// Hydrate an `Item` from a row produced by `item_columns`.
fn map_item_row(kind: ItemKind, row: &Row<'_>) -> rusqlite::Result<Item> {
    let d = COMMON_COLUMNS;
    let details = match kind {
        ItemKind::Uniform => ItemDetails::Uniform {
            shako_num: row.get(d)?,
            hanger_num: row.get(d + 1)?,
            garment_bag: opt_text(row, d + 2)?,
            coat_num: row.get(d + 3)?,
            pants_num: row.get(d + 4)?,
        },
        ItemKind::Instrument => ItemDetails::Instrument {
            name: opt_text(row, d)?,
            section: opt_text(row, d + 1)?,
            case_number: opt_text(row, d + 2)?,
            model: opt_text(row, d + 3)?,
            condition: row.get::<_, Option<Condition>>(d + 4)?.unwrap_or(Condition::Good),
        },
        ItemKind::Coat => ItemDetails::Coat {
            hanger_num: row.get(d)?,
        },
        ItemKind::Shako | ItemKind::Pants | ItemKind::GarmentBag => ItemDetails::Plain,
    };

    Ok(Item {
        id: row.get(0)?,
        kind,
        tag: opt_text(row, 1)?,
        status: row.get(2)?,
        student_id: row.get(3)?,
        notes: opt_text(row, 4)?,
        details,
    })
}

/// Run a filtered select against one item table.
fn query_items<P: Params>(
    conn: &Connection,
    kind: ItemKind,
    filter: &str,
    params: P,
    order: &str,
) -> rusqlite::Result<Vec<Item>> {
    let sql = format!(
        "SELECT {} FROM {} {filter} ORDER BY {order}",
        item_columns(kind, ""),
        kind.table()
    );
    let mut stmt = conn.prepare(&sql)?;
    let items = stmt
        .query_map(params, |row| map_item_row(kind, row))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(items)
}

/// Load one item by reference.
pub(crate) fn load_item(conn: &Connection, item: ItemRef) -> rusqlite::Result<Option<Item>> {
    conn.query_row(
        &format!(
            "SELECT {} FROM {} WHERE id = ?1",
            item_columns(item.kind, ""),
            item.kind.table()
        ),
        [item.id],
        |row| map_item_row(item.kind, row),
    )
    .optional()
}

/// List every item of one kind ordered Assigned, Available, Maintenance,
/// Retired, then by insertion order.
pub fn fetch_items(conn: &Connection, kind: ItemKind) -> Result<Vec<Item>> {
    query_items(conn, kind, "", [], &format!("{STATUS_ORDER}, id"))
        .with_context(|| format!("failed to load {} items", kind.table()))
}

/// Items a student currently holds, grouped by kind.
pub fn fetch_items_for_student(conn: &Connection, student_id: &str) -> Result<Vec<Item>> {
    let mut items = Vec::new();
    for kind in ItemKind::ALL {
        let held = query_items(conn, *kind, "WHERE student_id = ?1", [student_id], "id")
            .with_context(|| format!("failed to load {} held by student", kind.table()))?;
        items.extend(held);
    }
    Ok(items)
}

/// Every Available item across kinds, for the assignment picker.
pub fn fetch_available_items(conn: &Connection) -> Result<Vec<Item>> {
    let mut items = Vec::new();
    for kind in ItemKind::ALL {
        let available = query_items(conn, *kind, "WHERE status = 'Available'", [], "id")
            .with_context(|| format!("failed to load available {}", kind.table()))?;
        items.extend(available);
    }
    Ok(items)
}

/// Look up an item by reference.
pub fn find_item(conn: &Connection, item: ItemRef) -> Result<Option<Item>> {
    load_item(conn, item).context("failed to load item")
}

/// Look up an item by its serial or component number.
pub fn find_item_by_tag(conn: &Connection, kind: ItemKind, tag: &str) -> Result<Option<Item>> {
    let tag = kind.parse_tag(tag)?;
    let filter = format!("WHERE {} = ?1", kind.tag_column());
    let mut items = query_items(conn, kind, &filter, [tag], "id")
        .with_context(|| format!("failed to look up {}", kind.label()))?;
    Ok(if items.is_empty() {
        None
    } else {
        Some(items.remove(0))
    })
}

/// Number of Assigned items per student id, across every kind.
pub fn fetch_holding_counts(conn: &Connection) -> Result<HashMap<String, usize>> {
    let union = ItemKind::ALL
        .iter()
        .map(|kind| {
            format!(
                "SELECT student_id FROM {} WHERE status = 'Assigned'",
                kind.table()
            )
        })
        .collect::<Vec<_>>()
        .join(" UNION ALL ");
    let mut stmt = conn
        .prepare(&format!(
            "SELECT student_id, COUNT(*) FROM ({union}) GROUP BY student_id"
        ))
        .context("failed to prepare holdings query")?;

    let counts = stmt
        .query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as usize))
        })
        .context("failed to count holdings")?
        .collect::<Result<HashMap<_, _>, _>>()
        .context("failed to collect holdings")?;

    Ok(counts)
}

/// Assigned items of one kind with their holders, optionally restricted to a
/// section, sorted by the holder's name.
pub fn fetch_outstanding(
    conn: &Connection,
    kind: ItemKind,
    section: Option<Section>,
) -> Result<Vec<OutstandingItem>> {
    let name_idx = COMMON_COLUMNS + kind.detail_columns().len();
    let section_filter = if section.is_some() {
        "AND s.section = ?1"
    } else {
        ""
    };
    let sql = format!(
        "SELECT {}, s.first_name, s.last_name, s.section
         FROM {} i
         INNER JOIN students s ON s.student_id = i.student_id
         WHERE i.status = 'Assigned' {section_filter}
         ORDER BY s.last_name COLLATE NOCASE, s.first_name COLLATE NOCASE, i.id",
        item_columns(kind, "i"),
        kind.table()
    );
    let mut stmt = conn
        .prepare(&sql)
        .context("failed to prepare outstanding query")?;

    let map_row = |row: &Row<'_>| -> rusqlite::Result<OutstandingItem> {
        let item = map_item_row(kind, row)?;
        let first: String = row.get(name_idx)?;
        let last: String = row.get(name_idx + 1)?;
        Ok(OutstandingItem {
            student_id: item.student_id.clone().unwrap_or_default(),
            student_name: format!("{last}, {first}"),
            section: row.get(name_idx + 2)?,
            item,
        })
    };

    let rows = match section {
        Some(section) => stmt.query_map([section], map_row),
        None => stmt.query_map([], map_row),
    }
    .context("failed to load outstanding items")?
    .collect::<Result<Vec<_>, _>>()
    .context("failed to collect outstanding items")?;

    Ok(rows)
}

fn text_value(value: &str) -> Value {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        Value::Null
    } else {
        Value::Text(trimmed.to_string())
    }
}

fn int_value(value: Option<i64>) -> Value {
    value.map(Value::Integer).unwrap_or(Value::Null)
}

fn tag_value(tag: TagValue) -> Value {
    match tag {
        TagValue::Number(n) => Value::Integer(n),
        TagValue::Text(s) => Value::Text(s),
    }
}

/// Values for `kind.detail_columns()`, in the same order.
fn detail_values(details: &ItemDetails) -> Vec<Value> {
    match details {
        ItemDetails::Uniform {
            shako_num,
            hanger_num,
            garment_bag,
            coat_num,
            pants_num,
        } => vec![
            int_value(*shako_num),
            int_value(*hanger_num),
            text_value(garment_bag),
            int_value(*coat_num),
            int_value(*pants_num),
        ],
        ItemDetails::Instrument {
            name,
            section,
            case_number,
            model,
            condition,
        } => vec![
            text_value(name),
            text_value(section),
            text_value(case_number),
            text_value(model),
            Value::Text(condition.as_str().to_string()),
        ],
        ItemDetails::Coat { hanger_num } => vec![int_value(*hanger_num)],
        ItemDetails::Plain => Vec::new(),
    }
}

/// Tag plus detail columns and values shared by insert and update.
fn editable_columns(
    kind: ItemKind,
    tag: &str,
    details: &ItemDetails,
    notes: &str,
) -> Result<(Vec<&'static str>, Vec<Value>)> {
    if !details.matches(kind) {
        return Err(anyhow!("{} details do not match the item kind", kind.label()));
    }

    let mut columns = Vec::new();
    let mut values = Vec::new();
    if kind.has_user_tag() {
        columns.push(kind.tag_column());
        values.push(tag_value(kind.parse_tag(tag)?));
    }
    columns.extend_from_slice(kind.detail_columns());
    values.extend(detail_values(details));
    columns.push("notes");
    values.push(text_value(notes));
    Ok((columns, values))
}

/// Insert an item administratively. New items start out unassigned; handing
/// one to a student always goes through the assignment operation.
pub fn create_item(conn: &Connection, item: &NewItem) -> Result<Item> {
    if item.status == ItemStatus::Assigned {
        return Err(InventoryError::validation(
            "New items cannot start out assigned; assign them to a student instead.",
        )
        .into());
    }

    let kind = item.kind;
    let (mut columns, mut values) = editable_columns(kind, &item.tag, &item.details, &item.notes)?;
    columns.push("status");
    values.push(Value::Text(item.status.as_str().to_string()));

    let placeholders = (1..=values.len())
        .map(|idx| format!("?{idx}"))
        .collect::<Vec<_>>()
        .join(", ");
    conn.execute(
        &format!(
            "INSERT INTO {} ({}) VALUES ({placeholders})",
            kind.table(),
            columns.join(", ")
        ),
        params_from_iter(values.iter()),
    )
    .map_err(|err| map_unique_constraint(err, kind, &item.tag))
    .with_context(|| format!("failed to insert {}", kind.label()))?;

    let id = conn.last_insert_rowid();
    load_item(conn, ItemRef::new(kind, id))
        .context("failed to reload item")?
        .ok_or_else(|| anyhow!("{} not found after insert", kind.label()))
}

/// Update tag, details and notes. Status and holder are only changed by the
/// assignment operations.
pub fn update_item(conn: &Connection, item: &Item) -> Result<()> {
    let kind = item.kind;
    let (columns, mut values) = editable_columns(kind, &item.tag, &item.details, &item.notes)?;
    let assignments = columns
        .iter()
        .enumerate()
        .map(|(idx, column)| format!("{column} = ?{}", idx + 1))
        .collect::<Vec<_>>()
        .join(", ");
    values.push(Value::Integer(item.id));

    let updated = conn
        .execute(
            &format!(
                "UPDATE {} SET {assignments} WHERE id = ?{}",
                kind.table(),
                values.len()
            ),
            params_from_iter(values.iter()),
        )
        .map_err(|err| map_unique_constraint(err, kind, &item.tag))
        .with_context(|| format!("failed to update {}", kind.label()))?;

    if updated == 0 {
        Err(anyhow!("{} not found", kind.label()))
    } else {
        Ok(())
    }
}

/// Turn tag collisions into a readable message.
fn map_unique_constraint(err: SqlError, kind: ItemKind, tag: &str) -> anyhow::Error {
    if matches!(
        err.sqlite_error_code(),
        Some(ErrorCode::ConstraintViolation)
    ) {
        anyhow!("{} {} already exists.", kind.label(), tag.trim())
    } else {
        err.into()
    }
}
