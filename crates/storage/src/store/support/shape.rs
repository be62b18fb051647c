#![forbid(unsafe_code)]

use super::super::StoreError;
use ct_core::{Node, Placement, Position, TreeId, placement};
use rusqlite::{Connection, OptionalExtension, params};

/// Landing spot prepared for `span` slots of new intervals.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(in crate::store) struct Placed {
    pub tree_id: TreeId,
    pub lft: i64,
    pub level: i64,
    pub parent_id: Option<String>,
}

/// Open room for `span` interval slots at `position` relative to `target`.
///
/// `target` must carry shape columns read inside the current lock window.
pub(in crate::store) fn make_space(
    conn: &Connection,
    target: Option<&Node>,
    position: Position,
    span: i64,
) -> Result<Placed, StoreError> {
    match placement(target, position) {
        Placement::InTree {
            tree_id,
            space,
            level,
            parent_id,
        } => {
            open_gap(conn, tree_id, space, span)?;
            Ok(Placed {
                tree_id,
                lft: space,
                level,
                parent_id,
            })
        }
        Placement::NewTree => Ok(Placed {
            tree_id: mint_tree_id(conn)?,
            lft: 1,
            level: 0,
            parent_id: None,
        }),
        Placement::NewTreeAt { at } => {
            shift_trees(conn, at, 1)?;
            Ok(Placed {
                tree_id: at,
                lft: 1,
                level: 0,
                parent_id: None,
            })
        }
    }
}

pub(in crate::store) fn mint_tree_id(conn: &Connection) -> Result<TreeId, StoreError> {
    conn.prepare_cached("INSERT INTO tree_id_mint(created_at_ms) VALUES (?1)")?
        .execute(params![super::now_ms()])?;
    Ok(TreeId::new(conn.last_insert_rowid()))
}

/// Shift every tree id `>= at` up by `count` and advance the mint past the shifted range.
pub(in crate::store) fn shift_trees(
    conn: &Connection,
    at: TreeId,
    count: i64,
) -> Result<(), StoreError> {
    if at.is_all() {
        return Err(StoreError::LockOrderingViolation(
            "cannot make room at the all-trees sentinel",
        ));
    }
    if count < 1 {
        return Err(StoreError::InvalidInput("tree room count must be positive"));
    }
    conn.execute(
        "UPDATE nodes SET tree_id = tree_id + ?2 WHERE tree_id >= ?1",
        params![at.get(), count],
    )?;
    for _ in 0..count {
        mint_tree_id(conn)?;
    }
    Ok(())
}

pub(in crate::store) fn open_gap(
    conn: &Connection,
    tree_id: TreeId,
    space: i64,
    span: i64,
) -> Result<(), StoreError> {
    conn.prepare_cached("UPDATE nodes SET lft = lft + ?3 WHERE tree_id = ?1 AND lft >= ?2")?
        .execute(params![tree_id.get(), space, span])?;
    conn.prepare_cached("UPDATE nodes SET rght = rght + ?3 WHERE tree_id = ?1 AND rght >= ?2")?
        .execute(params![tree_id.get(), space, span])?;
    Ok(())
}

/// Close the gap left by an interval that ended at `after`.
pub(in crate::store) fn close_gap(
    conn: &Connection,
    tree_id: TreeId,
    after: i64,
    span: i64,
) -> Result<(), StoreError> {
    conn.prepare_cached("UPDATE nodes SET lft = lft - ?3 WHERE tree_id = ?1 AND lft > ?2")?
        .execute(params![tree_id.get(), after, span])?;
    conn.prepare_cached("UPDATE nodes SET rght = rght - ?3 WHERE tree_id = ?1 AND rght > ?2")?
        .execute(params![tree_id.get(), after, span])?;
    Ok(())
}

/// Flag every ancestor of the interval as changed.
pub(in crate::store) fn mark_ancestors_changed(
    conn: &Connection,
    tree_id: TreeId,
    lft: i64,
    rght: i64,
) -> Result<usize, StoreError> {
    Ok(conn
        .prepare_cached(
            "UPDATE nodes SET changed = 1 WHERE tree_id = ?1 AND lft < ?2 AND rght > ?3",
        )?
        .execute(params![tree_id.get(), lft, rght])?)
}

/// `sort_order` that keeps the node between its interval neighbours.
pub(in crate::store) fn sort_order_between_neighbours(
    conn: &Connection,
    tree_id: TreeId,
    lft: i64,
    rght: i64,
) -> Result<f64, StoreError> {
    let previous: Option<f64> = conn
        .prepare_cached("SELECT sort_order FROM nodes WHERE tree_id = ?1 AND rght = ?2")?
        .query_row(params![tree_id.get(), lft - 1], |row| row.get(0))
        .optional()?;
    let next: Option<f64> = conn
        .prepare_cached("SELECT sort_order FROM nodes WHERE tree_id = ?1 AND lft = ?2")?
        .query_row(params![tree_id.get(), rght + 1], |row| row.get(0))
        .optional()?;
    Ok(match (previous, next) {
        (Some(previous), Some(next)) => (previous + next) / 2.0,
        (Some(previous), None) => previous + 1.0,
        (None, Some(next)) => next - 1.0,
        (None, None) => 1.0,
    })
}
