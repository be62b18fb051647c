#![forbid(unsafe_code)]

use super::support::{
    close_gap, fetch_node, fetch_shapes, fetch_tree_rows, make_space, mark_ancestors_changed,
    mint_tree_id, shift_trees, sort_order_between_neighbours,
};
use super::{BatchContext, LockPlan, StoreError, TreeStore};
use ct_core::tree::arena_from_parent_links;
use ct_core::{Node, Placement, Position, TreeId, placement};
use rusqlite::{Connection, params};
use tracing::{debug, info};

impl TreeStore {
    /// Relocate `node` (with its subtree) to `position` relative to `target`.
    ///
    /// `target = None` turns the node into a new root tree. Both in-memory nodes are refreshed
    /// from storage; `node` ends up holding its new shape.
    pub fn move_node(
        &self,
        ctx: &BatchContext,
        node: &mut Node,
        mut target: Option<&mut Node>,
        position: Position,
    ) -> Result<(), StoreError> {
        let old_tree_id = node.tree_id;
        let plan = LockPlan::new(
            std::iter::once(node.tree_id).chain(target.as_deref().map(|target| target.tree_id)),
            [],
        );
        let target_id = target.as_deref().map(|target| target.id.clone());

        let (moved, refreshed_target, source_tree) = self.structural(ctx, &plan, |conn| {
            relocate(conn, &node.id, target_id.as_deref(), position)
        })?;

        *node = moved;
        if let (Some(target), Some(refreshed)) = (target.as_deref_mut(), refreshed_target) {
            *target = refreshed;
        }

        info!(
            id = %node.id,
            position = %position,
            from_tree = old_tree_id.get(),
            to_tree = node.tree_id.get(),
            "node moved"
        );
        self.events.node_moved(node, target.as_deref(), position);

        if source_tree != node.tree_id {
            // A root move into another tree leaves the old tree empty.
            if let Some(old_root) = self.root_of(source_tree)? {
                self.events.reset_modified(&old_root);
            }
            if let Some(new_root) = self.root_of(node.tree_id)? {
                self.events.reset_modified(&new_root);
            }
        }
        Ok(())
    }

    /// Mint a tree id that no other caller, in any process, will receive.
    pub fn allocate_tree_id(&self) -> Result<TreeId, StoreError> {
        mint_tree_id(&self.conn)
    }

    /// Shift every tree id `>= target_tree_id` up by `count`, freeing ids for new roots.
    pub fn make_room_for_tree(
        &self,
        ctx: &BatchContext,
        target_tree_id: TreeId,
        count: i64,
    ) -> Result<(), StoreError> {
        if target_tree_id.is_all() {
            return Err(StoreError::LockOrderingViolation(
                "cannot make room at the all-trees sentinel",
            ));
        }
        let plan = LockPlan::new([target_tree_id], []);
        self.structural(ctx, &plan, |conn| shift_trees(conn, target_tree_id, count))
    }

    /// Recompute `lft/rght/level` of one tree from parent links and `sort_order`.
    pub fn rebuild_tree(&self, ctx: &BatchContext, tree_id: TreeId) -> Result<usize, StoreError> {
        let plan = LockPlan::new([tree_id], []);
        let updated = self.structural(ctx, &plan, |conn| {
            let rows = fetch_tree_rows(conn, tree_id)?;
            let roots = rows.iter().filter(|row| row.parent_id.is_none()).count();
            if rows.is_empty() {
                return Ok(0);
            }
            if roots != 1 {
                return Err(StoreError::InvalidInput("tree must have exactly one root"));
            }
            let arena = arena_from_parent_links(&rows)?;
            let slots = arena.layout(1, 0)?;
            let mut stmt = conn.prepare_cached(
                "UPDATE nodes SET lft = ?2, rght = ?3, level = ?4 WHERE id = ?1",
            )?;
            for (entry, slot) in arena.iter().zip(slots) {
                stmt.execute(params![entry.payload, slot.lft, slot.rght, slot.level])?;
            }
            Ok(arena.len())
        })?;
        debug!(tree_id = tree_id.get(), updated, "tree rebuilt");
        Ok(updated)
    }
}

/// Close-the-gap / open-a-gap relocation of one subtree.
///
/// The moving subtree is parked at negative `lft/rght` while gaps shift, so no positional
/// update can touch it, then renumbered into the opened gap in a single update. Also returns
/// the current id of the tree the node left, which moves when a new root slot is opened.
fn relocate(
    conn: &Connection,
    node_id: &str,
    target_id: Option<&str>,
    position: Position,
) -> Result<(Node, Option<Node>, TreeId), StoreError> {
    let mut ids = vec![node_id];
    ids.extend(target_id);
    let shapes = fetch_shapes(conn, &ids)?;
    let shape_of = |id: &str| {
        shapes
            .iter()
            .find(|(candidate, _, _)| candidate == id)
            .map(|(_, shape, _)| *shape)
            .ok_or(StoreError::UnknownId)
    };
    let node = shape_of(node_id)?;
    if let Some(target_id) = target_id {
        let target = shape_of(target_id)?;
        if target_id == node_id {
            return Err(StoreError::InvalidMove("a node cannot be moved relative to itself"));
        }
        if target.tree_id == node.tree_id && node.lft < target.lft && target.rght < node.rght {
            return Err(StoreError::InvalidMove("a node cannot be moved into its own subtree"));
        }
    }

    let span = node.rght - node.lft + 1;
    mark_ancestors_changed(conn, node.tree_id, node.lft, node.rght)?;
    conn.execute(
        "UPDATE nodes SET lft = -lft, rght = -rght WHERE tree_id = ?1 AND lft >= ?2 AND rght <= ?3",
        params![node.tree_id.get(), node.lft, node.rght],
    )?;
    close_gap(conn, node.tree_id, node.rght, span)?;

    let target = target_id.map(|id| fetch_node(conn, id)).transpose()?;
    let new_tree_at = match placement(target.as_ref(), position) {
        Placement::NewTreeAt { at } => Some(at),
        _ => None,
    };
    let placed = make_space(conn, target.as_ref(), position, span)?;
    // Making room for a new root also shifted the parked rows when they sat at or above it.
    let parked_tree = match new_tree_at {
        Some(at) if node.tree_id >= at => node.tree_id.next(),
        _ => node.tree_id,
    };

    conn.execute(
        "UPDATE nodes SET tree_id = ?2, lft = -lft + ?3, rght = -rght + ?3, level = level + ?4 \
         WHERE tree_id = ?1 AND lft < 0",
        params![
            parked_tree.get(),
            placed.tree_id.get(),
            placed.lft - node.lft,
            placed.level - node.level,
        ],
    )?;

    let new_rght = placed.lft + span - 1;
    let sort_order = if placed.parent_id.is_some() {
        sort_order_between_neighbours(conn, placed.tree_id, placed.lft, new_rght)?
    } else {
        1.0
    };
    conn.execute(
        "UPDATE nodes SET parent_id = ?2, sort_order = ?3, changed = 1 WHERE id = ?1",
        params![node_id, placed.parent_id, sort_order],
    )?;
    mark_ancestors_changed(conn, placed.tree_id, placed.lft, new_rght)?;

    let moved = fetch_node(conn, node_id)?;
    let target = target_id.map(|id| fetch_node(conn, id)).transpose()?;
    Ok((moved, target, parked_tree))
}
