#![forbid(unsafe_code)]

use super::coordinator::Window;
use super::support::{
    channel_for_tree, fetch_children, fetch_node, fetch_subtree, insert_node, insert_nodes,
    make_space, mark_ancestors_changed, sort_order_between_neighbours,
};
use super::{
    AssociatedObjectReplicator, BatchContext, CloneOptions, CopyOptions, CopyReport, LockPlan,
    NodeCloner, StoreError, TreeStore,
};
use ct_core::tree::Arena;
use ct_core::{Node, Position, ProgressTracker, TreeError};
use rusqlite::{Connection, params};
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::{debug, info};

/// One subtree still waiting to be copied.
struct Pending {
    source_id: String,
    target_id: Option<String>,
    position: Position,
    top: bool,
}

/// What one lock window wrote: the top copy and every `(source id, copy id)` pair.
struct Written {
    top: Node,
    pairs: Vec<(String, String)>,
}

impl TreeStore {
    /// Copy `node` with its subtree to `position` relative to `target`.
    ///
    /// Returns the new top node(s). See [`TreeStore::copy_node_with_report`].
    pub fn copy_node(
        &self,
        ctx: &BatchContext,
        node: &Node,
        target: Option<&Node>,
        position: Position,
        options: &CopyOptions,
        progress: Option<&mut dyn ProgressTracker>,
    ) -> Result<Vec<Node>, StoreError> {
        Ok(self
            .copy_node_with_report(ctx, node, target, position, options, progress)?
            .roots)
    }

    /// Copy a subtree and its files, tags, assessment items and internal prerequisites.
    ///
    /// Subtrees whose interval width is below the batch size are written in one lock window;
    /// wider ones copy their top node alone and recurse into the children. The whole call is
    /// one transaction: on error nothing it wrote survives.
    pub fn copy_node_with_report(
        &self,
        ctx: &BatchContext,
        node: &Node,
        target: Option<&Node>,
        position: Position,
        options: &CopyOptions,
        progress: Option<&mut dyn ProgressTracker>,
    ) -> Result<CopyReport, StoreError> {
        let batch_size = options.batch_size.unwrap_or(self.config.batch_size);
        if batch_size == 0 {
            return Err(StoreError::InvalidInput("batch_size must be at least 1"));
        }

        let window = Window::open(&self.conn, "copy_node", true)?;
        match self.run_copy(ctx, node, target, position, options, batch_size, progress) {
            Ok(report) => {
                window.commit()?;
                info!(
                    source = %node.id,
                    nodes = report.node_map.len(),
                    deep_batches = report.deep_batches,
                    shallow_nodes = report.shallow_nodes,
                    "subtree copied"
                );
                Ok(report)
            }
            Err(err) => {
                window.rollback();
                Err(err)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn run_copy(
        &self,
        ctx: &BatchContext,
        node: &Node,
        target: Option<&Node>,
        position: Position,
        options: &CopyOptions,
        batch_size: usize,
        mut progress: Option<&mut dyn ProgressTracker>,
    ) -> Result<CopyReport, StoreError> {
        let source = fetch_node(&self.conn, &node.id)?;
        let source_channel_id = channel_for_tree(&self.conn, source.tree_id)?.map(|channel| channel.id);

        let planned = self.coordinator().with_locks(
            &self.conn,
            ctx,
            &LockPlan::new([], [source.tree_id]),
            |conn| planned_ids(conn, &source, &options.excluded_descendants),
        )?;
        if let Some(progress) = progress.as_deref_mut() {
            progress.set_total(planned.len() as u64);
        }

        let mut report = CopyReport::default();
        if !planned.contains(&source.id) {
            debug!(source = %source.id, "copy source is excluded");
            return Ok(report);
        }

        let batch_width = i64::try_from(batch_size).unwrap_or(i64::MAX);
        let mut replicator = self.replicator();
        let mut stack = vec![Pending {
            source_id: source.id.clone(),
            target_id: target.map(|target| target.id.clone()),
            position,
            top: true,
        }];

        while let Some(pending) = stack.pop() {
            let current = fetch_node(&self.conn, &pending.source_id)?;
            let clone_options = CloneOptions {
                parent_id: None,
                source_channel_id: source_channel_id.clone(),
                can_edit_source_channel: options.can_edit_source_channel,
                pk: if pending.top { options.pk.clone() } else { None },
                overrides: if pending.top {
                    options.overrides.as_ref()
                } else {
                    None
                },
            };
            let deep = current.subtree_width() < batch_width;
            debug!(
                source = %current.id,
                width = current.subtree_width(),
                batch_size,
                deep,
                "copy decision"
            );

            let written = if deep {
                self.deep_copy(ctx, &current, &pending, &clone_options, &planned)?
            } else {
                self.shallow_copy(ctx, &current, &pending, &clone_options)?
            };
            report
                .replicated
                .absorb(&replicator.replicate(&written.pairs)?);
            if let Some(progress) = progress.as_deref_mut() {
                progress.increment(written.pairs.len() as u64);
            }
            if deep {
                report.deep_batches += 1;
            } else {
                report.shallow_nodes += 1;
                let children = fetch_children(&self.conn, &current.id)?;
                for child in children.iter().rev() {
                    if planned.contains(&child.id) {
                        stack.push(Pending {
                            source_id: child.id.clone(),
                            target_id: Some(written.top.id.clone()),
                            position: Position::LastChild,
                            top: false,
                        });
                    }
                }
            }
            if pending.top {
                report.roots.push(written.top);
            }
            report.node_map.extend(written.pairs);
        }

        let (copied, removed) = replicate_prerequisites(&replicator, &report)?;
        report.prerequisites = copied;
        report.dangling_prerequisites_removed = removed;

        for root in &mut report.roots {
            *root = fetch_node(&self.conn, &root.id)?;
        }
        Ok(report)
    }

    /// Clone the planned part of `source`'s subtree into an arena and insert it in one window.
    fn deep_copy(
        &self,
        ctx: &BatchContext,
        source: &Node,
        pending: &Pending,
        clone_options: &CloneOptions<'_>,
        planned: &HashSet<String>,
    ) -> Result<Written, StoreError> {
        let plan = self.copy_plan(source, pending)?;
        self.coordinator().with_locks(&self.conn, ctx, &plan, |conn| {
            let source = fetch_node(conn, &source.id)?;
            let rows: Vec<Node> = fetch_subtree(conn, &source)?
                .into_iter()
                .filter(|row| planned.contains(&row.id))
                .collect();

            let mut cloner = NodeCloner::new(conn);
            let mut arena: Arena<Node> = Arena::with_capacity(rows.len());
            let mut sources: Vec<String> = Vec::with_capacity(rows.len());
            let mut index_of: HashMap<&str, usize> = HashMap::with_capacity(rows.len());
            for row in &rows {
                let (parent, options) = if row.id == source.id {
                    (None, clone_options.clone())
                } else {
                    let parent = row
                        .parent_id
                        .as_deref()
                        .and_then(|parent_id| index_of.get(parent_id).copied())
                        .ok_or_else(|| {
                            TreeError::Invariant(format!("copied node {} lost its parent", row.id))
                        })?;
                    let parent_id = arena
                        .get(parent)
                        .map(|entry| entry.payload.id.clone())
                        .ok_or(StoreError::UnknownId)?;
                    let options = CloneOptions {
                        parent_id: Some(parent_id),
                        pk: None,
                        overrides: None,
                        ..clone_options.clone()
                    };
                    (Some(parent), options)
                };
                let copy = cloner.clone_node(row, &options)?;
                index_of.insert(row.id.as_str(), arena.push(parent, copy)?);
                sources.push(row.id.clone());
            }

            let target = pending
                .target_id
                .as_deref()
                .map(|id| fetch_node(conn, id))
                .transpose()?;
            let placed = make_space(conn, target.as_ref(), pending.position, arena.span())?;
            let slots = arena.layout(placed.lft, placed.level)?;

            let mut pairs = Vec::with_capacity(arena.len());
            let mut copies = Vec::with_capacity(arena.len());
            for ((entry, slot), source_id) in arena.into_entries().into_iter().zip(slots).zip(sources) {
                let mut copy = entry.payload;
                copy.tree_id = placed.tree_id;
                copy.lft = slot.lft;
                copy.rght = slot.rght;
                copy.level = slot.level;
                if entry.parent.is_none() {
                    copy.parent_id = placed.parent_id.clone();
                }
                pairs.push((source_id, copy.id.clone()));
                copies.push(copy);
            }
            insert_nodes(conn, &copies)?;
            let mut top = copies.into_iter().next().ok_or(StoreError::UnknownId)?;
            place_top(conn, &mut top)?;
            Ok(Written { top, pairs })
        })
    }

    /// Copy only the top node of `source` in its own window.
    fn shallow_copy(
        &self,
        ctx: &BatchContext,
        source: &Node,
        pending: &Pending,
        clone_options: &CloneOptions<'_>,
    ) -> Result<Written, StoreError> {
        let plan = self.copy_plan(source, pending)?;
        self.coordinator().with_locks(&self.conn, ctx, &plan, |conn| {
            let source = fetch_node(conn, &source.id)?;
            let mut copy = NodeCloner::new(conn).clone_node(&source, clone_options)?;
            let target = pending
                .target_id
                .as_deref()
                .map(|id| fetch_node(conn, id))
                .transpose()?;
            let placed = make_space(conn, target.as_ref(), pending.position, 2)?;
            copy.tree_id = placed.tree_id;
            copy.lft = placed.lft;
            copy.rght = placed.lft + 1;
            copy.level = placed.level;
            copy.parent_id = placed.parent_id;
            insert_node(conn, &copy)?;
            place_top(conn, &mut copy)?;
            Ok(Written {
                pairs: vec![(source.id.clone(), copy.id.clone())],
                top: copy,
            })
        })
    }

    /// Target tree exclusive, source tree shared.
    fn copy_plan(&self, source: &Node, pending: &Pending) -> Result<LockPlan, StoreError> {
        let target_tree = pending
            .target_id
            .as_deref()
            .map(|id| fetch_node(&self.conn, id).map(|target| target.tree_id))
            .transpose()?;
        Ok(LockPlan::new(target_tree, [source.tree_id]))
    }
}

/// Ids of `source`'s subtree minus every excluded `node_id` and everything below it.
fn planned_ids(
    conn: &Connection,
    source: &Node,
    excluded: &BTreeSet<String>,
) -> Result<HashSet<String>, StoreError> {
    let mut stmt = conn.prepare_cached(
        "SELECT id, node_id, rght FROM nodes \
         WHERE tree_id = ?1 AND lft >= ?2 AND rght <= ?3 ORDER BY lft",
    )?;
    let rows = stmt.query_map(
        params![source.tree_id.get(), source.lft, source.rght],
        |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
            ))
        },
    )?;

    let mut planned = HashSet::new();
    // `rght` of the excluded subtree currently being skipped.
    let mut skip_until: Option<i64> = None;
    for row in rows {
        let (id, node_id, rght) = row?;
        if let Some(limit) = skip_until {
            if rght < limit {
                continue;
            }
            skip_until = None;
        }
        if excluded.contains(&node_id) {
            skip_until = Some(rght);
            continue;
        }
        planned.insert(id);
    }
    Ok(planned)
}

/// Give a freshly inserted top copy its sibling `sort_order` and flag its new ancestors.
fn place_top(conn: &Connection, top: &mut Node) -> Result<(), StoreError> {
    top.sort_order = if top.parent_id.is_some() {
        sort_order_between_neighbours(conn, top.tree_id, top.lft, top.rght)?
    } else {
        1.0
    };
    conn.execute(
        "UPDATE nodes SET sort_order = ?2 WHERE id = ?1",
        params![top.id, top.sort_order],
    )?;
    mark_ancestors_changed(conn, top.tree_id, top.lft, top.rght)?;
    Ok(())
}

fn replicate_prerequisites(
    replicator: &AssociatedObjectReplicator<'_>,
    report: &CopyReport,
) -> Result<(usize, usize), StoreError> {
    if report.node_map.is_empty() {
        return Ok((0, 0));
    }
    replicator.replicate_prerequisites(&report.node_map)
}
