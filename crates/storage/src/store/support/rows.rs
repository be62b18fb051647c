#![forbid(unsafe_code)]

use super::super::StoreError;
use super::super::types::{AssessmentItem, Channel, FileRecord};
use ct_core::{Lineage, Node, NodeAttributes, TreeId, TreeRow, TreeShape};
use rusqlite::types::{Type, Value as SqlValue};
use rusqlite::{Connection, OptionalExtension, Row, params, params_from_iter};
use serde_json::Value;

pub(in crate::store) const NODE_COLUMNS: &str = "id, node_id, content_id, parent_id, tree_id, lft, rght, level, sort_order, \
     kind, title, description, language_id, license_id, license_description, thumbnail_encoding, \
     extra_fields, copyright_holder, author, aggregator, provider, role_visibility, grade_levels, \
     resource_types, learning_activities, accessibility_labels, categories, learner_needs, \
     suggested_duration, freeze_authoring_data, original_channel_id, original_source_node_id, \
     source_channel_id, source_node_id, cloned_source_id, original_node_id, changed, complete, \
     published";

fn json_column(row: &Row<'_>, index: usize) -> rusqlite::Result<Option<Value>> {
    let raw: Option<String> = row.get(index)?;
    raw.map(|raw| {
        serde_json::from_str(&raw)
            .map_err(|err| rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(err)))
    })
    .transpose()
}

fn json_text(value: &Option<Value>) -> Result<Option<String>, StoreError> {
    Ok(value.as_ref().map(serde_json::to_string).transpose()?)
}

pub(in crate::store) fn node_from_row(row: &Row<'_>) -> rusqlite::Result<Node> {
    Ok(Node {
        id: row.get(0)?,
        node_id: row.get(1)?,
        content_id: row.get(2)?,
        parent_id: row.get(3)?,
        tree_id: TreeId::new(row.get(4)?),
        lft: row.get(5)?,
        rght: row.get(6)?,
        level: row.get(7)?,
        sort_order: row.get(8)?,
        attributes: NodeAttributes {
            kind: row.get(9)?,
            title: row.get(10)?,
            description: row.get(11)?,
            language_id: row.get(12)?,
            license_id: row.get(13)?,
            license_description: row.get(14)?,
            thumbnail_encoding: row.get(15)?,
            extra_fields: json_column(row, 16)?.unwrap_or(Value::Null),
            copyright_holder: row.get(17)?,
            author: row.get(18)?,
            aggregator: row.get(19)?,
            provider: row.get(20)?,
            role_visibility: row.get(21)?,
            grade_levels: json_column(row, 22)?,
            resource_types: json_column(row, 23)?,
            learning_activities: json_column(row, 24)?,
            accessibility_labels: json_column(row, 25)?,
            categories: json_column(row, 26)?,
            learner_needs: json_column(row, 27)?,
            suggested_duration: row.get(28)?,
            freeze_authoring_data: row.get(29)?,
        },
        lineage: Lineage {
            original_channel_id: row.get(30)?,
            original_source_node_id: row.get(31)?,
            source_channel_id: row.get(32)?,
            source_node_id: row.get(33)?,
            cloned_source_id: row.get(34)?,
            original_node_id: row.get(35)?,
        },
        changed: row.get(36)?,
        complete: row.get(37)?,
        published: row.get(38)?,
    })
}

/// Bound columns per inserted node row.
const NODE_INSERT_WIDTH: usize = 40;
/// Bound-parameter ceiling of the SQLite builds we link against.
const MAX_BOUND_PARAMS: usize = 32_766;

/// Insert a fully-formed node row.
pub(in crate::store) fn insert_node(conn: &Connection, node: &Node) -> Result<(), StoreError> {
    insert_nodes(conn, std::slice::from_ref(node))
}

/// Insert many node rows with multi-row `INSERT ... VALUES` statements, one per chunk of rows
/// that fits the parameter ceiling.
pub(in crate::store) fn insert_nodes(conn: &Connection, nodes: &[Node]) -> Result<(), StoreError> {
    let modified_at_ms = super::now_ms();
    let row = format!("({})", vec!["?"; NODE_INSERT_WIDTH].join(", "));
    for chunk in nodes.chunks(MAX_BOUND_PARAMS / NODE_INSERT_WIDTH) {
        let mut stmt = conn.prepare_cached(&format!(
            "INSERT INTO nodes({NODE_COLUMNS}, modified_at_ms) VALUES {}",
            vec![row.as_str(); chunk.len()].join(", ")
        ))?;
        let mut values = Vec::with_capacity(chunk.len() * NODE_INSERT_WIDTH);
        for node in chunk {
            values.extend(node_values(node, modified_at_ms)?);
        }
        stmt.execute(params_from_iter(values))?;
    }
    Ok(())
}

fn node_values(
    node: &Node,
    modified_at_ms: i64,
) -> Result<[SqlValue; NODE_INSERT_WIDTH], StoreError> {
    let attributes = &node.attributes;
    let lineage = &node.lineage;
    Ok([
        node.id.clone().into(),
        node.node_id.clone().into(),
        node.content_id.clone().into(),
        node.parent_id.clone().into(),
        node.tree_id.get().into(),
        node.lft.into(),
        node.rght.into(),
        node.level.into(),
        node.sort_order.into(),
        attributes.kind.clone().into(),
        attributes.title.clone().into(),
        attributes.description.clone().into(),
        attributes.language_id.clone().into(),
        attributes.license_id.clone().into(),
        attributes.license_description.clone().into(),
        attributes.thumbnail_encoding.clone().into(),
        serde_json::to_string(&attributes.extra_fields)?.into(),
        attributes.copyright_holder.clone().into(),
        attributes.author.clone().into(),
        attributes.aggregator.clone().into(),
        attributes.provider.clone().into(),
        attributes.role_visibility.clone().into(),
        json_text(&attributes.grade_levels)?.into(),
        json_text(&attributes.resource_types)?.into(),
        json_text(&attributes.learning_activities)?.into(),
        json_text(&attributes.accessibility_labels)?.into(),
        json_text(&attributes.categories)?.into(),
        json_text(&attributes.learner_needs)?.into(),
        attributes.suggested_duration.into(),
        attributes.freeze_authoring_data.into(),
        lineage.original_channel_id.clone().into(),
        lineage.original_source_node_id.clone().into(),
        lineage.source_channel_id.clone().into(),
        lineage.source_node_id.clone().into(),
        lineage.cloned_source_id.clone().into(),
        lineage.original_node_id.clone().into(),
        node.changed.into(),
        node.complete.into(),
        node.published.into(),
        modified_at_ms.into(),
    ])
}

pub(in crate::store) fn fetch_node(conn: &Connection, id: &str) -> Result<Node, StoreError> {
    conn.query_row(
        &format!("SELECT {NODE_COLUMNS} FROM nodes WHERE id = ?1"),
        params![id],
        node_from_row,
    )
    .optional()?
    .ok_or(StoreError::UnknownId)
}

pub(in crate::store) fn query_nodes(
    conn: &Connection,
    where_clause: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<Node>, StoreError> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {NODE_COLUMNS} FROM nodes WHERE {where_clause}"
    ))?;
    let rows = stmt.query_map(params, node_from_row)?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

/// Whole subtree of `node` (itself included) in `lft` order, read from current storage.
pub(in crate::store) fn fetch_subtree(
    conn: &Connection,
    node: &Node,
) -> Result<Vec<Node>, StoreError> {
    query_nodes(
        conn,
        "tree_id = ?1 AND lft >= ?2 AND rght <= ?3 ORDER BY lft",
        params![node.tree_id.get(), node.lft, node.rght],
    )
}

pub(in crate::store) fn fetch_children(
    conn: &Connection,
    parent_id: &str,
) -> Result<Vec<Node>, StoreError> {
    query_nodes(conn, "parent_id = ?1 ORDER BY lft", params![parent_id])
}

/// Current structural columns for a batch of ids, in one query.
pub(in crate::store) fn fetch_shapes(
    conn: &Connection,
    ids: &[&str],
) -> Result<Vec<(String, TreeShape, Option<String>)>, StoreError> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let placeholders = (1..=ids.len())
        .map(|index| format!("?{index}"))
        .collect::<Vec<_>>()
        .join(", ");
    let mut stmt = conn.prepare(&format!(
        "SELECT id, tree_id, lft, rght, level, parent_id FROM nodes WHERE id IN ({placeholders})"
    ))?;
    let rows = stmt.query_map(rusqlite::params_from_iter(ids.iter()), |row| {
        Ok((
            row.get::<_, String>(0)?,
            TreeShape {
                tree_id: TreeId::new(row.get(1)?),
                lft: row.get(2)?,
                rght: row.get(3)?,
                level: row.get(4)?,
            },
            row.get::<_, Option<String>>(5)?,
        ))
    })?;
    let mut out = Vec::with_capacity(ids.len());
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

pub(in crate::store) fn fetch_tree_rows(
    conn: &Connection,
    tree_id: TreeId,
) -> Result<Vec<TreeRow>, StoreError> {
    let mut stmt = conn.prepare_cached(
        "SELECT id, parent_id, lft, rght, level, sort_order FROM nodes WHERE tree_id = ?1 ORDER BY lft",
    )?;
    let rows = stmt.query_map(params![tree_id.get()], |row| {
        Ok(TreeRow {
            id: row.get(0)?,
            parent_id: row.get(1)?,
            lft: row.get(2)?,
            rght: row.get(3)?,
            level: row.get(4)?,
            sort_order: row.get(5)?,
        })
    })?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

pub(in crate::store) fn channel_from_row(row: &Row<'_>) -> rusqlite::Result<Channel> {
    Ok(Channel {
        id: row.get(0)?,
        name: row.get(1)?,
        main_tree_id: row.get(2)?,
    })
}

/// Channel whose main tree lives in `tree_id`, if any.
pub(in crate::store) fn channel_for_tree(
    conn: &Connection,
    tree_id: TreeId,
) -> Result<Option<Channel>, StoreError> {
    Ok(conn
        .prepare_cached(
            "SELECT c.id, c.name, c.main_tree_id FROM channels c \
             JOIN nodes n ON n.id = c.main_tree_id \
             WHERE n.tree_id = ?1 LIMIT 1",
        )?
        .query_row(params![tree_id.get()], channel_from_row)
        .optional()?)
}

pub(in crate::store) fn channel_tree_id(
    conn: &Connection,
    channel_id: &str,
) -> Result<Option<TreeId>, StoreError> {
    Ok(conn
        .prepare_cached(
            "SELECT n.tree_id FROM channels c JOIN nodes n ON n.id = c.main_tree_id WHERE c.id = ?1",
        )?
        .query_row(params![channel_id], |row| row.get::<_, i64>(0))
        .optional()?
        .map(TreeId::new))
}

pub(in crate::store) const FILE_COLUMNS: &str = "id, checksum, file_size, file_format, preset, language_id, original_filename, \
     contentnode_id, assessment_item_id";

pub(in crate::store) fn file_from_row(row: &Row<'_>) -> rusqlite::Result<FileRecord> {
    Ok(FileRecord {
        id: row.get(0)?,
        checksum: row.get(1)?,
        file_size: row.get(2)?,
        file_format: row.get(3)?,
        preset: row.get(4)?,
        language_id: row.get(5)?,
        original_filename: row.get(6)?,
        contentnode_id: row.get(7)?,
        assessment_item_id: row.get(8)?,
    })
}

pub(in crate::store) fn insert_file(conn: &Connection, file: &FileRecord) -> Result<(), StoreError> {
    conn.prepare_cached(&format!(
        "INSERT INTO files({FILE_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"
    ))?
    .execute(params![
        file.id,
        file.checksum,
        file.file_size,
        file.file_format,
        file.preset,
        file.language_id,
        file.original_filename,
        file.contentnode_id,
        file.assessment_item_id,
    ])?;
    Ok(())
}

pub(in crate::store) const ITEM_COLUMNS: &str = "id, contentnode_id, assessment_id, item_type, question, answers, hints, raw_data, \
     source_url, randomize, sort_order";

pub(in crate::store) fn item_from_row(row: &Row<'_>) -> rusqlite::Result<AssessmentItem> {
    Ok(AssessmentItem {
        id: row.get(0)?,
        contentnode_id: row.get(1)?,
        assessment_id: row.get(2)?,
        item_type: row.get(3)?,
        question: row.get(4)?,
        answers: row.get(5)?,
        hints: row.get(6)?,
        raw_data: row.get(7)?,
        source_url: row.get(8)?,
        randomize: row.get(9)?,
        sort_order: row.get(10)?,
    })
}

pub(in crate::store) fn insert_item(
    conn: &Connection,
    item: &AssessmentItem,
) -> Result<(), StoreError> {
    conn.prepare_cached(&format!(
        "INSERT INTO assessment_items({ITEM_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
    ))?
    .execute(params![
        item.id,
        item.contentnode_id,
        item.assessment_id,
        item.item_type,
        item.question,
        item.answers,
        item.hints,
        item.raw_data,
        item.source_url,
        item.randomize,
        item.sort_order,
    ])?;
    Ok(())
}
