#![forbid(unsafe_code)]

use super::support::{
    FILE_COLUMNS, ITEM_COLUMNS, channel_for_tree, channel_from_row, fetch_children, fetch_node,
    fetch_subtree, fetch_tree_rows, file_from_row, insert_file, insert_item, insert_node,
    item_from_row, make_space, mark_ancestors_changed, query_nodes, sort_order_between_neighbours,
};
use super::{
    AssessmentItem, BatchContext, Channel, ContentTag, FileRecord, LockPlan, NewAssessmentItem,
    NewFile, NewNode, StoreError, TreeStore,
};
use ct_core::tree::check_tree;
use ct_core::{
    Lineage, Node, NodeAttributes, Position, TreeId, TreeRow, new_hex_id, tree::KIND_TOPIC,
};
use rusqlite::{Connection, OptionalExtension, params};
use tracing::debug;

impl TreeStore {
    /// Run a structural body under `plan` inside one transaction window.
    pub(in crate::store) fn structural<T, F>(
        &self,
        ctx: &BatchContext,
        plan: &LockPlan,
        body: F,
    ) -> Result<T, StoreError>
    where
        F: FnMut(&Connection) -> Result<T, StoreError>,
    {
        self.coordinator().with_locks(&self.conn, ctx, plan, body)
    }

    /// Create a channel together with its main tree root.
    pub fn create_channel(&self, ctx: &BatchContext, name: &str) -> Result<(Channel, Node), StoreError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(StoreError::InvalidInput("channel name must not be empty"));
        }
        let channel_id = new_hex_id();

        let root = self.structural(ctx, &LockPlan::default(), |conn| {
            conn.execute(
                "INSERT INTO channels(id, name, main_tree_id, created_at_ms) VALUES (?1, ?2, NULL, ?3)",
                params![channel_id, name, super::support::now_ms()],
            )?;
            let placed = make_space(conn, None, Position::LastChild, 2)?;
            let id = new_hex_id();
            let node_id = new_hex_id();
            let root = Node {
                id: id.clone(),
                node_id: node_id.clone(),
                content_id: new_hex_id(),
                parent_id: None,
                tree_id: placed.tree_id,
                lft: 1,
                rght: 2,
                level: 0,
                sort_order: 1.0,
                attributes: NodeAttributes::titled(KIND_TOPIC, name),
                lineage: Lineage {
                    original_channel_id: Some(channel_id.clone()),
                    original_source_node_id: Some(node_id),
                    cloned_source_id: Some(id.clone()),
                    original_node_id: Some(id),
                    ..Lineage::default()
                },
                changed: true,
                complete: true,
                published: false,
            };
            insert_node(conn, &root)?;
            conn.execute(
                "UPDATE channels SET main_tree_id = ?2 WHERE id = ?1",
                params![channel_id, root.id],
            )?;
            Ok(root)
        })?;

        debug!(channel_id = %channel_id, tree_id = root.tree_id.get(), "channel created");
        Ok((
            Channel {
                id: channel_id,
                name: name.to_string(),
                main_tree_id: Some(root.id.clone()),
            },
            root,
        ))
    }

    pub fn get_channel(&self, channel_id: &str) -> Result<Channel, StoreError> {
        self.conn
            .query_row(
                "SELECT id, name, main_tree_id FROM channels WHERE id = ?1",
                params![channel_id],
                channel_from_row,
            )
            .optional()?
            .ok_or(StoreError::UnknownId)
    }

    pub fn channel_for_tree(&self, tree_id: TreeId) -> Result<Option<Channel>, StoreError> {
        channel_for_tree(&self.conn, tree_id)
    }

    /// Insert a new node at `request.position` relative to `request.target_id`.
    pub fn create_node(&self, ctx: &BatchContext, request: NewNode) -> Result<Node, StoreError> {
        let target_tree = request
            .target_id
            .as_deref()
            .map(|target_id| fetch_node(&self.conn, target_id).map(|target| target.tree_id))
            .transpose()?;
        let plan = LockPlan::new(target_tree, []);

        let node = self.structural(ctx, &plan, |conn| {
            let target = request
                .target_id
                .as_deref()
                .map(|target_id| fetch_node(conn, target_id))
                .transpose()?;
            let placed = make_space(conn, target.as_ref(), request.position, 2)?;
            let channel = channel_for_tree(conn, placed.tree_id)?;

            let id = new_hex_id();
            let node_id = request.node_id.clone().unwrap_or_else(new_hex_id);
            let mut node = Node {
                id: id.clone(),
                node_id: node_id.clone(),
                content_id: request.content_id.clone().unwrap_or_else(new_hex_id),
                parent_id: placed.parent_id,
                tree_id: placed.tree_id,
                lft: placed.lft,
                rght: placed.lft + 1,
                level: placed.level,
                sort_order: 1.0,
                attributes: request.attributes.clone(),
                lineage: Lineage {
                    original_source_node_id: channel.as_ref().map(|_| node_id),
                    original_channel_id: channel.map(|channel| channel.id),
                    cloned_source_id: Some(id.clone()),
                    original_node_id: Some(id),
                    ..Lineage::default()
                },
                changed: true,
                complete: request.complete,
                published: false,
            };
            insert_node(conn, &node)?;
            node.sort_order =
                sort_order_between_neighbours(conn, node.tree_id, node.lft, node.rght)?;
            conn.execute(
                "UPDATE nodes SET sort_order = ?2 WHERE id = ?1",
                params![node.id, node.sort_order],
            )?;
            mark_ancestors_changed(conn, node.tree_id, node.lft, node.rght)?;
            Ok(node)
        })?;

        debug!(id = %node.id, tree_id = node.tree_id.get(), lft = node.lft, "node created");
        Ok(node)
    }

    pub fn get_node(&self, id: &str) -> Result<Node, StoreError> {
        fetch_node(&self.conn, id)
    }

    /// Node with `node_id` inside the channel's main tree.
    pub fn get_node_by_node_id(&self, channel_id: &str, node_id: &str) -> Result<Node, StoreError> {
        let tree_id = super::support::channel_tree_id(&self.conn, channel_id)?
            .ok_or(StoreError::UnknownId)?;
        query_nodes(
            &self.conn,
            "tree_id = ?1 AND node_id = ?2 LIMIT 1",
            params![tree_id.get(), node_id],
        )?
        .into_iter()
        .next()
        .ok_or(StoreError::UnknownId)
    }

    pub fn children(&self, id: &str) -> Result<Vec<Node>, StoreError> {
        fetch_children(&self.conn, id)
    }

    /// The node and all of its descendants, in `lft` order.
    pub fn subtree(&self, id: &str) -> Result<Vec<Node>, StoreError> {
        let node = fetch_node(&self.conn, id)?;
        fetch_subtree(&self.conn, &node)
    }

    /// Ancestors from the root down to the direct parent.
    pub fn ancestors(&self, id: &str) -> Result<Vec<Node>, StoreError> {
        let node = fetch_node(&self.conn, id)?;
        query_nodes(
            &self.conn,
            "tree_id = ?1 AND lft < ?2 AND rght > ?3 ORDER BY lft",
            params![node.tree_id.get(), node.lft, node.rght],
        )
    }

    pub fn root_of(&self, tree_id: TreeId) -> Result<Option<Node>, StoreError> {
        Ok(query_nodes(
            &self.conn,
            "tree_id = ?1 AND parent_id IS NULL LIMIT 1",
            params![tree_id.get()],
        )?
        .into_iter()
        .next())
    }

    pub fn tree_rows(&self, tree_id: TreeId) -> Result<Vec<TreeRow>, StoreError> {
        fetch_tree_rows(&self.conn, tree_id)
    }

    /// Verify the nested-set invariants of one tree against storage.
    pub fn check_tree(&self, tree_id: TreeId) -> Result<(), StoreError> {
        check_tree(&fetch_tree_rows(&self.conn, tree_id)?)?;
        Ok(())
    }

    pub fn tree_ids(&self) -> Result<Vec<TreeId>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT DISTINCT tree_id FROM nodes ORDER BY tree_id")?;
        let rows = stmt.query_map([], |row| row.get::<_, i64>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(TreeId::new(row?));
        }
        Ok(out)
    }

    pub fn node_count(&self) -> Result<i64, StoreError> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM nodes", [], |row| row.get(0))?)
    }

    pub fn add_file(&self, node_id: &str, file: NewFile) -> Result<FileRecord, StoreError> {
        fetch_node(&self.conn, node_id)?;
        let record = file_record(file, Some(node_id.to_string()), None);
        insert_file(&self.conn, &record)?;
        Ok(record)
    }

    pub fn add_assessment_item_file(
        &self,
        item_id: &str,
        file: NewFile,
    ) -> Result<FileRecord, StoreError> {
        let record = file_record(file, None, Some(item_id.to_string()));
        insert_file(&self.conn, &record)?;
        Ok(record)
    }

    pub fn files_for_node(&self, node_id: &str) -> Result<Vec<FileRecord>, StoreError> {
        self.files_where("contentnode_id = ?1", node_id)
    }

    pub fn files_for_assessment_item(&self, item_id: &str) -> Result<Vec<FileRecord>, StoreError> {
        self.files_where("assessment_item_id = ?1", item_id)
    }

    fn files_where(&self, clause: &str, key: &str) -> Result<Vec<FileRecord>, StoreError> {
        let mut stmt = self.conn.prepare_cached(&format!(
            "SELECT {FILE_COLUMNS} FROM files WHERE {clause} ORDER BY id"
        ))?;
        let rows = stmt.query_map(params![key], file_from_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Tag scoped to `channel_id`, or a global tag when `channel_id` is `None`.
    pub fn ensure_tag(
        &self,
        tag_name: &str,
        channel_id: Option<&str>,
    ) -> Result<ContentTag, StoreError> {
        let tag_name = tag_name.trim();
        if tag_name.is_empty() {
            return Err(StoreError::InvalidInput("tag name must not be empty"));
        }
        let existing = self
            .conn
            .query_row(
                "SELECT id FROM content_tags WHERE tag_name = ?1 AND channel_id IS ?2",
                params![tag_name, channel_id],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        let id = match existing {
            Some(id) => id,
            None => {
                let id = new_hex_id();
                self.conn.execute(
                    "INSERT INTO content_tags(id, tag_name, channel_id) VALUES (?1, ?2, ?3)",
                    params![id, tag_name, channel_id],
                )?;
                id
            }
        };
        Ok(ContentTag {
            id,
            tag_name: tag_name.to_string(),
            channel_id: channel_id.map(str::to_string),
        })
    }

    pub fn tag_node(&self, node_id: &str, tag: &ContentTag) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT OR IGNORE INTO node_tags(contentnode_id, contenttag_id) VALUES (?1, ?2)",
            params![node_id, tag.id],
        )?;
        Ok(())
    }

    pub fn tags_for_node(&self, node_id: &str) -> Result<Vec<ContentTag>, StoreError> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT t.id, t.tag_name, t.channel_id FROM node_tags nt \
             JOIN content_tags t ON t.id = nt.contenttag_id \
             WHERE nt.contentnode_id = ?1 ORDER BY t.tag_name",
        )?;
        let rows = stmt.query_map(params![node_id], |row| {
            Ok(ContentTag {
                id: row.get(0)?,
                tag_name: row.get(1)?,
                channel_id: row.get(2)?,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn tag_count(&self, tag_name: &str) -> Result<i64, StoreError> {
        Ok(self.conn.query_row(
            "SELECT COUNT(*) FROM content_tags WHERE tag_name = ?1",
            params![tag_name],
            |row| row.get(0),
        )?)
    }

    pub fn add_assessment_item(
        &self,
        node_id: &str,
        item: NewAssessmentItem,
    ) -> Result<AssessmentItem, StoreError> {
        fetch_node(&self.conn, node_id)?;
        let record = AssessmentItem {
            id: new_hex_id(),
            contentnode_id: node_id.to_string(),
            assessment_id: item.assessment_id,
            item_type: item.item_type,
            question: item.question,
            answers: item.answers,
            hints: item.hints,
            raw_data: item.raw_data,
            source_url: item.source_url,
            randomize: item.randomize,
            sort_order: item.sort_order,
        };
        insert_item(&self.conn, &record)?;
        Ok(record)
    }

    pub fn assessment_items_for_node(
        &self,
        node_id: &str,
    ) -> Result<Vec<AssessmentItem>, StoreError> {
        let mut stmt = self.conn.prepare_cached(&format!(
            "SELECT {ITEM_COLUMNS} FROM assessment_items WHERE contentnode_id = ?1 ORDER BY sort_order, id"
        ))?;
        let rows = stmt.query_map(params![node_id], item_from_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Record that `prerequisite_id` must be completed before `target_node_id`.
    pub fn add_prerequisite(
        &self,
        target_node_id: &str,
        prerequisite_id: &str,
    ) -> Result<(), StoreError> {
        if target_node_id == prerequisite_id {
            return Err(StoreError::InvalidInput(
                "a node cannot be its own prerequisite",
            ));
        }
        self.conn.execute(
            "INSERT OR IGNORE INTO prerequisites(target_node_id, prerequisite_id) VALUES (?1, ?2)",
            params![target_node_id, prerequisite_id],
        )?;
        Ok(())
    }

    pub fn prerequisites_for_node(&self, target_node_id: &str) -> Result<Vec<String>, StoreError> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT prerequisite_id FROM prerequisites WHERE target_node_id = ?1 ORDER BY prerequisite_id",
        )?;
        let rows = stmt.query_map(params![target_node_id], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}

fn file_record(
    file: NewFile,
    contentnode_id: Option<String>,
    assessment_item_id: Option<String>,
) -> FileRecord {
    FileRecord {
        id: new_hex_id(),
        checksum: file.checksum,
        file_size: file.file_size,
        file_format: file.file_format,
        preset: file.preset,
        language_id: file.language_id,
        original_filename: file.original_filename,
        contentnode_id,
        assessment_item_id,
    }
}
