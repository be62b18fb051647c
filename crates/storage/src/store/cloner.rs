#![forbid(unsafe_code)]

use super::StoreError;
use super::support::{channel_for_tree, channel_tree_id, fetch_node, query_nodes};
use ct_core::tree::{apply_overrides, source_attributes};
use ct_core::{Lineage, Node, TreeId, new_hex_id};
use rusqlite::{Connection, params};
use serde_json::{Map, Value};
use std::collections::HashMap;
use tracing::debug;

#[derive(Clone, Debug, Default)]
pub struct CloneOptions<'o> {
    pub parent_id: Option<String>,
    pub source_channel_id: Option<String>,
    pub can_edit_source_channel: bool,
    /// Storage id for the copy; a fresh one is minted when absent.
    pub pk: Option<String>,
    pub overrides: Option<&'o Map<String, Value>>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct Origin {
    channel_id: Option<String>,
    node_id: String,
}

/// Builds the in-memory copy of a single node. Descendants are not touched.
pub struct NodeCloner<'c> {
    conn: &'c Connection,
    origins: HashMap<String, Origin>,
}

impl<'c> NodeCloner<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self {
            conn,
            origins: HashMap::new(),
        }
    }

    pub fn source_attributes(&self, source: &Node) -> Map<String, Value> {
        source_attributes(source)
    }

    /// Copy of `source` ready for placement. Tree columns are left zeroed for the caller to
    /// assign once the landing spot is known.
    pub fn clone_node(
        &mut self,
        source: &Node,
        options: &CloneOptions<'_>,
    ) -> Result<Node, StoreError> {
        let mut attributes = source.attributes.clone();
        if let Some(overrides) = options.overrides {
            let outcome =
                apply_overrides(&mut attributes, overrides, options.can_edit_source_channel)?;
            if !outcome.rejected.is_empty() {
                debug!(source = %source.id, rejected = ?outcome.rejected, "overrides dropped");
            }
        }
        attributes.freeze_authoring_data =
            !options.can_edit_source_channel || source.attributes.freeze_authoring_data;

        let (original_channel_id, original_source_node_id) = if source.lineage.has_origin() {
            (
                source.lineage.original_channel_id.clone(),
                source.lineage.original_source_node_id.clone(),
            )
        } else {
            let origin = self.origin(source)?;
            (origin.channel_id, Some(origin.node_id))
        };

        Ok(Node {
            id: options.pk.clone().unwrap_or_else(new_hex_id),
            node_id: new_hex_id(),
            content_id: source.content_id.clone(),
            parent_id: options.parent_id.clone(),
            tree_id: TreeId::ALL,
            lft: 0,
            rght: 0,
            level: 0,
            sort_order: source.sort_order,
            attributes,
            lineage: Lineage {
                original_channel_id,
                original_source_node_id,
                source_channel_id: options.source_channel_id.clone(),
                source_node_id: Some(source.node_id.clone()),
                cloned_source_id: Some(source.id.clone()),
                original_node_id: Some(
                    source
                        .lineage
                        .original_node_id
                        .clone()
                        .unwrap_or_else(|| source.id.clone()),
                ),
            },
            changed: true,
            complete: source.complete,
            published: false,
        })
    }

    /// The node `source` was ultimately copied from, or `source` itself.
    pub fn original_node(&self, source: &Node) -> Result<Node, StoreError> {
        if let (Some(channel_id), Some(node_id)) = (
            source.lineage.original_channel_id.as_deref(),
            source.lineage.original_source_node_id.as_deref(),
        ) {
            if let Some(tree_id) = channel_tree_id(self.conn, channel_id)? {
                let found = query_nodes(
                    self.conn,
                    "tree_id = ?1 AND node_id = ?2 LIMIT 1",
                    params![tree_id.get(), node_id],
                )?;
                if let Some(node) = found.into_iter().next() {
                    return Ok(node);
                }
            }
        }

        match source.lineage.original_node_id.as_deref() {
            Some(original_id) if original_id != source.id => {
                match fetch_node(self.conn, original_id) {
                    Ok(node) => Ok(node),
                    Err(StoreError::UnknownId) => Ok(source.clone()),
                    Err(err) => Err(err),
                }
            }
            _ => Ok(source.clone()),
        }
    }

    fn origin(&mut self, source: &Node) -> Result<Origin, StoreError> {
        let key = source
            .lineage
            .original_node_id
            .clone()
            .unwrap_or_else(|| source.id.clone());
        if let Some(origin) = self.origins.get(&key) {
            return Ok(origin.clone());
        }
        let original = self.original_node(source)?;
        let origin = Origin {
            channel_id: channel_for_tree(self.conn, original.tree_id)?.map(|channel| channel.id),
            node_id: original.node_id,
        };
        self.origins.insert(key, origin.clone());
        Ok(origin)
    }
}
