#![forbid(unsafe_code)]

use ct_core::{NodeAttributes, Position};
use serde_json::{Map, Value};
use std::collections::BTreeSet;

#[derive(Clone, Debug, PartialEq)]
pub struct NewNode {
    pub attributes: NodeAttributes,
    /// Storage id of the node to position against; `None` creates a new root tree.
    pub target_id: Option<String>,
    pub position: Position,
    pub node_id: Option<String>,
    pub content_id: Option<String>,
    pub complete: bool,
}

impl NewNode {
    pub fn child_of(target_id: &str, attributes: NodeAttributes) -> Self {
        Self {
            attributes,
            target_id: Some(target_id.to_string()),
            position: Position::LastChild,
            node_id: None,
            content_id: None,
            complete: true,
        }
    }

    pub fn root(attributes: NodeAttributes) -> Self {
        Self {
            attributes,
            target_id: None,
            position: Position::LastChild,
            node_id: None,
            content_id: None,
            complete: true,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewFile {
    pub checksum: String,
    pub file_size: i64,
    pub file_format: String,
    pub preset: Option<String>,
    pub language_id: Option<String>,
    pub original_filename: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewAssessmentItem {
    pub assessment_id: String,
    pub item_type: String,
    pub question: String,
    pub answers: String,
    pub hints: String,
    pub raw_data: String,
    pub source_url: Option<String>,
    pub randomize: bool,
    pub sort_order: i64,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct CopyOptions {
    /// `node_id`s whose whole subtrees are left out of the copy.
    pub excluded_descendants: BTreeSet<String>,
    pub can_edit_source_channel: bool,
    /// Falls back to the store's configured batch size.
    pub batch_size: Option<usize>,
    /// Field overrides for the top node of the copy, filtered by the allow-list.
    pub overrides: Option<Map<String, Value>>,
    /// Storage id to use for the top node of the copy.
    pub pk: Option<String>,
}
