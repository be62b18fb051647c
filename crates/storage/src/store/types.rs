#![forbid(unsafe_code)]

use ct_core::Node;
use std::collections::HashMap;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Channel {
    pub id: String,
    pub name: String,
    pub main_tree_id: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileRecord {
    pub id: String,
    pub checksum: String,
    pub file_size: i64,
    pub file_format: String,
    pub preset: Option<String>,
    pub language_id: Option<String>,
    pub original_filename: Option<String>,
    pub contentnode_id: Option<String>,
    pub assessment_item_id: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContentTag {
    pub id: String,
    pub tag_name: String,
    pub channel_id: Option<String>,
}

impl ContentTag {
    /// Tags without a channel are shared by every channel.
    pub fn is_global(&self) -> bool {
        self.channel_id.is_none()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AssessmentItem {
    pub id: String,
    pub contentnode_id: String,
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

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReplicationSummary {
    pub files: usize,
    pub tags_created: usize,
    pub tags_reused: usize,
    pub tag_links: usize,
    pub assessment_items: usize,
    pub assessment_files: usize,
}

impl ReplicationSummary {
    pub fn absorb(&mut self, other: &ReplicationSummary) {
        self.files += other.files;
        self.tags_created += other.tags_created;
        self.tags_reused += other.tags_reused;
        self.tag_links += other.tag_links;
        self.assessment_items += other.assessment_items;
        self.assessment_files += other.assessment_files;
    }
}

/// Result of one `copy_node` call.
#[derive(Clone, Debug, Default)]
pub struct CopyReport {
    pub roots: Vec<Node>,
    /// Source storage id → copy storage id, for every node written.
    pub node_map: HashMap<String, String>,
    pub deep_batches: usize,
    pub shallow_nodes: usize,
    pub replicated: ReplicationSummary,
    pub prerequisites: usize,
    pub dangling_prerequisites_removed: usize,
}
