#![forbid(unsafe_code)]

use super::ids::TreeId;
use super::interval::Interval;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Position {
    FirstChild,
    LastChild,
    Left,
    Right,
}

impl Position {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FirstChild => "first-child",
            Self::LastChild => "last-child",
            Self::Left => "left",
            Self::Right => "right",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "first-child" => Some(Self::FirstChild),
            "last-child" => Some(Self::LastChild),
            "left" => Some(Self::Left),
            "right" => Some(Self::Right),
            _ => None,
        }
    }

    pub fn is_child(self) -> bool {
        matches!(self, Self::FirstChild | Self::LastChild)
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub const KIND_TOPIC: &str = "topic";

/// Fields that always travel from a source node to its copy.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeAttributes {
    pub kind: String,
    pub title: String,
    pub description: String,
    pub language_id: Option<String>,
    pub license_id: Option<String>,
    pub license_description: Option<String>,
    pub thumbnail_encoding: Option<String>,
    pub extra_fields: Value,
    pub copyright_holder: String,
    pub author: String,
    pub aggregator: String,
    pub provider: String,
    pub role_visibility: String,
    pub grade_levels: Option<Value>,
    pub resource_types: Option<Value>,
    pub learning_activities: Option<Value>,
    pub accessibility_labels: Option<Value>,
    pub categories: Option<Value>,
    pub learner_needs: Option<Value>,
    pub suggested_duration: Option<i64>,
    pub freeze_authoring_data: bool,
}

impl Default for NodeAttributes {
    fn default() -> Self {
        Self {
            kind: KIND_TOPIC.to_string(),
            title: String::new(),
            description: String::new(),
            language_id: None,
            license_id: None,
            license_description: None,
            thumbnail_encoding: None,
            extra_fields: Value::Object(Map::new()),
            copyright_holder: String::new(),
            author: String::new(),
            aggregator: String::new(),
            provider: String::new(),
            role_visibility: "learner".to_string(),
            grade_levels: None,
            resource_types: None,
            learning_activities: None,
            accessibility_labels: None,
            categories: None,
            learner_needs: None,
            suggested_duration: None,
            freeze_authoring_data: false,
        }
    }
}

impl NodeAttributes {
    pub fn titled(kind: &str, title: &str) -> Self {
        Self {
            kind: kind.to_string(),
            title: title.to_string(),
            ..Self::default()
        }
    }
}

/// Provenance of a node across generations of copying.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lineage {
    pub original_channel_id: Option<String>,
    pub original_source_node_id: Option<String>,
    pub source_channel_id: Option<String>,
    pub source_node_id: Option<String>,
    pub cloned_source_id: Option<String>,
    pub original_node_id: Option<String>,
}

impl Lineage {
    pub fn has_origin(&self) -> bool {
        self.original_channel_id.is_some() && self.original_source_node_id.is_some()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Node {
    pub id: String,
    pub node_id: String,
    pub content_id: String,
    pub parent_id: Option<String>,
    pub tree_id: TreeId,
    pub lft: i64,
    pub rght: i64,
    pub level: i64,
    pub sort_order: f64,
    pub attributes: NodeAttributes,
    pub lineage: Lineage,
    pub changed: bool,
    pub complete: bool,
    pub published: bool,
}

impl Node {
    pub fn interval(&self) -> Interval {
        Interval::new(self.lft, self.rght)
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    /// Interval width `rght - lft`; the cheap size estimate used by the copy planner.
    pub fn subtree_width(&self) -> i64 {
        self.rght - self.lft
    }

    pub fn descendant_count(&self) -> i64 {
        (self.rght - self.lft - 1) / 2
    }

    pub fn is_ancestor_of(&self, other: &Node) -> bool {
        self.tree_id == other.tree_id && self.interval().strictly_contains(&other.interval())
    }

    pub fn shape(&self) -> TreeShape {
        TreeShape {
            tree_id: self.tree_id,
            lft: self.lft,
            rght: self.rght,
            level: self.level,
        }
    }

    pub fn apply_shape(&mut self, shape: TreeShape) {
        self.tree_id = shape.tree_id;
        self.lft = shape.lft;
        self.rght = shape.rght;
        self.level = shape.level;
    }
}

/// The structural columns guarded by tree locks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TreeShape {
    pub tree_id: TreeId,
    pub lft: i64,
    pub rght: i64,
    pub level: i64,
}

/// Minimal row used for invariant checks and rebuilds.
#[derive(Clone, Debug, PartialEq)]
pub struct TreeRow {
    pub id: String,
    pub parent_id: Option<String>,
    pub lft: i64,
    pub rght: i64,
    pub level: i64,
    pub sort_order: f64,
}
