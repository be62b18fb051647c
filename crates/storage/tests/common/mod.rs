#![forbid(unsafe_code)]
#![allow(dead_code)]

use ct_core::tree::KIND_TOPIC;
use ct_core::{Node, NodeAttributes, Position, TreeId};
use ct_storage::{
    BatchContext, Channel, EngineConfig, NewAssessmentItem, NewFile, NewNode, TreeEvents,
    TreeStore,
};
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

pub fn ctx() -> BatchContext {
    BatchContext::tracked()
}

/// Route engine logs to the test harness; `RUST_LOG=ct_storage=debug` shows lock traffic.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn store() -> TreeStore {
    init_tracing();
    TreeStore::open_in_memory(EngineConfig::default()).expect("open store")
}

pub fn topic(title: &str) -> NodeAttributes {
    NodeAttributes::titled(KIND_TOPIC, title)
}

pub fn resource(title: &str) -> NodeAttributes {
    NodeAttributes::titled("video", title)
}

pub fn add(store: &TreeStore, parent: &Node, attributes: NodeAttributes) -> Node {
    store
        .create_node(&ctx(), NewNode::child_of(&parent.id, attributes))
        .expect("create node")
}

pub fn add_at(store: &TreeStore, target: &Node, position: Position, title: &str) -> Node {
    let mut request = NewNode::child_of(&target.id, topic(title));
    request.position = position;
    store.create_node(&ctx(), request).expect("create node")
}

pub fn channel(store: &TreeStore, name: &str) -> (Channel, Node) {
    store.create_channel(&ctx(), name).expect("create channel")
}

pub fn refresh(store: &TreeStore, node: &Node) -> Node {
    store.get_node(&node.id).expect("refresh node")
}

/// Child titles of `id` in tree order.
pub fn child_titles(store: &TreeStore, id: &str) -> Vec<String> {
    store
        .children(id)
        .expect("children")
        .into_iter()
        .map(|child| child.attributes.title)
        .collect()
}

/// `(level relative to the top, title)` for every node of a subtree, in `lft` order.
pub fn shape_profile(store: &TreeStore, id: &str) -> Vec<(i64, String)> {
    let nodes = store.subtree(id).expect("subtree");
    let base = nodes.first().map(|node| node.level).unwrap_or_default();
    nodes
        .into_iter()
        .map(|node| (node.level - base, node.attributes.title))
        .collect()
}

pub fn assert_all_trees_valid(store: &TreeStore) {
    for tree_id in store.tree_ids().expect("tree ids") {
        store
            .check_tree(tree_id)
            .unwrap_or_else(|err| panic!("tree {tree_id} is broken: {err}"));
    }
}

pub fn file(checksum: &str) -> NewFile {
    NewFile {
        checksum: checksum.to_string(),
        file_size: 1024,
        file_format: "mp4".to_string(),
        preset: Some("high_res_video".to_string()),
        language_id: None,
        original_filename: Some(format!("{checksum}.mp4")),
    }
}

pub fn item(assessment_id: &str) -> NewAssessmentItem {
    NewAssessmentItem {
        assessment_id: assessment_id.to_string(),
        item_type: "single_selection".to_string(),
        question: format!("Question {assessment_id}?"),
        answers: "[]".to_string(),
        hints: "[]".to_string(),
        raw_data: String::new(),
        source_url: None,
        randomize: false,
        sort_order: 1,
    }
}

/// Source channel with a 12-node, 3-level subtree under `Cells`:
///
/// ```text
/// Cells
/// ├── Membranes: m1 m2 m3
/// ├── Organelles: o1 o2 o3
/// └── Division: d1 d2
/// ```
pub struct Fixture {
    pub channel: Channel,
    pub root: Node,
    pub top: Node,
    pub sections: Vec<Node>,
    pub leaves: Vec<Node>,
}

pub fn fixture(store: &TreeStore) -> Fixture {
    let (channel, root) = channel(store, "Biology");
    let top = add(store, &root, topic("Cells"));
    let mut sections = Vec::new();
    let mut leaves = Vec::new();
    for (section, count, prefix) in [("Membranes", 3, "m"), ("Organelles", 3, "o"), ("Division", 2, "d")] {
        let section = add(store, &top, topic(section));
        for index in 1..=count {
            leaves.push(add(store, &section, resource(&format!("{prefix}{index}"))));
        }
        sections.push(section);
    }
    Fixture {
        channel,
        root: refresh(store, &root),
        top: refresh(store, &top),
        sections,
        leaves,
    }
}

#[derive(Default)]
pub struct RecordingEvents {
    pub moved: Mutex<Vec<(String, Option<String>, Position)>>,
    pub reset: Mutex<Vec<(String, TreeId)>>,
}

impl TreeEvents for RecordingEvents {
    fn node_moved(&self, node: &Node, target: Option<&Node>, position: Position) {
        self.moved.lock().expect("events lock").push((
            node.id.clone(),
            target.map(|target| target.id.clone()),
            position,
        ));
    }

    fn reset_modified(&self, root: &Node) {
        self.reset
            .lock()
            .expect("events lock")
            .push((root.id.clone(), root.tree_id));
    }
}
