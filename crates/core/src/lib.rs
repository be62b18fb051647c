#![forbid(unsafe_code)]

pub mod progress;
pub mod tree;

pub use progress::{CountingProgress, ProgressTracker};
pub use tree::{
    Interval, Lineage, Node, NodeAttributes, Placement, Position, TreeError, TreeId, TreeRow,
    TreeShape, new_hex_id, placement,
};
