#![forbid(unsafe_code)]

use ct_core::{Node, Position};

/// Observers notified after structural changes commit.
pub trait TreeEvents: Send + Sync {
    /// A node was moved to `position` relative to `target` (`None` means it became a root).
    fn node_moved(&self, node: &Node, target: Option<&Node>, position: Position) {
        let _ = (node, target, position);
    }

    /// Aggregates cached for the tree rooted at `root` are stale.
    fn reset_modified(&self, root: &Node) {
        let _ = root;
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoopEvents;

impl TreeEvents for NoopEvents {}
