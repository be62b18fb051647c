#![forbid(unsafe_code)]

use super::error::TreeError;
use super::ids::TreeId;
use super::types::{Node, Position, TreeRow};
use std::collections::HashMap;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Interval {
    pub lft: i64,
    pub rght: i64,
}

impl Interval {
    pub fn new(lft: i64, rght: i64) -> Self {
        Self { lft, rght }
    }

    /// Number of `lft/rght` slots the interval occupies, `2 * nodes`.
    pub fn span(&self) -> i64 {
        self.rght - self.lft + 1
    }

    pub fn strictly_contains(&self, other: &Interval) -> bool {
        self.lft < other.lft && other.rght < self.rght
    }
}

/// Where a node (or a whole subtree) lands relative to a target.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Placement {
    /// Open a gap at `space` inside an existing tree.
    InTree {
        tree_id: TreeId,
        space: i64,
        level: i64,
        parent_id: Option<String>,
    },
    /// Become a new root tree occupying `at`; existing trees from `at` upward shift by one.
    NewTreeAt { at: TreeId },
    /// Become a new root tree with a freshly minted id.
    NewTree,
}

pub fn placement(target: Option<&Node>, position: Position) -> Placement {
    let Some(target) = target else {
        return Placement::NewTree;
    };
    match position {
        Position::FirstChild => Placement::InTree {
            tree_id: target.tree_id,
            space: target.lft + 1,
            level: target.level + 1,
            parent_id: Some(target.id.clone()),
        },
        Position::LastChild => Placement::InTree {
            tree_id: target.tree_id,
            space: target.rght,
            level: target.level + 1,
            parent_id: Some(target.id.clone()),
        },
        Position::Left if target.is_root() => Placement::NewTreeAt { at: target.tree_id },
        Position::Right if target.is_root() => Placement::NewTreeAt {
            at: target.tree_id.next(),
        },
        Position::Left => Placement::InTree {
            tree_id: target.tree_id,
            space: target.lft,
            level: target.level,
            parent_id: target.parent_id.clone(),
        },
        Position::Right => Placement::InTree {
            tree_id: target.tree_id,
            space: target.rght + 1,
            level: target.level,
            parent_id: target.parent_id.clone(),
        },
    }
}

/// Validate the nested-set invariants of one tree.
///
/// Rows may come in any order. Checks `lft < rght`, contiguous numbering starting at 1, that
/// every interval nests inside its parent's, and that `level` equals the depth.
pub fn check_tree(rows: &[TreeRow]) -> Result<(), TreeError> {
    if rows.is_empty() {
        return Ok(());
    }
    let mut sorted: Vec<&TreeRow> = rows.iter().collect();
    sorted.sort_by_key(|row| row.lft);

    let by_id: HashMap<&str, &TreeRow> = rows.iter().map(|row| (row.id.as_str(), row)).collect();
    let mut seen = vec![false; rows.len() * 2 + 1];

    for row in &sorted {
        if row.lft >= row.rght {
            return Err(TreeError::Invariant(format!(
                "node {} has lft={} >= rght={}",
                row.id, row.lft, row.rght
            )));
        }
        for value in [row.lft, row.rght] {
            let slot = usize::try_from(value)
                .ok()
                .filter(|slot| *slot >= 1 && *slot < seen.len())
                .ok_or_else(|| {
                    TreeError::Invariant(format!("node {} has out-of-range value {value}", row.id))
                })?;
            if seen[slot] {
                return Err(TreeError::Invariant(format!(
                    "value {value} used twice (node {})",
                    row.id
                )));
            }
            seen[slot] = true;
        }
        match row.parent_id.as_deref() {
            None => {
                if row.level != 0 {
                    return Err(TreeError::Invariant(format!(
                        "root {} has level {}",
                        row.id, row.level
                    )));
                }
                if row.lft != 1 || row.rght != rows.len() as i64 * 2 {
                    return Err(TreeError::Invariant(format!(
                        "root {} does not span the whole tree",
                        row.id
                    )));
                }
            }
            Some(parent_id) => {
                let parent = by_id.get(parent_id).ok_or_else(|| {
                    TreeError::Invariant(format!("node {} has parent outside the tree", row.id))
                })?;
                let parent_interval = Interval::new(parent.lft, parent.rght);
                if !parent_interval.strictly_contains(&Interval::new(row.lft, row.rght)) {
                    return Err(TreeError::Invariant(format!(
                        "node {} is not nested inside parent {}",
                        row.id, parent.id
                    )));
                }
                if row.level != parent.level + 1 {
                    return Err(TreeError::Invariant(format!(
                        "node {} has level {} under parent level {}",
                        row.id, row.level, parent.level
                    )));
                }
            }
        }
    }

    // Containment must agree with parent links: the innermost enclosing interval is the parent.
    let mut stack: Vec<&TreeRow> = Vec::new();
    for row in &sorted {
        while stack.last().is_some_and(|open| open.rght < row.lft) {
            stack.pop();
        }
        let enclosing = stack.last().map(|open| open.id.as_str());
        if enclosing != row.parent_id.as_deref() {
            return Err(TreeError::Invariant(format!(
                "node {} is enclosed by {:?} but points at {:?}",
                row.id, enclosing, row.parent_id
            )));
        }
        stack.push(row);
    }

    Ok(())
}
