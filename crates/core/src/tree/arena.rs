#![forbid(unsafe_code)]

use super::error::TreeError;
use super::types::TreeRow;
use std::collections::HashMap;

/// Flat pre-order list of records with parent-index links.
///
/// Children always follow their parent and siblings keep insertion order, so nested-set
/// intervals fall out of a single linear pass (`layout`) without recursion.
#[derive(Clone, Debug)]
pub struct Arena<T> {
    entries: Vec<ArenaEntry<T>>,
}

#[derive(Clone, Debug)]
pub struct ArenaEntry<T> {
    pub parent: Option<usize>,
    pub payload: T,
}

/// Position of one arena entry once laid out at `base_lft`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Slot {
    pub lft: i64,
    pub rght: i64,
    pub level: i64,
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<T> Arena<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, parent: Option<usize>, payload: T) -> Result<usize, TreeError> {
        let index = self.entries.len();
        if let Some(parent) = parent.filter(|parent| *parent >= index) {
            return Err(TreeError::ArenaOrder { index, parent });
        }
        self.entries.push(ArenaEntry { parent, payload });
        Ok(index)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&ArenaEntry<T>> {
        self.entries.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ArenaEntry<T>> {
        self.entries.iter()
    }

    pub fn into_entries(self) -> Vec<ArenaEntry<T>> {
        self.entries
    }

    /// Number of `lft/rght` slots the arena consumes when inserted.
    pub fn span(&self) -> i64 {
        self.entries.len() as i64 * 2
    }

    /// Assign nested intervals starting at `base_lft`, with top-level entries at `base_level`.
    pub fn layout(&self, base_lft: i64, base_level: i64) -> Result<Vec<Slot>, TreeError> {
        let mut slots = vec![
            Slot {
                lft: 0,
                rght: 0,
                level: 0,
            };
            self.entries.len()
        ];
        let mut counter = base_lft;
        let mut open: Vec<usize> = Vec::new();

        for (index, entry) in self.entries.iter().enumerate() {
            while let Some(&top) = open.last() {
                if Some(top) == entry.parent {
                    break;
                }
                slots[top].rght = counter;
                counter += 1;
                open.pop();
            }
            if let Some(parent) = entry.parent.filter(|parent| open.last() != Some(parent)) {
                return Err(TreeError::ArenaOrder { index, parent });
            }
            slots[index].lft = counter;
            slots[index].level = match entry.parent {
                Some(parent) => slots[parent].level + 1,
                None => base_level,
            };
            counter += 1;
            open.push(index);
        }
        while let Some(top) = open.pop() {
            slots[top].rght = counter;
            counter += 1;
        }

        Ok(slots)
    }
}

/// Build a pre-order arena of one tree from parent links, ordering siblings by `sort_order`.
///
/// Used to rebuild `lft/rght/level` from scratch. Rows whose parent is missing are treated as
/// roots; a well-formed tree has exactly one.
pub fn arena_from_parent_links(rows: &[TreeRow]) -> Result<Arena<String>, TreeError> {
    let known: HashMap<&str, usize> = rows
        .iter()
        .enumerate()
        .map(|(index, row)| (row.id.as_str(), index))
        .collect();
    let mut children: HashMap<Option<usize>, Vec<usize>> = HashMap::new();
    for (index, row) in rows.iter().enumerate() {
        let parent = row
            .parent_id
            .as_deref()
            .and_then(|parent_id| known.get(parent_id).copied());
        children.entry(parent).or_default().push(index);
    }
    for list in children.values_mut() {
        list.sort_by(|a, b| {
            rows[*a]
                .sort_order
                .total_cmp(&rows[*b].sort_order)
                .then_with(|| rows[*a].lft.cmp(&rows[*b].lft))
        });
    }

    let mut arena = Arena::with_capacity(rows.len());
    let mut pending: Vec<(Option<usize>, usize)> = children
        .get(&None)
        .map(|roots| roots.iter().rev().map(|row| (None, *row)).collect())
        .unwrap_or_default();

    while let Some((arena_parent, row_index)) = pending.pop() {
        let index = arena.push(arena_parent, rows[row_index].id.clone())?;
        if let Some(kids) = children.get(&Some(row_index)) {
            for kid in kids.iter().rev() {
                pending.push((Some(index), *kid));
            }
        }
    }

    if arena.len() != rows.len() {
        return Err(TreeError::Invariant(format!(
            "parent links form a cycle ({} of {} rows reachable)",
            arena.len(),
            rows.len()
        )));
    }

    Ok(arena)
}
