#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifies one root tree of the forest. Root trees are ordered by this id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TreeId(i64);

impl TreeId {
    /// Sentinel addressing every tree at once. Never minted for a real tree.
    pub const ALL: TreeId = TreeId(0);

    pub fn new(raw: i64) -> Self {
        Self(raw)
    }

    pub fn get(self) -> i64 {
        self.0
    }

    pub fn is_all(self) -> bool {
        self == Self::ALL
    }

    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }

    pub fn shifted(self, by: i64) -> Self {
        Self(self.0 + by)
    }
}

impl std::fmt::Display for TreeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Fresh 32-char lowercase hex identifier, the format used for every record id.
pub fn new_hex_id() -> String {
    Uuid::new_v4().simple().to_string()
}

pub fn is_hex_id(value: &str) -> bool {
    value.len() == 32 && value.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}
