#![forbid(unsafe_code)]

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum TreeError {
    #[error("tree invariant violated: {0}")]
    Invariant(String),
    #[error("arena entry {index} references parent {parent} that is not an open ancestor")]
    ArenaOrder { index: usize, parent: usize },
    #[error("override for `{key}` is not valid: {message}")]
    InvalidOverride { key: String, message: String },
}
