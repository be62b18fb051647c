#![forbid(unsafe_code)]

use super::error::TreeError;
use super::types::{Node, NodeAttributes};
use serde_json::{Map, Value};

/// Keys a caller with view-only access to the source channel may override on a copy.
pub const ALLOWED_OVERRIDES: &[&str] = &[
    "title",
    "description",
    "language_id",
    "thumbnail_encoding",
    "grade_levels",
    "resource_types",
    "learning_activities",
    "accessibility_labels",
    "categories",
    "learner_needs",
    "suggested_duration",
];

/// Additional keys unlocked when the caller can edit the source channel.
pub const EDIT_ONLY_OVERRIDES: &[&str] = &[
    "license_id",
    "license_description",
    "copyright_holder",
    "author",
    "aggregator",
    "provider",
    "role_visibility",
    "extra_fields",
];

pub fn is_override_allowed(key: &str, can_edit_source_channel: bool) -> bool {
    ALLOWED_OVERRIDES.contains(&key)
        || (can_edit_source_channel && EDIT_ONLY_OVERRIDES.contains(&key))
}

/// Field map that always propagates from `source` to its copy.
pub fn source_attributes(source: &Node) -> Map<String, Value> {
    let mut map = match serde_json::to_value(&source.attributes) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    };
    map.insert(
        "content_id".to_string(),
        Value::String(source.content_id.clone()),
    );
    map
}

/// Outcome of filtering caller overrides through the allow-list.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct OverrideOutcome {
    pub applied: Vec<String>,
    pub rejected: Vec<String>,
}

/// Apply `overrides` to `attributes`, honouring only allow-listed keys.
///
/// Keys outside the allow-list are dropped and reported in `rejected`; the copy keeps the
/// source value for them.
pub fn apply_overrides(
    attributes: &mut NodeAttributes,
    overrides: &Map<String, Value>,
    can_edit_source_channel: bool,
) -> Result<OverrideOutcome, TreeError> {
    let mut outcome = OverrideOutcome::default();
    if overrides.is_empty() {
        return Ok(outcome);
    }

    let mut fields = match serde_json::to_value(&*attributes) {
        Ok(Value::Object(map)) => map,
        Ok(_) => Map::new(),
        Err(err) => {
            return Err(TreeError::InvalidOverride {
                key: "*".to_string(),
                message: err.to_string(),
            });
        }
    };

    for (key, value) in overrides {
        if is_override_allowed(key, can_edit_source_channel) {
            fields.insert(key.clone(), value.clone());
            outcome.applied.push(key.clone());
        } else {
            outcome.rejected.push(key.clone());
        }
    }

    if outcome.applied.is_empty() {
        return Ok(outcome);
    }

    *attributes = serde_json::from_value(Value::Object(fields)).map_err(|err| {
        TreeError::InvalidOverride {
            key: outcome.applied.join(","),
            message: err.to_string(),
        }
    })?;
    Ok(outcome)
}
