#![forbid(unsafe_code)]

mod rows;
mod schema;
mod shape;

pub(super) use rows::*;
pub(super) use schema::install_schema;
pub(super) use shape::*;

pub(super) fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|duration| duration.as_millis() as i64)
        .unwrap_or_default()
}
