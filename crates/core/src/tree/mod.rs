#![forbid(unsafe_code)]

mod arena;
mod error;
mod ids;
mod interval;
mod overrides;
mod types;

pub use arena::*;
pub use error::*;
pub use ids::*;
pub use interval::*;
pub use overrides::*;
pub use types::*;
