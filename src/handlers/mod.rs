//! HTTP request handlers.

mod health;
pub(crate) mod problem_details;
pub mod v1;

pub use health::{livez, readyz, version};
