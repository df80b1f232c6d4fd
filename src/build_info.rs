//! Build metadata baked into the binary.

/// Crate version from Cargo.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
