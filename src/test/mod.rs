//! Shared fixtures for unit tests.

mod builders;
mod celeste;

pub use builders::BodyBuilder;
pub use celeste::celeste_assembly;
