//! Testing infrastructure for tasktrace integration tests.
//!
//! - `TestWorld`: isolated temp directory with report paths
//! - `fixtures`: fake screenshot payloads and dump builders
//! - `assertions`: document-level checks

pub mod assertions;
pub mod fixtures;
pub mod world;

pub use world::TestWorld;
