#![allow(unused_imports)]
#![allow(dead_code)]
//! Shared test utilities for integration tests.
//!
//! - `fixtures`: unit, catalog and artifact builders
//! - `mocks`: verification phases that misbehave on purpose
//! - `assertions`: assertion helpers with readable failure messages

pub mod assertions;
pub mod fixtures;
pub mod mocks;

pub use assertions::{assert_error_contains, assert_single_violation};
pub use fixtures::{
    catalog, comparing_unit, equals_unit, hierarchy, malformed_unit, request, type_with, write_artifact,
};
pub use mocks::{PanickingPhase, SlowPhase};
