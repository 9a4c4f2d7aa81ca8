//! Shared primitive types used across the entire engine.

/// A calendar year (e.g. 2024).
pub type Year = i32;

/// A stable city identifier, e.g. "syd".
pub type CityId = String;

/// The canonical run identifier.
pub type RunId = String;
