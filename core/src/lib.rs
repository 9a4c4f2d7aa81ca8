//! housing-core: city housing market simulation and calibration.
//!
//! Library entry points:
//!   - `engine::SimEngine` runs a policy scenario over a set of cities.
//!   - `history` aligns and imputes historical series.
//!   - `calibration::calibrate` fits the market adjustment speed.
//!   - `microdata` builds household records for tenure stress.
//!   - `store::ResultStore` persists runs and calibration reports.

pub mod advanced;
pub mod aggregate;
pub mod calibration;
pub mod config;
pub mod engine;
pub mod error;
pub mod history;
pub mod methodology;
pub mod microdata;
pub mod policy;
pub mod rng;
pub mod store;
pub mod stress;
pub mod types;
pub mod warning;
