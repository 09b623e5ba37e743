//! Database module: view models and SQL repositories.
//!
//! - `model`: query-shaped view models returned by repositories.
//! - `repo`: SQL-only functions that map rows into entities.
//!
//! Callers import from `tube_scanner::db`; the repository API is re-exported here.

pub mod model;
pub mod repo;

pub use repo::*;

pub use model::{DeadLetter, DestinationChannels};
