//! # Vivo Common Library
//!
//! Shared code for the Vivo reconciliation server and field client:
//! - Study entities (experiments, subjects, observations, samples)
//! - Derived clinical field rules (study day, weight change, CSS)
//! - Humane endpoint evaluation
//! - Kaplan-Meier survival estimation
//! - Sync wire protocol (push/pull)
//! - Configuration loading and SQLite pool helpers

pub mod config;
#[cfg(feature = "sqlx")]
pub mod db;
pub mod derived;
pub mod endpoint;
pub mod error;
pub mod logging;
pub mod models;
pub mod survival;
pub mod time;
pub mod wire;

pub use derived::{compute_derived_fields, DerivationConfig, DerivedFields, RawObservation};
pub use error::{Error, Result};
pub use survival::{kaplan_meier, SurvivalInput, SurvivalPoint};
