//! HTTP API handlers for vivo-server

pub mod experiments;
pub mod health;
pub mod sync;

pub use experiments::experiment_routes;
pub use health::health_routes;
pub use sync::sync_routes;
