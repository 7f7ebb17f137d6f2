pub mod artifacts;
pub mod config;
pub mod config_resolver;
pub mod db;
pub mod errors;
pub mod memory;
pub mod metrics;
pub mod model;
pub mod registry;
pub mod rest;
pub mod store;
pub mod telemetry;
pub mod validate;
