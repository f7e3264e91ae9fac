pub mod config;
pub mod lifecycle;
pub mod middleware;
pub mod service;
pub mod store;
pub mod streaming;
pub mod telemetry;
