pub mod commands;
pub mod config;
pub mod ensure;
pub mod errors;
pub mod k8s;
pub mod loader;
pub mod manifest;
pub mod telemetry;
