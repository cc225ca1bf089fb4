// Library exports for integration testing and binary
pub mod config;
pub mod error;
pub mod matrix;
pub mod orchestrator;
pub mod signal;
pub mod suite;
