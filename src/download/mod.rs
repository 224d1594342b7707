pub mod error;
pub mod models;
pub mod orchestrator;
pub mod ports;
pub mod registry;
