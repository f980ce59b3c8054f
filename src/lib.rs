//! Core library surface for the equipment manager TUI.
//!
//! The `bin` target only wires these pieces together, so everything a script
//! or test needs to drive the inventory without a terminal is re-exported here.
pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod models;
pub mod ui;

/// Persistence entry points used at startup.
pub use db::{ensure_schema, fetch_holding_counts, fetch_students};

pub use config::AppConfig;
pub use error::InventoryError;
pub use logging::init_logging;

/// The interactive application entry point and state container.
pub use ui::{run_app, App};
