pub mod adapters;
pub mod app;
pub mod config;
pub mod core;
pub mod domain;
pub mod findings;
pub mod llm;
pub mod parsing;
pub mod planning;
pub mod report;
pub mod scanning;
pub mod store;
pub mod utils;
pub mod validation;

pub use adapters::LocalStorage;
pub use config::AuditConfig;
pub use core::{AuditCommand, AuditEngine, AuditRun};
pub use store::AuditStore;
pub use utils::error::{AuditError, Result};
