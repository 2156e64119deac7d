pub mod checklist;
pub mod prompts;
pub mod scanner;
pub mod splitter;

pub use checklist::Checklist;
pub use scanner::{ScanSummary, VulnerabilityScanner};
pub use splitter::{split_and_persist, split_result};
