pub mod dedup;

pub use dedup::{deduplicate, DedupSummary};
