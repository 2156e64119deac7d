pub mod engine;
pub mod stage;

pub use engine::{AuditCommand, AuditEngine, AuditRun};
pub use stage::{AuditStage, StageContext, StageReport, StageSequence};
