pub mod complexity;
pub mod coverage;
pub mod flow_json;
pub mod processor;
pub mod prompts;
pub mod tasks;

pub use coverage::CoverageTracker;
pub use processor::{
    PlanArtifact, PlanningOutcome, PlanningProcessor, RoundArtifact, RoundKind, Termination,
    PLAN_ARTIFACT,
};
pub use tasks::TaskFactory;
