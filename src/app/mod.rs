pub mod stages;

pub use stages::{DedupStage, ExportStage, ParseStage, PlanStage, ScanStage, ValidateStage};

use crate::core::engine::AuditCommand;
use crate::core::stage::AuditStage;
use crate::domain::ports::Storage;

/// 依命令組出要執行的階段
pub fn stages_for<S: Storage + 'static>(command: AuditCommand) -> Vec<Box<dyn AuditStage<S>>> {
    match command {
        AuditCommand::Run => vec![
            Box::new(ParseStage),
            Box::new(PlanStage),
            Box::new(ScanStage),
            Box::new(DedupStage),
            Box::new(ValidateStage),
            Box::new(ExportStage),
        ],
        AuditCommand::Index => vec![Box::new(ParseStage)],
        AuditCommand::Plan => vec![Box::new(ParseStage), Box::new(PlanStage)],
        AuditCommand::Scan => vec![Box::new(ScanStage)],
        AuditCommand::Dedup => vec![Box::new(DedupStage)],
        AuditCommand::Validate => vec![Box::new(ValidateStage)],
        AuditCommand::Export => vec![Box::new(ExportStage)],
    }
}
