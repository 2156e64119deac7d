use crate::core::stage::{AuditStage, StageContext, StageReport};
use crate::domain::ports::Storage;
use crate::findings::deduplicate;
use crate::planning::PlanningProcessor;
use crate::report::ReportExporter;
use crate::scanning::{Checklist, VulnerabilityScanner};
use crate::utils::error::Result;
use crate::validation::FindingValidator;
use serde_json::json;

pub const INDEX_ARTIFACT: &str = "index/functions.json";

/// 解析專案並寫出函式索引
pub struct ParseStage;

#[async_trait::async_trait]
impl<S: Storage> AuditStage<S> for ParseStage {
    fn name(&self) -> &str {
        "parse"
    }

    async fn run(&self, context: &mut StageContext<S>) -> Result<StageReport> {
        context.ensure_index()?;
        let (index, _) = context.index_and_graph()?;

        let keys: Vec<&str> = index.functions_to_check.iter().map(|f| f.key.as_str()).collect();
        let artifact = json!({
            "root": index.root.display().to_string(),
            "files_parsed": index.files_parsed,
            "functions": index.functions.len(),
            "functions_to_check": keys,
        });
        let details = json!({
            "files_parsed": index.files_parsed,
            "functions": index.functions.len(),
            "functions_to_check": index.functions_to_check.len(),
        });
        context.store.write_artifact(INDEX_ARTIFACT, &artifact).await?;
        Ok(StageReport::new("parse", details))
    }
}

/// 規劃業務流程並建立掃描任務
pub struct PlanStage;

#[async_trait::async_trait]
impl<S: Storage> AuditStage<S> for PlanStage {
    fn name(&self) -> &str {
        "plan"
    }

    async fn run(&self, context: &mut StageContext<S>) -> Result<StageReport> {
        context.ensure_index()?;
        let backend = context.backend()?;
        let checklist = Checklist::load(&context.config.scan)?;
        let config = context.config.clone();
        let store = context.store.clone();
        let (index, graph) = context.index_and_graph()?;

        let processor = PlanningProcessor::new(
            index,
            graph,
            backend.as_ref(),
            store.as_ref(),
            &config.planning,
            &config.scan,
            &checklist,
        );
        let outcome = processor.run().await?;
        Ok(StageReport::new("plan", serde_json::to_value(&outcome)?))
    }
}

pub struct ScanStage;

#[async_trait::async_trait]
impl<S: Storage> AuditStage<S> for ScanStage {
    fn name(&self) -> &str {
        "scan"
    }

    async fn run(&self, context: &mut StageContext<S>) -> Result<StageReport> {
        let backend = context.backend()?;
        let scanner = VulnerabilityScanner::new(
            context.store.as_ref(),
            backend.as_ref(),
            context.project_root.clone(),
            &context.config.scan,
        );
        let summary = scanner.scan_all().await?;
        Ok(StageReport::new("scan", serde_json::to_value(&summary)?))
    }
}

pub struct DedupStage;

#[async_trait::async_trait]
impl<S: Storage> AuditStage<S> for DedupStage {
    fn name(&self) -> &str {
        "dedup"
    }

    async fn run(&self, context: &mut StageContext<S>) -> Result<StageReport> {
        let summary = deduplicate(context.store.as_ref(), &context.config.dedup).await?;
        Ok(StageReport::new("dedup", serde_json::to_value(summary)?))
    }
}

pub struct ValidateStage;

#[async_trait::async_trait]
impl<S: Storage> AuditStage<S> for ValidateStage {
    fn name(&self) -> &str {
        "validate"
    }

    async fn run(&self, context: &mut StageContext<S>) -> Result<StageReport> {
        let backend = context.backend()?;
        let validator = FindingValidator::new(
            context.store.as_ref(),
            backend.as_ref(),
            context.project_root.clone(),
            &context.config.validation,
        );
        let summary = validator.validate_all().await?;
        Ok(StageReport::new("validate", serde_json::to_value(&summary)?))
    }
}

pub struct ExportStage;

#[async_trait::async_trait]
impl<S: Storage> AuditStage<S> for ExportStage {
    fn name(&self) -> &str {
        "export"
    }

    async fn run(&self, context: &mut StageContext<S>) -> Result<StageReport> {
        let summary = ReportExporter::new(context.store.as_ref(), &context.config.output)
            .export()
            .await?;
        Ok(StageReport::new("export", serde_json::to_value(&summary)?))
    }
}
