use crate::config::OutputConfig;
use crate::domain::model::{Finding, ValidationStatus};
use crate::domain::ports::Storage;
use crate::planning::PLAN_ARTIFACT;
use crate::store::AuditStore;
use crate::utils::error::{AuditError, Result};
use serde::Serialize;
use serde_json::{json, Value};
use std::io::Write;
use zip::write::{FileOptions, ZipWriter};

pub const REPORT_MD: &str = "report/report.md";
pub const FINDINGS_CSV: &str = "report/findings.csv";
pub const FINDINGS_JSON: &str = "report/findings.json";
pub const COVERAGE_JSON: &str = "report/coverage.json";
pub const REPORT_ZIP: &str = "audit_report.zip";

#[derive(Debug, Serialize)]
struct CsvRow<'a> {
    id: i64,
    validation_status: &'a str,
    rule_key: &'a str,
    task_name: &'a str,
    file: &'a str,
    start_line: usize,
    end_line: usize,
    description: String,
    reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExportSummary {
    pub exported: usize,
    pub files: Vec<String>,
    pub zip: Option<String>,
}

pub fn parse_statuses(raw: &[String]) -> Result<Vec<ValidationStatus>> {
    raw.iter()
        .map(|s| {
            s.parse::<ValidationStatus>()
                .map_err(|reason| AuditError::InvalidConfigValueError {
                    field: "output.export_statuses".to_string(),
                    value: s.clone(),
                    reason,
                })
        })
        .collect()
}

/// validation_record 中模型給出的理由
fn verdict_reason(finding: &Finding) -> String {
    serde_json::from_str::<Value>(&finding.validation_record)
        .ok()
        .and_then(|record| {
            record
                .get("parsed")
                .and_then(|p| p.get("reason"))
                .and_then(Value::as_str)
                .map(str::to_string)
                .or_else(|| record.get("error").and_then(Value::as_str).map(str::to_string))
        })
        .unwrap_or_default()
}

/// 從 plan.json 摘出覆蓋率資訊
pub fn coverage_summary(plan: Option<&Value>) -> Value {
    let Some(plan) = plan else {
        return json!({ "planned": false });
    };
    json!({
        "planned": true,
        "coverage": plan.get("coverage"),
        "covered_count": plan.get("covered_count"),
        "total_functions": plan.get("total_functions"),
        "flows": plan.get("flows").and_then(Value::as_array).map(Vec::len).unwrap_or(0),
        "termination": plan.get("termination"),
        "rounds": plan.get("rounds"),
        "uncovered": plan.get("uncovered"),
    })
}

pub fn render_csv(findings: &[Finding]) -> Result<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for finding in findings {
        writer.serialize(CsvRow {
            id: finding.id,
            validation_status: finding.validation_status.as_str(),
            rule_key: &finding.rule_key,
            task_name: &finding.task_name,
            file: &finding.task_relative_file_path,
            start_line: finding.task_start_line,
            end_line: finding.task_end_line,
            description: finding.description(),
            reason: verdict_reason(finding),
        })?;
    }
    let data = writer
        .into_inner()
        .map_err(|e| AuditError::store(format!("csv buffer: {}", e)))?;
    Ok(String::from_utf8_lossy(&data).into_owned())
}

pub fn render_markdown(project_id: &str, findings: &[Finding], coverage: &Value) -> String {
    let mut out = format!("# Audit report: {}\n\n", project_id);
    out.push_str("## Overview\n\n");
    out.push_str(&format!("- Findings exported: {}\n", findings.len()));
    if coverage["planned"] == json!(true) {
        let ratio = coverage["coverage"].as_f64().unwrap_or(0.0);
        out.push_str(&format!(
            "- Flow coverage: {:.1}% ({}/{} functions, {} flows)\n",
            ratio * 100.0,
            coverage["covered_count"],
            coverage["total_functions"],
            coverage["flows"]
        ));
        if let Some(termination) = coverage["termination"].as_str() {
            out.push_str(&format!("- Planning stopped: {}\n", termination));
        }
    }

    for (i, finding) in findings.iter().enumerate() {
        out.push_str(&format!("\n## {}. {} ({})\n\n", i + 1, finding.task_name, finding.rule_key));
        out.push_str(&format!(
            "- Location: `{}` lines {}-{}\n",
            finding.task_relative_file_path, finding.task_start_line, finding.task_end_line
        ));
        out.push_str(&format!("- Validation: {}\n", finding.validation_status));
        let reason = verdict_reason(finding);
        if !reason.is_empty() {
            out.push_str(&format!("- Reason: {}\n", reason));
        }
        out.push_str(&format!("\n{}\n", finding.description()));
        if !finding.task_business_flow_code.trim().is_empty() {
            out.push_str(&format!(
                "\n<details><summary>Flow code</summary>\n\n```\n{}\n```\n\n</details>\n",
                finding.task_business_flow_code
            ));
        }
    }
    out
}

fn bundle(entries: &[(&str, &[u8])]) -> Result<Vec<u8>> {
    let mut zip = ZipWriter::new(std::io::Cursor::new(Vec::new()));
    for (name, data) in entries {
        let file_name = name.rsplit('/').next().unwrap_or(*name);
        zip.start_file::<_, ()>(file_name, FileOptions::default())?;
        zip.write_all(data)?;
    }
    Ok(zip.finish()?.into_inner())
}

/// 匯出報告：Markdown、CSV、JSON、覆蓋率摘要，並視設定打包為 zip
pub struct ReportExporter<'a, S: Storage> {
    store: &'a AuditStore<S>,
    output: &'a OutputConfig,
}

impl<'a, S: Storage> ReportExporter<'a, S> {
    pub fn new(store: &'a AuditStore<S>, output: &'a OutputConfig) -> Self {
        Self { store, output }
    }

    pub async fn export(&self) -> Result<ExportSummary> {
        let statuses = parse_statuses(&self.output.export_statuses)?;
        let findings = self.store.findings_for_export(&statuses).await;
        let plan = match self.store.read_artifact(PLAN_ARTIFACT).await {
            Ok(plan) => plan,
            Err(e) => {
                tracing::warn!("⚠️ Plan artifact unreadable, coverage omitted: {}", e);
                None
            }
        };
        let coverage = coverage_summary(plan.as_ref());

        let markdown = render_markdown(self.store.project_id(), &findings, &coverage);
        let csv = render_csv(&findings)?;
        let findings_json = serde_json::to_vec_pretty(&findings)?;
        let coverage_json = serde_json::to_vec_pretty(&coverage)?;

        let entries: [(&str, &[u8]); 4] = [
            (REPORT_MD, markdown.as_bytes()),
            (FINDINGS_CSV, csv.as_bytes()),
            (FINDINGS_JSON, findings_json.as_slice()),
            (COVERAGE_JSON, coverage_json.as_slice()),
        ];
        for (path, data) in &entries {
            self.store.write_bytes(path, data).await?;
        }

        let zip = if self.output.zip {
            let data = bundle(&entries)?;
            tracing::debug!("📦 Writing {} ({} bytes)", REPORT_ZIP, data.len());
            self.store.write_bytes(REPORT_ZIP, &data).await?;
            Some(REPORT_ZIP.to_string())
        } else {
            None
        };

        tracing::info!(
            "📝 Exported {} findings (statuses: {})",
            findings.len(),
            self.output.export_statuses.join(",")
        );
        Ok(ExportSummary {
            exported: findings.len(),
            files: entries.iter().map(|(p, _)| p.to_string()).collect(),
            zip,
        })
    }
}
