use crate::config::DedupConfig;
use crate::domain::model::{DedupStatus, Finding};
use crate::domain::ports::Storage;
use crate::store::AuditStore;
use crate::utils::error::Result;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DedupSummary {
    pub examined: usize,
    pub kept: usize,
    pub deleted: usize,
}

/// 小寫化後取長度至少 3 的英數字 token
pub fn tokenize(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= 3)
        .map(str::to_lowercase)
        .collect()
}

pub fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.len() + b.len() - intersection;
    intersection as f64 / union as f64
}

/// 回傳應標記為 delete 的 finding id；輸入需依 id 排序
pub fn find_duplicates(findings: &[Finding], threshold: f64) -> Vec<i64> {
    let mut kept: HashMap<(&str, &str), Vec<BTreeSet<String>>> = HashMap::new();
    let mut duplicates = Vec::new();

    for finding in findings {
        let tokens = tokenize(&finding.description());
        let bucket = kept
            .entry((finding.task_name.as_str(), finding.rule_key.as_str()))
            .or_default();
        if bucket.iter().any(|existing| jaccard(existing, &tokens) >= threshold) {
            duplicates.push(finding.id);
        } else {
            bucket.push(tokens);
        }
    }
    duplicates
}

pub async fn deduplicate<S: Storage>(store: &AuditStore<S>, config: &DedupConfig) -> Result<DedupSummary> {
    let findings = store.findings_for_dedup().await;
    let mut summary = DedupSummary {
        examined: findings.len(),
        ..Default::default()
    };
    if !config.enabled {
        tracing::info!("⏭️ Deduplication disabled, keeping {} findings", findings.len());
        summary.kept = findings.len();
        return Ok(summary);
    }

    let duplicates = find_duplicates(&findings, config.similarity_threshold);
    summary.deleted = store
        .update_dedup_statuses(&duplicates, DedupStatus::Delete)
        .await?;
    summary.kept = summary.examined - summary.deleted;

    tracing::info!(
        "🧹 Dedup examined {} findings: kept {}, deleted {}",
        summary.examined,
        summary.kept,
        summary.deleted
    );
    Ok(summary)
}
