pub mod call_graph;
pub mod extract;
pub mod filter;
pub mod index;
pub mod source;

pub use call_graph::{CallGraph, CallNode};
pub use filter::ProjectFilter;
pub use index::FunctionIndex;

use crate::domain::model::FunctionInfo;
use crate::utils::error::{AuditError, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// 專案解析結果：`functions` 為全部函式，`functions_to_check` 為覆蓋率基準
#[derive(Debug, Clone, Serialize)]
pub struct ProjectIndex {
    pub root: PathBuf,
    pub files_parsed: usize,
    pub functions: Vec<FunctionInfo>,
    pub functions_to_check: Vec<FunctionInfo>,
}

impl ProjectIndex {
    pub fn function_index(&self) -> FunctionIndex {
        FunctionIndex::new(&self.functions_to_check)
    }

    pub fn call_graph(&self) -> Result<CallGraph> {
        CallGraph::build(&self.functions)
    }

    pub fn get(&self, key: &str) -> Option<&FunctionInfo> {
        self.functions.iter().find(|f| f.key == key)
    }
}

/// 走訪專案目錄並抽出所有函式，結果依路徑排序、可重現
pub fn parse_project(root: &Path, filter: &ProjectFilter) -> Result<ProjectIndex> {
    if !root.is_dir() {
        return Err(AuditError::WorkspaceError {
            path: root.display().to_string(),
            reason: "project path is not a directory".to_string(),
        });
    }

    let mut files = Vec::new();
    let walker = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            !(entry.file_type().is_dir()
                && entry.depth() > 0
                && entry
                    .file_name()
                    .to_str()
                    .map(|name| filter.is_ignored_dir(name))
                    .unwrap_or(false))
        });

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!("⚠️ Skipping unreadable path: {}", e);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(root)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .replace('\\', "/");
        if filter.accepts_file(&relative) {
            files.push((relative, entry.path().to_path_buf()));
        }
    }

    let mut functions = Vec::new();
    let mut files_parsed = 0;
    for (relative, absolute) in &files {
        let source = match std::fs::read_to_string(absolute) {
            Ok(source) => source,
            Err(e) => {
                tracing::warn!("⚠️ Skipping {}: {}", relative, e);
                continue;
            }
        };
        match extract::extract_functions(relative, &absolute.to_string_lossy(), &source) {
            Ok(mut extracted) => {
                tracing::debug!("📄 {}: {} functions", relative, extracted.len());
                functions.append(&mut extracted);
                files_parsed += 1;
            }
            Err(e) => tracing::warn!("⚠️ Failed to parse {}: {}", relative, e),
        }
    }

    let functions_to_check: Vec<FunctionInfo> = functions
        .iter()
        .filter(|f| filter.accepts_function(f))
        .cloned()
        .collect();

    tracing::info!(
        "🔎 Parsed {} files: {} functions, {} in audit scope",
        files_parsed,
        functions.len(),
        functions_to_check.len()
    );

    Ok(ProjectIndex {
        root: root.to_path_buf(),
        files_parsed,
        functions,
        functions_to_check,
    })
}
