use crate::config::ProjectConfig;
use crate::domain::model::{ContainerKind, FunctionInfo, Language};
use std::path::Path;

const ALWAYS_IGNORED: [&str; 1] = [".git"];
const SOLIDITY_LIFECYCLE: [&str; 5] = ["constructor", "fallback", "receive", "init", "initialize"];

/// 決定哪些檔案與函式屬於審計範圍
#[derive(Debug, Clone, Default)]
pub struct ProjectFilter {
    pub white_files: Vec<String>,
    pub white_functions: Vec<String>,
    pub ignore_folders: Vec<String>,
}

impl ProjectFilter {
    pub fn from_config(project: &ProjectConfig) -> Self {
        Self {
            white_files: project.white_files.clone(),
            white_functions: project.white_functions.clone(),
            ignore_folders: project.ignore_folders.clone(),
        }
    }

    pub fn is_ignored_dir(&self, dir_name: &str) -> bool {
        ALWAYS_IGNORED.contains(&dir_name) || self.ignore_folders.iter().any(|f| f == dir_name)
    }

    pub fn accepts_file(&self, relative_path: &str) -> bool {
        if Language::from_path(relative_path).is_none() {
            return false;
        }
        if relative_path.to_ascii_lowercase().ends_with(".t.sol") {
            return false;
        }
        if self.white_files.is_empty() {
            return true;
        }

        // 條目可以是檔名、相對路徑或絕對路徑，只要包含檔名即可
        let normalized = relative_path.replace('\\', "/");
        let basename = Path::new(&normalized)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default();
        self.white_files.iter().any(|w| w.contains(basename))
    }

    /// 是否納入覆蓋率的基準集合
    pub fn accepts_function(&self, function: &FunctionInfo) -> bool {
        if function.key.to_ascii_lowercase().contains("test") {
            return false;
        }

        if function.language == Language::Solidity {
            if function.contract_kind == ContainerKind::Interface
                || looks_like_interface_name(&function.contract_name)
            {
                return false;
            }
            let name = function.function_name.as_str();
            if SOLIDITY_LIFECYCLE.contains(&name)
                || name.ends_with("_init")
                || name.ends_with("_init_unchained")
            {
                return false;
            }
        }

        if self.white_functions.is_empty() {
            return true;
        }
        let base = format!("{}.{}", function.contract_name, function.function_name);
        self.white_functions
            .iter()
            .any(|w| *w == function.key || *w == base)
    }
}

/// `IERC20`、`IVault` 這類 I + 大寫開頭的名稱視為介面
fn looks_like_interface_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(
        (chars.next(), chars.next()),
        (Some('I'), Some(second)) if second.is_ascii_uppercase()
    )
}
