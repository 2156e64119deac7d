use crate::domain::model::FunctionInfo;
use std::collections::{BTreeSet, HashMap};

/// 覆蓋率的基準 key 集合，以及模型輸出的名稱對應規則
#[derive(Debug, Clone, Default)]
pub struct FunctionIndex {
    keys: BTreeSet<String>,
    by_base: HashMap<String, Vec<String>>,
    by_name: HashMap<String, Vec<String>>,
}

impl FunctionIndex {
    pub fn new<'a>(functions: impl IntoIterator<Item = &'a FunctionInfo>) -> Self {
        let mut index = Self::default();
        for f in functions {
            index.keys.insert(f.key.clone());
            index
                .by_base
                .entry(format!("{}.{}", f.contract_name, f.function_name))
                .or_default()
                .push(f.key.clone());
            index
                .by_name
                .entry(f.function_name.clone())
                .or_default()
                .push(f.key.clone());
        }
        index
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.keys.contains(key)
    }

    pub fn keys(&self) -> &BTreeSet<String> {
        &self.keys
    }

    /// 將模型輸出的函式參照對應到索引中的 key。
    ///
    /// 依序嘗試：完全相同、去除 `(interface)` 與路徑前綴、去除參數簽名
    /// （對應到所有多載）、最後是全專案唯一的裸函式名。對不到時回傳空陣列。
    pub fn resolve(&self, raw: &str) -> Vec<String> {
        let cleaned = clean_reference(raw);
        if cleaned.is_empty() {
            return Vec::new();
        }
        if self.keys.contains(&cleaned) {
            return vec![cleaned];
        }

        let base = match cleaned.find('(') {
            Some(pos) => cleaned[..pos].trim().to_string(),
            None => cleaned.clone(),
        };
        if let Some(keys) = self.by_base.get(&base) {
            return keys.clone();
        }

        if !base.contains('.') {
            if let Some(keys) = self.by_name.get(&base) {
                if keys.len() == 1 {
                    return keys.clone();
                }
            }
        }

        Vec::new()
    }
}

fn clean_reference(raw: &str) -> String {
    let mut s = raw
        .trim()
        .trim_matches(|c| c == '`' || c == '"' || c == '\'')
        .trim()
        .to_string();

    for suffix in ["(interface)", "(Interface)"] {
        if let Some(stripped) = s.strip_suffix(suffix) {
            s = stripped.trim().to_string();
        }
    }

    s = s.replace("::", ".");

    // "src/Vault.sol:Vault.deposit" → "Vault.deposit"
    if let Some(pos) = s.rfind(':') {
        s = s[pos + 1..].trim().to_string();
    }

    s = s.split_whitespace().collect::<Vec<_>>().join("");

    // "0x1.coin.transfer" → "coin.transfer"
    let (head, tail) = match s.find('(') {
        Some(pos) => (s[..pos].to_string(), s[pos..].to_string()),
        None => (s.clone(), String::new()),
    };
    let segments: Vec<&str> = head.split('.').collect();
    if segments.len() > 2 {
        s = format!("{}{}", segments[segments.len() - 2..].join("."), tail);
    }
    s
}
