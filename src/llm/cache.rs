use crate::utils::error::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

pub fn sha256_hex(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k.clone(), canonicalize(v)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CacheEntry {
    key: String,
    model: String,
    response: String,
    created_at: chrono::DateTime<chrono::Utc>,
}

/// 以請求內容雜湊為 key 的回應快取，每筆一個 JSON 檔
#[derive(Debug, Clone)]
pub struct PromptCache {
    dir: PathBuf,
}

impl PromptCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// model 加上請求 JSON（物件 key 已排序）後取 sha256
    pub fn key_for(model: &str, request: &Value) -> String {
        sha256_hex(&format!("{}\n{}", model, canonicalize(request)))
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        let data = tokio::fs::read(self.entry_path(key)).await.ok()?;
        match serde_json::from_slice::<CacheEntry>(&data) {
            Ok(entry) if entry.key == key => Some(entry.response),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!("⚠️ Ignoring corrupt cache entry {}: {}", key, e);
                None
            }
        }
    }

    pub async fn put(&self, key: &str, model: &str, response: &str) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let entry = CacheEntry {
            key: key.to_string(),
            model: model.to_string(),
            response: response.to_string(),
            created_at: chrono::Utc::now(),
        };
        tokio::fs::write(self.entry_path(key), serde_json::to_vec_pretty(&entry)?).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_key_ignores_field_order() {
        let a = json!({"model": "m", "messages": [{"role": "user", "content": "x"}]});
        let b: Value =
            serde_json::from_str(r#"{"messages":[{"content":"x","role":"user"}],"model":"m"}"#)
                .unwrap();
        assert_eq!(PromptCache::key_for("m", &a), PromptCache::key_for("m", &b));
        assert_ne!(PromptCache::key_for("m", &a), PromptCache::key_for("other", &a));
        assert_eq!(PromptCache::key_for("m", &a).len(), 64);
    }

    #[tokio::test]
    async fn test_put_then_get() {
        let dir = TempDir::new().unwrap();
        let cache = PromptCache::new(dir.path().join("cache"));
        let key = PromptCache::key_for("m", &json!({"p": 1}));

        assert!(cache.get(&key).await.is_none());
        cache.put(&key, "m", "{\"flows\": []}").await.unwrap();
        assert_eq!(cache.get(&key).await.as_deref(), Some("{\"flows\": []}"));
    }

    #[tokio::test]
    async fn test_corrupt_entry_is_a_miss() {
        let dir = TempDir::new().unwrap();
        let cache = PromptCache::new(dir.path());
        std::fs::write(dir.path().join("abc.json"), "not json").unwrap();
        assert!(cache.get("abc").await.is_none());
    }

    #[test]
    fn test_sha256_hex() {
        assert_eq!(
            sha256_hex("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
