use crate::domain::model::{Finding, ProjectTask, SPLIT_DONE, SPLIT_FAILED};
use crate::domain::ports::Storage;
use crate::store::AuditStore;
use crate::utils::error::Result;
use serde_json::{json, Map, Value};

const DEFAULT_SCHEMA_VERSION: &str = "1.0";

/// 將單一漏洞正規化為帶 `description` 的物件
fn normalize_vulnerability(item: Value) -> Value {
    match item {
        Value::String(s) => json!({ "description": s }),
        Value::Object(obj) if obj.contains_key("description") => Value::Object(obj),
        Value::Object(obj) => {
            let text = Value::Object(obj).to_string();
            json!({ "description": text })
        }
        other => json!({ "description": other.to_string() }),
    }
}

/// 把多漏洞結果拆成每筆一個 JSON 文件。
///
/// 非物件的 JSON 視為沒有漏洞；無法解析時回傳錯誤訊息。
pub fn split_result(result: &str) -> std::result::Result<Vec<String>, String> {
    if result.trim().is_empty() {
        return Ok(Vec::new());
    }
    let data: Value = serde_json::from_str(result).map_err(|e| e.to_string())?;
    let Value::Object(mut data) = data else {
        return Ok(Vec::new());
    };

    let schema_version = data
        .get("schema_version")
        .cloned()
        .unwrap_or_else(|| Value::String(DEFAULT_SCHEMA_VERSION.to_string()));
    let vulnerabilities = match data.remove("vulnerabilities") {
        Some(Value::Array(items)) => items,
        _ => Vec::new(),
    };

    Ok(vulnerabilities
        .into_iter()
        .map(|item| {
            let mut single = Map::new();
            single.insert("schema_version".to_string(), schema_version.clone());
            single.insert(
                "vulnerabilities".to_string(),
                Value::Array(vec![normalize_vulnerability(item)]),
            );
            Value::Object(single).to_string()
        })
        .collect())
}

/// 拆分任務結果並寫入 findings（先刪後建），成功標記 split_done，失敗標記 split_failed
pub async fn split_and_persist<S: Storage>(store: &AuditStore<S>, task: &ProjectTask) -> Result<usize> {
    if task.is_split_done() {
        return Ok(0);
    }

    let documents = match split_result(&task.result) {
        Ok(documents) => documents,
        Err(e) => {
            tracing::warn!("⚠️ Task {} result could not be split: {}", task.id, e);
            store.update_short_result(task.id, SPLIT_FAILED).await?;
            return Ok(0);
        }
    };

    store.delete_findings_by_task_id(task.id).await?;
    let count = documents.len();
    if count > 0 {
        let findings = documents
            .into_iter()
            .map(|doc| Finding::from_task(task, doc))
            .collect();
        store.add_findings(findings).await?;
    }
    store.update_short_result(task.id, SPLIT_DONE).await?;
    tracing::debug!("✂️ Task {} split into {} findings", task.id, count);
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::LocalStorage;
    use tempfile::TempDir;

    fn parse(doc: &str) -> Value {
        serde_json::from_str(doc).unwrap()
    }

    #[test]
    fn test_split_normalizes_items() {
        let docs = split_result(
            r#"{"schema_version": "2.0", "vulnerabilities": [
                "plain text",
                {"description": "with desc", "severity": "high"},
                {"title": "no desc"},
                42
            ]}"#,
        )
        .unwrap();
        assert_eq!(docs.len(), 4);

        assert_eq!(
            parse(&docs[0]),
            json!({"schema_version": "2.0", "vulnerabilities": [{"description": "plain text"}]})
        );
        assert_eq!(
            parse(&docs[1])["vulnerabilities"][0]["severity"],
            json!("high")
        );
        assert_eq!(
            parse(&docs[2])["vulnerabilities"][0]["description"],
            json!(r#"{"title":"no desc"}"#)
        );
        assert_eq!(parse(&docs[3])["vulnerabilities"][0]["description"], json!("42"));
    }

    #[test]
    fn test_split_edge_cases() {
        let docs = split_result(r#"{"vulnerabilities": ["a"]}"#).unwrap();
        assert_eq!(parse(&docs[0])["schema_version"], json!("1.0"));

        assert!(split_result(r#"{"vulnerabilities": []}"#).unwrap().is_empty());
        assert!(split_result(r#"["not", "an", "object"]"#).unwrap().is_empty());
        assert!(split_result("").unwrap().is_empty());
        assert!(split_result("{broken").is_err());
    }

    fn task(result: &str) -> ProjectTask {
        ProjectTask {
            id: 0,
            uuid: "t-1".to_string(),
            project_id: String::new(),
            name: "Deposit".to_string(),
            content: "function deposit()".to_string(),
            rule: "[]".to_string(),
            rule_key: "access_control".to_string(),
            result: result.to_string(),
            short_result: String::new(),
            start_line: 3,
            end_line: 9,
            relative_file_path: "Vault.sol".to_string(),
            absolute_file_path: "/p/Vault.sol".to_string(),
            business_flow_code: "code".to_string(),
            business_flow_context: String::new(),
            flow_id: "F1".to_string(),
            group: "g".to_string(),
            scan_record: String::new(),
        }
    }

    #[tokio::test]
    async fn test_split_and_persist_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = AuditStore::open(LocalStorage::new(dir.path()), "p").await.unwrap();
        let saved = store
            .save_tasks(vec![task(r#"{"vulnerabilities": ["a", "b"]}"#)])
            .await
            .unwrap();

        assert_eq!(split_and_persist(&store, &saved[0]).await.unwrap(), 2);
        let first = store.task(saved[0].id).await.unwrap();
        assert_eq!(first.short_result, SPLIT_DONE);

        // 未標記 split_done 時重跑不會重複寫入
        store.update_short_result(saved[0].id, "").await.unwrap();
        let again = store.task(saved[0].id).await.unwrap();
        assert_eq!(split_and_persist(&store, &again).await.unwrap(), 2);
        let findings = store.findings_by_task_id(saved[0].id).await;
        assert_eq!(findings.len(), 2);
        assert_eq!(findings[0].rule_key, "access_control");
        assert_eq!(findings[0].task_start_line, 3);

        let done = store.task(saved[0].id).await.unwrap();
        assert_eq!(split_and_persist(&store, &done).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_undecodable_result_marks_split_failed() {
        let dir = TempDir::new().unwrap();
        let store = AuditStore::open(LocalStorage::new(dir.path()), "p").await.unwrap();
        let saved = store.save_tasks(vec![task("not json")]).await.unwrap();

        assert_eq!(split_and_persist(&store, &saved[0]).await.unwrap(), 0);
        assert_eq!(store.task(saved[0].id).await.unwrap().short_result, SPLIT_FAILED);
        assert!(store.all_findings().await.is_empty());
    }
}
