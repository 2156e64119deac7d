use crate::domain::model::{DedupStatus, Finding, ProjectTask, ValidationStatus};
use crate::domain::ports::Storage;
use crate::utils::error::{AuditError, Result};
use serde_json::Value;
use tokio::sync::Mutex;

const TASKS_FILE: &str = "tasks.json";
const FINDINGS_FILE: &str = "findings.json";

#[derive(Debug, Default)]
struct StoreState {
    tasks: Vec<ProjectTask>,
    findings: Vec<Finding>,
    next_task_id: i64,
    next_finding_id: i64,
}

/// 專案的任務、finding 與規劃產物，存成 `<project_id>/` 下的 JSON 檔。
///
/// 狀態放在記憶體中，每次修改後立即寫回 Storage。
pub struct AuditStore<S: Storage> {
    storage: S,
    project_id: String,
    state: Mutex<StoreState>,
}

impl<S: Storage> AuditStore<S> {
    /// 開啟專案的 store，既有檔案會被載入
    pub async fn open(storage: S, project_id: impl Into<String>) -> Result<Self> {
        let project_id = project_id.into();
        let tasks: Vec<ProjectTask> =
            load_json(&storage, &scoped(&project_id, TASKS_FILE)).await?.unwrap_or_default();
        let findings: Vec<Finding> =
            load_json(&storage, &scoped(&project_id, FINDINGS_FILE)).await?.unwrap_or_default();

        let next_task_id = tasks.iter().map(|t| t.id).max().unwrap_or(0) + 1;
        let next_finding_id = findings.iter().map(|f| f.id).max().unwrap_or(0) + 1;
        tracing::debug!(
            "📂 Store opened for {} ({} tasks, {} findings)",
            project_id,
            tasks.len(),
            findings.len()
        );

        Ok(Self {
            storage,
            project_id,
            state: Mutex::new(StoreState {
                tasks,
                findings,
                next_task_id,
                next_finding_id,
            }),
        })
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    async fn flush_tasks(&self, state: &StoreState) -> Result<()> {
        let data = serde_json::to_vec_pretty(&state.tasks)?;
        self.storage
            .write_file(&scoped(&self.project_id, TASKS_FILE), &data)
            .await
    }

    async fn flush_findings(&self, state: &StoreState) -> Result<()> {
        let data = serde_json::to_vec_pretty(&state.findings)?;
        self.storage
            .write_file(&scoped(&self.project_id, FINDINGS_FILE), &data)
            .await
    }

    // ----- tasks -----

    pub async fn query_tasks(&self) -> Vec<ProjectTask> {
        self.state.lock().await.tasks.clone()
    }

    pub async fn task(&self, task_id: i64) -> Option<ProjectTask> {
        let state = self.state.lock().await;
        state.tasks.iter().find(|t| t.id == task_id).cloned()
    }

    /// 新增任務並配發 id，回傳寫入後的任務
    pub async fn save_tasks(&self, tasks: Vec<ProjectTask>) -> Result<Vec<ProjectTask>> {
        let mut state = self.state.lock().await;
        let mut saved = Vec::with_capacity(tasks.len());
        for mut task in tasks {
            task.id = state.next_task_id;
            state.next_task_id += 1;
            task.project_id = self.project_id.clone();
            saved.push(task.clone());
            state.tasks.push(task);
        }
        self.flush_tasks(&state).await?;
        Ok(saved)
    }

    async fn modify_task<F>(&self, task_id: i64, apply: F) -> Result<()>
    where
        F: FnOnce(&mut ProjectTask),
    {
        let mut state = self.state.lock().await;
        let task = state
            .tasks
            .iter_mut()
            .find(|t| t.id == task_id)
            .ok_or_else(|| AuditError::store(format!("task {} not found", task_id)))?;
        apply(task);
        self.flush_tasks(&state).await
    }

    pub async fn update_result(&self, task_id: i64, result: &str) -> Result<()> {
        self.modify_task(task_id, |t| t.result = result.to_string()).await
    }

    pub async fn update_short_result(&self, task_id: i64, short_result: &str) -> Result<()> {
        self.modify_task(task_id, |t| t.short_result = short_result.to_string())
            .await
    }

    pub async fn update_scan_record(&self, task_id: i64, scan_record: &str) -> Result<()> {
        self.modify_task(task_id, |t| t.scan_record = scan_record.to_string())
            .await
    }

    // ----- findings -----

    pub async fn all_findings(&self) -> Vec<Finding> {
        self.state.lock().await.findings.clone()
    }

    pub async fn add_findings(&self, findings: Vec<Finding>) -> Result<Vec<i64>> {
        let mut state = self.state.lock().await;
        let mut ids = Vec::with_capacity(findings.len());
        for mut finding in findings {
            finding.id = state.next_finding_id;
            state.next_finding_id += 1;
            finding.project_id = self.project_id.clone();
            ids.push(finding.id);
            state.findings.push(finding);
        }
        self.flush_findings(&state).await?;
        Ok(ids)
    }

    /// 刪除任務的所有 finding，回傳刪除筆數
    pub async fn delete_findings_by_task_id(&self, task_id: i64) -> Result<usize> {
        let mut state = self.state.lock().await;
        let before = state.findings.len();
        state.findings.retain(|f| f.task_id != task_id);
        let removed = before - state.findings.len();
        if removed > 0 {
            self.flush_findings(&state).await?;
        }
        Ok(removed)
    }

    pub async fn findings_by_task_id(&self, task_id: i64) -> Vec<Finding> {
        let state = self.state.lock().await;
        state
            .findings
            .iter()
            .filter(|f| f.task_id == task_id)
            .cloned()
            .collect()
    }

    async fn modify_finding<F>(&self, finding_id: i64, apply: F) -> Result<()>
    where
        F: FnOnce(&mut Finding),
    {
        let mut state = self.state.lock().await;
        let finding = state
            .findings
            .iter_mut()
            .find(|f| f.id == finding_id)
            .ok_or_else(|| AuditError::store(format!("finding {} not found", finding_id)))?;
        apply(finding);
        self.flush_findings(&state).await
    }

    pub async fn update_dedup_status(&self, finding_id: i64, status: DedupStatus) -> Result<()> {
        self.modify_finding(finding_id, |f| f.dedup_status = status)
            .await
    }

    /// 批次更新去重狀態，整批只寫回一次；任一 id 不存在則不做任何修改
    pub async fn update_dedup_statuses(&self, finding_ids: &[i64], status: DedupStatus) -> Result<usize> {
        if finding_ids.is_empty() {
            return Ok(0);
        }
        let mut state = self.state.lock().await;
        if let Some(missing) = finding_ids
            .iter()
            .find(|id| !state.findings.iter().any(|f| f.id == **id))
        {
            return Err(AuditError::store(format!("finding {} not found", missing)));
        }
        let mut updated = 0;
        for finding in state.findings.iter_mut().filter(|f| finding_ids.contains(&f.id)) {
            finding.dedup_status = status;
            updated += 1;
        }
        self.flush_findings(&state).await?;
        Ok(updated)
    }

    pub async fn update_validation(
        &self,
        finding_id: i64,
        status: ValidationStatus,
        record: &str,
    ) -> Result<()> {
        self.modify_finding(finding_id, |f| {
            f.validation_status = status;
            f.validation_record = record.to_string();
        })
        .await
    }

    /// 未刪除的 finding，依 id 排序
    pub async fn findings_for_dedup(&self) -> Vec<Finding> {
        let state = self.state.lock().await;
        let mut findings: Vec<Finding> = state
            .findings
            .iter()
            .filter(|f| f.dedup_status != DedupStatus::Delete)
            .cloned()
            .collect();
        findings.sort_by_key(|f| f.id);
        findings
    }

    /// 尚待驗證的 finding，`limit` 為數量上限
    pub async fn findings_for_validation(&self, limit: Option<usize>) -> Vec<Finding> {
        let mut findings: Vec<Finding> = self
            .findings_for_dedup()
            .await
            .into_iter()
            .filter(|f| f.validation_status == ValidationStatus::Pending)
            .collect();
        if let Some(limit) = limit {
            findings.truncate(limit);
        }
        findings
    }

    pub async fn findings_for_export(&self, statuses: &[ValidationStatus]) -> Vec<Finding> {
        self.findings_for_dedup()
            .await
            .into_iter()
            .filter(|f| statuses.contains(&f.validation_status))
            .collect()
    }

    // ----- artifacts -----

    pub async fn write_artifact(&self, relative_path: &str, value: &Value) -> Result<()> {
        let data = serde_json::to_vec_pretty(value)?;
        self.storage
            .write_file(&scoped(&self.project_id, relative_path), &data)
            .await
    }

    pub async fn read_artifact(&self, relative_path: &str) -> Result<Option<Value>> {
        load_json(&self.storage, &scoped(&self.project_id, relative_path)).await
    }

    pub async fn write_bytes(&self, relative_path: &str, data: &[u8]) -> Result<()> {
        self.storage
            .write_file(&scoped(&self.project_id, relative_path), data)
            .await
    }
}

fn scoped(project_id: &str, relative_path: &str) -> String {
    format!("{}/{}", project_id, relative_path.trim_start_matches('/'))
}

async fn load_json<S, T>(storage: &S, path: &str) -> Result<Option<T>>
where
    S: Storage,
    T: serde::de::DeserializeOwned,
{
    if !storage.exists(path).await {
        return Ok(None);
    }
    let data = storage.read_file(path).await?;
    let value = serde_json::from_slice(&data)
        .map_err(|e| AuditError::store(format!("corrupt store file {}: {}", path, e)))?;
    Ok(Some(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct MockStorage {
        files: Arc<Mutex<HashMap<String, Vec<u8>>>>,
        writes: Arc<AtomicUsize>,
    }

    impl MockStorage {
        async fn get_file(&self, path: &str) -> Option<Vec<u8>> {
            let files = self.files.lock().await;
            files.get(path).cloned()
        }
    }

    impl Storage for MockStorage {
        async fn read_file(&self, path: &str) -> Result<Vec<u8>> {
            let files = self.files.lock().await;
            files.get(path).cloned().ok_or_else(|| {
                AuditError::IoError(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("File not found: {}", path),
                ))
            })
        }

        async fn write_file(&self, path: &str, data: &[u8]) -> Result<()> {
            let mut files = self.files.lock().await;
            files.insert(path.to_string(), data.to_vec());
            self.writes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn exists(&self, path: &str) -> bool {
            self.files.lock().await.contains_key(path)
        }
    }

    fn task(name: &str) -> ProjectTask {
        ProjectTask {
            id: 0,
            uuid: uuid::Uuid::new_v4().to_string(),
            project_id: String::new(),
            name: name.to_string(),
            content: "function f() {}".to_string(),
            rule: "[]".to_string(),
            rule_key: "reentrancy".to_string(),
            result: String::new(),
            short_result: String::new(),
            start_line: 1,
            end_line: 1,
            relative_file_path: "Vault.sol".to_string(),
            absolute_file_path: "/p/Vault.sol".to_string(),
            business_flow_code: String::new(),
            business_flow_context: String::new(),
            flow_id: "F1".to_string(),
            group: "g1".to_string(),
            scan_record: String::new(),
        }
    }

    #[tokio::test]
    async fn test_save_tasks_assigns_ids_and_persists() {
        let storage = MockStorage::default();
        let store = AuditStore::open(storage.clone(), "vault").await.unwrap();

        let saved = store.save_tasks(vec![task("a"), task("b")]).await.unwrap();
        assert_eq!(saved.iter().map(|t| t.id).collect::<Vec<_>>(), vec![1, 2]);
        assert!(saved.iter().all(|t| t.project_id == "vault"));

        store.update_result(2, "{\"vulnerabilities\": []}").await.unwrap();
        store.update_short_result(2, "split_done").await.unwrap();
        assert!(storage.get_file("vault/tasks.json").await.is_some());

        let reopened = AuditStore::open(storage, "vault").await.unwrap();
        let tasks = reopened.query_tasks().await;
        assert_eq!(tasks.len(), 2);
        assert!(tasks[1].is_split_done());

        let more = reopened.save_tasks(vec![task("c")]).await.unwrap();
        assert_eq!(more[0].id, 3);
    }

    #[tokio::test]
    async fn test_unknown_task_is_store_error() {
        let store = AuditStore::open(MockStorage::default(), "p").await.unwrap();
        let err = store.update_scan_record(42, "x").await.unwrap_err();
        assert!(matches!(err, AuditError::StoreError { .. }));
    }

    #[tokio::test]
    async fn test_finding_queries_respect_status() {
        let store = AuditStore::open(MockStorage::default(), "p").await.unwrap();
        let saved = store.save_tasks(vec![task("a"), task("b")]).await.unwrap();

        let findings = vec![
            Finding::from_task(&saved[0], "{}".to_string()),
            Finding::from_task(&saved[0], "{}".to_string()),
            Finding::from_task(&saved[1], "{}".to_string()),
        ];
        let ids = store.add_findings(findings).await.unwrap();
        assert_eq!(ids, vec![1, 2, 3]);

        store.update_dedup_status(2, DedupStatus::Delete).await.unwrap();
        store
            .update_validation(3, ValidationStatus::Vulnerability, "{}")
            .await
            .unwrap();

        assert_eq!(store.findings_for_dedup().await.len(), 2);
        let pending = store.findings_for_validation(None).await;
        assert_eq!(pending.iter().map(|f| f.id).collect::<Vec<_>>(), vec![1]);
        assert!(store.findings_for_validation(Some(0)).await.is_empty());

        let exported = store
            .findings_for_export(&[ValidationStatus::Vulnerability])
            .await;
        assert_eq!(exported.len(), 1);
        assert_eq!(exported[0].task_name, "b");

        assert_eq!(store.delete_findings_by_task_id(saved[0].id).await.unwrap(), 2);
        assert!(store.findings_by_task_id(saved[0].id).await.is_empty());
        assert_eq!(store.all_findings().await.len(), 1);
    }

    #[tokio::test]
    async fn test_batch_dedup_update_writes_once() {
        let storage = MockStorage::default();
        let store = AuditStore::open(storage.clone(), "p").await.unwrap();
        let saved = store.save_tasks(vec![task("a")]).await.unwrap();
        let findings = (0..50)
            .map(|_| Finding::from_task(&saved[0], "{}".to_string()))
            .collect();
        let ids = store.add_findings(findings).await.unwrap();

        let before = storage.writes.load(Ordering::SeqCst);
        let updated = store
            .update_dedup_statuses(&ids[1..], DedupStatus::Delete)
            .await
            .unwrap();
        assert_eq!(updated, 49);
        assert_eq!(storage.writes.load(Ordering::SeqCst), before + 1);
        assert_eq!(store.findings_for_dedup().await.len(), 1);

        // 不存在的 id 讓整批失敗，狀態不變
        assert!(store
            .update_dedup_statuses(&[ids[0], 999], DedupStatus::Delete)
            .await
            .is_err());
        assert_eq!(store.findings_for_dedup().await.len(), 1);
        assert_eq!(store.update_dedup_statuses(&[], DedupStatus::Delete).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_artifacts_are_project_scoped() {
        let storage = MockStorage::default();
        let store = AuditStore::open(storage.clone(), "p").await.unwrap();

        assert!(store.read_artifact("planning/plan.json").await.unwrap().is_none());
        store
            .write_artifact("planning/plan.json", &json!({"flows": []}))
            .await
            .unwrap();

        assert!(storage.get_file("p/planning/plan.json").await.is_some());
        assert_eq!(
            store.read_artifact("planning/plan.json").await.unwrap(),
            Some(json!({"flows": []}))
        );
    }

    #[tokio::test]
    async fn test_corrupt_tasks_file_is_reported() {
        let storage = MockStorage::default();
        storage.write_file("p/tasks.json", b"not json").await.unwrap();
        assert!(matches!(
            AuditStore::open(storage, "p").await,
            Err(AuditError::StoreError { .. })
        ));
    }
}
