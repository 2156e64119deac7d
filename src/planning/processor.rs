use crate::config::{PlanningConfig, ScanConfig};
use crate::domain::model::{BusinessFlow, FlowGroup, FlowOrigin};
use crate::domain::ports::{LlmBackend, LlmRequest, LlmResponse, Storage};
use crate::llm::cache::sha256_hex;
use crate::parsing::{CallGraph, FunctionIndex, ProjectIndex};
use crate::planning::coverage::{next_id, resolve_flow, resolve_repair_flow, CoverageTracker};
use crate::planning::flow_json::{decode_planning, decode_repair, RawGroup};
use crate::planning::prompts;
use crate::planning::tasks::TaskFactory;
use crate::scanning::Checklist;
use crate::store::AuditStore;
use crate::utils::error::{AuditError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::{Duration, Instant};

pub const PLAN_ARTIFACT: &str = "planning/plan.json";
const PLAN_SCHEMA: &str = "flow_audit_plan_v1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    TargetReached,
    FullyCovered,
    RoundBudgetExhausted,
    NoProgress,
    EmptyIndex,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundKind {
    P0Initial,
    P1Incremental,
    P2FinalJson,
    CoverageRepair,
}

impl RoundKind {
    fn label(&self) -> &'static str {
        match self {
            RoundKind::P0Initial => "p0",
            RoundKind::P1Incremental => "p1",
            RoundKind::P2FinalJson => "p2",
            RoundKind::CoverageRepair => "repair",
        }
    }
}

/// 單輪 LLM 呼叫的完整記錄，寫入 `planning/rounds/`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundArtifact {
    pub round: usize,
    pub kind: RoundKind,
    pub prompt: String,
    pub prompt_sha256: String,
    pub stdout: String,
    pub stderr: String,
    pub returncode: Option<i32>,
    pub backend_error: Option<String>,
    pub duration_ms: u64,
    pub parse_error: Option<String>,
    pub coverage_before: f64,
    pub coverage_after: f64,
    pub newly_covered: Vec<String>,
    pub rejected_refs: Vec<String>,
    pub flows_added: usize,
    pub started_at: DateTime<Utc>,
}

impl RoundArtifact {
    pub fn path(&self) -> String {
        format!("planning/rounds/round_{:02}_{}.json", self.round, self.kind.label())
    }
}

/// 規劃結果，`planning/plan.json` 的內容
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanArtifact {
    pub schema_version: String,
    pub flows: Vec<BusinessFlow>,
    pub groups: Vec<FlowGroup>,
    pub coverage: f64,
    pub covered_count: usize,
    pub total_functions: usize,
    pub uncovered: Vec<String>,
    pub termination: Termination,
    pub rounds: usize,
    pub dropped_flows: usize,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PlanningOutcome {
    Skipped {
        existing_tasks: usize,
    },
    Planned {
        tasks_created: usize,
        coverage: f64,
        termination: Termination,
        rounds: usize,
        reused_plan: bool,
    },
}

struct RoundCall {
    response: Option<LlmResponse>,
    backend_error: Option<String>,
    duration: Duration,
    started_at: DateTime<Utc>,
}

impl RoundCall {
    /// 成功時回傳 stdout，否則回傳失敗原因
    fn output(&self) -> std::result::Result<&str, String> {
        if let Some(error) = &self.backend_error {
            return Err(format!("backend_error: {}", error));
        }
        match &self.response {
            Some(response) if response.is_success() => Ok(response.stdout.as_str()),
            Some(response) => Err(format!("returncode_nonzero: {}", response.returncode)),
            None => Err("no_response".to_string()),
        }
    }
}

struct PlanState {
    flows: Vec<BusinessFlow>,
    groups: Vec<FlowGroup>,
    tracker: CoverageTracker,
    round: usize,
    dropped_flows: usize,
}

impl PlanState {
    fn flow_ids(&self) -> impl Iterator<Item = &str> {
        self.flows.iter().map(|f| f.flow_id.as_str())
    }

    fn group_ids(&self) -> impl Iterator<Item = &str> {
        self.groups.iter().map(|g| g.group_id.as_str())
    }

    /// 空白或重複的 flow id 改用下一個可用的 `F<n>`
    fn push_flow(&mut self, mut flow: BusinessFlow) -> Vec<String> {
        if flow.flow_id.is_empty() || self.flow_ids().any(|id| id == flow.flow_id) {
            flow.flow_id = next_id("F", self.flow_ids());
        }
        if flow.flow_name.is_empty() {
            flow.flow_name = flow.flow_id.clone();
        }
        let newly = self.tracker.add_flow(&flow);
        self.flows.push(flow);
        newly
    }

    fn push_group(&mut self, raw: RawGroup) {
        let group_id = if raw.group_id.is_empty() || self.group_ids().any(|id| id == raw.group_id) {
            next_id("G", self.group_ids())
        } else {
            raw.group_id
        };
        self.groups.push(FlowGroup {
            group_name: if raw.group_name.is_empty() {
                group_id.clone()
            } else {
                raw.group_name
            },
            group_id,
            functions: raw.functions,
        });
    }
}

enum RepairProgress {
    Failed,
    NoNewCoverage,
    Covered(usize),
}

/// 以覆蓋率驅動的多輪規劃：P0/P1/P2 抽出業務流程，之後針對未覆蓋函式做修補輪
pub struct PlanningProcessor<'a, S: Storage> {
    project: &'a ProjectIndex,
    call_graph: &'a CallGraph,
    backend: &'a dyn LlmBackend,
    store: &'a AuditStore<S>,
    planning: &'a PlanningConfig,
    scan: &'a ScanConfig,
    checklist: &'a Checklist,
    function_index: FunctionIndex,
}

impl<'a, S: Storage> PlanningProcessor<'a, S> {
    pub fn new(
        project: &'a ProjectIndex,
        call_graph: &'a CallGraph,
        backend: &'a dyn LlmBackend,
        store: &'a AuditStore<S>,
        planning: &'a PlanningConfig,
        scan: &'a ScanConfig,
        checklist: &'a Checklist,
    ) -> Self {
        Self {
            project,
            call_graph,
            backend,
            store,
            planning,
            scan,
            checklist,
            function_index: project.function_index(),
        }
    }

    /// 規劃並建立任務；已有任務時略過，已有 plan.json 時直接沿用
    pub async fn run(&self) -> Result<PlanningOutcome> {
        let existing = self.store.query_tasks().await;
        if !existing.is_empty() {
            tracing::info!(
                "⏭️ Project {} already has {} tasks, skipping planning",
                self.store.project_id(),
                existing.len()
            );
            return Ok(PlanningOutcome::Skipped {
                existing_tasks: existing.len(),
            });
        }

        let (plan, reused_plan) = match self.load_plan().await {
            Some(plan) => {
                tracing::info!(
                    "♻️ Reusing existing plan ({} flows, coverage {:.1}%)",
                    plan.flows.len(),
                    plan.coverage * 100.0
                );
                (plan, true)
            }
            None => {
                let plan = self.plan_flows().await?;
                self.store
                    .write_artifact(PLAN_ARTIFACT, &serde_json::to_value(&plan)?)
                    .await?;
                (plan, false)
            }
        };

        let tasks = self.build_tasks(&plan);
        let saved = self.store.save_tasks(tasks).await?;
        tracing::info!("✅ Planning created {} tasks", saved.len());

        Ok(PlanningOutcome::Planned {
            tasks_created: saved.len(),
            coverage: plan.coverage,
            termination: plan.termination,
            rounds: plan.rounds,
            reused_plan,
        })
    }

    async fn load_plan(&self) -> Option<PlanArtifact> {
        let value = match self.store.read_artifact(PLAN_ARTIFACT).await {
            Ok(value) => value?,
            Err(e) => {
                tracing::warn!("⚠️ Unable to read {}: {}, planning again", PLAN_ARTIFACT, e);
                return None;
            }
        };
        match serde_json::from_value(value) {
            Ok(plan) => Some(plan),
            Err(e) => {
                tracing::warn!("⚠️ Ignoring malformed {}: {}", PLAN_ARTIFACT, e);
                None
            }
        }
    }

    fn build_tasks(&self, plan: &PlanArtifact) -> Vec<crate::domain::model::ProjectTask> {
        let factory = TaskFactory::new(
            self.project,
            self.call_graph,
            self.scan,
            self.checklist,
            self.planning.max_depth,
        )
        .with_trivial_filter(self.planning.skip_trivial_fallback);
        let mut tasks = factory.tasks_for_flows(&plan.flows);

        if self.planning.fallback_public_functions {
            let uncovered: BTreeSet<String> = plan.uncovered.iter().cloned().collect();
            let fallback = factory.fallback_flows(&uncovered);
            if !fallback.is_empty() {
                tracing::info!(
                    "🪂 {} uncovered entry points get fallback tasks",
                    fallback.len()
                );
                tasks.extend(factory.tasks_for_flows(&fallback));
            }
        }
        tasks
    }

    async fn call(&self, prompt: &str) -> RoundCall {
        let request = LlmRequest::new(prompt, self.project.root.clone());
        let started_at = Utc::now();
        let started = Instant::now();
        let (response, backend_error) = match self.backend.complete(&request).await {
            Ok(response) => (Some(response), None),
            Err(e) => (None, Some(e.to_string())),
        };
        RoundCall {
            response,
            backend_error,
            duration: started.elapsed(),
            started_at,
        }
    }

    fn artifact(
        &self,
        round: usize,
        kind: RoundKind,
        prompt: &str,
        call: &RoundCall,
        coverage: f64,
    ) -> RoundArtifact {
        let response = call.response.clone().unwrap_or_default();
        RoundArtifact {
            round,
            kind,
            prompt: prompt.to_string(),
            prompt_sha256: sha256_hex(prompt),
            stdout: response.stdout,
            stderr: response.stderr,
            returncode: call.response.as_ref().map(|r| r.returncode),
            backend_error: call.backend_error.clone(),
            duration_ms: call.duration.as_millis() as u64,
            parse_error: None,
            coverage_before: coverage,
            coverage_after: coverage,
            newly_covered: Vec::new(),
            rejected_refs: Vec::new(),
            flows_added: 0,
            started_at: call.started_at,
        }
    }

    async fn write_round(&self, artifact: &RoundArtifact) -> Result<()> {
        self.store
            .write_artifact(&artifact.path(), &serde_json::to_value(artifact)?)
            .await
    }

    /// 執行 LLM 規劃輪次，回傳尚未寫入的規劃結果
    pub async fn plan_flows(&self) -> Result<PlanArtifact> {
        let mut state = PlanState {
            flows: Vec::new(),
            groups: Vec::new(),
            tracker: CoverageTracker::new(&self.function_index),
            round: 0,
            dropped_flows: 0,
        };

        if self.function_index.is_empty() {
            tracing::warn!("⚠️ Function index is empty, nothing to plan");
            return Ok(self.finish(state, Termination::EmptyIndex));
        }
        tracing::info!(
            "🗺️ Planning business flows over {} functions (target {:.0}%)",
            self.function_index.len(),
            self.planning.coverage_target * 100.0
        );

        // P0：失敗即中止
        let catalog = self
            .planning
            .include_catalog
            .then(|| prompts::function_catalog(self.function_index.keys()));
        let p0_prompt = prompts::p0_initial(catalog.as_deref());
        let p0 = self.call(&p0_prompt).await;
        state.round += 1;
        self.write_round(&self.artifact(state.round, RoundKind::P0Initial, &p0_prompt, &p0, 0.0))
            .await?;
        let p0_output = p0
            .output()
            .map_err(|reason| AuditError::PlanningError {
                round: "p0".to_string(),
                message: reason,
            })?
            .to_string();

        // P1：失敗時以空增量繼續
        let p1_prompt = prompts::p1_incremental(&p0_output);
        let p1 = self.call(&p1_prompt).await;
        state.round += 1;
        self.write_round(&self.artifact(state.round, RoundKind::P1Incremental, &p1_prompt, &p1, 0.0))
            .await?;
        let delta = match p1.output() {
            Ok(stdout) => stdout.to_string(),
            Err(reason) => {
                tracing::warn!("⚠️ P1 incremental round failed ({}), using empty delta", reason);
                String::new()
            }
        };

        // P2：最終 JSON
        let p2_prompt = prompts::p2_final_json(&p0_output, &delta);
        let p2 = self.call(&p2_prompt).await;
        state.round += 1;
        let mut artifact = self.artifact(state.round, RoundKind::P2FinalJson, &p2_prompt, &p2, 0.0);
        match p2.output().and_then(decode_planning) {
            Ok(doc) => {
                for group in doc.groups {
                    state.push_group(group);
                }
                for raw in &doc.flows {
                    let flow = resolve_flow(&self.function_index, raw, FlowOrigin::Planning);
                    if flow.functions.is_empty() {
                        state.dropped_flows += 1;
                        continue;
                    }
                    artifact.newly_covered.extend(state.push_flow(flow));
                    artifact.flows_added += 1;
                }
            }
            Err(reason) => {
                tracing::warn!("⚠️ P2 produced no usable plan ({}), starting from zero flows", reason);
                artifact.parse_error = Some(reason);
            }
        }
        artifact.coverage_after = state.tracker.ratio();
        self.write_round(&artifact).await?;
        tracing::info!(
            "📊 Initial plan: {} flows, coverage {:.1}% ({}/{})",
            state.flows.len(),
            artifact.coverage_after * 100.0,
            state.tracker.covered_count(),
            state.tracker.total()
        );

        let mut repair_rounds = 0;
        let termination = loop {
            if state.tracker.is_fully_covered() {
                break Termination::FullyCovered;
            }
            if state.tracker.ratio() >= self.planning.coverage_target {
                break Termination::TargetReached;
            }
            if repair_rounds >= self.planning.max_repair_rounds {
                break Termination::RoundBudgetExhausted;
            }
            repair_rounds += 1;
            match self.repair_round(&mut state).await? {
                RepairProgress::Failed => continue,
                RepairProgress::NoNewCoverage => break Termination::NoProgress,
                RepairProgress::Covered(count) => {
                    tracing::info!(
                        "🩹 Repair round {} covered {} more functions ({:.1}%)",
                        repair_rounds,
                        count,
                        state.tracker.ratio() * 100.0
                    );
                }
            }
        };

        Ok(self.finish(state, termination))
    }

    async fn repair_round(&self, state: &mut PlanState) -> Result<RepairProgress> {
        let uncovered = state.tracker.uncovered();
        let listed = prompts::function_catalog(
            uncovered.iter().take(self.planning.max_uncovered_in_prompt.max(1)),
        );
        let prompt = prompts::coverage_repair(
            &prompts::flow_overview(&state.flows, &state.groups),
            &listed,
            &next_id("G", state.group_ids()),
            &next_id("F", state.flow_ids()),
            self.planning.target_new_flows,
        );

        let call = self.call(&prompt).await;
        state.round += 1;
        let mut artifact = self.artifact(
            state.round,
            RoundKind::CoverageRepair,
            &prompt,
            &call,
            state.tracker.ratio(),
        );

        let progress = match call.output().and_then(decode_repair) {
            Err(reason) => {
                tracing::warn!("⚠️ Repair round {} failed: {}", state.round, reason);
                artifact.parse_error = Some(reason);
                RepairProgress::Failed
            }
            Ok(doc) => {
                for group in doc.new_groups {
                    state.push_group(group);
                }
                for raw in &doc.new_flows {
                    let (flow, rejected) =
                        resolve_repair_flow(&self.function_index, raw, &uncovered);
                    artifact.rejected_refs.extend(rejected);
                    if flow.functions.is_empty() {
                        state.dropped_flows += 1;
                        continue;
                    }
                    artifact.newly_covered.extend(state.push_flow(flow));
                    artifact.flows_added += 1;
                }
                if artifact.newly_covered.is_empty() {
                    RepairProgress::NoNewCoverage
                } else {
                    RepairProgress::Covered(artifact.newly_covered.len())
                }
            }
        };

        artifact.coverage_after = state.tracker.ratio();
        self.write_round(&artifact).await?;
        Ok(progress)
    }

    fn finish(&self, state: PlanState, termination: Termination) -> PlanArtifact {
        let coverage = state.tracker.ratio();
        tracing::info!(
            "🏁 Planning finished: {:?}, {} flows, coverage {:.1}%, {} rounds",
            termination,
            state.flows.len(),
            coverage * 100.0,
            state.round
        );
        PlanArtifact {
            schema_version: PLAN_SCHEMA.to_string(),
            coverage,
            covered_count: state.tracker.covered_count(),
            total_functions: state.tracker.total(),
            uncovered: state.tracker.uncovered().into_iter().collect(),
            termination,
            rounds: state.round,
            dropped_flows: state.dropped_flows,
            created_at: Utc::now(),
            flows: state.flows,
            groups: state.groups,
        }
    }
}
