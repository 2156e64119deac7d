use crate::domain::model::{ProjectTask, PURE_SCAN_RULE_KEY};

const OUTPUT_CONTRACT: &str = r#"# Output
Output a single JSON object and nothing else:
{
  "schema_version": "1.0",
  "vulnerabilities": [{"description": "string"}]
}
- "vulnerabilities" MUST be an array and MAY be empty.
- Report every distinct high-confidence vulnerability as its own item (at most 5).
- Each description: roughly 100-200 words, naming the function, the exploit path and the impact."#;

const HARD_REQUIREMENTS: &str = "# Hard requirements
- Only report high-confidence issues that cause real harm.
- Do not report intended design, best-practice advice or unexploitable hypotheticals.
- Evidence must come from the code (file, line range and a short excerpt).";

fn context_section(task: &ProjectTask) -> String {
    if task.business_flow_context.trim().is_empty() {
        String::new()
    } else {
        format!(
            "\n\n# Related code (callers and callees, for reference)\n{}",
            task.business_flow_context
        )
    }
}

/// 依 checklist 檢查項組出掃描 prompt
pub fn checklist_prompt(task: &ProjectTask, items: &[String]) -> String {
    let checklist = items
        .iter()
        .enumerate()
        .map(|(i, item)| format!("{}. {}", i + 1, item))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "# Role
You are a senior smart contract security auditor.

# Task
Assess the business flow `{name}` below against the checklist. Be neutral: vulnerabilities may \
or may not exist. You may read the repository in the current workspace for context.

# Checklist ({rule_key})
{checklist}

{requirements}

{output}

# Code
{code}{context}",
        name = task.name,
        rule_key = task.rule_key,
        checklist = checklist,
        requirements = HARD_REQUIREMENTS,
        output = OUTPUT_CONTRACT,
        code = task.business_flow_code,
        context = context_section(task),
    )
}

pub fn pure_prompt(task: &ProjectTask) -> String {
    format!(
        "# Role
You are a senior smart contract security auditor.

# Task
Find exploitable vulnerabilities in the business flow `{name}` below. Consider access control, \
accounting and state consistency, external calls and value transfer. You may read the \
repository in the current workspace for context.

{requirements}

{output}

# Code
{code}{context}",
        name = task.name,
        requirements = HARD_REQUIREMENTS,
        output = OUTPUT_CONTRACT,
        code = task.business_flow_code,
        context = context_section(task),
    )
}

/// 依任務的 rule_key 選擇 prompt；rule 無法解析時視為空清單
pub fn scan_prompt(task: &ProjectTask) -> String {
    if task.rule_key == PURE_SCAN_RULE_KEY {
        return pure_prompt(task);
    }
    let items: Vec<String> = match serde_json::from_str(&task.rule) {
        Ok(items) => items,
        Err(e) => {
            tracing::warn!("⚠️ Task {} has an unreadable rule list: {}", task.id, e);
            Vec::new()
        }
    };
    checklist_prompt(task, &items)
}
