use crate::domain::model::{BusinessFlow, FlowGroup};

pub const PLANNING_SCHEMA: &str = "business_flow_planning_v1";
pub const REPAIR_SCHEMA: &str = "business_flow_coverage_repair_v1";

/// 函式清單，每行一個 key
pub fn function_catalog<'a>(keys: impl IntoIterator<Item = &'a String>) -> String {
    keys.into_iter()
        .map(|k| format!("- {}", k))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn p0_initial(catalog: Option<&str>) -> String {
    let mut prompt = String::from(
        "You are a business-flow extraction assistant. Read the repository in the current \
workspace and describe its business flows as ordered lists of `Contract.function` references.

Assign stable ids: groups G1, G2, ... and flows F1, F2, ... Later rounds must reuse these ids.

Naming rules:
- Use `Contract.function`; overloaded functions carry their signature: `Contract.function(type1,type2)`.
- If only an interface call is visible, write `Interface.function (interface)`.

Output:
1) One line per group: `Gi name: Contract.f, Contract.g, ...` including external entry points, \
shared internal pipeline functions and key cross-contract dependencies.
2) One line per flow: `Fi name (groups: Gx,...): Contract.f, Other.g, ...` listing every \
function the flow touches, in execution order.
3) A completeness checklist of categories that may still be missing (create/update, pause, \
batch, deposits/withdrawals, signature/merkle/permission checks, time windows, limits, \
pagination, events, upgrades/initialization, cross-chain assumptions).",
    );

    if let Some(catalog) = catalog.filter(|c| !c.trim().is_empty()) {
        prompt.push_str(
            "\n\nAvailable functions (use these names verbatim; never reference functions, \
constants, events or external interfaces outside this list, and never use bare function names):\n",
        );
        prompt.push_str(catalog);
    }
    prompt
}

pub fn p1_incremental(previous_output: &str) -> String {
    format!(
        "Based on the groups and flows you produced in the previous round, output only \
additions and corrections:
- `+ Gi name: Contract.f, ...` for new groups or flows
- `~ Fi name (groups: Gx,...): Contract.f, ...` to correct an existing line

Focus first on the categories most likely to be missing: governance and roles, signature and \
merkle validation, time locks and caps, query and pagination flows, refunds and fee routing, \
events, cross-chain assumptions. Finish with the checklist again, marking what is still open.

==== Previous output ====
{}",
        previous_output
    )
}

pub fn p2_final_json(p0_output: &str, p1_delta: &str) -> String {
    format!(
        "Produce the final, complete list of business flows as JSON so it can be parsed \
by a program.

==== Initial output (P0) ====
{p0}

==== Incremental output (P1) ====
{p1}

Output a single JSON object and nothing else:
{{
  \"schema_version\": \"{schema}\",
  \"groups\": [{{\"group_id\": \"G1\", \"group_name\": \"string\", \"functions\": [\"Contract.func\"]}}],
  \"flows\": [
    {{
      \"flow_id\": \"F1\",
      \"flow_name\": \"string\",
      \"group_ids\": [\"G1\"],
      \"function_refs\": [\"Contract.func\", \"Contract._internal\", \"Other.dep\"]
    }}
  ]
}}

Constraints:
- `flows` must contain every flow, keeping the ids stable.
- `function_refs` are `Contract.function` references in execution order.
- No external interfaces, constants, type hashes, event names or bare function names.",
        p0 = p0_output,
        p1 = if p1_delta.trim().is_empty() { "(none)" } else { p1_delta },
        schema = PLANNING_SCHEMA,
    )
}

/// 既有流程與群組的一行摘要，避免模型重複命名
pub fn flow_overview(flows: &[BusinessFlow], groups: &[FlowGroup]) -> String {
    let mut lines = Vec::with_capacity(flows.len() + groups.len());
    for group in groups {
        lines.push(format!("{} {}", group.group_id, group.group_name));
    }
    for flow in flows {
        lines.push(format!(
            "{} {} (groups: {}; {} functions)",
            flow.flow_id,
            flow.flow_name,
            flow.group_ids.join(","),
            flow.functions.len()
        ));
    }
    if lines.is_empty() {
        "(no flows yet)".to_string()
    } else {
        lines.join("\n")
    }
}

pub fn coverage_repair(
    existing_overview: &str,
    uncovered_list: &str,
    next_group_id: &str,
    next_flow_id: &str,
    target_new_flows: usize,
) -> String {
    format!(
        "You are a business-flow completion assistant. Existing groups and flows are listed \
below, but some parsed functions are not covered by any flow yet. Group those uncovered \
functions by business meaning into NEW flows.

Hard rules:
- Only use names from the uncovered list, verbatim.
- No external interfaces, constants, events or bare function names.
- Do not correct existing flows; only output new ones.
- Prefer fewer, longer flows: about {target} new flows (fewer is fine, more is not).

==== Existing groups and flows (for naming only, not referable) ====
{overview}

==== Uncovered functions (pick only from here) ====
{uncovered}

Output a single JSON object and nothing else:
{{
  \"schema_version\": \"{schema}\",
  \"new_groups\": [{{\"group_id\": \"{group_id}\", \"group_name\": \"string\", \"functions\": [\"Contract.func\"]}}],
  \"new_flows\": [
    {{
      \"flow_id\": \"{flow_id}\",
      \"flow_name\": \"string\",
      \"group_ids\": [\"{group_id}\"],
      \"function_refs\": [\"Contract.func\"]
    }}
  ]
}}
`new_flows` must not be empty; `new_groups` may be empty. When unsure about a function, leave it out.",
        target = target_new_flows,
        overview = existing_overview,
        uncovered = uncovered_list,
        schema = REPAIR_SCHEMA,
        group_id = next_group_id,
        flow_id = next_flow_id,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::FlowOrigin;

    #[test]
    fn test_p0_includes_catalog_only_when_present() {
        let keys = vec!["Vault.deposit".to_string(), "Vault.withdraw".to_string()];
        let catalog = function_catalog(&keys);
        assert_eq!(catalog, "- Vault.deposit\n- Vault.withdraw");

        assert!(p0_initial(Some(&catalog)).contains("- Vault.withdraw"));
        assert!(!p0_initial(Some("  ")).contains("Available functions"));
        assert!(!p0_initial(None).contains("Available functions"));
    }

    #[test]
    fn test_p2_embeds_schema_and_rounds() {
        let prompt = p2_final_json("F1 deposit: Vault.deposit", "");
        assert!(prompt.contains(PLANNING_SCHEMA));
        assert!(prompt.contains("F1 deposit: Vault.deposit"));
        assert!(prompt.contains("(none)"));
    }

    #[test]
    fn test_repair_prompt_carries_next_ids() {
        let flows = vec![BusinessFlow {
            flow_id: "F1".to_string(),
            flow_name: "Deposit".to_string(),
            group_ids: vec!["G1".to_string()],
            function_refs: vec![],
            functions: vec!["Vault.deposit".to_string()],
            unmatched_refs: vec![],
            origin: FlowOrigin::Planning,
        }];
        let overview = flow_overview(&flows, &[]);
        assert_eq!(overview, "F1 Deposit (groups: G1; 1 functions)");

        let prompt = coverage_repair(&overview, "- Vault.sweep", "G2", "F2", 3);
        assert!(prompt.contains(REPAIR_SCHEMA));
        assert!(prompt.contains("\"flow_id\": \"F2\""));
        assert!(prompt.contains("\"group_id\": \"G2\""));
        assert!(prompt.contains("- Vault.sweep"));
        assert_eq!(flow_overview(&[], &[]), "(no flows yet)");
    }
}
