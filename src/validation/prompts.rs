use crate::domain::model::ValidationStatus;

pub const VALIDATION_SCHEMA: &str = "validation_codex_v1";

/// 驗證單一 finding 的 prompt，要求只輸出 JSON
pub fn validation_prompt(finding_json: &str, rule_key: &str, hint_file: &str, hint_function: &str) -> String {
    let statuses = ValidationStatus::ALL
        .iter()
        .filter(|s| **s != ValidationStatus::Error)
        .map(|s| s.as_str())
        .collect::<Vec<_>>()
        .join("|");
    format!(
        r#"You are a smart contract security reviewer validating a candidate finding.

Workspace rules:
- Only read files under the current workspace root; never assume code, configuration or deployment outside it.
- Read-only commands only (rg, grep, ls, find, cat, sed -n). Do not write files.

Workflow (at least 3 and at most 10 lookups before concluding):
1) Locate the code named by the finding (keywords, function, file hint).
2) Follow the call chain and the key branches, callers, callees and state variables.
3) Check the preconditions: permissions, attacker-controlled input, external calls, update order, boundaries.
4) If README, docs, specs or NatSpec explain the behaviour, consult them before deciding.

Question: does this vulnerability exist, is it a false positive or intended design, how severe is it and how hard is it to exploit?

Output one JSON object only, matching:
{{
  "schema_version": "{schema}",
  "status": "{statuses}",
  "confidence": "high|medium|low",
  "exists": true,
  "impact": "high|medium|low|unknown",
  "exploit_difficulty": "easy|medium|hard|unknown",
  "reason": "2-5 sentences citing the evidence",
  "evidence": [{{"file": "relative path", "locator": "function or lines", "snippet": "short excerpt", "why": "string"}}],
  "mitigation": "string",
  "unknowns": ["what is missing when not_sure"]
}}

Status guide:
- intended_design: documented or explicit behaviour with no harmful abuse path.
- false_positive: the finding contradicts the code.
- vulnerability: realistic exploit path with concrete damage.
- vuln_high_cost: real but needs privileged access or expensive conditions.
- vuln_low_impact: real but with small, contained impact.
- not_sure: evidence in the workspace is insufficient; list the unknowns.

==== Candidate finding ====
{finding}

==== Hints (may be empty) ====
rule_key: {rule_key}
hint_file: {hint_file}
hint_function: {hint_function}"#,
        schema = VALIDATION_SCHEMA,
        statuses = statuses,
        finding = finding_json.trim(),
        rule_key = rule_key.trim(),
        hint_file = hint_file.trim(),
        hint_function = hint_function.trim(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_lists_statuses_and_hints() {
        let prompt = validation_prompt(r#"{"vulnerabilities": []}"#, "access_control", " Vault.sol ", "Admin");
        assert!(prompt.contains("pending|intended_design|false_positive|vulnerability|vuln_high_cost|vuln_low_impact|not_sure\""));
        assert!(prompt.contains(VALIDATION_SCHEMA));
        assert!(prompt.contains("hint_file: Vault.sol\n"));
        assert!(prompt.ends_with("hint_function: Admin"));
    }
}
