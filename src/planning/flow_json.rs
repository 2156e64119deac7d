use crate::llm::json_extract::extract_json_object;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// 模型輸出的原始流程，欄位缺漏時給空值
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RawFlow {
    #[serde(default, deserialize_with = "lenient_string")]
    pub flow_id: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub flow_name: String,
    #[serde(default, deserialize_with = "string_list")]
    pub group_ids: Vec<String>,
    #[serde(default, deserialize_with = "string_list")]
    pub function_refs: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RawGroup {
    #[serde(default, deserialize_with = "lenient_string")]
    pub group_id: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub group_name: String,
    #[serde(default, deserialize_with = "string_list")]
    pub functions: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PlanningDocument {
    #[serde(default)]
    pub schema_version: Option<String>,
    #[serde(default)]
    pub groups: Vec<RawGroup>,
    #[serde(default)]
    pub flows: Vec<RawFlow>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RepairDocument {
    #[serde(default)]
    pub schema_version: Option<String>,
    #[serde(default)]
    pub new_groups: Vec<RawGroup>,
    #[serde(default)]
    pub new_flows: Vec<RawFlow>,
}

fn lenient_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => s.trim().to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    })
}

/// 接受字串陣列或逗號分隔字串，非字串項目略過
fn string_list<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    let items = match Value::deserialize(deserializer)? {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|v| match v {
                Value::String(s) => Some(s),
                _ => None,
            })
            .collect(),
        Value::String(s) => s.split(',').map(str::to_string).collect(),
        _ => Vec::new(),
    };
    Ok(items
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect())
}

fn decode<T: serde::de::DeserializeOwned>(stdout: &str) -> Result<T, String> {
    let value = extract_json_object(stdout).map_err(|e| e.code())?;
    serde_json::from_value(value).map_err(|e| format!("schema_error: {}", e))
}

/// 解析 P2 的最終 JSON，失敗時回傳錯誤代碼
pub fn decode_planning(stdout: &str) -> Result<PlanningDocument, String> {
    decode(stdout)
}

pub fn decode_repair(stdout: &str) -> Result<RepairDocument, String> {
    decode(stdout)
}
