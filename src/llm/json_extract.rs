use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

static FENCED_JSON: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?s)```(?:json|JSON)\s*(.*?)```").ok());

#[derive(Debug, Clone, PartialEq)]
pub enum JsonExtractError {
    Empty,
    NoObject,
    Malformed(String),
}

impl JsonExtractError {
    /// 寫入記錄的錯誤代碼
    pub fn code(&self) -> String {
        match self {
            JsonExtractError::Empty => "empty_output".to_string(),
            JsonExtractError::NoObject => "no_json_object_found".to_string(),
            JsonExtractError::Malformed(e) => format!("json_parse_error: {}", e),
        }
    }
}

/// 從模型輸出中取出第一個 JSON 物件。
///
/// 順序：```json 區塊 → 第一個可完整解碼的 `{` → 第一個 `{` 到最後一個 `}` 的切片。
pub fn extract_json_object(text: &str) -> Result<Value, JsonExtractError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(JsonExtractError::Empty);
    }

    if let Some(re) = FENCED_JSON.as_ref() {
        for caps in re.captures_iter(text) {
            if let Some(body) = caps.get(1) {
                if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(body.as_str().trim()) {
                    return Ok(value);
                }
            }
        }
    }

    if !text.contains('{') {
        return Err(JsonExtractError::NoObject);
    }

    for (pos, _) in text.match_indices('{') {
        let mut stream = serde_json::Deserializer::from_str(&text[pos..]).into_iter::<Value>();
        if let Some(Ok(value @ Value::Object(_))) = stream.next() {
            return Ok(value);
        }
    }

    let first = text.find('{');
    let last = text.rfind('}');
    match (first, last) {
        (Some(start), Some(end)) if end > start => {
            match serde_json::from_str::<Value>(&text[start..=end]) {
                Ok(value @ Value::Object(_)) => Ok(value),
                Ok(_) => Err(JsonExtractError::NoObject),
                Err(e) => Err(JsonExtractError::Malformed(e.to_string())),
            }
        }
        _ => Err(JsonExtractError::Malformed("unbalanced braces".to_string())),
    }
}
