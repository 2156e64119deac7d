use crate::domain::model::{FunctionInfo, Language};
use crate::parsing::source::mask_comments_and_strings;
use crate::utils::error::{AuditError, Result};
use regex::Regex;

const DECISION_TOKENS: &str = r"\b(if|while|for|try|loop|match)\b|&&|\|\||[?{}();]";

/// 以關鍵字近似的圈複雜度與認知複雜度
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Complexity {
    pub cyclomatic: usize,
    pub cognitive: usize,
}

impl Complexity {
    pub fn of(function: &FunctionInfo) -> Result<Self> {
        let masked = mask_comments_and_strings(
            &function.content,
            function.language == Language::Solidity,
        )?;
        let Some(body_start) = masked.find('{') else {
            return Ok(Self {
                cyclomatic: 1,
                cognitive: 0,
            });
        };
        Self::of_body(&masked[body_start..], function.language)
    }

    fn of_body(body: &str, language: Language) -> Result<Self> {
        let token_re = Regex::new(DECISION_TOKENS).map_err(|e| AuditError::ParseError {
            path: DECISION_TOKENS.to_string(),
            message: e.to_string(),
        })?;

        let mut cyclomatic = 1;
        let mut cognitive = 0;
        // 每個未關閉的 `{` 是否屬於控制結構
        let mut braces: Vec<bool> = Vec::new();
        let mut pending_control = 0usize;
        let mut paren_depth = 0usize;

        for token in token_re.find_iter(body).map(|m| m.as_str()) {
            let nesting = braces.iter().filter(|control| **control).count();
            match token {
                "{" => {
                    braces.push(pending_control > 0);
                    pending_control = pending_control.saturating_sub(1);
                }
                "}" => {
                    braces.pop();
                }
                "(" => paren_depth += 1,
                ")" => paren_depth = paren_depth.saturating_sub(1),
                // 無大括號的單行分支
                ";" if paren_depth == 0 => pending_control = 0,
                ";" => {}
                "&&" | "||" => {
                    cyclomatic += 1;
                    cognitive += 1;
                }
                // Rust 的 `?` 是錯誤傳遞，不是三元運算
                "?" if language == Language::Solidity => {
                    cyclomatic += 1;
                    cognitive += 1 + nesting;
                }
                "?" => {}
                "try" if language != Language::Solidity => {}
                "loop" | "match" if language == Language::Solidity => {}
                _ => {
                    cyclomatic += 1;
                    cognitive += 1 + nesting;
                    pending_control += 1;
                }
            }
        }

        Ok(Self {
            cyclomatic,
            cognitive,
        })
    }

    /// 分支少到不值得單獨掃描的函式
    pub fn is_trivial(&self) -> bool {
        (self.cognitive == 0 && self.cyclomatic <= 2)
            || (self.cyclomatic == 2 && self.cognitive == 1)
            || (self.cyclomatic == 3 && self.cognitive == 2)
    }
}
