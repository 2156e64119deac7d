//! 依語言從單一原始碼檔抽出函式。
//!
//! 先遮蔽註解與字串，再以 regex 找宣告、以括號配對找函式本體；
//! 所有位移都對應回原始碼，因此 `content` 保留原始註解。

use crate::domain::model::{ContainerKind, FunctionInfo, Language};
use crate::parsing::source::{
    find_body_or_terminator, find_matching, mask_comments_and_strings, split_top_level, LineIndex,
};
use crate::utils::error::{AuditError, Result};
use regex::Regex;
use std::collections::HashMap;
use std::path::Path;

/// 抽取過程中的中繼資料，之後才決定唯一 key
struct RawFunction {
    contract_name: String,
    contract_kind: ContainerKind,
    function_name: String,
    visibility: String,
    param_types: Vec<String>,
    start: usize,
    end: usize,
}

struct FileContext<'a> {
    source: &'a str,
    masked: String,
    lines: LineIndex,
    relative_path: &'a str,
    absolute_path: &'a str,
    language: Language,
}

pub fn extract_functions(
    relative_path: &str,
    absolute_path: &str,
    source: &str,
) -> Result<Vec<FunctionInfo>> {
    let language = Language::from_path(relative_path).ok_or_else(|| AuditError::ParseError {
        path: relative_path.to_string(),
        message: "unsupported file extension".to_string(),
    })?;

    let masked = mask_comments_and_strings(source, language == Language::Solidity).map_err(
        |e| AuditError::ParseError {
            path: relative_path.to_string(),
            message: e.to_string(),
        },
    )?;

    let ctx = FileContext {
        source,
        lines: LineIndex::new(source),
        masked,
        relative_path,
        absolute_path,
        language,
    };

    let raw = match language {
        Language::Solidity => extract_solidity(&ctx)?,
        Language::Rust => extract_rust(&ctx)?,
        Language::Move => extract_move(&ctx)?,
    };

    Ok(assign_keys(&ctx, raw))
}

fn regex(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| AuditError::ParseError {
        path: pattern.to_string(),
        message: e.to_string(),
    })
}

/// 找出 `(` 之後的參數與本體範圍；沒有本體（宣告）時回傳 None
fn locate_signature_and_body(masked: &str, paren_open: usize) -> Option<(usize, usize, usize)> {
    let paren_close = find_matching(masked, paren_open, b'(', b')')?;
    let (pos, ch) = find_body_or_terminator(masked, paren_close + 1)?;
    if ch == b';' {
        return None;
    }
    let body_close = find_matching(masked, pos, b'{', b'}')?;
    Some((paren_close, pos, body_close))
}

fn solidity_param_type(param: &str) -> String {
    const SKIP: [&str; 5] = ["memory", "storage", "calldata", "payable", "indexed"];
    param
        .split_whitespace()
        .find(|token| !SKIP.contains(token))
        .unwrap_or("")
        .to_string()
}

fn colon_param_type(param: &str) -> String {
    match param.split_once(':') {
        Some((_, ty)) => ty.split_whitespace().collect::<Vec<_>>().join(" "),
        None => {
            let trimmed = param.trim();
            if trimmed.ends_with("self") {
                "self".to_string()
            } else {
                trimmed.to_string()
            }
        }
    }
}

fn extract_solidity(ctx: &FileContext<'_>) -> Result<Vec<RawFunction>> {
    let container_re =
        regex(r"\b(abstract\s+contract|contract|library|interface)\s+([A-Za-z_$][A-Za-z0-9_$]*)")?;
    let member_re =
        regex(r"\b(?:function\s+([A-Za-z_$][A-Za-z0-9_$]*)|(constructor|fallback|receive))\s*\(")?;
    let visibility_re = regex(r"\b(external|public|internal|private)\b")?;

    let masked = ctx.masked.as_str();
    let mut functions = Vec::new();
    let mut cursor = 0;

    while let Some(caps) = container_re.captures_at(masked, cursor) {
        let (Some(whole), Some(kind_match), Some(name_match)) = (caps.get(0), caps.get(1), caps.get(2))
        else {
            break;
        };
        let kind = match kind_match.as_str() {
            "library" => ContainerKind::Library,
            "interface" => ContainerKind::Interface,
            "contract" => ContainerKind::Contract,
            _ => ContainerKind::Abstract,
        };

        let Some((open, ch)) = find_body_or_terminator(masked, whole.end()) else {
            break;
        };
        if ch == b';' {
            cursor = open + 1;
            continue;
        }
        let Some(close) = find_matching(masked, open, b'{', b'}') else {
            tracing::warn!(
                "⚠️ Unbalanced braces in {} near contract {}",
                ctx.relative_path,
                name_match.as_str()
            );
            break;
        };

        let mut inner = open + 1;
        while inner < close {
            let Some(member) = member_re.captures_at(&masked[..close], inner) else {
                break;
            };
            let Some(member_whole) = member.get(0) else {
                break;
            };
            let function_name = member
                .get(1)
                .or_else(|| member.get(2))
                .map(|m| m.as_str().to_string())
                .unwrap_or_default();

            let paren_open = member_whole.end() - 1;
            let Some(paren_close) = find_matching(masked, paren_open, b'(', b')') else {
                break;
            };
            let Some((_, body_open, body_close)) = locate_signature_and_body(masked, paren_open)
            else {
                // 純宣告（interface / abstract），沒有可審計的本體
                inner = paren_close + 1;
                continue;
            };

            let header = &masked[paren_close + 1..body_open];
            let visibility = visibility_re
                .captures(header)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().to_string())
                .unwrap_or_else(|| "public".to_string());

            functions.push(RawFunction {
                contract_name: name_match.as_str().to_string(),
                contract_kind: kind,
                function_name,
                visibility,
                param_types: split_top_level(&masked[paren_open + 1..paren_close])
                    .iter()
                    .map(|p| solidity_param_type(p))
                    .collect(),
                start: member_whole.start(),
                end: body_close + 1,
            });
            inner = body_close + 1;
        }

        cursor = close + 1;
    }

    Ok(functions)
}

fn rust_container_name(relative_path: &str) -> String {
    let path = Path::new(relative_path);
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("crate");
    if matches!(stem, "lib" | "mod" | "main") {
        if let Some(parent) = path
            .parent()
            .and_then(|p| p.file_name())
            .and_then(|n| n.to_str())
        {
            // programs/vault/src/lib.rs → vault
            if parent == "src" {
                if let Some(grand) = path
                    .parent()
                    .and_then(|p| p.parent())
                    .and_then(|p| p.file_name())
                    .and_then(|n| n.to_str())
                {
                    return grand.to_string();
                }
            }
            return parent.to_string();
        }
    }
    stem.to_string()
}

fn extract_rust(ctx: &FileContext<'_>) -> Result<Vec<RawFunction>> {
    let fn_re = regex(
        r#"\b(?:(pub)(?:\s*\([^)]*\))?\s+)?(?:(?:const|async|unsafe|extern\s+"[^"]*")\s+)*fn\s+([A-Za-z_][A-Za-z0-9_]*)"#,
    )?;
    let masked = ctx.masked.as_str();
    let container = rust_container_name(ctx.relative_path);
    let mut functions = Vec::new();
    let mut cursor = 0;

    while let Some(caps) = fn_re.captures_at(masked, cursor) {
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(2)) else {
            break;
        };
        let Some(paren_open) = masked[name.end()..].find('(').map(|o| name.end() + o) else {
            break;
        };
        let Some((paren_close, _, body_close)) = locate_signature_and_body(masked, paren_open)
        else {
            cursor = name.end();
            continue;
        };

        functions.push(RawFunction {
            contract_name: container.clone(),
            contract_kind: ContainerKind::File,
            function_name: name.as_str().to_string(),
            visibility: if caps.get(1).is_some() { "pub" } else { "private" }.to_string(),
            param_types: split_top_level(&masked[paren_open + 1..paren_close])
                .iter()
                .map(|p| colon_param_type(p))
                .collect(),
            start: whole.start(),
            end: body_close + 1,
        });
        cursor = body_close + 1;
    }

    Ok(functions)
}

fn extract_move(ctx: &FileContext<'_>) -> Result<Vec<RawFunction>> {
    let module_re = regex(r"\bmodule\s+(?:[A-Za-z0-9_]+::)?([A-Za-z_][A-Za-z0-9_]*)\s*\{")?;
    let fun_re = regex(
        r"\b(?:(public)(\s*\(\s*(?:friend|package)\s*\))?\s+)?(?:(entry)\s+)?(?:native\s+)?fun\s+([A-Za-z_][A-Za-z0-9_]*)",
    )?;
    let masked = ctx.masked.as_str();
    let mut functions = Vec::new();
    let mut cursor = 0;

    while let Some(module) = module_re.captures_at(masked, cursor) {
        let (Some(whole), Some(name)) = (module.get(0), module.get(1)) else {
            break;
        };
        let open = whole.end() - 1;
        let Some(close) = find_matching(masked, open, b'{', b'}') else {
            break;
        };

        let mut inner = open + 1;
        while let Some(caps) = fun_re.captures_at(&masked[..close], inner) {
            let (Some(fun_whole), Some(fun_name)) = (caps.get(0), caps.get(4)) else {
                break;
            };
            let Some(paren_open) = masked[fun_name.end()..close]
                .find('(')
                .map(|o| fun_name.end() + o)
            else {
                break;
            };
            let Some((paren_close, _, body_close)) =
                locate_signature_and_body(masked, paren_open)
            else {
                inner = fun_name.end();
                continue;
            };

            let visibility = match (caps.get(1), caps.get(2), caps.get(3)) {
                (Some(_), Some(_), _) => "public(friend)",
                (Some(_), None, _) => "public",
                (None, _, Some(_)) => "entry",
                _ => "private",
            };

            functions.push(RawFunction {
                contract_name: name.as_str().to_string(),
                contract_kind: ContainerKind::Module,
                function_name: fun_name.as_str().to_string(),
                visibility: visibility.to_string(),
                param_types: split_top_level(&masked[paren_open + 1..paren_close])
                    .iter()
                    .map(|p| colon_param_type(p))
                    .collect(),
                start: fun_whole.start(),
                end: body_close + 1,
            });
            inner = body_close + 1;
        }

        cursor = close + 1;
    }

    Ok(functions)
}

/// 決定唯一 key：同容器同名時加上參數型別簽名，仍衝突再加行號
fn assign_keys(ctx: &FileContext<'_>, raw: Vec<RawFunction>) -> Vec<FunctionInfo> {
    let mut name_counts: HashMap<(String, String), usize> = HashMap::new();
    for f in &raw {
        *name_counts
            .entry((f.contract_name.clone(), f.function_name.clone()))
            .or_default() += 1;
    }

    let mut seen: HashMap<String, usize> = HashMap::new();
    raw.into_iter()
        .map(|f| {
            let base = format!("{}.{}", f.contract_name, f.function_name);
            let overloaded = name_counts
                .get(&(f.contract_name.clone(), f.function_name.clone()))
                .copied()
                .unwrap_or(0)
                > 1;
            let mut key = if overloaded {
                format!("{}({})", base, f.param_types.join(","))
            } else {
                base
            };
            let start_line = ctx.lines.line_of(f.start);
            let occurrences = seen.entry(key.clone()).or_default();
            *occurrences += 1;
            if *occurrences > 1 {
                key = format!("{}#L{}", key, start_line);
            }

            FunctionInfo {
                key,
                contract_name: f.contract_name,
                contract_kind: f.contract_kind,
                function_name: f.function_name,
                visibility: f.visibility,
                param_types: f.param_types,
                content: ctx.source[f.start..f.end].to_string(),
                start_line,
                end_line: ctx.lines.line_of(f.end.saturating_sub(1)),
                relative_file_path: ctx.relative_path.to_string(),
                absolute_file_path: ctx.absolute_path.to_string(),
                language: ctx.language,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const VAULT: &str = r#"// SPDX-License-Identifier: MIT
pragma solidity ^0.8.20;

interface IERC20 {
    function transfer(address to, uint256 amount) external returns (bool);
}

/// @notice simple vault { not a brace }
contract Vault is Ownable {
    mapping(address => uint256) public balances;

    constructor(address owner_) Ownable(owner_) {}

    function deposit(uint256 amount) external {
        balances[msg.sender] += amount; // "}"
        _afterDeposit(msg.sender);
    }

    function deposit(uint256 amount, address to) external {
        balances[to] += amount;
    }

    function _afterDeposit(address who) internal {
        emit Deposited(who);
    }

    function withdraw(uint256 amount) external nonReentrant {
        require(balances[msg.sender] >= amount, "insufficient {");
        balances[msg.sender] -= amount;
        IERC20(token).transfer(msg.sender, amount);
    }

    receive() external payable {}
}

abstract contract Base {
    function hook() internal virtual;
    function helper(bytes memory data) public pure returns (uint) { return data.length; }
}
"#;

    #[test]
    fn test_solidity_extraction() {
        let functions = extract_functions("src/Vault.sol", "/p/src/Vault.sol", VAULT).unwrap();
        let keys: Vec<&str> = functions.iter().map(|f| f.key.as_str()).collect();

        assert_eq!(
            keys,
            vec![
                "Vault.constructor",
                "Vault.deposit(uint256)",
                "Vault.deposit(uint256,address)",
                "Vault._afterDeposit",
                "Vault.withdraw",
                "Vault.receive",
                "Base.helper",
            ]
        );

        let withdraw = functions.iter().find(|f| f.key == "Vault.withdraw").unwrap();
        assert_eq!(withdraw.visibility, "external");
        assert_eq!(withdraw.start_line, 27);
        assert_eq!(withdraw.end_line, 31);
        assert!(withdraw.content.starts_with("function withdraw"));
        assert!(withdraw.content.ends_with('}'));
        assert!(withdraw.content.contains("insufficient {"));

        let internal = functions.iter().find(|f| f.key == "Vault._afterDeposit").unwrap();
        assert_eq!(internal.visibility, "internal");
        assert_eq!(internal.param_types, vec!["address"]);

        let helper = functions.iter().find(|f| f.key == "Base.helper").unwrap();
        assert_eq!(helper.contract_kind, ContainerKind::Abstract);
        assert_eq!(helper.param_types, vec!["bytes"]);
    }

    #[test]
    fn test_rust_extraction() {
        let src = r#"
use anchor_lang::prelude::*;

#[program]
pub mod vault {
    use super::*;

    pub fn deposit(ctx: Context<Deposit>, amount: u64) -> Result<()> {
        let s = "not { a brace";
        helper(amount)
    }

    fn helper(amount: u64) -> Result<()> {
        Ok(())
    }
}

trait Hook {
    fn on_hook(&self);
}
"#;
        let functions =
            extract_functions("programs/vault/src/lib.rs", "/p/programs/vault/src/lib.rs", src)
                .unwrap();
        let keys: Vec<&str> = functions.iter().map(|f| f.key.as_str()).collect();
        assert_eq!(keys, vec!["vault.deposit", "vault.helper"]);
        assert_eq!(functions[0].visibility, "pub");
        assert_eq!(functions[0].param_types, vec!["Context<Deposit>", "u64"]);
        assert_eq!(functions[1].visibility, "private");
    }

    #[test]
    fn test_rust_char_literals_do_not_hide_functions() {
        let src = r#"
pub fn count(s: &str) -> usize { s.chars().filter(|c| *c == '{').count() }
pub fn quote(c: char) -> bool { c == '"' || c == '\'' }
pub fn after() -> u8 { 1 }
"#;
        let functions = extract_functions("src/vault.rs", "/p/src/vault.rs", src).unwrap();
        let keys: Vec<&str> = functions.iter().map(|f| f.key.as_str()).collect();
        assert_eq!(keys, vec!["vault.count", "vault.quote", "vault.after"]);
        assert!(functions[0].content.ends_with(".count() }"));
    }

    #[test]
    fn test_move_extraction() {
        let src = r#"
module 0x1::coin {
    public fun transfer(from: &signer, to: address, amount: u64) {
        move_from(to);
    }

    public(friend) fun mint(amount: u64): Coin { Coin { value: amount } }

    public entry fun register(account: &signer) { init(account) }

    native fun burn(c: Coin);

    fun init(account: &signer) { }
}
"#;
        let functions = extract_functions("sources/coin.move", "/p/sources/coin.move", src).unwrap();
        let pairs: Vec<(&str, &str)> = functions
            .iter()
            .map(|f| (f.key.as_str(), f.visibility.as_str()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("coin.transfer", "public"),
                ("coin.mint", "public(friend)"),
                ("coin.register", "public"),
                ("coin.init", "private"),
            ]
        );
        assert_eq!(functions[0].param_types, vec!["&signer", "address", "u64"]);
    }

    #[test]
    fn test_unsupported_extension() {
        assert!(matches!(
            extract_functions("README.md", "/p/README.md", "# hi"),
            Err(AuditError::ParseError { .. })
        ));
    }
}
