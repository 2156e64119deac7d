use crate::domain::model::{FunctionInfo, Language};
use crate::parsing::source::mask_comments_and_strings;
use crate::utils::error::{AuditError, Result};
use regex::Regex;
use std::collections::{HashMap, HashSet};

const NON_CALL_WORDS: [&str; 24] = [
    "if", "for", "while", "return", "require", "assert", "revert", "emit", "new", "mapping",
    "keccak256", "abi", "type", "match", "loop", "Some", "Ok", "Err", "vec", "println",
    "assert_eq", "msg", "function", "fun",
];

#[derive(Debug, Clone, PartialEq)]
pub struct CallNode {
    pub key: String,
    pub depth: usize,
}

/// 以名稱比對建立的近似呼叫圖
#[derive(Debug, Clone, Default)]
pub struct CallGraph {
    callees: HashMap<String, Vec<String>>,
    callers: HashMap<String, Vec<String>>,
    contents: HashMap<String, String>,
}

impl CallGraph {
    pub fn build(functions: &[FunctionInfo]) -> Result<Self> {
        let direct_re = Regex::new(r"\b([A-Za-z_]\w*)\s*\(").map_err(|e| AuditError::ParseError {
            path: "call_graph".to_string(),
            message: e.to_string(),
        })?;
        let member_re = Regex::new(r"([A-Za-z_]\w*)\s*(?:\.|::)\s*([A-Za-z_]\w*)\s*\(").map_err(
            |e| AuditError::ParseError {
                path: "call_graph".to_string(),
                message: e.to_string(),
            },
        )?;

        let mut by_container: ContainerMap<'_> = HashMap::new();
        let mut by_name: HashMap<&str, Vec<&str>> = HashMap::new();
        for f in functions {
            by_container
                .entry(f.contract_name.as_str())
                .or_default()
                .entry(f.function_name.as_str())
                .or_default()
                .push(f.key.as_str());
            by_name.entry(f.function_name.as_str()).or_default().push(f.key.as_str());
        }

        let mut graph = CallGraph::default();
        for f in functions {
            graph.contents.insert(f.key.clone(), f.content.clone());

            let body_start = f.content.find('{').map(|p| p + 1).unwrap_or(0);
            let body = mask_comments_and_strings(
                &f.content[body_start..],
                f.language == Language::Solidity,
            )?;
            let mut found: Vec<String> = Vec::new();
            let push = |key: &str, found: &mut Vec<String>| {
                if key != f.key && !found.iter().any(|k| k == key) {
                    found.push(key.to_string());
                }
            };

            for caps in direct_re.captures_iter(&body) {
                let Some(m) = caps.get(1) else {
                    continue;
                };
                let name = m.as_str();
                // `x.name(` 與 `X::name(` 交給成員呼叫處理
                let preceding = body[..m.start()].trim_end();
                if preceding.ends_with('.') || preceding.ends_with(':') {
                    continue;
                }
                if NON_CALL_WORDS.contains(&name) {
                    continue;
                }
                if let Some(keys) = lookup(&by_container, &f.contract_name, name) {
                    keys.iter().for_each(|k| push(k, &mut found));
                } else if let Some(key) = unique(&by_name, name) {
                    push(key, &mut found);
                }
            }

            for caps in member_re.captures_iter(&body) {
                let (Some(target), Some(name)) = (caps.get(1), caps.get(2)) else {
                    continue;
                };
                if by_container.contains_key(target.as_str()) {
                    if let Some(keys) = lookup(&by_container, target.as_str(), name.as_str()) {
                        keys.iter().for_each(|k| push(k, &mut found));
                    }
                } else if let Some(key) = unique(&by_name, name.as_str()) {
                    push(key, &mut found);
                }
            }

            for callee in &found {
                graph
                    .callers
                    .entry(callee.clone())
                    .or_default()
                    .push(f.key.clone());
            }
            graph.callees.insert(f.key.clone(), found);
        }

        Ok(graph)
    }

    pub fn callees(&self, key: &str) -> &[String] {
        self.callees.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn callers(&self, key: &str) -> &[String] {
        self.callers.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn content(&self, key: &str) -> Option<&str> {
        self.contents.get(key).map(String::as_str)
    }

    /// 深度優先走訪被呼叫者，不含起點
    pub fn downstream(&self, key: &str, max_depth: usize) -> Vec<CallNode> {
        self.walk(key, max_depth, |k| self.callees(k))
    }

    pub fn upstream(&self, key: &str, max_depth: usize) -> Vec<CallNode> {
        self.walk(key, max_depth, |k| self.callers(k))
    }

    fn walk<'a, F>(&'a self, key: &str, max_depth: usize, next: F) -> Vec<CallNode>
    where
        F: Fn(&str) -> &'a [String],
    {
        let mut visited: HashSet<String> = HashSet::from([key.to_string()]);
        let mut out = Vec::new();
        let mut stack: Vec<(String, usize)> = next(key)
            .iter()
            .rev()
            .map(|k| (k.clone(), 1))
            .collect();

        while let Some((current, depth)) = stack.pop() {
            if depth > max_depth || !visited.insert(current.clone()) {
                continue;
            }
            for child in next(&current).iter().rev() {
                if !visited.contains(child) {
                    stack.push((child.clone(), depth + 1));
                }
            }
            out.push(CallNode { key: current, depth });
        }
        out
    }

    pub fn downstream_content(&self, key: &str, max_depth: usize) -> String {
        self.join_contents(self.downstream(key, max_depth).iter().map(|n| n.key.as_str()))
    }

    pub fn upstream_content(&self, key: &str, max_depth: usize) -> String {
        self.join_contents(self.upstream(key, max_depth).iter().map(|n| n.key.as_str()))
    }

    /// 流程成員的直接呼叫者與被呼叫者中，不屬於流程本身的函式
    pub fn flow_context(&self, flow_keys: &[String]) -> String {
        let members: HashSet<&str> = flow_keys.iter().map(String::as_str).collect();
        let mut seen: HashSet<&str> = HashSet::new();
        let mut context = Vec::new();
        for key in flow_keys {
            for neighbour in self.callees(key).iter().chain(self.callers(key)) {
                if !members.contains(neighbour.as_str()) && seen.insert(neighbour.as_str()) {
                    context.push(neighbour.as_str());
                }
            }
        }
        self.join_contents(context.into_iter())
    }

    fn join_contents<'a>(&self, keys: impl Iterator<Item = &'a str>) -> String {
        keys.filter_map(|k| self.content(k))
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

type ContainerMap<'a> = HashMap<&'a str, HashMap<&'a str, Vec<&'a str>>>;

fn lookup<'a>(by_container: &ContainerMap<'a>, container: &str, name: &str) -> Option<Vec<&'a str>> {
    by_container
        .get(container)
        .and_then(|names| names.get(name))
        .cloned()
}

fn unique<'a>(by_name: &HashMap<&'a str, Vec<&'a str>>, name: &str) -> Option<&'a str> {
    by_name
        .get(name)
        .filter(|keys| keys.len() == 1)
        .map(|keys| keys[0])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parsing::extract::extract_functions;

    const SRC: &str = r#"
contract Token {
    function transfer(address to, uint256 amount) external returns (bool) {
        _move(msg.sender, to, amount);
        return true;
    }
    function _move(address a, address b, uint256 v) internal {
        // _burn(a) is mentioned only in a comment
        _check(v);
    }
    function _check(uint256 v) internal pure {
        require(v > 0, "zero");
    }
    function _burn(address a) internal {}
}

contract Vault {
    function deposit(uint256 amount) external {
        Token.transfer(address(this), amount);
        _record(amount);
    }
    function _record(uint256 amount) internal {}
}
"#;

    fn graph() -> CallGraph {
        let functions = extract_functions("src/All.sol", "/p/src/All.sol", SRC).unwrap();
        CallGraph::build(&functions).unwrap()
    }

    #[test]
    fn test_callees_and_callers() {
        let g = graph();
        assert_eq!(g.callees("Token.transfer"), ["Token._move"]);
        assert_eq!(g.callees("Token._move"), ["Token._check"]);
        assert_eq!(g.callees("Vault.deposit"), ["Vault._record", "Token.transfer"]);
        assert_eq!(g.callers("Token.transfer"), ["Vault.deposit"]);
        assert!(g.callees("Token._burn").is_empty());
    }

    #[test]
    fn test_downstream_respects_depth() {
        let g = graph();
        let nodes = g.downstream("Vault.deposit", 5);
        let keys: Vec<(&str, usize)> = nodes.iter().map(|n| (n.key.as_str(), n.depth)).collect();
        assert_eq!(
            keys,
            vec![
                ("Vault._record", 1),
                ("Token.transfer", 1),
                ("Token._move", 2),
                ("Token._check", 3)
            ]
        );

        let shallow = g.downstream("Vault.deposit", 1);
        assert_eq!(shallow.len(), 2);

        let content = g.downstream_content("Token.transfer", 5);
        assert!(content.contains("function _move"));
        assert!(content.contains("function _check"));
        assert!(!content.contains("function transfer"));
    }

    #[test]
    fn test_upstream_and_flow_context() {
        let g = graph();
        let up: Vec<String> = g.upstream("Token._check", 5).into_iter().map(|n| n.key).collect();
        assert_eq!(up, vec!["Token._move", "Token.transfer", "Vault.deposit"]);
        assert!(g.upstream_content("Token._check", 1).contains("function _move"));

        let context = g.flow_context(&["Vault.deposit".to_string(), "Token.transfer".to_string()]);
        assert!(context.contains("function _record"));
        assert!(context.contains("function _move"));
        assert!(!context.contains("function deposit"));
    }

    #[test]
    fn test_rust_lifetimes_do_not_hide_calls() {
        let src = r#"
pub fn settle<'a>(accounts: &'a [u8]) -> u8 {
    let first: &'a u8 = &accounts[0];
    payout(*first)
}

fn payout(v: u8) -> u8 { v }
"#;
        let functions = extract_functions("src/vault.rs", "/p/src/vault.rs", src).unwrap();
        let g = CallGraph::build(&functions).unwrap();
        assert_eq!(g.callees("vault.settle"), ["vault.payout"]);
    }
}
