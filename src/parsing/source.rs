use crate::utils::error::{AuditError, Result};

/// 將註解與字串內容換成空白，位元組長度與換行位置不變，
/// 之後所有位移都能直接對應回原始碼。
pub fn mask_comments_and_strings(source: &str, single_quote_strings: bool) -> Result<String> {
    #[derive(Clone, Copy, PartialEq)]
    enum State {
        Code,
        LineComment,
        BlockComment,
        Str(u8),
    }

    let bytes = source.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut state = State::Code;
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        let next = bytes.get(i + 1).copied();
        match state {
            State::Code => {
                if b == b'/' && next == Some(b'/') {
                    state = State::LineComment;
                    out.extend_from_slice(b"  ");
                    i += 2;
                    continue;
                }
                if b == b'/' && next == Some(b'*') {
                    state = State::BlockComment;
                    out.extend_from_slice(b"  ");
                    i += 2;
                    continue;
                }
                if b == b'\'' && !single_quote_strings {
                    // Rust 的字元常值；生命週期標記不會匹配
                    if let Some(len) = char_literal_len(&bytes[i..]) {
                        out.push(b'\'');
                        out.extend(std::iter::repeat(b' ').take(len - 2));
                        out.push(b'\'');
                        i += len;
                        continue;
                    }
                }
                if b == b'"' || (single_quote_strings && b == b'\'') {
                    state = State::Str(b);
                }
                out.push(b);
            }
            State::LineComment => {
                if b == b'\n' {
                    state = State::Code;
                    out.push(b'\n');
                } else {
                    out.push(b' ');
                }
            }
            State::BlockComment => {
                if b == b'*' && next == Some(b'/') {
                    state = State::Code;
                    out.extend_from_slice(b"  ");
                    i += 2;
                    continue;
                }
                out.push(if b == b'\n' { b'\n' } else { b' ' });
            }
            State::Str(quote) => {
                if b == b'\\' && next.is_some() {
                    out.push(b' ');
                    out.push(if next == Some(b'\n') { b'\n' } else { b' ' });
                    i += 2;
                    continue;
                }
                if b == quote {
                    state = State::Code;
                    out.push(b);
                } else {
                    out.push(if b == b'\n' { b'\n' } else { b' ' });
                }
            }
        }
        i += 1;
    }

    String::from_utf8(out).map_err(|e| AuditError::ParseError {
        path: String::new(),
        message: format!("masking produced invalid UTF-8: {}", e),
    })
}

/// `'x'`、`'\n'`、`'\u{1F600}'` 這類字元常值的位元組長度
fn char_literal_len(rest: &[u8]) -> Option<usize> {
    match rest.get(1)? {
        b'\\' => {
            // 跳過反斜線後的第一個位元組，`'\''` 才不會提早結束
            let close = rest.iter().skip(3).take(10).position(|&b| b == b'\'')?;
            Some(close + 4)
        }
        b'\'' | b'\n' => None,
        &lead => {
            let width = match lead {
                0x00..=0x7F => 1,
                0xC0..=0xDF => 2,
                0xE0..=0xEF => 3,
                _ => 4,
            };
            (rest.get(1 + width) == Some(&b'\'')).then_some(width + 2)
        }
    }
}

/// 從 `open` 位置的左括號找到對應的右括號
pub fn find_matching(text: &str, open: usize, open_ch: u8, close_ch: u8) -> Option<usize> {
    let bytes = text.as_bytes();
    if bytes.get(open) != Some(&open_ch) {
        return None;
    }
    let mut depth = 0usize;
    for (offset, &b) in bytes[open..].iter().enumerate() {
        if b == open_ch {
            depth += 1;
        } else if b == close_ch {
            depth -= 1;
            if depth == 0 {
                return Some(open + offset);
            }
        }
    }
    None
}

/// 在 `from` 之後找第一個 `{` 或 `;`
pub fn find_body_or_terminator(text: &str, from: usize) -> Option<(usize, u8)> {
    text.as_bytes()[from..]
        .iter()
        .position(|&b| b == b'{' || b == b';')
        .map(|offset| (from + offset, text.as_bytes()[from + offset]))
}

/// 以頂層逗號切分，忽略巢狀 () <> [] 內的逗號
pub fn split_top_level(text: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut current = String::new();
    for ch in text.chars() {
        match ch {
            '(' | '<' | '[' => depth += 1,
            ')' | '>' | ']' => depth -= 1,
            _ => {}
        }
        if ch == ',' && depth == 0 {
            parts.push(current.trim().to_string());
            current.clear();
        } else {
            current.push(ch);
        }
    }
    if !current.trim().is_empty() {
        parts.push(current.trim().to_string());
    }
    parts.retain(|p| !p.is_empty());
    parts
}

/// 位移 → 行號（從 1 起算）
pub struct LineIndex {
    line_starts: Vec<usize>,
}

impl LineIndex {
    pub fn new(text: &str) -> Self {
        let mut line_starts = vec![0];
        line_starts.extend(
            text.bytes()
                .enumerate()
                .filter(|(_, b)| *b == b'\n')
                .map(|(i, _)| i + 1),
        );
        Self { line_starts }
    }

    pub fn line_of(&self, offset: usize) -> usize {
        match self.line_starts.binary_search(&offset) {
            Ok(line) => line + 1,
            Err(line) => line,
        }
    }
}
