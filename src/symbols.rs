//! Symbol resolution and scope location over raw rule text.
//!
//! There is deliberately no grammar here: tokens are extracted by scanning a
//! fixed symbol-character class outward from the cursor, and rule scopes are
//! found with a line-based brace scan bounded by the declaration header.
//! Variable names are only meaningful inside their declaring rule, so every
//! variable search is clipped to [`rule_range`].

use lsp_types::{Position, Range};
use once_cell::sync::Lazy;
use regex::Regex;

/// The four prefix characters marking a variable-style reference:
/// `$` (string), `#` (count), `@` (offset), `!` (length).
pub const VARIABLE_SIGILS: [char; 4] = ['$', '#', '@', '!'];

static RULE_HEADER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(?:private\s+|global\s+)*rule\s").unwrap());

/// Classification of a token under the cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    /// A bare identifier, assumed to name a rule.
    RuleName,
    /// A sigil-prefixed variable reference such as `$a` or `#a`.
    Variable,
    /// A variable pattern containing `*`, e.g. `$a*` or `($foo*)`.
    WildcardVariable,
}

/// A token resolved at a cursor position. `text` is the exact maximal run of
/// symbol characters, sigil and any enclosing parentheses included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    pub text: String,
    pub kind: SymbolKind,
}

impl Symbol {
    pub fn is_wildcard(&self) -> bool {
        self.kind == SymbolKind::WildcardVariable
    }
}

/// Characters legal anywhere inside a token name.
fn is_name_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || ch == '_' || ch == '.'
}

/// Characters legal only before a token name: sigils and an opening paren.
fn is_leading_edge(ch: char) -> bool {
    ch == '(' || VARIABLE_SIGILS.contains(&ch)
}

/// Characters legal only after a token name: the wildcard and a closing
/// paren.
fn is_trailing_edge(ch: char) -> bool {
    ch == '*' || ch == ')'
}

fn is_symbol_char(ch: char) -> bool {
    is_name_char(ch) || is_leading_edge(ch) || is_trailing_edge(ch)
}

/// Extract the token touching `position`, or `None` when the cursor sits on
/// whitespace or punctuation outside any token.
///
/// The scan anchors on a name character at or adjacent to the cursor, takes
/// the contiguous run of name characters around it, then attaches any
/// leading sigils/parens and trailing wildcard/parens. Edge characters never
/// join two names into one token: `foo$bar` is two tokens, not one. Cursors
/// at the start or end of a line are tolerated, and a cursor one past the
/// end of a token still resolves that token.
pub fn resolve_symbol(document: &str, position: Position) -> Option<Symbol> {
    let line = document.split('\n').nth(position.line as usize)?;
    let chars: Vec<char> = line.chars().collect();
    if chars.is_empty() || position.character as usize > chars.len() {
        return None;
    }

    let mut idx = (position.character as usize).min(chars.len() - 1);
    if !is_symbol_char(chars[idx]) {
        // the cursor may sit immediately after the token's last character
        if idx > 0 && is_symbol_char(chars[idx - 1]) {
            idx -= 1;
        } else {
            return None;
        }
    }

    // anchor on a name character: a cursor on leading edge characters
    // belongs to the name on its right, one on trailing edge characters to
    // the name on its left
    let mut anchor = idx;
    if !is_name_char(chars[anchor]) {
        if is_leading_edge(chars[anchor]) {
            while anchor + 1 < chars.len() && is_leading_edge(chars[anchor + 1]) {
                anchor += 1;
            }
            if anchor + 1 >= chars.len() || !is_name_char(chars[anchor + 1]) {
                return None;
            }
            anchor += 1;
        } else {
            while anchor > 0 && is_trailing_edge(chars[anchor - 1]) {
                anchor -= 1;
            }
            if anchor == 0 || !is_name_char(chars[anchor - 1]) {
                return None;
            }
            anchor -= 1;
        }
    }

    let mut start = anchor;
    while start > 0 && is_name_char(chars[start - 1]) {
        start -= 1;
    }
    while start > 0 && is_leading_edge(chars[start - 1]) {
        start -= 1;
    }
    let mut end = anchor;
    while end + 1 < chars.len() && is_name_char(chars[end + 1]) {
        end += 1;
    }
    while end + 1 < chars.len() && is_trailing_edge(chars[end + 1]) {
        end += 1;
    }

    let text: String = chars[start..=end].iter().collect();
    classify(text)
}

fn classify(text: String) -> Option<Symbol> {
    let bare = text.trim_matches(|c| c == '(' || c == ')');
    let first = bare.chars().next()?;
    let kind = if VARIABLE_SIGILS.contains(&first) {
        if bare.contains('*') {
            SymbolKind::WildcardVariable
        } else {
            SymbolKind::Variable
        }
    } else {
        SymbolKind::RuleName
    };
    Some(Symbol { text, kind })
}

/// Find the smallest enclosing rule block around `position`.
///
/// Scans backward for the nearest preceding rule header, then forward
/// counting braces line by line until the block balances. Braces inside
/// string literals or comments are not excluded; this is a best-effort
/// lexical scan. Start and end both sit at column zero of their lines. With
/// no enclosing header the whole document is returned.
pub fn rule_range(document: &str, position: Position) -> Range {
    let lines: Vec<&str> = document.split('\n').collect();
    let last_line = lines.len().saturating_sub(1) as u32;
    let cursor = (position.line as usize).min(lines.len().saturating_sub(1));

    let header = (0..=cursor)
        .rev()
        .find(|&idx| RULE_HEADER.is_match(lines[idx]));
    let start_line = match header {
        Some(idx) => idx,
        None => {
            return Range {
                start: Position::new(0, 0),
                end: Position::new(last_line, 0),
            }
        }
    };

    let mut depth: i32 = 0;
    let mut opened = false;
    let mut end_line = last_line;
    for (idx, line) in lines.iter().enumerate().skip(start_line) {
        for ch in line.chars() {
            match ch {
                '{' => {
                    depth += 1;
                    opened = true;
                }
                '}' => depth -= 1,
                _ => {}
            }
        }
        if opened && depth <= 0 {
            end_line = idx as u32;
            break;
        }
    }

    Range {
        start: Position::new(start_line as u32, 0),
        end: Position::new(end_line, 0),
    }
}
