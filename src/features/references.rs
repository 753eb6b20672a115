//! Reference search over raw rule text.

use lsp_types::{Location, Position, Range, Url};
use regex::Regex;

use crate::error::ServerError;
use crate::symbols::{resolve_symbol, rule_range, VARIABLE_SIGILS};

/// All occurrences of the symbol under the cursor, in document order.
///
/// A variable reference matches any of the four sigils followed by its name
/// and is bounded by the enclosing rule. Wildcard patterns only make sense
/// among string declarations, so their search is clipped further to the
/// lines between the `strings:` and `condition:` section markers. Rule
/// names are matched document-wide.
pub fn find_references(
    document: &str,
    position: Position,
    uri: &Url,
) -> Result<Vec<Location>, ServerError> {
    let symbol = match resolve_symbol(document, position) {
        Some(symbol) => symbol,
        None => return Ok(Vec::new()),
    };

    let lines: Vec<&str> = document.split('\n').collect();
    let wildcard = symbol.is_wildcard();
    // translate the wildcard into a lazy any-sequence and strip the
    // grouping parentheses before matching
    let text = if wildcard {
        symbol
            .text
            .replace('*', ".*?")
            .trim_matches(|c| c == '(' || c == ')')
            .to_string()
    } else {
        symbol.text.clone()
    };

    let sigils: String = VARIABLE_SIGILS.iter().collect();
    let (pattern, search_lines, line_offset, char_offset);
    if text.starts_with(VARIABLE_SIGILS) {
        let name: String = text.chars().skip(1).collect();
        pattern = format!(r"[{}]{}\b", sigils, name);
        let scope = rule_range(document, position);
        let mut start = scope.start.line as usize;
        let mut end = (scope.end.line as usize).min(lines.len().saturating_sub(1)) + 1;
        if wildcard {
            let section = |marker: &str| {
                lines[start..end]
                    .iter()
                    .position(|line| line.contains(marker))
            };
            let strings_start =
                section("strings:").ok_or_else(|| ServerError::Reference {
                    symbol: symbol.text.clone(),
                    reason: "enclosing rule has no strings section".into(),
                })?;
            let strings_end = section("condition:").ok_or_else(|| ServerError::Reference {
                symbol: symbol.text.clone(),
                reason: "enclosing rule has no condition section".into(),
            })?;
            // a condition: marker above strings: leaves no lines between the
            // sections; clamp instead of producing inverted slice bounds
            if strings_end <= strings_start {
                return Ok(Vec::new());
            }
            end = start + strings_end;
            start += strings_start;
        }
        search_lines = &lines[start..end];
        line_offset = start;
        char_offset = 1;
    } else {
        pattern = format!(r"{}\b", text);
        search_lines = &lines[..];
        line_offset = 0;
        char_offset = 0;
    }

    let regex = match Regex::new(&pattern) {
        Ok(regex) => regex,
        Err(_) => {
            tracing::debug!(pattern, "could not build reference pattern");
            return Ok(Vec::new());
        }
    };

    let mut results = Vec::new();
    for (index, line) in search_lines.iter().enumerate() {
        for found in regex.find_iter(line) {
            let line_no = (line_offset + index) as u32;
            results.push(Location {
                uri: uri.clone(),
                range: Range {
                    start: Position::new(line_no, (found.start() + char_offset) as u32),
                    end: Position::new(line_no, found.end() as u32),
                },
            });
        }
    }
    Ok(results)
}
