//! Go-to-definition over raw rule text.

use lsp_types::{Location, Position, Range, Url};
use regex::Regex;

use crate::error::ServerError;
use crate::symbols::{resolve_symbol, rule_range, SymbolKind};

/// Locations where the symbol under the cursor is declared.
///
/// Variables are looked up as `$name =` declarations inside the enclosing
/// rule only; rule names as `rule name` headers anywhere in the document.
/// Each match span is trimmed so it starts right after the sigil or the
/// `rule ` keyword. A pattern that fails to compile (user-typed symbol text
/// containing regex syntax) yields zero results instead of an error.
pub fn goto_definition(
    document: &str,
    position: Position,
    uri: &Url,
) -> Result<Vec<Location>, ServerError> {
    let symbol = match resolve_symbol(document, position) {
        Some(symbol) => symbol,
        None => return Ok(Vec::new()),
    };

    let lines: Vec<&str> = document.split('\n').collect();
    let (pattern, search_lines, line_offset, char_offset) = match symbol.kind {
        SymbolKind::Variable | SymbolKind::WildcardVariable => {
            let name: String = symbol.text.chars().skip(1).collect();
            let scope = rule_range(document, position);
            let start = scope.start.line as usize;
            let end = (scope.end.line as usize).min(lines.len().saturating_sub(1));
            // skip the sigil when reporting the declaration span
            (format!(r"\${} =\s", name), &lines[start..=end], start, 1)
        }
        SymbolKind::RuleName => {
            // skip the "rule " keyword prefix
            (format!(r"\brule {}\b", symbol.text), &lines[..], 0, 5)
        }
    };

    let regex = match Regex::new(&pattern) {
        Ok(regex) => regex,
        Err(_) => {
            tracing::debug!(pattern, "could not build definition pattern");
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
