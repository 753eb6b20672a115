//! Symbol rename, built on top of reference search.

use std::collections::HashMap;

use lsp_types::{Position, Range, TextEdit, Url, WorkspaceEdit};

use crate::error::ServerError;
use crate::features::references::find_references;
use crate::symbols::resolve_symbol;

/// Rename every occurrence of the symbol at `position` to `new_name`.
///
/// Reference search decides whether the symbol is rule- or variable-scoped.
/// Each edit starts one character after its reference so the sigil or
/// keyword character is never overwritten. The rename is refused — an edit
/// set with zero entries, logged but not an error — when no new name was
/// supplied, the name is unchanged, or the symbol is a wildcard pattern.
pub fn rename(
    document: &str,
    position: Position,
    uri: &Url,
    new_name: &str,
) -> Result<WorkspaceEdit, ServerError> {
    let mut edits: Vec<TextEdit> = Vec::new();
    let symbol = resolve_symbol(document, position);

    let refused = if new_name.is_empty() {
        tracing::warn!("no text to rename symbol to, skipping");
        true
    } else if let Some(symbol) = &symbol {
        if symbol.text == new_name {
            tracing::warn!("new rename symbol is the same as the old, skipping");
            true
        } else if symbol.is_wildcard() {
            tracing::warn!("cannot rename wildcard symbols, skipping");
            true
        } else {
            false
        }
    } else {
        false
    };

    if !refused {
        for reference in find_references(document, position, uri)
            .map_err(|err| ServerError::Rename(err.to_string()))?
        {
            let range = Range {
                start: Position::new(
                    reference.range.start.line,
                    reference.range.start.character + 1,
                ),
                end: reference.range.end,
            };
            edits.push(TextEdit {
                range,
                new_text: new_name.to_string(),
            });
        }
        if edits.is_empty() {
            tracing::warn!("no symbol references found to rename, skipping");
        }
    }

    Ok(WorkspaceEdit {
        changes: Some(HashMap::from([(uri.clone(), edits)])),
        document_changes: None,
        change_annotations: None,
    })
}
