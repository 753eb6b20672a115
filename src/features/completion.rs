//! Schema-driven completion for module symbol paths.

use lsp_types::{CompletionItem, Position};

use crate::error::ServerError;
use crate::schema::ModuleSchema;
use crate::symbols::resolve_symbol;

/// Completion items for the dotted module path at `position`.
///
/// The trigger character typically sits at the end of the typed line, so the
/// cursor is pulled back one column before resolving the token. The token is
/// split on the trigger into path segments (a trailing trigger is dropped)
/// and the segments are walked through the schema; every child of the final
/// node becomes one item. Unknown roots or dead-end segments return an
/// empty list.
pub fn code_completion(
    document: &str,
    position: Position,
    trigger: &str,
    schema: &ModuleSchema,
) -> Result<Vec<CompletionItem>, ServerError> {
    let position = Position::new(position.line, position.character.saturating_sub(1));
    let symbol = match resolve_symbol(document, position) {
        Some(symbol) => symbol,
        None => return Ok(Vec::new()),
    };

    let path: Vec<&str> = symbol
        .text
        .trim_end_matches(trigger)
        .split(trigger)
        .collect();
    let children = match schema.walk(&path) {
        Some(children) => children,
        None => return Ok(Vec::new()),
    };

    Ok(children
        .iter()
        .map(|(label, node)| CompletionItem {
            label: label.clone(),
            kind: Some(node.completion_kind()),
            ..CompletionItem::default()
        })
        .collect())
}
