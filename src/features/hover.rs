//! Hover previews for string declarations.

use lsp_types::{Hover, HoverContents, MarkupContent, MarkupKind, Position, Url};

use crate::error::ServerError;
use crate::features::definition::goto_definition;

/// Preview the value assigned to the symbol under the cursor.
///
/// Reuses definition lookup: the first definition's line is split on the
/// `" = "` separator and the right-hand side is returned as plain text. A
/// symbol without a definition, or a definition line without an assignment,
/// produces no hover.
pub fn hover(document: &str, position: Position, uri: &Url) -> Result<Option<Hover>, ServerError> {
    let definitions =
        goto_definition(document, position, uri).map_err(|err| ServerError::Hover(err.to_string()))?;
    let definition = match definitions.first() {
        Some(definition) => definition,
        None => return Ok(None),
    };
    let line = document
        .split('\n')
        .nth(definition.range.start.line as usize)
        .unwrap_or("");
    let words: Vec<&str> = line.split(" = ").collect();
    match words.get(1) {
        Some(value) => Ok(Some(Hover {
            contents: HoverContents::Markup(MarkupContent {
                kind: MarkupKind::PlainText,
                value: (*value).to_string(),
            }),
            range: None,
        })),
        None => Ok(None),
    }
}
