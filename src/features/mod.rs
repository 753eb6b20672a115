//! Navigation and command features, one module per request type.
//!
//! Every feature is a pure function over document text plus a cursor
//! position; the session engine owns all protocol and state concerns.

pub mod commands;
pub mod completion;
pub mod definition;
pub mod hover;
pub mod references;
pub mod rename;

use lsp_types::Position;

/// Document highlight is deliberately unimplemented; the stub keeps the
/// request from being reported as an unknown method.
pub fn document_highlight(_document: &str, _position: Position) -> Vec<lsp_types::DocumentHighlight> {
    tracing::warn!("document highlight is not implemented");
    Vec::new()
}
