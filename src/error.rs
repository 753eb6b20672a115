//! Error taxonomy for the server.
//!
//! Every variant here is non-fatal to the connection: the engine reports it
//! to the client as a `window/showMessage` notification and keeps serving.
//! The only fatal conditions are transport EOF and an explicit `exit`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    /// Raised at most once per process, the first time diagnostics are
    /// requested without a usable compiler. Surfaced as a warning.
    #[error("yarac is not installed. Diagnostics and Compile commands are disabled")]
    CompilerUnavailable,

    #[error("Could not offer completion items: {0}")]
    Completion(String),

    #[error("Could not offer definition: {0}")]
    Definition(String),

    #[error("Could not compile rule: {0}")]
    Diagnostic(String),

    #[error("Could not offer code highlighting: {0}")]
    Highlight(String),

    #[error("Could not offer definition hover: {0}")]
    Hover(String),

    #[error("Could not rename symbol: {0}")]
    Rename(String),

    #[error("Could not find references for '{symbol}': {reason}")]
    Reference { symbol: String, reason: String },

    #[error("Could not read document '{uri}': {reason}")]
    DocumentUnavailable { uri: String, reason: String },
}

impl ServerError {
    /// Whether the client should see this as a warning rather than an error.
    pub fn is_warning(&self) -> bool {
        matches!(self, ServerError::CompilerUnavailable)
    }
}
