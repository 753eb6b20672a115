//! Per-connection session state.
//!
//! A [`Session`] is owned exclusively by one connection's handling task and
//! mutated only by messages arriving on that connection, so none of it needs
//! synchronization. The overlay holds the latest full text of every dirty
//! document and is authoritative over disk for as long as the entry exists.

use std::collections::HashMap;
use std::path::PathBuf;

use lsp_types::{MarkupKind, Url};

use crate::config::SessionConfig;
use crate::error::ServerError;

/// Connection lifecycle: `Idle` until the handshake completes, `Active`
/// until the client sends `exit`, then `Terminated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Idle,
    Active,
    Terminated,
}

pub struct Session {
    pub state: SessionState,
    /// Root directory for workspace-wide operations; `None` disables them.
    pub workspace: Option<PathBuf>,
    pub config: SessionConfig,
    /// Hover content formats the client accepts, most preferred first.
    pub hover_formats: Vec<MarkupKind>,
    overlay: HashMap<Url, String>,
}

impl Default for Session {
    fn default() -> Self {
        Self {
            state: SessionState::Idle,
            workspace: None,
            config: SessionConfig::default(),
            hover_formats: vec![MarkupKind::Markdown, MarkupKind::PlainText],
            overlay: HashMap::new(),
        }
    }
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the full replacement text for a dirty document.
    pub fn update_overlay(&mut self, uri: Url, text: String) {
        tracing::debug!(%uri, "adding document to dirty list");
        self.overlay.insert(uri, text);
    }

    /// Drop the overlay entry after a save or close. Returns whether the
    /// document was being tracked.
    pub fn remove_overlay(&mut self, uri: &Url) -> bool {
        if self.overlay.remove(uri).is_some() {
            tracing::debug!(%uri, "removed document from dirty list");
            true
        } else {
            false
        }
    }

    pub fn clear_overlay(&mut self) {
        self.overlay.clear();
    }

    pub fn overlay(&self) -> &HashMap<Url, String> {
        &self.overlay
    }

    /// Document text for `uri`: the overlay entry when the document is
    /// dirty, otherwise the file read from disk.
    pub fn resolve_document(&self, uri: &Url) -> Result<String, ServerError> {
        if let Some(text) = self.overlay.get(uri) {
            return Ok(text.clone());
        }
        read_from_disk(uri)
    }
}

/// Disk half of the document resolver, shared with the command engine so a
/// workspace compile can read files that were never opened.
pub fn read_from_disk(uri: &Url) -> Result<String, ServerError> {
    let path = uri
        .to_file_path()
        .map_err(|_| ServerError::DocumentUnavailable {
            uri: uri.to_string(),
            reason: "not a file path".into(),
        })?;
    std::fs::read_to_string(&path).map_err(|err| ServerError::DocumentUnavailable {
        uri: uri.to_string(),
        reason: err.to_string(),
    })
}
