//! Server-defined commands exposed through `workspace/executeCommand`.

use std::collections::HashMap;
use std::path::Path;

use lsp_types::{Diagnostic, PublishDiagnosticsParams, Url};

use crate::error::ServerError;
use crate::session;

pub const COMPILE_RULE: &str = "compileRule";
pub const COMPILE_ALL_RULES: &str = "compileAllRules";

/// Commands advertised during capability negotiation. Empty without a
/// compiler, since both commands delegate to it.
pub fn advertised_commands(compiler_available: bool) -> Vec<String> {
    if compiler_available {
        vec![COMPILE_RULE.to_string(), COMPILE_ALL_RULES.to_string()]
    } else {
        Vec::new()
    }
}

/// Gather every document a workspace-wide compile should cover.
///
/// Starts from a snapshot of the overlay (isolating the compile from later
/// edit notifications) and, when a workspace root is configured, adds every
/// `.yar`/`.yara` file beneath it. Overlay text wins over the on-disk copy
/// of the same document. Results are sorted by URI so diagnostic
/// notifications go out in a stable order.
pub fn collect_documents(
    overlay: &HashMap<Url, String>,
    workspace: Option<&Path>,
) -> Result<Vec<(Url, String)>, ServerError> {
    let mut documents: HashMap<Url, String> = overlay.clone();
    match workspace {
        Some(root) => {
            tracing::info!(root = %root.display(), "compiling all rules in workspace");
            for entry in ignore::Walk::new(root).flatten() {
                let path = entry.path();
                let is_rule_file = path
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .map(|ext| ext.eq_ignore_ascii_case("yar") || ext.eq_ignore_ascii_case("yara"))
                    .unwrap_or(false);
                if !is_rule_file {
                    continue;
                }
                let uri = match Url::from_file_path(path) {
                    Ok(uri) => uri,
                    Err(_) => continue,
                };
                if !documents.contains_key(&uri) {
                    let text = session::read_from_disk(&uri)?;
                    documents.insert(uri, text);
                }
            }
        }
        None => {
            tracing::warn!("no workspace specified, compiling open documents only");
        }
    }
    let mut documents: Vec<(Url, String)> = documents.into_iter().collect();
    documents.sort_by(|(a, _), (b, _)| a.as_str().cmp(b.as_str()));
    Ok(documents)
}

/// Run the diagnostic check over every collected document. Documents with a
/// clean verdict are dropped; each remaining one becomes its own
/// per-file diagnostics notification, never an aggregate.
pub fn compile_all<F>(
    documents: Vec<(Url, String)>,
    mut diagnose: F,
) -> Result<Vec<PublishDiagnosticsParams>, ServerError>
where
    F: FnMut(&str) -> Result<Vec<Diagnostic>, ServerError>,
{
    let mut published = Vec::new();
    for (uri, text) in documents {
        let diagnostics = diagnose(&text)?;
        if !diagnostics.is_empty() {
            published.push(PublishDiagnosticsParams::new(uri, diagnostics, None));
        }
    }
    Ok(published)
}
