//! Translation of compiler verdicts into protocol diagnostics.

use lsp_types::{Diagnostic, DiagnosticSeverity, Position, Range};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::compiler::CompileStatus;
use crate::error::ServerError;

/// Sentinel column marking "rest of the line"; clients clamp it to the
/// actual line length.
pub const MAX_LINE: u32 = 10_000;

/// `line <N>: <text>` with a one-indexed line number. Messages may contain
/// further colons; everything after the first separator is the text.
static COMPILE_RESULT: Lazy<Regex> = Lazy::new(|| Regex::new(r"^line (\d+): (.*)$").unwrap());

/// Split a compiler message into its one-indexed line number and text.
pub fn parse_result(message: &str) -> Option<(u32, String)> {
    let caps = COMPILE_RESULT.captures(message)?;
    let line = caps[1].parse::<u32>().ok()?;
    Some((line, caps[2].to_string()))
}

/// Column of the first non-whitespace character, or zero for blank lines.
pub fn first_non_whitespace_index(line: &str) -> u32 {
    line.chars()
        .position(|ch| !ch.is_whitespace())
        .unwrap_or(0) as u32
}

/// Convert one compile verdict into the diagnostics for that document.
///
/// The reported range spans from the first non-whitespace column of the
/// offending line to the [`MAX_LINE`] sentinel; line numbers are converted
/// from the compiler's one-indexed convention to the protocol's zero-indexed
/// one.
pub fn from_status(document: &str, status: CompileStatus) -> Result<Vec<Diagnostic>, ServerError> {
    let (severity, message) = match status {
        CompileStatus::Success => return Ok(Vec::new()),
        CompileStatus::Failure(message) => (DiagnosticSeverity::ERROR, message),
        CompileStatus::Warning(message) => (DiagnosticSeverity::WARNING, message),
    };
    let (line_no, text) = parse_result(&message)
        .ok_or_else(|| ServerError::Diagnostic(format!("unparsable compiler result: {message}")))?;
    let line_no = line_no.saturating_sub(1);
    let line = document.split('\n').nth(line_no as usize).unwrap_or("");
    let range = Range {
        start: Position::new(line_no, first_non_whitespace_index(line)),
        end: Position::new(line_no, MAX_LINE),
    };
    Ok(vec![Diagnostic {
        range,
        severity: Some(severity),
        message: text,
        ..Diagnostic::default()
    }])
}
