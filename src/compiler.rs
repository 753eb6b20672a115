//! External rule-compiler collaborator.
//!
//! The engine never parses rules itself; it hands full source text to a
//! [`Compiler`] and only consumes a pass/fail verdict. The production
//! implementation shells out to the `yarac` binary, discovered once at
//! process start. Sessions created without a compiler degrade gracefully:
//! diagnostics go silent and the compile commands are not advertised.

use std::io::{self, Write};
use std::path::PathBuf;
use std::process::Command;

use once_cell::sync::Lazy;
use regex::Regex;

/// Verdict from compiling one rule file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompileStatus {
    Success,
    /// Hard error. The message follows the `line <N>: <text>` convention.
    Failure(String),
    /// Compiled, but with a warning in the same `line <N>: <text>` form.
    Warning(String),
}

pub trait Compiler: Send + Sync + 'static {
    fn compile(&self, source: &str) -> io::Result<CompileStatus>;
}

/// `path(N): error: msg` / `path(N): warning: msg` as printed by yarac.
static YARAC_RESULT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\((\d+)\): (error|warning): (.*)").unwrap());

/// Compiles rules by invoking the `yarac` command-line compiler.
pub struct YaracCompiler {
    binary: PathBuf,
}

impl YaracCompiler {
    /// Probe the environment for a usable `yarac`. Called once at startup;
    /// `None` disables diagnostics and the compile commands for the whole
    /// process lifetime.
    pub fn discover() -> Option<Self> {
        match which::which("yarac") {
            Ok(binary) => {
                tracing::info!(path = %binary.display(), "found yarac compiler");
                Some(Self { binary })
            }
            Err(_) => {
                tracing::warn!(
                    "yarac is not installed. Diagnostics and Compile commands are disabled"
                );
                None
            }
        }
    }
}

impl Compiler for YaracCompiler {
    fn compile(&self, source: &str) -> io::Result<CompileStatus> {
        let dir = tempfile::tempdir()?;
        let rule_path = dir.path().join("rules.yara");
        let mut rule_file = std::fs::File::create(&rule_path)?;
        rule_file.write_all(source.as_bytes())?;
        drop(rule_file);

        let output = Command::new(&self.binary)
            .arg(&rule_path)
            .arg(dir.path().join("rules.yarac"))
            .output()?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        let parsed = YARAC_RESULT.captures(&stderr).map(|caps| {
            (
                caps[2].to_string(),
                format!("line {}: {}", &caps[1], caps[3].trim_end()),
            )
        });
        if output.status.success() {
            match parsed {
                Some((kind, message)) if kind == "warning" => Ok(CompileStatus::Warning(message)),
                _ => Ok(CompileStatus::Success),
            }
        } else {
            match parsed {
                Some((_, message)) => Ok(CompileStatus::Failure(message)),
                None => Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("unrecognized compiler output: {}", stderr.trim()),
                )),
            }
        }
    }
}
