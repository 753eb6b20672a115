//! Per-session configuration, delivered by the client through
//! `workspace/didChangeConfiguration` under the `yara` settings section.

use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Compile a document and publish diagnostics every time it is saved.
    pub compile_on_save: bool,
}

impl SessionConfig {
    /// Extract the `yara` section from a `didChangeConfiguration` settings
    /// payload. Anything missing or malformed falls back to the defaults.
    pub fn from_settings(settings: &Value) -> Self {
        settings
            .get("yara")
            .cloned()
            .and_then(|section| serde_json::from_value(section).ok())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn reads_the_yara_section() {
        let settings = json!({"yara": {"compile_on_save": true}});
        assert!(SessionConfig::from_settings(&settings).compile_on_save);
    }

    #[test]
    fn missing_or_malformed_settings_use_defaults() {
        assert!(!SessionConfig::from_settings(&json!({})).compile_on_save);
        assert!(!SessionConfig::from_settings(&json!({"yara": 42})).compile_on_save);
        // unknown keys are tolerated
        let settings = json!({"yara": {"compile_on_save": false, "future_knob": 1}});
        assert!(!SessionConfig::from_settings(&settings).compile_on_save);
    }
}
