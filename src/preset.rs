//! Preset format (spec.md §6): `{version, config}` JSON. Unknown keys are
//! ignored (every `WorkspaceConfig` field carries `#[serde(default)]`, see
//! config.rs), missing keys fall back to `Default`.

use serde::{Deserialize, Serialize};

use crate::config::WorkspaceConfig;
use crate::error::Result;

pub const CURRENT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Preset {
    pub version: u32,
    pub config: WorkspaceConfig,
}

impl Preset {
    #[must_use]
    pub fn new(config: WorkspaceConfig) -> Self {
        Self { version: CURRENT_VERSION, config }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Leniently parses a preset: unknown top-level and nested keys are
    /// ignored (forward compatibility), missing keys fall back to
    /// `Default::default()` (backward compatibility). Manual-spot
    /// coordinates in a loaded preset are treated as already being in the
    /// post-rotation canvas (DESIGN.md Open Question 1) — detecting and
    /// migrating older pre-rotation presets is left to the `EditStore`
    /// boundary, out of scope here.
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_fields_are_ignored() {
        let text = r#"{"version": 1, "config": {"exposure": {"grade": 3.0, "bogus_field": 42}}, "also_bogus": true}"#;
        let preset = Preset::from_json(text).expect("lenient parse");
        assert!((preset.config.exposure.grade - 3.0).abs() < 1e-6);
    }

    #[test]
    fn missing_fields_fall_back_to_default() {
        let text = r#"{"version": 1, "config": {}}"#;
        let preset = Preset::from_json(text).expect("lenient parse");
        assert_eq!(preset.config.toning.black_and_white, WorkspaceConfig::default().toning.black_and_white);
    }

    #[test]
    fn round_trips() {
        let preset = Preset::new(WorkspaceConfig::default());
        let text = preset.to_json().unwrap();
        let back = Preset::from_json(&text).unwrap();
        assert_eq!(back.version, preset.version);
    }
}
