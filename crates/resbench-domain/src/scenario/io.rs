use std::fs;
use std::path::{Path, PathBuf};

use super::Scenario;

#[derive(Debug, thiserror::Error)]
pub enum ScenarioError {
    #[error("[RB401] failed to read scenario {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("[RB402] malformed scenario document: {0}")]
    Parse(#[source] serde_json::Error),
    #[error("[RB403] invalid scenario: {location}: {reason}")]
    Invalid { location: String, reason: String },
    #[error("[RB404] failed to serialize scenario: {0}")]
    Serialize(#[source] serde_json::Error),
    #[error("[RB405] failed to write scenario {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ScenarioError {
    pub fn code(&self) -> &'static str {
        match self {
            ScenarioError::Read { .. } => "RB401",
            ScenarioError::Parse(_) => "RB402",
            ScenarioError::Invalid { .. } => "RB403",
            ScenarioError::Serialize(_) => "RB404",
            ScenarioError::Write { .. } => "RB405",
        }
    }

    pub(crate) fn invalid(location: impl Into<String>, reason: impl Into<String>) -> Self {
        ScenarioError::Invalid {
            location: location.into(),
            reason: reason.into(),
        }
    }
}

impl Scenario {
    /// Pretty JSON with a trailing newline. Key order is fixed by the model, so
    /// equal scenarios always render to identical bytes.
    pub fn to_json(&self) -> Result<String, ScenarioError> {
        let mut rendered = serde_json::to_string_pretty(self).map_err(ScenarioError::Serialize)?;
        rendered.push('\n');
        Ok(rendered)
    }

    /// Parses and validates a document. Nothing is returned unless the whole
    /// document is well formed.
    pub fn from_json(contents: &str) -> Result<Self, ScenarioError> {
        let scenario: Scenario = serde_json::from_str(contents).map_err(ScenarioError::Parse)?;
        scenario.validate()?;
        Ok(scenario)
    }
}

pub fn load_scenario(path: &Path) -> Result<Scenario, ScenarioError> {
    let contents = fs::read_to_string(path).map_err(|source| ScenarioError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    Scenario::from_json(&contents)
}

pub fn save_scenario(path: &Path, scenario: &Scenario) -> Result<(), ScenarioError> {
    let rendered = scenario.to_json()?;
    let write_err = |source| ScenarioError::Write {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(write_err)?;
    }
    fs::write(path, rendered).map_err(write_err)
}

#[cfg(test)]
mod tests {
    use super::super::fixtures::pkg_scenario;
    use super::*;
    use anyhow::Result;

    #[test]
    fn round_trip_is_exact() -> Result<()> {
        let scenario = pkg_scenario();
        let rendered = scenario.to_json()?;
        let parsed = Scenario::from_json(&rendered)?;
        assert_eq!(parsed, scenario);
        assert_eq!(parsed.to_json()?, rendered);
        Ok(())
    }

    #[test]
    fn document_uses_kebab_case_outcomes() -> Result<()> {
        let rendered = pkg_scenario().to_json()?;
        assert!(rendered.contains("\"skipped-sdist-not-allowed\""));
        assert!(rendered.contains("\"generated_at\": \"2024-03-01T12:30:00Z\""));
        assert!(rendered.ends_with('\n'));
        assert!(!rendered.contains("\"extras\""), "empty extras are omitted");
        Ok(())
    }

    #[test]
    fn versions_keep_document_order() -> Result<()> {
        let rendered = pkg_scenario().to_json()?;
        let first = rendered.find("\"2.0\"").expect("2.0 present");
        let second = rendered.find("\"2.1\"").expect("2.1 present");
        assert!(first < second);
        Ok(())
    }

    #[test]
    fn unknown_fields_are_rejected_at_every_level() -> Result<()> {
        let mut value: serde_json::Value = serde_json::from_str(&pkg_scenario().to_json()?)?;
        value["comment"] = serde_json::json!("extra");
        let err = Scenario::from_json(&value.to_string()).expect_err("top-level extra");
        assert_eq!(err.code(), "RB402");

        let mut value: serde_json::Value = serde_json::from_str(&pkg_scenario().to_json()?)?;
        value["packages"]["pkg-b"]["versions"]["2.0"]["yanked"] = serde_json::json!(true);
        let err = Scenario::from_json(&value.to_string()).expect_err("nested extra");
        assert!(err.to_string().contains("yanked"), "{err}");
        Ok(())
    }

    #[test]
    fn truncated_document_is_structural_error() {
        let err = Scenario::from_json("{\"root_requirements\": [").expect_err("truncated");
        assert!(matches!(err, ScenarioError::Parse(_)));
    }

    #[test]
    fn save_and_load_through_disk() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("scenarios").join("pkg-a-1.json");
        save_scenario(&path, &pkg_scenario())?;
        assert_eq!(load_scenario(&path)?, pkg_scenario());
        Ok(())
    }

    #[test]
    fn missing_file_reports_path() {
        let err = load_scenario(Path::new("/nonexistent/scenario.json")).expect_err("missing");
        assert_eq!(err.code(), "RB401");
        assert!(err.to_string().contains("/nonexistent/scenario.json"));
    }
}
