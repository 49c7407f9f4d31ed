use mailparse::MailHeaderMap;
use serde::{Deserialize, Serialize};

/// Raw, platform-independent dependency metadata of one distribution.
/// Markers are kept verbatim; they are evaluated per scenario, not per cache entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistMetadata {
    pub requires_dist: Vec<String>,
    #[serde(default)]
    pub provides_extra: Vec<String>,
    #[serde(default)]
    pub requires_python: Option<String>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum MetadataError {
    #[error("[RB301] unreadable archive: {0}")]
    Archive(String),
    #[error("[RB302] no .dist-info/METADATA found in {0}")]
    Missing(String),
    #[error("[RB303] malformed metadata: {0}")]
    Malformed(String),
}

impl MetadataError {
    pub fn code(&self) -> &'static str {
        match self {
            MetadataError::Archive(_) => "RB301",
            MetadataError::Missing(_) => "RB302",
            MetadataError::Malformed(_) => "RB303",
        }
    }
}

impl DistMetadata {
    /// Parses a core metadata (`METADATA`/`PKG-INFO`) document.
    pub fn from_core_metadata(bytes: &[u8]) -> Result<Self, MetadataError> {
        let (headers, _) = mailparse::parse_headers(bytes)
            .map_err(|err| MetadataError::Malformed(err.to_string()))?;
        if headers.get_first_value("Name").is_none() {
            return Err(MetadataError::Malformed("missing `Name` header".into()));
        }
        let known = |value: &String| !value.trim().is_empty() && value.trim() != "UNKNOWN";
        Ok(Self {
            requires_dist: headers
                .get_all_values("Requires-Dist")
                .into_iter()
                .filter(known)
                .map(|value| value.trim().to_string())
                .collect(),
            provides_extra: headers
                .get_all_values("Provides-Extra")
                .into_iter()
                .filter(known)
                .map(|value| value.trim().to_string())
                .collect(),
            requires_python: headers
                .get_first_value("Requires-Python")
                .filter(known)
                .map(|value| value.trim().to_string()),
        })
    }

    /// Reads the first install entry of a `pip install --report` document.
    pub fn from_pip_report(bytes: &[u8]) -> Result<Self, MetadataError> {
        let report: PipReport = serde_json::from_slice(bytes)
            .map_err(|err| MetadataError::Malformed(format!("pip report: {err}")))?;
        let entry = report
            .install
            .into_iter()
            .next()
            .ok_or_else(|| MetadataError::Malformed("pip report lists no installs".into()))?;
        Ok(Self {
            requires_dist: entry.metadata.requires_dist,
            provides_extra: entry.metadata.provides_extra,
            requires_python: entry.metadata.requires_python,
        })
    }
}

#[derive(Debug, Deserialize)]
struct PipReport {
    #[serde(default)]
    install: Vec<PipInstall>,
}

#[derive(Debug, Deserialize)]
struct PipInstall {
    metadata: PipMetadata,
}

#[derive(Debug, Deserialize)]
struct PipMetadata {
    #[serde(default)]
    requires_dist: Vec<String>,
    #[serde(default)]
    provides_extra: Vec<String>,
    #[serde(default)]
    requires_python: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    const METADATA: &str = "Metadata-Version: 2.1\n\
Name: pkg-a\n\
Version: 1.0\n\
Requires-Python: >=3.8\n\
Requires-Dist: pkg-b>=2.0\n\
Requires-Dist: colorama; sys_platform == \"win32\"\n\
Requires-Dist: pytest; extra == \"test\"\n\
Provides-Extra: test\n\
\n\
Long description body mentioning Requires-Dist: nothing\n";

    #[test]
    fn parses_headers_and_ignores_body() -> Result<(), MetadataError> {
        let parsed = DistMetadata::from_core_metadata(METADATA.as_bytes())?;
        assert_eq!(
            parsed.requires_dist,
            vec![
                "pkg-b>=2.0",
                "colorama; sys_platform == \"win32\"",
                "pytest; extra == \"test\""
            ]
        );
        assert_eq!(parsed.provides_extra, vec!["test"]);
        assert_eq!(parsed.requires_python.as_deref(), Some(">=3.8"));
        Ok(())
    }

    #[test]
    fn unknown_values_are_dropped() -> Result<(), MetadataError> {
        let parsed = DistMetadata::from_core_metadata(
            b"Metadata-Version: 1.0\nName: legacy\nRequires-Python: UNKNOWN\n\n",
        )?;
        assert!(parsed.requires_dist.is_empty());
        assert_eq!(parsed.requires_python, None);
        Ok(())
    }

    #[test]
    fn missing_name_is_malformed() {
        let err = DistMetadata::from_core_metadata(b"Metadata-Version: 2.1\n\n").expect_err("name");
        assert_eq!(err.code(), "RB303");
    }

    #[test]
    fn reads_pip_report() -> Result<(), MetadataError> {
        let report = br#"{
            "version": "1",
            "install": [{
                "download_info": {"url": "file:///work/pkg_b-2.1.tar.gz"},
                "metadata": {
                    "name": "pkg-b",
                    "version": "2.1",
                    "requires_dist": ["six>=1.0"],
                    "requires_python": ">=3.7"
                }
            }]
        }"#;
        let parsed = DistMetadata::from_pip_report(report)?;
        assert_eq!(parsed.requires_dist, vec!["six>=1.0"]);
        assert!(parsed.provides_extra.is_empty());
        assert_eq!(parsed.requires_python.as_deref(), Some(">=3.7"));
        Ok(())
    }

    #[test]
    fn empty_pip_report_is_malformed() {
        assert!(DistMetadata::from_pip_report(br#"{"install": []}"#).is_err());
    }
}
