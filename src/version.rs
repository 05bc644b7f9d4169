//! One-shot startup version check.
//!
//! A `version.json` next to the executable names the local version and an
//! optional endpoint that serves the latest one. The check is informational:
//! every failure counts as "up to date".

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};
use ureq::Agent;

use crate::error::{MacroError, Result};

pub const VERSION_FILE_NAME: &str = "version.json";
pub const DEFAULT_UPDATE_URL: &str = "https://github.com/macro-pulse/macro-pulse/releases";
const HTTP_TIMEOUT: Duration = Duration::from_millis(3500);

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct VersionInfo {
    #[serde(default = "unknown_version")]
    pub version: String,
    #[serde(default)]
    pub version_checker: String,
    #[serde(default = "default_update_url")]
    pub update_url: String,
}

impl Default for VersionInfo {
    fn default() -> Self {
        Self {
            version: unknown_version(),
            version_checker: String::new(),
            update_url: default_update_url(),
        }
    }
}

impl VersionInfo {
    /// Read `version.json` from `dir`, falling back to defaults when it is
    /// missing or unreadable.
    pub fn read_from_dir(dir: &Path) -> Self {
        let path = dir.join(VERSION_FILE_NAME);
        let Ok(content) = fs::read_to_string(&path) else {
            return Self::default();
        };
        serde_json::from_str(&content).unwrap_or_else(|e| {
            debug!(path = %path.display(), error = %e, "ignoring malformed version file");
            Self::default()
        })
    }

    /// `version.json` next to the running executable.
    pub fn read_local() -> Self {
        std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Self::read_from_dir))
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateStatus {
    UpToDate,
    Outdated {
        local: String,
        remote: String,
        update_url: String,
    },
}

/// Pull a version string out of whatever the endpoint returned: a bare
/// string, an object's `version` field, or an object's first string value in
/// document order.
pub fn extract_remote_version(payload: &Value) -> Option<String> {
    let version = match payload {
        Value::String(s) => Some(s.as_str()),
        Value::Object(map) => map
            .get("version")
            .and_then(Value::as_str)
            .or_else(|| map.values().find_map(Value::as_str)),
        _ => None,
    }?;

    let version = version.trim();
    (!version.is_empty()).then(|| version.to_string())
}

/// Decide whether `remote` means an update is needed.
pub fn compare(info: &VersionInfo, remote: Option<String>) -> UpdateStatus {
    match remote {
        Some(remote) if remote != info.version.trim() => UpdateStatus::Outdated {
            local: info.version.trim().to_string(),
            remote,
            update_url: info.update_url.clone(),
        },
        _ => UpdateStatus::UpToDate,
    }
}

fn fetch_remote_version(info: &VersionInfo) -> Result<Option<String>> {
    let agent: Agent = Agent::config_builder()
        .timeout_global(Some(HTTP_TIMEOUT))
        .build()
        .into();

    let user_agent = format!("macro-pulse/{}", info.version.trim());
    let resp = agent
        .get(info.version_checker.trim())
        .header("User-Agent", user_agent.as_str())
        .call()
        .map_err(|e| MacroError::update_check(e.to_string()))?;

    let payload: Value = resp
        .into_body()
        .read_json()
        .map_err(|e| MacroError::update_check(e.to_string()))?;

    Ok(extract_remote_version(&payload))
}

/// Blocking check against the configured endpoint.
pub fn check_for_update(info: &VersionInfo) -> UpdateStatus {
    if info.version_checker.trim().is_empty() {
        return UpdateStatus::UpToDate;
    }

    match fetch_remote_version(info) {
        Ok(remote) => compare(info, remote),
        Err(e) => {
            warn!(error = %e, "skipping update check");
            UpdateStatus::UpToDate
        }
    }
}

fn unknown_version() -> String {
    "unknown".to_string()
}

fn default_update_url() -> String {
    DEFAULT_UPDATE_URL.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extract_remote_version() {
        assert_eq!(
            extract_remote_version(&json!(" 1.2.0 ")),
            Some("1.2.0".to_string())
        );
        assert_eq!(
            extract_remote_version(&json!({"name": "x", "version": "2.0"})),
            Some("2.0".to_string())
        );
        assert_eq!(
            extract_remote_version(&json!({"latest": "3.1", "n": 4})),
            Some("3.1".to_string())
        );
        assert_eq!(extract_remote_version(&json!({"n": 4})), None);

        let payload: Value = serde_json::from_str(r#"{"z": "1", "a": "2"}"#).unwrap();
        assert_eq!(extract_remote_version(&payload), Some("1".to_string()));
        assert_eq!(extract_remote_version(&json!(42)), None);
        assert_eq!(extract_remote_version(&json!("  ")), None);
    }

    #[test]
    fn test_compare() {
        let info = VersionInfo {
            version: "1.0.0".into(),
            ..VersionInfo::default()
        };
        assert_eq!(compare(&info, Some("1.0.0".into())), UpdateStatus::UpToDate);
        assert_eq!(compare(&info, None), UpdateStatus::UpToDate);
        assert!(matches!(
            compare(&info, Some("1.1.0".into())),
            UpdateStatus::Outdated { ref remote, .. } if remote == "1.1.0"
        ));
    }

    #[test]
    fn test_no_checker_means_up_to_date() {
        assert_eq!(
            check_for_update(&VersionInfo::default()),
            UpdateStatus::UpToDate
        );
    }

    #[test]
    fn test_read_from_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(VersionInfo::read_from_dir(dir.path()), VersionInfo::default());

        fs::write(
            dir.path().join(VERSION_FILE_NAME),
            r#"{"version": "0.3.1", "version_checker": "https://example.invalid/v.json"}"#,
        )
        .unwrap();
        let info = VersionInfo::read_from_dir(dir.path());
        assert_eq!(info.version, "0.3.1");
        assert_eq!(info.update_url, DEFAULT_UPDATE_URL);

        fs::write(dir.path().join(VERSION_FILE_NAME), "not json").unwrap();
        assert_eq!(VersionInfo::read_from_dir(dir.path()), VersionInfo::default());
    }
}
