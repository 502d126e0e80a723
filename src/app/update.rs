use std::cmp::Ordering;
use std::fs;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::app::config::UpdateSettings;
use crate::app::error::AppError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateManifest {
    pub version: String,
    #[serde(default)]
    pub download_url: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateCheck {
    pub current_version: String,
    pub latest_version: String,
    pub update_available: bool,
    pub download_url: Option<String>,
    pub notes: Option<String>,
}

/// Dotted numeric components. A leading `v` is ignored, as is any pre-release or build suffix
/// on a component (`1.2.3-beta` reads as `1.2.3`).
pub fn parse_version(value: &str) -> Option<Vec<u64>> {
    let trimmed = value.trim();
    let trimmed = trimmed
        .strip_prefix('v')
        .or_else(|| trimmed.strip_prefix('V'))
        .unwrap_or(trimmed);
    if trimmed.is_empty() {
        return None;
    }
    trimmed
        .split('.')
        .map(|part| {
            let digits: String = part.chars().take_while(char::is_ascii_digit).collect();
            digits.parse::<u64>().ok()
        })
        .collect()
}

/// Missing components compare as zero, so `1.2` equals `1.2.0`.
pub fn compare_versions(left: &str, right: &str) -> Option<Ordering> {
    let left = parse_version(left)?;
    let right = parse_version(right)?;
    let len = left.len().max(right.len());
    for index in 0..len {
        let a = left.get(index).copied().unwrap_or(0);
        let b = right.get(index).copied().unwrap_or(0);
        match a.cmp(&b) {
            Ordering::Equal => continue,
            other => return Some(other),
        }
    }
    Some(Ordering::Equal)
}

fn read_manifest_body(url: &str, timeout: Duration, trace_id: &str) -> Result<String, AppError> {
    if let Some(path) = url.strip_prefix("file://") {
        return fs::read_to_string(path).map_err(|err| {
            AppError::dependency(format!("Failed to read update manifest: {err}"), trace_id)
        });
    }
    let client = reqwest::blocking::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("adbtools/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|err| AppError::system(format!("Failed to build HTTP client: {err}"), trace_id))?;
    let response = client.get(url).send().map_err(|err| {
        if err.is_timeout() {
            AppError::timeout(format!("Update check timed out: {err}"), trace_id)
        } else {
            AppError::dependency(format!("Update check failed: {err}"), trace_id)
        }
    })?;
    let status = response.status();
    if !status.is_success() {
        return Err(AppError::dependency(
            format!("Update server returned {status}"),
            trace_id,
        ));
    }
    response
        .text()
        .map_err(|err| AppError::dependency(format!("Failed to read update manifest: {err}"), trace_id))
}

pub fn fetch_manifest(
    url: &str,
    timeout: Duration,
    trace_id: &str,
) -> Result<UpdateManifest, AppError> {
    let body = read_manifest_body(url, timeout, trace_id)?;
    serde_json::from_str(&body)
        .map_err(|err| AppError::dependency(format!("Invalid update manifest: {err}"), trace_id))
}

pub fn evaluate(current_version: &str, manifest: UpdateManifest, trace_id: &str) -> Result<UpdateCheck, AppError> {
    let ordering = compare_versions(&manifest.version, current_version).ok_or_else(|| {
        AppError::validation(
            format!(
                "Cannot compare versions '{}' and '{}'",
                manifest.version, current_version
            ),
            trace_id,
        )
    })?;
    Ok(UpdateCheck {
        current_version: current_version.to_string(),
        latest_version: manifest.version,
        update_available: ordering == Ordering::Greater,
        download_url: manifest.download_url,
        notes: manifest.notes,
    })
}

pub fn check_for_update(
    settings: &UpdateSettings,
    current_version: &str,
    trace_id: &str,
) -> Result<UpdateCheck, AppError> {
    let url = settings.manifest_url.trim();
    if url.is_empty() {
        return Err(AppError::validation(
            "update.manifest_url is not configured",
            trace_id,
        ));
    }
    let timeout = Duration::from_secs(settings.timeout_secs.max(1) as u64);
    let manifest = fetch_manifest(url, timeout, trace_id)?;
    let check = evaluate(current_version, manifest, trace_id)?;
    info!(
        trace_id = %trace_id,
        current = %check.current_version,
        latest = %check.latest_version,
        update_available = check.update_available,
        "update check finished"
    );
    Ok(check)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn compares_dotted_versions() {
        assert_eq!(compare_versions("1.2.10", "1.2.9"), Some(Ordering::Greater));
        assert_eq!(compare_versions("v1.2", "1.2.0"), Some(Ordering::Equal));
        assert_eq!(compare_versions("0.9", "1.0"), Some(Ordering::Less));
        assert_eq!(compare_versions("2.0.0-beta", "1.9.9"), Some(Ordering::Greater));
        assert_eq!(compare_versions("latest", "1.0"), None);
        assert_eq!(compare_versions("", "1.0"), None);
    }

    #[test]
    fn evaluates_manifest() {
        let manifest = UpdateManifest {
            version: "0.4.0".to_string(),
            download_url: Some("https://example.invalid/adbtools-0.4.0.zip".to_string()),
            notes: None,
        };
        let check = evaluate("0.3.0", manifest.clone(), "t").expect("check");
        assert!(check.update_available);
        assert_eq!(check.latest_version, "0.4.0");
        assert!(!evaluate("0.4.0", manifest, "t").expect("same").update_available);
    }

    #[test]
    fn reads_file_manifest_and_rejects_missing_url() {
        let dir = TempDir::new().expect("tmp");
        let path = dir.path().join("latest.json");
        fs::write(&path, r#"{"version":"v9.0.1","notes":"big"}"#).expect("write");
        let settings = UpdateSettings {
            manifest_url: format!("file://{}", path.display()),
            ..UpdateSettings::default()
        };
        let check = check_for_update(&settings, "0.3.0", "t").expect("check");
        assert!(check.update_available);
        assert_eq!(check.notes.as_deref(), Some("big"));
        assert_eq!(check.download_url, None);

        let empty = UpdateSettings {
            manifest_url: String::new(),
            ..UpdateSettings::default()
        };
        assert_eq!(
            check_for_update(&empty, "0.3.0", "t").expect_err("unset").code,
            "ERR_VALIDATION"
        );

        fs::write(&path, "not json").expect("write");
        assert_eq!(
            check_for_update(&settings, "0.3.0", "t").expect_err("bad").code,
            "ERR_DEPENDENCY"
        );
    }
}
