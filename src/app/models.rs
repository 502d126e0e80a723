use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceSummary {
    pub serial: String,
    pub state: String,
    pub model: Option<String>,
    pub product: Option<String>,
    pub device: Option<String>,
    pub transport_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceDetail {
    pub serial: String,
    pub manufacturer: Option<String>,
    pub brand: Option<String>,
    pub model: Option<String>,
    pub device: Option<String>,
    pub android_version: Option<String>,
    pub api_level: Option<String>,
    pub battery_level: Option<u8>,
    pub build_fingerprint: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceInfo {
    pub summary: DeviceSummary,
    pub detail: Option<DeviceDetail>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceFileEntry {
    pub name: String,
    pub path: String,
    pub is_dir: bool,
    pub size_bytes: Option<u64>,
    pub modified_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommandResult {
    pub serial: String,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AdbInfo {
    pub available: bool,
    pub aapt_available: bool,
    pub version_output: String,
    pub command_path: String,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommandResponse<T> {
    pub trace_id: String,
    pub data: T,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppVersion {
    pub package_name: String,
    pub version_name: Option<String>,
    pub version_code: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppInfo {
    pub package_name: String,
    pub version_name: Option<String>,
    pub version_code: Option<String>,
    pub is_system: bool,
    pub apk_path: Option<String>,
}

/// Outcome of one `adb install`, keyed by the marker the package manager prints.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ApkInstallErrorCode {
    Success,
    InstallFailedAlreadyExists,
    InstallFailedUpdateIncompatible,
    InstallFailedDuplicatePackage,
    InstallFailedOlderSdk,
    InstallFailedNewerSdk,
    InstallFailedVersionDowngrade,
    InstallFailedInsufficientStorage,
    InstallFailedMediaUnavailable,
    InstallFailedUserRestricted,
    InstallFailedVerificationFailure,
    InstallParseFailedNotApk,
    InstallParseFailedBadManifest,
    InstallParseFailedNoCertificates,
    InstallParseFailedInconsistentCertificates,
    InstallFailedInvalidApk,
    InstallFailedAborted,
    InstallFailedNoMatchingAbis,
    InstallFailedTestOnly,
    UnknownError,
}

use ApkInstallErrorCode as Code;

/// Failure markers in match order, with the text shown to the user.
const INSTALL_FAILURES: &[(Code, &str, &str)] = &[
    (Code::InstallFailedAlreadyExists, "INSTALL_FAILED_ALREADY_EXISTS", "Installed with a different signature"),
    (Code::InstallFailedUpdateIncompatible, "INSTALL_FAILED_UPDATE_INCOMPATIBLE", "Update is incompatible with the installed app"),
    (Code::InstallFailedDuplicatePackage, "INSTALL_FAILED_DUPLICATE_PACKAGE", "Package already present"),
    (Code::InstallFailedOlderSdk, "INSTALL_FAILED_OLDER_SDK", "Android version on the device is too old"),
    (Code::InstallFailedNewerSdk, "INSTALL_FAILED_NEWER_SDK", "APK targets an older Android version"),
    (Code::InstallFailedVersionDowngrade, "INSTALL_FAILED_VERSION_DOWNGRADE", "Downgrade refused; allow downgrade or uninstall first"),
    (Code::InstallFailedInsufficientStorage, "INSTALL_FAILED_INSUFFICIENT_STORAGE", "Device storage is full"),
    (Code::InstallFailedMediaUnavailable, "INSTALL_FAILED_MEDIA_UNAVAILABLE", "Storage media unavailable"),
    (Code::InstallFailedUserRestricted, "INSTALL_FAILED_USER_RESTRICTED", "Installs are restricted for this user"),
    (Code::InstallFailedVerificationFailure, "INSTALL_FAILED_VERIFICATION_FAILURE", "Package verification failed"),
    (Code::InstallParseFailedNotApk, "INSTALL_PARSE_FAILED_NOT_APK", "Not an APK"),
    (Code::InstallParseFailedBadManifest, "INSTALL_PARSE_FAILED_BAD_MANIFEST", "AndroidManifest.xml is invalid"),
    (Code::InstallParseFailedNoCertificates, "INSTALL_PARSE_FAILED_NO_CERTIFICATES", "APK is unsigned"),
    (Code::InstallParseFailedInconsistentCertificates, "INSTALL_PARSE_FAILED_INCONSISTENT_CERTIFICATES", "Signature differs from the installed app"),
    (Code::InstallFailedInvalidApk, "INSTALL_FAILED_INVALID_APK", "APK is corrupt or invalid"),
    (Code::InstallFailedAborted, "INSTALL_FAILED_ABORTED", "Install aborted"),
    (Code::InstallFailedNoMatchingAbis, "INSTALL_FAILED_NO_MATCHING_ABIS", "No native libraries for this CPU"),
    (Code::InstallFailedTestOnly, "INSTALL_FAILED_TEST_ONLY", "Test-only APK; allow test packages"),
];

impl ApkInstallErrorCode {
    pub fn code(&self) -> &'static str {
        match self {
            Code::Success => "SUCCESS",
            Code::UnknownError => "UNKNOWN_ERROR",
            other => INSTALL_FAILURES
                .iter()
                .find(|(code, _, _)| code == other)
                .map(|(_, marker, _)| *marker)
                .unwrap_or("UNKNOWN_ERROR"),
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Code::Success => "Installed",
            Code::UnknownError => "Install failed for an unrecognized reason",
            other => INSTALL_FAILURES
                .iter()
                .find(|(code, _, _)| code == other)
                .map(|(_, _, text)| *text)
                .unwrap_or("Install failed for an unrecognized reason"),
        }
    }

    /// `Success` wins over any failure marker; empty or unrecognized output is `UnknownError`.
    pub fn from_output(output: &str) -> Self {
        let upper = output.to_uppercase();
        if upper.contains("SUCCESS") {
            return Code::Success;
        }
        INSTALL_FAILURES
            .iter()
            .find(|(_, marker, _)| upper.contains(*marker))
            .map(|(code, _, _)| *code)
            .unwrap_or(Code::UnknownError)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApkInfo {
    pub path: String,
    pub package_name: Option<String>,
    pub version_code: Option<i64>,
    pub version_name: Option<String>,
    pub min_sdk_version: Option<i32>,
    pub target_sdk_version: Option<i32>,
    pub application_label: Option<String>,
    pub launchable_activity: Option<String>,
    pub is_split_apk: bool,
    pub split_apk_paths: Vec<String>,
    pub file_size_bytes: u64,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApkInstallResult {
    pub serial: String,
    pub success: bool,
    pub error_code: ApkInstallErrorCode,
    pub raw_output: String,
    pub duration_seconds: f64,
    pub device_model: Option<String>,
}

impl ApkInstallResult {
    pub fn error_message(&self) -> String {
        if self.success {
            String::new()
        } else {
            self.error_code.description().to_string()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApkBatchInstallResult {
    pub apk_path: String,
    pub apk_info: Option<ApkInfo>,
    pub results: HashMap<String, ApkInstallResult>,
    pub total_duration_seconds: f64,
}

impl ApkBatchInstallResult {
    pub fn successful_count(&self) -> usize {
        self.results.values().filter(|item| item.success).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_apk_error_code() {
        let output = "Failure [INSTALL_FAILED_VERSION_DOWNGRADE]";
        let code = ApkInstallErrorCode::from_output(output);
        assert_eq!(code, ApkInstallErrorCode::InstallFailedVersionDowngrade);
    }

    #[test]
    fn streamed_install_success_and_unknown_failures() {
        let ok = ApkInstallErrorCode::from_output("Performing Streamed Install\nSuccess\n");
        assert_eq!(ok, ApkInstallErrorCode::Success);
        assert_eq!(
            ApkInstallErrorCode::from_output("adb: failed to install x.apk"),
            ApkInstallErrorCode::UnknownError
        );
        assert_eq!(ApkInstallErrorCode::from_output(""), ApkInstallErrorCode::UnknownError);
    }

    #[test]
    fn batch_counts_successes() {
        let mut results = HashMap::new();
        for (serial, success) in [("A", true), ("B", false)] {
            results.insert(
                serial.to_string(),
                ApkInstallResult {
                    serial: serial.to_string(),
                    success,
                    error_code: if success {
                        ApkInstallErrorCode::Success
                    } else {
                        ApkInstallErrorCode::InstallFailedOlderSdk
                    },
                    raw_output: String::new(),
                    duration_seconds: 0.1,
                    device_model: None,
                },
            );
        }
        let batch = ApkBatchInstallResult {
            apk_path: "app.apk".to_string(),
            apk_info: None,
            results,
            total_duration_seconds: 0.2,
        };
        assert_eq!(batch.successful_count(), 1);
        assert_eq!(
            batch.results["B"].error_message(),
            "Android version on the device is too old"
        );
    }
}
