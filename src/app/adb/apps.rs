use regex::Regex;

use crate::app::models::{AppInfo, AppVersion};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageEntry {
    pub package_name: String,
    pub apk_path: Option<String>,
    pub is_system: bool,
}

/// Parses `pm list packages [-f]`. With `-f` each line is `package:<apk path>=<name>`.
pub fn parse_pm_list_packages_output(output: &str) -> Vec<PackageEntry> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| {
            let payload = line.strip_prefix("package:").unwrap_or(line);
            match payload.rsplit_once('=') {
                Some((apk_path, package)) => {
                    let package = package.trim();
                    if package.is_empty() {
                        return None;
                    }
                    let apk_path = apk_path.trim().to_string();
                    Some(PackageEntry {
                        package_name: package.to_string(),
                        is_system: is_system_path(&apk_path),
                        apk_path: Some(apk_path),
                    })
                }
                None => Some(PackageEntry {
                    package_name: payload.trim().to_string(),
                    apk_path: None,
                    is_system: false,
                }),
            }
        })
        .collect()
}

pub fn parse_dumpsys_version_name(output: &str) -> Option<String> {
    output.lines().map(str::trim).find_map(|line| {
        let (_, tail) = line
            .split_once("versionName=")
            .or_else(|| line.split_once("versionName:"))?;
        let value = tail.trim().trim_matches(['"', '\'']);
        (!value.is_empty()).then(|| value.to_string())
    })
}

pub fn parse_dumpsys_version_code(output: &str) -> Option<String> {
    output.lines().map(str::trim).find_map(|line| {
        let (_, tail) = line
            .split_once("versionCode=")
            .or_else(|| line.split_once("versionCode:"))?;
        tail.split_whitespace().next().map(str::to_string)
    })
}

pub fn build_app_version(package_name: &str, dumpsys_output: &str) -> Option<AppVersion> {
    let version_name = parse_dumpsys_version_name(dumpsys_output);
    let version_code = parse_dumpsys_version_code(dumpsys_output);
    if version_name.is_none() && version_code.is_none() {
        return None;
    }
    Some(AppVersion {
        package_name: package_name.to_string(),
        version_name,
        version_code,
    })
}

pub fn package_entry_to_app_info(entry: PackageEntry) -> AppInfo {
    AppInfo {
        package_name: entry.package_name,
        version_name: None,
        version_code: None,
        is_system: entry.is_system,
        apk_path: entry.apk_path,
    }
}

/// Extracts `package/activity` from the `mCurrentFocus` (or `mFocusedApp`) line of
/// `dumpsys window`.
pub fn parse_current_activity(output: &str) -> Option<String> {
    let re = Regex::new(r"([A-Za-z0-9_.]+/[A-Za-z0-9_.$]+)").ok()?;
    ["mCurrentFocus", "mFocusedApp"].iter().find_map(|marker| {
        output
            .lines()
            .filter(|line| line.contains(marker))
            .find_map(|line| re.captures(line).map(|caps| caps[1].to_string()))
    })
}

pub fn is_valid_package_name(value: &str) -> bool {
    let trimmed = value.trim();
    !trimmed.is_empty()
        && trimmed.contains('.')
        && trimmed
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '.' || ch == '_')
}

fn is_system_path(path: &str) -> bool {
    ["/system/", "/product/", "/vendor/", "/system_ext/", "/apex/"]
        .iter()
        .any(|prefix| path.starts_with(prefix))
}
