use regex::Regex;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Badging {
    pub package_name: Option<String>,
    pub version_code: Option<i64>,
    pub version_name: Option<String>,
    pub min_sdk_version: Option<i32>,
    pub target_sdk_version: Option<i32>,
    pub application_label: Option<String>,
    pub launchable_activity: Option<String>,
}

fn quoted_attr(line: &str, name: &str) -> Option<String> {
    let pattern = format!(r"\b{}='([^']*)'", regex::escape(name));
    let re = Regex::new(&pattern).ok()?;
    re.captures(line)
        .and_then(|caps| caps.get(1))
        .map(|value| value.as_str().to_string())
        .filter(|value| !value.is_empty())
}

fn single_quoted_value(line: &str) -> Option<String> {
    line.split('\'')
        .nth(1)
        .map(str::to_string)
        .filter(|value| !value.is_empty())
}

/// Parses `aapt dump badging <apk>`.
pub fn parse_badging(output: &str) -> Badging {
    let mut badging = Badging::default();
    for line in output.lines().map(str::trim) {
        if let Some(rest) = line.strip_prefix("package:") {
            badging.package_name = quoted_attr(rest, "name");
            badging.version_code = quoted_attr(rest, "versionCode").and_then(|v| v.parse().ok());
            badging.version_name = quoted_attr(rest, "versionName");
        } else if line.starts_with("sdkVersion:") {
            badging.min_sdk_version = single_quoted_value(line).and_then(|v| v.parse().ok());
        } else if line.starts_with("targetSdkVersion:") {
            badging.target_sdk_version = single_quoted_value(line).and_then(|v| v.parse().ok());
        } else if line.starts_with("application-label:") {
            badging.application_label = single_quoted_value(line);
        } else if line.starts_with("application:") && badging.application_label.is_none() {
            badging.application_label = quoted_attr(line, "label");
        } else if let Some(rest) = line.strip_prefix("launchable-activity:") {
            if badging.launchable_activity.is_none() {
                badging.launchable_activity = quoted_attr(rest, "name");
            }
        }
    }
    badging
}
