use std::collections::HashMap;

use regex::Regex;

use crate::app::models::{DeviceDetail, DeviceFileEntry, DeviceSummary};

/// Parses `adb devices [-l]`. The serial is the first whitespace token of every line that is
/// not blank, a daemon notice (`* daemon started`), or the `List of devices attached` header.
pub fn parse_adb_devices(output: &str) -> Vec<DeviceSummary> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| !line.starts_with('*'))
        .filter(|line| !line.to_lowercase().starts_with("list of devices"))
        .filter_map(|line| {
            let mut tokens = line.split_whitespace();
            let serial = tokens.next()?.to_string();
            let state = tokens.next().unwrap_or("unknown").to_string();
            let mut summary = DeviceSummary {
                serial,
                state,
                model: None,
                product: None,
                device: None,
                transport_id: None,
            };
            for token in tokens {
                if let Some(value) = token.strip_prefix("model:") {
                    summary.model = Some(value.to_string());
                } else if let Some(value) = token.strip_prefix("product:") {
                    summary.product = Some(value.to_string());
                } else if let Some(value) = token.strip_prefix("device:") {
                    summary.device = Some(value.to_string());
                } else if let Some(value) = token.strip_prefix("transport_id:") {
                    summary.transport_id = Some(value.to_string());
                }
            }
            Some(summary)
        })
        .collect()
}

pub fn parse_getprop_map(output: &str) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for line in output.lines() {
        let trimmed = line.trim();
        if !trimmed.starts_with('[') {
            continue;
        }
        let Some((key_part, value_part)) = trimmed.split_once("]: [") else {
            continue;
        };
        let key = key_part.trim_start_matches('[').trim();
        let value = value_part.trim_end_matches(']').trim();
        if !key.is_empty() {
            map.insert(key.to_string(), value.to_string());
        }
    }
    map
}

pub fn build_device_detail(serial: &str, getprop_map: &HashMap<String, String>) -> DeviceDetail {
    let prop = |key: &str| {
        getprop_map
            .get(key)
            .filter(|value| !value.is_empty())
            .cloned()
    };
    DeviceDetail {
        serial: serial.to_string(),
        manufacturer: prop("ro.product.manufacturer"),
        brand: prop("ro.product.brand"),
        model: prop("ro.product.model"),
        device: prop("ro.product.device"),
        android_version: prop("ro.build.version.release"),
        api_level: prop("ro.build.version.sdk"),
        battery_level: None,
        build_fingerprint: prop("ro.build.fingerprint"),
    }
}

pub fn parse_battery_level(output: &str) -> Option<u8> {
    output
        .lines()
        .filter_map(|line| line.trim().strip_prefix("level:"))
        .find_map(|value| value.trim().parse::<u8>().ok())
}

/// Output of `id -u`; some shells print the full `uid=0(root) gid=...` form instead.
pub fn parse_uid(output: &str) -> Option<u32> {
    let line = output.lines().map(str::trim).find(|line| !line.is_empty())?;
    if let Ok(uid) = line.parse::<u32>() {
        return Some(uid);
    }
    let re = Regex::new(r"uid=(\d+)").ok()?;
    re.captures(line)?.get(1)?.as_str().parse().ok()
}

pub fn parse_ls_la(path: &str, output: &str) -> Vec<DeviceFileEntry> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| !line.starts_with("total"))
        .filter_map(|line| {
            let tokens: Vec<&str> = line.split_whitespace().collect();
            if tokens.len() < 7 {
                return None;
            }
            let is_dir = tokens[0].starts_with('d');
            let size_bytes = tokens.get(4).and_then(|value| value.parse::<u64>().ok());
            // toybox prints `2024-01-01 12:00 name`, older busybox `Jan 1 12:00 name`.
            let (modified_at, name_start_index) = if tokens.len() >= 9
                && !tokens[5].contains('-')
            {
                (format!("{} {} {}", tokens[5], tokens[6], tokens[7]), 8usize)
            } else {
                (format!("{} {}", tokens[5], tokens[6]), 7usize)
            };
            let mut name = tokens.get(name_start_index..)?.join(" ");
            if let Some((link_name, _)) = name.split_once(" -> ") {
                name = link_name.to_string();
            }
            if name.is_empty() || name == "." || name == ".." {
                return None;
            }
            Some(DeviceFileEntry {
                path: format!("{}/{}", path.trim_end_matches('/'), name),
                name,
                is_dir,
                size_bytes,
                modified_at: Some(modified_at),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_adb_devices_output() {
        let output = "* daemon not running; starting now at tcp:5037\n* daemon started successfully\nList of devices attached\n0123456789ABCDEF device product:sdk_gphone64_arm64 model:Pixel_7 device:emu64a transport_id:1\nemulator-5554 unauthorized transport_id:2\n\n";
        let parsed = parse_adb_devices(output);
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].serial, "0123456789ABCDEF");
        assert_eq!(parsed[0].state, "device");
        assert_eq!(parsed[0].model.as_deref(), Some("Pixel_7"));
        assert_eq!(parsed[0].transport_id.as_deref(), Some("1"));
        assert_eq!(parsed[1].state, "unauthorized");
    }

    #[test]
    fn serial_is_first_token_of_each_non_header_line() {
        let output = "List of devices attached\nR58M123\tdevice\n192.168.0.5:5555\toffline\nlonely\n";
        let serials: Vec<String> = parse_adb_devices(output)
            .into_iter()
            .map(|item| item.serial)
            .collect();
        assert_eq!(serials, vec!["R58M123", "192.168.0.5:5555", "lonely"]);
        assert_eq!(parse_adb_devices(output)[2].state, "unknown");
        assert!(parse_adb_devices("List of devices attached\n\n").is_empty());
    }

    #[test]
    fn builds_device_detail() {
        let output = "[ro.product.brand]: [google]\n[ro.product.model]: [Pixel 7]\n[ro.build.version.sdk]: [34]\n[ro.product.manufacturer]: []\n";
        let map = parse_getprop_map(output);
        assert_eq!(map.get("ro.product.model").map(String::as_str), Some("Pixel 7"));
        let detail = build_device_detail("ABC", &map);
        assert_eq!(detail.serial, "ABC");
        assert_eq!(detail.brand.as_deref(), Some("google"));
        assert_eq!(detail.api_level.as_deref(), Some("34"));
        assert_eq!(detail.manufacturer, None);
    }

    #[test]
    fn parses_battery_level() {
        let output = "AC powered: false\nlevel: 87\nstatus: 2\n";
        assert_eq!(parse_battery_level(output), Some(87));
        assert_eq!(parse_battery_level("status: 2\n"), None);
    }

    #[test]
    fn parses_uid_forms() {
        assert_eq!(parse_uid("0\n"), Some(0));
        assert_eq!(parse_uid("uid=2000(shell) gid=2000(shell)"), Some(2000));
        assert_eq!(parse_uid(""), None);
    }

    #[test]
    fn parses_ls_la() {
        let output = "total 12\ndrwxr-xr-x 2 root root 4096 2024-01-01 12:00 Download\n-rw-r--r-- 1 root root 123 2024-01-01 12:00 my file.txt\nlrwxrwxrwx 1 root root 21 2024-01-01 12:00 sdcard -> /storage/self/primary\n";
        let entries = parse_ls_la("/sdcard/", output);
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].name, "Download");
        assert!(entries[0].is_dir);
        assert_eq!(entries[1].path, "/sdcard/my file.txt");
        assert_eq!(entries[1].size_bytes, Some(123));
        assert_eq!(entries[2].name, "sdcard");
    }
}
