use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use zip::ZipArchive;

use crate::app::adb::aapt::Badging;
use crate::app::models::ApkInfo;

/// Extracted split APKs. The files live as long as `temp_dir`.
pub struct SplitApkBundle {
    pub apk_paths: Vec<String>,
    pub temp_dir: TempDir,
}

impl SplitApkBundle {
    pub fn base_apk(&self) -> Option<&str> {
        self.apk_paths.first().map(String::as_str)
    }

    pub fn dir(&self) -> &Path {
        self.temp_dir.path()
    }
}

pub fn is_split_bundle(path: &str) -> bool {
    let lower = path.to_lowercase();
    lower.ends_with(".apks") || lower.ends_with(".xapk")
}

pub fn extract_split_apks(path: &str) -> Result<SplitApkBundle, String> {
    let file = File::open(path).map_err(|err| format!("Failed to open bundle: {err}"))?;
    let mut archive = ZipArchive::new(file).map_err(|err| format!("Invalid bundle: {err}"))?;
    let temp_dir = TempDir::new().map_err(|err| format!("Failed to create temp dir: {err}"))?;
    let mut extracted = Vec::new();

    for index in 0..archive.len() {
        let mut entry = archive
            .by_index(index)
            .map_err(|err| format!("Failed to read bundle: {err}"))?;
        let name = entry.name().to_string();
        if !name.to_lowercase().ends_with(".apk") {
            continue;
        }
        let file_name = Path::new(&name)
            .file_name()
            .map(|value| value.to_string_lossy().to_string())
            .ok_or_else(|| format!("Invalid apk name in bundle: {name}"))?;
        let target = temp_dir.path().join(file_name);
        let mut output =
            File::create(&target).map_err(|err| format!("Failed to extract apk: {err}"))?;
        io::copy(&mut entry, &mut output).map_err(|err| format!("Failed to write apk: {err}"))?;
        extracted.push(target.to_string_lossy().to_string());
    }

    if extracted.is_empty() {
        return Err("Bundle does not contain any .apk entries".to_string());
    }

    // install-multiple wants the base APK first.
    extracted.sort_by_key(|path| {
        let name = Path::new(path)
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("")
            .to_lowercase();
        (!name.contains("base"), name)
    });

    Ok(SplitApkBundle {
        apk_paths: extracted,
        temp_dir,
    })
}

/// File-level inspection. Package metadata is filled in later from aapt when available.
pub fn get_apk_info(path: &str) -> ApkInfo {
    let mut info = ApkInfo {
        path: path.to_string(),
        package_name: None,
        version_code: None,
        version_name: None,
        min_sdk_version: None,
        target_sdk_version: None,
        application_label: None,
        launchable_activity: None,
        is_split_apk: is_split_bundle(path),
        split_apk_paths: Vec::new(),
        file_size_bytes: 0,
        error: None,
    };

    let path_obj = Path::new(path);
    if !path_obj.is_file() {
        info.error = Some(format!("File not found: {path}"));
        return info;
    }
    if let Ok(metadata) = fs::metadata(path_obj) {
        info.file_size_bytes = metadata.len();
    }

    match File::open(path_obj) {
        Ok(file) => match ZipArchive::new(file) {
            Ok(archive) if info.is_split_apk => {
                info.split_apk_paths = archive
                    .file_names()
                    .filter(|name| name.to_lowercase().ends_with(".apk"))
                    .map(str::to_string)
                    .collect();
                info.split_apk_paths.sort();
            }
            Ok(_) => {}
            Err(err) => info.error = Some(format!("Invalid APK: {err}")),
        },
        Err(err) => info.error = Some(format!("Failed to open APK: {err}")),
    }

    info
}

pub fn apply_badging(info: &mut ApkInfo, badging: Badging) {
    info.package_name = badging.package_name.or(info.package_name.take());
    info.version_code = badging.version_code;
    info.version_name = badging.version_name;
    info.min_sdk_version = badging.min_sdk_version;
    info.target_sdk_version = badging.target_sdk_version;
    info.application_label = badging.application_label;
    info.launchable_activity = badging.launchable_activity;
}

pub fn normalize_apk_path(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::FileOptions;

    fn write_bundle(path: &Path, entries: &[(&str, &[u8])]) {
        let file = File::create(path).expect("bundle");
        let mut zip = zip::ZipWriter::new(file);
        for (name, body) in entries {
            zip.start_file(*name, FileOptions::<()>::default()).expect("start");
            zip.write_all(body).expect("write");
        }
        zip.finish().expect("finish");
    }

    #[test]
    fn extracts_split_apks_base_first() {
        let tmp = TempDir::new().expect("tmp");
        let bundle_path = tmp.path().join("bundle.apks");
        write_bundle(
            &bundle_path,
            &[
                ("splits/config.arm64_v8a.apk", b"abi"),
                ("splits/base-master.apk", b"base"),
                ("toc.pb", b"toc"),
            ],
        );

        let bundle = extract_split_apks(bundle_path.to_str().expect("utf8")).expect("extract");
        assert_eq!(bundle.apk_paths.len(), 2);
        assert!(bundle.base_apk().expect("base").ends_with("base-master.apk"));
        assert!(bundle.dir().join("config.arm64_v8a.apk").exists());
    }

    #[test]
    fn rejects_bundle_without_apks() {
        let tmp = TempDir::new().expect("tmp");
        let bundle_path = tmp.path().join("empty.xapk");
        write_bundle(&bundle_path, &[("manifest.json", b"{}")]);
        assert!(extract_split_apks(bundle_path.to_str().expect("utf8")).is_err());
    }

    #[test]
    fn inspects_files_and_applies_badging() {
        let tmp = TempDir::new().expect("tmp");
        let missing = get_apk_info(tmp.path().join("none.apk").to_str().expect("utf8"));
        assert!(missing.error.is_some());

        let apk = tmp.path().join("app.apk");
        write_bundle(&apk, &[("AndroidManifest.xml", b"x")]);
        let mut info = get_apk_info(apk.to_str().expect("utf8"));
        assert!(info.error.is_none());
        assert!(!info.is_split_apk);
        assert!(info.file_size_bytes > 0);
        assert!(info.package_name.is_none());

        apply_badging(
            &mut info,
            Badging {
                package_name: Some("com.example".to_string()),
                version_code: Some(7),
                ..Badging::default()
            },
        );
        assert_eq!(info.package_name.as_deref(), Some("com.example"));
        assert_eq!(info.version_code, Some(7));

        let not_zip = tmp.path().join("broken.apk");
        fs::write(&not_zip, b"nope").expect("write");
        assert!(get_apk_info(not_zip.to_str().expect("utf8"))
            .error
            .expect("error")
            .starts_with("Invalid APK"));
    }

    #[test]
    fn lists_bundle_entries() {
        let tmp = TempDir::new().expect("tmp");
        let bundle_path = tmp.path().join("bundle.xapk");
        write_bundle(&bundle_path, &[("b.apk", b"b"), ("a.apk", b"a")]);
        let info = get_apk_info(bundle_path.to_str().expect("utf8"));
        assert!(info.is_split_apk);
        assert_eq!(info.split_apk_paths, vec!["a.apk", "b.apk"]);
    }
}
