use chrono::Local;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{info, warn};

use crate::app::error::{AppError, ERR_VALIDATION};

pub const CONFIG_FILE_NAME: &str = "adbtools_config.json";
pub const CONFIG_BACKUP_FILE_NAME: &str = "adbtools_config.backup.json";
pub const BACKUP_DIR_NAME: &str = "adbtools_backups";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AdbSettings {
    pub command_path: String,
    pub aapt_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceSettings {
    pub refresh_interval: i32,
    pub show_offline_devices: bool,
    pub preferred_devices: Vec<String>,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            refresh_interval: 5,
            show_offline_devices: false,
            preferred_devices: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommandSettings {
    pub max_history_size: usize,
    pub auto_save_history: bool,
    pub command_timeout: i32,
    pub root_timeout: i32,
    pub parallel_execution: bool,
}

impl Default for CommandSettings {
    fn default() -> Self {
        Self {
            max_history_size: 50,
            auto_save_history: true,
            command_timeout: 30,
            root_timeout: 10,
            parallel_execution: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingSettings {
    pub log_level: String,
    pub log_to_file: bool,
    pub log_dir: String,
    pub max_log_files: i32,
    pub log_file_size_mb: i32,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            log_level: "INFO".to_string(),
            log_to_file: false,
            log_dir: String::new(),
            max_log_files: 5,
            log_file_size_mb: 5,
        }
    }
}

impl LoggingSettings {
    pub fn resolved_log_dir(&self) -> PathBuf {
        let trimmed = self.log_dir.trim();
        if trimmed.is_empty() {
            default_log_dir()
        } else {
            PathBuf::from(trimmed)
        }
    }

    pub fn max_file_bytes(&self) -> u64 {
        self.log_file_size_mb.max(1) as u64 * 1024 * 1024
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApkInstallSettings {
    pub replace_existing: bool,
    pub allow_downgrade: bool,
    pub grant_permissions: bool,
    pub allow_test_packages: bool,
    pub extra_args: String,
}

impl Default for ApkInstallSettings {
    fn default() -> Self {
        Self {
            replace_existing: true,
            allow_downgrade: true,
            grant_permissions: true,
            allow_test_packages: false,
            extra_args: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScreenshotSettings {
    pub extra_args: String,
    pub display_id: i32,
}

impl Default for ScreenshotSettings {
    fn default() -> Self {
        Self {
            extra_args: String::new(),
            display_id: -1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogcatSettings {
    pub default_filter: String,
    pub batch_lines: i32,
    pub batch_interval_ms: i32,
}

impl Default for LogcatSettings {
    fn default() -> Self {
        Self {
            default_filter: String::new(),
            batch_lines: 50,
            batch_interval_ms: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackupSettings {
    pub enabled: bool,
    pub interval_minutes: i32,
    pub max_backups: i32,
}

impl Default for BackupSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_minutes: 60,
            max_backups: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UpdateSettings {
    pub manifest_url: String,
    pub check_on_startup: bool,
    pub timeout_secs: i32,
}

impl Default for UpdateSettings {
    fn default() -> Self {
        Self {
            manifest_url: String::new(),
            check_on_startup: false,
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub adb: AdbSettings,
    #[serde(default)]
    pub device: DeviceSettings,
    #[serde(default)]
    pub command: CommandSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
    #[serde(default)]
    pub apk_install: ApkInstallSettings,
    #[serde(default)]
    pub screenshot: ScreenshotSettings,
    #[serde(default)]
    pub logcat: LogcatSettings,
    #[serde(default)]
    pub backup: BackupSettings,
    #[serde(default)]
    pub update: UpdateSettings,
    #[serde(default)]
    pub command_history: Vec<String>,
    #[serde(default)]
    pub output_path: String,
    #[serde(default)]
    pub version: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            adb: AdbSettings::default(),
            device: DeviceSettings::default(),
            command: CommandSettings::default(),
            logging: LoggingSettings::default(),
            apk_install: ApkInstallSettings::default(),
            screenshot: ScreenshotSettings::default(),
            logcat: LogcatSettings::default(),
            backup: BackupSettings::default(),
            update: UpdateSettings::default(),
            command_history: Vec::new(),
            output_path: String::new(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl AppConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command.command_timeout.max(1) as u64)
    }

    pub fn root_timeout(&self) -> Duration {
        Duration::from_secs(self.command.root_timeout.max(1) as u64)
    }

    pub fn output_dir(&self) -> PathBuf {
        let trimmed = self.output_path.trim();
        if trimmed.is_empty() {
            std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
        } else {
            PathBuf::from(trimmed)
        }
    }

    /// Appends a shell command to the history, skipping a repeat of the last entry.
    pub fn push_history(&mut self, command: &str) -> bool {
        let command = command.trim();
        if command.is_empty() {
            return false;
        }
        if self.command_history.last().map(|last| last == command).unwrap_or(false) {
            return false;
        }
        self.command_history.push(command.to_string());
        let max = self.command.max_history_size.max(1);
        if self.command_history.len() > max {
            let start = self.command_history.len() - max;
            self.command_history = self.command_history.split_off(start);
        }
        true
    }
}

pub fn config_path() -> PathBuf {
    if let Ok(path) = std::env::var("ADBTOOLS_CONFIG_PATH") {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(CONFIG_FILE_NAME)
}

pub fn default_log_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("adbtools")
        .join("logs")
}

fn sibling(path: &Path, name: &str) -> PathBuf {
    path.parent()
        .map(|parent| parent.join(name))
        .unwrap_or_else(|| PathBuf::from(name))
}

pub fn backup_config_path(path: &Path) -> PathBuf {
    sibling(path, CONFIG_BACKUP_FILE_NAME)
}

pub fn backups_dir(path: &Path) -> PathBuf {
    sibling(path, BACKUP_DIR_NAME)
}

fn default_tree() -> Value {
    serde_json::to_value(AppConfig::default()).unwrap_or(Value::Object(Map::new()))
}

/// Recursively overlays `overlay` onto `base`. Objects merge key by key, anything else replaces.
pub fn merge_json(base: &mut Value, overlay: &Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(key) {
                    Some(existing) => merge_json(existing, value),
                    None => {
                        base_map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (base, overlay) => *base = overlay.clone(),
    }
}

fn split_key<'a>(key: &'a str, trace_id: &str) -> Result<Vec<&'a str>, AppError> {
    let trimmed = key.trim();
    if trimmed.is_empty() {
        return Err(AppError::validation("config key is required", trace_id));
    }
    let segments: Vec<&str> = trimmed.split('.').collect();
    if segments.iter().any(|segment| segment.trim().is_empty()) {
        return Err(AppError::validation(
            format!("Invalid config key: {key}"),
            trace_id,
        ));
    }
    Ok(segments)
}

pub fn lookup_path<'a>(tree: &'a Value, key: &str) -> Option<&'a Value> {
    let mut current = tree;
    for segment in key.trim().split('.') {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

fn assign_path(tree: &mut Value, segments: &[&str], value: Value, trace_id: &str) -> Result<(), AppError> {
    let Some((last, parents)) = segments.split_last() else {
        return Err(AppError::validation("config key is required", trace_id));
    };
    let mut current = tree;
    for segment in parents {
        let map = current.as_object_mut().ok_or_else(|| {
            AppError::validation(
                format!("Cannot set below non-object value at '{segment}'"),
                trace_id,
            )
        })?;
        current = map
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
    let map = current.as_object_mut().ok_or_else(|| {
        AppError::validation(format!("Cannot set '{last}' on a non-object value"), trace_id)
    })?;
    map.insert(last.to_string(), value);
    Ok(())
}

fn remove_path(tree: &mut Value, segments: &[&str]) -> Option<Value> {
    let (last, parents) = segments.split_last()?;
    let mut current = tree;
    for segment in parents {
        current = current.as_object_mut()?.get_mut(*segment)?;
    }
    current.as_object_mut()?.remove(*last)
}

fn apply_legacy_overrides(tree: &mut Value) {
    let Some(map) = tree.as_object_mut() else {
        return;
    };
    let legacy_adb = map.remove("adb_path");
    let legacy_refresh = map.remove("refresh_interval");
    let legacy_timeout = map.remove("command_timeout");
    if let Some(path) = legacy_adb.as_ref().and_then(|v| v.as_str()) {
        if let Some(adb) = map.get_mut("adb").and_then(|v| v.as_object_mut()) {
            adb.insert("command_path".to_string(), Value::String(path.to_string()));
        }
    }
    if let Some(refresh) = legacy_refresh.as_ref().and_then(|v| v.as_i64()) {
        if let Some(device) = map.get_mut("device").and_then(|v| v.as_object_mut()) {
            device.insert("refresh_interval".to_string(), Value::from(refresh));
        }
    }
    if let Some(timeout) = legacy_timeout.as_ref().and_then(|v| v.as_i64()) {
        if let Some(command) = map.get_mut("command").and_then(|v| v.as_object_mut()) {
            command.insert("command_timeout".to_string(), Value::from(timeout));
        }
    }
}

fn validate_config(mut config: AppConfig) -> AppConfig {
    let defaults = AppConfig::default();
    if config.device.refresh_interval < 1 {
        config.device.refresh_interval = defaults.device.refresh_interval;
    }
    if config.command.command_timeout < 1 {
        config.command.command_timeout = defaults.command.command_timeout;
    }
    if config.command.root_timeout < 1 {
        config.command.root_timeout = defaults.command.root_timeout;
    }
    if config.command.max_history_size == 0 {
        config.command.max_history_size = defaults.command.max_history_size;
    }
    if config.logging.max_log_files < 1 {
        config.logging.max_log_files = defaults.logging.max_log_files;
    }
    if config.logging.log_file_size_mb < 1 {
        config.logging.log_file_size_mb = defaults.logging.log_file_size_mb;
    }
    if config.logcat.batch_lines < 1 {
        config.logcat.batch_lines = defaults.logcat.batch_lines;
    }
    if config.logcat.batch_interval_ms < 20 {
        config.logcat.batch_interval_ms = defaults.logcat.batch_interval_ms;
    }
    if config.backup.interval_minutes < 1 {
        config.backup.interval_minutes = defaults.backup.interval_minutes;
    }
    if config.backup.max_backups < 1 {
        config.backup.max_backups = defaults.backup.max_backups;
    }
    if config.update.timeout_secs < 1 {
        config.update.timeout_secs = defaults.update.timeout_secs;
    }
    config
}

pub fn normalize_config_for_save(mut config: AppConfig) -> AppConfig {
    config.adb.command_path = config.adb.command_path.trim().to_string();
    config.adb.aapt_path = config.adb.aapt_path.trim().to_string();
    config.output_path = config.output_path.trim().to_string();
    let max = config.command.max_history_size.max(1);
    if config.command_history.len() > max {
        let start = config.command_history.len() - max;
        config.command_history = config.command_history.split_off(start);
    }
    validate_config(config)
}

fn read_tree(path: &Path, trace_id: &str) -> Result<Value, AppError> {
    let mut tree = default_tree();
    if !path.exists() {
        return Ok(tree);
    }
    let raw = fs::read_to_string(path)
        .map_err(|err| AppError::system(format!("Failed to read config: {err}"), trace_id))?;
    if raw.trim().is_empty() {
        return Ok(tree);
    }
    let loaded: Value = serde_json::from_str(&raw)
        .map_err(|err| AppError::validation(format!("Failed to parse config: {err}"), trace_id))?;
    if !loaded.is_object() {
        return Err(AppError::validation("Config root must be a JSON object", trace_id));
    }
    merge_json(&mut tree, &loaded);
    apply_legacy_overrides(&mut tree);
    let reset = repair_tree(&mut tree);
    if !reset.is_empty() {
        warn!(
            trace_id = %trace_id,
            path = %path.display(),
            keys = %reset.join(", "),
            "config values of the wrong type were reset to defaults"
        );
    }
    Ok(tree)
}

/// Replaces every known value that does not fit its typed field with the compiled default.
/// Returns the dotted keys that were reset. Unknown keys are left alone.
fn repair_tree(tree: &mut Value) -> Vec<String> {
    let defaults = default_tree();
    let mut reset = Vec::new();
    repair_node(tree, &defaults, &defaults, &mut Vec::new(), &mut reset);
    reset
}

fn repair_node(
    node: &mut Value,
    default: &Value,
    defaults: &Value,
    path: &mut Vec<String>,
    reset: &mut Vec<String>,
) {
    let (Some(map), Some(default_map)) = (node.as_object_mut(), default.as_object()) else {
        return;
    };
    for (key, default_value) in default_map {
        let Some(value) = map.get_mut(key) else {
            continue;
        };
        path.push(key.clone());
        if default_value.is_object() && value.is_object() {
            repair_node(value, default_value, defaults, path, reset);
        } else if default_value.is_object() || !leaf_fits(defaults, path, value) {
            *value = default_value.clone();
            reset.push(path.join("."));
        }
        path.pop();
    }
}

/// Whether `value` deserializes at `path` when every other field holds its default.
fn leaf_fits(defaults: &Value, path: &[String], value: &Value) -> bool {
    let mut candidate = defaults.clone();
    let mut current = &mut candidate;
    for segment in path {
        match current.get_mut(segment.as_str()) {
            Some(next) => current = next,
            None => return true,
        }
    }
    *current = value.clone();
    serde_json::from_value::<AppConfig>(candidate).is_ok()
}

/// Typed snapshot of `tree`. Removed keys read as defaults and wrong-typed values are reset one
/// by one, so a single bad value never hides the rest.
fn typed_view(tree: &Value) -> AppConfig {
    if let Ok(config) = serde_json::from_value::<AppConfig>(tree.clone()) {
        return validate_config(config);
    }
    let mut merged = default_tree();
    merge_json(&mut merged, tree);
    repair_tree(&mut merged);
    serde_json::from_value::<AppConfig>(merged)
        .map(validate_config)
        .unwrap_or_default()
}

/// Keeps an unreadable config beside the original before it is replaced by defaults.
fn set_aside_corrupt(path: &Path, trace_id: &str) -> Option<PathBuf> {
    let target = path.with_extension("corrupt.json");
    match fs::copy(path, &target) {
        Ok(_) => Some(target),
        Err(err) => {
            warn!(trace_id = %trace_id, error = %err, "failed to keep corrupt config copy");
            None
        }
    }
}

/// JSON-backed settings tree addressed with dotted paths, persisted on every mutation.
pub struct SettingsStore {
    path: PathBuf,
    tree: Value,
}

impl SettingsStore {
    pub fn open(path: impl Into<PathBuf>, trace_id: &str) -> Result<Self, AppError> {
        let path = path.into();
        let tree = match read_tree(&path, trace_id) {
            Ok(tree) => tree,
            Err(err) if err.is_code(ERR_VALIDATION) => {
                let kept = set_aside_corrupt(&path, trace_id);
                warn!(
                    trace_id = %trace_id,
                    path = %path.display(),
                    kept = ?kept,
                    error = %err,
                    "config is unreadable; starting from defaults"
                );
                default_tree()
            }
            Err(err) => return Err(err),
        };
        Ok(Self { path, tree })
    }

    pub fn open_default(trace_id: &str) -> Result<Self, AppError> {
        Self::open(config_path(), trace_id)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn tree(&self) -> &Value {
        &self.tree
    }

    pub fn config(&self) -> AppConfig {
        typed_view(&self.tree)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        lookup_path(&self.tree, key)
    }

    /// Like `get`, but falls back to the compiled default when the key was removed from the tree.
    pub fn get_or_default(&self, key: &str) -> Option<Value> {
        self.get(key)
            .cloned()
            .or_else(|| lookup_path(&default_tree(), key).cloned())
    }

    pub fn set(&mut self, key: &str, value: Value, trace_id: &str) -> Result<(), AppError> {
        let segments = split_key(key, trace_id)?;
        let mut candidate = self.tree.clone();
        assign_path(&mut candidate, &segments, value, trace_id)?;
        let dotted = segments.join(".");
        let nested = format!("{dotted}.");
        let mut checked = default_tree();
        merge_json(&mut checked, &candidate);
        if repair_tree(&mut checked)
            .iter()
            .any(|reset| *reset == dotted || reset.starts_with(&nested))
        {
            return Err(AppError::validation(
                format!("Value for '{key}' does not match the expected type"),
                trace_id,
            ));
        }
        self.tree = candidate;
        self.save(trace_id)
    }

    pub fn remove(&mut self, key: &str, trace_id: &str) -> Result<Option<Value>, AppError> {
        let segments = split_key(key, trace_id)?;
        let removed = remove_path(&mut self.tree, &segments);
        if removed.is_some() {
            self.save(trace_id)?;
        }
        Ok(removed)
    }

    pub fn update(
        &mut self,
        mutate: impl FnOnce(&mut AppConfig),
        trace_id: &str,
    ) -> Result<AppConfig, AppError> {
        let mut config = self.config();
        mutate(&mut config);
        let config = normalize_config_for_save(config);
        let value = serde_json::to_value(&config).map_err(|err| {
            AppError::system(format!("Failed to serialize config: {err}"), trace_id)
        })?;
        merge_json(&mut self.tree, &value);
        self.save(trace_id)?;
        Ok(config)
    }

    pub fn reset(&mut self, trace_id: &str) -> Result<AppConfig, AppError> {
        self.tree = default_tree();
        self.save(trace_id)?;
        Ok(self.config())
    }

    pub fn save(&self, trace_id: &str) -> Result<(), AppError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|err| {
                    AppError::system(format!("Failed to create config dir: {err}"), trace_id)
                })?;
            }
        }
        if self.path.exists() {
            if let Err(err) = fs::copy(&self.path, backup_config_path(&self.path)) {
                warn!(trace_id = %trace_id, error = %err, "failed to keep previous config copy");
            }
        }
        let payload = serde_json::to_string_pretty(&self.tree).map_err(|err| {
            AppError::system(format!("Failed to serialize config: {err}"), trace_id)
        })?;
        fs::write(&self.path, payload)
            .map_err(|err| AppError::system(format!("Failed to write config: {err}"), trace_id))
    }

    pub fn backups_dir(&self) -> PathBuf {
        backups_dir(&self.path)
    }

    /// Backup files, oldest first.
    pub fn list_backups(&self) -> Vec<PathBuf> {
        let mut files = fs::read_dir(self.backups_dir())
            .map(|entries| {
                entries
                    .filter_map(|entry| entry.ok())
                    .map(|entry| entry.path())
                    .filter(|path| {
                        path.extension().map(|ext| ext == "json").unwrap_or(false)
                    })
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        files.sort();
        files
    }

    pub fn backup_now(&self, trace_id: &str) -> Result<PathBuf, AppError> {
        if !self.path.exists() {
            self.save(trace_id)?;
        }
        let dir = self.backups_dir();
        fs::create_dir_all(&dir).map_err(|err| {
            AppError::system(format!("Failed to create backup dir: {err}"), trace_id)
        })?;
        let stamp = Local::now().format("%Y%m%d_%H%M%S_%3f");
        let target = dir.join(format!("adbtools_config_{stamp}.json"));
        fs::copy(&self.path, &target)
            .map_err(|err| AppError::system(format!("Failed to back up config: {err}"), trace_id))?;

        let max = self.config().backup.max_backups.max(1) as usize;
        let backups = self.list_backups();
        if backups.len() > max {
            for stale in &backups[..backups.len() - max] {
                if let Err(err) = fs::remove_file(stale) {
                    warn!(trace_id = %trace_id, error = %err, path = %stale.display(), "failed to prune backup");
                }
            }
        }
        info!(trace_id = %trace_id, path = %target.display(), "config backed up");
        Ok(target)
    }

    /// Backs up only when backups are enabled and the newest one is older than the interval.
    pub fn maybe_backup(&self, trace_id: &str) -> Result<Option<PathBuf>, AppError> {
        let config = self.config();
        if !config.backup.enabled {
            return Ok(None);
        }
        let interval = Duration::from_secs(config.backup.interval_minutes.max(1) as u64 * 60);
        let newest_age = self
            .list_backups()
            .last()
            .and_then(|path| fs::metadata(path).ok())
            .and_then(|meta| meta.modified().ok())
            .and_then(|modified| SystemTime::now().duration_since(modified).ok());
        match newest_age {
            Some(age) if age < interval => Ok(None),
            _ => self.backup_now(trace_id).map(Some),
        }
    }

    pub fn restore_backup(&mut self, name: &str, trace_id: &str) -> Result<AppConfig, AppError> {
        let file_name = Path::new(name)
            .file_name()
            .ok_or_else(|| AppError::validation("backup name is required", trace_id))?;
        let source = self.backups_dir().join(file_name);
        if !source.is_file() {
            return Err(AppError::validation(
                format!("Backup not found: {}", source.display()),
                trace_id,
            ));
        }
        self.tree = read_tree(&source, trace_id)?;
        self.save(trace_id)?;
        Ok(self.config())
    }
}
