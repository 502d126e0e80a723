use std::path::Path;

pub fn normalize_command_path(value: &str) -> String {
    let trimmed = value.trim();
    for quote in ['"', '\''] {
        if let Some(inner) = trimmed
            .strip_prefix(quote)
            .and_then(|candidate| candidate.strip_suffix(quote))
        {
            return inner.trim().to_string();
        }
    }
    trimmed.to_string()
}

fn resolve_program(configured: &str, fallback: &str) -> String {
    let normalized = normalize_command_path(configured);
    if normalized.is_empty() {
        fallback.to_string()
    } else {
        normalized
    }
}

pub fn resolve_adb_program(config_command_path: &str) -> String {
    resolve_program(config_command_path, "adb")
}

pub fn resolve_aapt_program(config_aapt_path: &str) -> String {
    resolve_program(config_aapt_path, "aapt")
}

/// Bare program names are left to `PATH` lookup; anything else must be an existing file.
pub fn validate_program(program: &str, label: &str) -> Result<(), String> {
    if program.trim().is_empty() {
        return Err(format!("{label} command is empty"));
    }
    if !program.contains('/') && !program.contains('\\') {
        return Ok(());
    }
    let path = Path::new(program);
    if path.is_dir() {
        return Err(format!("{label} path must point to an executable file"));
    }
    if !path.exists() {
        return Err(format!("{label} executable not found at the configured path"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_wrapping_quotes() {
        assert_eq!(
            normalize_command_path("  \"/opt/android/platform-tools/adb\"  "),
            "/opt/android/platform-tools/adb"
        );
        assert_eq!(
            normalize_command_path("  '/opt/android/build-tools/aapt'  "),
            "/opt/android/build-tools/aapt"
        );
    }

    #[test]
    fn resolves_empty_to_defaults() {
        assert_eq!(resolve_adb_program(""), "adb");
        assert_eq!(resolve_adb_program("   "), "adb");
        assert_eq!(resolve_aapt_program(""), "aapt");
    }

    #[test]
    fn validates_configured_paths() {
        assert!(validate_program("adb", "ADB").is_ok());
        let err = validate_program("/this/path/should/not/exist/adb", "ADB").unwrap_err();
        assert!(err.to_lowercase().contains("not found"));
        let tmp = tempfile::TempDir::new().expect("tmp");
        let dir = tmp.path().to_string_lossy().to_string();
        assert!(validate_program(&dir, "AAPT").unwrap_err().contains("AAPT"));
    }
}
