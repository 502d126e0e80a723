//! Argument builders for `adb shell input ...`.

pub const DEFAULT_LONG_PRESS_MS: u64 = 3000;

/// Swipe duration derived from distance when the caller does not give one.
pub fn default_swipe_duration(x1: i32, y1: i32, x2: i32, y2: i32) -> u64 {
    let dx = i64::from(x2) - i64::from(x1);
    let dy = i64::from(y2) - i64::from(y1);
    let dist_sq = (dx * dx + dy * dy) as u64;
    (dist_sq / 1000).clamp(1000, 2000)
}

fn validate_point(x: i32, y: i32) -> Result<(), String> {
    if x < 0 || y < 0 {
        return Err(format!("Coordinates must be non-negative, got ({x}, {y})"));
    }
    Ok(())
}

pub fn tap_args(x: i32, y: i32) -> Result<Vec<String>, String> {
    validate_point(x, y)?;
    Ok(vec![
        "shell".to_string(),
        "input".to_string(),
        "tap".to_string(),
        x.to_string(),
        y.to_string(),
    ])
}

pub fn swipe_args(
    x1: i32,
    y1: i32,
    x2: i32,
    y2: i32,
    duration_ms: Option<u64>,
) -> Result<Vec<String>, String> {
    validate_point(x1, y1)?;
    validate_point(x2, y2)?;
    let duration = duration_ms.unwrap_or_else(|| default_swipe_duration(x1, y1, x2, y2));
    Ok([
        "shell".to_string(),
        "input".to_string(),
        "swipe".to_string(),
    ]
    .into_iter()
    .chain([x1, y1, x2, y2].iter().map(i32::to_string))
    .chain(std::iter::once(duration.to_string()))
    .collect())
}

/// A long press is a zero-distance swipe.
pub fn long_press_args(x: i32, y: i32, duration_ms: Option<u64>) -> Result<Vec<String>, String> {
    swipe_args(x, y, x, y, Some(duration_ms.unwrap_or(DEFAULT_LONG_PRESS_MS)))
}

/// Accepts a numeric key code, a full `KEYCODE_*` name, or a short alias such as `home`.
pub fn resolve_key_code(key: &str) -> Result<String, String> {
    let trimmed = key.trim();
    if trimmed.is_empty() {
        return Err("key is required".to_string());
    }
    if trimmed.chars().all(|ch| ch.is_ascii_digit()) {
        return Ok(trimmed.to_string());
    }
    let upper = trimmed.to_uppercase();
    let alias = match upper.as_str() {
        "BACK" => Some("KEYCODE_BACK"),
        "HOME" => Some("KEYCODE_HOME"),
        "MENU" => Some("KEYCODE_MENU"),
        "RECENTS" | "APP_SWITCH" => Some("KEYCODE_APP_SWITCH"),
        "POWER" => Some("KEYCODE_POWER"),
        "ENTER" => Some("KEYCODE_ENTER"),
        "DEL" | "BACKSPACE" => Some("KEYCODE_DEL"),
        "VOLUME_UP" => Some("KEYCODE_VOLUME_UP"),
        "VOLUME_DOWN" => Some("KEYCODE_VOLUME_DOWN"),
        "WAKEUP" => Some("KEYCODE_WAKEUP"),
        "SLEEP" => Some("KEYCODE_SLEEP"),
        _ => None,
    };
    if let Some(code) = alias {
        return Ok(code.to_string());
    }
    let name = if upper.starts_with("KEYCODE_") {
        upper
    } else {
        format!("KEYCODE_{upper}")
    };
    if name
        .chars()
        .all(|ch| ch.is_ascii_uppercase() || ch.is_ascii_digit() || ch == '_')
    {
        Ok(name)
    } else {
        Err(format!("Unsupported key: {trimmed}"))
    }
}

pub fn key_event_args(key: &str) -> Result<Vec<String>, String> {
    let code = resolve_key_code(key)?;
    Ok(vec![
        "shell".to_string(),
        "input".to_string(),
        "keyevent".to_string(),
        code,
    ])
}

/// `input text` treats `%s` as a space and the argument passes through the device shell, so
/// spaces are encoded and shell metacharacters escaped.
pub fn escape_input_text(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len() * 2);
    for ch in text.chars() {
        match ch {
            ' ' => escaped.push_str("%s"),
            '%' => escaped.push_str("\\%"),
            '\\' | '"' | '\'' | '`' | '$' | '&' | '|' | ';' | '<' | '>' | '(' | ')' | '*'
            | '?' | '~' | '#' | '!' | '[' | ']' | '{' | '}' => {
                escaped.push('\\');
                escaped.push(ch);
            }
            _ => escaped.push(ch),
        }
    }
    escaped
}

pub fn input_text_args(text: &str) -> Result<Vec<String>, String> {
    if text.is_empty() {
        return Err("text is required".to_string());
    }
    if text.contains('\n') || text.contains('\r') {
        return Err("text must be a single line; send KEYCODE_ENTER for new lines".to_string());
    }
    Ok(vec![
        "shell".to_string(),
        "input".to_string(),
        "text".to_string(),
        escape_input_text(text),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn swipe_duration_is_clamped() {
        assert_eq!(default_swipe_duration(0, 0, 10, 10), 1000);
        // 1200^2 / 1000 = 1440
        assert_eq!(default_swipe_duration(0, 0, 0, 1200), 1440);
        assert_eq!(default_swipe_duration(0, 0, 2000, 2000), 2000);
    }

    #[test]
    fn builds_input_arguments() {
        assert_eq!(
            tap_args(100, 200).expect("tap"),
            vec!["shell", "input", "tap", "100", "200"]
        );
        assert_eq!(
            swipe_args(1, 2, 3, 4, Some(300)).expect("swipe"),
            vec!["shell", "input", "swipe", "1", "2", "3", "4", "300"]
        );
        assert_eq!(
            long_press_args(5, 6, None).expect("press"),
            vec!["shell", "input", "swipe", "5", "6", "5", "6", "3000"]
        );
        assert!(tap_args(-1, 0).is_err());
    }

    #[test]
    fn resolves_key_codes() {
        assert_eq!(resolve_key_code("4").as_deref(), Ok("4"));
        assert_eq!(resolve_key_code("home").as_deref(), Ok("KEYCODE_HOME"));
        assert_eq!(resolve_key_code("KEYCODE_CAMERA").as_deref(), Ok("KEYCODE_CAMERA"));
        assert_eq!(resolve_key_code("tab").as_deref(), Ok("KEYCODE_TAB"));
        assert!(resolve_key_code("rm -rf").is_err());
        assert!(resolve_key_code(" ").is_err());
    }

    #[test]
    fn escapes_input_text() {
        assert_eq!(escape_input_text("hello world"), "hello%sworld");
        assert_eq!(escape_input_text("a&b;c"), "a\\&b\\;c");
        assert_eq!(escape_input_text("50%"), "50\\%");
        assert_eq!(escape_input_text("it's"), "it\\'s");
        assert!(input_text_args("").is_err());
        assert!(input_text_args("two\nlines").is_err());
    }
}
