use serde::Serialize;
use std::fmt;

pub const ERR_VALIDATION: &str = "ERR_VALIDATION";
pub const ERR_DEPENDENCY: &str = "ERR_DEPENDENCY";
pub const ERR_SYSTEM: &str = "ERR_SYSTEM";
pub const ERR_TIMEOUT: &str = "ERR_TIMEOUT";
pub const ERR_DEVICE_NOT_FOUND: &str = "ERR_DEVICE_NOT_FOUND";
pub const ERR_CANCELLED: &str = "ERR_CANCELLED";

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct AppError {
    pub error: String,
    pub code: String,
    pub trace_id: String,
}

impl AppError {
    pub fn new(code: impl Into<String>, message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self {
            error: message.into(),
            code: code.into(),
            trace_id: trace_id.into(),
        }
    }

    pub fn validation(message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self::new(ERR_VALIDATION, message, trace_id)
    }

    pub fn dependency(message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self::new(ERR_DEPENDENCY, message, trace_id)
    }

    pub fn system(message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self::new(ERR_SYSTEM, message, trace_id)
    }

    pub fn timeout(message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self::new(ERR_TIMEOUT, message, trace_id)
    }

    pub fn device_not_found(serial: &str, trace_id: impl Into<String>) -> Self {
        Self::new(
            ERR_DEVICE_NOT_FOUND,
            format!("Device {serial} is not connected. Refresh the device list and try again."),
            trace_id,
        )
    }

    pub fn cancelled(trace_id: impl Into<String>) -> Self {
        Self::new(ERR_CANCELLED, "Operation cancelled", trace_id)
    }

    pub fn is_code(&self, code: &str) -> bool {
        self.code == code
    }

    /// Text shown to the user at the worker boundary.
    pub fn user_message(&self) -> String {
        match self.code.as_str() {
            ERR_TIMEOUT => format!("Timed out: {}", self.error),
            ERR_CANCELLED => "Cancelled".to_string(),
            _ => self.error.clone(),
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.error, self.code)
    }
}

impl std::error::Error for AppError {}
