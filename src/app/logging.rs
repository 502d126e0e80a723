use std::fs::{self, OpenOptions};
use std::path::PathBuf;
use std::sync::Mutex;

use tracing_subscriber::EnvFilter;

use crate::app::config::LoggingSettings;

pub const LOG_FILE_NAME: &str = "adbtools.log";

fn filter_for(settings: &LoggingSettings) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.log_level.to_lowercase()))
}

pub fn init_logging(settings: &LoggingSettings, log_dir: Option<PathBuf>) {
    if settings.log_to_file {
        if let Some(dir) = log_dir {
            let opened = fs::create_dir_all(&dir).and_then(|_| {
                OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(dir.join(LOG_FILE_NAME))
            });
            if let Ok(file) = opened {
                let _ = tracing_subscriber::fmt()
                    .with_env_filter(filter_for(settings))
                    .json()
                    .with_target(false)
                    .with_writer(Mutex::new(file))
                    .try_init();
                return;
            }
        }
    }

    let env_filter = filter_for(settings);
    if cfg!(debug_assertions) {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .try_init();
    } else {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .json()
            .with_target(false)
            .with_writer(std::io::stderr)
            .try_init();
    }
}
