pub mod adb;
pub mod commands;
pub mod config;
pub mod devices;
pub mod diagnostics;
pub mod dispatcher;
pub mod error;
pub mod log_sink;
pub mod logging;
pub mod models;
pub mod scheduler;
pub mod state;
pub mod update;
