pub mod aapt;
pub mod apk;
pub mod apps;
pub mod engineering;
pub mod input;
pub mod locator;
pub mod logcat;
pub mod parse;
pub mod paths;
pub mod root;
pub mod runner;
pub mod transfer;
