use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppSettings {
    pub config_path: Option<PathBuf>,
    pub once: bool,
    pub spread: bool,
    pub namespace: Option<String>,
    pub metrics_file: Option<PathBuf>,
    pub export_interval: Duration,
    pub log_level: String,
    pub json: bool,
}
