use crate::config::{ConfigError, ProbesFile};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

const CONFIG_FILE_NAME: &str = "probes.json";

fn config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("prober"))
}

/// `<config dir>/prober/probes.json`, when the platform has a config dir.
pub fn default_config_path() -> Option<PathBuf> {
    config_dir().map(|p| p.join(CONFIG_FILE_NAME))
}

/// Reads and validates a probe definitions file.
pub fn load(path: &Path) -> Result<ProbesFile, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let file: ProbesFile =
        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
    file.validate()?;
    Ok(file)
}

/// Replaces `path` with `content` via a sibling temp file and a rename, so
/// readers never observe a half-written file.
pub fn write_atomic(path: &Path, content: &str) -> io::Result<()> {
    let mut tmp_name = path
        .file_name()
        .map(|name| name.to_os_string())
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"))?;
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);

    if let Some(dir) = path.parent()
        && !dir.as_os_str().is_empty()
        && !dir.exists()
    {
        fs::create_dir_all(dir)?;
    }
    fs::write(&tmp_path, content)?;
    fs::rename(&tmp_path, path)
}
