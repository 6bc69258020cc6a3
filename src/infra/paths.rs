// src/infra/paths.rs — Config and data locations
//
// All paths respect the HABITUS_HOME environment variable for isolation.
// When HABITUS_HOME is set, config and data live under that directory.
// When unset, config uses ~/.habitus/ and data uses XDG_DATA_HOME/habitus.

use std::path::PathBuf;

fn habitus_home() -> Option<PathBuf> {
    std::env::var_os("HABITUS_HOME").map(PathBuf::from)
}

fn home_dir() -> PathBuf {
    directories::BaseDirs::new()
        .map(|d| d.home_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Configuration directory: $HABITUS_HOME/ or ~/.habitus/
pub fn config_dir() -> PathBuf {
    if let Some(home) = habitus_home() {
        return home;
    }
    home_dir().join(".habitus")
}

/// Data directory: $HABITUS_HOME/data/ or the platform data dir.
pub fn data_dir() -> PathBuf {
    if let Some(home) = habitus_home() {
        return home.join("data");
    }
    directories::ProjectDirs::from("", "", "habitus")
        .map(|d| d.data_local_dir().to_path_buf())
        .unwrap_or_else(|| config_dir().join("data"))
}

pub fn config_file_path() -> PathBuf {
    config_dir().join("config.toml")
}

pub fn db_path() -> PathBuf {
    data_dir().join("habitus.db")
}

/// Create the data directory if needed.
pub fn ensure_data_dir() -> std::io::Result<PathBuf> {
    let dir = data_dir();
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}
