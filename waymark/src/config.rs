//! User configuration, read from `~/.config/waymark/config.toml`.
//!
//! Every key is optional. The file is read before logging is set up, so
//! problems are reported on stderr and never abort the program.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use waymark_core::EngineOptions;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// SQLite database of committed locations. Relative paths are taken
    /// from the repository root.
    pub database: PathBuf,
    /// Directory under each repository root holding the uncommitted store.
    pub local_dir: String,
    /// Default `tracing` filter when `RUST_LOG` is unset.
    pub log: String,
    pub max_history_hops: usize,
    /// Commit watcher period.
    pub poll_interval_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        let engine = EngineOptions::default();
        Self {
            database: PathBuf::from(&engine.local_dir).join("locations.db"),
            local_dir: engine.local_dir,
            log: "info".to_owned(),
            max_history_hops: engine.max_history_hops,
            poll_interval_ms: 1000,
        }
    }
}

impl Config {
    /// Loads [`config_path`]; see [`Config::load_from`].
    pub fn load() -> Self {
        Self::load_from(&config_path())
    }

    /// Reads `path`. Returns defaults if the file does not exist or cannot
    /// be parsed. Never panics; parse errors are printed to stderr.
    pub fn load_from(path: &Path) -> Self {
        let raw = match std::fs::read_to_string(path) {
            Ok(s) => s,
            Err(_) => return Self::default(),
        };
        match toml::from_str(&raw) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("waymark: config parse error in {:?}: {}", path, e);
                Self::default()
            }
        }
    }

    /// Location of the database for the repository at `repo_root`.
    pub fn database_path(&self, repo_root: &Path) -> PathBuf {
        if self.database.is_absolute() {
            self.database.clone()
        } else {
            repo_root.join(&self.database)
        }
    }

    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            max_history_hops: self.max_history_hops,
            local_dir: self.local_dir.clone(),
        }
    }
}

/// Returns the path to the waymark config file.
///
/// Prefers `$XDG_CONFIG_HOME/waymark/config.toml`; falls back to
/// `~/.config/waymark/config.toml` when the env var is absent.
pub fn config_path() -> PathBuf {
    let base = std::env::var("XDG_CONFIG_HOME")
        .ok()
        .map(PathBuf::from)
        .or_else(|| {
            std::env::var("HOME")
                .ok()
                .map(|h| PathBuf::from(h).join(".config"))
        })
        .unwrap_or_else(|| PathBuf::from(".config"));
    base.join("waymark").join("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = Config::load_from(&dir.path().join("absent.toml"));
        assert_eq!(config, Config::default());
        assert_eq!(config.database, PathBuf::from(".waymark/locations.db"));
        assert_eq!(config.max_history_hops, 64);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "database = \"/var/lib/waymark.db\"\npoll_interval_ms = 250\n").unwrap();

        let config = Config::load_from(&path);
        assert_eq!(config.poll_interval_ms, 250);
        assert_eq!(config.local_dir, ".waymark");
        assert_eq!(config.database_path(Path::new("/repo")), PathBuf::from("/var/lib/waymark.db"));
    }

    #[test]
    fn relative_database_lives_under_the_repository() {
        let config = Config::default();
        assert_eq!(
            config.database_path(Path::new("/repo")),
            PathBuf::from("/repo/.waymark/locations.db")
        );
    }

    #[test]
    fn unparsable_file_falls_back() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "max_history_hops = \"many\"").unwrap();
        assert_eq!(Config::load_from(&path), Config::default());
    }
}
