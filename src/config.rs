use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub git: GitConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// Parent directory of every deployment's working tree.
    #[serde(default = "default_repos_dir")]
    pub repos_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            repos_dir: default_repos_dir(),
        }
    }
}

fn default_repos_dir() -> PathBuf {
    PathBuf::from("./data/repos")
}

#[derive(Debug, Deserialize, Clone)]
pub struct GitConfig {
    #[serde(default = "default_git_binary")]
    pub binary: PathBuf,
    #[serde(default = "default_max_repo_size_mb")]
    pub max_repo_size_mb: u64,
    #[serde(default = "default_watch_interval_ms")]
    pub watch_interval_ms: u64,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            binary: default_git_binary(),
            max_repo_size_mb: default_max_repo_size_mb(),
            watch_interval_ms: default_watch_interval_ms(),
        }
    }
}

impl GitConfig {
    pub fn max_repo_size_bytes(&self) -> u64 {
        self.max_repo_size_mb.saturating_mul(1024 * 1024)
    }

    pub fn watch_interval(&self) -> Duration {
        Duration::from_millis(self.watch_interval_ms)
    }
}

fn default_git_binary() -> PathBuf {
    PathBuf::from("git")
}
fn default_max_repo_size_mb() -> u64 {
    500
}
fn default_watch_interval_ms() -> u64 {
    500
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8085".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    if config.git.max_repo_size_mb == 0 {
        anyhow::bail!("git.max_repo_size_mb must be > 0");
    }

    if config.git.watch_interval_ms == 0 {
        anyhow::bail!("git.watch_interval_ms must be > 0");
    }

    if config.server.bind.trim().is_empty() {
        anyhow::bail!("server.bind must not be empty");
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply() {
        let config = parse_config("[db]\npath = \"./data/wiki.sqlite\"\n").unwrap();
        assert_eq!(config.git.max_repo_size_bytes(), 500 * 1024 * 1024);
        assert_eq!(config.git.watch_interval(), Duration::from_millis(500));
        assert_eq!(config.git.binary, PathBuf::from("git"));
        assert_eq!(config.storage.repos_dir, PathBuf::from("./data/repos"));
        assert_eq!(config.server.bind, "127.0.0.1:8085");
    }

    #[test]
    fn rejects_zero_limits() {
        let err = parse_config("[db]\npath = \"x\"\n[git]\nmax_repo_size_mb = 0\n").unwrap_err();
        assert!(err.to_string().contains("max_repo_size_mb"));
        assert!(parse_config("[db]\npath = \"x\"\n[git]\nwatch_interval_ms = 0\n").is_err());
    }

    #[test]
    fn db_section_required() {
        assert!(parse_config("[git]\nbinary = \"git\"\n").is_err());
    }
}
