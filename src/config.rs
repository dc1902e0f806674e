use crate::error::{Error, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// One account file from the config directory.
///
/// Every `*.yml` / `*.yaml` file describes one Beatport/Beatsource login
/// together with the download preferences that go with it. Only the first
/// account's preferences are used; the others contribute their login.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub username: String,
    pub password: String,

    #[serde(default = "default_downloads_directory")]
    pub downloads_directory: PathBuf,

    #[serde(default)]
    pub quality: Quality,

    #[serde(default = "default_track_file_template")]
    pub track_file_template: String,

    #[serde(default = "default_true")]
    pub sort_by_context: bool,

    #[serde(default = "default_workers")]
    pub max_global_workers: usize,

    #[serde(default = "default_workers")]
    pub max_download_workers: usize,

    #[serde(default)]
    pub write_error_log: bool,

    #[serde(default)]
    pub proxy: Option<String>,

    #[serde(default = "default_true")]
    pub show_progress: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    #[default]
    Lossless,
    High,
    Medium,
}

impl Quality {
    /// Value sent to the download endpoint.
    pub fn as_param(&self) -> &'static str {
        match self {
            Quality::Lossless => "lossless",
            Quality::High => "high",
            Quality::Medium => "medium",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Quality::Lossless => "flac",
            Quality::High | Quality::Medium => "m4a",
        }
    }
}

fn default_downloads_directory() -> PathBuf {
    PathBuf::from("downloads")
}

fn default_track_file_template() -> String {
    "{number}. {artists} - {name} ({mix_name})".to_string()
}

fn default_workers() -> usize {
    15
}

fn default_true() -> bool {
    true
}

impl AppConfig {
    pub fn parse(content: &str) -> Result<Self> {
        let config: AppConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::parse(&content)
    }

    fn validate(&self) -> Result<()> {
        if self.username.trim().is_empty() || self.password.is_empty() {
            return Err(Error::Config("username and password are required".into()));
        }
        if self.max_global_workers == 0 {
            return Err(Error::Config("max_global_workers must be at least 1".into()));
        }
        if self.max_download_workers == 0 {
            return Err(Error::Config(
                "max_download_workers must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Default account directory: `$XDG_CONFIG_HOME/beatportdl`.
pub fn default_config_dir() -> Result<PathBuf> {
    let dirs = xdg::BaseDirectories::with_prefix("beatportdl")
        .map_err(|e| Error::Config(format!("cannot locate config directory: {}", e)))?;
    Ok(dirs.get_config_home())
}

/// Lists the YAML files in `dir`, sorted by file name.
pub fn find_config_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let is_yaml = matches!(
            path.extension().and_then(|ext| ext.to_str()),
            Some("yml") | Some("yaml")
        );
        if is_yaml {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Loads every parsable account file in `dir`. Broken files are skipped.
pub fn load_account_configs(dir: &Path) -> Result<Vec<(PathBuf, AppConfig)>> {
    info!("⚙️  Loading account configuration from: {}", dir.display());
    let mut configs = Vec::new();
    for path in find_config_files(dir)? {
        match AppConfig::load(&path) {
            Ok(config) => configs.push((path, config)),
            Err(e) => warn!("⚠️  Skipping {}: {}", path.display(), e),
        }
    }
    if configs.is_empty() {
        return Err(Error::Config(format!(
            "no usable config files found in {}",
            dir.display()
        )));
    }
    Ok(configs)
}
