use std::env;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

const APP_DOMAIN: &str = "io";
const APP_ORG: &str = "DiarySync";
const APP_NAME: &str = "diary";

pub const DEFAULT_STORAGE_KEY: &str = "diaryEntries";

pub struct ConfigLoader {
    paths: ConfigPaths,
}

impl ConfigLoader {
    pub fn discover() -> Result<Self> {
        let paths = ConfigPaths::discover()?;
        Ok(Self { paths })
    }

    pub fn from_paths(paths: ConfigPaths) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &ConfigPaths {
        &self.paths
    }

    pub fn load_or_init(&self) -> Result<AppConfig> {
        self.paths.ensure_directories()?;
        if !self.paths.config_file.exists() {
            let mut default_cfg = AppConfig::default();
            default_cfg.post_load(&self.paths);
            self.write_default_config(&default_cfg)?;
            return Ok(default_cfg);
        }

        self.load()
    }

    pub fn load(&self) -> Result<AppConfig> {
        let raw = fs::read_to_string(&self.paths.config_file)
            .with_context(|| format!("reading config {}", self.paths.config_file.display()))?;
        let mut cfg: AppConfig = toml::from_str(&raw).context("parsing config toml")?;
        cfg.post_load(&self.paths);
        Ok(cfg)
    }

    fn write_default_config(&self, cfg: &AppConfig) -> Result<()> {
        let toml = toml::to_string_pretty(cfg).context("serializing default config")?;
        if let Some(parent) = self.paths.config_file.parent() {
            fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
        }
        let mut file = fs::File::create(&self.paths.config_file)
            .with_context(|| format!("creating config {}", self.paths.config_file.display()))?;
        file.write_all(toml.as_bytes())
            .context("writing default config")?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ConfigPaths {
    pub config_dir: PathBuf,
    pub config_file: PathBuf,
    pub data_dir: PathBuf,
    /// Key/value directory backing the local backend.
    pub local_store_dir: PathBuf,
    /// SQLite file standing in for the remote document database.
    pub remote_database_path: PathBuf,
    pub export_dir: PathBuf,
}

impl ConfigPaths {
    pub fn discover() -> Result<Self> {
        let override_config = env::var("DIARY_CONFIG").ok().map(PathBuf::from);
        let override_data = env::var("DIARY_DATA").ok().map(PathBuf::from);

        let project_dirs = ProjectDirs::from(APP_DOMAIN, APP_ORG, APP_NAME)
            .context("resolving XDG project directories")?;

        let config_dir = override_config
            .clone()
            .map(|p| {
                if p.is_dir() {
                    p
                } else {
                    p.parent().map(Path::to_path_buf).unwrap_or(p)
                }
            })
            .unwrap_or_else(|| project_dirs.config_dir().to_path_buf());

        let config_file = override_config
            .filter(|p| p.is_file() || p.extension().is_some())
            .unwrap_or_else(|| config_dir.join("config.toml"));

        let data_root = override_data.unwrap_or_else(|| project_dirs.data_dir().to_path_buf());
        Ok(Self::rooted(config_dir, config_file, data_root))
    }

    /// Lays out every data path under `data_dir`.
    pub fn rooted(config_dir: PathBuf, config_file: PathBuf, data_dir: PathBuf) -> Self {
        Self {
            config_dir,
            config_file,
            local_store_dir: data_dir.join("local"),
            remote_database_path: data_dir.join("remote.db"),
            export_dir: data_dir.join("exports"),
            data_dir,
        }
    }

    pub fn ensure_directories(&self) -> Result<()> {
        for dir in [
            &self.config_dir,
            &self.data_dir,
            &self.local_store_dir,
            &self.export_dir,
        ] {
            fs::create_dir_all(dir)
                .with_context(|| format!("creating application directory {}", dir.display()))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendChoice {
    #[default]
    Local,
    Remote,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub backend: BackendChoice,
    pub list_limit: usize,
    pub local: LocalOptions,
    pub remote: RemoteOptions,
    pub prompt: PromptOptions,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            backend: BackendChoice::default(),
            list_limit: 50,
            local: LocalOptions::default(),
            remote: RemoteOptions::default(),
            prompt: PromptOptions::default(),
        }
    }
}

impl AppConfig {
    fn post_load(&mut self, paths: &ConfigPaths) {
        self.local.resolve(paths);
        self.remote.resolve(paths);
        if self.local.key.trim().is_empty() {
            tracing::warn!("empty local storage key in config, falling back to default");
            self.local.key = DEFAULT_STORAGE_KEY.to_string();
        }
        if self.prompt.context_entries == 0 {
            self.prompt.context_entries = PromptOptions::default().context_entries;
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalOptions {
    #[serde(skip)]
    pub store_dir: PathBuf,
    pub key: String,
}

impl Default for LocalOptions {
    fn default() -> Self {
        Self {
            store_dir: PathBuf::new(),
            key: DEFAULT_STORAGE_KEY.to_string(),
        }
    }
}

impl LocalOptions {
    fn resolve(&mut self, paths: &ConfigPaths) {
        if self.store_dir.as_os_str().is_empty() {
            self.store_dir = paths.local_store_dir.clone();
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteOptions {
    #[serde(skip)]
    pub database_path: PathBuf,
    /// Authenticated user id; remote operations are refused without one.
    pub user: Option<String>,
    pub live: bool,
    pub poll_interval_ms: u64,
    pub read_only: bool,
}

impl Default for RemoteOptions {
    fn default() -> Self {
        Self {
            database_path: PathBuf::new(),
            user: None,
            live: true,
            poll_interval_ms: 500,
            read_only: false,
        }
    }
}

impl RemoteOptions {
    fn resolve(&mut self, paths: &ConfigPaths) {
        if self.database_path.as_os_str().is_empty() {
            self.database_path = paths.remote_database_path.clone();
        }
        if let Some(user) = &self.user {
            if user.trim().is_empty() {
                self.user = None;
            }
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(10))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptOptions {
    pub endpoint: String,
    pub model: String,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
    pub timeout_secs: u64,
    pub context_entries: usize,
}

impl Default for PromptOptions {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com/v1/responses".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            timeout_secs: 30,
            context_entries: 3,
        }
    }
}

impl PromptOptions {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }

    pub fn api_key(&self) -> Option<String> {
        env::var(&self.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn temp_paths(root: &TempDir) -> ConfigPaths {
        let base = root.path();
        let config_dir = base.join("config");
        ConfigPaths::rooted(
            config_dir.clone(),
            config_dir.join("config.toml"),
            base.join("data"),
        )
    }

    #[test]
    fn first_run_writes_default_config() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let loader = ConfigLoader::from_paths(temp_paths(&temp));

        let cfg = loader.load_or_init()?;
        assert!(loader.paths().config_file.exists());
        assert_eq!(cfg.backend, BackendChoice::Local);
        assert_eq!(cfg.local.key, DEFAULT_STORAGE_KEY);
        assert_eq!(cfg.local.store_dir, loader.paths().local_store_dir);
        assert_eq!(cfg.remote.database_path, loader.paths().remote_database_path);
        Ok(())
    }

    #[test]
    fn backend_defaults_to_local_when_omitted() -> anyhow::Result<()> {
        let cfg: AppConfig = toml::from_str("list_limit = 10\n")?;
        assert_eq!(cfg.backend, BackendChoice::Local);
        assert_eq!(BackendChoice::default(), BackendChoice::Local);
        Ok(())
    }

    #[test]
    fn partial_config_keeps_defaults() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let paths = temp_paths(&temp);
        paths.ensure_directories()?;
        fs::write(
            &paths.config_file,
            "backend = \"remote\"\n\n[remote]\nuser = \"alice\"\npoll_interval_ms = 50\n\n[local]\nkey = \"  \"\n",
        )?;

        let cfg = ConfigLoader::from_paths(paths).load()?;
        assert_eq!(cfg.backend, BackendChoice::Remote);
        assert_eq!(cfg.remote.user.as_deref(), Some("alice"));
        assert_eq!(cfg.remote.poll_interval(), Duration::from_millis(50));
        assert!(cfg.remote.live);
        assert_eq!(cfg.local.key, DEFAULT_STORAGE_KEY);
        assert_eq!(cfg.prompt.context_entries, 3);
        Ok(())
    }
}
