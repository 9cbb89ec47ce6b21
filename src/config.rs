use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

const DEFAULT_ENV_PREFIX: &str = "GEMNAV";

/// Read-only user settings consumed by the navigation engine. The engine
/// never writes these back; editing them is the settings UI's business.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub web: WebConfig,
    #[serde(default)]
    pub ui: UiConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineConfig {
    #[serde(default = "default_home_url")]
    pub home_url: String,
    #[serde(default = "default_max_size_mb")]
    pub max_download_size_mb: u32,
    #[serde(default = "default_max_time_secs")]
    pub max_download_time_secs: u32,
    #[serde(default = "default_redirect_hop_limit")]
    pub redirect_hop_limit: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            home_url: default_home_url(),
            max_download_size_mb: default_max_size_mb(),
            max_download_time_secs: default_max_time_secs(),
            redirect_hop_limit: default_redirect_hop_limit(),
        }
    }
}

fn default_home_url() -> String {
    "about://gemnav/help.gmi".into()
}

fn default_max_size_mb() -> u32 {
    10
}

fn default_max_time_secs() -> u32 {
    30
}

fn default_redirect_hop_limit() -> u32 {
    5
}

/// What to do with http/https links.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum WebLinkMode {
    /// Hand the URL to the system browser.
    #[default]
    ExternalBrowser,
    /// Route the request through the gemini fetch pipeline via the
    /// configured proxy.
    GeminiProxy,
    /// Fetch and render inside the session like any other page.
    Internal,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct WebConfig {
    #[serde(default)]
    pub handle_links: WebLinkMode,
    /// Proxy endpoint used whenever non-gemini traffic goes through the
    /// gemini pipeline, e.g. a duckling-proxy instance.
    #[serde(default)]
    pub http_proxy: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UiConfig {
    #[serde(default = "default_theme")]
    pub theme: String,
    #[serde(default)]
    pub themes_dir: Option<PathBuf>,
    #[serde(default)]
    pub docs_dir: Option<PathBuf>,
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            theme: default_theme(),
            themes_dir: None,
            docs_dir: None,
        }
    }
}

fn default_theme() -> String {
    "default".into()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolsConfig {
    /// gemget-compatible downloader binary.
    #[serde(default = "default_fetcher")]
    pub fetcher: PathBuf,
    /// Directory of external converter tools; unset means the built-in
    /// converter is used.
    #[serde(default)]
    pub converter_dir: Option<PathBuf>,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            fetcher: default_fetcher(),
            converter_dir: None,
        }
    }
}

fn default_fetcher() -> PathBuf {
    PathBuf::from("gemget")
}

impl Config {
    /// Theme template base (`{base}.htm`) for regular pages.
    pub fn theme_base(&self) -> PathBuf {
        self.ui
            .themes_dir
            .clone()
            .unwrap_or_else(|| app_relative("themes"))
            .join(&self.ui.theme)
    }

    /// Bundled documentation directory backing `about:` URLs. Help pages
    /// render with their own theme so they look distinct from user themes.
    pub fn docs_dir(&self) -> PathBuf {
        self.ui
            .docs_dir
            .clone()
            .unwrap_or_else(|| app_relative("docs"))
    }
}

fn app_relative(name: &str) -> PathBuf {
    env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(name)))
        .unwrap_or_else(|| PathBuf::from(name))
}

#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    pub config_file: Option<PathBuf>,
    pub env_prefix: Option<String>,
}

pub fn load(options: LoadOptions) -> Result<Config> {
    let mut cfg = Config::default();

    if let Some(path) = options.config_file.as_ref() {
        if path.exists() {
            cfg = merge_config(cfg, read_config_file(path)?);
        }
    } else if let Some(default_path) = default_config_path() {
        if default_path.exists() {
            cfg = merge_config(cfg, read_config_file(&default_path)?);
        }
    }

    let prefix = options.env_prefix.as_deref().unwrap_or(DEFAULT_ENV_PREFIX);
    apply_env(&mut cfg, prefix);

    Ok(cfg)
}

fn read_config_file(path: &Path) -> Result<Config> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file at {}", path.display()))?;
    let config: Config = serde_yaml::from_str(&data)
        .with_context(|| format!("Failed to parse config file at {}", path.display()))?;
    Ok(config)
}

fn merge_config(mut base: Config, other: Config) -> Config {
    if !other.engine.home_url.is_empty() {
        base.engine.home_url = other.engine.home_url;
    }
    if other.engine.max_download_size_mb != 0 {
        base.engine.max_download_size_mb = other.engine.max_download_size_mb;
    }
    if other.engine.max_download_time_secs != 0 {
        base.engine.max_download_time_secs = other.engine.max_download_time_secs;
    }
    if other.engine.redirect_hop_limit != 0 {
        base.engine.redirect_hop_limit = other.engine.redirect_hop_limit;
    }

    base.web.handle_links = other.web.handle_links;
    if other.web.http_proxy.is_some() {
        base.web.http_proxy = other.web.http_proxy;
    }

    if !other.ui.theme.is_empty() {
        base.ui.theme = other.ui.theme;
    }
    if other.ui.themes_dir.is_some() {
        base.ui.themes_dir = other.ui.themes_dir;
    }
    if other.ui.docs_dir.is_some() {
        base.ui.docs_dir = other.ui.docs_dir;
    }

    if !other.tools.fetcher.as_os_str().is_empty() {
        base.tools.fetcher = other.tools.fetcher;
    }
    if other.tools.converter_dir.is_some() {
        base.tools.converter_dir = other.tools.converter_dir;
    }

    base
}

fn apply_env(cfg: &mut Config, prefix: &str) {
    let upper_prefix = format!("{}_", prefix.to_uppercase());
    for (key, value) in env::vars() {
        if let Some(stripped) = key.strip_prefix(&upper_prefix) {
            let normalized = stripped.to_ascii_lowercase().replace("__", ".");
            apply_env_value(cfg, &normalized, value);
        }
    }
}

fn apply_env_value(cfg: &mut Config, key: &str, value: String) {
    match key {
        "engine.home_url" => cfg.engine.home_url = value,
        "engine.max_download_size_mb" => {
            if let Ok(parsed) = value.parse() {
                cfg.engine.max_download_size_mb = parsed;
            }
        }
        "engine.max_download_time_secs" => {
            if let Ok(parsed) = value.parse() {
                cfg.engine.max_download_time_secs = parsed;
            }
        }
        "engine.redirect_hop_limit" => {
            if let Ok(parsed) = value.parse() {
                cfg.engine.redirect_hop_limit = parsed;
            }
        }
        "web.handle_links" => {
            cfg.web.handle_links = match value.as_str() {
                "gemini-proxy" => WebLinkMode::GeminiProxy,
                "internal" => WebLinkMode::Internal,
                _ => WebLinkMode::ExternalBrowser,
            };
        }
        "web.http_proxy" => cfg.web.http_proxy = Some(value),
        "ui.theme" => cfg.ui.theme = value,
        "ui.themes_dir" => cfg.ui.themes_dir = Some(PathBuf::from(value)),
        "ui.docs_dir" => cfg.ui.docs_dir = Some(PathBuf::from(value)),
        "tools.fetcher" => cfg.tools.fetcher = PathBuf::from(value),
        "tools.converter_dir" => cfg.tools.converter_dir = Some(PathBuf::from(value)),
        _ => {}
    }
}

pub fn default_path() -> Option<PathBuf> {
    default_config_path()
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("gemnav").join("config.yaml"))
}
