use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use figment::{
    Figment,
    providers::{Env, Format, Json, Serialized},
};
use querent_api::{BackendConfig, DataSourceId, EngineConfig};
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};

pub const DEFAULT_BASE_URL: &str = "http://localhost:8080";
pub const DEFAULT_API_PREFIX: &str = "/api/v1";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_ENGINE_URL: &str = "http://localhost:5000";
pub const DEFAULT_EMBED_URL: &str = "http://localhost:8081";
pub const DEFAULT_LOG_FILTER: &str = "info";
pub const SETTINGS_DIRECTORY_NAME: &str = "querent";
pub const SETTINGS_FILE_NAME: &str = "settings.json";
pub const ENV_PREFIX: &str = "QUERENT_";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendSettings {
    pub base_url: String,
    pub api_prefix: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    pub timeout_secs: u64,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_prefix: DEFAULT_API_PREFIX.to_string(),
            access_token: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    pub engine_url: String,
    pub embed_url: String,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            engine_url: DEFAULT_ENGINE_URL.to_string(),
            embed_url: DEFAULT_EMBED_URL.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub backend: BackendSettings,
    pub engine: EngineSettings,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_data_source: Option<DataSourceId>,
    pub log_filter: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            backend: BackendSettings::default(),
            engine: EngineSettings::default(),
            default_data_source: None,
            log_filter: DEFAULT_LOG_FILTER.to_string(),
        }
    }
}

impl Settings {
    pub fn normalized(mut self) -> Self {
        self.backend.base_url = normalized_url(&self.backend.base_url, DEFAULT_BASE_URL);
        self.backend.api_prefix = or_default(&self.backend.api_prefix, DEFAULT_API_PREFIX);
        self.backend.access_token = self
            .backend
            .access_token
            .map(|token| token.trim().to_string())
            .filter(|token| !token.is_empty());
        self.backend.timeout_secs = self.backend.timeout_secs.max(1);
        self.engine.engine_url = normalized_url(&self.engine.engine_url, DEFAULT_ENGINE_URL);
        self.engine.embed_url = normalized_url(&self.engine.embed_url, DEFAULT_EMBED_URL);
        self.log_filter = or_default(&self.log_filter, DEFAULT_LOG_FILTER);
        self
    }

    pub fn backend_config(&self) -> BackendConfig {
        BackendConfig::new(&self.backend.base_url)
            .with_api_prefix(&self.backend.api_prefix)
            .with_access_token(self.backend.access_token.clone())
            .with_timeout(Duration::from_secs(self.backend.timeout_secs))
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig::new(&self.engine.engine_url, &self.engine.embed_url)
            .with_timeout(Duration::from_secs(self.backend.timeout_secs))
    }
}

/// How the settings on disk were found at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOrigin {
    File,
    Missing,
    /// The file or environment could not be parsed; defaults are in use.
    Invalid { reason: String },
}

pub struct SettingsStore {
    settings: Arc<ArcSwap<Settings>>,
    config_path: PathBuf,
    origin: LoadOrigin,
}

impl SettingsStore {
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|path| path.join(SETTINGS_DIRECTORY_NAME))
            .unwrap_or_else(|| PathBuf::from(".querent"))
    }

    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join(SETTINGS_FILE_NAME)
    }

    /// Reads settings without logging; call [`SettingsStore::report_origin`] once a subscriber exists.
    pub fn new(config_path: PathBuf) -> Self {
        let (settings, origin) = Self::load_from_disk(&config_path);
        Self {
            settings: Arc::new(ArcSwap::from_pointee(settings)),
            config_path,
            origin,
        }
    }

    pub fn load() -> Self {
        Self::new(Self::default_config_path())
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn origin(&self) -> &LoadOrigin {
        &self.origin
    }

    pub fn report_origin(&self) {
        let path = self.config_path.display();
        match &self.origin {
            LoadOrigin::File => tracing::debug!(path = %path, "loaded settings"),
            LoadOrigin::Missing => {
                tracing::info!(path = %path, "settings file not found, using defaults");
            }
            LoadOrigin::Invalid { reason } => tracing::warn!(
                path = %path,
                error = %reason,
                "failed to parse settings, using defaults"
            ),
        }
    }

    pub fn settings(&self) -> Arc<Settings> {
        self.settings.load_full()
    }

    pub fn update(&self, settings: Settings) -> Result<(), SettingsError> {
        let settings = settings.normalized();
        let content = serde_json::to_string_pretty(&settings).context(EncodeSettingsSnafu {
            stage: "encode-querent-settings",
        })?;
        write_atomically(&self.config_path, &content)?;
        tracing::info!(path = %self.config_path.display(), "saved settings");
        self.settings.store(Arc::new(settings));
        Ok(())
    }

    fn load_from_disk(path: &Path) -> (Settings, LoadOrigin) {
        let mut figment = Figment::from(Serialized::defaults(Settings::default()));
        let origin = if path.exists() {
            figment = figment.merge(Json::file(path));
            LoadOrigin::File
        } else {
            LoadOrigin::Missing
        };
        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        match figment.extract::<Settings>() {
            Ok(settings) => (settings.normalized(), origin),
            Err(error) => (
                Settings::default(),
                LoadOrigin::Invalid {
                    reason: error.to_string(),
                },
            ),
        }
    }
}

/// Writes next to `path` and renames over it so readers never see a partial file.
fn write_atomically(path: &Path, content: &str) -> Result<(), SettingsError> {
    if let Some(directory) = path.parent() {
        std::fs::create_dir_all(directory).context(ConfigDirSnafu {
            stage: "create-querent-config-dir",
            directory: directory.to_path_buf(),
        })?;
    }

    let staged = path.with_extension("json.tmp");
    std::fs::write(&staged, content).context(StageSettingsSnafu {
        stage: "stage-querent-settings",
        staged: staged.clone(),
    })?;
    std::fs::rename(&staged, path).context(ReplaceSettingsSnafu {
        stage: "replace-querent-settings",
        path: path.to_path_buf(),
    })
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SettingsError {
    #[snafu(display("cannot create querent config directory {}: {source}", directory.display()))]
    ConfigDir {
        stage: &'static str,
        directory: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("cannot encode querent settings: {source}"))]
    EncodeSettings {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("cannot stage querent settings in {}: {source}", staged.display()))]
    StageSettings {
        stage: &'static str,
        staged: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("cannot save querent settings to {}: {source}", path.display()))]
    ReplaceSettings {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
}

fn or_default(value: &str, default: &str) -> String {
    let value = value.trim();
    if value.is_empty() {
        default.to_string()
    } else {
        value.to_string()
    }
}

fn normalized_url(value: &str, default: &str) -> String {
    let value = value.trim().trim_end_matches('/');
    if value.is_empty() {
        default.to_string()
    } else {
        value.to_string()
    }
}
