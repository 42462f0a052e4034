use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use carousel_slideshow::{CatalogItem, NoticeKind, Phrasebook, SchedulerConfig};
use figment::{
    Figment,
    providers::{Env, Format, Json, Serialized},
};
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};

pub const SETTINGS_DIRECTORY_NAME: &str = "carousel";
pub const SETTINGS_FILE_NAME: &str = "settings.json";
pub const ENV_PREFIX: &str = "CAROUSEL_";
pub const DEFAULT_DATABASE_PATH: &str = ".carousel/carousel.db";
pub const DEFAULT_LANGUAGE: &str = "ru";
pub const DEFAULT_LOG_FILTER: &str = "info";

const FC_MOBILE_GIF: &str = "https://media.giphy.com/media/v1.Y2lkPTc5MGI3NjExYXlldzJobGtqNTE2NW9mbnpmdGo0ejJxM3hlOG5tZ3N2MnBycXA4NyZlcD12MV9pbnRlcm5hbF9naWZfYnlfaWQmY3Q9Zw/LDjKkXTfIPZ7zYOcvq/giphy.gif";
const ASPHALT_GIF: &str = "https://media.giphy.com/media/v1.Y2lkPTc5MGI3NjExdWdqbGlqNnV3cG9nejc4anNudm5ycXE3bmhkMWhjZnlxejlsejExNSZlcD12MV9pbnRlcm5hbF9naWZfYnlfaWQmY3Q9Zw/Br5i1DgRrNT9uCvssd/giphy.gif";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlideshowSettings {
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    #[serde(default = "default_expiry_ms")]
    pub expiry_ms: u64,
    #[serde(default = "default_auto_stop_threshold_ms")]
    pub auto_stop_threshold_ms: u64,
    #[serde(default = "default_ack_window_ms")]
    pub ack_window_ms: u64,
}

impl Default for SlideshowSettings {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            expiry_ms: default_expiry_ms(),
            auto_stop_threshold_ms: default_auto_stop_threshold_ms(),
            ack_window_ms: default_ack_window_ms(),
        }
    }
}

impl SlideshowSettings {
    fn normalized(self) -> Self {
        let defaults = Self::default();
        let or_default = |value: u64, fallback: u64| if value == 0 { fallback } else { value };
        Self {
            tick_interval_ms: or_default(self.tick_interval_ms, defaults.tick_interval_ms),
            expiry_ms: or_default(self.expiry_ms, defaults.expiry_ms),
            auto_stop_threshold_ms: or_default(
                self.auto_stop_threshold_ms,
                defaults.auto_stop_threshold_ms,
            ),
            ack_window_ms: or_default(self.ack_window_ms, defaults.ack_window_ms),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_database_path")]
    pub database_path: String,
    #[serde(default = "default_language")]
    pub default_language: String,
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
    #[serde(default)]
    pub slideshow: SlideshowSettings,
    /// Ordered rotation items per language code.
    #[serde(default = "default_catalog")]
    pub catalog: BTreeMap<String, Vec<CatalogItem>>,
    /// Per-language notice overrides keyed by notice name, e.g. `stopped_by_timer`.
    #[serde(default)]
    pub notices: BTreeMap<String, BTreeMap<String, String>>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            default_language: default_language(),
            log_filter: default_log_filter(),
            slideshow: SlideshowSettings::default(),
            catalog: default_catalog(),
            notices: BTreeMap::new(),
        }
    }
}

impl Settings {
    pub fn normalized(mut self) -> Self {
        self.database_path = non_blank_or(self.database_path, DEFAULT_DATABASE_PATH);
        self.default_language =
            non_blank_or(self.default_language, DEFAULT_LANGUAGE).to_ascii_lowercase();
        self.log_filter = non_blank_or(self.log_filter, DEFAULT_LOG_FILTER);
        self.slideshow = self.slideshow.normalized();

        // Rows without an id or media cannot be rendered, so they never reach the scheduler.
        self.catalog = self
            .catalog
            .into_iter()
            .filter_map(|(language, items)| {
                let language = language.trim().to_ascii_lowercase();
                if language.is_empty() {
                    return None;
                }
                let items = items
                    .into_iter()
                    .filter_map(normalize_item)
                    .collect::<Vec<_>>();
                Some((language, items))
            })
            .collect();

        self.notices = self
            .notices
            .into_iter()
            .map(|(language, rows)| (language.trim().to_ascii_lowercase(), rows))
            .filter(|(language, _)| !language.is_empty())
            .collect();

        self
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            tick_interval: Duration::from_millis(self.slideshow.tick_interval_ms),
            expiry: Duration::from_millis(self.slideshow.expiry_ms),
            auto_stop_threshold: Duration::from_millis(self.slideshow.auto_stop_threshold_ms),
            ack_window: Duration::from_millis(self.slideshow.ack_window_ms),
            default_language: self.default_language.clone(),
        }
        .normalized()
    }

    /// Built-in microcopy with the configured overrides applied. Unknown notice names are
    /// skipped with a warning.
    pub fn phrasebook(&self) -> Phrasebook {
        let mut phrasebook = Phrasebook::builtin(&self.default_language);
        for (language, rows) in &self.notices {
            for (key, text) in rows {
                match NoticeKind::from_key(key) {
                    Some(kind) => phrasebook.set(language, kind, text.clone()),
                    None => tracing::warn!(
                        language = %language,
                        notice = %key,
                        "ignoring unknown notice override"
                    ),
                }
            }
        }
        phrasebook
    }

    pub fn catalog_items(&self, language: &str) -> Vec<CatalogItem> {
        self.catalog.get(language).cloned().unwrap_or_default()
    }
}

pub struct SettingsStore {
    settings: Arc<ArcSwap<Settings>>,
    config_path: PathBuf,
}

impl SettingsStore {
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|path| path.join(SETTINGS_DIRECTORY_NAME))
            .unwrap_or_else(|| PathBuf::from(".carousel"))
    }

    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join(SETTINGS_FILE_NAME)
    }

    /// Loads `config_path` layered over defaults and `CAROUSEL_*` environment overrides.
    /// A missing file is not an error.
    pub fn open(config_path: PathBuf) -> SettingsResult<Self> {
        let settings = Self::load_from_disk(&config_path)?;
        Ok(Self {
            settings: Arc::new(ArcSwap::from_pointee(settings)),
            config_path,
        })
    }

    pub fn with_defaults(config_path: PathBuf) -> Self {
        Self::with_settings(config_path, Settings::default())
    }

    pub fn with_settings(config_path: PathBuf, settings: Settings) -> Self {
        Self {
            settings: Arc::new(ArcSwap::from_pointee(settings.normalized())),
            config_path,
        }
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn settings(&self) -> Arc<Settings> {
        self.settings.load_full()
    }

    /// Handle that always observes the latest settings, for readers living outside the store.
    pub fn shared(&self) -> Arc<ArcSwap<Settings>> {
        self.settings.clone()
    }

    /// Re-reads the settings file. On failure the current settings stay in place.
    pub fn reload(&self) -> SettingsResult<Arc<Settings>> {
        let settings = Arc::new(Self::load_from_disk(&self.config_path)?);
        self.settings.store(settings.clone());
        tracing::info!(path = ?self.config_path, "settings reloaded");
        Ok(settings)
    }

    /// Writes the current settings to the config path when no file exists yet, so there is a
    /// template to edit. Returns whether a file was written.
    pub fn seed_if_missing(&self) -> SettingsResult<bool> {
        if self.config_path.exists() {
            return Ok(false);
        }
        self.persist(&self.settings())?;
        Ok(true)
    }

    fn persist(&self, settings: &Settings) -> SettingsResult<()> {
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent).context(CreateDirSnafu {
                stage: "create-settings-directory",
                path: parent.to_path_buf(),
            })?;
        }

        let content = serde_json::to_string_pretty(settings).context(SerializeConfigSnafu {
            stage: "serialize-settings-json",
        })?;

        let temp_path = self.config_path.with_extension("json.tmp");
        std::fs::write(&temp_path, content).context(WriteFileSnafu {
            stage: "write-temporary-settings-file",
            path: temp_path.clone(),
        })?;

        std::fs::rename(&temp_path, &self.config_path).context(RenameTempFileSnafu {
            stage: "rename-temporary-settings-file",
            from: temp_path,
            to: self.config_path.clone(),
        })?;

        tracing::info!("saved settings to {:?}", self.config_path);
        Ok(())
    }

    fn load_from_disk(path: &Path) -> SettingsResult<Settings> {
        let mut figment = Figment::from(Serialized::defaults(Settings::default()));
        if path.exists() {
            figment = figment.merge(Json::file(path));
        } else {
            tracing::info!("settings file not found at {:?}, using defaults", path);
        }
        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        let settings = figment.extract::<Settings>().context(ExtractSnafu {
            stage: "extract-settings",
            path: path.to_path_buf(),
        })?;
        Ok(settings.normalized())
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SettingsError {
    #[snafu(display("failed to load settings from {path:?} on `{stage}`: {source}"))]
    Extract {
        stage: &'static str,
        path: PathBuf,
        #[snafu(source(from(figment::Error, Box::new)))]
        source: Box<figment::Error>,
    },
    #[snafu(display("failed to create settings directory at {path:?} on `{stage}`: {source}"))]
    CreateDir {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("failed to serialize settings on `{stage}`: {source}"))]
    SerializeConfig {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("failed to write settings file at {path:?} on `{stage}`: {source}"))]
    WriteFile {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display(
        "failed to replace settings file from {from:?} to {to:?} on `{stage}`: {source}"
    ))]
    RenameTempFile {
        stage: &'static str,
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },
}

pub type SettingsResult<T> = Result<T, SettingsError>;

fn normalize_item(mut item: CatalogItem) -> Option<CatalogItem> {
    item.id = item.id.trim().to_string();
    item.media_url = item.media_url.trim().to_string();
    if item.id.is_empty() || item.media_url.is_empty() {
        return None;
    }
    item.caption = item.caption.trim().to_string();
    item.links
        .retain(|link| !link.label.trim().is_empty() && !link.url.trim().is_empty());
    Some(item)
}

fn non_blank_or(value: String, fallback: &str) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        fallback.to_string()
    } else {
        trimmed.to_string()
    }
}

fn default_database_path() -> String {
    DEFAULT_DATABASE_PATH.to_string()
}

fn default_language() -> String {
    DEFAULT_LANGUAGE.to_string()
}

fn default_log_filter() -> String {
    DEFAULT_LOG_FILTER.to_string()
}

fn default_tick_interval_ms() -> u64 {
    5_000
}

fn default_expiry_ms() -> u64 {
    33_000
}

fn default_auto_stop_threshold_ms() -> u64 {
    30_000
}

fn default_ack_window_ms() -> u64 {
    15_000
}

fn default_catalog() -> BTreeMap<String, Vec<CatalogItem>> {
    let banners = || {
        vec![
            CatalogItem::new("FC-001", "EA Sports FC Mobile 📲", FC_MOBILE_GIF),
            CatalogItem::new("ASP-002", "Asphalt Legends Unite 🆔", ASPHALT_GIF),
        ]
    };
    BTreeMap::from([
        ("en".to_string(), banners()),
        ("ru".to_string(), banners()),
    ])
}
