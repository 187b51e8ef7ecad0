//! Configuration loading
//!
//! Three kinds of input, all read once at startup:
//! - `frameart.toml` + `FRAMEART_*` environment variables (tunables, via figment)
//! - `seasonal_themes.json`, `device_config.json`, `base_prompt.txt` (data files)
//!
//! Everything is passed explicitly into the components afterwards.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use chrono::NaiveDate;

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::archive::ArchiveSettings;
use crate::error::ConfigError;
use crate::generator::GeneratorSettings;
use crate::processor::ProcessorSettings;
use crate::theme::{SelectionPolicy, ThemeTable};
use crate::uploader::UploaderSettings;

pub const SETTINGS_FILE: &str = "frameart.toml";
pub const THEMES_FILE: &str = "seasonal_themes.json";
pub const DEVICE_FILE: &str = "device_config.json";
pub const BASE_PROMPT_FILE: &str = "base_prompt.txt";

/// Default device API endpoint
pub const DEFAULT_API_URL: &str = "https://api.smartthings.com/v1";

const DEFAULT_BASE_PROMPT: &str = "Fine art oil painting with rich texture and soft natural light, \
balanced composition, museum quality, no text, no people, landscape orientation.";

/// Tunable settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Root for `images/` and `logs/`
    pub working_dir: PathBuf,
    /// Theme phrase selection
    pub selection: SelectionPolicy,
    /// Pause between generation requests
    pub inter_image_delay_ms: u64,
    pub generator: GeneratorSettings,
    pub processor: ProcessorSettings,
    pub uploader: UploaderSettings,
    pub archive: ArchiveSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            working_dir: PathBuf::from("."),
            selection: SelectionPolicy::Random,
            inter_image_delay_ms: 2000,
            generator: GeneratorSettings::default(),
            processor: ProcessorSettings::default(),
            uploader: UploaderSettings::default(),
            archive: ArchiveSettings::default(),
        }
    }
}

impl Settings {
    /// Defaults, then the optional settings file, then `FRAMEART_*` env vars
    /// (nested keys separated by `__`, e.g. `FRAMEART_GENERATOR__MAX_ATTEMPTS`).
    pub fn load(config_dir: &Path) -> Result<Self, ConfigError> {
        let path = config_dir.join(SETTINGS_FILE);
        Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(&path))
            .merge(Env::prefixed("FRAMEART_").split("__"))
            .extract()
            .map_err(|e| ConfigError::Parse {
                path: path.display().to_string(),
                message: e.to_string(),
            })
    }
}

/// Display resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Default for Resolution {
    fn default() -> Self {
        Self {
            width: 3840,
            height: 2160,
        }
    }
}

/// Device credential file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    #[serde(default)]
    pub access_token: String,
    #[serde(default)]
    pub device_id: String,
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default)]
    pub resolution: Resolution,
}

fn default_api_url() -> String {
    DEFAULT_API_URL.to_string()
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            access_token: String::new(),
            device_id: String::new(),
            api_url: default_api_url(),
            resolution: Resolution::default(),
        }
    }
}

/// Template placeholders count as unset
fn is_placeholder(value: &str) -> bool {
    let v = value.trim();
    v.is_empty() || (v.starts_with("YOUR_") && v.ends_with("_HERE"))
}

impl DeviceConfig {
    /// Read the device file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let json = read(path)?;
        let mut config: DeviceConfig =
            serde_json::from_str(&json).map_err(|e| ConfigError::Parse {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;

        if is_placeholder(&config.access_token) {
            config.access_token.clear();
        }
        if is_placeholder(&config.device_id) {
            config.device_id.clear();
        }
        if config.resolution.width == 0 || config.resolution.height == 0 {
            return Err(ConfigError::Invalid {
                field: "resolution",
                message: format!(
                    "{}x{} is not a valid display size",
                    config.resolution.width, config.resolution.height
                ),
            });
        }
        Ok(config)
    }

    /// Both credentials present
    pub fn validate_credentials(&self) -> Result<(), ConfigError> {
        if self.access_token.is_empty() {
            return Err(ConfigError::MissingCredential("access_token"));
        }
        if self.device_id.is_empty() {
            return Err(ConfigError::MissingCredential("device_id"));
        }
        Ok(())
    }
}

fn read(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })
}

/// Read and trim the base style text
pub fn load_base_prompt(path: &Path) -> Result<String, ConfigError> {
    let text = read(path)?.trim().to_string();
    if text.is_empty() {
        return Err(ConfigError::EmptyBasePrompt);
    }
    Ok(text)
}

/// Working directory layout
#[derive(Debug, Clone)]
pub struct Layout {
    pub generated: PathBuf,
    pub processed: PathBuf,
    pub archive: PathBuf,
    pub logs: PathBuf,
}

impl Layout {
    pub fn new(working_dir: &Path) -> Self {
        let images = working_dir.join("images");
        Self {
            generated: images.join("generated"),
            processed: images.join("processed"),
            archive: images.join("archive"),
            logs: working_dir.join("logs"),
        }
    }

    /// Create all directories
    pub fn create(&self) -> std::io::Result<()> {
        for dir in [&self.generated, &self.processed, &self.archive, &self.logs] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    /// Log file for the given day: `logs/frameart_YYYYMMDD.log`
    pub fn daily_log(&self, day: NaiveDate) -> PathBuf {
        self.logs.join(format!("frameart_{}.log", day.format("%Y%m%d")))
    }

    /// Open today's log file for appending
    pub fn open_daily_log(&self, day: NaiveDate) -> std::io::Result<File> {
        std::fs::create_dir_all(&self.logs)?;
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.daily_log(day))
    }
}

/// Everything a run needs, loaded once
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub settings: Settings,
    pub themes: ThemeTable,
    pub base_prompt: String,
    /// Absent when the device file is missing
    pub device: Option<DeviceConfig>,
}

impl AppConfig {
    /// Load all configuration from a directory. A missing device file is
    /// tolerated here; uploads check for it.
    pub fn load(config_dir: &Path) -> Result<Self, ConfigError> {
        let settings = Settings::load(config_dir)?;
        let themes = ThemeTable::load(&config_dir.join(THEMES_FILE))?;
        let base_prompt = load_base_prompt(&config_dir.join(BASE_PROMPT_FILE))?;

        let device_path = config_dir.join(DEVICE_FILE);
        let device = if device_path.exists() {
            Some(DeviceConfig::load(&device_path)?)
        } else {
            debug!(path = %device_path.display(), "no device file");
            None
        };

        Ok(Self {
            settings,
            themes,
            base_prompt,
            device,
        })
    }

    /// Processor settings with the device's resolution applied
    pub fn processor_settings(&self) -> ProcessorSettings {
        let mut settings = self.settings.processor.clone();
        if let Some(device) = &self.device {
            settings.width = device.resolution.width;
            settings.height = device.resolution.height;
        }
        settings
    }

    pub fn layout(&self) -> Layout {
        Layout::new(&self.settings.working_dir)
    }
}

/// Write starter configuration files, leaving existing ones alone.
/// Returns the paths written.
pub fn write_templates(config_dir: &Path) -> Result<Vec<PathBuf>, ConfigError> {
    std::fs::create_dir_all(config_dir).map_err(write_error(config_dir))?;

    let device = DeviceConfig {
        access_token: "YOUR_ACCESS_TOKEN_HERE".to_string(),
        device_id: "YOUR_DEVICE_ID_HERE".to_string(),
        ..Default::default()
    };
    let settings = toml_template();

    let files = [
        (THEMES_FILE, ThemeTable::builtin().to_json()),
        (
            DEVICE_FILE,
            serde_json::to_string_pretty(&device).unwrap_or_default(),
        ),
        (BASE_PROMPT_FILE, format!("{}\n", DEFAULT_BASE_PROMPT)),
        (SETTINGS_FILE, settings),
    ];

    let mut written = Vec::new();
    for (name, contents) in files {
        let path = config_dir.join(name);
        if path.exists() {
            continue;
        }
        std::fs::write(&path, contents).map_err(write_error(&path))?;
        info!(path = %path.display(), "wrote template");
        written.push(path);
    }
    Ok(written)
}

fn write_error(path: &Path) -> impl FnOnce(std::io::Error) -> ConfigError {
    let path = path.display().to_string();
    move |source| ConfigError::Write { path, source }
}

fn toml_template() -> String {
    r#"# frameart settings. Every key is optional; shown values are the defaults.
# Environment overrides: FRAMEART_<KEY>, nested with "__" (FRAMEART_GENERATOR__MAX_ATTEMPTS=5).

# working_dir = "."
# selection = "random"        # or "rotation"
# inter_image_delay_ms = 2000

[generator]
# request_timeout_secs = 30
# max_attempts = 3
# base_backoff_ms = 2000
# poll_interval_ms = 3000
# poll_timeout_secs = 300

[processor]
# fit = "crop"                # or "letterbox"
# contrast = 1.05
# saturation = 1.1
# sharpness = 1.5
# quality = 95

[archive]
# generated_retention_days = 2
# processed_retention_days = 7
"#
    .to_string()
}
