use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    pub source: SourceConfig,
    pub storage: StorageConfig,
    pub pipeline: PipelineConfig,
}

/// Remote NAV / metadata source configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SourceConfig {
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    #[serde(default = "default_amfi_url")]
    pub amfi_url: String,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_read_timeout_secs")]
    pub read_timeout_secs: u64,

    #[serde(default = "default_request_delay_ms")]
    pub request_delay_ms: u64,

    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

/// Local dataset layout configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

/// Fetch pipeline configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineConfig {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl StorageConfig {
    /// Directory of per-scheme NAV history CSVs, one file per scheme code.
    pub fn nav_dir(&self) -> PathBuf {
        self.data_dir.join("nav_history")
    }

    /// Combined long-form series (SchemeCode, Date, NAV).
    pub fn combined_path(&self) -> PathBuf {
        self.data_dir.join("nav_history_all.csv")
    }

    /// Watermark index tracking the last merged date per scheme.
    pub fn meta_path(&self) -> PathBuf {
        self.data_dir.join("nav_history_all.meta.json")
    }

    /// Directory of per-year wide matrices.
    pub fn wide_dir(&self) -> PathBuf {
        self.data_dir.join("nav_wide")
    }

    /// Directory of per-year long-form partitions.
    pub fn year_dir(&self) -> PathBuf {
        self.data_dir.join("nav_year")
    }

    pub fn codes_path(&self) -> PathBuf {
        self.data_dir.join("scheme_codes.csv")
    }

    pub fn categories_path(&self) -> PathBuf {
        self.data_dir.join("scheme_categories.csv")
    }

    pub fn master_path(&self) -> PathBuf {
        self.data_dir.join("mf_master.csv")
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("mf_nav.db")
    }
}

// ── Defaults ─────────────────────────────────────────────────────────────────

fn default_api_base_url() -> String {
    "https://api.mfapi.in".to_string()
}
fn default_amfi_url() -> String {
    "https://www.amfiindia.com/spages/NAVAll.txt".to_string()
}
fn default_connect_timeout_secs() -> u64 {
    5
}
fn default_read_timeout_secs() -> u64 {
    15
}
fn default_request_delay_ms() -> u64 {
    120
}
fn default_jitter_ms() -> u64 {
    80
}
fn default_user_agent() -> String {
    "mfnav-etl/0.1 (personal research dataset builder)".to_string()
}
fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}
fn default_concurrency() -> usize {
    4
}

// ── Loader ───────────────────────────────────────────────────────────────────

impl AppConfig {
    /// Load configuration from file + environment overrides
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();

        let cfg = config::Config::builder()
            .add_source(
                config::File::with_name("config/default")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(
                config::File::with_name("config/local")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(config::Environment::with_prefix("MFNAV").separator("__"))
            .build()?;

        let app_cfg: AppConfig = cfg.try_deserialize().unwrap_or_else(|_| AppConfig::default());
        Ok(app_cfg)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            source: SourceConfig {
                api_base_url: default_api_base_url(),
                amfi_url: default_amfi_url(),
                connect_timeout_secs: default_connect_timeout_secs(),
                read_timeout_secs: default_read_timeout_secs(),
                request_delay_ms: default_request_delay_ms(),
                jitter_ms: default_jitter_ms(),
                user_agent: default_user_agent(),
            },
            storage: StorageConfig {
                data_dir: default_data_dir(),
            },
            pipeline: PipelineConfig {
                concurrency: default_concurrency(),
            },
        }
    }
}
