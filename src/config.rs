// src/config.rs

use chrono::NaiveTime;
use serde::Deserialize;
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};
use url::Url;

use crate::error::ConfigError;
use crate::plan::YearPolicy;

pub const ENV_USER: &str = "VP_MOODLE_USER";
pub const ENV_PASSWORD: &str = "VP_MOODLE_PASSWORD";

#[derive(Debug, Clone)]
pub struct MoodleConfig {
    pub login_url: Url,
    pub document_url: Url,
    pub user: String,
    pub password: String,
    pub timeout_secs: u64,
    pub retries: u32,
    pub backoff_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TabulaConfig {
    pub java: String,
    pub jar: PathBuf,
}

impl Default for TabulaConfig {
    fn default() -> Self {
        Self {
            java: "java".into(),
            jar: "tabula-1.0.2-jar-with-dependencies.jar".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub pdf: PathBuf,
    pub header_csv: PathBuf,
    pub body_csv: PathBuf,
    pub users_db: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            pdf: "Vertretungsplan.pdf".into(),
            header_csv: "header.csv".into(),
            body_csv: "body.csv".into(),
            users_db: "users_db.json".into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub moodle: MoodleConfig,
    pub tabula: TabulaConfig,
    pub paths: PathsConfig,
    /// Local time of the daily run.
    pub daily_at: NaiveTime,
    pub cache_ttl: Duration,
    pub year_policy: YearPolicy,
}

// ----- file layout -----

#[derive(Deserialize)]
struct RawMoodle {
    login_url: Url,
    document_url: Url,
    user: Option<String>,
    password: Option<String>,
    #[serde(default = "default_timeout_secs")]
    timeout_secs: u64,
    #[serde(default = "default_retries")]
    retries: u32,
    #[serde(default = "default_backoff_ms")]
    backoff_ms: u64,
}

#[derive(Deserialize)]
struct RawDaily {
    #[serde(default = "default_daily_at")]
    at: String,
}

impl Default for RawDaily {
    fn default() -> Self {
        Self {
            at: default_daily_at(),
        }
    }
}

#[derive(Deserialize)]
struct RawConfig {
    moodle: RawMoodle,
    #[serde(default)]
    tabula: TabulaConfig,
    #[serde(default)]
    paths: PathsConfig,
    #[serde(default)]
    daily: RawDaily,
    #[serde(default = "default_cache_ttl_secs")]
    cache_ttl_secs: u64,
    #[serde(default)]
    year_policy: YearPolicy,
}

fn default_timeout_secs() -> u64 {
    30
}
fn default_retries() -> u32 {
    3
}
fn default_backoff_ms() -> u64 {
    500
}
fn default_daily_at() -> String {
    "22:10".into()
}
fn default_cache_ttl_secs() -> u64 {
    600
}

impl Config {
    /// Load the YAML file at `path`; credentials from the environment win
    /// over the file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&text, |key| std::env::var(key).ok()).map_err(|e| match e {
            ConfigError::Yaml { source, .. } => ConfigError::Yaml {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })
    }

    /// Parse settings from YAML, looking up overrides through `env`.
    pub fn from_yaml<F>(text: &str, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let raw: RawConfig = serde_yaml::from_str(text).map_err(|source| ConfigError::Yaml {
            path: PathBuf::new(),
            source,
        })?;

        let user = env(ENV_USER)
            .or(raw.moodle.user)
            .filter(|s| !s.is_empty())
            .ok_or(ConfigError::Missing("moodle.user"))?;
        let password = env(ENV_PASSWORD)
            .or(raw.moodle.password)
            .filter(|s| !s.is_empty())
            .ok_or(ConfigError::Missing("moodle.password"))?;

        let daily_at = NaiveTime::parse_from_str(raw.daily.at.trim(), "%H:%M").map_err(|e| {
            ConfigError::Invalid {
                key: "daily.at",
                reason: format!("{:?}: {}", raw.daily.at, e),
            }
        })?;

        Ok(Self {
            moodle: MoodleConfig {
                login_url: raw.moodle.login_url,
                document_url: raw.moodle.document_url,
                user,
                password,
                timeout_secs: raw.moodle.timeout_secs,
                retries: raw.moodle.retries,
                backoff_ms: raw.moodle.backoff_ms,
            },
            tabula: raw.tabula,
            paths: raw.paths,
            daily_at,
            cache_ttl: Duration::from_secs(raw.cache_ttl_secs),
            year_policy: raw.year_policy,
        })
    }
}
