use std::{
    env, fs,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{
    error::{RequestError, Result},
    service::ServiceSettings,
    snowflake::MAX_WORKER_ID,
    token::TokenManagerConfig,
};

pub const DEFAULT_PORT: u16 = 7171;
const CONFIG_DIR: &str = ".reqflow";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "default_jwt_issuer")]
    pub issuer: String,
    #[serde(default = "default_jwt_audience")]
    pub audience: String,
    /// HS256 signing secret; generated on first load when empty.
    #[serde(default)]
    pub secret: String,
    #[serde(default = "default_jwt_ttl_secs")]
    pub default_ttl_secs: u64,
    #[serde(default = "default_jwt_clock_skew_secs")]
    pub clock_skew_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            issuer: default_jwt_issuer(),
            audience: default_jwt_audience(),
            secret: generate_secret(),
            default_ttl_secs: default_jwt_ttl_secs(),
            clock_skew_secs: default_jwt_clock_skew_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub port: u16,
    pub data_dir: PathBuf,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default = "default_list_page_size")]
    pub list_page_size: usize,
    #[serde(default = "default_page_limit")]
    pub page_limit: usize,
    #[serde(default = "default_refresh_on_write")]
    pub refresh_on_write: bool,
    #[serde(default)]
    pub snowflake_worker_id: u16,
    #[serde(default)]
    pub auth: AuthConfig,
}

impl Default for Config {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            port: DEFAULT_PORT,
            data_dir: default_data_dir(),
            created_at: now,
            updated_at: now,
            list_page_size: default_list_page_size(),
            page_limit: default_page_limit(),
            refresh_on_write: default_refresh_on_write(),
            snowflake_worker_id: 0,
            auth: AuthConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConfigUpdate {
    pub port: Option<u16>,
    pub data_dir: Option<PathBuf>,
    pub list_page_size: Option<usize>,
    pub page_limit: Option<usize>,
    pub refresh_on_write: Option<bool>,
    pub snowflake_worker_id: Option<u16>,
    pub issuer: Option<String>,
    pub audience: Option<String>,
    pub default_ttl_secs: Option<u64>,
    pub rotate_secret: bool,
}

pub fn default_config_path() -> Result<PathBuf> {
    let mut path = default_config_root()?;
    path.push("config.toml");
    Ok(path)
}

pub fn load_or_default(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let config_path = match path {
        Some(path) => path,
        None => default_config_path()?,
    };
    if let Some(parent) = config_path.parent() {
        fs::create_dir_all(parent)?;
    }

    if config_path.exists() {
        let contents = fs::read_to_string(&config_path)?;
        let mut cfg: Config = toml::from_str(&contents)?;
        let updated = cfg.ensure_secret();
        cfg.ensure_data_dir()?;
        if updated {
            cfg.save(&config_path)?;
        }
        Ok((cfg, config_path))
    } else {
        let cfg = Config::default();
        cfg.ensure_data_dir()?;
        cfg.save(&config_path)?;
        Ok((cfg, config_path))
    }
}

impl Config {
    pub fn save(&self, path: &Path) -> Result<()> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    pub fn apply_update(&mut self, update: ConfigUpdate) {
        if let Some(port) = update.port {
            self.port = port;
        }
        if let Some(dir) = update.data_dir {
            self.data_dir = dir;
        }
        if let Some(list_page_size) = update.list_page_size {
            self.list_page_size = list_page_size.max(1);
        }
        if let Some(page_limit) = update.page_limit {
            self.page_limit = page_limit.max(1);
        }
        if let Some(refresh) = update.refresh_on_write {
            self.refresh_on_write = refresh;
        }
        if let Some(worker_id) = update.snowflake_worker_id {
            self.snowflake_worker_id = worker_id.min(MAX_WORKER_ID);
        }
        if let Some(issuer) = update.issuer {
            self.auth.issuer = issuer;
        }
        if let Some(audience) = update.audience {
            self.auth.audience = audience;
        }
        if let Some(ttl) = update.default_ttl_secs {
            self.auth.default_ttl_secs = ttl;
        }
        if update.rotate_secret {
            self.auth.secret = generate_secret();
        }
        self.updated_at = Utc::now();
    }

    pub fn ensure_data_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.data_dir)?;
        Ok(())
    }

    fn ensure_secret(&mut self) -> bool {
        if !self.auth.secret.trim().is_empty() {
            return false;
        }
        self.auth.secret = generate_secret();
        self.updated_at = Utc::now();
        true
    }

    pub fn store_path(&self) -> PathBuf {
        self.data_dir.join("records")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }

    pub fn token_manager_config(&self) -> Result<TokenManagerConfig> {
        if self.auth.secret.trim().is_empty() {
            return Err(RequestError::Config(
                "auth.secret is not configured".to_string(),
            ));
        }
        let clock_skew = self.auth.clock_skew_secs.min(300);
        Ok(TokenManagerConfig {
            issuer: self.auth.issuer.clone(),
            audience: self.auth.audience.clone(),
            secret: self.auth.secret.clone(),
            default_ttl: Duration::seconds(self.auth.default_ttl_secs.min(i64::MAX as u64) as i64),
            clock_skew: Duration::seconds(clock_skew as i64),
        })
    }

    pub fn service_settings(&self) -> ServiceSettings {
        let page_limit = self.page_limit.max(1);
        ServiceSettings {
            page_size: self.list_page_size.clamp(1, page_limit),
            page_limit,
            refresh_on_write: self.refresh_on_write,
        }
    }
}

fn default_config_root() -> Result<PathBuf> {
    env::current_dir()
        .map(|dir| dir.join(CONFIG_DIR))
        .map_err(|err| RequestError::Config(err.to_string()))
}

fn generate_secret() -> String {
    format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple())
}

fn default_jwt_issuer() -> String {
    "reqflow://self".to_string()
}

fn default_jwt_audience() -> String {
    "reqflow-clients".to_string()
}

fn default_jwt_ttl_secs() -> u64 {
    3_600
}

fn default_jwt_clock_skew_secs() -> u64 {
    30
}

fn default_data_dir() -> PathBuf {
    default_config_root().unwrap_or_else(|_| PathBuf::from(CONFIG_DIR))
}

fn default_list_page_size() -> usize {
    25
}

fn default_page_limit() -> usize {
    100
}

fn default_refresh_on_write() -> bool {
    true
}
