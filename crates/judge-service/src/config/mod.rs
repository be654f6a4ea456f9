//! Configuration loading: a three-layer `config` crate stack (base file,
//! environment-specific file, `JUDGE_`-prefixed env var overrides).

use once_cell::sync::OnceCell;
use serde::Deserialize;

mod app_env;

pub use app_env::app_env;

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub grpc: GrpcSettings,
    pub retain: usize,
    pub hbs: HbsSettings,
    pub alarm: AlarmSettings,
    pub reap: ReapSettings,
    pub redis_url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GrpcSettings {
    pub listen_addr: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct HbsSettings {
    pub servers: Vec<String>,
    pub timeout_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AlarmSettings {
    pub queue_pattern: String,
    pub min_interval: i64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReapSettings {
    pub interval_secs: u64,
    pub horizon_secs: i64,
}

pub fn settings() -> &'static Settings {
    static SETTINGS: OnceCell<Settings> = OnceCell::new();
    SETTINGS.get_or_init(|| load_settings().expect("failed to load settings"))
}

fn load_settings() -> Result<Settings, config::ConfigError> {
    let mut builder = config::Config::default();

    let current_dir = std::env::current_dir().expect("current directory is available");
    let config_dir = current_dir.join("config");

    builder.merge(config::File::from(config_dir.join("base")).required(true))?;
    builder.merge(config::File::from(config_dir.join(app_env().as_str())).required(false))?;
    builder.merge(config::Environment::with_prefix("JUDGE").separator("__"))?;

    builder.try_into()
}
