use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

// Operation deadlines, in seconds. Retention sweeps walk whole year trees on
// the PBX so they get far more time than ordinary commands.
pub const REST_TIMEOUT_SECS: u64 = 15;
pub const SSH_COMMAND_TIMEOUT_SECS: u64 = 25;
pub const SFTP_DOWNLOAD_TIMEOUT_SECS: u64 = 120;
pub const RETENTION_SWEEP_TIMEOUT_SECS: u64 = 600;

/// Hard cap on concurrent transcription/analysis regardless of config.
pub const MAX_CONCURRENT_PROCESSING_CAP: usize = 3;

/// Top-level process config (callscope.toml + CALLSCOPE_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallscopeConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub secrets: SecretsConfig,
}

impl Default for CallscopeConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            engine: EngineConfig::default(),
            secrets: SecretsConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Honor X-Forwarded-* headers when building webhook signature URLs.
    #[serde(default)]
    pub trust_proxy: bool,
    /// Allowed CORS origins. Empty disables CORS handling entirely.
    #[serde(default)]
    pub cors_origins: Vec<String>,
    /// Request body cap in bytes.
    #[serde(default = "default_body_limit")]
    pub body_limit_bytes: usize,
    /// Default tracing filter when RUST_LOG is unset.
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind: default_bind(),
            trust_proxy: false,
            cors_origins: Vec::new(),
            body_limit_bytes: default_body_limit(),
            log_filter: default_log_filter(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Tick cadence and concurrency bounds for the processing engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Simultaneous calls under transcription/analysis. Clamped to [1, 3].
    #[serde(default = "default_one")]
    pub max_concurrent_processing: usize,
    #[serde(default = "default_cdr_tick")]
    pub cdr_tick_seconds: u64,
    #[serde(default = "default_archive_tick")]
    pub archive_tick_seconds: u64,
    #[serde(default = "default_vm_discovery_tick")]
    pub voicemail_discovery_tick_seconds: u64,
    #[serde(default = "default_vm_processing_tick")]
    pub voicemail_processing_tick_seconds: u64,
    #[serde(default = "default_processing_tick")]
    pub processing_tick_seconds: u64,
    #[serde(default = "default_retention_tick")]
    pub retention_tick_seconds: u64,
    #[serde(default = "default_metrics_sample_minutes")]
    pub metrics_sample_minutes: u64,
    #[serde(default = "default_metrics_retention_days")]
    pub metrics_retention_days: i64,
    /// Max CDR rows pulled per tick.
    #[serde(default = "default_cdr_limit")]
    pub cdr_fetch_limit: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_processing: default_one(),
            cdr_tick_seconds: default_cdr_tick(),
            archive_tick_seconds: default_archive_tick(),
            voicemail_discovery_tick_seconds: default_vm_discovery_tick(),
            voicemail_processing_tick_seconds: default_vm_processing_tick(),
            processing_tick_seconds: default_processing_tick(),
            retention_tick_seconds: default_retention_tick(),
            metrics_sample_minutes: default_metrics_sample_minutes(),
            metrics_retention_days: default_metrics_retention_days(),
            cdr_fetch_limit: default_cdr_limit(),
        }
    }
}

impl EngineConfig {
    /// Effective processing concurrency: at least 1, never above the cap.
    pub fn effective_concurrency(&self) -> usize {
        self.max_concurrent_processing
            .clamp(1, MAX_CONCURRENT_PROCESSING_CAP)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SecretsConfig {
    /// 32-byte hex key for at-rest credential encryption. Mandatory at boot;
    /// kept optional here so `--help` and tests work without one.
    pub key_hex: Option<String>,
    /// Email identifying the platform-super tenant. That tenant's OpenAI
    /// credentials and analysis prompt are the platform defaults.
    #[serde(default)]
    pub super_email: Option<String>,
}

fn default_port() -> u16 {
    18620
}
fn default_bind() -> String {
    "127.0.0.1".to_string()
}
fn default_body_limit() -> usize {
    2 * 1024 * 1024
}
fn default_log_filter() -> String {
    "callscope=info,tower_http=warn".to_string()
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.callscope/callscope.db", home)
}
fn default_one() -> usize {
    1
}
fn default_cdr_tick() -> u64 {
    300
}
fn default_archive_tick() -> u64 {
    900
}
fn default_vm_discovery_tick() -> u64 {
    60
}
fn default_vm_processing_tick() -> u64 {
    30
}
fn default_processing_tick() -> u64 {
    15
}
fn default_retention_tick() -> u64 {
    300
}
fn default_metrics_sample_minutes() -> u64 {
    10
}
fn default_metrics_retention_days() -> i64 {
    30
}
fn default_cdr_limit() -> usize {
    1000
}

impl CallscopeConfig {
    /// Load config from a TOML file with CALLSCOPE_* env var overrides.
    ///
    /// Checks in order:
    ///   1. Explicit path argument
    ///   2. CALLSCOPE_CONFIG env var
    ///   3. ~/.callscope/callscope.toml
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .or_else(|| std::env::var("CALLSCOPE_CONFIG").ok())
            .unwrap_or_else(default_config_path);

        let config: CallscopeConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("CALLSCOPE_").split("_"))
            .extract()
            .map_err(|e| crate::error::CoreError::Config(e.to_string()))?;

        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.callscope/callscope.toml", home)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = CallscopeConfig::default();
        assert_eq!(cfg.engine.max_concurrent_processing, 1);
        assert_eq!(cfg.engine.metrics_sample_minutes, 10);
        assert_eq!(cfg.engine.metrics_retention_days, 30);
        assert_eq!(cfg.engine.cdr_fetch_limit, 1000);
    }

    #[test]
    fn concurrency_is_clamped_to_hard_cap() {
        let mut cfg = EngineConfig::default();
        cfg.max_concurrent_processing = 12;
        assert_eq!(cfg.effective_concurrency(), 3);
        cfg.max_concurrent_processing = 0;
        assert_eq!(cfg.effective_concurrency(), 1);
        cfg.max_concurrent_processing = 2;
        assert_eq!(cfg.effective_concurrency(), 2);
    }
}
