use std::env;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

fn profiled_env_u64(profile: &str, key: &str, default: u64) -> u64 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_u64_opt(profile: &str, key: &str) -> Option<u64> {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .filter(|v| *v > 0)
}

fn profiled_env_usize(profile: &str, key: &str, default: usize) -> usize {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .filter(|v| *v > 0)
        .unwrap_or(default)
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub storage: StorageConfig,
    pub aws: AwsConfig,
    pub worker: WorkerConfig,
    pub azure: AzureConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `CHAOS_PROFILE`. When set (e.g. `PROD`), every
    /// key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("CHAOS_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Self {
            profile: p.to_string(),
            storage: StorageConfig::from_env_profiled(p),
            aws: AwsConfig::from_env_profiled(p),
            worker: WorkerConfig::from_env_profiled(p),
            azure: AzureConfig::from_env_profiled(p),
        }
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Print a redacted summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!("  storage:  data_dir={}", self.storage.data_dir.display());
        tracing::info!(
            "  aws:      region={}, bucket={}",
            self.aws.region,
            self.aws.s3_bucket.as_deref().unwrap_or("(none)")
        );
        tracing::info!(
            "  worker:   settings={}, scheduler_tick={}s, trigger_tick={}, max_concurrency={}, call_timeout={}s, activity_retention={}h",
            self.worker.settings_path.display(),
            self.worker.scheduler_tick_secs,
            self.worker
                .trigger_tick_secs
                .map_or_else(|| "trigger window".to_string(), |s| format!("{s}s")),
            self.worker.max_concurrency,
            self.worker.call_timeout_secs,
            self.worker.activity_retention_hours
        );
        tracing::info!(
            "  azure:    endpoint={}, subscription={}, token={}",
            self.azure.management_endpoint,
            self.azure.subscription_id.as_deref().unwrap_or("(none)"),
            if self.azure.access_token.is_some() { "set" } else { "(none)" }
        );
    }

    /// Redacted view safe for printing (no secrets).
    pub fn redacted_summary(&self) -> serde_json::Value {
        serde_json::json!({
            "profile": self.profile_label(),
            "storage": { "data_dir": self.storage.data_dir },
            "aws": {
                "region": self.aws.region,
                "s3_bucket": self.aws.s3_bucket,
                "configured": self.aws.is_configured(),
            },
            "worker": {
                "settings_path": self.worker.settings_path,
                "scheduler_tick_secs": self.worker.scheduler_tick_secs,
                "trigger_tick_secs": self.worker.trigger_tick_secs,
                "max_concurrency": self.worker.max_concurrency,
                "call_timeout_secs": self.worker.call_timeout_secs,
                "activity_retention_hours": self.worker.activity_retention_hours,
            },
            "azure": {
                "management_endpoint": self.azure.management_endpoint,
                "subscription_id": self.azure.subscription_id,
                "configured": self.azure.is_configured(),
            },
        })
    }
}

// ── Storage ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
}

impl StorageConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            data_dir: PathBuf::from(profiled_env_or(p, "DATA_DIR", "data")),
        }
    }
}

// ── AWS / S3 ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AwsConfig {
    pub region: String,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub session_token: Option<String>,
    pub s3_bucket: Option<String>,
    pub s3_prefix: Option<String>,
    pub endpoint_url: Option<String>,
}

impl AwsConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            region: profiled_env_or(p, "AWS_REGION", "us-east-1"),
            access_key_id: profiled_env_opt(p, "AWS_ACCESS_KEY_ID"),
            secret_access_key: profiled_env_opt(p, "AWS_SECRET_ACCESS_KEY"),
            session_token: profiled_env_opt(p, "AWS_SESSION_TOKEN"),
            s3_bucket: profiled_env_opt(p, "S3_BUCKET"),
            s3_prefix: profiled_env_opt(p, "S3_PREFIX"),
            endpoint_url: profiled_env_opt(p, "AWS_ENDPOINT_URL"),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.access_key_id.is_some() && self.s3_bucket.is_some()
    }
}

// ── Worker ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Path of the chaos settings document.
    pub settings_path: PathBuf,
    pub scheduler_tick_secs: u64,
    /// `None` ticks the trigger once per trigger window.
    pub trigger_tick_secs: Option<u64>,
    /// Bound on concurrent store writes and executor invocations.
    pub max_concurrency: usize,
    pub call_timeout_secs: u64,
    /// How long finished activities are kept.
    pub activity_retention_hours: u64,
}

impl WorkerConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            settings_path: PathBuf::from(profiled_env_or(p, "CHAOS_SETTINGS", "chaos-settings.json")),
            scheduler_tick_secs: profiled_env_u64(p, "CHAOS_SCHEDULER_TICK_SECS", 300),
            trigger_tick_secs: profiled_env_u64_opt(p, "CHAOS_TRIGGER_TICK_SECS"),
            max_concurrency: profiled_env_usize(p, "CHAOS_MAX_CONCURRENCY", 20),
            call_timeout_secs: profiled_env_u64(p, "CHAOS_CALL_TIMEOUT_SECS", 30),
            activity_retention_hours: profiled_env_u64(p, "CHAOS_ACTIVITY_RETENTION_HOURS", 168),
        }
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    /// Capped at a century.
    pub fn activity_retention(&self) -> chrono::Duration {
        chrono::Duration::hours(self.activity_retention_hours.min(876_000) as i64)
    }
}

// ── Azure resource manager ────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AzureConfig {
    pub subscription_id: Option<String>,
    pub access_token: Option<String>,
    pub management_endpoint: String,
    pub api_version: String,
}

impl AzureConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            subscription_id: profiled_env_opt(p, "AZURE_SUBSCRIPTION_ID"),
            access_token: profiled_env_opt(p, "AZURE_ACCESS_TOKEN"),
            management_endpoint: profiled_env_or(p, "AZURE_MANAGEMENT_ENDPOINT", "https://management.azure.com"),
            api_version: profiled_env_or(p, "AZURE_COMPUTE_API_VERSION", "2023-03-01"),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.subscription_id.is_some() && self.access_token.is_some()
    }
}
