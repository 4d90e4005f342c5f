// Environment-based configuration - single source of truth for all env vars.

use tracing::{debug, info, warn};

/// GitHub App credentials used for installation-token minting and webhook
/// signature verification (§4.7). All optional: a deployment with no
/// GitHub App configured falls back to caller-supplied `local_path` fetches.
#[derive(Debug, Clone, Default)]
pub struct GitHubAppConfig {
    pub app_id: Option<String>,
    pub private_key_pem: Option<String>,
    pub webhook_secret: Option<String>,
}

impl GitHubAppConfig {
    fn from_env() -> Self {
        let app_id = read_var("GITHUB_APP_ID");
        let private_key_pem = read_var("GITHUB_APP_PRIVATE_KEY");
        let webhook_secret = read_var("GITHUB_WEBHOOK_SECRET");

        if app_id.is_some() != private_key_pem.is_some() {
            warn!("GITHUB_APP_ID and GITHUB_APP_PRIVATE_KEY must both be set to mint installation tokens");
        }

        Self {
            app_id,
            private_key_pem,
            webhook_secret,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.app_id.is_some() && self.private_key_pem.is_some()
    }
}

fn read_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Log level, constrained to `debug`/`info`/`warn`/`error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "debug" => Some(Self::Debug),
            "info" => Some(Self::Info),
            "warn" => Some(Self::Warn),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    pub fn as_tracing_filter(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Configuration validation result.
#[derive(Debug, Default)]
pub struct ConfigValidation {
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl ConfigValidation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_warning(&mut self, msg: impl Into<String>) {
        self.warnings.push(msg.into());
    }

    pub fn add_error(&mut self, msg: impl Into<String>) {
        self.errors.push(msg.into());
    }

    pub fn report(&self) -> String {
        let mut lines = Vec::new();

        if !self.errors.is_empty() {
            lines.push("Errors:".to_string());
            for err in &self.errors {
                lines.push(format!("  - {}", err));
            }
        }

        if !self.warnings.is_empty() {
            lines.push("Warnings:".to_string());
            for warn in &self.warnings {
                lines.push(format!("  - {}", warn));
            }
        }

        if lines.is_empty() {
            "Configuration OK".to_string()
        } else {
            lines.join("\n")
        }
    }
}

/// Environment configuration - all env vars in one place (§6.4).
#[derive(Debug, Clone)]
pub struct EnvConfig {
    /// PORT
    pub port: u16,
    /// KOTA_ALLOWED_ORIGINS, comma-separated; defaults to localhost/127.0.0.1 on any port.
    pub allowed_origins: Vec<String>,
    /// KOTA_GIT_BASE_URL, used to resolve `full_name` to a clone URL.
    pub git_base_url: String,
    /// GitHub App credentials (§4.7).
    pub github_app: GitHubAppConfig,
    /// KOTADB_AUTO_REINDEX_THRESHOLD_MINUTES, staleness threshold for auto-reindex.
    pub auto_reindex_threshold_minutes: u64,
    /// LOG_LEVEL
    pub log_level: LogLevel,
    /// Data root directory (not itself an env var in §6.4; defaults to `~/.kotadb`,
    /// overridable via KOTADB_DATA_DIR for tests and non-standard deployments).
    pub data_dir: std::path::PathBuf,
    /// Number of index-job workers (default 3, per §4.3).
    pub worker_count: usize,
    /// Auto-reindex rate-limit window in minutes (default 30, per §4.3).
    pub auto_reindex_window_minutes: u64,
}

impl EnvConfig {
    /// Load all environment configuration (call once at startup).
    pub fn load() -> Self {
        info!("loading environment configuration");

        let port = std::env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(8080);

        let allowed_origins = std::env::var("KOTA_ALLOWED_ORIGINS")
            .ok()
            .filter(|s| !s.is_empty())
            .map(|s| s.split(',').map(|o| o.trim().to_string()).collect())
            .unwrap_or_else(|| {
                vec![
                    "http://localhost:*".to_string(),
                    "http://127.0.0.1:*".to_string(),
                ]
            });

        let git_base_url = std::env::var("KOTA_GIT_BASE_URL")
            .ok()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "https://github.com".to_string());

        let auto_reindex_threshold_minutes = std::env::var("KOTADB_AUTO_REINDEX_THRESHOLD_MINUTES")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(60);

        let log_level = std::env::var("LOG_LEVEL")
            .ok()
            .and_then(|v| LogLevel::parse(&v))
            .unwrap_or_else(|| {
                if std::env::var("LOG_LEVEL").is_ok() {
                    warn!("invalid LOG_LEVEL, defaulting to info");
                }
                LogLevel::default()
            });

        let data_dir = std::env::var("KOTADB_DATA_DIR")
            .ok()
            .map(std::path::PathBuf::from)
            .or_else(|| dirs::home_dir().map(|h| h.join(".kotadb")))
            .unwrap_or_else(|| std::path::PathBuf::from(".kotadb"));

        let config = Self {
            port,
            allowed_origins,
            git_base_url,
            github_app: GitHubAppConfig::from_env(),
            auto_reindex_threshold_minutes,
            log_level,
            data_dir,
            worker_count: 3,
            auto_reindex_window_minutes: 30,
        };

        debug!(port = config.port, data_dir = ?config.data_dir, "configuration loaded");
        config
    }

    pub fn validate(&self) -> ConfigValidation {
        let mut validation = ConfigValidation::new();

        if self.allowed_origins.is_empty() {
            validation.add_error("KOTA_ALLOWED_ORIGINS resolved to an empty list");
        }

        if !self.github_app.is_configured() {
            validation.add_warning(
                "GitHub App not configured (GITHUB_APP_ID / GITHUB_APP_PRIVATE_KEY); \
                 installation-token clone auth is unavailable",
            );
        }

        if self.github_app.webhook_secret.is_none() {
            validation.add_warning(
                "GITHUB_WEBHOOK_SECRET not set; webhook signature verification will reject everything",
            );
        }

        validation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_level_parses_known_values() {
        assert_eq!(LogLevel::parse("debug"), Some(LogLevel::Debug));
        assert_eq!(LogLevel::parse("WARN"), Some(LogLevel::Warn));
        assert_eq!(LogLevel::parse("bogus"), None);
    }

    #[test]
    fn validation_warns_without_github_app() {
        let config = EnvConfig {
            port: 8080,
            allowed_origins: vec!["http://localhost:*".to_string()],
            git_base_url: "https://github.com".to_string(),
            github_app: GitHubAppConfig::default(),
            auto_reindex_threshold_minutes: 60,
            log_level: LogLevel::Info,
            data_dir: std::path::PathBuf::from("/tmp/kotadb-test"),
            worker_count: 3,
            auto_reindex_window_minutes: 30,
        };

        let validation = config.validate();
        assert!(validation.is_valid());
        assert!(!validation.warnings.is_empty());
    }

    #[test]
    fn validation_errors_on_empty_origins() {
        let config = EnvConfig {
            port: 8080,
            allowed_origins: vec![],
            git_base_url: "https://github.com".to_string(),
            github_app: GitHubAppConfig::default(),
            auto_reindex_threshold_minutes: 60,
            log_level: LogLevel::Info,
            data_dir: std::path::PathBuf::from("/tmp/kotadb-test"),
            worker_count: 3,
            auto_reindex_window_minutes: 30,
        };

        assert!(!config.validate().is_valid());
    }
}
