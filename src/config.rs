//! # Configuration Management
//!
//! This module loads the service configuration from layered sources:
//! - Default values (built into the code)
//! - An optional `config.toml` next to the binary's working directory
//! - Environment variables with the `APP_` prefix (`__` separates nested keys)
//! - A few platform variables that deployments commonly set directly
//!
//! ## Configuration Priority (highest to lowest):
//! 1. `HOST`, `PORT`, `VALID_URL_DOMAINS`, `QUEUE_STATE_DIR`
//! 2. Environment variables (`APP_SERVER__PORT`, `APP_QUEUE__CONCURRENCY`, ...)
//! 3. Configuration file (`config.toml`)
//! 4. Default values (defined in the Default impl)
//!
//! The configuration is read once at startup and never changes afterwards.

use crate::job::DomainMatcher;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Main application configuration that contains all settings.
///
/// ## Sections:
/// - `server`: where the HTTP API listens
/// - `security`: which hosts jobs may download from, upload to and notify
/// - `queue`: worker pool size and where queued jobs are persisted
/// - `tools`: external binaries and scratch space
/// - `http`: outbound client settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub security: SecurityConfig,
    pub queue: QueueConfig,
    pub tools: ToolsConfig,
    pub http: HttpConfig,
}

/// Server-specific configuration settings.
///
/// ## Common values:
/// - `host = "127.0.0.1"`: Only accept connections from localhost (development)
/// - `host = "0.0.0.0"`: Accept connections from any IP address (production)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Host allow-list for every URL a job touches.
///
/// Patterns support `*` (any run of characters) and `?` (one character) and are matched
/// case-insensitively against the URL host, plus the port when the URL names one.
/// `["*"]` allows everything.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    pub allowed_domains: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Jobs processed at the same time.
    pub concurrency: usize,
    /// Directory holding one JSON record per queued job.
    pub state_dir: PathBuf,
    /// Name under which waveform jobs are enqueued and handled.
    pub job_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    pub ffprobe_bin: String,
    pub audiowaveform_bin: String,
    /// Where scratch files go. System temp directory when unset.
    pub scratch_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Timeout for each outbound request (download, upload, notification).
    pub timeout_seconds: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            security: SecurityConfig {
                allowed_domains: vec!["*".to_string()],
            },
            queue: QueueConfig {
                concurrency: 4,
                state_dir: PathBuf::from("./queue"),
                job_name: "waveform".to_string(),
            },
            tools: ToolsConfig {
                ffprobe_bin: "ffprobe".to_string(),
                audiowaveform_bin: "audiowaveform".to_string(),
                scratch_dir: None,
            },
            http: HttpConfig { timeout_seconds: 300 },
        }
    }
}

impl AppConfig {
    /// Load configuration from `config.toml` and the process environment.
    pub fn load() -> Result<Self> {
        Self::load_from(Some("config"), env::vars().collect())
    }

    /// Load configuration from an optional config file and an explicit set of variables.
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER__PORT=3000`: Override server port
    /// - `APP_QUEUE__STATE_DIR=/var/lib/waveformer`: Override queue directory
    /// - `APP_SECURITY__ALLOWED_DOMAINS=*.example.com,cdn.example.org`: Comma separated list
    /// - `VALID_URL_DOMAINS=*.example.com`: Same list, platform style
    pub fn load_from(file: Option<&str>, vars: HashMap<String, String>) -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?);

        if let Some(file) = file {
            settings = settings.add_source(config::File::with_name(file).required(false));
        }

        settings = settings.add_source(
            config::Environment::with_prefix("APP")
                .prefix_separator("_")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("security.allowed_domains")
                .try_parsing(true)
                .source(Some(vars.clone())),
        );

        if let Some(host) = vars.get("HOST") {
            settings = settings.set_override("server.host", host.as_str())?;
        }

        if let Some(port) = vars.get("PORT") {
            settings = settings.set_override("server.port", port.as_str())?;
        }

        // a blank list counts as unset
        if let Some(domains) = vars.get("VALID_URL_DOMAINS").map(String::as_str).map(split_list) {
            if !domains.is_empty() {
                settings = settings.set_override("security.allowed_domains", domains)?;
            }
        }

        if let Some(dir) = vars.get("QUEUE_STATE_DIR") {
            settings = settings.set_override("queue.state_dir", dir.as_str())?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// ## What this checks:
    /// - Server port is not 0
    /// - At least one worker and one allowed host pattern, and every pattern compiles
    /// - Tool paths and the queue job name are not blank
    /// - The outbound timeout is not 0
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.queue.concurrency == 0 {
            return Err(anyhow::anyhow!("Queue concurrency must be greater than 0"));
        }

        if self.queue.job_name.trim().is_empty() {
            return Err(anyhow::anyhow!("Queue job name cannot be empty"));
        }

        if self.security.allowed_domains.is_empty() {
            return Err(anyhow::anyhow!("At least one allowed domain pattern is required"));
        }

        if self.security.allowed_domains.iter().any(|p| p.trim().is_empty()) {
            return Err(anyhow::anyhow!("Allowed domain patterns cannot be blank"));
        }

        self.domain_matcher()?;

        if self.tools.ffprobe_bin.trim().is_empty() || self.tools.audiowaveform_bin.trim().is_empty() {
            return Err(anyhow::anyhow!("Tool binary paths cannot be empty"));
        }

        if self.http.timeout_seconds == 0 {
            return Err(anyhow::anyhow!("HTTP timeout must be greater than 0"));
        }

        Ok(())
    }

    /// Compile the allow-list into a matcher.
    pub fn domain_matcher(&self) -> Result<DomainMatcher> {
        DomainMatcher::new(&self.security.allowed_domains)
            .map_err(|e| anyhow::anyhow!("Invalid allowed domain pattern: {}", e))
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http.timeout_seconds)
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    /// Test that the default configuration is valid and has expected values.
    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.security.allowed_domains, vec!["*"]);
        assert_eq!(config.queue.concurrency, 4);
        assert_eq!(config.queue.job_name, "waveform");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_without_sources_gives_defaults() {
        let config = AppConfig::load_from(None, HashMap::new()).unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.queue.state_dir, PathBuf::from("./queue"));
        assert_eq!(config.tools.scratch_dir, None);
        assert_eq!(config.http.timeout_seconds, 300);
    }

    #[test]
    fn test_prefixed_environment_overrides() {
        let config = AppConfig::load_from(
            None,
            vars(&[
                ("APP_SERVER__PORT", "9000"),
                ("APP_QUEUE__CONCURRENCY", "8"),
                ("APP_QUEUE__STATE_DIR", "/var/lib/waveformer"),
                ("APP_TOOLS__AUDIOWAVEFORM_BIN", "/opt/bin/audiowaveform"),
            ]),
        )
        .unwrap();

        assert_eq!(config.server.port, 9000);
        assert_eq!(config.queue.concurrency, 8);
        assert_eq!(config.queue.state_dir, PathBuf::from("/var/lib/waveformer"));
        assert_eq!(config.tools.audiowaveform_bin, "/opt/bin/audiowaveform");
        assert_eq!(config.tools.ffprobe_bin, "ffprobe");
    }

    #[test]
    fn test_blank_domain_list_keeps_default() {
        for raw in ["", "  ", " , "] {
            let config = AppConfig::load_from(None, vars(&[("VALID_URL_DOMAINS", raw)])).unwrap();
            assert_eq!(config.security.allowed_domains, vec!["*"]);
            assert!(config.validate().is_ok());
        }
    }

    #[test]
    fn test_platform_overrides() {
        let config = AppConfig::load_from(
            None,
            vars(&[
                ("HOST", "0.0.0.0"),
                ("PORT", "3000"),
                ("VALID_URL_DOMAINS", "*.example.com, cdn.example.org,"),
                ("QUEUE_STATE_DIR", "/tmp/jobs"),
            ]),
        )
        .unwrap();

        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 3000);
        assert_eq!(
            config.security.allowed_domains,
            vec!["*.example.com", "cdn.example.org"]
        );
        assert_eq!(config.queue.state_dir, PathBuf::from("/tmp/jobs"));
    }

    #[test]
    fn test_config_file_layer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("waveformer.toml");
        std::fs::write(
            &path,
            "[queue]\nconcurrency = 2\n\n[security]\nallowed_domains = [\"media.example.com\"]\n",
        )
        .unwrap();

        let config = AppConfig::load_from(path.to_str(), vars(&[("APP_QUEUE__CONCURRENCY", "6")])).unwrap();
        assert_eq!(config.queue.concurrency, 6);
        assert_eq!(config.security.allowed_domains, vec!["media.example.com"]);
    }

    /// Test that validation catches invalid configurations.
    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.queue.concurrency = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.security.allowed_domains.clear();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.security.allowed_domains = vec!["ok.example.com".into(), "  ".into()];
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.tools.ffprobe_bin = String::new();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.http.timeout_seconds = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_domain_matcher_from_config() {
        let mut config = AppConfig::default();
        config.security.allowed_domains = vec!["*.example.com".into()];
        let matcher = config.domain_matcher().unwrap();
        assert!(matcher.is_host_allowed("cdn.example.com"));
        assert!(!matcher.is_host_allowed("example.net"));
    }
}
