use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::browser::stealth::SessionProfile;
use crate::enrich::{EnrichmentSettings, Language};
use crate::error::{Result, ScraperError};
use crate::extract::engine::EngineSettings;
use crate::retry::RetryPolicy;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub server: ServerConfig,
    pub pool: PoolConfig,
    pub proxy: ProxyConfig,
    pub retry: RetryConfig,
    pub extraction: ExtractionConfig,
    pub enrichment: EnrichmentConfig,
    pub session: SessionProfile,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PoolConfig {
    /// Upper bound on concurrent browser sessions; the effective capacity is
    /// additionally capped by the number of distinct proxies.
    pub max_sessions: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProxyConfig {
    pub enabled: bool,
    pub provider_url: String,
    /// Provider token; falls back to the WEBSHARE_API_KEY environment
    /// variable when unset.
    pub api_key: Option<String>,
    /// Development alternative to the provider: `host:port:user:pass`
    /// entries.
    pub static_list: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryConfig {
    pub extraction_attempts: u32,
    pub enrichment_attempts: u32,
    pub base_delay_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExtractionConfig {
    pub base_url: String,
    pub wait_timeout_secs: u64,
    pub poll_interval_ms: u64,
    pub scroll_step_px: u32,
    pub scroll_max_steps: u32,
    pub delay_range: (u64, u64), // milliseconds
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EnrichmentConfig {
    pub api_url: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    /// "it" or "en"
    pub language: String,
    /// Falls back to the OPENAI_API_KEY environment variable when unset.
    pub api_key: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig { port: 4000 },
            pool: PoolConfig { max_sessions: 4 },
            proxy: ProxyConfig {
                enabled: true,
                provider_url: "https://proxy.webshare.io/api/v2/proxy/list/?mode=direct"
                    .to_string(),
                api_key: None,
                static_list: Vec::new(),
            },
            retry: RetryConfig {
                extraction_attempts: 3,
                enrichment_attempts: 2,
                base_delay_ms: 500,
            },
            extraction: ExtractionConfig {
                base_url: "https://www.vivino.com".to_string(),
                wait_timeout_secs: 15,
                poll_interval_ms: 250,
                scroll_step_px: 800,
                scroll_max_steps: 30,
                delay_range: (400, 1200),
            },
            enrichment: EnrichmentConfig {
                api_url: "https://api.openai.com/v1/chat/completions".to_string(),
                model: "gpt-4".to_string(),
                temperature: 0.7,
                max_tokens: 300,
                language: "it".to_string(),
                api_key: None,
            },
            session: SessionProfile::default(),
        }
    }
}

impl Config {
    /// Load from a TOML file, creating a default file when none exists.
    pub fn load(path: &Path) -> Result<Self> {
        info!("Loading configuration from {:?}", path);

        if !path.exists() {
            warn!("Configuration file not found, creating default config at {:?}", path);
            Self::create_default(path)?;
        }

        let content = fs::read_to_string(path)
            .map_err(|e| ScraperError::Config(format!("Failed to read config file: {}", e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| ScraperError::Config(format!("Failed to parse TOML config: {}", e)))?;

        config.validate()?;
        info!("Configuration loaded successfully");
        Ok(config)
    }

    fn create_default(path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(&Config::default())
            .map_err(|e| ScraperError::Config(format!("Failed to serialize default config: {}", e)))?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| ScraperError::Config(format!("Failed to create config directory: {}", e)))?;
        }
        fs::write(path, content)
            .map_err(|e| ScraperError::Config(format!("Failed to write default config: {}", e)))?;

        info!("Default configuration file created at {:?}", path);
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        debug!("Validating configuration");

        if self.server.port < 1024 {
            return Err(ScraperError::Config("port must be between 1024 and 65535".to_string()).into());
        }

        if self.pool.max_sessions == 0 {
            return Err(ScraperError::Config("max_sessions must be greater than 0".to_string()).into());
        }
        if self.pool.max_sessions > 20 {
            return Err(ScraperError::Config(
                "max_sessions cannot exceed 20 for resource safety".to_string(),
            )
            .into());
        }

        if self.retry.extraction_attempts == 0 || self.retry.enrichment_attempts == 0 {
            return Err(ScraperError::Config("retry attempts must be at least 1".to_string()).into());
        }
        if self.retry.extraction_attempts > 10 || self.retry.enrichment_attempts > 10 {
            return Err(ScraperError::Config("retry attempts cannot exceed 10".to_string()).into());
        }
        if self.retry.base_delay_ms > 60_000 {
            return Err(ScraperError::Config(
                "base_delay_ms cannot exceed 60 seconds".to_string(),
            )
            .into());
        }

        if !self.extraction.base_url.starts_with("http://")
            && !self.extraction.base_url.starts_with("https://")
        {
            return Err(ScraperError::Config(
                "base_url must start with http:// or https://".to_string(),
            )
            .into());
        }
        if self.extraction.wait_timeout_secs == 0 {
            return Err(ScraperError::Config("wait_timeout_secs must be greater than 0".to_string()).into());
        }
        if self.extraction.delay_range.0 > self.extraction.delay_range.1 {
            return Err(ScraperError::Config(
                "delay_range minimum must not exceed maximum".to_string(),
            )
            .into());
        }

        for entry in &self.proxy.static_list {
            if entry.split(':').count() != 4 {
                return Err(ScraperError::Config(format!(
                    "Invalid proxy entry '{}', expected 'host:port:user:pass'",
                    entry
                ))
                .into());
            }
        }

        if !(0.0..=2.0).contains(&self.enrichment.temperature) {
            return Err(ScraperError::Config(
                "enrichment temperature must be between 0.0 and 2.0".to_string(),
            )
            .into());
        }

        debug!("Configuration validation passed");
        Ok(())
    }

    /// Provider token from config or environment.
    pub fn proxy_api_key(&self) -> Option<String> {
        self.proxy
            .api_key
            .clone()
            .or_else(|| std::env::var("WEBSHARE_API_KEY").ok())
    }

    /// Enrichment key from config or environment.
    pub fn enrichment_api_key(&self) -> Option<String> {
        self.enrichment
            .api_key
            .clone()
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            base_url: self.extraction.base_url.clone(),
            wait_timeout: Duration::from_secs(self.extraction.wait_timeout_secs),
            poll_interval: Duration::from_millis(self.extraction.poll_interval_ms),
            scroll_step_px: self.extraction.scroll_step_px,
            scroll_max_steps: self.extraction.scroll_max_steps,
            delay_range: self.extraction.delay_range,
        }
    }

    pub fn enrichment_settings(&self) -> EnrichmentSettings {
        EnrichmentSettings {
            api_url: self.enrichment.api_url.clone(),
            model: self.enrichment.model.clone(),
            temperature: self.enrichment.temperature,
            max_tokens: self.enrichment.max_tokens,
            language: Language::from_code(&self.enrichment.language),
        }
    }

    pub fn extraction_retry(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry.extraction_attempts,
            Duration::from_millis(self.retry.base_delay_ms),
        )
    }

    pub fn enrichment_retry(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry.enrichment_attempts,
            Duration::from_millis(self.retry.base_delay_ms),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_load_creates_default_config() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("config.toml");

        let config = Config::load(&config_path).unwrap();

        assert_eq!(config.server.port, 4000);
        assert_eq!(config.pool.max_sessions, 4);
        assert_eq!(config.retry.extraction_attempts, 3);
        assert_eq!(config.retry.enrichment_attempts, 2);
        assert!(config_path.exists());
    }

    #[test]
    fn test_load_roundtrips_saved_file() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("config.toml");

        // first load writes the default file; second load parses it back
        let first = Config::load(&config_path).unwrap();
        let second = Config::load(&config_path).unwrap();
        assert_eq!(first.extraction.base_url, second.extraction.base_url);
        assert_eq!(first.session.user_agent, second.session.user_agent);
    }

    #[test]
    fn test_validation_rejects_zero_sessions() {
        let mut config = Config::default();
        config.pool.max_sessions = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_zero_retry_attempts() {
        let mut config = Config::default();
        config.retry.extraction_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_inverted_delay_range() {
        let mut config = Config::default();
        config.extraction.delay_range = (5000, 1000);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_malformed_static_proxy() {
        let mut config = Config::default();
        config.proxy.static_list = vec!["10.0.0.1:8080".to_string()];
        assert!(config.validate().is_err());

        config.proxy.static_list = vec!["10.0.0.1:8080:user:pass".to_string()];
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_bad_base_url() {
        let mut config = Config::default();
        config.extraction.base_url = "vivino.com".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_engine_settings_conversion() {
        let config = Config::default();
        let settings = config.engine_settings();

        assert_eq!(settings.wait_timeout, Duration::from_secs(15));
        assert_eq!(settings.poll_interval, Duration::from_millis(250));
        assert_eq!(settings.base_url, "https://www.vivino.com");
    }

    #[test]
    fn test_retry_policies_use_configured_budgets() {
        let config = Config::default();
        assert_eq!(config.extraction_retry().max_attempts, 3);
        assert_eq!(config.enrichment_retry().max_attempts, 2);
        assert_eq!(
            config.extraction_retry().base_delay,
            Duration::from_millis(500)
        );
    }
}
