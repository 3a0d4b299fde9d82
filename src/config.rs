use anyhow::Result;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main configuration structure for Invoice Relay
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InvoiceRelayConfig {
    /// Workflow engine settings
    pub workflow: WorkflowConfig,
    /// Observability settings
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkflowConfig {
    /// Trigger address of the remote automation workflow
    pub trigger_url: String,
    /// Delay between the visual confirmation stages, in milliseconds
    pub stage_pacing_ms: u64,
    /// Interval of the second-stage status poll, in milliseconds
    pub status_poll_interval_ms: u64,
    /// Outbound request timeout in seconds
    pub request_timeout_seconds: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Enable structured tracing output
    pub tracing_enabled: bool,
    /// Log level
    pub log_level: String,
}

impl Default for InvoiceRelayConfig {
    fn default() -> Self {
        Self {
            workflow: WorkflowConfig {
                trigger_url:
                    "https://modest-stable-terrapin.ngrok-free.app/webhook-test/invoice-postman"
                        .to_string(),
                stage_pacing_ms: 3_000,
                status_poll_interval_ms: 5_000,
                request_timeout_seconds: 30,
            },
            observability: ObservabilityConfig {
                tracing_enabled: true,
                log_level: "info".to_string(),
            },
        }
    }
}

impl InvoiceRelayConfig {
    /// Load configuration from multiple sources with precedence:
    /// 1. Default values
    /// 2. Configuration files (invoice-relay.toml, .invoice-relay-rc)
    /// 3. Environment variables (prefixed with INVOICE_RELAY_)
    pub fn load() -> Result<Self> {
        let defaults = Config::try_from(&InvoiceRelayConfig::default())?;
        let mut builder = Config::builder().add_source(defaults);

        if Path::new("invoice-relay.toml").exists() {
            builder = builder.add_source(File::with_name("invoice-relay"));
        }

        if Path::new(".invoice-relay-rc").exists() {
            builder = builder.add_source(File::with_name(".invoice-relay-rc"));
        }

        builder = builder.add_source(
            Environment::with_prefix("INVOICE_RELAY")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        let mut relay_config: InvoiceRelayConfig = config.try_deserialize()?;

        // The trigger address is the one deployment parameter operators
        // change most, so a plain env var overrides everything.
        if let Ok(url) = std::env::var("INVOICE_RELAY_TRIGGER_URL") {
            relay_config.workflow.trigger_url = url;
        }

        Ok(relay_config)
    }

    /// Save configuration to file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let toml_content = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_content)?;
        Ok(())
    }

    /// Load .env file if it exists
    pub fn load_env_file() -> Result<()> {
        if Path::new(".env").exists() {
            dotenvy::dotenv()?;
            tracing::info!("Loaded environment variables from .env file");
        }
        Ok(())
    }
}

/// Global configuration instance
static CONFIG: std::sync::LazyLock<Result<InvoiceRelayConfig, anyhow::Error>> =
    std::sync::LazyLock::new(|| {
        // Load .env file first
        let _ = InvoiceRelayConfig::load_env_file();
        InvoiceRelayConfig::load()
    });

/// Get the global configuration
pub fn config() -> Result<&'static InvoiceRelayConfig> {
    CONFIG
        .as_ref()
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = InvoiceRelayConfig::default();
        assert!(config.workflow.trigger_url.starts_with("https://"));
        assert_eq!(config.workflow.stage_pacing_ms, 3_000);
        assert_eq!(config.workflow.status_poll_interval_ms, 5_000);
    }

    #[test]
    fn round_trips_through_toml() {
        let config = InvoiceRelayConfig::default();
        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: InvoiceRelayConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.workflow.trigger_url, config.workflow.trigger_url);
        assert_eq!(parsed.observability.log_level, "info");
    }

    #[test]
    fn saves_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("invoice-relay.toml");

        let config = InvoiceRelayConfig::default();
        config.save_to_file(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let parsed: InvoiceRelayConfig = toml::from_str(&text).unwrap();
        assert_eq!(
            parsed.workflow.request_timeout_seconds,
            config.workflow.request_timeout_seconds
        );
    }
}
