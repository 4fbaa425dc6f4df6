use anyhow::Result;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::SubjectId;

pub const DEFAULT_CONFIG_FILE: &str = "supply-relay.toml";

/// Longest busy window accepted from configuration: 30 days.
pub const MAX_TTL_SECONDS: u64 = 30 * 24 * 3600;

/// Main configuration structure for the relay
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Chat bot credentials and admins
    pub bot: BotConfig,
    /// Busy window and sweep timing
    pub gate: GateConfig,
    /// Logging settings
    pub observability: ObservabilityConfig,
    /// Database settings (optional; in-memory storage when absent)
    pub database: Option<DatabaseConfig>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct BotConfig {
    /// Bot API token (BOT_TOKEN also works)
    pub token: Option<String>,
    /// Subjects with admin rights regardless of stored role
    pub admin_ids: Vec<SubjectId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct GateConfig {
    /// How often the timeout watcher sweeps
    pub sweep_interval_seconds: u64,
    /// Busy window for short flows (registration, requests, admin)
    pub short_flow_ttl_seconds: u64,
    /// Busy window for long flows (supplier responses and browsing)
    pub long_flow_ttl_seconds: u64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            sweep_interval_seconds: 5,
            short_flow_ttl_seconds: 300,
            long_flow_ttl_seconds: 600,
        }
    }
}

impl GateConfig {
    /// Every window and the sweep interval must be within 1..=MAX_TTL_SECONDS.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("sweep_interval_seconds", self.sweep_interval_seconds),
            ("short_flow_ttl_seconds", self.short_flow_ttl_seconds),
            ("long_flow_ttl_seconds", self.long_flow_ttl_seconds),
        ] {
            if value == 0 || value > MAX_TTL_SECONDS {
                anyhow::bail!("gate.{name} must be between 1 and {MAX_TTL_SECONDS}, got {value}");
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level used when RUST_LOG is unset
    pub log_level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// SQLite connection string
    pub url: String,
    /// Maximum connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

impl RelayConfig {
    /// Load configuration from multiple sources with precedence:
    /// 1. Default values
    /// 2. supply-relay.toml, if present
    /// 3. Environment variables (prefixed with SUPPLY_RELAY__)
    /// 4. BOT_TOKEN, ADMIN_IDS and DATABASE_URL
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new(DEFAULT_CONFIG_FILE))
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let mut builder = Config::builder();

        if path.exists() {
            builder = builder.add_source(File::from(path));
        }

        builder = builder.add_source(
            Environment::with_prefix("SUPPLY_RELAY")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let mut relay_config: RelayConfig = builder.build()?.try_deserialize()?;
        relay_config.apply_overrides(|key| std::env::var(key).ok());
        relay_config.gate.validate()?;
        Ok(relay_config)
    }

    /// Apply the bare variable names the bot has always understood.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if self.bot.token.is_none() {
            self.bot.token = lookup("BOT_TOKEN").filter(|t| !t.trim().is_empty());
        }

        if let Some(raw) = lookup("ADMIN_IDS") {
            for id in parse_admin_ids(&raw) {
                if !self.bot.admin_ids.contains(&id) {
                    self.bot.admin_ids.push(id);
                }
            }
        }

        if let Some(url) = lookup("DATABASE_URL").filter(|u| !u.trim().is_empty()) {
            match self.database.as_mut() {
                Some(database) => database.url = url,
                None => {
                    self.database = Some(DatabaseConfig {
                        url,
                        max_connections: default_max_connections(),
                    })
                }
            }
        }
    }

    /// Render the effective configuration as TOML
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
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

/// Comma-separated ids; anything that is not a plain number is skipped.
pub fn parse_admin_ids(raw: &str) -> Vec<SubjectId> {
    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty() && part.chars().all(|c| c.is_ascii_digit()))
        .filter_map(|part| part.parse().ok())
        .collect()
}

/// Global configuration instance
static CONFIG: std::sync::LazyLock<Result<RelayConfig, anyhow::Error>> =
    std::sync::LazyLock::new(|| {
        let _ = RelayConfig::load_env_file();
        RelayConfig::load()
    });

/// Get the global configuration
pub fn config() -> Result<&'static RelayConfig> {
    CONFIG
        .as_ref()
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))
}

/// Initialize configuration (called at startup)
pub fn init_config() -> Result<&'static RelayConfig> {
    let config = config()?;
    tracing::info!(
        admins = config.bot.admin_ids.len(),
        database = config.database.is_some(),
        "Configuration loaded successfully"
    );
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn defaults_match_the_documented_windows() {
        let config = RelayConfig::default();
        assert_eq!(config.gate, GateConfig::default());
        assert_eq!(config.gate.sweep_interval_seconds, 5);
        assert_eq!(config.observability.log_level, "info");
        assert!(config.database.is_none());
    }

    #[test]
    fn admin_ids_skip_garbage() {
        assert_eq!(parse_admin_ids("1, 22 ,abc,,-5,333"), vec![1, 22, 333]);
        assert!(parse_admin_ids("").is_empty());
    }

    #[test]
    fn overrides_fill_gaps_without_clobbering() {
        let env: HashMap<&str, &str> = [
            ("BOT_TOKEN", "from-env"),
            ("ADMIN_IDS", "7,8"),
            ("DATABASE_URL", "sqlite://relay.db"),
        ]
        .into_iter()
        .collect();

        let mut config = RelayConfig::default();
        config.bot.token = Some("from-file".into());
        config.bot.admin_ids = vec![7];
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.bot.token.as_deref(), Some("from-file"));
        assert_eq!(config.bot.admin_ids, vec![7, 8]);
        let database = config.database.unwrap();
        assert_eq!(database.url, "sqlite://relay.db");
        assert_eq!(database.max_connections, 5);
    }

    #[test]
    fn loads_partial_toml_file() {
        let mut file = NamedTempFile::with_suffix(".toml").unwrap();
        writeln!(
            file,
            "[gate]\nlong_flow_ttl_seconds = 900\n\n[observability]\njson = false"
        )
        .unwrap();

        let config = RelayConfig::load_from(file.path()).unwrap();
        assert_eq!(config.gate.long_flow_ttl_seconds, 900);
        assert_eq!(config.gate.short_flow_ttl_seconds, 300);
        assert!(!config.observability.json);
    }

    #[test]
    fn absurd_ttls_are_rejected_at_load() {
        let mut file = NamedTempFile::with_suffix(".toml").unwrap();
        writeln!(file, "[gate]\nshort_flow_ttl_seconds = 9999999999999").unwrap();

        let err = RelayConfig::load_from(file.path()).unwrap_err();
        assert!(err.to_string().contains("short_flow_ttl_seconds"));

        let zero = GateConfig {
            long_flow_ttl_seconds: 0,
            ..GateConfig::default()
        };
        assert!(zero.validate().is_err());
        assert!(GateConfig::default().validate().is_ok());
    }

    #[test]
    fn renders_as_toml() {
        let rendered = RelayConfig::default().to_toml().unwrap();
        assert!(rendered.contains("[gate]"));
        assert!(rendered.contains("sweep_interval_seconds = 5"));
    }
}
