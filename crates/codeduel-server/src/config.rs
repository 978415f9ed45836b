use serde::Deserialize;

use codeduel_codeforces::CodeforcesConfig;

/// Top-level engine configuration, loaded from `duel.toml`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub database: DatabaseConfig,
    pub polling: PollingConfig,
    pub rooms: RoomsConfig,
    pub limits: LimitsConfig,
    pub codeforces: CodeforcesConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://codeduel.db?mode=rwc".to_string(),
        }
    }
}

/// Verdict polling cadence.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    /// Delay between poll ticks per room. The first tick fires immediately.
    pub interval_ms: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self { interval_ms: 5000 }
    }
}

/// Room lifecycle configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RoomsConfig {
    /// Waiting rooms idle past this are abandoned by the reaper.
    pub idle_timeout_secs: u64,
    pub idle_check_interval_secs: u64,
}

impl Default for RoomsConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 600,
            idle_check_interval_secs: 60,
        }
    }
}

/// Infrastructure limits.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Outbound event buffer per transport session. Slow clients drop
    /// events past this rather than blocking the engine.
    pub session_event_buffer: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            session_event_buffer: 64,
        }
    }
}

impl ServerConfig {
    /// Validate configuration, exiting on fatal issues.
    pub fn validate(&self) {
        if self.polling.interval_ms == 0 {
            tracing::error!("polling.interval_ms must be > 0");
            std::process::exit(1);
        }
        if self.rooms.idle_timeout_secs == 0 {
            tracing::error!("rooms.idle_timeout_secs must be > 0");
            std::process::exit(1);
        }
        if self.rooms.idle_check_interval_secs == 0 {
            tracing::error!("rooms.idle_check_interval_secs must be > 0");
            std::process::exit(1);
        }
        if self.limits.session_event_buffer == 0 {
            tracing::error!("limits.session_event_buffer must be > 0");
            std::process::exit(1);
        }
        if self.codeforces.min_call_interval_ms == 0 {
            tracing::error!("codeforces.min_call_interval_ms must be > 0");
            std::process::exit(1);
        }
        if self.codeforces.api_base.is_empty() {
            tracing::error!("codeforces.api_base must not be empty");
            std::process::exit(1);
        }

        if self.polling.interval_ms < self.codeforces.min_call_interval_ms {
            tracing::warn!(
                poll_ms = self.polling.interval_ms,
                gate_ms = self.codeforces.min_call_interval_ms,
                "Poll interval is shorter than the API call gate; ticks will queue"
            );
        }
    }

    /// Load config from `duel.toml` if it exists, then apply env overrides.
    pub fn load() -> Self {
        let mut config = match std::fs::read_to_string("duel.toml") {
            Ok(content) => match toml::from_str::<ServerConfig>(&content) {
                Ok(cfg) => {
                    tracing::info!("Loaded configuration from duel.toml");
                    cfg
                },
                Err(e) => {
                    tracing::warn!("Failed to parse duel.toml: {e}, using defaults");
                    ServerConfig::default()
                },
            },
            Err(_) => {
                tracing::info!("No duel.toml found, using defaults");
                ServerConfig::default()
            },
        };

        // Environment variable overrides
        if let Ok(url) = std::env::var("DUEL_DATABASE_URL")
            && !url.is_empty()
        {
            config.database.url = url;
        }
        if let Ok(val) = std::env::var("DUEL_POLL_INTERVAL_MS")
            && let Ok(n) = val.parse::<u64>()
        {
            config.polling.interval_ms = n;
        }
        if let Ok(base) = std::env::var("DUEL_CF_API_BASE")
            && !base.is_empty()
        {
            config.codeforces.api_base = base;
        }

        config
    }
}
