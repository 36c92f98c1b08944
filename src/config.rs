use std::env;

/// Runtime configuration, read from environment variables with typed
/// defaults — the same shape as the teacher's `RateLimitConfig::from_env`,
/// generalised to the scheduler's needs (spec.md §10 ambient stack).
#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: String,
    /// Bound on the scheduler's poll interval (spec.md §4.2: "every poll
    /// interval (bounded, e.g. 1 s)").
    pub scheduler_poll_interval_secs: u64,
    /// Max rooms claimed per dispatch pass.
    pub scheduler_batch_size: i64,
    /// Base URL of the outbound messaging-gateway client. Empty disables
    /// real delivery regardless of a room's `send_real_message` flag.
    pub outbound_gateway_base_url: String,
    pub outbound_timeout_secs: u64,
    /// Chat-completions-shaped endpoint for the AI adapter (spec.md §4.4).
    /// Empty falls back to `UnavailableAi`, so `fallback_to_script` rooms
    /// still work without an AI provider configured.
    pub ai_endpoint: String,
    pub ai_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: "data/warming.db".to_string(),
            scheduler_poll_interval_secs: 1,
            scheduler_batch_size: 20,
            outbound_gateway_base_url: String::new(),
            outbound_timeout_secs: 10,
            ai_endpoint: String::new(),
            ai_timeout_secs: 20,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = env::var("DATABASE_PATH") {
            config.database_path = val;
        }
        if let Ok(val) = env::var("SCHEDULER_POLL_INTERVAL_SECS")
            && let Ok(n) = val.parse::<u64>()
        {
            config.scheduler_poll_interval_secs = n;
        }
        if let Ok(val) = env::var("SCHEDULER_BATCH_SIZE")
            && let Ok(n) = val.parse::<i64>()
        {
            config.scheduler_batch_size = n;
        }
        if let Ok(val) = env::var("OUTBOUND_GATEWAY_BASE_URL") {
            config.outbound_gateway_base_url = val;
        }
        if let Ok(val) = env::var("OUTBOUND_TIMEOUT_SECS")
            && let Ok(n) = val.parse::<u64>()
        {
            config.outbound_timeout_secs = n;
        }
        if let Ok(val) = env::var("AI_ENDPOINT") {
            config.ai_endpoint = val;
        }
        if let Ok(val) = env::var("AI_TIMEOUT_SECS")
            && let Ok(n) = val.parse::<u64>()
        {
            config.ai_timeout_secs = n;
        }

        config
    }
}
