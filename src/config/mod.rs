use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_environment")]
    pub environment: String,

    pub database_url: String,

    /// Run pending migrations at startup.
    #[serde(default = "default_true")]
    pub run_migrations: bool,

    // Matcher settings
    #[serde(default = "default_true")]
    pub matcher_enabled: bool,

    #[serde(default = "default_matcher_interval")]
    pub matcher_interval_ms: u64,

    // Queue capacities
    #[serde(default = "default_queue_capacity")]
    pub settlement_queue_capacity: usize,

    #[serde(default = "default_queue_capacity")]
    pub amm_queue_capacity: usize,
}

fn default_environment() -> String {
    "development".to_string()
}

fn default_true() -> bool {
    true
}

fn default_matcher_interval() -> u64 {
    500
}

fn default_queue_capacity() -> usize {
    1000
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::default())
            .build()?;

        let app_config: AppConfig = config.try_deserialize()?;
        Ok(app_config)
    }
}
