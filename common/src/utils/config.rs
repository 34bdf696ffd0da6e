use chrono_tz::Tz;
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Clone, Deserialize, Debug)]
pub struct AppConfig {
    pub model_api_key: String,
    #[serde(default = "default_model_base_url")]
    pub model_base_url: String,
    #[serde(default = "default_chat_model")]
    pub chat_model: String,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    #[serde(default = "default_embedding_dim")]
    pub embedding_dim: u32,
    #[serde(default = "default_daily_limit_user")]
    pub daily_limit_user: u32,
    #[serde(default = "default_daily_limit_ip")]
    pub daily_limit_ip: u32,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    pub corpus_url: String,
    #[serde(default)]
    pub corpus_username: String,
    #[serde(default)]
    pub corpus_password: String,
    #[serde(default = "default_namespace")]
    pub corpus_namespace: String,
    #[serde(default = "default_database")]
    pub corpus_database: String,
    #[serde(default = "default_vector_index_name")]
    pub vector_index_name: String,
    #[serde(default = "default_fail_open_authed")]
    pub rate_limit_fail_open_authed: bool,
    #[serde(default = "default_turn_deadline_ms")]
    pub turn_deadline_ms: u64,
    #[serde(default = "default_router_timeout_ms")]
    pub router_timeout_ms: u64,
    #[serde(default = "default_function_timeout_ms")]
    pub function_timeout_ms: u64,
    #[serde(default = "default_synthesizer_timeout_ms")]
    pub synthesizer_timeout_ms: u64,
    #[serde(default = "default_model_call_timeout_ms")]
    pub model_call_timeout_ms: u64,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    /// Band classification deltas, expressed as fractions of a university's
    /// formula scale. Exposed so admission counselors can tune placement bands
    /// without a redeploy.
    #[serde(default = "default_band_delta_stable")]
    pub band_delta_stable: f64,
    #[serde(default = "default_band_delta_fit")]
    pub band_delta_fit: f64,
    #[serde(default = "default_band_delta_reach")]
    pub band_delta_reach: f64,
    #[serde(default = "default_band_delta_challenge")]
    pub band_delta_challenge: f64,
}

fn default_model_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_chat_model() -> String {
    "gpt-4o".to_string()
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_embedding_dim() -> u32 {
    768
}

fn default_daily_limit_user() -> u32 {
    50
}

fn default_daily_limit_ip() -> u32 {
    10
}

fn default_timezone() -> String {
    "Asia/Seoul".to_string()
}

fn default_namespace() -> String {
    "uniroad".to_string()
}

fn default_database() -> String {
    "corpus".to_string()
}

fn default_vector_index_name() -> String {
    "idx_embedding_document_chunk".to_string()
}

fn default_fail_open_authed() -> bool {
    true
}

fn default_turn_deadline_ms() -> u64 {
    90_000
}

fn default_router_timeout_ms() -> u64 {
    15_000
}

fn default_function_timeout_ms() -> u64 {
    20_000
}

fn default_synthesizer_timeout_ms() -> u64 {
    60_000
}

fn default_model_call_timeout_ms() -> u64 {
    30_000
}

fn default_http_port() -> u16 {
    3000
}

fn default_band_delta_stable() -> f64 {
    0.015
}

fn default_band_delta_fit() -> f64 {
    0.015
}

fn default_band_delta_reach() -> f64 {
    0.035
}

fn default_band_delta_challenge() -> f64 {
    0.060
}

impl AppConfig {
    /// Service reference time zone for quota day boundaries. Invalid names
    /// fall back to UTC with a warning rather than refusing requests.
    pub fn reference_timezone(&self) -> Tz {
        match self.timezone.parse::<Tz>() {
            Ok(tz) => tz,
            Err(_) => {
                tracing::warn!(
                    "Invalid timezone '{}' configured, defaulting to UTC",
                    self.timezone
                );
                chrono_tz::UTC
            }
        }
    }
}

pub fn get_config() -> Result<AppConfig, ConfigError> {
    let config = Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(Environment::default())
        .build()?;

    config.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_config() -> AppConfig {
        let config = Config::builder()
            .set_override("model_api_key", "test-key")
            .unwrap()
            .set_override("corpus_url", "mem://")
            .unwrap()
            .build()
            .unwrap();
        config.try_deserialize().unwrap()
    }

    #[test]
    fn defaults_match_service_policy() {
        let config = minimal_config();
        assert_eq!(config.daily_limit_user, 50);
        assert_eq!(config.daily_limit_ip, 10);
        assert_eq!(config.embedding_dim, 768);
        assert_eq!(config.turn_deadline_ms, 90_000);
        assert!(config.rate_limit_fail_open_authed);
    }

    #[test]
    fn reference_timezone_parses_iana_names() {
        let config = minimal_config();
        assert_eq!(config.reference_timezone(), chrono_tz::Asia::Seoul);
    }

    #[test]
    fn invalid_timezone_falls_back_to_utc() {
        let mut config = minimal_config();
        config.timezone = "Mars/Olympus_Mons".to_string();
        assert_eq!(config.reference_timezone(), chrono_tz::UTC);
    }
}
