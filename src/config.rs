use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use crate::scheduler::types::DEFAULT_INITIAL_STRENGTH;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: IpAddr,
    pub port: u16,
    pub log_level: String,
    pub scheduler: SchedulerConfig,
}

impl Config {
    pub fn from_env() -> Self {
        let port = std::env::var("PORT")
            .ok()
            .and_then(|value| value.parse::<u16>().ok())
            .unwrap_or(3000);

        let host = std::env::var("HOST")
            .ok()
            .and_then(|value| value.parse::<IpAddr>().ok())
            .unwrap_or(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)));

        let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        Self {
            host,
            port,
            log_level,
            scheduler: SchedulerConfig::from_env(),
        }
    }

    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

/// Daily task sizing and scoring defaults.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub daily_review_limit: usize,
    pub daily_new_words: usize,
    pub initial_strength: f64,
    /// Fixes the jitter stream when set.
    pub jitter_seed: Option<u64>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            daily_review_limit: 30,
            daily_new_words: 10,
            initial_strength: DEFAULT_INITIAL_STRENGTH,
            jitter_seed: None,
        }
    }
}

impl SchedulerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let daily_review_limit = env_parse("DAILY_REVIEW_LIMIT").unwrap_or(defaults.daily_review_limit);
        let daily_new_words = env_parse("DAILY_NEW_WORDS").unwrap_or(defaults.daily_new_words);
        let initial_strength = env_parse::<f64>("INITIAL_STRENGTH")
            .filter(|v| v.is_finite() && *v >= 0.0)
            .unwrap_or(defaults.initial_strength);

        Self {
            daily_review_limit,
            daily_new_words,
            initial_strength,
            jitter_seed: env_parse("JITTER_SEED"),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}
