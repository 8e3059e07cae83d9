use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    /// When unset, the server runs on the in-memory store.
    pub redis_url: Option<String>,
    /// Tab-separated dictionary table; the embedded seed is used when unset.
    pub dictionary_file: Option<String>,
    pub preload_words: usize,
    pub connection_timeout_seconds: u64,
    pub metrics_interval_seconds: u64,
}

impl Config {
    pub fn new() -> Self {
        Self {
            host: env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .expect("Invalid PORT"),
            redis_url: env::var("REDIS_URL").ok(),
            dictionary_file: env::var("DICTIONARY_FILE").ok(),
            preload_words: env::var("PRELOAD_WORDS")
                .unwrap_or_else(|_| "500".to_string())
                .parse()
                .expect("Invalid PRELOAD_WORDS"),
            connection_timeout_seconds: env::var("CONNECTION_TIMEOUT_SECONDS")
                .unwrap_or_else(|_| "300".to_string())
                .parse()
                .expect("Invalid CONNECTION_TIMEOUT_SECONDS"),
            metrics_interval_seconds: env::var("METRICS_INTERVAL_SECONDS")
                .unwrap_or_else(|_| "60".to_string())
                .parse()
                .expect("Invalid METRICS_INTERVAL_SECONDS"),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}
