// src/config.rs
use crate::error::{Error, Result};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub enum StoreBackend {
    File(PathBuf),
    Scylla(String),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub api_key: String,
    pub store: StoreBackend,
    pub cache_ttl: chrono::Duration,
    pub fetch_timeout: Duration,
}

impl Config {
    /// Reads the process environment, after loading `.env` if one exists.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let bind_addr = lookup("BIND_ADDR")
            .unwrap_or_else(|| "127.0.0.1:3030".to_string())
            .parse::<SocketAddr>()
            .map_err(|e| Error::Config(format!("BIND_ADDR: {}", e)))?;

        let api_key = lookup("ALPHAVANTAGE_KEY")
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| Error::Config("ALPHAVANTAGE_KEY is not set".into()))?;

        let store = match lookup("LOT_STORE").as_deref().unwrap_or("file") {
            "file" => StoreBackend::File(
                lookup("LOTS_FILE")
                    .unwrap_or_else(|| "./portfolio.json".to_string())
                    .into(),
            ),
            "scylla" => StoreBackend::Scylla(
                lookup("SCYLLA_NODE").unwrap_or_else(|| "127.0.0.1:9042".to_string()),
            ),
            other => {
                return Err(Error::Config(format!(
                    "LOT_STORE must be 'file' or 'scylla', got '{}'",
                    other
                )))
            }
        };

        let cache_ttl = seconds(&lookup, "CACHE_TTL_SECS", 3600)?;
        let fetch_timeout = seconds(&lookup, "FETCH_TIMEOUT_SECS", 30)?;

        Ok(Config {
            bind_addr,
            api_key,
            store,
            cache_ttl: chrono::Duration::seconds(cache_ttl as i64),
            fetch_timeout: Duration::from_secs(fetch_timeout),
        })
    }
}

fn seconds<F>(lookup: &F, key: &str, default: u64) -> Result<u64>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map_err(|e| Error::Config(format!("{}: {}", key, e))),
        None => Ok(default),
    }
}
