use std::env;
use std::path::PathBuf;

const DEFAULT_BIND_HOST: &str = "localhost:8000";
const DEFAULT_KEY_PATH: &str = "node.key";

/// Node settings, read from the environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Address the HTTP API listens on (`NODE_BIND_HOST`)
    pub bind_host: String,

    /// Address other nodes use to reach this one (`NODE_ADVERTISED_HOST`)
    pub advertised_host: String,

    /// Node to synchronize the chain from on startup (`NODE_SEED_HOST`)
    pub seed_host: Option<String>,

    /// Hex encoded miner key, generated if missing (`NODE_KEY_PATH`)
    pub key_path: PathBuf,
}

impl Config {
    /// Reads the configuration from the environment, after loading `.env` if present
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let bind_host = lookup("NODE_BIND_HOST").unwrap_or_else(|| DEFAULT_BIND_HOST.to_string());
        let advertised_host = lookup("NODE_ADVERTISED_HOST").unwrap_or_else(|| bind_host.clone());

        Config {
            bind_host,
            advertised_host,
            seed_host: lookup("NODE_SEED_HOST").filter(|host| !host.is_empty()),
            key_path: lookup("NODE_KEY_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_KEY_PATH)),
        }
    }
}
