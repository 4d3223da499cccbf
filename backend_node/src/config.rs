//! Service configuration loaded from environment variables with sane
//! defaults for local development.

use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    /// Bind address for the HTTP server
    pub host: String,
    pub port: u16,
    /// Comma-separated list of allowed CORS origins; "*" allows any
    pub allowed_origins: Vec<String>,
    /// Chain RPC endpoint (mocked client, kept for parity with deployment env)
    pub chain_rpc_url: String,
    pub contract_address: Option<String>,
    pub contract_module: String,
    /// Blob store endpoint (mocked client)
    pub blob_endpoint: String,
    /// Default training hyperparameters
    pub learning_rate: f64,
    pub batch_size: usize,
    pub epochs: usize,
    /// Per-batch pacing delay in milliseconds (simulates real work; 0 in tests)
    pub batch_pace_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            allowed_origins: vec![
                "http://localhost:3000".to_string(),
                "http://127.0.0.1:3000".to_string(),
            ],
            chain_rpc_url: "https://fullnode.testnet.mesh.dev:443".to_string(),
            contract_address: None,
            contract_module: "neuromesh".to_string(),
            blob_endpoint: "http://localhost:31415".to_string(),
            learning_rate: 0.001,
            batch_size: 32,
            epochs: 10,
            batch_pace_ms: 200,
        }
    }
}

impl Config {
    /// Build the configuration from the process environment, falling back to
    /// defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        let defaults = Config::default();

        let allowed_origins = env::var("ALLOWED_ORIGINS")
            .map(|v| {
                v.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect::<Vec<_>>()
            })
            .unwrap_or(defaults.allowed_origins);

        Self {
            host: env::var("HOST").unwrap_or(defaults.host),
            port: env_parse("PORT", defaults.port),
            allowed_origins,
            chain_rpc_url: env::var("CHAIN_RPC_URL").unwrap_or(defaults.chain_rpc_url),
            contract_address: env::var("CONTRACT_ADDRESS").ok(),
            contract_module: env::var("CONTRACT_MODULE").unwrap_or(defaults.contract_module),
            blob_endpoint: env::var("BLOB_ENDPOINT").unwrap_or(defaults.blob_endpoint),
            learning_rate: env_parse("LEARNING_RATE", defaults.learning_rate),
            batch_size: env_parse("BATCH_SIZE", defaults.batch_size),
            epochs: env_parse("EPOCHS", defaults.epochs),
            batch_pace_ms: env_parse("BATCH_PACE_MS", defaults.batch_pace_ms),
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn allow_any_origin(&self) -> bool {
        self.allowed_origins.iter().any(|o| o == "*")
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
