//! Server configuration.
//!
//! Every option can come from the command line or the environment (a `.env`
//! file is honoured). The signing secret has no default.

use crate::error::ConfigError;
use clap::Parser;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tracing::warn;

const RECOMMENDED_SECRET_LEN: usize = 32;
const MAX_TOKEN_TTL_DAYS: i64 = 3650;

#[derive(Parser, Debug, Clone)]
#[command(name = "blog-server")]
#[command(about = "Blog backend: accounts, sessions, and access control")]
pub struct Config {
    /// Address to listen on
    #[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0:8888")]
    pub bind_addr: SocketAddr,

    /// Path to the SQLite database holding users and revoked tokens
    #[arg(long, env = "AUTH_DB_PATH", default_value = "blog_auth.db")]
    pub db_path: String,

    /// HMAC secret used to sign session tokens (required)
    #[arg(long, env = "JWT_SECRET", hide_env_values = true)]
    pub jwt_secret: Option<String>,

    /// Session token lifetime in days
    #[arg(long, env = "TOKEN_TTL_DAYS", default_value_t = 30)]
    pub token_ttl_days: i64,

    /// Upper bound on any single database call, in milliseconds
    #[arg(long, env = "STORE_TIMEOUT_MS", default_value_t = 2000)]
    pub store_timeout_ms: u64,

    /// Interval between revocation / quota-counter sweeps, in seconds
    #[arg(long, env = "REVOCATION_SWEEP_SECS", default_value_t = 3600)]
    pub sweep_interval_secs: u64,

    /// bcrypt work factor for new password hashes
    #[arg(long, env = "BCRYPT_COST", default_value_t = bcrypt::DEFAULT_COST)]
    pub bcrypt_cost: u32,

    /// Allow cross-origin requests from any origin
    #[arg(long, env = "CORS_ALLOW_ANY", default_value = "false")]
    pub cors_allow_any: bool,
}

impl Config {
    /// The configured signing secret. Missing or blank is fatal.
    pub fn signing_secret(&self) -> Result<&str, ConfigError> {
        let secret = self
            .jwt_secret
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or(ConfigError::MissingSecret)?;

        if secret.len() < RECOMMENDED_SECRET_LEN {
            warn!(
                len = secret.len(),
                recommended = RECOMMENDED_SECRET_LEN,
                "JWT_SECRET is shorter than recommended"
            );
        }
        Ok(secret)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.token_lifetime()?;
        if self.store_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                name: "STORE_TIMEOUT_MS",
                value: self.store_timeout_ms.to_string(),
            });
        }
        if self.sweep_interval_secs == 0 {
            return Err(ConfigError::Invalid {
                name: "REVOCATION_SWEEP_SECS",
                value: self.sweep_interval_secs.to_string(),
            });
        }
        if !(4..=31).contains(&self.bcrypt_cost) {
            return Err(ConfigError::Invalid {
                name: "BCRYPT_COST",
                value: self.bcrypt_cost.to_string(),
            });
        }
        self.signing_secret()?;
        Ok(())
    }

    /// Session lifetime, between one day and `MAX_TOKEN_TTL_DAYS`.
    pub fn token_lifetime(&self) -> Result<chrono::Duration, ConfigError> {
        (1..=MAX_TOKEN_TTL_DAYS)
            .contains(&self.token_ttl_days)
            .then(|| chrono::Duration::try_days(self.token_ttl_days))
            .flatten()
            .ok_or_else(|| ConfigError::Invalid {
                name: "TOKEN_TTL_DAYS",
                value: self.token_ttl_days.to_string(),
            })
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// Load `.env` from the working directory (and parents), then from the
/// crate directory.
pub fn load_env() {
    let _ = dotenv::dotenv();

    let manifest_dir = Path::new(env!("CARGO_MANIFEST_DIR"));
    let candidate = manifest_dir.join(".env");
    if candidate.exists() {
        let _ = dotenv::from_path(&candidate);
    }
}
