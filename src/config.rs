//! Configuration manager for tokenpair.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::FromRef;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::AppState;

const DEFAULT_CONFIG_PATH: &str = "config.yaml";
const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const SECRET_ENV: &str = "TOKEN_SECRET";
pub const DEFAULT_PORT: u16 = 8080;

const DEFAULT_ACCESS_TOKEN_LIFETIME: u64 = 60 * 15; // 15 minutes.
const DEFAULT_REFRESH_TOKEN_LIFETIME: u64 = 60 * 60 * 24 * 30; // 30 days.
const MIN_REFRESH_TOKEN_LIFETIME: u64 = 60 * 60 * 24; // 1 day.
const DEFAULT_SWEEP_INTERVAL: u64 = 60 * 60 * 24; // 1 day.
const DEFAULT_NOTIFIER_TIMEOUT: u64 = 5_000; // 5 seconds.

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    /// Instance name.
    pub name: String,
    /// Domain name of current instance, used as token issuer.
    pub url: String,
    /// Listening port.
    pub port: Option<u16>,
    /// Take client IP from `X-Forwarded-For` instead of the socket.
    #[serde(default)]
    pub trust_forwarded_for: bool,
    #[serde(default)]
    version: String,
    #[serde(skip)]
    path: PathBuf,
    /// Related to token lifetimes and signing.
    #[serde(default, skip_serializing)]
    pub token: Token,
    /// Related to PostgreSQL configuration.
    #[serde(skip_serializing)]
    pub postgres: Option<Postgres>,
    /// Related to Argon2 configuration.
    #[serde(skip_serializing)]
    pub argon2: Option<Argon2>,
    /// Related to IP change webhooks.
    #[serde(skip_serializing)]
    pub notifier: Option<Notifier>,
    /// Related to revocation cleanup.
    #[serde(skip_serializing)]
    pub sweeper: Option<Sweeper>,
}

/// PostgreSQL configuration.
#[derive(Debug, Default, PartialEq, Clone, Serialize, Deserialize)]
pub struct Postgres {
    /// Hostname:(?port) for PostgreSQL instance.
    pub address: String,
    /// Database name.
    pub database: Option<String>,
    /// Username credential to connect.
    pub username: Option<String>,
    /// Password credential to connect.
    pub password: Option<String>,
    /// Maximum pool connections.
    pub pool_size: Option<u32>,
}

/// Argon2 configuration.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct Argon2 {
    /// Memory used while hashing.
    pub memory_cost: u32,
    /// Iterations of hash.
    pub iterations: u32,
    /// Parallelism degree.
    pub parallelism: u32,
    /// Output hash length.
    pub hash_length: usize,
}

impl Default for Argon2 {
    fn default() -> Self {
        Self {
            memory_cost: 1024 * 64, // 64 MiB.
            iterations: 4,
            parallelism: 2,
            hash_length: 32,
        }
    }
}

/// Token configuration.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct Token {
    /// HMAC signing secret. Falls back to `TOKEN_SECRET`.
    pub secret: Option<String>,
    /// Access token lifetime in seconds.
    #[serde(default = "default_access_lifetime")]
    pub access_token_lifetime: u64,
    /// Refresh token lifetime in seconds.
    #[serde(default = "default_refresh_lifetime")]
    pub refresh_token_lifetime: u64,
}

fn default_access_lifetime() -> u64 {
    DEFAULT_ACCESS_TOKEN_LIFETIME
}

fn default_refresh_lifetime() -> u64 {
    DEFAULT_REFRESH_TOKEN_LIFETIME
}

impl Default for Token {
    fn default() -> Self {
        Self {
            secret: None,
            access_token_lifetime: DEFAULT_ACCESS_TOKEN_LIFETIME,
            refresh_token_lifetime: DEFAULT_REFRESH_TOKEN_LIFETIME,
        }
    }
}

impl Token {
    pub fn access_lifetime(&self) -> Duration {
        Duration::from_secs(self.access_token_lifetime)
    }

    /// Refresh lifetime, never shorter than a day.
    pub fn refresh_lifetime(&self) -> Duration {
        Duration::from_secs(
            self.refresh_token_lifetime.max(MIN_REFRESH_TOKEN_LIFETIME),
        )
    }

    /// Resolve the signing secret from file or environment.
    pub fn resolve_secret(&self) -> Option<String> {
        self.secret
            .clone()
            .or_else(|| std::env::var(SECRET_ENV).ok())
            .filter(|secret| !secret.is_empty())
    }
}

/// Webhook configuration for IP change alerts.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notifier {
    /// URL receiving a JSON `POST` on every IP change.
    pub endpoint: String,
    /// Request timeout in milliseconds.
    pub timeout_ms: Option<u64>,
}

impl Notifier {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.unwrap_or(DEFAULT_NOTIFIER_TIMEOUT))
    }
}

/// Revocation sweeper configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sweeper {
    /// Seconds between two sweeps.
    pub interval: u64,
}

impl Default for Sweeper {
    fn default() -> Self {
        Self {
            interval: DEFAULT_SWEEP_INTERVAL,
        }
    }
}

impl FromRef<AppState> for Arc<Configuration> {
    fn from_ref(state: &AppState) -> Arc<Configuration> {
        Arc::clone(&state.config)
    }
}

impl Configuration {
    pub fn path(mut self, path: PathBuf) -> Self {
        self.path = path;
        self
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweeper.clone().unwrap_or_default().interval)
    }

    /// Normalizes a URL string by ensuring it starts with a valid scheme
    /// (`http` or `https`).
    fn normalize_url(&self, url: &str) -> Result<String, url::ParseError> {
        let url_with_scheme =
            if url.starts_with("http://") || url.starts_with("https://") {
                url.to_string()
            } else {
                format!("https://{url}")
            };

        let parsed_url = Url::parse(&url_with_scheme)?;
        Ok(parsed_url.to_string())
    }

    /// Reads the `config.yaml` file from the specified path or the default
    /// location.
    pub fn read(self) -> Result<Arc<Self>, url::ParseError> {
        let file_path = if self.path.is_file() {
            &self.path
        } else {
            &Path::new(DEFAULT_CONFIG_PATH).to_path_buf()
        };

        match File::open(file_path) {
            Ok(file) => {
                let mut config: Configuration =
                    match serde_yaml::from_reader(file) {
                        Ok(config) => config,
                        Err(err) => {
                            return Ok(Arc::new(self.error(err)));
                        },
                    };

                // set app version.
                config.version = VERSION.to_owned();

                // normalize URLs.
                config.url = self.normalize_url(&config.url)?;
                if let Some(notifier) = config.notifier.as_mut() {
                    notifier.endpoint = self.normalize_url(&notifier.endpoint)?;
                }

                Ok(Arc::new(config))
            },
            Err(err) => Ok(Arc::new(self.error(err))),
        }
    }

    /// Return a default configuration as fallback.
    fn error(&self, err: impl std::error::Error) -> Self {
        tracing::error!(error = %err, "`config.yaml` file not found");
        Self {
            version: VERSION.to_owned(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refresh_lifetime_floor() {
        let token = Token {
            refresh_token_lifetime: 60,
            ..Default::default()
        };
        assert_eq!(
            token.refresh_lifetime(),
            Duration::from_secs(MIN_REFRESH_TOKEN_LIFETIME)
        );
        assert_eq!(Token::default().access_lifetime(), Duration::from_secs(900));
    }

    #[test]
    fn test_parse_yaml() {
        let yaml = r#"
name: tokenpair
url: auth.example.com
port: 9000
token:
  secret: s3cr3t
  access_token_lifetime: 60
notifier:
  endpoint: https://hooks.example.com/ip
"#;
        let config: Configuration = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.port, Some(9000));
        assert_eq!(config.token.resolve_secret().as_deref(), Some("s3cr3t"));
        assert_eq!(config.token.access_token_lifetime, 60);
        assert_eq!(
            config.token.refresh_token_lifetime,
            DEFAULT_REFRESH_TOKEN_LIFETIME
        );
        assert!(!config.trust_forwarded_for);
        assert_eq!(
            config.notifier.as_ref().unwrap().timeout(),
            Duration::from_millis(DEFAULT_NOTIFIER_TIMEOUT)
        );
        assert_eq!(
            config.sweep_interval(),
            Duration::from_secs(DEFAULT_SWEEP_INTERVAL)
        );

        let normalized = Configuration::default()
            .normalize_url(&config.url)
            .unwrap();
        assert_eq!(normalized, "https://auth.example.com/");
    }
}
