// Relay server configuration.
//
// Centralizes environment variable parsing. Secrets and the database URL have
// no defaults: a relay that cannot verify tokens or store messages must not
// start. Pool tuning lives in `db::pool::PoolConfig`.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{bail, Context};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use courier_common::protocol::ws::EchoMode;

use crate::db::pool::ensure_valid_schema_name;

/// Minimum accepted HMAC key length in bytes.
pub const MIN_JWT_SECRET_BYTES: usize = 32;

const DEFAULT_PORT: u16 = 8081;
const DEFAULT_STORE_TIMEOUT_MS: u64 = 5_000;

/// Core relay server configuration.
///
/// Constructed via [`RelayConfig::from_env`].
#[derive(Clone)]
pub struct RelayConfig {
    /// Listen address (host:port).
    pub listen_addr: SocketAddr,
    /// Raw HMAC key used to verify bearer tokens.
    pub jwt_secret: Vec<u8>,
    /// Expected `iss` claim, if any.
    pub jwt_issuer: Option<String>,
    /// PostgreSQL connection string.
    pub database_url: String,
    /// Schema placed on the connection `search_path`.
    pub database_schema: Option<String>,
    /// Upper bound for each sequence or store round-trip.
    pub store_timeout: Duration,
    /// What sessions write back after a message is stored.
    pub echo_mode: EchoMode,
    /// Log filter directive (e.g. `info`, `courier_relay=debug`).
    pub log_filter: String,
}

impl std::fmt::Debug for RelayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayConfig")
            .field("listen_addr", &self.listen_addr)
            .field("jwt_secret", &"<redacted>")
            .field("jwt_issuer", &self.jwt_issuer)
            .field("database_url", &"<redacted>")
            .field("database_schema", &self.database_schema)
            .field("store_timeout", &self.store_timeout)
            .field("echo_mode", &self.echo_mode)
            .field("log_filter", &self.log_filter)
            .finish()
    }
}

impl RelayConfig {
    /// Parse configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |---|---|
    /// | `COURIER_RELAY_HOST` | `0.0.0.0` |
    /// | `COURIER_RELAY_PORT` | `8081` |
    /// | `COURIER_RELAY_JWT_SECRET` | *(required unless `_B64` is set)* |
    /// | `COURIER_RELAY_JWT_SECRET_B64` | *(base64 form of the secret)* |
    /// | `COURIER_RELAY_JWT_ISSUER` | *(none, issuer not checked)* |
    /// | `COURIER_RELAY_DATABASE_URL` | *(required)* |
    /// | `COURIER_RELAY_DATABASE_SCHEMA` | *(none)* |
    /// | `COURIER_RELAY_STORE_TIMEOUT_MS` | `5000` |
    /// | `COURIER_RELAY_ECHO_MODE` | `raw` |
    /// | `COURIER_RELAY_LOG_FILTER` | `info` |
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_env_fn(|key| std::env::var(key))
    }

    /// Testable constructor that accepts an environment lookup function.
    fn from_env_fn<F>(env: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Result<String, std::env::VarError>,
    {
        let host = env("COURIER_RELAY_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let port: u16 = env("COURIER_RELAY_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_PORT);
        let listen_addr = format!("{host}:{port}")
            .parse()
            .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], port)));

        let jwt_secret = resolve_jwt_secret(
            env("COURIER_RELAY_JWT_SECRET").ok().filter(|v| !v.is_empty()),
            env("COURIER_RELAY_JWT_SECRET_B64").ok().filter(|v| !v.is_empty()),
        )?;
        let jwt_issuer = env("COURIER_RELAY_JWT_ISSUER").ok().filter(|v| !v.is_empty());

        let database_url = env("COURIER_RELAY_DATABASE_URL")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .context("COURIER_RELAY_DATABASE_URL must be set")?;
        let database_schema =
            env("COURIER_RELAY_DATABASE_SCHEMA").ok().filter(|v| !v.trim().is_empty());
        if let Some(schema) = database_schema.as_deref() {
            ensure_valid_schema_name(schema)?;
        }

        let store_timeout_ms = env("COURIER_RELAY_STORE_TIMEOUT_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|v| *v > 0)
            .unwrap_or(DEFAULT_STORE_TIMEOUT_MS);

        let echo_mode = match env("COURIER_RELAY_ECHO_MODE") {
            Ok(raw) => EchoMode::parse(&raw).with_context(|| {
                format!("COURIER_RELAY_ECHO_MODE must be `raw` or `record`, got `{raw}`")
            })?,
            Err(_) => EchoMode::default(),
        };

        let log_filter = env("COURIER_RELAY_LOG_FILTER").unwrap_or_else(|_| "info".into());

        Ok(Self {
            listen_addr,
            jwt_secret,
            jwt_issuer,
            database_url,
            database_schema,
            store_timeout: Duration::from_millis(store_timeout_ms),
            echo_mode,
            log_filter,
        })
    }
}

fn resolve_jwt_secret(raw: Option<String>, encoded: Option<String>) -> anyhow::Result<Vec<u8>> {
    let secret = match (raw, encoded) {
        (Some(_), Some(_)) => bail!(
            "set only one of COURIER_RELAY_JWT_SECRET and COURIER_RELAY_JWT_SECRET_B64"
        ),
        (Some(raw), None) => raw.into_bytes(),
        (None, Some(encoded)) => STANDARD
            .decode(encoded.trim())
            .context("COURIER_RELAY_JWT_SECRET_B64 is not valid base64")?,
        (None, None) => bail!(
            "COURIER_RELAY_JWT_SECRET (or COURIER_RELAY_JWT_SECRET_B64) must be set"
        ),
    };

    if secret.len() < MIN_JWT_SECRET_BYTES {
        bail!("jwt secret must be at least {MIN_JWT_SECRET_BYTES} bytes long");
    }

    Ok(secret)
}
