// Dependencies shared by every connection, built once at startup.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use courier_common::protocol::ws::{EchoMode, MESSAGE_SEQUENCE};
use tracing::info;

use crate::auth::jwt::JwtAuthenticator;
use crate::config::RelayConfig;
use crate::db::{
    migrations::run_migrations,
    pool::{check_pool_health, create_pg_pool, ensure_schema, PoolConfig},
};
use crate::sequencer::SequenceSource;
use crate::store::{FaultSwitch, MessageStore};

#[derive(Clone)]
pub struct RelayContext {
    pub authenticator: Arc<JwtAuthenticator>,
    pub sequences: SequenceSource,
    pub messages: MessageStore,
    pub echo_mode: EchoMode,
}

impl RelayContext {
    pub fn new(
        authenticator: Arc<JwtAuthenticator>,
        sequences: SequenceSource,
        messages: MessageStore,
        echo_mode: EchoMode,
    ) -> Self {
        Self { authenticator, sequences, messages, echo_mode }
    }

    /// Context backed by in-process stores. Both stores share `faults`.
    pub fn in_memory(
        authenticator: Arc<JwtAuthenticator>,
        echo_mode: EchoMode,
        store_timeout: Duration,
        faults: FaultSwitch,
    ) -> Self {
        Self::new(
            authenticator,
            SequenceSource::memory_with_faults(store_timeout, faults.clone()),
            MessageStore::memory_with_faults(store_timeout, faults),
            echo_mode,
        )
    }

    /// Connect to PostgreSQL, apply migrations and recover the message
    /// counter. Any failure here is fatal to the process.
    pub async fn connect(config: &RelayConfig) -> anyhow::Result<Self> {
        let authenticator = JwtAuthenticator::new(&config.jwt_secret, config.jwt_issuer.clone())
            .context("invalid relay JWT secret")?;

        let schema = config.database_schema.as_deref();
        let pool = create_pg_pool(&config.database_url, schema, PoolConfig::from_env())
            .await
            .context("failed to initialize relay PostgreSQL pool")?;
        check_pool_health(&pool).await?;
        if let Some(schema) = schema {
            ensure_schema(&pool, schema).await?;
        }
        run_migrations(&pool).await?;

        let context = Self::new(
            Arc::new(authenticator),
            SequenceSource::postgres(pool.clone(), config.store_timeout),
            MessageStore::postgres(pool, config.store_timeout),
            config.echo_mode,
        );
        context.recover_message_sequence().await?;

        Ok(context)
    }

    /// Raise the message counter to the highest stored id so a lost or reset
    /// counter row can never hand out an id that is already taken.
    pub async fn recover_message_sequence(&self) -> anyhow::Result<i64> {
        let max_id =
            self.messages.max_id().await.context("failed to read highest stored message id")?;
        let value = self
            .sequences
            .seed(MESSAGE_SEQUENCE, max_id)
            .await
            .context("failed to recover message sequence")?;

        info!(sequence = MESSAGE_SEQUENCE, max_id, value, "message sequence recovered");
        Ok(value)
    }
}
