// Durable message storage.
//
// `MessageStore` is the persistence capability handed to every session. The
// PostgreSQL backend is used in production; the in-memory backend backs tests
// and can be told to fail or stall through a `FaultSwitch`.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use courier_common::types::Message;
use sqlx::postgres::PgPool;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{info_span, Instrument};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store operation timed out after {0:?}")]
    Timeout(Duration),
    #[error("store is unreachable: {0}")]
    Unreachable(String),
    #[error("unexpected store error: {0}")]
    Unexpected(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(error: sqlx::Error) -> Self {
        match &error {
            sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::Io(_)
            | sqlx::Error::Tls(_) => Self::Unreachable(error.to_string()),
            _ => Self::Unexpected(error.to_string()),
        }
    }
}

/// Run a store operation, failing with [`StoreError::Timeout`] once `limit`
/// elapses.
pub(crate) async fn bounded<T, F>(limit: Duration, operation: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    match tokio::time::timeout(limit, operation).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout(limit)),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectedFault {
    /// Every call fails immediately with [`StoreError::Unreachable`].
    Unreachable,
    /// Every call hangs until the operation timeout fires.
    Stall,
}

/// Shared toggle for failing in-memory backends.
#[derive(Debug, Clone, Default)]
pub struct FaultSwitch {
    fault: Arc<Mutex<Option<InjectedFault>>>,
}

impl FaultSwitch {
    pub fn set(&self, fault: Option<InjectedFault>) {
        *self.fault.lock().unwrap_or_else(PoisonError::into_inner) = fault;
    }

    pub fn current(&self) -> Option<InjectedFault> {
        *self.fault.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) async fn check(&self) -> Result<(), StoreError> {
        match self.current() {
            None => Ok(()),
            Some(InjectedFault::Unreachable) => {
                Err(StoreError::Unreachable("injected fault".to_string()))
            }
            Some(InjectedFault::Stall) => std::future::pending().await,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct MessageRow {
    id: i64,
    sender_id: i64,
    recipient_id: i64,
    content: String,
    timestamp: i64,
}

impl From<MessageRow> for Message {
    fn from(row: MessageRow) -> Self {
        Self {
            id: row.id,
            sender_id: row.sender_id,
            recipient_id: row.recipient_id,
            content: row.content,
            timestamp: row.timestamp,
        }
    }
}

#[derive(Clone)]
enum MessageBackend {
    Postgres(PgPool),
    Memory { messages: Arc<RwLock<BTreeMap<i64, Message>>>, faults: FaultSwitch },
}

#[derive(Clone)]
pub struct MessageStore {
    backend: MessageBackend,
    timeout: Duration,
}

impl MessageStore {
    pub fn postgres(pool: PgPool, timeout: Duration) -> Self {
        Self { backend: MessageBackend::Postgres(pool), timeout }
    }

    pub fn memory(timeout: Duration) -> Self {
        Self::memory_with_faults(timeout, FaultSwitch::default())
    }

    pub fn memory_with_faults(timeout: Duration, faults: FaultSwitch) -> Self {
        Self {
            backend: MessageBackend::Memory { messages: Arc::default(), faults },
            timeout,
        }
    }

    /// Write one fully stamped message. There is no retry and no upsert: a
    /// second insert with the same id fails.
    pub async fn insert(&self, message: &Message) -> Result<(), StoreError> {
        message
            .ensure_persistable()
            .map_err(|error| StoreError::Unexpected(format!("refusing to persist message: {error}")))?;

        bounded(self.timeout, async {
            match &self.backend {
                MessageBackend::Postgres(pool) => {
                    sqlx::query(
                        "
                        INSERT INTO messages (id, sender_id, recipient_id, content, timestamp)
                        VALUES ($1, $2, $3, $4, $5)
                        ",
                    )
                    .bind(message.id)
                    .bind(message.sender_id)
                    .bind(message.recipient_id)
                    .bind(&message.content)
                    .bind(message.timestamp)
                    .execute(pool)
                    .instrument(info_span!("relay.db.query", query = "insert_message"))
                    .await?;

                    Ok(())
                }
                MessageBackend::Memory { messages, faults } => {
                    faults.check().await?;
                    let mut messages = messages.write().await;
                    if messages.contains_key(&message.id) {
                        return Err(StoreError::Unexpected(format!(
                            "message id {} already exists",
                            message.id
                        )));
                    }
                    messages.insert(message.id, message.clone());
                    Ok(())
                }
            }
        })
        .instrument(info_span!(
            "relay.store.insert",
            message_id = message.id,
            sender_id = message.sender_id,
            recipient_id = message.recipient_id
        ))
        .await
    }

    pub async fn get(&self, id: i64) -> Result<Option<Message>, StoreError> {
        bounded(self.timeout, async {
            match &self.backend {
                MessageBackend::Postgres(pool) => {
                    let row = sqlx::query_as::<_, MessageRow>(
                        "
                        SELECT id, sender_id, recipient_id, content, timestamp
                        FROM messages
                        WHERE id = $1
                        ",
                    )
                    .bind(id)
                    .fetch_optional(pool)
                    .instrument(info_span!("relay.db.query", query = "get_message"))
                    .await?;

                    Ok(row.map(Message::from))
                }
                MessageBackend::Memory { messages, faults } => {
                    faults.check().await?;
                    Ok(messages.read().await.get(&id).cloned())
                }
            }
        })
        .instrument(info_span!("relay.store.get", message_id = id))
        .await
    }

    /// Highest stored message id, or 0 when the store is empty.
    pub async fn max_id(&self) -> Result<i64, StoreError> {
        bounded(self.timeout, async {
            match &self.backend {
                MessageBackend::Postgres(pool) => {
                    let max = sqlx::query_scalar::<_, i64>(
                        "SELECT COALESCE(MAX(id), 0)::BIGINT FROM messages",
                    )
                    .fetch_one(pool)
                    .instrument(info_span!("relay.db.query", query = "max_message_id"))
                    .await?;

                    Ok(max)
                }
                MessageBackend::Memory { messages, faults } => {
                    faults.check().await?;
                    Ok(messages.read().await.keys().next_back().copied().unwrap_or(0))
                }
            }
        })
        .instrument(info_span!("relay.store.max_id"))
        .await
    }

    pub async fn count(&self) -> Result<i64, StoreError> {
        bounded(self.timeout, async {
            match &self.backend {
                MessageBackend::Postgres(pool) => {
                    let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM messages")
                        .fetch_one(pool)
                        .instrument(info_span!("relay.db.query", query = "count_messages"))
                        .await?;

                    Ok(count)
                }
                MessageBackend::Memory { messages, faults } => {
                    faults.check().await?;
                    Ok(messages.read().await.len() as i64)
                }
            }
        })
        .await
    }

    /// Cheap reachability probe used by the readiness endpoint.
    pub async fn ping(&self) -> Result<(), StoreError> {
        bounded(self.timeout, async {
            match &self.backend {
                MessageBackend::Postgres(pool) => {
                    sqlx::query_scalar::<_, i32>("SELECT 1")
                        .fetch_one(pool)
                        .instrument(info_span!("relay.db.query", query = "ping"))
                        .await?;
                    Ok(())
                }
                MessageBackend::Memory { faults, .. } => faults.check().await,
            }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_millis(50);

    fn message(id: i64) -> Message {
        Message {
            id,
            sender_id: 42,
            recipient_id: 7,
            content: "hi".to_string(),
            timestamp: 1_760_000_000,
        }
    }

    #[tokio::test]
    async fn inserts_and_reads_back_messages() {
        let store = MessageStore::memory(TIMEOUT);
        store.insert(&message(1)).await.expect("insert should succeed");
        store.insert(&message(3)).await.expect("insert should succeed");

        assert_eq!(store.get(1).await.expect("get"), Some(message(1)));
        assert_eq!(store.get(2).await.expect("get"), None);
        assert_eq!(store.max_id().await.expect("max id"), 3);
        assert_eq!(store.count().await.expect("count"), 2);
    }

    #[tokio::test]
    async fn duplicate_ids_are_rejected() {
        let store = MessageStore::memory(TIMEOUT);
        store.insert(&message(1)).await.expect("first insert should succeed");

        let error = store.insert(&message(1)).await.expect_err("duplicate id");
        assert!(matches!(error, StoreError::Unexpected(_)));
    }

    #[tokio::test]
    async fn refuses_unstamped_messages() {
        let store = MessageStore::memory(TIMEOUT);
        let error = store.insert(&Message::unsequenced(7, "hi")).await.expect_err("no sender");

        assert!(matches!(error, StoreError::Unexpected(_)));
        assert_eq!(store.count().await.expect("count"), 0);
    }

    #[tokio::test]
    async fn empty_store_reports_zero_max_id() {
        assert_eq!(MessageStore::memory(TIMEOUT).max_id().await.expect("max id"), 0);
    }

    #[tokio::test]
    async fn unreachable_fault_fails_fast() {
        let faults = FaultSwitch::default();
        let store = MessageStore::memory_with_faults(TIMEOUT, faults.clone());
        faults.set(Some(InjectedFault::Unreachable));

        let error = store.insert(&message(1)).await.expect_err("store is down");
        assert!(matches!(error, StoreError::Unreachable(_)));
        assert!(store.ping().await.is_err());

        faults.set(None);
        store.insert(&message(1)).await.expect("store recovered");
        store.ping().await.expect("store recovered");
    }

    #[tokio::test]
    async fn stalled_store_times_out() {
        let faults = FaultSwitch::default();
        faults.set(Some(InjectedFault::Stall));
        let store = MessageStore::memory_with_faults(TIMEOUT, faults);

        let error = store.insert(&message(1)).await.expect_err("store stalls");
        assert!(matches!(error, StoreError::Timeout(limit) if limit == TIMEOUT));
    }

    #[test]
    fn pool_errors_map_to_unreachable() {
        assert!(matches!(StoreError::from(sqlx::Error::PoolTimedOut), StoreError::Unreachable(_)));
        assert!(matches!(StoreError::from(sqlx::Error::RowNotFound), StoreError::Unexpected(_)));
    }
}
