// Named monotonic counters used to allocate message ids.
//
// Each allocation is a single atomic read-modify-write in the backing store,
// so no in-process locking is needed on the production path. An id handed out
// here is never returned again, even if the caller fails to persist it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use sqlx::postgres::PgPool;
use tokio::sync::Mutex;
use tracing::{debug, info_span, Instrument};

use crate::store::{bounded, FaultSwitch, StoreError};

#[derive(Clone)]
enum SequenceBackend {
    Postgres(PgPool),
    Memory { counters: Arc<Mutex<HashMap<String, i64>>>, faults: FaultSwitch },
}

#[derive(Clone)]
pub struct SequenceSource {
    backend: SequenceBackend,
    timeout: Duration,
}

impl SequenceSource {
    pub fn postgres(pool: PgPool, timeout: Duration) -> Self {
        Self { backend: SequenceBackend::Postgres(pool), timeout }
    }

    pub fn memory(timeout: Duration) -> Self {
        Self::memory_with_faults(timeout, FaultSwitch::default())
    }

    pub fn memory_with_faults(timeout: Duration, faults: FaultSwitch) -> Self {
        Self {
            backend: SequenceBackend::Memory { counters: Arc::default(), faults },
            timeout,
        }
    }

    /// Advance `name` by one and return the new value. The counter is created
    /// on first use, so the first value is 1.
    pub async fn next(&self, name: &str) -> Result<i64, StoreError> {
        let value = bounded(self.timeout, async {
            match &self.backend {
                SequenceBackend::Postgres(pool) => {
                    let value = sqlx::query_scalar::<_, i64>(
                        "
                        INSERT INTO sequences (name, value)
                        VALUES ($1, 1)
                        ON CONFLICT (name)
                        DO UPDATE SET value = sequences.value + 1
                        RETURNING value
                        ",
                    )
                    .bind(name)
                    .fetch_one(pool)
                    .instrument(info_span!("relay.db.query", query = "next_sequence_value"))
                    .await?;

                    Ok(value)
                }
                SequenceBackend::Memory { counters, faults } => {
                    faults.check().await?;
                    let mut counters = counters.lock().await;
                    let counter = counters.entry(name.to_string()).or_insert(0);
                    *counter += 1;
                    Ok(*counter)
                }
            }
        })
        .instrument(info_span!("relay.sequencer.next", sequence = name))
        .await?;

        debug!(sequence = name, value, "allocated sequence value");
        Ok(value)
    }

    /// Current stored value without advancing it.
    pub async fn current(&self, name: &str) -> Result<Option<i64>, StoreError> {
        bounded(self.timeout, async {
            match &self.backend {
                SequenceBackend::Postgres(pool) => {
                    let value = sqlx::query_scalar::<_, i64>(
                        "SELECT value FROM sequences WHERE name = $1",
                    )
                    .bind(name)
                    .fetch_optional(pool)
                    .instrument(info_span!("relay.db.query", query = "current_sequence_value"))
                    .await?;

                    Ok(value)
                }
                SequenceBackend::Memory { counters, faults } => {
                    faults.check().await?;
                    Ok(counters.lock().await.get(name).copied())
                }
            }
        })
        .instrument(info_span!("relay.sequencer.current", sequence = name))
        .await
    }

    /// Raise `name` to at least `floor`. Never moves a counter backwards.
    pub async fn seed(&self, name: &str, floor: i64) -> Result<i64, StoreError> {
        bounded(self.timeout, async {
            match &self.backend {
                SequenceBackend::Postgres(pool) => {
                    let value = sqlx::query_scalar::<_, i64>(
                        "
                        INSERT INTO sequences (name, value)
                        VALUES ($1, $2)
                        ON CONFLICT (name)
                        DO UPDATE SET value = GREATEST(sequences.value, EXCLUDED.value)
                        RETURNING value
                        ",
                    )
                    .bind(name)
                    .bind(floor)
                    .fetch_one(pool)
                    .instrument(info_span!("relay.db.query", query = "seed_sequence"))
                    .await?;

                    Ok(value)
                }
                SequenceBackend::Memory { counters, faults } => {
                    faults.check().await?;
                    let mut counters = counters.lock().await;
                    let counter = counters.entry(name.to_string()).or_insert(floor);
                    *counter = (*counter).max(floor);
                    Ok(*counter)
                }
            }
        })
        .instrument(info_span!("relay.sequencer.seed", sequence = name, floor))
        .await
    }
}
