//! The event log store contract and its in-memory backend.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::StoreError;
use crate::event::{EventFilter, NewEvent, StoredEvent};

/// An append-only, per-resource event log with optimistic concurrency.
///
/// Implementations must make [`append`](EventStore::append) atomic: either
/// every given event is written with versions `expected_version + 1 ..` and
/// the resource version advances by the number of events, or nothing is
/// written at all.
#[async_trait]
pub trait EventStore: Send + Sync + 'static {
    /// Append events to a resource's stream.
    ///
    /// # Arguments
    ///
    /// * `resource_id` - The resource to append to. Created on first append.
    /// * `resource_type` - The aggregate kind; must match the stored kind
    ///   of an existing resource.
    /// * `expected_version` - The version the caller's decision was based
    ///   on (`0` for a resource that does not exist yet).
    /// * `events` - The encoded events, in order.
    ///
    /// # Returns
    ///
    /// The new resource version.
    ///
    /// # Errors
    ///
    /// * [`StoreError::ConcurrencyConflict`] if the stored version differs
    ///   from `expected_version`. Nothing is written.
    /// * [`StoreError::ResourceTypeMismatch`] if the resource exists with
    ///   another type. Nothing is written.
    /// * [`StoreError::Unavailable`] on infrastructure failure.
    async fn append(
        &self,
        resource_id: Uuid,
        resource_type: &str,
        expected_version: u64,
        events: Vec<NewEvent>,
    ) -> Result<u64, StoreError>;

    /// Read one resource's events ordered by version.
    ///
    /// An unknown resource yields an empty list.
    async fn read(&self, resource_id: Uuid) -> Result<Vec<StoredEvent>, StoreError>;

    /// Read the events of every resource of `resource_type` that match
    /// `filter`, in commit order.
    async fn read_matching(
        &self,
        resource_type: &str,
        filter: &EventFilter,
    ) -> Result<Vec<StoredEvent>, StoreError>;

    /// The current version of a resource, `0` if it does not exist.
    async fn version(&self, resource_id: Uuid) -> Result<u64, StoreError>;
}

#[async_trait]
impl<S: EventStore + ?Sized> EventStore for Arc<S> {
    async fn append(
        &self,
        resource_id: Uuid,
        resource_type: &str,
        expected_version: u64,
        events: Vec<NewEvent>,
    ) -> Result<u64, StoreError> {
        (**self)
            .append(resource_id, resource_type, expected_version, events)
            .await
    }

    async fn read(&self, resource_id: Uuid) -> Result<Vec<StoredEvent>, StoreError> {
        (**self).read(resource_id).await
    }

    async fn read_matching(
        &self,
        resource_type: &str,
        filter: &EventFilter,
    ) -> Result<Vec<StoredEvent>, StoreError> {
        (**self).read_matching(resource_type, filter).await
    }

    async fn version(&self, resource_id: Uuid) -> Result<u64, StoreError> {
        (**self).version(resource_id).await
    }
}

#[derive(Debug)]
struct ResourceRow {
    resource_type: String,
    version: u64,
}

#[derive(Debug, Default)]
struct MemoryLog {
    resources: HashMap<Uuid, ResourceRow>,
    /// Every committed event in commit order.
    events: Vec<StoredEvent>,
}

/// An [`EventStore`] kept entirely in process memory.
///
/// Suited to tests and demos. The write lock is held for the whole append,
/// which makes the version check and the write one atomic step. Readers
/// only see fully committed appends.
///
/// `Clone` is cheap: clones share the same log.
#[derive(Debug, Clone, Default)]
pub struct InMemoryEventStore {
    inner: Arc<RwLock<MemoryLog>>,
}

impl InMemoryEventStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append(
        &self,
        resource_id: Uuid,
        resource_type: &str,
        expected_version: u64,
        events: Vec<NewEvent>,
    ) -> Result<u64, StoreError> {
        let mut log = self.inner.write().await;

        let actual = match log.resources.get(&resource_id) {
            Some(row) => {
                if row.resource_type != resource_type {
                    return Err(StoreError::ResourceTypeMismatch {
                        resource_id,
                        expected: resource_type.to_string(),
                        actual: row.resource_type.clone(),
                    });
                }
                row.version
            }
            None => 0,
        };

        if actual != expected_version {
            return Err(StoreError::ConcurrencyConflict {
                resource_id,
                expected: expected_version,
                actual,
            });
        }

        if events.is_empty() {
            return Ok(actual);
        }

        let mut version = actual;
        for event in events {
            version += 1;
            log.events
                .push(event.into_stored(resource_id, resource_type, version));
        }

        log.resources.insert(
            resource_id,
            ResourceRow {
                resource_type: resource_type.to_string(),
                version,
            },
        );

        Ok(version)
    }

    async fn read(&self, resource_id: Uuid) -> Result<Vec<StoredEvent>, StoreError> {
        let log = self.inner.read().await;
        // Commit order within one resource is version order.
        Ok(log
            .events
            .iter()
            .filter(|e| e.resource_id == resource_id)
            .cloned()
            .collect())
    }

    async fn read_matching(
        &self,
        resource_type: &str,
        filter: &EventFilter,
    ) -> Result<Vec<StoredEvent>, StoreError> {
        let log = self.inner.read().await;
        Ok(log
            .events
            .iter()
            .filter(|e| e.resource_type == resource_type && filter.matches(e))
            .cloned()
            .collect())
    }

    async fn version(&self, resource_id: Uuid) -> Result<u64, StoreError> {
        let log = self.inner.read().await;
        Ok(log
            .resources
            .get(&resource_id)
            .map(|row| row.version)
            .unwrap_or(0))
    }
}
