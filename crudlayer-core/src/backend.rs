//! Storage backend abstraction.
//!
//! A backend only knows how to run a handful of primitive operations against
//! its native store: select records matching a predicate, count them, insert one
//! record, merge fields into an explicit set of identifiers, replace one record
//! and delete an explicit set of identifiers. Everything that makes the CRUD
//! contract uniform (id scoping, conflict detection, the snapshot/mutate/re-fetch
//! protocol, projection, pagination) lives in [`Service`](crate::service::Service)
//! and is shared by every backend.
//!
//! # Traits
//!
//! - [`StoreBackend`]: The primitive operations a backend must provide
//! - [`StoreBackendBuilder`]: Factory trait for creating backend instances
//!
//! # Handles
//!
//! Every primitive receives the handle it must run against. The backend owns a
//! default handle; callers may pass another one per call through
//! [`Params::handle`](crate::params::Params::handle), typically a transaction
//! they opened themselves.

use std::fmt::Debug;

use async_trait::async_trait;
use bson::Bson;

use crate::{
    error::AdapterResult,
    query::{Directives, Predicate},
    record::{Id, Record},
};

/// A read request handed to [`StoreBackend::select`].
#[derive(Debug, Clone)]
pub struct Selection<N> {
    /// Records must match this predicate.
    pub predicate: Predicate,
    /// Projection, ordering and window. `limit` is never `Some(0)` here: the
    /// service answers such requests without touching the backend.
    pub directives: Directives,
    /// Caller-supplied native query to augment instead of building one.
    pub native: Option<N>,
}

impl<N> Selection<N> {
    pub fn new(predicate: Predicate) -> Self {
        Self {
            predicate,
            directives: Directives::default(),
            native: None,
        }
    }

    pub fn with_directives(mut self, directives: Directives) -> Self {
        self.directives = directives;
        self
    }

    pub fn with_native(mut self, native: Option<N>) -> Self {
        self.native = native;
        self
    }
}

/// Abstract interface for storage backends.
///
/// # Thread Safety
///
/// All implementations must be thread-safe. The engine never holds a lock across
/// calls; any locking is the backend's own business.
///
/// # Error Handling
///
/// Native failures must be routed through the backend's
/// [`ErrorClassifier`](crate::error::ErrorClassifier) so callers only ever see
/// [`AdapterError`](crate::error::AdapterError).
#[async_trait]
pub trait StoreBackend: Send + Sync + Debug {
    /// What a primitive runs against: a table handle, pool, collection, or a
    /// caller-owned transaction.
    type Handle: Clone + Debug + Send + Sync;

    /// A caller-built native query the engine augments with the compiled
    /// predicate (a SQL select statement, an aggregation pipeline, ...).
    type Native: Clone + Debug + Send + Sync;

    /// The handle used when a call does not supply one.
    fn handle(&self) -> &Self::Handle;

    /// Name of the identifier field.
    fn id_field(&self) -> &str;

    /// Converts a caller-supplied identifier into the backend's native form.
    ///
    /// The default implementation returns the identifier unchanged.
    fn normalize_id(&self, id: Id) -> Id {
        id
    }

    /// Returns records matching `selection`, in order, with the directives applied.
    ///
    /// # Arguments
    ///
    /// * `handle` - The handle to run against
    /// * `selection` - Predicate, directives and optional native query
    async fn select(
        &self,
        handle: &Self::Handle,
        selection: Selection<Self::Native>,
    ) -> AdapterResult<Vec<Record>>;

    /// Counts records matching `predicate`.
    async fn count(
        &self,
        handle: &Self::Handle,
        predicate: &Predicate,
        native: Option<&Self::Native>,
    ) -> AdapterResult<u64>;

    /// Inserts one record and returns its identifier.
    ///
    /// When the record carries no identifier the backend generates one.
    async fn insert(&self, handle: &Self::Handle, record: Record) -> AdapterResult<Id>;

    /// Merges `data` into every record whose identifier is in `ids`.
    ///
    /// `data` never contains the identifier field.
    async fn patch_ids(&self, handle: &Self::Handle, ids: &[Id], data: &Record) -> AdapterResult<()>;

    /// Replaces the record stored under `id` with `record`.
    ///
    /// `record` carries every field the replacement should have, including the
    /// identifier and explicit nulls for cleared fields.
    async fn replace(&self, handle: &Self::Handle, id: &Id, record: Record) -> AdapterResult<()>;

    /// Deletes every record whose identifier is in `ids`.
    async fn delete_ids(&self, handle: &Self::Handle, ids: &[Id]) -> AdapterResult<()>;
}

/// Factory trait for backend construction.
///
/// Builders hold configuration; `build` does whatever I/O is required to produce
/// a ready backend (opening pools, parsing connection strings, ...).
#[async_trait]
pub trait StoreBackendBuilder {
    /// The type of backend this builder constructs.
    type Backend: StoreBackend;

    /// Builds and returns a configured backend instance.
    ///
    /// # Errors
    ///
    /// Returns an error if initialization fails (e.g., connection errors, invalid configuration).
    async fn build(self) -> AdapterResult<Self::Backend>;
}

/// Rejects patch payloads that use `$`-prefixed update operators.
///
/// For backends without native update operators.
pub fn reject_update_operators(data: &Record) -> AdapterResult<()> {
    match data.keys().find(|key| key.starts_with('$')) {
        Some(key) => Err(crate::error::AdapterError::BadRequest(format!(
            "update operator {key} is not supported by this backend"
        ))),
        None => Ok(()),
    }
}

/// Builds `id IN (...)` over an identifier set.
pub fn ids_predicate(id_field: &str, ids: &[Id]) -> Predicate {
    Predicate::compare(id_field, crate::query::Operator::In, Bson::Array(ids.to_vec()))
}
