//! In-memory storage implementation.
//!
//! Records live in an insertion-ordered vector behind an async-aware read-write
//! lock. Every read is a full scan evaluated by [`crate::evaluator`].

use std::sync::Arc;

use async_trait::async_trait;
use bson::{Bson, Document};
use mea::rwlock::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crudlayer_core::{
    backend::{Selection, StoreBackend, StoreBackendBuilder, reject_update_operators},
    error::{AdapterError, AdapterResult},
    query::Predicate,
    record::{DEFAULT_ID_FIELD, Id, Record, project, values_equal},
};

use crate::evaluator::{compare_records, filter_records};

/// How identifiers are generated for records inserted without one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdStrategy {
    /// Increasing integers, starting at [`MemoryOptions::start_id`].
    #[default]
    Sequence,
    /// Random v4 UUID strings.
    Uuid,
}

/// Configuration for [`MemoryStore`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryOptions {
    /// Name of the identifier field.
    pub id_field: String,
    /// Identifier generation for records inserted without one.
    pub id_strategy: IdStrategy,
    /// First identifier handed out by [`IdStrategy::Sequence`].
    pub start_id: i64,
}

impl Default for MemoryOptions {
    fn default() -> Self {
        Self {
            id_field: DEFAULT_ID_FIELD.to_string(),
            id_strategy: IdStrategy::Sequence,
            start_id: 0,
        }
    }
}

#[derive(Debug)]
struct TableState {
    records: Vec<Document>,
    /// `None` once the sequence has passed `i64::MAX`.
    next_id: Option<i64>,
}

/// A shared table of records.
///
/// Cloning a table yields another handle onto the same records.
#[derive(Debug, Clone)]
pub struct MemoryTable {
    state: Arc<RwLock<TableState>>,
}

impl MemoryTable {
    fn new(start_id: i64) -> Self {
        Self {
            state: Arc::new(RwLock::new(TableState {
                records: Vec::new(),
                next_id: Some(start_id),
            })),
        }
    }

    /// Number of stored records.
    pub async fn len(&self) -> usize {
        self.state.read().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// A copy of every stored record in insertion order.
    pub async fn snapshot(&self) -> Vec<Document> {
        self.state.read().await.records.clone()
    }
}

/// Thread-safe in-memory record store.
///
/// This backend doubles as the reference implementation of the predicate
/// semantics: compiled backends are tested for agreement with it.
///
/// # Example
///
/// ```ignore
/// use crudlayer_memory::MemoryStore;
/// use crudlayer_core::{Params, Service};
/// use bson::doc;
///
/// let service = Service::new(MemoryStore::new());
/// let created = service.create_one(doc! { "name": "Alice" }, Params::new()).await?;
///
/// assert_eq!(created.get_i64("id")?, 0);
/// ```
#[derive(Debug, Clone)]
pub struct MemoryStore {
    table: MemoryTable,
    options: MemoryOptions,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Creates an empty store with default options.
    pub fn new() -> Self {
        Self::with_options(MemoryOptions::default())
    }

    pub fn with_options(options: MemoryOptions) -> Self {
        Self {
            table: MemoryTable::new(options.start_id),
            options,
        }
    }

    /// Creates a builder for constructing a `MemoryStore` with custom options.
    pub fn builder() -> MemoryStoreBuilder {
        MemoryStoreBuilder::default()
    }

    pub fn options(&self) -> &MemoryOptions {
        &self.options
    }

    fn position(&self, records: &[Document], id: &Id) -> Option<usize> {
        records.iter().position(|record| {
            record
                .get(&self.options.id_field)
                .is_some_and(|stored| values_equal(stored, id))
        })
    }

    fn contains(&self, ids: &[Id], record: &Document) -> bool {
        record
            .get(&self.options.id_field)
            .is_some_and(|stored| ids.iter().any(|id| values_equal(stored, id)))
    }

    fn next_id(&self, state: &mut TableState) -> AdapterResult<Id> {
        match self.options.id_strategy {
            IdStrategy::Sequence => loop {
                let next = state.next_id.ok_or_else(|| {
                    AdapterError::BadRequest(format!(
                        "the {} sequence is exhausted; supply an explicit identifier",
                        self.options.id_field
                    ))
                })?;
                state.next_id = next.checked_add(1);

                // Identifiers such as `2.0` do not advance the sequence but still collide.
                let id = Bson::Int64(next);
                if self.position(&state.records, &id).is_none() {
                    return Ok(id);
                }
            },
            IdStrategy::Uuid => Ok(Bson::String(uuid::Uuid::new_v4().to_string())),
        }
    }
}

#[async_trait]
impl StoreBackend for MemoryStore {
    type Handle = MemoryTable;
    type Native = ();

    fn handle(&self) -> &Self::Handle {
        &self.table
    }

    fn id_field(&self) -> &str {
        &self.options.id_field
    }

    #[instrument(skip_all, level = "trace")]
    async fn select(&self, handle: &Self::Handle, selection: Selection<Self::Native>) -> AdapterResult<Vec<Record>> {
        let state = handle.state.read().await;
        let mut matched = filter_records(&state.records, &selection.predicate)?;

        let directives = &selection.directives;
        let sort = directives.sort_keys();
        if !sort.is_empty() {
            matched.sort_by(|a, b| compare_records(a, b, sort));
        }

        let skip = usize::try_from(directives.skip.unwrap_or(0)).unwrap_or(usize::MAX);
        let limit = directives
            .limit
            .map_or(usize::MAX, |limit| usize::try_from(limit).unwrap_or(usize::MAX));

        debug!(matched = matched.len(), skip, "evaluated selection");

        Ok(matched
            .into_iter()
            .skip(skip)
            .take(limit)
            .map(|record| project(record.clone(), directives.select.as_deref(), &self.options.id_field))
            .collect())
    }

    async fn count(&self, handle: &Self::Handle, predicate: &Predicate, _native: Option<&Self::Native>) -> AdapterResult<u64> {
        let state = handle.state.read().await;

        Ok(filter_records(&state.records, predicate)?.len() as u64)
    }

    async fn insert(&self, handle: &Self::Handle, mut record: Record) -> AdapterResult<Id> {
        let mut state = handle.state.write().await;
        let id_field = self.options.id_field.as_str();

        let id = match record.get(id_field).cloned() {
            Some(id) => {
                if self.position(&state.records, &id).is_some() {
                    return Err(AdapterError::BadRequest(format!(
                        "a record with {id_field} {id} already exists"
                    )));
                }
                id
            }
            None => {
                let id = self.next_id(&mut state)?;

                let mut with_id = Document::new();
                with_id.insert(id_field, id.clone());
                for (key, value) in record {
                    with_id.insert(key, value);
                }
                record = with_id;

                id
            }
        };

        if let (IdStrategy::Sequence, Some(explicit), Some(next)) =
            (self.options.id_strategy, as_i64(&id), state.next_id)
        {
            if explicit >= next {
                state.next_id = explicit.checked_add(1);
            }
        }

        state.records.push(record);

        Ok(id)
    }

    async fn patch_ids(&self, handle: &Self::Handle, ids: &[Id], data: &Record) -> AdapterResult<()> {
        reject_update_operators(data)?;

        let mut state = handle.state.write().await;

        for record in state.records.iter_mut().filter(|record| self.contains(ids, record)) {
            for (key, value) in data {
                record.insert(key.clone(), value.clone());
            }
        }

        Ok(())
    }

    async fn replace(&self, handle: &Self::Handle, id: &Id, record: Record) -> AdapterResult<()> {
        let mut state = handle.state.write().await;

        match self.position(&state.records, id) {
            Some(index) => {
                state.records[index] = record;
                Ok(())
            }
            None => Err(AdapterError::NotFound(format!("No record found for id {id}"))),
        }
    }

    async fn delete_ids(&self, handle: &Self::Handle, ids: &[Id]) -> AdapterResult<()> {
        let mut state = handle.state.write().await;
        state.records.retain(|record| !self.contains(ids, record));

        Ok(())
    }
}

fn as_i64(id: &Id) -> Option<i64> {
    match id {
        Bson::Int32(v) => Some(i64::from(*v)),
        Bson::Int64(v) => Some(*v),
        _ => None,
    }
}

/// Builder for constructing [`MemoryStore`] instances.
///
/// # Example
///
/// ```ignore
/// use crudlayer_memory::{IdStrategy, MemoryStore};
/// use crudlayer_core::backend::StoreBackendBuilder;
///
/// let store = MemoryStore::builder()
///     .id_field("_id")
///     .id_strategy(IdStrategy::Uuid)
///     .build()
///     .await?;
/// ```
#[derive(Debug, Default)]
pub struct MemoryStoreBuilder {
    options: MemoryOptions,
    records: Vec<Record>,
}

impl MemoryStoreBuilder {
    pub fn id_field(mut self, id_field: impl Into<String>) -> Self {
        self.options.id_field = id_field.into();
        self
    }

    pub fn id_strategy(mut self, id_strategy: IdStrategy) -> Self {
        self.options.id_strategy = id_strategy;
        self
    }

    pub fn start_id(mut self, start_id: i64) -> Self {
        self.options.start_id = start_id;
        self
    }

    pub fn options(mut self, options: MemoryOptions) -> Self {
        self.options = options;
        self
    }

    /// Records to load on build, inserted in order as if by `create`.
    pub fn records(mut self, records: impl IntoIterator<Item = Record>) -> Self {
        self.records.extend(records);
        self
    }
}

#[async_trait]
impl StoreBackendBuilder for MemoryStoreBuilder {
    type Backend = MemoryStore;

    async fn build(self) -> AdapterResult<Self::Backend> {
        if self.options.id_field.is_empty() {
            return Err(AdapterError::Initialization("id_field must not be empty".to_string()));
        }

        let store = MemoryStore::with_options(self.options);
        for record in self.records {
            store.insert(store.handle(), record).await?;
        }

        Ok(store)
    }
}
