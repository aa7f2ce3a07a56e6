//! The CRUD orchestrator.
//!
//! [`Service`] implements `find`, `get`, `create`, `update`, `patch` and `remove`
//! once, on top of the primitive operations of any [`StoreBackend`]. Backends
//! therefore cannot drift apart on the parts of the contract callers observe:
//!
//! - `get` and every id-scoped mutation combine `{id}` with the query predicate
//!   and fail with [`AdapterError::NotFound`] when nothing matches, including
//!   when the query pins the identifier to a different value
//! - `patch`/`remove` without an id snapshot the matching identifiers first,
//!   mutate exactly that set, then re-fetch (patch) or return the snapshot
//!   (remove)
//! - `update` is a full replace: fields missing from the payload become `null`,
//!   the identifier is kept
//! - `$select` is honoured on every returned record and always keeps the identifier
//!
//! The snapshot/mutate/re-fetch sequence is not atomic. A concurrent writer can
//! change the matching set between the snapshot and the mutation; the mutation
//! still targets the snapshot.
//!
//! # Example
//!
//! ```ignore
//! use bson::doc;
//! use crudlayer::{prelude::*, memory::MemoryStore};
//!
//! let service = Service::new(MemoryStore::new());
//!
//! let dave = service.create_one(doc! { "name": "Dave", "age": 32 }, Params::new()).await?;
//! let page = service
//!     .find_page(Params::new().query(doc! { "age": { "$gt": 18 }, "$limit": 0 }))
//!     .await?;
//!
//! assert_eq!(page.total, 1);
//! assert!(page.data.is_empty());
//! ```

use bson::Bson;
use futures::future::try_join_all;
use tracing::debug;

use crate::{
    backend::{Selection, StoreBackend, ids_predicate},
    error::{AdapterError, AdapterResult},
    page::{FindResult, Paginated},
    params::Params,
    query::{Directives, Operator, Predicate, Query},
    record::{Id, Record, project, values_equal},
};

/// Input of `create` and `update`: one record or a sequence of records.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    One(Record),
    Many(Vec<Record>),
}

impl From<Record> for Payload {
    fn from(record: Record) -> Self {
        Payload::One(record)
    }
}

impl From<Vec<Record>> for Payload {
    fn from(records: Vec<Record>) -> Self {
        Payload::Many(records)
    }
}

/// Result of an operation that returns one record or several, depending on
/// how it was called.
#[derive(Debug, Clone, PartialEq)]
pub enum Output {
    One(Record),
    Many(Vec<Record>),
}

impl Output {
    /// The single record, if this is a single result.
    pub fn into_record(self) -> Option<Record> {
        match self {
            Output::One(record) => Some(record),
            Output::Many(_) => None,
        }
    }

    /// All records. A single result becomes a one-element sequence.
    pub fn into_records(self) -> Vec<Record> {
        match self {
            Output::One(record) => vec![record],
            Output::Many(records) => records,
        }
    }

    pub fn is_many(&self) -> bool {
        matches!(self, Output::Many(_))
    }
}

/// Uniform CRUD operations over a [`StoreBackend`].
#[derive(Debug, Clone)]
pub struct Service<B: StoreBackend> {
    backend: B,
}

impl<B: StoreBackend> Service<B> {
    /// Creates a service over the given backend.
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Name of the identifier field.
    pub fn id_field(&self) -> &str {
        self.backend.id_field()
    }

    /// Finds records matching `params.query`.
    ///
    /// Returns a [`FindResult::Page`] when `params.paginate` is set, a
    /// [`FindResult::Records`] otherwise. `$limit: 0` skips reading rows but
    /// still counts matches.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::BadRequest`] for a malformed query, or the
    /// backend's translated error.
    #[tracing::instrument(skip_all, fields(paginate = params.paginate))]
    pub async fn find(&self, params: Params<B>) -> AdapterResult<FindResult> {
        let Query { predicate, directives } = self.prepare(&params)?;
        let handle = self.handle_for(&params);

        let data = if directives.limit == Some(0) {
            Vec::new()
        } else {
            let selection = Selection::new(predicate.clone())
                .with_directives(directives.clone())
                .with_native(params.native.clone());

            self.backend
                .select(handle, selection)
                .await?
                .into_iter()
                .map(|record| project(record, directives.select.as_deref(), self.id_field()))
                .collect()
        };

        if !params.paginate {
            return Ok(FindResult::Records(data));
        }

        let total = self
            .backend
            .count(handle, &predicate, params.native.as_ref())
            .await?;

        debug!(total, returned = data.len(), "assembled page");

        Ok(FindResult::Page(
            Paginated::builder(data)
                .with_total(total)
                .with_limit(directives.limit)
                .with_skip(directives.skip.unwrap_or(0))
                .build(),
        ))
    }

    /// [`find`](Self::find) without pagination.
    pub async fn find_all(&self, params: Params<B>) -> AdapterResult<Vec<Record>> {
        Ok(self.find(params.paginate(false)).await?.into_records())
    }

    /// [`find`](Self::find) with pagination.
    pub async fn find_page(&self, params: Params<B>) -> AdapterResult<Paginated<Record>> {
        match self.find(params.paginate(true)).await? {
            FindResult::Page(page) => Ok(page),
            FindResult::Records(data) => Ok(Paginated::builder(data).build()),
        }
    }

    /// Fetches the record identified by `id` that also matches `params.query`.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::NotFound`] if no such record exists, or if the
    /// query constrains the identifier to another value.
    #[tracing::instrument(skip_all)]
    pub async fn get(&self, id: impl Into<Id>, params: Params<B>) -> AdapterResult<Record> {
        let id = self.backend.normalize_id(id.into());
        let query = self.prepare(&params)?;

        self.fetch_one(
            self.handle_for(&params),
            &id,
            query.predicate,
            query.directives.select,
            params.native.clone(),
        )
        .await
    }

    /// Creates one record or a sequence of records.
    ///
    /// Sequence elements are inserted concurrently and independently: an error
    /// leaves earlier insertions in place. The output preserves input order.
    /// `params.query` only contributes its `$select`.
    #[tracing::instrument(skip_all)]
    pub async fn create(&self, data: impl Into<Payload>, params: Params<B>) -> AdapterResult<Output> {
        let query = self.prepare(&params)?;
        let select = query.directives.select.as_deref();
        let handle = self.handle_for(&params);

        match data.into() {
            Payload::One(record) => Ok(Output::One(self.insert_one(handle, record, select).await?)),
            Payload::Many(records) => {
                debug!(count = records.len(), "creating records");

                Ok(Output::Many(
                    try_join_all(
                        records
                            .into_iter()
                            .map(|record| self.insert_one(handle, record, select)),
                    )
                    .await?,
                ))
            }
        }
    }

    pub async fn create_one(&self, data: Record, params: Params<B>) -> AdapterResult<Record> {
        self.create(data, params)
            .await?
            .into_record()
            .ok_or_else(|| AdapterError::NotFound("create returned no record".to_string()))
    }

    pub async fn create_many(&self, data: Vec<Record>, params: Params<B>) -> AdapterResult<Vec<Record>> {
        Ok(self.create(data, params).await?.into_records())
    }

    /// Replaces the record identified by `id`.
    ///
    /// Fields of the stored record that `data` does not mention are set to
    /// `null`. The identifier is preserved whatever `data` says.
    ///
    /// # Errors
    ///
    /// - [`AdapterError::BadRequest`] when `id` is null or `data` is a sequence
    /// - [`AdapterError::NotFound`] when the record does not exist or does not
    ///   match `params.query`
    #[tracing::instrument(skip_all)]
    pub async fn update(
        &self,
        id: impl Into<Id>,
        data: impl Into<Payload>,
        params: Params<B>,
    ) -> AdapterResult<Record> {
        let id = id.into();

        if matches!(id, Bson::Null) {
            return Err(AdapterError::BadRequest(
                "update requires an id; use patch to change several records".to_string(),
            ));
        }

        let Payload::One(data) = data.into() else {
            return Err(AdapterError::BadRequest(
                "update does not accept a sequence of records".to_string(),
            ));
        };

        let id = self.backend.normalize_id(id);
        let query = self.prepare(&params)?;
        let handle = self.handle_for(&params);
        let id_field = self.id_field();

        let existing = self.fetch_one(handle, &id, query.predicate, None, None).await?;
        let stored_id = existing.get(id_field).cloned().unwrap_or(id);

        let mut replacement = Record::new();
        replacement.insert(id_field, stored_id.clone());

        for key in existing.keys().filter(|key| *key != id_field) {
            replacement.insert(key.clone(), data.get(key).cloned().unwrap_or(Bson::Null));
        }
        for (key, value) in data {
            if key != id_field && !replacement.contains_key(&key) {
                replacement.insert(key, value);
            }
        }

        self.backend.replace(handle, &stored_id, replacement).await?;
        self.read_back(handle, &stored_id, query.directives.select.as_deref()).await
    }

    /// Merges `data` into one record (`Some(id)`) or into every record matching
    /// `params.query` (`None`).
    ///
    /// The multi-record form snapshots the matching identifiers, merges into
    /// exactly those, and re-fetches them in snapshot order.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::NotFound`] when an id is given and no record
    /// matches it together with the query.
    #[tracing::instrument(skip_all, fields(multi = id.is_none()))]
    pub async fn patch(&self, id: Option<Id>, mut data: Record, params: Params<B>) -> AdapterResult<Output> {
        let id = self.single_target(id);
        let query = self.prepare(&params)?;
        let handle = self.handle_for(&params);

        data.remove(self.id_field());

        let predicate = self.target_predicate(id.as_ref(), query.predicate)?;
        let ids = self
            .snapshot_ids(handle, predicate, query.directives.sort.clone())
            .await?;

        if id.is_some() && ids.is_empty() {
            return Err(self.not_found(id.as_ref()));
        }

        if !ids.is_empty() && !data.is_empty() {
            self.backend.patch_ids(handle, &ids, &data).await?;
        }

        let records = self
            .fetch_ids(handle, &ids, query.directives.select.as_deref())
            .await?;

        match id {
            Some(id) => records
                .into_iter()
                .next()
                .map(Output::One)
                .ok_or_else(|| self.not_found(Some(&id))),
            None => Ok(Output::Many(records)),
        }
    }

    /// Patches a single record.
    pub async fn patch_one(&self, id: impl Into<Id>, data: Record, params: Params<B>) -> AdapterResult<Record> {
        let id = self.required_id(id.into(), "patch_one")?;

        self.patch(Some(id), data, params)
            .await?
            .into_record()
            .ok_or_else(|| AdapterError::NotFound("no record patched".to_string()))
    }

    /// Patches every record matching `params.query`.
    pub async fn patch_many(&self, data: Record, params: Params<B>) -> AdapterResult<Vec<Record>> {
        Ok(self.patch(None, data, params).await?.into_records())
    }

    /// Removes one record (`Some(id)`) or every record matching `params.query`
    /// (`None`), returning what was removed.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::NotFound`] when an id is given and no record
    /// matches it together with the query.
    #[tracing::instrument(skip_all, fields(multi = id.is_none()))]
    pub async fn remove(&self, id: Option<Id>, params: Params<B>) -> AdapterResult<Output> {
        let id = self.single_target(id);
        let query = self.prepare(&params)?;
        let handle = self.handle_for(&params);
        let id_field = self.id_field();

        let predicate = self.target_predicate(id.as_ref(), query.predicate)?;
        let directives = Directives {
            select: query.directives.select.clone(),
            sort: query.directives.sort,
            ..Directives::default()
        };
        let snapshot = self
            .backend
            .select(handle, Selection::new(predicate).with_directives(directives))
            .await?;

        if id.is_some() && snapshot.is_empty() {
            return Err(self.not_found(id.as_ref()));
        }

        let ids = snapshot
            .iter()
            .filter_map(|record| record.get(id_field).cloned())
            .collect::<Vec<_>>();

        debug!(count = ids.len(), "removing records");

        if !ids.is_empty() {
            self.backend.delete_ids(handle, &ids).await?;
        }

        let removed = snapshot
            .into_iter()
            .map(|record| project(record, query.directives.select.as_deref(), id_field));

        match id {
            Some(id) => removed
                .into_iter()
                .next()
                .map(Output::One)
                .ok_or_else(|| self.not_found(Some(&id))),
            None => Ok(Output::Many(removed.collect())),
        }
    }

    /// Removes a single record.
    pub async fn remove_one(&self, id: impl Into<Id>, params: Params<B>) -> AdapterResult<Record> {
        let id = self.required_id(id.into(), "remove_one")?;

        self.remove(Some(id), params)
            .await?
            .into_record()
            .ok_or_else(|| AdapterError::NotFound("no record removed".to_string()))
    }

    /// Removes every record matching `params.query`.
    pub async fn remove_many(&self, params: Params<B>) -> AdapterResult<Vec<Record>> {
        Ok(self.remove(None, params).await?.into_records())
    }

    fn prepare(&self, params: &Params<B>) -> AdapterResult<Query> {
        let mut query = Query::parse(&params.query)?;

        query.predicate = query
            .predicate
            .map_field_values(self.id_field(), &|value| self.backend.normalize_id(value));

        Ok(query)
    }

    fn handle_for<'a>(&'a self, params: &'a Params<B>) -> &'a B::Handle {
        params
            .handle
            .as_ref()
            .unwrap_or_else(|| self.backend.handle())
    }

    fn single_target(&self, id: Option<Id>) -> Option<Id> {
        id.filter(|id| !matches!(id, Bson::Null))
            .map(|id| self.backend.normalize_id(id))
    }

    fn required_id(&self, id: Id, operation: &str) -> AdapterResult<Id> {
        match id {
            Bson::Null => Err(AdapterError::BadRequest(format!("{operation} requires an id"))),
            id => Ok(id),
        }
    }

    fn not_found(&self, id: Option<&Id>) -> AdapterError {
        match id {
            Some(id) => AdapterError::NotFound(format!("No record found for id {id}")),
            None => AdapterError::NotFound("No record found".to_string()),
        }
    }

    /// `{id} AND predicate`, or [`AdapterError::NotFound`] when the predicate
    /// pins the identifier to something else.
    fn scoped(&self, id: &Id, predicate: Predicate) -> AdapterResult<Predicate> {
        let id_field = self.id_field();

        if predicate
            .equality_constraints(id_field)
            .into_iter()
            .any(|constraint| !values_equal(constraint, id))
        {
            return Err(self.not_found(Some(id)));
        }

        Ok(Predicate::And(vec![
            Predicate::compare(id_field, Operator::Eq, id.clone()),
            predicate,
        ]))
    }

    fn target_predicate(&self, id: Option<&Id>, predicate: Predicate) -> AdapterResult<Predicate> {
        match id {
            Some(id) => self.scoped(id, predicate),
            None => Ok(predicate),
        }
    }

    async fn fetch_one(
        &self,
        handle: &B::Handle,
        id: &Id,
        predicate: Predicate,
        select: Option<Vec<String>>,
        native: Option<B::Native>,
    ) -> AdapterResult<Record> {
        if matches!(id, Bson::Null) {
            return Err(self.not_found(None));
        }

        let selection = Selection::new(self.scoped(id, predicate)?)
            .with_directives(Directives {
                select: select.clone(),
                ..Directives::default()
            })
            .with_native(native);
        let mut records = self.backend.select(handle, selection).await?;

        match records.len() {
            1 => Ok(project(records.remove(0), select.as_deref(), self.id_field())),
            _ => Err(self.not_found(Some(id))),
        }
    }

    async fn insert_one(
        &self,
        handle: &B::Handle,
        mut record: Record,
        select: Option<&[String]>,
    ) -> AdapterResult<Record> {
        let id_field = self.id_field();

        match record.get(id_field).cloned() {
            Some(Bson::Null) => {
                record.remove(id_field);
            }
            Some(id) => {
                record.insert(id_field, self.backend.normalize_id(id));
            }
            None => {}
        }

        let id = self.backend.insert(handle, record).await?;

        self.read_back(handle, &id, select).await
    }

    async fn read_back(&self, handle: &B::Handle, id: &Id, select: Option<&[String]>) -> AdapterResult<Record> {
        self.fetch_ids(handle, std::slice::from_ref(id), select)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| self.not_found(Some(id)))
    }

    async fn snapshot_ids(
        &self,
        handle: &B::Handle,
        predicate: Predicate,
        sort: Option<Vec<crate::query::Sort>>,
    ) -> AdapterResult<Vec<Id>> {
        let id_field = self.id_field();
        let directives = Directives {
            select: Some(Vec::new()),
            sort,
            ..Directives::default()
        };
        let ids = self
            .backend
            .select(handle, Selection::new(predicate).with_directives(directives))
            .await?
            .into_iter()
            .filter_map(|record| record.get(id_field).cloned())
            .collect::<Vec<_>>();

        debug!(count = ids.len(), "captured identifier snapshot");

        Ok(ids)
    }

    /// Reads the records in `ids`, in the order of `ids`.
    async fn fetch_ids(
        &self,
        handle: &B::Handle,
        ids: &[Id],
        select: Option<&[String]>,
    ) -> AdapterResult<Vec<Record>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let id_field = self.id_field();
        let selection = Selection::new(ids_predicate(id_field, ids)).with_directives(Directives {
            select: select.map(<[String]>::to_vec),
            ..Directives::default()
        });
        let mut found = self.backend.select(handle, selection).await?;

        let mut ordered = Vec::with_capacity(found.len());
        for id in ids {
            let position = found.iter().position(|record| {
                record
                    .get(id_field)
                    .is_some_and(|stored| values_equal(stored, id))
            });

            if let Some(position) = position {
                ordered.push(project(found.swap_remove(position), select, id_field));
            }
        }

        Ok(ordered)
    }
}
