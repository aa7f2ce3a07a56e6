use async_trait::async_trait;
use bson::{Bson, Document, doc, oid::ObjectId};
use futures::TryStreamExt;
use mongodb::{
    Client, Collection,
    options::{ClientOptions, FindOptions},
};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crudlayer_core::{
    backend::{Selection, StoreBackend, StoreBackendBuilder},
    error::{AdapterError, AdapterResult, ErrorClassifier},
    query::{Directives, Predicate, SortDirection},
    record::{Id, Record},
};

use crate::{error::MongoErrorClassifier, query::MongoQueryTranslator};

/// Key of the pipeline stage marking where generated stages are spliced in.
pub const PIPELINE_MARKER: &str = "$crudlayer";

/// Configuration for [`MongoDbStore`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MongoOptions {
    /// Name of the identifier field.
    pub id_field: String,
    /// Leave 24-character hex identifiers as strings.
    pub disable_objectify: bool,
    /// Count with collection metadata when the query has no predicate.
    pub use_estimated_document_count: bool,
}

impl Default for MongoOptions {
    fn default() -> Self {
        Self {
            id_field: "_id".to_string(),
            disable_objectify: false,
            use_estimated_document_count: false,
        }
    }
}

/// A MongoDB collection.
///
/// The native query type is an aggregation pipeline. The engine's
/// `$match`/`$sort`/`$skip`/`$limit`/`$project` stages replace a
/// `{ "$crudlayer": ... }` marker stage, or run before the caller's stages
/// when there is no marker.
#[derive(Debug, Clone)]
pub struct MongoDbStore {
    client: Client,
    collection: Collection<Document>,
    options: MongoOptions,
}

impl MongoDbStore {
    pub fn new(client: Client, collection: Collection<Document>, options: MongoOptions) -> Self {
        Self {
            client,
            collection,
            options,
        }
    }

    pub fn builder(dsn: &str, database: &str, collection: &str) -> MongoDbStoreBuilder {
        MongoDbStoreBuilder::new(dsn, database, collection)
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn options(&self) -> &MongoOptions {
        &self.options
    }

    fn filter(&self, predicate: &Predicate) -> AdapterResult<Document> {
        MongoQueryTranslator::new().translate(predicate)
    }

    fn ids_filter(&self, ids: &[Id]) -> Document {
        doc! { &self.options.id_field: { "$in": ids.to_vec() } }
    }

    fn sort_document(&self, directives: &Directives) -> Option<Document> {
        let keys = directives.sort_keys();

        (!keys.is_empty()).then(|| {
            keys.iter()
                .map(|sort| {
                    let direction = match sort.direction {
                        SortDirection::Asc => 1,
                        SortDirection::Desc => -1,
                    };
                    (sort.field.clone(), Bson::Int32(direction))
                })
                .collect()
        })
    }

    fn projection(&self, directives: &Directives) -> Option<Document> {
        directives.select.as_ref().map(|fields| {
            let mut projection = doc! { &self.options.id_field: 1 };
            for field in fields {
                projection.insert(field, 1);
            }
            projection
        })
    }

    fn find_options(&self, directives: &Directives) -> FindOptions {
        let mut options = FindOptions::default();

        options.sort = self.sort_document(directives);
        options.projection = self.projection(directives);
        options.skip = directives.skip;
        options.limit = directives
            .limit
            .map(|limit| i64::try_from(limit).unwrap_or(i64::MAX));

        options
    }

    /// The caller's pipeline with `stages` spliced in at the marker.
    fn splice(&self, native: &[Document], stages: Vec<Document>) -> Vec<Document> {
        let marker = native
            .iter()
            .position(|stage| stage.len() == 1 && stage.contains_key(PIPELINE_MARKER));

        match marker {
            Some(index) => native[..index]
                .iter()
                .cloned()
                .chain(stages)
                .chain(native[index + 1..].iter().cloned())
                .collect(),
            None => stages.into_iter().chain(native.iter().cloned()).collect(),
        }
    }

    fn pipeline(&self, native: &[Document], filter: Document, directives: &Directives) -> Vec<Document> {
        let mut stages = vec![doc! { "$match": filter }];

        if let Some(sort) = self.sort_document(directives) {
            stages.push(doc! { "$sort": sort });
        }
        if let Some(skip) = directives.skip {
            stages.push(doc! { "$skip": i64::try_from(skip).unwrap_or(i64::MAX) });
        }
        if let Some(limit) = directives.limit {
            stages.push(doc! { "$limit": i64::try_from(limit).unwrap_or(i64::MAX) });
        }
        if let Some(projection) = self.projection(directives) {
            stages.push(doc! { "$project": projection });
        }

        self.splice(native, stages)
    }

    /// Closes the client's connections.
    pub async fn shutdown(self) -> AdapterResult<()> {
        self.client.shutdown().await;

        Ok(())
    }
}

fn is_object_id(value: &str) -> bool {
    value.len() == 24 && value.bytes().all(|b| b.is_ascii_hexdigit())
}

#[async_trait]
impl StoreBackend for MongoDbStore {
    type Handle = Collection<Document>;
    type Native = Vec<Document>;

    fn handle(&self) -> &Self::Handle {
        &self.collection
    }

    fn id_field(&self) -> &str {
        &self.options.id_field
    }

    fn normalize_id(&self, id: Id) -> Id {
        if self.options.disable_objectify || self.options.id_field != "_id" {
            return id;
        }

        match id {
            Bson::String(hex) if is_object_id(&hex) => {
                ObjectId::parse_str(&hex).map_or(Bson::String(hex), Bson::ObjectId)
            }
            id => id,
        }
    }

    #[instrument(skip_all, fields(collection = %handle.name()))]
    async fn select(&self, handle: &Self::Handle, selection: Selection<Self::Native>) -> AdapterResult<Vec<Record>> {
        let filter = self.filter(&selection.predicate)?;

        match &selection.native {
            Some(native) => {
                let pipeline = self.pipeline(native, filter, &selection.directives);
                debug!(stages = pipeline.len(), "running aggregation");

                handle
                    .aggregate(pipeline)
                    .await
                    .map_err(MongoErrorClassifier::translate)?
                    .try_collect()
                    .await
                    .map_err(MongoErrorClassifier::translate)
            }
            None => {
                debug!(%filter, "running find");

                handle
                    .find(filter)
                    .with_options(self.find_options(&selection.directives))
                    .await
                    .map_err(MongoErrorClassifier::translate)?
                    .try_collect()
                    .await
                    .map_err(MongoErrorClassifier::translate)
            }
        }
    }

    #[instrument(skip_all, fields(collection = %handle.name()))]
    async fn count(&self, handle: &Self::Handle, predicate: &Predicate, native: Option<&Self::Native>) -> AdapterResult<u64> {
        if let Some(native) = native {
            let mut pipeline = self.pipeline(native, self.filter(predicate)?, &Directives::default());
            pipeline.push(doc! { "$count": "total" });

            let rows: Vec<Document> = handle
                .aggregate(pipeline)
                .await
                .map_err(MongoErrorClassifier::translate)?
                .try_collect()
                .await
                .map_err(MongoErrorClassifier::translate)?;

            return Ok(match rows.first().and_then(|row| row.get("total")) {
                Some(Bson::Int32(total)) => u64::try_from(*total).unwrap_or(0),
                Some(Bson::Int64(total)) => u64::try_from(*total).unwrap_or(0),
                _ => 0,
            });
        }

        if self.options.use_estimated_document_count && predicate.is_unconstrained() {
            return handle
                .estimated_document_count()
                .await
                .map_err(MongoErrorClassifier::translate);
        }

        handle
            .count_documents(self.filter(predicate)?)
            .await
            .map_err(MongoErrorClassifier::translate)
    }

    #[instrument(skip_all, fields(collection = %handle.name()))]
    async fn insert(&self, handle: &Self::Handle, mut record: Record) -> AdapterResult<Id> {
        let id_field = &self.options.id_field;

        if id_field != "_id" && !record.contains_key(id_field) {
            let mut generated = doc! { id_field: ObjectId::new().to_hex() };
            for (key, value) in record {
                generated.insert(key, value);
            }
            record = generated;
        }

        let custom_id = (id_field != "_id").then(|| record.get(id_field).cloned()).flatten();
        let result = handle
            .insert_one(record)
            .await
            .map_err(MongoErrorClassifier::translate)?;

        Ok(custom_id.unwrap_or(result.inserted_id))
    }

    #[instrument(skip_all, fields(collection = %handle.name(), count = ids.len()))]
    async fn patch_ids(&self, handle: &Self::Handle, ids: &[Id], data: &Record) -> AdapterResult<()> {
        let mut fields = Document::new();
        let mut modifier = Document::new();

        for (key, value) in data {
            if key.starts_with('$') {
                modifier.insert(key, value.clone());
            } else {
                fields.insert(key, value.clone());
            }
        }
        if !fields.is_empty() {
            modifier.insert("$set", fields);
        }
        if modifier.is_empty() || ids.is_empty() {
            return Ok(());
        }

        let result = handle
            .update_many(self.ids_filter(ids), modifier)
            .await
            .map_err(MongoErrorClassifier::translate)?;
        debug!(modified = result.modified_count, "patched documents");

        Ok(())
    }

    #[instrument(skip_all, fields(collection = %handle.name()))]
    async fn replace(&self, handle: &Self::Handle, id: &Id, mut record: Record) -> AdapterResult<()> {
        // `_id` is immutable; other identifier fields are rewritten with the document.
        record.remove("_id");

        let result = handle
            .replace_one(doc! { &self.options.id_field: id.clone() }, record)
            .await
            .map_err(MongoErrorClassifier::translate)?;

        match result.matched_count {
            0 => Err(AdapterError::NotFound(format!("No record found for id {id}"))),
            _ => Ok(()),
        }
    }

    #[instrument(skip_all, fields(collection = %handle.name(), count = ids.len()))]
    async fn delete_ids(&self, handle: &Self::Handle, ids: &[Id]) -> AdapterResult<()> {
        if ids.is_empty() {
            return Ok(());
        }

        handle
            .delete_many(self.ids_filter(ids))
            .await
            .map_err(MongoErrorClassifier::translate)?;

        Ok(())
    }
}

/// Builder for [`MongoDbStore`].
///
/// Building parses the connection string and creates a client; connections
/// are only opened by the first operation.
#[derive(Debug)]
pub struct MongoDbStoreBuilder {
    dsn: String,
    database: String,
    collection: String,
    options: MongoOptions,
}

impl MongoDbStoreBuilder {
    pub fn new(dsn: &str, database: &str, collection: &str) -> Self {
        Self {
            dsn: dsn.to_string(),
            database: database.to_string(),
            collection: collection.to_string(),
            options: MongoOptions::default(),
        }
    }

    pub fn id_field(mut self, id_field: impl Into<String>) -> Self {
        self.options.id_field = id_field.into();
        self
    }

    pub fn disable_objectify(mut self, disable: bool) -> Self {
        self.options.disable_objectify = disable;
        self
    }

    pub fn use_estimated_document_count(mut self, estimated: bool) -> Self {
        self.options.use_estimated_document_count = estimated;
        self
    }

    pub fn options(mut self, options: MongoOptions) -> Self {
        self.options = options;
        self
    }
}

#[async_trait]
impl StoreBackendBuilder for MongoDbStoreBuilder {
    type Backend = MongoDbStore;

    async fn build(self) -> AdapterResult<Self::Backend> {
        if self.options.id_field.is_empty() {
            return Err(AdapterError::Initialization("an id field is required".to_string()));
        }

        let client = Client::with_options(
            ClientOptions::parse(&self.dsn)
                .await
                .map_err(|e| AdapterError::Initialization(e.to_string()))?,
        )
        .map_err(|e| AdapterError::Initialization(e.to_string()))?;
        let collection = client.database(&self.database).collection(&self.collection);

        Ok(MongoDbStore::new(client, collection, self.options))
    }
}

#[cfg(test)]
mod tests {
    use crudlayer_core::query::Query;

    use super::*;

    async fn store(options: MongoOptions) -> MongoDbStore {
        MongoDbStore::builder("mongodb://localhost:27017", "crudlayer", "people")
            .options(options)
            .build()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn hex_ids_become_object_ids() {
        let store = store(MongoOptions::default()).await;
        let oid = ObjectId::new();

        assert_eq!(store.normalize_id(Bson::String(oid.to_hex())), Bson::ObjectId(oid));
        assert_eq!(store.normalize_id(Bson::String("abc".into())), Bson::String("abc".into()));
        assert_eq!(store.normalize_id(Bson::Int32(4)), Bson::Int32(4));
    }

    #[tokio::test]
    async fn objectify_can_be_disabled() {
        let hex = ObjectId::new().to_hex();

        let store = store(MongoOptions { disable_objectify: true, ..MongoOptions::default() }).await;
        assert_eq!(store.normalize_id(Bson::String(hex.clone())), Bson::String(hex.clone()));

        let store = store_with_id("uid").await;
        assert_eq!(store.normalize_id(Bson::String(hex.clone())), Bson::String(hex));
    }

    async fn store_with_id(id_field: &str) -> MongoDbStore {
        store(MongoOptions { id_field: id_field.to_string(), ..MongoOptions::default() }).await
    }

    #[tokio::test]
    async fn stages_replace_the_marker() {
        let store = store(MongoOptions::default()).await;
        let query = Query::parse(&doc! { "age": 3, "$sort": { "name": 1 }, "$limit": 2 }).unwrap();
        let native = vec![
            doc! { "$lookup": { "from": "teams", "localField": "team", "foreignField": "_id", "as": "team" } },
            doc! { PIPELINE_MARKER: true },
            doc! { "$unwind": "$team" },
        ];

        let pipeline = store.pipeline(&native, store.filter(&query.predicate).unwrap(), &query.directives);

        assert_eq!(
            pipeline,
            vec![
                native[0].clone(),
                doc! { "$match": { "age": { "$eq": 3 } } },
                doc! { "$sort": { "name": 1 } },
                doc! { "$limit": 2_i64 },
                native[2].clone(),
            ]
        );
    }

    #[tokio::test]
    async fn stages_lead_without_marker() {
        let store = store(MongoOptions::default()).await;
        let native = vec![doc! { "$unwind": "$tags" }];

        let pipeline = store.pipeline(&native, doc! {}, &Directives::default());

        assert_eq!(pipeline, vec![doc! { "$match": {} }, native[0].clone()]);
    }

    #[tokio::test]
    async fn find_options_carry_directives() {
        let store = store_with_id("uid").await;
        let query = Query::parse(&doc! { "$select": ["name"], "$skip": 4, "$sort": { "age": -1 } }).unwrap();

        let options = store.find_options(&query.directives);

        assert_eq!(options.projection, Some(doc! { "uid": 1, "name": 1 }));
        assert_eq!(options.sort, Some(doc! { "age": -1 }));
        assert_eq!(options.skip, Some(4));
        assert_eq!(options.limit, None);
    }

    #[test]
    fn options_deserialize_with_defaults() {
        let options: MongoOptions = bson::deserialize_from_document(doc! { "disable_objectify": true }).unwrap();

        assert_eq!(options.id_field, "_id");
        assert!(options.disable_objectify);
        assert!(!options.use_estimated_document_count);
    }
}
