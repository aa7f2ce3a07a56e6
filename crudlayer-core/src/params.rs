//! Per-call parameters.

use std::fmt;

use bson::{Bson, Document, ser::serialize_to_bson};
use serde_json::Value as JsonValue;

use crate::{
    backend::StoreBackend,
    error::{AdapterError, AdapterResult},
};

/// Parameters accepted by every [`Service`](crate::service::Service) operation.
///
/// # Example
///
/// ```ignore
/// use bson::doc;
///
/// let params = Params::new()
///     .query(doc! { "age": { "$gt": 18 }, "$limit": 10 })
///     .paginate(true);
/// ```
pub struct Params<B: StoreBackend> {
    /// The raw query document: predicate plus `$select`/`$sort`/`$limit`/`$skip`.
    pub query: Document,
    /// Ask `find` for a [`Paginated`](crate::page::Paginated) envelope.
    pub paginate: bool,
    /// Native query to augment, passed through to the backend untouched.
    pub native: Option<B::Native>,
    /// Handle override for this call, e.g. a caller-owned transaction.
    pub handle: Option<B::Handle>,
}

impl<B: StoreBackend> Params<B> {
    pub fn new() -> Self {
        Self {
            query: Document::new(),
            paginate: false,
            native: None,
            handle: None,
        }
    }

    /// Sets the raw query document.
    pub fn query(mut self, query: Document) -> Self {
        self.query = query;
        self
    }

    /// Sets the query from a JSON object.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::BadRequest`] if `query` is not a JSON object.
    pub fn query_json(mut self, query: JsonValue) -> AdapterResult<Self> {
        match serialize_to_bson(&query)? {
            Bson::Document(doc) => {
                self.query = doc;
                Ok(self)
            }
            other => Err(AdapterError::BadRequest(format!(
                "query must be an object, got {other:?}"
            ))),
        }
    }

    pub fn paginate(mut self, paginate: bool) -> Self {
        self.paginate = paginate;
        self
    }

    /// Attaches a native query for the backend to augment.
    pub fn native(mut self, native: B::Native) -> Self {
        self.native = Some(native);
        self
    }

    /// Runs this call against `handle` instead of the backend's default.
    pub fn handle(mut self, handle: B::Handle) -> Self {
        self.handle = Some(handle);
        self
    }
}

impl<B: StoreBackend> Default for Params<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: StoreBackend> Clone for Params<B> {
    fn clone(&self) -> Self {
        Self {
            query: self.query.clone(),
            paginate: self.paginate,
            native: self.native.clone(),
            handle: self.handle.clone(),
        }
    }
}

impl<B: StoreBackend> fmt::Debug for Params<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Params")
            .field("query", &self.query)
            .field("paginate", &self.paginate)
            .field("native", &self.native)
            .field("handle", &self.handle.is_some())
            .finish()
    }
}
