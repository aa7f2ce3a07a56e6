//! SQLite storage backend.
//!
//! Statements are built with sea-query and executed through `sqlx`, either on
//! the pool or on a caller-owned transaction.

use std::{fmt, str::FromStr, sync::Arc};

use async_trait::async_trait;
use mea::mutex::Mutex;
use sea_query::{
    Alias, Asterisk, Condition, Expr, Order, Query, SelectStatement, SimpleExpr, SqliteQueryBuilder,
    Values,
};
use serde::{Deserialize, Serialize};
use sqlx::{
    Row, Sqlite, SqlitePool, Transaction,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
};
use tracing::{debug, instrument};

use crudlayer_core::{
    backend::{Selection, StoreBackend, StoreBackendBuilder, reject_update_operators},
    error::{AdapterError, AdapterResult, ErrorClassifier},
    query::{Predicate, SortDirection},
    record::{DEFAULT_ID_FIELD, Id, Record},
};

use crate::{
    compiler::SqlCompiler,
    error::SqliteErrorClassifier,
    value::{BoolEncoding, bind_values, decode_row, to_sql_value},
};

/// Where statements run.
#[derive(Clone)]
pub enum SqliteHandle {
    /// Each statement checks a connection out of the pool.
    Pool(SqlitePool),
    /// Statements run inside an open transaction, one at a time.
    Transaction(Arc<Mutex<Transaction<'static, Sqlite>>>),
}

impl SqliteHandle {
    /// Wraps an open transaction so it can be passed as a per-call handle.
    pub fn transaction(transaction: Transaction<'static, Sqlite>) -> Self {
        SqliteHandle::Transaction(Arc::new(Mutex::new(transaction)))
    }
}

impl fmt::Debug for SqliteHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqliteHandle::Pool(pool) => f.debug_tuple("Pool").field(pool).finish(),
            SqliteHandle::Transaction(_) => f.write_str("Transaction"),
        }
    }
}

impl From<SqlitePool> for SqliteHandle {
    fn from(pool: SqlitePool) -> Self {
        SqliteHandle::Pool(pool)
    }
}

/// Configuration for [`SqliteStore`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SqlOptions {
    /// Table holding the records.
    pub table: String,
    /// Name of the identifier column.
    pub id_field: String,
    /// How boolean operands and values are bound.
    pub bool_encoding: BoolEncoding,
}

impl Default for SqlOptions {
    fn default() -> Self {
        Self {
            table: String::new(),
            id_field: DEFAULT_ID_FIELD.to_string(),
            bool_encoding: BoolEncoding::Integer,
        }
    }
}

/// A table in a SQLite database.
///
/// The native query type is a sea-query [`SelectStatement`]: a caller may hand
/// one in (with joins, extra columns, ...) and the store adds the compiled
/// predicate, ordering and window to it.
///
/// # Example
///
/// ```ignore
/// use crudlayer_sql::SqliteStore;
/// use crudlayer_core::backend::StoreBackendBuilder;
///
/// let store = SqliteStore::builder()
///     .url("sqlite::memory:")
///     .table("people")
///     .build()
///     .await?;
/// ```
#[derive(Debug, Clone)]
pub struct SqliteStore {
    handle: SqliteHandle,
    options: SqlOptions,
}

impl SqliteStore {
    /// Creates a store over an existing pool.
    pub fn new(pool: SqlitePool, options: SqlOptions) -> Self {
        Self {
            handle: SqliteHandle::Pool(pool),
            options,
        }
    }

    pub fn builder() -> SqliteStoreBuilder {
        SqliteStoreBuilder::default()
    }

    pub fn options(&self) -> &SqlOptions {
        &self.options
    }

    /// Opens a transaction on the store's pool.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::BadRequest`] if the default handle is itself a
    /// transaction, or the translated driver error.
    pub async fn begin(&self) -> AdapterResult<SqliteHandle> {
        match &self.handle {
            SqliteHandle::Pool(pool) => Ok(SqliteHandle::transaction(
                pool.begin().await.map_err(SqliteErrorClassifier::translate)?,
            )),
            SqliteHandle::Transaction(_) => Err(AdapterError::BadRequest(
                "cannot nest transactions".to_string(),
            )),
        }
    }

    /// Commits a transaction handle obtained from [`begin`](Self::begin).
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::BadRequest`] if the handle is not a transaction or
    /// is still shared, or the translated driver error.
    pub async fn commit(&self, handle: SqliteHandle) -> AdapterResult<()> {
        let SqliteHandle::Transaction(shared) = handle else {
            return Err(AdapterError::BadRequest("handle is not a transaction".to_string()));
        };

        let transaction = Arc::try_unwrap(shared)
            .map_err(|_| AdapterError::BadRequest("transaction handle is still in use".to_string()))?
            .into_inner();

        transaction.commit().await.map_err(SqliteErrorClassifier::translate)
    }

    fn compiler(&self) -> SqlCompiler {
        SqlCompiler::new(&self.options.table, self.options.bool_encoding)
    }

    fn table(&self) -> Alias {
        Alias::new(&self.options.table)
    }

    fn id_column(&self) -> Expr {
        Expr::col((self.table(), Alias::new(&self.options.id_field)))
    }

    fn ids_condition(&self, ids: &[Id]) -> AdapterResult<SimpleExpr> {
        let values = ids
            .iter()
            .map(|id| Ok(SimpleExpr::Value(to_sql_value(id, self.options.bool_encoding)?)))
            .collect::<AdapterResult<Vec<_>>>()?;

        Ok(self.id_column().is_in(values))
    }

    fn assignments(&self, record: &Record) -> AdapterResult<Vec<(Alias, SimpleExpr)>> {
        record
            .iter()
            .map(|(key, value)| {
                Ok((
                    Alias::new(key),
                    SimpleExpr::Value(to_sql_value(value, self.options.bool_encoding)?),
                ))
            })
            .collect()
    }

    fn where_condition(&self, predicate: &Predicate) -> AdapterResult<Condition> {
        self.compiler().compile(predicate)
    }

    async fn fetch_all(&self, handle: &SqliteHandle, (sql, values): (String, Values)) -> AdapterResult<Vec<SqliteRow>> {
        debug!(%sql, "fetching rows");

        let query = bind_values(sqlx::query(&sql), values)?;
        let result = match handle {
            SqliteHandle::Pool(pool) => query.fetch_all(pool).await,
            SqliteHandle::Transaction(transaction) => {
                let mut guard = transaction.lock().await;
                query.fetch_all(&mut **guard).await
            }
        };

        result.map_err(SqliteErrorClassifier::translate)
    }

    async fn execute(&self, handle: &SqliteHandle, (sql, values): (String, Values)) -> AdapterResult<u64> {
        debug!(%sql, "executing statement");

        let query = bind_values(sqlx::query(&sql), values)?;
        let result = match handle {
            SqliteHandle::Pool(pool) => query.execute(pool).await,
            SqliteHandle::Transaction(transaction) => {
                let mut guard = transaction.lock().await;
                query.execute(&mut **guard).await
            }
        };

        result
            .map(|done| done.rows_affected())
            .map_err(SqliteErrorClassifier::translate)
    }

    /// The statement for a selection, built fresh or on top of the caller's.
    fn select_statement(&self, selection: &Selection<SelectStatement>) -> AdapterResult<SelectStatement> {
        let directives = &selection.directives;
        let mut statement = match &selection.native {
            Some(native) => native.clone(),
            None => {
                let mut statement = Query::select();
                statement.from(self.table());

                match &directives.select {
                    Some(fields) => {
                        statement.column((self.table(), Alias::new(&self.options.id_field)));
                        for field in fields.iter().filter(|field| **field != self.options.id_field) {
                            statement.column((self.table(), Alias::new(field)));
                        }
                    }
                    None => {
                        statement.column((self.table(), Asterisk));
                    }
                }

                statement
            }
        };

        statement.cond_where(self.where_condition(&selection.predicate)?);

        for sort in directives.sort_keys() {
            let order = match sort.direction {
                SortDirection::Asc => Order::Asc,
                SortDirection::Desc => Order::Desc,
            };
            statement.order_by_expr(self.compiler().column(&sort.field).into(), order);
        }

        match (directives.limit, directives.skip) {
            (Some(limit), skip) => {
                statement.limit(limit);
                if let Some(skip) = skip {
                    statement.offset(skip);
                }
            }
            // SQLite only accepts OFFSET after a LIMIT.
            (None, Some(skip)) => {
                statement.limit(i64::MAX as u64).offset(skip);
            }
            (None, None) => {}
        }

        Ok(statement)
    }
}

#[async_trait]
impl StoreBackend for SqliteStore {
    type Handle = SqliteHandle;
    type Native = SelectStatement;

    fn handle(&self) -> &Self::Handle {
        &self.handle
    }

    fn id_field(&self) -> &str {
        &self.options.id_field
    }

    #[instrument(skip_all, fields(table = %self.options.table))]
    async fn select(&self, handle: &Self::Handle, selection: Selection<Self::Native>) -> AdapterResult<Vec<Record>> {
        let statement = self.select_statement(&selection)?;
        let rows = self
            .fetch_all(handle, statement.build(SqliteQueryBuilder))
            .await?;

        rows.iter().map(decode_row).collect()
    }

    #[instrument(skip_all, fields(table = %self.options.table))]
    async fn count(&self, handle: &Self::Handle, predicate: &Predicate, native: Option<&Self::Native>) -> AdapterResult<u64> {
        let mut matched = match native {
            Some(native) => native.clone(),
            None => Query::select()
                .column((self.table(), Alias::new(&self.options.id_field)))
                .from(self.table())
                .to_owned(),
        };
        matched.cond_where(self.where_condition(predicate)?);

        let statement = Query::select()
            .expr_as(Expr::cust("COUNT(*)"), Alias::new("total"))
            .from_subquery(matched, Alias::new("matched"))
            .to_owned();

        let rows = self
            .fetch_all(handle, statement.build(SqliteQueryBuilder))
            .await?;
        let total = match rows.first() {
            Some(row) => row
                .try_get::<i64, _>("total")
                .map_err(SqliteErrorClassifier::translate)?,
            None => 0,
        };

        Ok(u64::try_from(total).unwrap_or(0))
    }

    #[instrument(skip_all, fields(table = %self.options.table))]
    async fn insert(&self, handle: &Self::Handle, record: Record) -> AdapterResult<Id> {
        reject_update_operators(&record)?;

        let mut statement = Query::insert();
        statement
            .into_table(self.table())
            .returning_col(Alias::new(&self.options.id_field));

        if record.is_empty() {
            statement.or_default_values();
        } else {
            let (columns, values): (Vec<_>, Vec<_>) = self.assignments(&record)?.into_iter().unzip();

            statement.columns(columns);
            statement
                .values(values)
                .map_err(|e| AdapterError::BadRequest(e.to_string()))?;
        }

        let rows = self
            .fetch_all(handle, statement.build(SqliteQueryBuilder))
            .await?;
        let returned = rows
            .first()
            .map(decode_row)
            .transpose()?
            .and_then(|row| row.get(&self.options.id_field).cloned());

        returned.ok_or_else(|| AdapterError::NotFound("insert returned no identifier".to_string()))
    }

    #[instrument(skip_all, fields(table = %self.options.table, count = ids.len()))]
    async fn patch_ids(&self, handle: &Self::Handle, ids: &[Id], data: &Record) -> AdapterResult<()> {
        reject_update_operators(data)?;

        let statement = Query::update()
            .table(self.table())
            .values(self.assignments(data)?)
            .and_where(self.ids_condition(ids)?)
            .to_owned();

        self.execute(handle, statement.build(SqliteQueryBuilder)).await?;

        Ok(())
    }

    #[instrument(skip_all, fields(table = %self.options.table))]
    async fn replace(&self, handle: &Self::Handle, id: &Id, mut record: Record) -> AdapterResult<()> {
        record.remove(&self.options.id_field);

        if record.is_empty() {
            return Ok(());
        }

        let statement = Query::update()
            .table(self.table())
            .values(self.assignments(&record)?)
            .and_where(self.ids_condition(std::slice::from_ref(id))?)
            .to_owned();

        match self.execute(handle, statement.build(SqliteQueryBuilder)).await? {
            0 => Err(AdapterError::NotFound(format!("No record found for id {id}"))),
            _ => Ok(()),
        }
    }

    #[instrument(skip_all, fields(table = %self.options.table, count = ids.len()))]
    async fn delete_ids(&self, handle: &Self::Handle, ids: &[Id]) -> AdapterResult<()> {
        let statement = Query::delete()
            .from_table(self.table())
            .and_where(self.ids_condition(ids)?)
            .to_owned();

        self.execute(handle, statement.build(SqliteQueryBuilder)).await?;

        Ok(())
    }
}

/// Connection options for `url` with the `regexp` function registered.
///
/// `$ilike`, `$notilike` and `$search` compile to `REGEXP`, which SQLite does
/// not provide on its own. Pools handed to [`SqliteStoreBuilder::pool`] must be
/// connected with these options (or call `with_regexp` themselves).
///
/// # Errors
///
/// Returns [`AdapterError::Initialization`] if `url` cannot be parsed.
pub fn connect_options(url: &str) -> AdapterResult<SqliteConnectOptions> {
    SqliteConnectOptions::from_str(url)
        .map(SqliteConnectOptions::with_regexp)
        .map_err(|e| AdapterError::Initialization(e.to_string()))
}

/// Builder for constructing [`SqliteStore`] instances.
///
/// Either hand it a pool or a connection URL; with a URL, `build` opens the pool.
#[derive(Debug, Default)]
pub struct SqliteStoreBuilder {
    url: Option<String>,
    pool: Option<SqlitePool>,
    max_connections: Option<u32>,
    options: SqlOptions,
}

impl SqliteStoreBuilder {
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn pool(mut self, pool: SqlitePool) -> Self {
        self.pool = Some(pool);
        self
    }

    pub fn max_connections(mut self, max_connections: u32) -> Self {
        self.max_connections = Some(max_connections);
        self
    }

    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.options.table = table.into();
        self
    }

    pub fn id_field(mut self, id_field: impl Into<String>) -> Self {
        self.options.id_field = id_field.into();
        self
    }

    pub fn bool_encoding(mut self, bool_encoding: BoolEncoding) -> Self {
        self.options.bool_encoding = bool_encoding;
        self
    }

    pub fn options(mut self, options: SqlOptions) -> Self {
        self.options = options;
        self
    }
}

#[async_trait]
impl StoreBackendBuilder for SqliteStoreBuilder {
    type Backend = SqliteStore;

    async fn build(self) -> AdapterResult<Self::Backend> {
        if self.options.table.is_empty() {
            return Err(AdapterError::Initialization("a table name is required".to_string()));
        }

        let pool = match (self.pool, self.url) {
            (Some(pool), _) => pool,
            (None, Some(url)) => SqlitePoolOptions::new()
                .max_connections(self.max_connections.unwrap_or(5))
                .connect_with(connect_options(&url)?)
                .await
                .map_err(|e| AdapterError::Initialization(e.to_string()))?,
            (None, None) => {
                return Err(AdapterError::Initialization(
                    "either a pool or a connection url is required".to_string(),
                ));
            }
        };

        Ok(SqliteStore::new(pool, self.options))
    }
}
