pub mod seed;

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::{migrate::MigrateError, sqlite::SqlitePoolOptions, SqlitePool};
use thiserror::Error;
use uuid::Uuid;

use quick_ops_core::types::{Operation, UserOperations};
use quick_ops_core::validate::{validate_operations, RawOperation};

pub use seed::{bootstrap, SeedError, SeedReport};

/// Top-level database handle that owns the SQLite connection pool.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Establishes a new SQLite connection pool for the provided connection string.
    pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .map_err(StorageError::Connect)?;

        apply_pragmas(&pool).await?;

        Ok(Self { pool })
    }

    /// Applies migrations located under `migrations/`.
    pub async fn run_migrations(&self) -> Result<(), StorageError> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(StorageError::Migration)?;
        Ok(())
    }

    /// Returns a handle to the `operations` collection.
    pub fn operations(&self) -> OperationsRepository {
        OperationsRepository {
            pool: self.pool.clone(),
        }
    }

    /// Exposes the inner pool when lower level access is required.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Closes every pooled connection. Repositories created from this handle
    /// report connectivity errors afterwards.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

async fn apply_pragmas(pool: &SqlitePool) -> Result<(), StorageError> {
    sqlx::query("PRAGMA journal_mode = WAL;")
        .fetch_one(pool)
        .await
        .map_err(StorageError::Pragma)?;

    sqlx::query("PRAGMA synchronous = NORMAL;")
        .execute(pool)
        .await
        .map_err(StorageError::Pragma)?;

    sqlx::query("PRAGMA busy_timeout = 5000;")
        .execute(pool)
        .await
        .map_err(StorageError::Pragma)?;

    Ok(())
}

/// General storage level errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to connect to sqlite: {0}")]
    Connect(sqlx::Error),
    #[error("failed to apply pragma: {0}")]
    Pragma(sqlx::Error),
    #[error("failed to run database migrations: {0}")]
    Migration(MigrateError),
}

/// Repository for the per-user operations documents.
#[derive(Clone)]
pub struct OperationsRepository {
    pool: SqlitePool,
}

impl OperationsRepository {
    /// Loads the document owned by `user_id`.
    ///
    /// Returns `Ok(None)` when the user has no document. A stored document
    /// that cannot be decoded into checked operations is reported as
    /// [`OperationsError::DataIntegrity`] instead of being patched up.
    pub async fn fetch(&self, user_id: i64) -> Result<Option<OperationsDocument>, OperationsError> {
        let row = sqlx::query_as::<_, OperationsRow>(
            "SELECT id, user_id, operations_json, created_at, updated_at \
             FROM operations WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|err| OperationsError::from_sqlx(user_id, err))?;

        row.map(OperationsRow::into_document).transpose()
    }

    /// Returns the ordered operations for `user_id`, or an empty list when the
    /// user has no document.
    pub async fn operations_for(&self, user_id: i64) -> Result<Vec<Operation>, OperationsError> {
        Ok(self
            .fetch(user_id)
            .await?
            .map(|document| document.operations)
            .unwrap_or_default())
    }

    /// Replaces the operations list of `document.user_id`, creating the
    /// document when it does not exist yet. The document id survives updates.
    pub async fn upsert(
        &self,
        document: &UserOperations,
        now: DateTime<Utc>,
    ) -> Result<(OperationsDocument, UpsertOutcome), OperationsError> {
        let user_id = document.user_id;
        let operations_json = serde_json::to_string(&document.operations)?;
        let candidate_id = Uuid::new_v4().to_string();
        let timestamp = to_rfc3339(now);

        let (id, created_at, updated_at): (String, DateTime<Utc>, DateTime<Utc>) = sqlx::query_as(
            "INSERT INTO operations (id, user_id, operations_json, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?) \
             ON CONFLICT(user_id) DO UPDATE \
             SET operations_json = excluded.operations_json, updated_at = excluded.updated_at \
             RETURNING id, created_at, updated_at",
        )
        .bind(&candidate_id)
        .bind(user_id)
        .bind(&operations_json)
        .bind(&timestamp)
        .bind(&timestamp)
        .fetch_one(&self.pool)
        .await
        .map_err(|err| OperationsError::from_sqlx(user_id, err))?;

        let outcome = if id == candidate_id {
            UpsertOutcome::Inserted
        } else {
            UpsertOutcome::Updated
        };

        Ok((
            OperationsDocument {
                id,
                user_id,
                operations: document.operations.clone(),
                created_at,
                updated_at,
            },
            outcome,
        ))
    }

    /// Counts stored documents.
    pub async fn count(&self) -> Result<u64, OperationsError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM operations")
            .fetch_one(&self.pool)
            .await
            .map_err(|err| OperationsError::from_sqlx(0, err))?;
        Ok(count as u64)
    }
}

/// Stored operations document together with its store metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationsDocument {
    pub id: String,
    pub user_id: i64,
    pub operations: Vec<Operation>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Result of [`OperationsRepository::upsert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

impl UpsertOutcome {
    /// Label used for metrics and logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Inserted => "inserted",
            Self::Updated => "updated",
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct OperationsRow {
    id: String,
    user_id: i64,
    operations_json: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl OperationsRow {
    fn into_document(self) -> Result<OperationsDocument, OperationsError> {
        let user_id = self.user_id;
        let raw: Vec<RawOperation> = serde_json::from_str(&self.operations_json).map_err(|err| {
            OperationsError::DataIntegrity {
                user_id,
                reason: format!("operations payload is not a list of operations: {err}"),
            }
        })?;
        let operations =
            validate_operations(raw).map_err(|err| OperationsError::DataIntegrity {
                user_id,
                reason: err.to_string(),
            })?;

        Ok(OperationsDocument {
            id: self.id,
            user_id,
            operations,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// Errors raised by the operations repository.
#[derive(Debug, Error)]
pub enum OperationsError {
    #[error("operations store is unreachable: {0}")]
    Connectivity(sqlx::Error),
    #[error("stored operations for user {user_id} are malformed: {reason}")]
    DataIntegrity { user_id: i64, reason: String },
    #[error("failed to encode operations: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("database error: {0}")]
    Store(sqlx::Error),
}

impl OperationsError {
    fn from_sqlx(user_id: i64, err: sqlx::Error) -> Self {
        if matches!(
            err,
            sqlx::Error::Io(_)
                | sqlx::Error::Tls(_)
                | sqlx::Error::Protocol(_)
                | sqlx::Error::PoolTimedOut
                | sqlx::Error::PoolClosed
                | sqlx::Error::WorkerCrashed
        ) {
            return Self::Connectivity(err);
        }

        if matches!(err, sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_)) {
            return Self::DataIntegrity {
                user_id,
                reason: err.to_string(),
            };
        }

        Self::Store(err)
    }

    /// Returns `true` when the store could not be reached at all.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, Self::Connectivity(_))
    }

    /// Returns `true` when a stored document failed validation on the way out.
    pub fn is_data_integrity(&self) -> bool {
        matches!(self, Self::DataIntegrity { .. })
    }
}

fn to_rfc3339(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}
