//! Bootstrap step that writes the fixed operations documents.

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, info};

use quick_ops_core::seed::seed_documents;

use crate::{Database, OperationsError, UpsertOutcome};

/// Number of seed documents created or refreshed by [`bootstrap`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeedReport {
    pub inserted: usize,
    pub updated: usize,
}

impl SeedReport {
    pub fn total(&self) -> usize {
        self.inserted + self.updated
    }
}

/// Seeding failed for one of the fixed documents.
#[derive(Debug, Error)]
#[error("failed to seed operations for user {user_id}: {source}")]
pub struct SeedError {
    pub user_id: i64,
    #[source]
    pub source: OperationsError,
}

/// Writes the seed documents into `database`, upserting by `user_id`.
///
/// Running it again refreshes the same documents instead of adding new ones.
/// Must run after [`Database::run_migrations`].
pub async fn bootstrap(database: &Database, now: DateTime<Utc>) -> Result<SeedReport, SeedError> {
    let repo = database.operations();
    let mut report = SeedReport::default();

    for document in seed_documents() {
        let user_id = document.user_id;
        let (stored, outcome) = repo
            .upsert(&document, now)
            .await
            .map_err(|source| SeedError { user_id, source })?;

        debug!(
            stage = "seed",
            user_id,
            document_id = %stored.id,
            operations = stored.operations.len(),
            outcome = outcome.as_str(),
            "seed document written"
        );

        match outcome {
            UpsertOutcome::Inserted => report.inserted += 1,
            UpsertOutcome::Updated => report.updated += 1,
        }
    }

    info!(
        stage = "seed",
        inserted = report.inserted,
        updated = report.updated,
        "operations collection seeded"
    );
    Ok(report)
}
