use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use metrics::counter;
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, info};

use quick_ops_core::types::{Operation, UserOperations};
use quick_ops_core::validate::{
    validate_operations, validate_user_id, RawOperation, RawUserOperations,
};
use quick_ops_storage::{OperationsDocument, UpsertOutcome};

use crate::problem::ProblemResponse;
use crate::router::AppState;

/// Stored document as returned by the write endpoints.
#[derive(Debug, Serialize)]
pub struct DocumentResponse {
    pub id: String,
    pub user_id: i64,
    pub operations: Vec<Operation>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<OperationsDocument> for DocumentResponse {
    fn from(document: OperationsDocument) -> Self {
        Self {
            id: document.id,
            user_id: document.user_id,
            operations: document.operations,
            created_at: document.created_at,
            updated_at: document.updated_at,
        }
    }
}

/// `GET /users/:user_id/operations`
///
/// Unknown users get an empty list rather than a 404.
pub async fn list(
    State(state): State<AppState>,
    Path(raw_user_id): Path<String>,
) -> Result<Json<Vec<Operation>>, ProblemResponse> {
    let result = lookup(&state, &raw_user_id).await;
    record_request("list", &result);
    result.map(|operations| Json(operations.as_ref().clone()))
}

async fn lookup(state: &AppState, raw_user_id: &str) -> Result<Arc<Vec<Operation>>, ProblemResponse> {
    let user_id = parse_user_id(raw_user_id)?;
    let repository = state.storage().operations();

    let operations = state
        .cache()
        .get_or_load(user_id, || async move { repository.operations_for(user_id).await })
        .await?;
    debug!(stage = "api", user_id, operations = operations.len(), "operations listed");
    Ok(operations)
}

/// `PUT /users/:user_id/operations` with a JSON array body.
pub async fn replace(
    State(state): State<AppState>,
    Path(raw_user_id): Path<String>,
    body: Bytes,
) -> Result<(StatusCode, Json<DocumentResponse>), ProblemResponse> {
    let result = replace_document(&state, &raw_user_id, &body).await;
    record_request("replace", &result);
    result
}

async fn replace_document(
    state: &AppState,
    raw_user_id: &str,
    body: &[u8],
) -> Result<(StatusCode, Json<DocumentResponse>), ProblemResponse> {
    let user_id = validate_user_id(parse_user_id(raw_user_id)?)?;
    let raw: Vec<RawOperation> = decode_json(body)?;
    let operations = validate_operations(raw)?;
    store(state, UserOperations::new(user_id, operations)).await
}

/// `POST /operations` with a `{ "user_id": .., "operations": [..] }` body.
pub async fn create(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<(StatusCode, Json<DocumentResponse>), ProblemResponse> {
    let result = create_document(&state, &body).await;
    record_request("create", &result);
    result
}

async fn create_document(
    state: &AppState,
    body: &[u8],
) -> Result<(StatusCode, Json<DocumentResponse>), ProblemResponse> {
    let raw: RawUserOperations = decode_json(body)?;
    store(state, raw.validate()?).await
}

async fn store(
    state: &AppState,
    document: UserOperations,
) -> Result<(StatusCode, Json<DocumentResponse>), ProblemResponse> {
    let (stored, outcome) = state
        .storage()
        .operations()
        .upsert(&document, state.now())
        .await?;
    state.cache().invalidate(document.user_id).await;

    counter!("operations_upserts_total", "outcome" => outcome.as_str()).increment(1);
    info!(
        stage = "api",
        user_id = document.user_id,
        document_id = %stored.id,
        operations = stored.operations.len(),
        cleared = document.is_empty(),
        outcome = outcome.as_str(),
        "operations stored"
    );

    let status = match outcome {
        UpsertOutcome::Inserted => StatusCode::CREATED,
        UpsertOutcome::Updated => StatusCode::OK,
    };
    Ok((status, Json(stored.into())))
}

fn parse_user_id(raw: &str) -> Result<i64, ProblemResponse> {
    raw.trim().parse().map_err(|_| {
        ProblemResponse::new(
            StatusCode::BAD_REQUEST,
            "invalid_user_id",
            format!("user id must be an integer (got {raw})"),
        )
    })
}

fn decode_json<T: DeserializeOwned>(body: &[u8]) -> Result<T, ProblemResponse> {
    serde_json::from_slice(body).map_err(|err| {
        ProblemResponse::new(
            StatusCode::BAD_REQUEST,
            "invalid_json",
            format!("failed to parse payload: {err}"),
        )
    })
}

fn record_request<T>(route: &'static str, result: &Result<T, ProblemResponse>) {
    let result_label = match result {
        Ok(_) => "ok",
        Err(problem) => problem.problem_type(),
    };
    counter!("operations_requests_total", "route" => route, "result" => result_label).increment(1);
}
