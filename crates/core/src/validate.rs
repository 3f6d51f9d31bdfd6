use std::fmt;

use serde::Deserialize;
use thiserror::Error;

use crate::types::{Operation, UserOperations};

/// Operation entry as it arrives from a request body or the store, before
/// any field has been checked.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RawOperation {
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

impl RawOperation {
    /// Converts the raw entry into an [`Operation`], rejecting missing or blank fields.
    ///
    /// `index` is the position of the entry inside its list and is only used
    /// for error reporting.
    pub fn validate(self, index: usize) -> Result<Operation, ValidationError> {
        let icon = required(self.icon, index, OperationField::Icon)?;
        let title = required(self.title, index, OperationField::Title)?;
        let url = required(self.url, index, OperationField::Url)?;
        Ok(Operation { icon, title, url })
    }
}

impl From<Operation> for RawOperation {
    fn from(operation: Operation) -> Self {
        Self {
            icon: Some(operation.icon),
            title: Some(operation.title),
            url: Some(operation.url),
        }
    }
}

/// Write payload with the `{ user_id, operations }` document shape.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RawUserOperations {
    #[serde(default)]
    pub user_id: Option<i64>,
    #[serde(default)]
    pub operations: Vec<RawOperation>,
}

impl RawUserOperations {
    pub fn validate(self) -> Result<UserOperations, ValidationError> {
        let user_id = validate_user_id(self.user_id.unwrap_or_default())?;
        let operations = validate_operations(self.operations)?;
        Ok(UserOperations {
            user_id,
            operations,
        })
    }
}

/// Checks a user identifier supplied by a caller.
///
/// Zero is treated as absent, matching how the write endpoint has always
/// interpreted an omitted `user_id`.
pub fn validate_user_id(user_id: i64) -> Result<i64, ValidationError> {
    match user_id {
        0 => Err(ValidationError::RequiredUserId),
        id if id < 0 => Err(ValidationError::InvalidUserId(id)),
        id => Ok(id),
    }
}

/// Validates every entry of `raw`, keeping the original order.
pub fn validate_operations(raw: Vec<RawOperation>) -> Result<Vec<Operation>, ValidationError> {
    raw.into_iter()
        .enumerate()
        .map(|(index, entry)| entry.validate(index))
        .collect()
}

fn required(
    value: Option<String>,
    index: usize,
    field: OperationField,
) -> Result<String, ValidationError> {
    match value {
        Some(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(ValidationError::MissingField { index, field }),
    }
}

/// Names the fields of an [`Operation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationField {
    Icon,
    Title,
    Url,
}

impl OperationField {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Icon => "icon",
            Self::Title => "title",
            Self::Url => "url",
        }
    }
}

impl fmt::Display for OperationField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised while converting raw input into checked records.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("required parameter is missing: User ID")]
    RequiredUserId,
    #[error("user id must be positive (got {0})")]
    InvalidUserId(i64),
    #[error("operation #{index} is missing required field `{field}`")]
    MissingField { index: usize, field: OperationField },
}
