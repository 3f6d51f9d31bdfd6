use serde::{Deserialize, Serialize};

/// A single quick-action shortcut rendered by the front-end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    pub icon: String,
    pub title: String,
    pub url: String,
}

impl Operation {
    /// Builds an operation from already trusted values.
    ///
    /// Input coming from a request body or from the store must go through
    /// [`crate::validate::RawOperation::validate`] instead.
    pub fn new(icon: impl Into<String>, title: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            icon: icon.into(),
            title: title.into(),
            url: url.into(),
        }
    }
}

/// Ordered set of shortcuts owned by one user.
///
/// The order of `operations` is the display order and is preserved verbatim
/// by every layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserOperations {
    pub user_id: i64,
    pub operations: Vec<Operation>,
}

impl UserOperations {
    pub fn new(user_id: i64, operations: Vec<Operation>) -> Self {
        Self {
            user_id,
            operations,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}
