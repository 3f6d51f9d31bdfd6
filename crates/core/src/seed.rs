//! Documents written into the `operations` collection at bootstrap.

use crate::types::{Operation, UserOperations};

/// Returns the fixed documents, in insertion order.
pub fn seed_documents() -> Vec<UserOperations> {
    vec![
        UserOperations::new(
            1,
            vec![
                Operation::new("https://img-1", "Организациям", "https://url-1"),
                Operation::new("https://img-2", "Интернет", "https://url-2"),
                Operation::new("https://img-3", "Запрос денег", "https://url-3"),
            ],
        ),
        UserOperations::new(
            2,
            vec![Operation::new(
                "https://img-1",
                "Организациям",
                "https://url-1",
            )],
        ),
    ]
}
