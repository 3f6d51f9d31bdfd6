//! Domain layer for the quick operations service.
//!
//! Hosts the checked record types shared by the storage layer and the HTTP
//! application, the boundary validation that produces them, and the fixed
//! documents written by the bootstrap step.

pub mod seed;
pub mod types;
pub mod validate;

pub use types::{Operation, UserOperations};
pub use validate::{OperationField, RawOperation, RawUserOperations, ValidationError};
