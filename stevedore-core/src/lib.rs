//! Core types for the stevedore bulk execution engine.
//!
//! This crate holds the vocabulary shared by the flow-control and engine
//! crates: strongly-typed identifiers, the item operation model, server
//! result types, system limits, and the core error type. It has no async
//! dependencies and no I/O.

#![warn(missing_docs)]

pub mod error;
pub mod limits;
pub mod operation;
pub mod response;
pub mod types;

pub use error::{Error, Result};
pub use operation::{
    ConsistencyLevel, ItemOperation, ItemOptions, JsonSerializer, OperationKind, PartitionKey,
    PayloadSerializer,
};
pub use response::{BatchResponse, OperationResult, StatusCode, SubStatus};
pub use types::{BatchId, RangeId};
