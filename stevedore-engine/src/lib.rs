//! Client-side bulk execution engine for a partitioned document store.
//!
//! Callers submit single item operations through [`BulkExecutor::add`] and
//! get back a future per operation. Behind that contract the engine:
//!
//! - resolves each operation's partition range through the metadata
//!   collaborator,
//! - accumulates operations per range in a [`Streamer`] until a count or
//!   byte limit is hit or a dispatch deadline fires,
//! - dispatches sealed batches with per-range concurrency bounded by a
//!   permit limiter whose budget is shaped by an AIMD congestion
//!   controller,
//! - retries individual operations on throttling and stale-routing errors,
//!   re-homing them through routing on every attempt.
//!
//! ```text
//! caller ─▶ BulkExecutor::add ─▶ routing ─▶ Streamer ─▶ sealed batch
//!                                              ▲             │
//!                                              │       permit + dispatch
//!                                         rebatch ◀── per-op retry ◀── BatchResponse
//! ```
//!
//! Batch boundaries are never exposed to callers; ordering is guaranteed
//! only among operations admitted to the same range.
//!
//! [`Streamer`]: streamer::Streamer

#![warn(missing_docs)]

pub mod buffer;
pub mod cancel;
pub mod codec;
pub mod config;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod executor;
pub mod retry;
pub mod routing;
pub mod streamer;
pub mod timer;
pub mod transport;

pub use cancel::{CancelSource, CancelToken};
pub use config::{ExecutorConfig, RetryConfig};
pub use error::{EngineError, EngineResult};
pub use executor::{BulkExecutor, ExecutorStatsSnapshot, OperationHandle};
pub use routing::{KeyRange, MetadataProvider, PartitionKeyDefinition, RoutingMap};
pub use transport::{BatchRequest, BatchTransport, ResponseMessage, TransportError};
