//! Per-range flow control for the stevedore bulk engine.
//!
//! Each partition range gets a counted [`PermitLimiter`] gating how many
//! batches may be in flight at once, a set of [`RangeMetrics`] counters fed
//! by the dispatcher, and a [`CongestionController`] background task that
//! adjusts the permit budget with AIMD:
//!
//! ```text
//! dispatcher ──records──▶ RangeMetrics ──observed by──▶ CongestionController
//!     ▲                                                        │
//!     └──────────── acquire/withhold/release ── PermitLimiter ◀┘
//! ```
//!
//! The controller's epoch tick is keyed on cumulative backend time rather
//! than wall clock, so it responds to actual work done against the range.
//! Decreases are applied by *acquiring* permits: in-flight dispatches are
//! never preempted; new dispatch concurrency drops as current work drains.

#![warn(missing_docs)]

pub mod aimd;
pub mod controller;
pub mod error;
pub mod limiter;
pub mod metrics;

pub use aimd::{Adjustment, AimdSnapshot, AimdState};
pub use controller::CongestionController;
pub use error::{FlowError, FlowResult};
pub use limiter::{DispatchPermit, PermitLimiter};
pub use metrics::RangeMetrics;
