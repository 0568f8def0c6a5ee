//! Analytics report fetching
//!
//! Issues `runReport` calls with a credential from `analytics_auth`, paced by
//! a sliding-window `RateLimiter`, and normalizes the string-typed response
//! into ordered, typed `ReportRow`s with derived columns.

pub mod classify;
pub mod client;
pub mod error;
pub mod limiter;
pub mod normalize;
pub mod request;

pub use classify::{UpstreamClass, classify_status};
pub use client::{DEFAULT_API_BASE, ReportClient};
pub use error::{Error, Result};
pub use limiter::RateLimiter;
pub use normalize::{DerivedColumn, MetricKind, Normalizer, RawRow, ReportRow, Value};
pub use request::{DateRange, ReportRequest};
