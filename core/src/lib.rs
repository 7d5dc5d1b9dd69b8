//! sentinel-core: expense anomaly detection and review.
//!
//! Pure detection lives in `detection`/`scoring`; everything that touches
//! SQLite goes through `store`. `engine::SentinelEngine` ties them together.

pub mod alert;
pub mod audit;
pub mod clock;
pub mod config;
pub mod detection;
pub mod engine;
pub mod error;
pub mod expense;
pub mod finding;
pub mod review;
pub mod scoring;
pub mod store;
pub mod tenant_lock;
pub mod types;

pub use engine::{ScanReport, SentinelEngine};
pub use error::{SentinelError, SentinelResult};
