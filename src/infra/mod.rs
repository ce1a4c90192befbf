//! Backend access.

pub mod api;

pub use api::{ApiError, CacheStatus, CachedPayload, CostRecord, ErpClient, Page, ServerTotals};
