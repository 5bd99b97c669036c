//! Market data providers.
//!
//! Defines the `MarketDataProvider` trait consumed by the strategy stage
//! and the HTTP quotes client used in production. All outbound calls go
//! through the token-bucket rate limiter.

pub mod quotes;

use anyhow::Result;
use async_trait::async_trait;

use crate::types::InstrumentSnapshot;

/// Abstraction over the snapshot feed.
///
/// Implementors fetch point-in-time snapshots for a symbol batch.
/// Symbols the provider cannot serve are simply absent from the result —
/// a partial batch is not an error.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    async fn fetch_snapshots(&self, symbols: &[String]) -> Result<Vec<InstrumentSnapshot>>;
}
