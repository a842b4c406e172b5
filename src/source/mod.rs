use crate::error::AppError;
use crate::models::ReportLookup;
use async_trait::async_trait;
use serde_json::Value;

pub mod http;

pub use http::HttpUsageSource;

/// Upstream store holding the current period's messages and report prices.
#[async_trait]
pub trait UsageSource: Send + Sync {
    /// Raw message objects for the current period. Individual items are
    /// decoded by the caller so one bad item does not fail the batch.
    async fn fetch_current_period_messages(&self) -> Result<Vec<Value>, AppError>;

    /// A missing or unusable report is a [`ReportLookup`] outcome, not an
    /// error; only transport failures are `Err`.
    async fn fetch_report_details(&self, report_id: i64) -> Result<ReportLookup, AppError>;
}
