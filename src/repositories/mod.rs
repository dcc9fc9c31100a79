// src/repositories/mod.rs
//! Report storage behind a trait so the workflow does not depend on SQLite.

use async_trait::async_trait;

use crate::error::ApiResult;
use crate::handlers::PaginatedResponse;
use crate::models::{Decision, LabReport, NewLabReport, ProductParameter, ReportQuery, StatusCounts};

pub mod lab_reports;

pub use lab_reports::SqliteReportStore;

/// The authority over stored lab reports.
///
/// `decide` is a compare-and-set on the pending status: of any number of
/// concurrent decisions on one report, exactly one succeeds and the others
/// get a conflict.
#[async_trait]
pub trait ReportStore: Send + Sync {
    /// Parameters defined for a product, `None` when the product does not exist.
    async fn product_parameters(&self, product_id: &str) -> ApiResult<Option<Vec<ProductParameter>>>;

    /// Inserts the report and all of its values, or nothing.
    async fn create(&self, report: NewLabReport) -> ApiResult<LabReport>;

    async fn find(&self, id: &str) -> ApiResult<Option<LabReport>>;

    async fn list(&self, query: &ReportQuery) -> ApiResult<PaginatedResponse<LabReport>>;

    /// Moves a pending report to the decided status and stamps the approver.
    async fn decide(&self, id: &str, decision: Decision, approver_id: &str) -> ApiResult<LabReport>;

    async fn status_counts(&self) -> ApiResult<StatusCounts>;
}
