// src/models/lab_report.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use strum::{AsRefStr, Display, EnumString};

use crate::error::ApiError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, EnumString, Display, AsRefStr)]
#[sqlx(type_name = "TEXT", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum ReportStatus {
    Pending,
    Approved,
    Rejected,
}

/// The outcome a supervisor or manager records on a pending report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Decision {
    Approved,
    Rejected,
}

impl Decision {
    pub fn into_status(self) -> ReportStatus {
        match self {
            Decision::Approved => ReportStatus::Approved,
            Decision::Rejected => ReportStatus::Rejected,
        }
    }
}

impl TryFrom<ReportStatus> for Decision {
    type Error = ApiError;

    fn try_from(status: ReportStatus) -> Result<Self, Self::Error> {
        match status {
            ReportStatus::Approved => Ok(Decision::Approved),
            ReportStatus::Rejected => Ok(Decision::Rejected),
            ReportStatus::Pending => Err(ApiError::field(
                "status",
                "A decision must be either approved or rejected",
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ReportValue {
    pub parameter_id: String,
    pub parameter_name: String,
    pub value: String,
    pub unit: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LabReport {
    pub id: String,
    pub product_id: String,
    pub product_name: String,
    pub batch_no: String,
    pub submitted_by: String,
    pub submitted_by_username: String,
    pub submitted_at: DateTime<Utc>,
    pub status: ReportStatus,
    pub approved_by: Option<String>,
    pub approved_by_username: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
    pub parameter_values: Vec<ReportValue>,
}

/// One report row joined with its product and user names.
#[derive(Debug, sqlx::FromRow)]
pub struct LabReportRow {
    pub id: String,
    pub product_id: String,
    pub product_name: String,
    pub batch_no: String,
    pub submitted_by: String,
    pub submitted_by_username: String,
    pub submitted_at: DateTime<Utc>,
    pub status: ReportStatus,
    pub approved_by: Option<String>,
    pub approved_by_username: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
}

impl LabReportRow {
    pub fn with_values(self, parameter_values: Vec<ReportValue>) -> LabReport {
        LabReport {
            id: self.id,
            product_id: self.product_id,
            product_name: self.product_name,
            batch_no: self.batch_no,
            submitted_by: self.submitted_by,
            submitted_by_username: self.submitted_by_username,
            submitted_at: self.submitted_at,
            status: self.status,
            approved_by: self.approved_by,
            approved_by_username: self.approved_by_username,
            approved_at: self.approved_at,
            parameter_values,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct ReportValueRow {
    pub report_id: String,
    pub parameter_id: String,
    pub parameter_name: String,
    pub value: String,
    pub unit: Option<String>,
}

impl From<ReportValueRow> for ReportValue {
    fn from(row: ReportValueRow) -> Self {
        ReportValue {
            parameter_id: row.parameter_id,
            parameter_name: row.parameter_name,
            value: row.value,
            unit: row.unit,
        }
    }
}

/// A submission that passed validation, ready to be stored.
#[derive(Debug, Clone, PartialEq)]
pub struct NewLabReport {
    pub product_id: String,
    pub batch_no: String,
    pub submitted_by: String,
    pub values: Vec<NewReportValue>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewReportValue {
    pub parameter_id: String,
    pub value: String,
    pub unit: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SubmittedValue {
    #[serde(alias = "parameter")]
    pub parameter_id: String,
    #[serde(deserialize_with = "value_as_string")]
    pub value: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SubmitReportRequest {
    #[serde(alias = "product")]
    pub product_id: String,
    #[serde(alias = "batchNo")]
    pub batch_no: String,
    #[serde(default, alias = "parameterValues")]
    pub parameter_values: Vec<SubmittedValue>,
}

#[derive(Debug, Deserialize)]
pub struct DecideReportRequest {
    pub status: ReportStatus,
}

#[derive(Debug, Deserialize, Default)]
pub struct ReportQuery {
    pub status: Option<ReportStatus>,
    #[serde(alias = "product")]
    pub product_id: Option<String>,
    pub submitted_by: Option<String>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

impl ReportQuery {
    pub fn normalize(&self) -> (i64, i64, i64) {
        let page = self.page.unwrap_or(1).max(1);
        let per_page = self.per_page.unwrap_or(20).clamp(1, 100);
        let offset = (page - 1).saturating_mul(per_page);
        (page, per_page, offset)
    }
}

#[derive(Debug, Default, Serialize, PartialEq, Eq)]
pub struct StatusCounts {
    pub pending: i64,
    pub approved: i64,
    pub rejected: i64,
    pub total: i64,
}

impl StatusCounts {
    pub fn add(&mut self, status: ReportStatus, count: i64) {
        match status {
            ReportStatus::Pending => self.pending += count,
            ReportStatus::Approved => self.approved += count,
            ReportStatus::Rejected => self.rejected += count,
        }
        self.total += count;
    }
}

// Front-ends send numbers and booleans as JSON scalars; they are stored as text.
fn value_as_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        serde_json::Value::Bool(b) => Ok(b.to_string()),
        serde_json::Value::Null => Ok(String::new()),
        other => Err(D::Error::custom(format!("unsupported parameter value: {}", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_status_parsing() {
        assert_eq!(ReportStatus::from_str("APPROVED").unwrap(), ReportStatus::Approved);
        assert_eq!(ReportStatus::Rejected.as_ref(), "rejected");
    }

    #[test]
    fn test_pending_is_not_a_decision() {
        assert_eq!(Decision::try_from(ReportStatus::Rejected).unwrap(), Decision::Rejected);
        let err = Decision::try_from(ReportStatus::Pending).unwrap_err();
        assert_eq!(err.invalid_fields(), vec!["status"]);
        assert_eq!(Decision::Approved.into_status(), ReportStatus::Approved);
    }

    #[test]
    fn test_submission_accepts_scalar_values_and_aliases() {
        let request: SubmitReportRequest = serde_json::from_value(serde_json::json!({
            "product": "p1",
            "batchNo": "B-1",
            "parameterValues": [
                {"parameter": "a", "value": 99.2},
                {"parameter_id": "b", "value": true},
                {"parameter_id": "c", "value": "A"},
                {"parameter_id": "d", "value": null}
            ]
        }))
        .unwrap();

        assert_eq!(request.product_id, "p1");
        let values: Vec<&str> = request.parameter_values.iter().map(|v| v.value.as_str()).collect();
        assert_eq!(values, vec!["99.2", "true", "A", ""]);
    }

    #[test]
    fn test_paging_is_clamped() {
        let defaults = ReportQuery::default();
        assert_eq!(defaults.normalize(), (1, 20, 0));

        let query = ReportQuery { page: Some(3), per_page: Some(500), ..Default::default() };
        assert_eq!(query.normalize(), (3, 100, 200));

        let query = ReportQuery { page: Some(i64::MAX), per_page: Some(100), ..Default::default() };
        assert_eq!(query.normalize(), (i64::MAX, 100, i64::MAX));
    }

    #[test]
    fn test_status_counts() {
        let mut counts = StatusCounts::default();
        counts.add(ReportStatus::Pending, 3);
        counts.add(ReportStatus::Approved, 2);
        assert_eq!(counts.total, 5);
        assert_eq!(counts.rejected, 0);
    }
}
