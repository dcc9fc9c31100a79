// src/repositories/lab_reports.rs
use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use std::collections::HashMap;
use uuid::Uuid;

use super::ReportStore;
use crate::error::{ApiError, ApiResult};
use crate::handlers::PaginatedResponse;
use crate::models::{
    Decision, LabReport, LabReportRow, NewLabReport, Product, ProductParameter, ReportQuery,
    ReportStatus, ReportValue, ReportValueRow, StatusCounts,
};

const REPORT_SELECT: &str = r#"
    SELECT r.id, r.product_id, p.name AS product_name, r.batch_no,
           r.submitted_by, su.username AS submitted_by_username, r.submitted_at,
           r.status, r.approved_by, au.username AS approved_by_username, r.approved_at
    FROM lab_reports r
    JOIN products p ON p.id = r.product_id
    JOIN users su ON su.id = r.submitted_by
    LEFT JOIN users au ON au.id = r.approved_by"#;

pub struct SqliteReportStore {
    pool: SqlitePool,
}

impl SqliteReportStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn load_values(&self, report_ids: &[&str]) -> ApiResult<HashMap<String, Vec<ReportValue>>> {
        let mut grouped: HashMap<String, Vec<ReportValue>> = HashMap::new();
        if report_ids.is_empty() {
            return Ok(grouped);
        }

        let placeholders = vec!["?"; report_ids.len()].join(", ");
        let sql = format!(
            r#"SELECT v.report_id, v.parameter_id, pp.name AS parameter_name, v.value, v.unit
               FROM lab_report_values v
               JOIN product_parameters pp ON pp.id = v.parameter_id
               WHERE v.report_id IN ({})
               ORDER BY v.report_id, v.position"#,
            placeholders
        );

        let mut query = sqlx::query_as::<_, ReportValueRow>(&sql);
        for id in report_ids {
            query = query.bind(*id);
        }

        for row in query.fetch_all(&self.pool).await? {
            grouped.entry(row.report_id.clone()).or_default().push(row.into());
        }
        Ok(grouped)
    }

    async fn attach_values(&self, rows: Vec<LabReportRow>) -> ApiResult<Vec<LabReport>> {
        let ids: Vec<&str> = rows.iter().map(|r| r.id.as_str()).collect();
        let mut values = self.load_values(&ids).await?;
        Ok(rows
            .into_iter()
            .map(|row| {
                let report_values = values.remove(&row.id).unwrap_or_default();
                row.with_values(report_values)
            })
            .collect())
    }

    async fn current_status(&self, id: &str) -> ApiResult<Option<ReportStatus>> {
        let status = sqlx::query_scalar::<_, ReportStatus>("SELECT status FROM lab_reports WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(status)
    }
}

#[async_trait]
impl ReportStore for SqliteReportStore {
    async fn product_parameters(&self, product_id: &str) -> ApiResult<Option<Vec<ProductParameter>>> {
        if Product::find_by_id(&self.pool, product_id).await?.is_none() {
            return Ok(None);
        }
        ProductParameter::list_for_product(&self.pool, product_id).await.map(Some)
    }

    async fn create(&self, report: NewLabReport) -> ApiResult<LabReport> {
        let id = Uuid::new_v4().to_string();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"INSERT INTO lab_reports
               (id, product_id, batch_no, submitted_by, submitted_at, status, approved_by, approved_at)
               VALUES (?, ?, ?, ?, ?, ?, NULL, NULL)"#
        )
            .bind(&id)
            .bind(&report.product_id)
            .bind(&report.batch_no)
            .bind(&report.submitted_by)
            .bind(Utc::now())
            .bind(ReportStatus::Pending)
            .execute(&mut *tx)
            .await?;

        for (position, value) in report.values.iter().enumerate() {
            sqlx::query(
                r#"INSERT INTO lab_report_values (id, report_id, parameter_id, position, value, unit)
                   VALUES (?, ?, ?, ?, ?, ?)"#
            )
                .bind(Uuid::new_v4().to_string())
                .bind(&id)
                .bind(&value.parameter_id)
                .bind(position as i64)
                .bind(&value.value)
                .bind(&value.unit)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;

        self.find(&id)
            .await?
            .ok_or_else(|| ApiError::report_not_found(&id))
    }

    async fn find(&self, id: &str) -> ApiResult<Option<LabReport>> {
        let sql = format!("{} WHERE r.id = ?", REPORT_SELECT);
        let row = sqlx::query_as::<_, LabReportRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(self.attach_values(vec![row]).await?.pop()),
            None => Ok(None),
        }
    }

    async fn list(&self, query: &ReportQuery) -> ApiResult<PaginatedResponse<LabReport>> {
        let (page, per_page, offset) = query.normalize();

        let mut conditions: Vec<&str> = Vec::new();
        let mut params: Vec<String> = Vec::new();
        if let Some(status) = query.status {
            conditions.push("r.status = ?");
            params.push(status.as_ref().to_string());
        }
        if let Some(ref product_id) = query.product_id {
            conditions.push("r.product_id = ?");
            params.push(product_id.clone());
        }
        if let Some(ref submitted_by) = query.submitted_by {
            conditions.push("r.submitted_by = ?");
            params.push(submitted_by.clone());
        }
        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", conditions.join(" AND "))
        };

        let count_sql = format!("SELECT COUNT(*) FROM lab_reports r{}", where_clause);
        let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
        for param in &params {
            count_query = count_query.bind(param.as_str());
        }
        let total = count_query.fetch_one(&self.pool).await?;

        let select_sql = format!(
            "{}{} ORDER BY r.submitted_at DESC, r.rowid DESC LIMIT ? OFFSET ?",
            REPORT_SELECT, where_clause
        );
        let mut select_query = sqlx::query_as::<_, LabReportRow>(&select_sql);
        for param in &params {
            select_query = select_query.bind(param.as_str());
        }
        let rows = select_query
            .bind(per_page)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;

        let data = self.attach_values(rows).await?;
        let total_pages = (total as f64 / per_page as f64).ceil() as i64;

        Ok(PaginatedResponse {
            data,
            total,
            page,
            per_page,
            total_pages,
        })
    }

    async fn decide(&self, id: &str, decision: Decision, approver_id: &str) -> ApiResult<LabReport> {
        let result = sqlx::query(
            r#"UPDATE lab_reports
               SET status = ?, approved_by = ?, approved_at = ?
               WHERE id = ? AND status = ?"#
        )
            .bind(decision.into_status())
            .bind(approver_id)
            .bind(Utc::now())
            .bind(id)
            .bind(ReportStatus::Pending)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return match self.current_status(id).await? {
                Some(current) => Err(ApiError::report_already_decided(id, current.as_ref())),
                None => Err(ApiError::report_not_found(id)),
            };
        }

        self.find(id)
            .await?
            .ok_or_else(|| ApiError::report_not_found(id))
    }

    async fn status_counts(&self) -> ApiResult<StatusCounts> {
        let rows = sqlx::query_as::<_, (ReportStatus, i64)>(
            "SELECT status, COUNT(*) FROM lab_reports GROUP BY status"
        )
            .fetch_all(&self.pool)
            .await?;

        let mut counts = StatusCounts::default();
        for (status, count) in rows {
            counts.add(status, count);
        }
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::Role;
    use crate::auth::User;
    use crate::models::NewReportValue;
    use crate::test_support::{self, CatalogFixture};

    fn submission(fixture: &CatalogFixture, submitter: &User, batch_no: &str) -> NewLabReport {
        NewLabReport {
            product_id: fixture.product.id.clone(),
            batch_no: batch_no.to_string(),
            submitted_by: submitter.id.clone(),
            values: vec![
                NewReportValue {
                    parameter_id: fixture.purity.id.clone(),
                    value: "99.1".to_string(),
                    unit: Some("%".to_string()),
                },
                NewReportValue {
                    parameter_id: fixture.grade.id.clone(),
                    value: "A".to_string(),
                    unit: None,
                },
            ],
        }
    }

    async fn setup() -> (SqliteReportStore, CatalogFixture, User, User) {
        let pool = test_support::pool().await;
        let fixture = test_support::catalog(&pool).await;
        let assistant = test_support::user(&pool, "tech01", Role::LabAssistant).await;
        let supervisor = test_support::user(&pool, "sup01", Role::Supervisor).await;
        (SqliteReportStore::new(pool), fixture, assistant, supervisor)
    }

    #[tokio::test]
    async fn test_create_stores_pending_report_with_values() {
        let (store, fixture, assistant, _) = setup().await;

        let report = store.create(submission(&fixture, &assistant, "B-001")).await.unwrap();
        assert_eq!(report.status, ReportStatus::Pending);
        assert_eq!(report.submitted_by_username, "tech01");
        assert_eq!(report.product_name, "Urea");
        assert!(report.approved_by.is_none());
        assert!(report.approved_at.is_none());

        let names: Vec<&str> = report.parameter_values.iter().map(|v| v.parameter_name.as_str()).collect();
        assert_eq!(names, vec!["Purity", "Grade"]);
        assert_eq!(report.parameter_values[0].unit.as_deref(), Some("%"));
    }

    #[tokio::test]
    async fn test_create_is_all_or_nothing() {
        let (store, fixture, assistant, _) = setup().await;

        let mut bad = submission(&fixture, &assistant, "B-002");
        bad.values.push(NewReportValue {
            parameter_id: "no-such-parameter".to_string(),
            value: "x".to_string(),
            unit: None,
        });
        assert!(store.create(bad).await.is_err());
        assert_eq!(store.status_counts().await.unwrap().total, 0);
    }

    #[tokio::test]
    async fn test_supervisor_rejects_pending_report() {
        let (store, fixture, assistant, supervisor) = setup().await;
        let report = store.create(submission(&fixture, &assistant, "B-003")).await.unwrap();

        let decided = store.decide(&report.id, Decision::Rejected, &supervisor.id).await.unwrap();
        assert_eq!(decided.status, ReportStatus::Rejected);
        assert_eq!(decided.approved_by.as_deref(), Some(supervisor.id.as_str()));
        assert_eq!(decided.approved_by_username.as_deref(), Some("sup01"));
        assert!(decided.approved_at.is_some());
    }

    #[tokio::test]
    async fn test_decided_report_is_terminal() {
        let (store, fixture, assistant, supervisor) = setup().await;
        let report = store.create(submission(&fixture, &assistant, "B-004")).await.unwrap();
        store.decide(&report.id, Decision::Approved, &supervisor.id).await.unwrap();

        let err = store.decide(&report.id, Decision::Rejected, &supervisor.id).await.unwrap_err();
        assert!(err.is_conflict());

        let stored = store.find(&report.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ReportStatus::Approved);

        let missing = store.decide("missing", Decision::Approved, &supervisor.id).await.unwrap_err();
        assert!(matches!(missing, ApiError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_concurrent_decisions_have_one_winner() {
        let (store, fixture, assistant, supervisor) = setup().await;
        let report = store.create(submission(&fixture, &assistant, "B-005")).await.unwrap();

        let (first, second) = tokio::join!(
            store.decide(&report.id, Decision::Approved, &supervisor.id),
            store.decide(&report.id, Decision::Rejected, &supervisor.id),
        );

        let winner = match (first, second) {
            (Ok(won), Err(lost)) | (Err(lost), Ok(won)) => {
                assert!(lost.is_conflict());
                won
            }
            _ => panic!("exactly one decision must succeed"),
        };
        let stored = store.find(&report.id).await.unwrap().unwrap();
        assert_eq!(stored.status, winner.status);
    }

    #[tokio::test]
    async fn test_list_filters_and_counts() {
        let (store, fixture, assistant, supervisor) = setup().await;
        let first = store.create(submission(&fixture, &assistant, "B-010")).await.unwrap();
        store.create(submission(&fixture, &assistant, "B-011")).await.unwrap();
        store.create(submission(&fixture, &assistant, "B-012")).await.unwrap();
        store.decide(&first.id, Decision::Approved, &supervisor.id).await.unwrap();

        let pending = store
            .list(&ReportQuery {
                status: Some(ReportStatus::Pending),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(pending.total, 2);
        assert!(pending.data.iter().all(|r| r.status == ReportStatus::Pending));
        assert!(pending.data.iter().all(|r| r.parameter_values.len() == 2));

        let paged = store
            .list(&ReportQuery {
                per_page: Some(1),
                page: Some(2),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(paged.data.len(), 1);
        assert_eq!(paged.total_pages, 3);

        let counts = store.status_counts().await.unwrap();
        assert_eq!(counts, StatusCounts { pending: 2, approved: 1, rejected: 0, total: 3 });
    }

    #[tokio::test]
    async fn test_product_parameters_for_unknown_product() {
        let (store, fixture, _, _) = setup().await;
        assert!(store.product_parameters("missing").await.unwrap().is_none());
        assert_eq!(store.product_parameters(&fixture.product.id).await.unwrap().unwrap().len(), 4);
    }
}
