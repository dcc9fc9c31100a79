// src/report_handlers.rs - Lab report submission, review queue and decisions

use actix_web::{web, HttpRequest, HttpResponse};
use std::sync::Arc;

use crate::access::Action;
use crate::audit::{audit, AuditAction};
use crate::error::{ApiError, ApiResult};
use crate::handlers::ApiResponse;
use crate::models::{Decision, DecideReportRequest, ReportQuery, SubmitReportRequest};
use crate::session::SessionContext;
use crate::workflow;
use crate::AppState;

pub async fn submit_report(
    app_state: web::Data<Arc<AppState>>,
    ctx: SessionContext,
    request: web::Json<SubmitReportRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let report = workflow::submit(app_state.reports.as_ref(), &ctx, request.into_inner()).await?;

    audit(
        &app_state.db_pool, ctx.user_id(), AuditAction::Submit, "lab_report", &report.id,
        &format!("Submitted batch {} of {}", report.batch_no, report.product_name), &http_request,
    ).await;

    Ok(HttpResponse::Created().json(ApiResponse::success_with_message(
        report,
        "Lab report submitted for approval".to_string(),
    )))
}

pub async fn get_reports(
    app_state: web::Data<Arc<AppState>>,
    ctx: SessionContext,
    query: web::Query<ReportQuery>,
) -> ApiResult<HttpResponse> {
    workflow::ensure_report_visible(&ctx)?;
    let page = app_state.reports.list(&query).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(page)))
}

pub async fn get_report_stats(
    app_state: web::Data<Arc<AppState>>,
    ctx: SessionContext,
) -> ApiResult<HttpResponse> {
    workflow::ensure_report_visible(&ctx)?;
    let counts = app_state.reports.status_counts().await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(counts)))
}

pub async fn get_report(
    app_state: web::Data<Arc<AppState>>,
    ctx: SessionContext,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    workflow::ensure_report_visible(&ctx)?;
    let report_id = path.into_inner();
    let report = app_state
        .reports
        .find(&report_id)
        .await?
        .ok_or_else(|| ApiError::report_not_found(&report_id))?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(report)))
}

pub async fn decide_report(
    app_state: web::Data<Arc<AppState>>,
    ctx: SessionContext,
    path: web::Path<String>,
    request: web::Json<serde_json::Value>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    // The body is only interpreted once the caller may decide at all.
    ctx.require(Action::DecideReport)?;
    let request: DecideReportRequest = serde_json::from_value(request.into_inner())
        .map_err(|_| ApiError::field("status", "Status must be either approved or rejected"))?;
    let decision = Decision::try_from(request.status)?;
    let report_id = path.into_inner();

    let report = workflow::decide(app_state.reports.as_ref(), &ctx, &report_id, decision).await?;

    let action = match decision {
        Decision::Approved => AuditAction::Approve,
        Decision::Rejected => AuditAction::Reject,
    };
    audit(
        &app_state.db_pool, ctx.user_id(), action, "lab_report", &report.id,
        &format!("Batch {} {}", report.batch_no, report.status), &http_request,
    ).await;

    Ok(HttpResponse::Ok().json(ApiResponse::success_with_message(
        report,
        format!("Lab report {}", decision),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{http::StatusCode, test, App};
    use serde_json::{json, Value};
    use crate::access::Role;
    use crate::test_support;

    #[actix_rt::test]
    async fn test_report_lifecycle_over_http() {
        let (state, svc) = test_support::app_state().await;
        let fixture = test_support::catalog(&state.db_pool).await;
        test_support::user(&state.db_pool, "tech01", Role::LabAssistant).await;
        test_support::user(&state.db_pool, "sup01", Role::Supervisor).await;
        let tech = test_support::token(&state, &svc, "tech01").await;
        let sup = test_support::token(&state, &svc, "sup01").await;
        let app = test::init_service(App::new().configure(|cfg| test_support::configure(cfg, &state, &svc))).await;

        let body = json!({
            "product": fixture.product.id,
            "batch_no": "B-2024-001",
            "parameter_values": [
                {"parameter": fixture.purity.id, "value": 99.2},
                {"parameter": fixture.grade.id, "value": "A"},
                {"parameter": fixture.sterile.id, "value": true}
            ]
        });

        // Supervisors review, they do not submit.
        let resp = test::call_service(
            &app,
            test::TestRequest::post()
                .uri("/api/v1/lab-reports")
                .insert_header(("Authorization", format!("Bearer {}", sup)))
                .set_json(&body)
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);

        let resp = test::call_service(
            &app,
            test::TestRequest::post()
                .uri("/api/v1/lab-reports")
                .insert_header(("Authorization", format!("Bearer {}", tech)))
                .set_json(&body)
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let created: Value = test::read_body_json(resp).await;
        assert_eq!(created["data"]["status"], "pending");
        assert!(created["data"]["approved_by"].is_null());
        let report_id = created["data"]["id"].as_str().unwrap().to_string();

        let resp = test::call_service(
            &app,
            test::TestRequest::get()
                .uri("/api/v1/lab-reports?status=pending")
                .insert_header(("Authorization", format!("Bearer {}", sup)))
                .to_request(),
        )
        .await;
        let listed: Value = test::read_body_json(resp).await;
        assert_eq!(listed["data"]["total"], 1);

        let decide = |token: &str| {
            test::TestRequest::patch()
                .uri(&format!("/api/v1/lab-reports/{}", report_id))
                .insert_header(("Authorization", format!("Bearer {}", token)))
                .set_json(json!({"status": "rejected"}))
                .to_request()
        };

        let resp = test::call_service(&app, decide(&tech)).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);

        let resp = test::call_service(&app, decide(&sup)).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let decided: Value = test::read_body_json(resp).await;
        assert_eq!(decided["data"]["status"], "rejected");
        assert_eq!(decided["data"]["approved_by_username"], "sup01");

        let resp = test::call_service(&app, decide(&sup)).await;
        assert_eq!(resp.status(), StatusCode::CONFLICT);

        let resp = test::call_service(
            &app,
            test::TestRequest::get()
                .uri("/api/v1/lab-reports/stats")
                .insert_header(("Authorization", format!("Bearer {}", tech)))
                .to_request(),
        )
        .await;
        let stats: Value = test::read_body_json(resp).await;
        assert_eq!(stats["data"], json!({"pending": 0, "approved": 0, "rejected": 1, "total": 1}));
    }

    #[actix_rt::test]
    async fn test_invalid_submission_reports_fields() {
        let (state, svc) = test_support::app_state().await;
        let fixture = test_support::catalog(&state.db_pool).await;
        test_support::user(&state.db_pool, "tech01", Role::LabAssistant).await;
        let tech = test_support::token(&state, &svc, "tech01").await;
        let app = test::init_service(App::new().configure(|cfg| test_support::configure(cfg, &state, &svc))).await;

        let resp = test::call_service(
            &app,
            test::TestRequest::post()
                .uri("/api/v1/lab-reports")
                .insert_header(("Authorization", format!("Bearer {}", tech)))
                .set_json(json!({
                    "product_id": fixture.product.id,
                    "batch_no": "",
                    "parameter_values": [{"parameter_id": fixture.purity.id, "value": "90"}]
                }))
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["success"], false);
        let errors = body["errors"].as_object().unwrap();
        assert!(errors.contains_key("batch_no"));
        assert!(errors.contains_key("parameter_values.Purity"));
        assert!(errors.contains_key("parameter_values.Grade"));

        assert_eq!(state.reports.status_counts().await.unwrap().total, 0);
    }

    #[actix_rt::test]
    async fn test_unknown_report_and_pending_decision() {
        let (state, svc) = test_support::app_state().await;
        test_support::user(&state.db_pool, "mgr01", Role::Manager).await;
        let mgr = test_support::token(&state, &svc, "mgr01").await;
        let app = test::init_service(App::new().configure(|cfg| test_support::configure(cfg, &state, &svc))).await;

        let patch = |status: &str| {
            test::TestRequest::patch()
                .uri("/api/v1/lab-reports/missing")
                .insert_header(("Authorization", format!("Bearer {}", mgr)))
                .set_json(json!({ "status": status }))
                .to_request()
        };

        let resp = test::call_service(&app, patch("approved")).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let resp = test::call_service(&app, patch("pending")).await;
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let resp = test::call_service(&app, patch("bogus")).await;
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let body: Value = test::read_body_json(resp).await;
        assert!(body["errors"].as_object().unwrap().contains_key("status"));
    }

    #[actix_rt::test]
    async fn test_lab_assistant_cannot_decide_whatever_the_status() {
        let (state, svc) = test_support::app_state().await;
        test_support::user(&state.db_pool, "tech01", Role::LabAssistant).await;
        let tech = test_support::token(&state, &svc, "tech01").await;
        let app = test::init_service(App::new().configure(|cfg| test_support::configure(cfg, &state, &svc))).await;

        for body in [json!({"status": "bogus"}), json!({"status": "pending"}), json!({})] {
            let resp = test::call_service(
                &app,
                test::TestRequest::patch()
                    .uri("/api/v1/lab-reports/missing")
                    .insert_header(("Authorization", format!("Bearer {}", tech)))
                    .set_json(&body)
                    .to_request(),
            )
            .await;
            assert_eq!(resp.status(), StatusCode::FORBIDDEN, "body {}", body);
        }
    }

    #[actix_rt::test]
    async fn test_listing_far_past_the_last_page() {
        let (state, svc) = test_support::app_state().await;
        test_support::user(&state.db_pool, "sup01", Role::Supervisor).await;
        let sup = test_support::token(&state, &svc, "sup01").await;
        let app = test::init_service(App::new().configure(|cfg| test_support::configure(cfg, &state, &svc))).await;

        let resp = test::call_service(
            &app,
            test::TestRequest::get()
                .uri("/api/v1/lab-reports?page=9223372036854775807&per_page=100")
                .insert_header(("Authorization", format!("Bearer {}", sup)))
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
        let listed: Value = test::read_body_json(resp).await;
        assert_eq!(listed["data"]["total"], 0);
        assert_eq!(listed["data"]["data"], json!([]));
    }
}
