// src/workflow.rs - Lab report lifecycle: pending -> approved | rejected
//!
//! Lab assistants submit reports, which always start out pending. A
//! supervisor or manager records exactly one decision on each report;
//! decided reports are never changed again. A rejected batch is resubmitted
//! as a new report.

use std::collections::HashSet;

use crate::access::Action;
use crate::error::{ApiError, ApiResult};
use crate::models::{
    Decision, LabReport, NewLabReport, NewReportValue, ProductParameter, SubmitReportRequest,
};
use crate::repositories::ReportStore;
use crate::session::SessionContext;
use crate::validator::{FieldValidator, ValidationResult};

fn value_field(parameter: &ProductParameter) -> String {
    format!("parameter_values.{}", parameter.name)
}

/// Checks a submission against the product's parameters.
///
/// `parameters` is `None` when the product does not exist. Values come back
/// in parameter definition order; empty optional values are dropped.
pub fn validate_submission(
    request: &SubmitReportRequest,
    submitted_by: &str,
    parameters: Option<&[ProductParameter]>,
) -> ApiResult<NewLabReport> {
    let mut result = ValidationResult::new();

    if let Err(e) = FieldValidator::batch_no(&request.batch_no) {
        result.add_error("batch_no", e);
    }

    let parameters = match parameters {
        Some(parameters) => parameters,
        None => {
            result.add_error(
                "product_id",
                format!("Product '{}' does not exist", request.product_id),
            );
            return Err(result.to_api_error());
        }
    };

    let mut seen: HashSet<&str> = HashSet::new();
    let mut provided: HashSet<&str> = HashSet::new();
    for submitted in &request.parameter_values {
        let parameter = match parameters.iter().find(|p| p.id == submitted.parameter_id) {
            Some(parameter) => parameter,
            None => {
                result.add_error(
                    "parameter_values",
                    format!("Parameter '{}' does not belong to this product", submitted.parameter_id),
                );
                continue;
            }
        };

        if !seen.insert(parameter.id.as_str()) {
            result.add_error(value_field(parameter), format!("{} was given more than once", parameter.name));
            continue;
        }

        if submitted.value.trim().is_empty() {
            continue;
        }
        provided.insert(parameter.id.as_str());

        if let Err(e) = parameter.check_value(&submitted.value) {
            result.add_error(value_field(parameter), e);
        }
    }

    for parameter in parameters.iter().filter(|p| p.required) {
        if !provided.contains(parameter.id.as_str()) {
            result.add_error(value_field(parameter), format!("{} is required", parameter.name));
        }
    }

    result.into_result()?;

    let values = parameters
        .iter()
        .filter(|p| provided.contains(p.id.as_str()))
        .filter_map(|p| {
            request
                .parameter_values
                .iter()
                .find(|v| v.parameter_id == p.id)
                .map(|v| NewReportValue {
                    parameter_id: p.id.clone(),
                    value: v.value.trim().to_string(),
                    unit: p.unit.clone(),
                })
        })
        .collect();

    Ok(NewLabReport {
        product_id: request.product_id.clone(),
        batch_no: request.batch_no.trim().to_string(),
        submitted_by: submitted_by.to_string(),
        values,
    })
}

/// Creates a pending report. Only lab assistants submit.
pub async fn submit(
    store: &dyn ReportStore,
    ctx: &SessionContext,
    request: SubmitReportRequest,
) -> ApiResult<LabReport> {
    ctx.require(Action::SubmitReport)?;

    let parameters = store.product_parameters(&request.product_id).await?;
    let new_report = validate_submission(&request, ctx.user_id(), parameters.as_deref())?;
    let report = store.create(new_report).await?;

    tracing::info!(
        report_id = %report.id,
        batch_no = %report.batch_no,
        product_id = %report.product_id,
        submitted_by = %ctx.principal.username,
        "lab report submitted"
    );
    Ok(report)
}

/// Records an approval or rejection on a pending report.
///
/// The role is checked before the report's state, so a caller without the
/// right to decide gets a 403 even for reports that were already decided.
pub async fn decide(
    store: &dyn ReportStore,
    ctx: &SessionContext,
    report_id: &str,
    decision: Decision,
) -> ApiResult<LabReport> {
    ctx.require(Action::DecideReport)?;

    match store.decide(report_id, decision, ctx.user_id()).await {
        Ok(report) => {
            tracing::info!(
                report_id = %report.id,
                status = %report.status,
                decided_by = %ctx.principal.username,
                "lab report decided"
            );
            Ok(report)
        }
        Err(err) => {
            if err.is_conflict() {
                tracing::warn!(
                    report_id = %report_id,
                    attempted = %decision,
                    decided_by = %ctx.principal.username,
                    "decision on an already decided lab report"
                );
            }
            Err(err)
        }
    }
}

pub fn ensure_report_visible(ctx: &SessionContext) -> Result<(), ApiError> {
    ctx.require(Action::ViewReports)
}
