use actix_web::{HttpResponse, ResponseError};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Unauthorized(String),
    Forbidden(String),
    Conflict(String),
    InternalServerError(String),
    FieldErrors(HashMap<String, Vec<String>>),
    DatabaseError(sqlx::Error),
    AuthError(String),
}

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Serialize)]
struct ErrorResponse {
    success: bool,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    errors: Option<HashMap<String, Vec<String>>>,
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ApiError::BadRequest(msg) => write!(f, "Bad Request: {}", msg),
            ApiError::NotFound(msg) => write!(f, "Not Found: {}", msg),
            ApiError::Unauthorized(msg) => write!(f, "Unauthorized: {}", msg),
            ApiError::Forbidden(msg) => write!(f, "Forbidden: {}", msg),
            ApiError::Conflict(msg) => write!(f, "Conflict: {}", msg),
            ApiError::InternalServerError(msg) => write!(f, "Internal Server Error: {}", msg),
            ApiError::FieldErrors(errors) => {
                let mut fields: Vec<&String> = errors.keys().collect();
                fields.sort();
                let joined = fields
                    .iter()
                    .map(|field| format!("{}: {}", field, errors[*field].join(", ")))
                    .collect::<Vec<_>>()
                    .join("; ");
                write!(f, "Validation Error: {}", joined)
            }
            ApiError::DatabaseError(err) => write!(f, "Database Error: {}", err),
            ApiError::AuthError(msg) => write!(f, "Auth Error: {}", msg),
        }
    }
}

impl ResponseError for ApiError {
    fn error_response(&self) -> HttpResponse {
        // Store failures are logged in full but reported generically.
        let message = match self {
            ApiError::DatabaseError(err) => {
                log::error!("Database error: {}", err);
                "Internal Server Error: storage unavailable, please retry".to_string()
            }
            other => other.to_string(),
        };

        let error_response = ErrorResponse {
            success: false,
            message,
            errors: match self {
                ApiError::FieldErrors(errors) => Some(errors.clone()),
                _ => None,
            },
        };

        match self {
            ApiError::BadRequest(_) => HttpResponse::BadRequest().json(error_response),
            ApiError::NotFound(_) => HttpResponse::NotFound().json(error_response),
            ApiError::Unauthorized(_) => HttpResponse::Unauthorized().json(error_response),
            ApiError::Forbidden(_) => HttpResponse::Forbidden().json(error_response),
            ApiError::Conflict(_) => HttpResponse::Conflict().json(error_response),
            ApiError::FieldErrors(_) => HttpResponse::UnprocessableEntity().json(error_response),
            ApiError::DatabaseError(_) => HttpResponse::InternalServerError().json(error_response),
            ApiError::AuthError(_) => HttpResponse::Unauthorized().json(error_response),
            ApiError::InternalServerError(_) => HttpResponse::InternalServerError().json(error_response),
        }
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        ApiError::DatabaseError(err)
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(err: validator::ValidationErrors) -> Self {
        let errors = err
            .field_errors()
            .into_iter()
            .map(|(field, errs)| {
                let messages = errs
                    .iter()
                    .map(|e| {
                        e.message
                            .as_ref()
                            .map(|m| m.to_string())
                            .unwrap_or_else(|| e.code.to_string())
                    })
                    .collect();
                (field.to_string(), messages)
            })
            .collect();
        ApiError::FieldErrors(errors)
    }
}

impl ApiError {
    pub fn not_found(entity: &str) -> Self {
        ApiError::NotFound(format!("{} not found", entity))
    }

    pub fn field(field: &str, message: impl Into<String>) -> Self {
        let mut errors = HashMap::new();
        errors.insert(field.to_string(), vec![message.into()]);
        ApiError::FieldErrors(errors)
    }

    pub fn report_not_found(id: &str) -> Self {
        ApiError::NotFound(format!("Lab report with ID '{}' not found", id))
    }

    pub fn product_not_found(id: &str) -> Self {
        ApiError::NotFound(format!("Product with ID '{}' not found", id))
    }

    pub fn parameter_not_found(id: &str) -> Self {
        ApiError::NotFound(format!("Parameter with ID '{}' not found", id))
    }

    pub fn report_already_decided(id: &str, status: &str) -> Self {
        ApiError::Conflict(format!(
            "Lab report '{}' has already been decided (status: {}); reload and try again",
            id, status
        ))
    }

    pub fn insufficient_role() -> Self {
        ApiError::Forbidden("Insufficient permissions".to_string())
    }

    /// A foreign key violation becomes 409 with `message`; anything else stays a database error.
    pub fn on_reference(err: sqlx::Error, message: impl Into<String>) -> Self {
        match &err {
            sqlx::Error::Database(db_err) if db_err.is_foreign_key_violation() => {
                ApiError::Conflict(message.into())
            }
            _ => ApiError::DatabaseError(err),
        }
    }

    /// Whether the variant represents the 409 outcome of a stale decision.
    pub fn is_conflict(&self) -> bool {
        matches!(self, ApiError::Conflict(_))
    }

    /// Field names carried by a validation failure, sorted.
    #[cfg(test)]
    pub fn invalid_fields(&self) -> Vec<String> {
        match self {
            ApiError::FieldErrors(errors) => {
                let mut fields: Vec<String> = errors.keys().cloned().collect();
                fields.sort();
                fields
            }
            _ => Vec::new(),
        }
    }
}
