// src/models/parameter.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::models::Product;
use crate::validator::{FieldValidator, ValidationResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, EnumString, Display, AsRefStr)]
#[sqlx(type_name = "TEXT", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ParameterType {
    Number,
    Text,
    Dropdown,
    Boolean,
}

impl Default for ParameterType {
    fn default() -> Self {
        ParameterType::Text
    }
}

/// Longest value a report can store for one parameter.
pub const MAX_VALUE_LENGTH: usize = 255;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ProductParameter {
    pub id: String,
    pub product_id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: ParameterType,
    pub unit: Option<String>,
    pub required: bool,
    pub min_value: Option<f64>,
    pub max_value: Option<f64>,
    pub options: Option<Vec<String>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// Options are kept as a JSON array in a TEXT column.
#[derive(sqlx::FromRow)]
struct ParameterRow {
    id: String,
    product_id: String,
    name: String,
    param_type: ParameterType,
    unit: Option<String>,
    required: bool,
    min_value: Option<f64>,
    max_value: Option<f64>,
    options: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ParameterRow> for ProductParameter {
    type Error = ApiError;

    fn try_from(row: ParameterRow) -> Result<Self, Self::Error> {
        let options = row
            .options
            .as_deref()
            .map(serde_json::from_str::<Vec<String>>)
            .transpose()
            .map_err(|e| {
                ApiError::InternalServerError(format!("Corrupt options for parameter {}: {}", row.id, e))
            })?;

        Ok(ProductParameter {
            id: row.id,
            product_id: row.product_id,
            name: row.name,
            param_type: row.param_type,
            unit: row.unit,
            required: row.required,
            min_value: row.min_value,
            max_value: row.max_value,
            options,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn default_required() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct CreateParameterRequest {
    #[serde(alias = "product")]
    pub product_id: String,
    pub name: String,
    #[serde(rename = "type", default)]
    pub param_type: ParameterType,
    pub unit: Option<String>,
    #[serde(default = "default_required")]
    pub required: bool,
    pub min_value: Option<f64>,
    pub max_value: Option<f64>,
    pub options: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Default)]
pub struct UpdateParameterRequest {
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub param_type: Option<ParameterType>,
    pub unit: Option<String>,
    pub required: Option<bool>,
    pub min_value: Option<f64>,
    pub max_value: Option<f64>,
    pub options: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
pub struct ParameterQuery {
    #[serde(alias = "product")]
    pub product_id: Option<String>,
}

/// Checks the invariants of a parameter definition.
pub fn validate_definition(
    name: &str,
    kind: ParameterType,
    unit: Option<&str>,
    min_value: Option<f64>,
    max_value: Option<f64>,
    options: Option<&[String]>,
) -> ValidationResult {
    let mut result = ValidationResult::new();

    if let Err(e) = FieldValidator::not_empty(name, "Name")
        .and_then(|_| FieldValidator::length(name, "Name", None, Some(100)))
    {
        result.add_error("name", e);
    }

    if let Some(unit) = unit {
        if let Err(e) = FieldValidator::length(unit, "Unit", None, Some(20)) {
            result.add_error("unit", e);
        }
    }

    if kind == ParameterType::Number {
        for (field, bound) in [("min_value", min_value), ("max_value", max_value)] {
            if matches!(bound, Some(v) if !v.is_finite()) {
                result.add_error(field, "Bound must be a finite number");
            }
        }
        if let (Some(min), Some(max)) = (min_value, max_value) {
            if min > max {
                result.add_error("min_value", format!("Minimum ({}) cannot exceed maximum ({})", min, max));
            }
        }
    } else if min_value.is_some() || max_value.is_some() {
        let field = if min_value.is_some() { "min_value" } else { "max_value" };
        result.add_error(field, "Bounds are only allowed for number parameters");
    }

    match (kind, options) {
        (ParameterType::Dropdown, None) => {
            result.add_error("options", "Dropdown parameters need at least one option");
        }
        (ParameterType::Dropdown, Some(opts)) => {
            if opts.is_empty() {
                result.add_error("options", "Dropdown parameters need at least one option");
            }
            if opts.iter().any(|o| o.trim().is_empty()) {
                result.add_error("options", "Options cannot be empty");
            }
        }
        (_, Some(opts)) if !opts.is_empty() => {
            result.add_error("options", "Options are only allowed for dropdown parameters");
        }
        _ => {}
    }

    result
}

impl ProductParameter {
    /// Checks one submitted (non-empty) value against this parameter.
    pub fn check_value(&self, raw: &str) -> Result<(), String> {
        let value = raw.trim();
        if value.chars().count() > MAX_VALUE_LENGTH {
            return Err(format!("Value for {} is longer than {} characters", self.name, MAX_VALUE_LENGTH));
        }

        match self.param_type {
            ParameterType::Number => {
                let number: f64 = value
                    .parse()
                    .ok()
                    .filter(|v: &f64| v.is_finite())
                    .ok_or_else(|| format!("Value for {} must be a number", self.name))?;
                if let Some(min) = self.min_value {
                    if number < min {
                        return Err(format!("Value for {} must be at least {}", self.name, min));
                    }
                }
                if let Some(max) = self.max_value {
                    if number > max {
                        return Err(format!("Value for {} must be at most {}", self.name, max));
                    }
                }
                Ok(())
            }
            ParameterType::Boolean => {
                if value.eq_ignore_ascii_case("true") || value.eq_ignore_ascii_case("false") {
                    Ok(())
                } else {
                    Err(format!("Value for {} must be true or false", self.name))
                }
            }
            ParameterType::Dropdown => {
                let allowed = self.options.as_deref().unwrap_or(&[]);
                if allowed.iter().any(|o| o == value) {
                    Ok(())
                } else {
                    Err(format!("Value for {} must be one of: {}", self.name, allowed.join(", ")))
                }
            }
            ParameterType::Text => Ok(()),
        }
    }

    pub async fn create(pool: &SqlitePool, request: CreateParameterRequest) -> ApiResult<ProductParameter> {
        let validation = validate_definition(
            &request.name,
            request.param_type,
            request.unit.as_deref(),
            request.min_value,
            request.max_value,
            request.options.as_deref(),
        );
        if !validation.is_valid() {
            return Err(validation.to_api_error());
        }

        if Product::find_by_id(pool, &request.product_id).await?.is_none() {
            return Err(ApiError::field("product_id", format!("Product '{}' does not exist", request.product_id)));
        }

        let now = Utc::now();
        let parameter = ProductParameter {
            id: Uuid::new_v4().to_string(),
            product_id: request.product_id,
            name: request.name.trim().to_string(),
            param_type: request.param_type,
            unit: request.unit.filter(|u| !u.trim().is_empty()),
            required: request.required,
            min_value: request.min_value,
            max_value: request.max_value,
            options: request.options.filter(|_| request.param_type == ParameterType::Dropdown),
            created_at: now,
            updated_at: now,
        };

        sqlx::query(
            r#"INSERT INTO product_parameters
               (id, product_id, name, param_type, unit, required, min_value, max_value, options, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#
        )
            .bind(&parameter.id)
            .bind(&parameter.product_id)
            .bind(&parameter.name)
            .bind(parameter.param_type)
            .bind(&parameter.unit)
            .bind(parameter.required)
            .bind(parameter.min_value)
            .bind(parameter.max_value)
            .bind(encode_options(parameter.options.as_deref())?)
            .bind(parameter.created_at)
            .bind(parameter.updated_at)
            .execute(pool)
            .await?;

        Ok(parameter)
    }

    pub async fn find_by_id(pool: &SqlitePool, id: &str) -> ApiResult<Option<ProductParameter>> {
        sqlx::query_as::<_, ParameterRow>("SELECT * FROM product_parameters WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await?
            .map(ProductParameter::try_from)
            .transpose()
    }

    /// Parameters in definition order.
    pub async fn list_for_product(pool: &SqlitePool, product_id: &str) -> ApiResult<Vec<ProductParameter>> {
        sqlx::query_as::<_, ParameterRow>(
            "SELECT * FROM product_parameters WHERE product_id = ? ORDER BY created_at, rowid"
        )
            .bind(product_id)
            .fetch_all(pool)
            .await?
            .into_iter()
            .map(ProductParameter::try_from)
            .collect()
    }

    pub async fn list_all(pool: &SqlitePool) -> ApiResult<Vec<ProductParameter>> {
        sqlx::query_as::<_, ParameterRow>("SELECT * FROM product_parameters ORDER BY product_id, created_at, rowid")
            .fetch_all(pool)
            .await?
            .into_iter()
            .map(ProductParameter::try_from)
            .collect()
    }

    pub async fn update(pool: &SqlitePool, id: &str, update: UpdateParameterRequest) -> ApiResult<ProductParameter> {
        let existing = Self::find_by_id(pool, id)
            .await?
            .ok_or_else(|| ApiError::parameter_not_found(id))?;

        let kind = update.param_type.unwrap_or(existing.param_type);
        let numeric = kind == ParameterType::Number;
        let dropdown = kind == ParameterType::Dropdown;

        // Inherited bounds/options are dropped when the type no longer uses them.
        let name = update.name.unwrap_or(existing.name);
        let unit = update.unit.or(existing.unit).filter(|u| !u.trim().is_empty());
        let min_value = update.min_value.or(existing.min_value.filter(|_| numeric));
        let max_value = update.max_value.or(existing.max_value.filter(|_| numeric));
        let options = update.options.or(existing.options.filter(|_| dropdown));

        let validation = validate_definition(&name, kind, unit.as_deref(), min_value, max_value, options.as_deref());
        if !validation.is_valid() {
            return Err(validation.to_api_error());
        }

        sqlx::query(
            r#"UPDATE product_parameters
               SET name = ?, param_type = ?, unit = ?, required = ?, min_value = ?, max_value = ?, options = ?, updated_at = ?
               WHERE id = ?"#
        )
            .bind(name.trim())
            .bind(kind)
            .bind(&unit)
            .bind(update.required.unwrap_or(existing.required))
            .bind(min_value)
            .bind(max_value)
            .bind(encode_options(options.as_deref())?)
            .bind(Utc::now())
            .bind(id)
            .execute(pool)
            .await?;

        Self::find_by_id(pool, id)
            .await?
            .ok_or_else(|| ApiError::parameter_not_found(id))
    }

    /// Parameters already used in lab reports are kept.
    pub async fn delete(pool: &SqlitePool, id: &str) -> ApiResult<()> {
        let mut tx = pool.begin().await?;

        let used: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM lab_report_values WHERE parameter_id = ?")
            .bind(id)
            .fetch_one(&mut *tx)
            .await?;
        if used.0 > 0 {
            return Err(ApiError::Conflict(format!(
                "Parameter is recorded in {} lab report value(s) and cannot be deleted",
                used.0
            )));
        }

        let result = sqlx::query("DELETE FROM product_parameters WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(|e| ApiError::on_reference(e, "Parameter is recorded in lab reports and cannot be deleted"))?;
        if result.rows_affected() == 0 {
            return Err(ApiError::parameter_not_found(id));
        }

        tx.commit().await?;
        Ok(())
    }
}

fn encode_options(options: Option<&[String]>) -> ApiResult<Option<String>> {
    options
        .map(serde_json::to_string)
        .transpose()
        .map_err(|e| ApiError::InternalServerError(format!("Failed to encode options: {}", e)))
}
