// src/models/product.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use uuid::Uuid;
use validator::Validate;

use crate::error::{ApiError, ApiResult};
use crate::models::Plant;

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct Product {
    pub id: String,
    pub product_code: String,
    pub name: String,
    pub plant_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Validate, Clone)]
pub struct CreateProductRequest {
    #[validate(length(min = 1, max = 50, message = "Product code must be between 1 and 50 characters"))]
    pub product_code: String,
    #[validate(length(min = 1, max = 100, message = "Product name must be between 1 and 100 characters"))]
    pub name: String,
    #[validate(length(min = 1, message = "Plant is required"))]
    pub plant_id: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateProductRequest {
    #[validate(length(min = 1, max = 50, message = "Product code must be between 1 and 50 characters"))]
    pub product_code: Option<String>,
    #[validate(length(min = 1, max = 100, message = "Product name must be between 1 and 100 characters"))]
    pub name: Option<String>,
    pub plant_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ProductQuery {
    pub plant_id: Option<String>,
}

impl Product {
    async fn ensure_code_free(pool: &SqlitePool, code: &str, except_id: Option<&str>) -> ApiResult<()> {
        let taken: Option<(String,)> = sqlx::query_as("SELECT id FROM products WHERE product_code = ?")
            .bind(code)
            .fetch_optional(pool)
            .await?;
        match taken {
            Some((id,)) if Some(id.as_str()) != except_id => Err(ApiError::field(
                "product_code",
                format!("Product code '{}' is already in use", code),
            )),
            _ => Ok(()),
        }
    }

    async fn ensure_plant_exists(pool: &SqlitePool, plant_id: &str) -> ApiResult<()> {
        match Plant::find_by_id(pool, plant_id).await? {
            Some(_) => Ok(()),
            None => Err(ApiError::field("plant_id", format!("Plant '{}' does not exist", plant_id))),
        }
    }

    pub async fn create(pool: &SqlitePool, request: CreateProductRequest) -> ApiResult<Product> {
        Self::ensure_plant_exists(pool, &request.plant_id).await?;
        Self::ensure_code_free(pool, &request.product_code, None).await?;

        let now = Utc::now();
        let product = Product {
            id: Uuid::new_v4().to_string(),
            product_code: request.product_code,
            name: request.name,
            plant_id: request.plant_id,
            created_at: now,
            updated_at: now,
        };

        sqlx::query(
            r#"INSERT INTO products (id, product_code, name, plant_id, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?)"#
        )
            .bind(&product.id)
            .bind(&product.product_code)
            .bind(&product.name)
            .bind(&product.plant_id)
            .bind(product.created_at)
            .bind(product.updated_at)
            .execute(pool)
            .await?;

        Ok(product)
    }

    pub async fn find_by_id(pool: &SqlitePool, id: &str) -> ApiResult<Option<Product>> {
        let product = sqlx::query_as::<_, Product>("SELECT * FROM products WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await?;
        Ok(product)
    }

    pub async fn list(pool: &SqlitePool, plant_id: Option<&str>) -> ApiResult<Vec<Product>> {
        let products = match plant_id {
            Some(plant_id) => {
                sqlx::query_as::<_, Product>("SELECT * FROM products WHERE plant_id = ? ORDER BY name")
                    .bind(plant_id)
                    .fetch_all(pool)
                    .await?
            }
            None => {
                sqlx::query_as::<_, Product>("SELECT * FROM products ORDER BY name")
                    .fetch_all(pool)
                    .await?
            }
        };
        Ok(products)
    }

    pub async fn update(pool: &SqlitePool, id: &str, update: UpdateProductRequest) -> ApiResult<Product> {
        let existing = Self::find_by_id(pool, id)
            .await?
            .ok_or_else(|| ApiError::product_not_found(id))?;

        if let Some(ref code) = update.product_code {
            Self::ensure_code_free(pool, code, Some(id)).await?;
        }
        if let Some(ref plant_id) = update.plant_id {
            Self::ensure_plant_exists(pool, plant_id).await?;
        }

        sqlx::query(
            "UPDATE products SET product_code = ?, name = ?, plant_id = ?, updated_at = ? WHERE id = ?"
        )
            .bind(update.product_code.as_ref().unwrap_or(&existing.product_code))
            .bind(update.name.as_ref().unwrap_or(&existing.name))
            .bind(update.plant_id.as_ref().unwrap_or(&existing.plant_id))
            .bind(Utc::now())
            .bind(id)
            .execute(pool)
            .await?;

        Self::find_by_id(pool, id)
            .await?
            .ok_or_else(|| ApiError::product_not_found(id))
    }

    /// Products with submitted lab reports are kept; their parameters go with them otherwise.
    pub async fn delete(pool: &SqlitePool, id: &str) -> ApiResult<()> {
        let mut tx = pool.begin().await?;

        let reports: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM lab_reports WHERE product_id = ?")
            .bind(id)
            .fetch_one(&mut *tx)
            .await?;
        if reports.0 > 0 {
            return Err(ApiError::Conflict(format!(
                "Product has {} lab report(s) and cannot be deleted",
                reports.0
            )));
        }

        // A report submitted after the count still trips the foreign key.
        let result = sqlx::query("DELETE FROM products WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(|e| ApiError::on_reference(e, "Product has lab reports and cannot be deleted"))?;
        if result.rows_affected() == 0 {
            return Err(ApiError::product_not_found(id));
        }

        tx.commit().await?;
        Ok(())
    }
}
