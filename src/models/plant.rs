// src/models/plant.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use uuid::Uuid;
use validator::Validate;

use crate::error::{ApiError, ApiResult};

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct Plant {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreatePlantRequest {
    #[validate(length(min = 1, max = 100, message = "Plant name must be between 1 and 100 characters"))]
    pub name: String,
}

impl Plant {
    pub async fn create(pool: &SqlitePool, name: &str) -> ApiResult<Plant> {
        let name = name.trim();
        let taken: Option<(String,)> = sqlx::query_as("SELECT id FROM plants WHERE name = ?")
            .bind(name)
            .fetch_optional(pool)
            .await?;
        if taken.is_some() {
            return Err(ApiError::field("name", format!("Plant '{}' already exists", name)));
        }

        let plant = Plant {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            created_at: Utc::now(),
        };

        sqlx::query("INSERT INTO plants (id, name, created_at) VALUES (?, ?, ?)")
            .bind(&plant.id)
            .bind(&plant.name)
            .bind(plant.created_at)
            .execute(pool)
            .await?;

        Ok(plant)
    }

    pub async fn list(pool: &SqlitePool) -> ApiResult<Vec<Plant>> {
        let plants = sqlx::query_as::<_, Plant>("SELECT * FROM plants ORDER BY name")
            .fetch_all(pool)
            .await?;
        Ok(plants)
    }

    pub async fn find_by_id(pool: &SqlitePool, id: &str) -> ApiResult<Option<Plant>> {
        let plant = sqlx::query_as::<_, Plant>("SELECT * FROM plants WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await?;
        Ok(plant)
    }

    /// Plants that still own products cannot be removed.
    pub async fn delete(pool: &SqlitePool, id: &str) -> ApiResult<()> {
        let products: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM products WHERE plant_id = ?")
            .bind(id)
            .fetch_one(pool)
            .await?;
        if products.0 > 0 {
            return Err(ApiError::Conflict(format!(
                "Plant still has {} product(s); move or delete them first",
                products.0
            )));
        }

        let result = sqlx::query("DELETE FROM plants WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(ApiError::not_found("Plant"));
        }
        Ok(())
    }
}
