// src/db.rs - Database migrations and setup

use sqlx::SqlitePool;
use anyhow::{Context, Result};

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // Enable foreign keys and WAL mode
    sqlx::query("PRAGMA foreign_keys = ON")
        .execute(pool)
        .await?;

    // In-memory databases stay in "memory" journal mode.
    if let Err(e) = sqlx::query("PRAGMA journal_mode = WAL")
        .execute(pool)
        .await
    {
        log::debug!("WAL journal mode not applied: {}", e);
    }

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            username TEXT NOT NULL UNIQUE CHECK(length(username) >= 3 AND length(username) <= 50),
            password_hash TEXT NOT NULL,
            role TEXT NOT NULL DEFAULT 'lab_assistant' CHECK(
                role IN ('lab_assistant', 'supervisor', 'manager')
            ),
            is_active INTEGER NOT NULL DEFAULT 1 CHECK(is_active IN (0, 1)),
            last_login DATETIME,
            created_at DATETIME NOT NULL,
            updated_at DATETIME NOT NULL,
            failed_login_attempts INTEGER NOT NULL DEFAULT 0,
            locked_until DATETIME
        )
        "#,
    )
        .execute(pool)
        .await
        .context("creating users table")?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sessions (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            created_at DATETIME NOT NULL,
            expires_at DATETIME NOT NULL,
            closed_at DATETIME,
            FOREIGN KEY (user_id) REFERENCES users (id) ON DELETE CASCADE
        )
        "#,
    )
        .execute(pool)
        .await
        .context("creating sessions table")?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS plants (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE CHECK(length(name) > 0 AND length(name) <= 100),
            created_at DATETIME NOT NULL
        )
        "#,
    )
        .execute(pool)
        .await
        .context("creating plants table")?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS products (
            id TEXT PRIMARY KEY,
            product_code TEXT NOT NULL UNIQUE CHECK(length(product_code) > 0 AND length(product_code) <= 50),
            name TEXT NOT NULL CHECK(length(name) > 0 AND length(name) <= 100),
            plant_id TEXT NOT NULL,
            created_at DATETIME NOT NULL,
            updated_at DATETIME NOT NULL,
            FOREIGN KEY (plant_id) REFERENCES plants (id)
        )
        "#,
    )
        .execute(pool)
        .await
        .context("creating products table")?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS product_parameters (
            id TEXT PRIMARY KEY,
            product_id TEXT NOT NULL,
            name TEXT NOT NULL CHECK(length(name) > 0 AND length(name) <= 100),
            param_type TEXT NOT NULL CHECK(
                param_type IN ('number', 'text', 'dropdown', 'boolean')
            ),
            unit TEXT CHECK(unit IS NULL OR length(unit) <= 20),
            required INTEGER NOT NULL DEFAULT 1 CHECK(required IN (0, 1)),
            min_value REAL,
            max_value REAL,
            options TEXT,
            created_at DATETIME NOT NULL,
            updated_at DATETIME NOT NULL,
            CHECK(min_value IS NULL OR max_value IS NULL OR min_value <= max_value),
            CHECK(param_type = 'number' OR (min_value IS NULL AND max_value IS NULL)),
            CHECK(param_type != 'dropdown' OR options IS NOT NULL),
            FOREIGN KEY (product_id) REFERENCES products (id) ON DELETE CASCADE
        )
        "#,
    )
        .execute(pool)
        .await
        .context("creating product_parameters table")?;

    // A report leaves pending exactly once, stamping approver and time together.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS lab_reports (
            id TEXT PRIMARY KEY,
            product_id TEXT NOT NULL,
            batch_no TEXT NOT NULL CHECK(length(batch_no) > 0 AND length(batch_no) <= 50),
            submitted_by TEXT NOT NULL,
            submitted_at DATETIME NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending' CHECK(
                status IN ('pending', 'approved', 'rejected')
            ),
            approved_by TEXT,
            approved_at DATETIME,
            CHECK(
                (status = 'pending' AND approved_by IS NULL AND approved_at IS NULL)
                OR (status != 'pending' AND approved_by IS NOT NULL AND approved_at IS NOT NULL)
            ),
            FOREIGN KEY (product_id) REFERENCES products (id),
            FOREIGN KEY (submitted_by) REFERENCES users (id),
            FOREIGN KEY (approved_by) REFERENCES users (id)
        )
        "#,
    )
        .execute(pool)
        .await
        .context("creating lab_reports table")?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS lab_report_values (
            id TEXT PRIMARY KEY,
            report_id TEXT NOT NULL,
            parameter_id TEXT NOT NULL,
            position INTEGER NOT NULL,
            value TEXT NOT NULL CHECK(length(value) <= 255),
            unit TEXT,
            UNIQUE(report_id, parameter_id),
            FOREIGN KEY (report_id) REFERENCES lab_reports (id) ON DELETE CASCADE,
            FOREIGN KEY (parameter_id) REFERENCES product_parameters (id)
        )
        "#,
    )
        .execute(pool)
        .await
        .context("creating lab_report_values table")?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS audit_logs (
            id TEXT PRIMARY KEY,
            user_id TEXT,
            action TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            entity_id TEXT,
            description TEXT,
            ip_address TEXT,
            user_agent TEXT,
            created_at DATETIME NOT NULL,
            FOREIGN KEY (user_id) REFERENCES users (id)
        )
        "#,
    )
        .execute(pool)
        .await
        .context("creating audit_logs table")?;

    let indexes = [
        "CREATE INDEX IF NOT EXISTS idx_sessions_user ON sessions(user_id)",
        "CREATE INDEX IF NOT EXISTS idx_sessions_expires ON sessions(expires_at)",
        "CREATE INDEX IF NOT EXISTS idx_products_plant ON products(plant_id)",
        "CREATE INDEX IF NOT EXISTS idx_parameters_product ON product_parameters(product_id)",
        "CREATE INDEX IF NOT EXISTS idx_lab_reports_status ON lab_reports(status)",
        "CREATE INDEX IF NOT EXISTS idx_lab_reports_product ON lab_reports(product_id)",
        "CREATE INDEX IF NOT EXISTS idx_lab_reports_submitted ON lab_reports(submitted_at)",
        "CREATE INDEX IF NOT EXISTS idx_report_values_parameter ON lab_report_values(parameter_id)",
        "CREATE INDEX IF NOT EXISTS idx_audit_entity ON audit_logs(entity_type, entity_id)",
        "CREATE INDEX IF NOT EXISTS idx_audit_created ON audit_logs(created_at)",
    ];

    for query in indexes.iter() {
        sqlx::query(query)
            .execute(pool)
            .await
            .with_context(|| format!("running `{}`", query))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;

    #[tokio::test]
    async fn test_migrations_are_idempotent() {
        let pool = test_support::pool().await;
        run_migrations(&pool).await.unwrap();

        let tables: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name"
        )
            .fetch_all(&pool)
            .await
            .unwrap();
        let names: Vec<&str> = tables.iter().map(|t| t.0.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "audit_logs",
                "lab_report_values",
                "lab_reports",
                "plants",
                "product_parameters",
                "products",
                "sessions",
                "users",
            ]
        );
    }

    #[tokio::test]
    async fn test_decided_report_requires_approver() {
        let pool = test_support::pool().await;
        let fixture = test_support::catalog(&pool).await;
        let user = test_support::user(&pool, "tech01", crate::access::Role::LabAssistant).await;

        let result = sqlx::query(
            r#"INSERT INTO lab_reports (id, product_id, batch_no, submitted_by, submitted_at, status)
               VALUES ('r1', ?, 'B-1', ?, datetime('now'), 'approved')"#
        )
            .bind(&fixture.product.id)
            .bind(&user.id)
            .execute(&pool)
            .await;
        assert!(result.is_err());
    }
}
