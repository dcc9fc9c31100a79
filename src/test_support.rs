// src/test_support.rs - Fixtures shared by the in-module test suites

use actix_web::web;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use std::sync::Arc;

use crate::access::Role;
use crate::auth::{AuthService, User};
use crate::config::Config;
use crate::models::{
    CreateParameterRequest, CreateProductRequest, LabReport, NewLabReport, NewReportValue, ParameterType, Plant,
    Product, ProductParameter,
};
use crate::monitoring::Metrics;
use crate::repositories::{ReportStore, SqliteReportStore};
use crate::session::Session;
use crate::AppState;

/// A fresh in-memory database. One connection, so every query sees the same memory db.
pub async fn pool() -> SqlitePool {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")
        .unwrap()
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .unwrap();
    crate::db::run_migrations(&pool).await.unwrap();
    pool
}

/// Application state over a fresh database, with a cheap bcrypt cost.
pub async fn app_state() -> (Arc<AppState>, Arc<AuthService>) {
    let pool = pool().await;
    let mut config = Config::default();
    config.auth.bcrypt_cost = 4;

    let auth_service = Arc::new(AuthService::new(&config.auth));
    let state = Arc::new(AppState {
        db_pool: pool.clone(),
        config,
        reports: Arc::new(SqliteReportStore::new(pool)),
    });
    (state, auth_service)
}

/// Registers the production routes with the same app data `main` provides.
pub fn configure(cfg: &mut web::ServiceConfig, state: &Arc<AppState>, auth_service: &Arc<AuthService>) {
    cfg.app_data(web::Data::new(state.clone()))
        .app_data(web::Data::new(auth_service.clone()))
        .app_data(web::Data::new(state.db_pool.clone()))
        .app_data(web::Data::new(Arc::new(Metrics::new())));
    crate::configure_routes(cfg, state.config.security.max_request_size);
}

/// Signs `username` in without going through the login endpoint.
pub async fn token(state: &AppState, auth_service: &AuthService, username: &str) -> String {
    let user = User::find_by_username(&state.db_pool, username).await.unwrap();
    let session = Session::open(&state.db_pool, &user.id, auth_service.token_lifetime())
        .await
        .unwrap();
    auth_service.generate_token(&user, &session).unwrap()
}

/// Inserts a user without going through bcrypt.
pub async fn user(pool: &SqlitePool, username: &str, role: Role) -> User {
    User::insert(pool, username, "$2b$04$fixturefixturefixturefixtureu", role)
        .await
        .unwrap()
}

pub struct CatalogFixture {
    pub product: Product,
    pub purity: ProductParameter,
    pub appearance: ProductParameter,
    pub grade: ProductParameter,
    pub sterile: ProductParameter,
}

/// A product with one parameter of each type; purity (number, 98.5..=100) and grade are required.
pub async fn catalog(pool: &SqlitePool) -> CatalogFixture {
    let plant = Plant::create(pool, "Plant 1").await.unwrap();
    let product = Product::create(
        pool,
        CreateProductRequest {
            product_code: "UREA-46".to_string(),
            name: "Urea".to_string(),
            plant_id: plant.id.clone(),
        },
    )
    .await
    .unwrap();

    let param = |name: &str, kind: ParameterType, required: bool| CreateParameterRequest {
        product_id: product.id.clone(),
        name: name.to_string(),
        param_type: kind,
        unit: None,
        required,
        min_value: None,
        max_value: None,
        options: None,
    };

    let purity = ProductParameter::create(
        pool,
        CreateParameterRequest {
            unit: Some("%".to_string()),
            min_value: Some(98.5),
            max_value: Some(100.0),
            ..param("Purity", ParameterType::Number, true)
        },
    )
    .await
    .unwrap();
    let appearance = ProductParameter::create(pool, param("Appearance", ParameterType::Text, false))
        .await
        .unwrap();
    let grade = ProductParameter::create(
        pool,
        CreateParameterRequest {
            options: Some(vec!["A".to_string(), "B".to_string()]),
            ..param("Grade", ParameterType::Dropdown, true)
        },
    )
    .await
    .unwrap();
    let sterile = ProductParameter::create(pool, param("Sterile", ParameterType::Boolean, false))
        .await
        .unwrap();

    CatalogFixture {
        product,
        purity,
        appearance,
        grade,
        sterile,
    }
}

/// A pending report on the catalog fixture with purity and grade recorded.
pub async fn report(pool: &SqlitePool, fixture: &CatalogFixture, batch_no: &str) -> LabReport {
    let submitter = user(pool, &format!("tech-{}", batch_no), Role::LabAssistant).await;
    SqliteReportStore::new(pool.clone())
        .create(NewLabReport {
            product_id: fixture.product.id.clone(),
            batch_no: batch_no.to_string(),
            submitted_by: submitter.id,
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
        })
        .await
        .unwrap()
}
