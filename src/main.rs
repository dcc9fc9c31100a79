// Lab portal server: role-gated catalog, lab report submission and approval
use actix_web::{
    middleware::{Compress, DefaultHeaders, Logger},
    web, App, HttpServer,
};
use actix_web_httpauth::middleware::HttpAuthentication;
use actix_web::http::header;
use actix_cors::Cors;
use anyhow::Context;
use rand::seq::SliceRandom;
use rand::{thread_rng, Rng, distributions::Alphanumeric};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::env;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod access;
mod audit;
mod auth;
mod auth_handlers;
mod catalog_handlers;
mod config;
mod db;
mod error;
mod handlers;
mod models;
mod monitoring;
mod report_handlers;
mod repositories;
mod session;
mod validator;
mod workflow;
#[cfg(test)]
mod test_support;

use crate::access::Role;
use crate::auth::{jwt_middleware, AuthService, CreateUserRequest, User};
use crate::config::{generate_jwt_secret, load_config, AuthConfig, Config};
use crate::error::ApiError;
use crate::monitoring::{start_maintenance_tasks, Metrics, RequestLogger};
use crate::repositories::{ReportStore, SqliteReportStore};

pub struct AppState {
    pub db_pool: SqlitePool,
    pub config: Config,
    pub reports: Arc<dyn ReportStore>,
}

// ==================== ROUTES ====================

pub fn configure_routes(cfg: &mut web::ServiceConfig, max_request_size: usize) {
    let auth_middleware = HttpAuthentication::bearer(jwt_middleware);

    cfg.app_data(
        web::JsonConfig::default()
            .limit(max_request_size)
            .error_handler(|err, _| ApiError::BadRequest(err.to_string()).into()),
    )
    .app_data(
        web::QueryConfig::default()
            .error_handler(|err, _| ApiError::BadRequest(err.to_string()).into()),
    )
    // Health check and metrics (no auth)
    .service(
        web::scope("/health")
            .route("", web::get().to(monitoring::health_check))
            .route("/metrics", web::get().to(monitoring::metrics_endpoint)),
    )
    // Sign-in and route decisions (no authentication required)
    .service(
        web::scope("/auth")
            .route("/login", web::post().to(auth_handlers::login))
            .route("/navigation", web::get().to(auth_handlers::navigation)),
    )
    .service(
        web::scope("/api/v1")
            .wrap(auth_middleware)
            .service(
                web::scope("/auth")
                    .route("/me", web::get().to(auth_handlers::get_profile))
                    .route("/logout", web::post().to(auth_handlers::logout))
                    .route("/refresh", web::post().to(auth_handlers::refresh_token))
                    .route("/roles", web::get().to(auth_handlers::get_roles))
                    .route("/users", web::get().to(auth_handlers::get_users))
                    .route("/users", web::post().to(auth_handlers::create_user))
                    .route("/users/{id}", web::put().to(auth_handlers::update_user)),
            )
            .service(
                web::scope("/plants")
                    .route("", web::get().to(catalog_handlers::get_plants))
                    .route("", web::post().to(catalog_handlers::create_plant))
                    .route("/{id}", web::delete().to(catalog_handlers::delete_plant)),
            )
            .service(
                web::scope("/products")
                    .route("", web::get().to(catalog_handlers::get_products))
                    .route("", web::post().to(catalog_handlers::create_product))
                    .route("/{id}", web::get().to(catalog_handlers::get_product))
                    .route("/{id}", web::patch().to(catalog_handlers::update_product))
                    .route("/{id}", web::delete().to(catalog_handlers::delete_product))
                    .route("/{id}/parameters", web::get().to(catalog_handlers::get_product_parameters)),
            )
            .service(
                web::scope("/parameters")
                    .route("", web::get().to(catalog_handlers::get_parameters))
                    .route("", web::post().to(catalog_handlers::create_parameter))
                    .route("/{id}", web::patch().to(catalog_handlers::update_parameter))
                    .route("/{id}", web::delete().to(catalog_handlers::delete_parameter)),
            )
            .service(
                web::scope("/lab-reports")
                    .route("", web::get().to(report_handlers::get_reports))
                    .route("", web::post().to(report_handlers::submit_report))
                    .route("/stats", web::get().to(report_handlers::get_report_stats))
                    .route("/{id}", web::get().to(report_handlers::get_report))
                    .route("/{id}", web::patch().to(report_handlers::decide_report)),
            )
            .route("/audit", web::get().to(auth_handlers::get_audit_logs)),
    )
    .default_service(web::route().to(handlers::not_found));
}

// ==================== MAIN ====================

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let mut config = load_config()?;
    setup_logging(&config)?;

    if config.auth.jwt_secret == AuthConfig::default().jwt_secret {
        if config.is_production() {
            anyhow::bail!("JWT_SECRET must be set in production");
        }
        log::warn!("JWT_SECRET not set; using a random secret, tokens will not survive a restart");
        config.auth.jwt_secret = generate_jwt_secret();
    }
    config.print_startup_info();

    let pool = create_database_pool(&config.database).await?;
    db::run_migrations(&pool).await?;

    let auth_service = Arc::new(AuthService::new(&config.auth));
    create_default_manager_if_needed(&pool, &auth_service).await?;

    start_maintenance_tasks(pool.clone(), config.maintenance.clone());

    let app_state = Arc::new(AppState {
        db_pool: pool.clone(),
        config: config.clone(),
        reports: Arc::new(SqliteReportStore::new(pool.clone())),
    });

    let bind_address = format!("{}:{}", config.server.host, config.server.port);
    log::info!("Starting server at http://{}", bind_address);

    let metrics_arc = Arc::new(Metrics::new());
    let keep_alive = Duration::from_secs(config.server.keep_alive);
    let workers = config.server.workers;

    let mut server = HttpServer::new(move || {
        let cors = setup_cors(&config.security.allowed_origins, config.is_production());
        let security_headers = setup_security_headers(&config.security);
        let max_request_size = config.security.max_request_size;

        App::new()
            .wrap(cors)
            .wrap(security_headers)
            .wrap(Logger::default())
            .wrap(Compress::default())
            .wrap(RequestLogger::new(metrics_arc.clone()))
            .app_data(web::Data::new(app_state.clone()))
            .app_data(web::Data::new(auth_service.clone()))
            .app_data(web::Data::new(pool.clone()))
            .app_data(web::Data::new(metrics_arc.clone()))
            .configure(|cfg| configure_routes(cfg, max_request_size))
    })
        .keep_alive(keep_alive);

    if let Some(workers) = workers {
        server = server.workers(workers);
    }

    server
        .bind(&bind_address)?
        .run()
        .await
        .context("Server failed to run")?;

    Ok(())
}

// ==================== HELPER FUNCTIONS ====================

fn setup_cors(allowed_origins: &[String], is_production: bool) -> Cors {
    let mut cors = Cors::default()
        .allowed_methods(vec!["GET", "POST", "PUT", "PATCH", "DELETE", "OPTIONS"])
        .allowed_headers(vec![
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            header::ACCEPT,
        ])
        .expose_headers(vec![header::CONTENT_LENGTH])
        .max_age(3600);

    // Wildcards are refused in production by Config::validate.
    if !is_production && allowed_origins.iter().any(|o| o == "*") {
        log::warn!("Using wildcard CORS (*) in development mode");
        return cors.allow_any_origin();
    }

    for origin in allowed_origins.iter().filter(|o| !o.is_empty() && o.as_str() != "*") {
        cors = cors.allowed_origin(origin);
    }
    cors
}

fn setup_logging(config: &Config) -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.logging.level.as_str()));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .context("Failed to initialise logging")?;

    Ok(())
}

async fn create_database_pool(db_config: &config::DatabaseConfig) -> anyhow::Result<SqlitePool> {
    let options = SqliteConnectOptions::new()
        .filename(&db_config.url)
        .create_if_missing(true)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(db_config.max_connections)
        .min_connections(db_config.min_connections)
        .acquire_timeout(Duration::from_secs(db_config.connect_timeout))
        .connect_with(options)
        .await
        .with_context(|| format!("Failed to open database {}", db_config.url))?;

    Ok(pool)
}

fn setup_security_headers(config: &config::SecurityConfig) -> DefaultHeaders {
    let mut headers = DefaultHeaders::new()
        .add(("X-Content-Type-Options", "nosniff"))
        .add(("X-Frame-Options", "DENY"))
        .add(("Referrer-Policy", "strict-origin-when-cross-origin"));

    if config.require_https {
        headers = headers.add((
            "Strict-Transport-Security",
            "max-age=31536000; includeSubDomains; preload",
        ));
    }

    headers
}

/// Creates the first manager account on an empty database.
async fn create_default_manager_if_needed(
    pool: &SqlitePool,
    auth_service: &AuthService,
) -> anyhow::Result<()> {
    if User::count(pool).await.map_err(|e| anyhow::anyhow!("{}", e))? > 0 {
        return Ok(());
    }

    let (password, generated) = match env::var("DEFAULT_MANAGER_PASSWORD") {
        Ok(password) => (password, false),
        Err(_) => (generate_password(), true),
    };

    let request = CreateUserRequest {
        username: "manager".to_string(),
        password: password.clone(),
        role: Role::Manager,
    };
    User::create(pool, request, auth_service)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create default manager: {}", e))?;

    log::warn!("Default manager account created:");
    log::warn!("  Username: manager");
    if generated {
        log::warn!("  Password: {} (generated, change it after first sign-in)", password);
    }

    Ok(())
}

/// Sixteen characters with at least one digit, one upper and one lower case letter.
fn generate_password() -> String {
    let mut rng = thread_rng();
    let mut chars: Vec<char> = vec![
        char::from(rng.gen_range(b'0'..=b'9')),
        char::from(rng.gen_range(b'A'..=b'Z')),
        char::from(rng.gen_range(b'a'..=b'z')),
    ];
    chars.extend((&mut rng).sample_iter(&Alphanumeric).take(13).map(char::from));
    chars.shuffle(&mut rng);
    chars.into_iter().collect()
}
