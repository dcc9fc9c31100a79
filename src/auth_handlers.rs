// src/auth_handlers.rs - Sign-in, sign-out, navigation decisions and user management

use actix_web::{web, HttpRequest, HttpResponse};
use actix_web::http::header;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use chrono::Duration;
use validator::Validate;

use crate::access::{
    allowed_actions, authorize_navigation, default_landing_route, visible_routes, Action, Role, Route,
};
use crate::audit::{self, audit, log_activity, AuditAction, AuditQuery};
use crate::auth::{AuthService, CreateUserRequest, LoginRequest, LoginResponse, User, UserInfo};
use crate::error::{ApiError, ApiResult};
use crate::handlers::ApiResponse;
use crate::session::{Session, SessionContext};
use crate::AppState;

// ======== REQUEST/RESPONSE STRUCTS ========

#[derive(Debug, Deserialize)]
pub struct UpdateUserRequest {
    pub role: Option<Role>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct NavigationQuery {
    pub path: String,
}

#[derive(Debug, Serialize)]
pub struct NavigationResponse {
    pub path: String,
    pub decision: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<&'static str>,
}

#[derive(Debug, Serialize)]
pub struct RouteInfo {
    pub path: &'static str,
    pub title: &'static str,
}

impl From<Route> for RouteInfo {
    fn from(route: Route) -> Self {
        Self {
            path: route.path(),
            title: route.title(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ProfileResponse {
    pub user: UserInfo,
    pub landing_route: &'static str,
    pub routes: Vec<RouteInfo>,
    pub actions: Vec<Action>,
}

#[derive(Debug, Serialize)]
pub struct RoleInfo {
    pub id: Role,
    pub name: &'static str,
    pub description: &'static str,
    pub landing_route: &'static str,
    pub actions: Vec<Action>,
}

const INVALID_CREDENTIALS: &str = "Invalid username or password";

// ======== AUTH HANDLERS ========

pub async fn login(
    app_state: web::Data<Arc<AppState>>,
    auth_service: web::Data<Arc<AuthService>>,
    request: web::Json<LoginRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    request.validate()?;
    let pool = &app_state.db_pool;
    let auth_config = &app_state.config.auth;

    let mut user = match User::find_by_username(pool, &request.username).await {
        Ok(user) => user,
        Err(ApiError::NotFound(_)) => {
            if let Err(e) = log_activity(
                pool, None, AuditAction::LoginFailed, "user", None,
                Some(&format!("Unknown username '{}'", request.username)), Some(&http_request),
            ).await {
                log::error!("Failed to write audit log: {}", e);
            }
            return Err(ApiError::AuthError(INVALID_CREDENTIALS.to_string()));
        }
        Err(e) => return Err(e),
    };

    if !user.is_active {
        return Err(ApiError::AuthError("Account is disabled".to_string()));
    }

    if user.is_locked() {
        return Err(ApiError::AuthError("Account is temporarily locked. Try again later.".to_string()));
    }

    if !auth_service.verify_password(&request.password, &user.password_hash)? {
        user.increment_failed_attempts(pool).await?;
        audit(pool, &user.id, AuditAction::LoginFailed, "user", &user.id, "Wrong password", &http_request).await;

        if user.failed_login_attempts >= auth_config.max_login_attempts {
            user.lock_for_duration(pool, Duration::minutes(auth_config.lockout_duration_minutes)).await?;
            log::warn!("Locked account {} after {} failed attempts", user.username, user.failed_login_attempts);
            return Err(ApiError::AuthError(format!(
                "Account locked due to too many failed attempts. Try again in {} minutes.",
                auth_config.lockout_duration_minutes
            )));
        }

        return Err(ApiError::AuthError(INVALID_CREDENTIALS.to_string()));
    }

    user.reset_failed_attempts(pool).await?;
    user.update_last_login(pool).await?;

    let session = Session::open(pool, &user.id, auth_service.token_lifetime()).await?;
    let token = auth_service.generate_token(&user, &session)?;
    audit(pool, &user.id, AuditAction::Login, "session", &session.id, "Signed in", &http_request).await;

    log::info!("User {} ({}) logged in", user.username, user.role);

    let response = LoginResponse {
        token,
        expires_in: auth_service.token_lifetime().num_seconds(),
        landing_route: default_landing_route(user.role).path(),
        user: user.into(),
    };

    Ok(HttpResponse::Ok().json(ApiResponse::success_with_message(
        response,
        "Login successful".to_string(),
    )))
}

pub async fn logout(
    app_state: web::Data<Arc<AppState>>,
    ctx: SessionContext,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let pool = &app_state.db_pool;
    if Session::close(pool, &ctx.session_id).await? {
        audit(pool, ctx.user_id(), AuditAction::Logout, "session", &ctx.session_id, "Signed out", &http_request).await;
        log::info!("User {} logged out", ctx.principal.username);
    }

    Ok(HttpResponse::Ok().json(ApiResponse::message("Logged out")))
}

/// Trades a token on an open session for a fresh one. The old session is closed.
pub async fn refresh_token(
    app_state: web::Data<Arc<AppState>>,
    auth_service: web::Data<Arc<AuthService>>,
    ctx: SessionContext,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let pool = &app_state.db_pool;
    let user = User::find_by_id(pool, ctx.user_id()).await?;
    if !user.is_active {
        Session::close(pool, &ctx.session_id).await?;
        return Err(ApiError::AuthError("Account is disabled".to_string()));
    }

    let session = Session::rotate(pool, &ctx.session_id, &user.id, auth_service.token_lifetime())
        .await?
        .ok_or_else(|| ApiError::Unauthorized("Session is no longer active".to_string()))?;
    let token = auth_service.generate_token(&user, &session)?;
    audit(
        pool, &user.id, AuditAction::Refresh, "session", &session.id,
        &format!("Refreshed session {}", ctx.session_id), &http_request,
    ).await;

    let response = LoginResponse {
        token,
        expires_in: auth_service.token_lifetime().num_seconds(),
        landing_route: default_landing_route(user.role).path(),
        user: user.into(),
    };

    Ok(HttpResponse::Ok().json(ApiResponse::success_with_message(
        response,
        "Token refreshed".to_string(),
    )))
}

pub async fn get_profile(
    app_state: web::Data<Arc<AppState>>,
    ctx: SessionContext,
) -> ApiResult<HttpResponse> {
    let user = User::find_by_id(&app_state.db_pool, ctx.user_id()).await?;
    // Session role, not the stored one: role changes close the user's sessions.
    let role = ctx.role();

    let response = ProfileResponse {
        user: user.into(),
        landing_route: default_landing_route(role).path(),
        routes: visible_routes(role).into_iter().map(RouteInfo::from).collect(),
        actions: allowed_actions(role),
    };

    Ok(HttpResponse::Ok().json(ApiResponse::success(response)))
}

fn bearer_token(req: &HttpRequest) -> Option<&str> {
    req.headers()
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
}

/// Public: a missing or stale token is treated as no principal.
pub async fn navigation(
    app_state: web::Data<Arc<AppState>>,
    auth_service: web::Data<Arc<AuthService>>,
    query: web::Query<NavigationQuery>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let mut role = None;
    if let Some(Ok(claims)) = bearer_token(&http_request).map(|t| auth_service.verify_token(t)) {
        if Session::is_open(&app_state.db_pool, &claims.sid).await? {
            role = Some(claims.role);
        }
    }

    let decision = authorize_navigation(role, &query.path);
    let response = NavigationResponse {
        path: query.path.clone(),
        decision: decision.kind(),
        location: decision.location(),
    };

    Ok(HttpResponse::Ok().json(ApiResponse::success(response)))
}

// ======== USER MANAGEMENT ========

pub async fn get_users(
    app_state: web::Data<Arc<AppState>>,
    ctx: SessionContext,
) -> ApiResult<HttpResponse> {
    ctx.require(Action::ManageUsers)?;

    let users: Vec<UserInfo> = User::list(&app_state.db_pool)
        .await?
        .into_iter()
        .map(UserInfo::from)
        .collect();

    Ok(HttpResponse::Ok().json(ApiResponse::success(users)))
}

pub async fn create_user(
    app_state: web::Data<Arc<AppState>>,
    auth_service: web::Data<Arc<AuthService>>,
    ctx: SessionContext,
    request: web::Json<CreateUserRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    ctx.require(Action::ManageUsers)?;
    request.validate()?;
    crate::validator::FieldValidator::username(&request.username)
        .map_err(|e| ApiError::field("username", e))?;

    let user = User::create(&app_state.db_pool, request.into_inner(), &auth_service).await?;

    audit(
        &app_state.db_pool, ctx.user_id(), AuditAction::Create, "user", &user.id,
        &format!("Created user {} with role {}", user.username, user.role), &http_request,
    ).await;
    log::info!("User {} created by {}", user.username, ctx.principal.username);

    Ok(HttpResponse::Created().json(ApiResponse::success_with_message(
        UserInfo::from(user),
        "User created successfully".to_string(),
    )))
}

pub async fn update_user(
    app_state: web::Data<Arc<AppState>>,
    ctx: SessionContext,
    path: web::Path<String>,
    request: web::Json<UpdateUserRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    ctx.require(Action::ManageUsers)?;
    let user_id = path.into_inner();
    let pool = &app_state.db_pool;

    if user_id == ctx.user_id() {
        if matches!(request.role, Some(role) if role != ctx.role()) {
            return Err(ApiError::field("role", "You cannot change your own role"));
        }
        if request.is_active == Some(false) {
            return Err(ApiError::field("is_active", "You cannot deactivate your own account"));
        }
    }

    let before = User::find_by_id(pool, &user_id).await?;
    let user = User::update_role_and_status(pool, &user_id, request.role, request.is_active).await?;

    // Roles are fixed for the lifetime of a session.
    if user.role != before.role || !user.is_active {
        let closed = Session::close_all_for_user(pool, &user.id).await?;
        if closed > 0 {
            log::info!("Closed {} session(s) of {} after account change", closed, user.username);
        }
    }

    audit(
        pool, ctx.user_id(), AuditAction::Update, "user", &user.id,
        &format!("Role {} -> {}, active: {}", before.role, user.role, user.is_active), &http_request,
    ).await;

    Ok(HttpResponse::Ok().json(ApiResponse::success_with_message(
        UserInfo::from(user),
        "User updated successfully".to_string(),
    )))
}

pub async fn get_roles(ctx: SessionContext) -> ApiResult<HttpResponse> {
    ctx.require(Action::ManageUsers)?;

    let roles: Vec<RoleInfo> = Role::all()
        .into_iter()
        .map(|role| RoleInfo {
            id: role,
            name: role.display_name(),
            description: role.description(),
            landing_route: default_landing_route(role).path(),
            actions: allowed_actions(role),
        })
        .collect();

    Ok(HttpResponse::Ok().json(ApiResponse::success(roles)))
}

pub async fn get_audit_logs(
    app_state: web::Data<Arc<AppState>>,
    ctx: SessionContext,
    query: web::Query<AuditQuery>,
) -> ApiResult<HttpResponse> {
    ctx.require(Action::ViewAuditLog)?;
    let logs = audit::list(&app_state.db_pool, &query).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(logs)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{http::StatusCode, test, App};
    use serde_json::{json, Value};
    use crate::test_support;

    async fn seed_user(state: &AppState, svc: &AuthService, username: &str, role: Role) {
        User::create(
            &state.db_pool,
            CreateUserRequest {
                username: username.to_string(),
                password: "Sample123".to_string(),
                role,
            },
            svc,
        )
        .await
        .unwrap();
    }

    #[actix_rt::test]
    async fn test_login_me_logout_cycle() {
        let (state, svc) = test_support::app_state().await;
        seed_user(&state, &svc, "sup01", Role::Supervisor).await;
        let app = test::init_service(App::new().configure(|cfg| test_support::configure(cfg, &state, &svc))).await;

        let resp = test::call_service(
            &app,
            test::TestRequest::post()
                .uri("/auth/login")
                .set_json(json!({"username": "sup01", "password": "Sample123"}))
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["data"]["landing_route"], "/supervisor-dashboard");
        let token = body["data"]["token"].as_str().unwrap().to_string();
        let bearer = ("Authorization", format!("Bearer {}", token));

        let resp = test::call_service(
            &app,
            test::TestRequest::get().uri("/api/v1/auth/me").insert_header(bearer.clone()).to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["data"]["user"]["role"], "supervisor");
        assert_eq!(body["data"]["routes"].as_array().unwrap().len(), 6);

        let resp = test::call_service(
            &app,
            test::TestRequest::post().uri("/api/v1/auth/logout").insert_header(bearer.clone()).to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = test::call_service(
            &app,
            test::TestRequest::get().uri("/api/v1/auth/me").insert_header(bearer).to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[actix_rt::test]
    async fn test_repeated_failures_lock_account() {
        let (state, svc) = test_support::app_state().await;
        seed_user(&state, &svc, "tech01", Role::LabAssistant).await;
        let app = test::init_service(App::new().configure(|cfg| test_support::configure(cfg, &state, &svc))).await;

        let attempt = |password: &'static str| {
            test::TestRequest::post()
                .uri("/auth/login")
                .set_json(json!({"username": "tech01", "password": password}))
                .to_request()
        };

        for _ in 0..state.config.auth.max_login_attempts {
            let resp = test::call_service(&app, attempt("Wrong1234")).await;
            assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        }
        let resp = test::call_service(&app, attempt("Sample123")).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let user = User::find_by_username(&state.db_pool, "tech01").await.unwrap();
        assert!(user.is_locked());
    }

    #[actix_rt::test]
    async fn test_navigation_endpoint() {
        let (state, svc) = test_support::app_state().await;
        let app = test::init_service(App::new().configure(|cfg| test_support::configure(cfg, &state, &svc))).await;

        let resp = test::call_service(
            &app,
            test::TestRequest::get().uri("/auth/navigation?path=/approvals").to_request(),
        )
        .await;
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["data"]["decision"], "sign_in");
        assert_eq!(body["data"]["location"], "/sign-in");

        let resp = test::call_service(
            &app,
            test::TestRequest::get()
                .uri("/auth/navigation?path=/approvals")
                .insert_header(("Authorization", "Bearer garbage"))
                .to_request(),
        )
        .await;
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["data"]["decision"], "sign_in");
    }

    #[actix_rt::test]
    async fn test_role_change_ends_sessions() {
        let (state, svc) = test_support::app_state().await;
        seed_user(&state, &svc, "mgr01", Role::Manager).await;
        seed_user(&state, &svc, "tech01", Role::LabAssistant).await;
        let app = test::init_service(App::new().configure(|cfg| test_support::configure(cfg, &state, &svc))).await;

        let manager_token = test_support::token(&state, &svc, "mgr01").await;
        let tech_token = test_support::token(&state, &svc, "tech01").await;
        let tech = User::find_by_username(&state.db_pool, "tech01").await.unwrap();

        let resp = test::call_service(
            &app,
            test::TestRequest::put()
                .uri(&format!("/api/v1/auth/users/{}", tech.id))
                .insert_header(("Authorization", format!("Bearer {}", manager_token)))
                .set_json(json!({"role": "supervisor"}))
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = test::call_service(
            &app,
            test::TestRequest::get()
                .uri("/api/v1/auth/me")
                .insert_header(("Authorization", format!("Bearer {}", tech_token)))
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[actix_rt::test]
    async fn test_user_management_is_manager_only() {
        let (state, svc) = test_support::app_state().await;
        seed_user(&state, &svc, "sup01", Role::Supervisor).await;
        let app = test::init_service(App::new().configure(|cfg| test_support::configure(cfg, &state, &svc))).await;
        let token = test_support::token(&state, &svc, "sup01").await;

        let resp = test::call_service(
            &app,
            test::TestRequest::get()
                .uri("/api/v1/auth/users")
                .insert_header(("Authorization", format!("Bearer {}", token)))
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);

        let resp = test::call_service(
            &app,
            test::TestRequest::get()
                .uri("/api/v1/audit")
                .insert_header(("Authorization", format!("Bearer {}", token)))
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[actix_rt::test]
    async fn test_audit_trail_records_sign_in() {
        let (state, svc) = test_support::app_state().await;
        seed_user(&state, &svc, "mgr01", Role::Manager).await;
        let app = test::init_service(App::new().configure(|cfg| test_support::configure(cfg, &state, &svc))).await;

        let resp = test::call_service(
            &app,
            test::TestRequest::post()
                .uri("/auth/login")
                .set_json(json!({"username": "mgr01", "password": "Sample123"}))
                .to_request(),
        )
        .await;
        let body: Value = test::read_body_json(resp).await;
        let token = body["data"]["token"].as_str().unwrap().to_string();

        let resp = test::call_service(
            &app,
            test::TestRequest::get()
                .uri("/api/v1/audit?entity_type=session")
                .insert_header(("Authorization", format!("Bearer {}", token)))
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["data"][0]["action"], "LOGIN");
        assert_eq!(body["data"][0]["username"], "mgr01");
    }

    #[actix_rt::test]
    async fn test_refresh_rotates_the_session() {
        let (state, svc) = test_support::app_state().await;
        seed_user(&state, &svc, "sup01", Role::Supervisor).await;
        let old = test_support::token(&state, &svc, "sup01").await;
        let app = test::init_service(App::new().configure(|cfg| test_support::configure(cfg, &state, &svc))).await;

        let refresh = |token: &str| {
            test::TestRequest::post()
                .uri("/api/v1/auth/refresh")
                .insert_header(("Authorization", format!("Bearer {}", token)))
                .to_request()
        };
        let me = |token: &str| {
            test::TestRequest::get()
                .uri("/api/v1/auth/me")
                .insert_header(("Authorization", format!("Bearer {}", token)))
                .to_request()
        };

        let resp = test::call_service(&app, refresh(&old)).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body: Value = test::read_body_json(resp).await;
        let fresh = body["data"]["token"].as_str().unwrap().to_string();
        assert_ne!(fresh, old);
        assert_eq!(body["data"]["landing_route"], "/supervisor-dashboard");
        assert_eq!(body["data"]["user"]["username"], "sup01");

        let resp = test::call_service(&app, me(&fresh)).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = test::call_service(&app, me(&old)).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        let resp = test::call_service(&app, refresh(&old)).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        // Signing out ends the refreshed session too.
        let resp = test::call_service(
            &app,
            test::TestRequest::post()
                .uri("/api/v1/auth/logout")
                .insert_header(("Authorization", format!("Bearer {}", fresh)))
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
        let resp = test::call_service(&app, refresh(&fresh)).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[actix_rt::test]
    async fn test_unknown_username_is_audited() {
        let (state, svc) = test_support::app_state().await;
        let app = test::init_service(App::new().configure(|cfg| test_support::configure(cfg, &state, &svc))).await;

        let resp = test::call_service(
            &app,
            test::TestRequest::post()
                .uri("/auth/login")
                .set_json(json!({"username": "ghost01", "password": "Sample123"}))
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let entries = audit::list(&state.db_pool, &AuditQuery::default()).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].action, "LOGIN_FAILED");
        assert!(entries[0].user_id.is_none());
        assert_eq!(entries[0].description.as_deref(), Some("Unknown username 'ghost01'"));
    }
}
