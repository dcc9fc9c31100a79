// src/catalog_handlers.rs
//! Plants, products and the parameter definitions lab reports are checked against.
//! Every role may read the catalog; only managers change it.

use actix_web::{web, HttpRequest, HttpResponse};
use std::sync::Arc;
use validator::Validate;

use crate::access::Action;
use crate::audit::{audit, AuditAction};
use crate::error::{ApiError, ApiResult};
use crate::handlers::ApiResponse;
use crate::models::{
    CreateParameterRequest, CreatePlantRequest, CreateProductRequest, ParameterQuery, Plant, Product,
    ProductParameter, ProductQuery, UpdateParameterRequest, UpdateProductRequest,
};
use crate::session::SessionContext;
use crate::AppState;

// ==================== PLANTS ====================

pub async fn get_plants(
    app_state: web::Data<Arc<AppState>>,
    ctx: SessionContext,
) -> ApiResult<HttpResponse> {
    ctx.require(Action::ViewCatalog)?;
    let plants = Plant::list(&app_state.db_pool).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(plants)))
}

pub async fn create_plant(
    app_state: web::Data<Arc<AppState>>,
    ctx: SessionContext,
    request: web::Json<CreatePlantRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    ctx.require(Action::ManageCatalog)?;
    request.validate()?;

    let plant = Plant::create(&app_state.db_pool, &request.name).await?;
    audit(
        &app_state.db_pool, ctx.user_id(), AuditAction::Create, "plant", &plant.id,
        &format!("Created plant {}", plant.name), &http_request,
    ).await;

    Ok(HttpResponse::Created().json(ApiResponse::success(plant)))
}

pub async fn delete_plant(
    app_state: web::Data<Arc<AppState>>,
    ctx: SessionContext,
    path: web::Path<String>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    ctx.require(Action::ManageCatalog)?;
    let plant_id = path.into_inner();

    Plant::delete(&app_state.db_pool, &plant_id).await?;
    audit(
        &app_state.db_pool, ctx.user_id(), AuditAction::Delete, "plant", &plant_id,
        "Deleted plant", &http_request,
    ).await;

    Ok(HttpResponse::Ok().json(ApiResponse::message("Plant deleted")))
}

// ==================== PRODUCTS ====================

pub async fn get_products(
    app_state: web::Data<Arc<AppState>>,
    ctx: SessionContext,
    query: web::Query<ProductQuery>,
) -> ApiResult<HttpResponse> {
    ctx.require(Action::ViewCatalog)?;
    let products = Product::list(&app_state.db_pool, query.plant_id.as_deref()).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(products)))
}

pub async fn get_product(
    app_state: web::Data<Arc<AppState>>,
    ctx: SessionContext,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    ctx.require(Action::ViewCatalog)?;
    let product_id = path.into_inner();
    let product = Product::find_by_id(&app_state.db_pool, &product_id)
        .await?
        .ok_or_else(|| ApiError::product_not_found(&product_id))?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(product)))
}

pub async fn get_product_parameters(
    app_state: web::Data<Arc<AppState>>,
    ctx: SessionContext,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    ctx.require(Action::ViewCatalog)?;
    let product_id = path.into_inner();
    let parameters = app_state
        .reports
        .product_parameters(&product_id)
        .await?
        .ok_or_else(|| ApiError::product_not_found(&product_id))?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(parameters)))
}

pub async fn create_product(
    app_state: web::Data<Arc<AppState>>,
    ctx: SessionContext,
    request: web::Json<CreateProductRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    ctx.require(Action::ManageCatalog)?;
    request.validate()?;

    let product = Product::create(&app_state.db_pool, request.into_inner()).await?;
    audit(
        &app_state.db_pool, ctx.user_id(), AuditAction::Create, "product", &product.id,
        &format!("Created product {} ({})", product.name, product.product_code), &http_request,
    ).await;

    Ok(HttpResponse::Created().json(ApiResponse::success(product)))
}

pub async fn update_product(
    app_state: web::Data<Arc<AppState>>,
    ctx: SessionContext,
    path: web::Path<String>,
    request: web::Json<UpdateProductRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    ctx.require(Action::ManageCatalog)?;
    request.validate()?;
    let product_id = path.into_inner();

    let product = Product::update(&app_state.db_pool, &product_id, request.into_inner()).await?;
    audit(
        &app_state.db_pool, ctx.user_id(), AuditAction::Update, "product", &product.id,
        &format!("Updated product {}", product.product_code), &http_request,
    ).await;

    Ok(HttpResponse::Ok().json(ApiResponse::success(product)))
}

pub async fn delete_product(
    app_state: web::Data<Arc<AppState>>,
    ctx: SessionContext,
    path: web::Path<String>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    ctx.require(Action::ManageCatalog)?;
    let product_id = path.into_inner();

    Product::delete(&app_state.db_pool, &product_id).await?;
    audit(
        &app_state.db_pool, ctx.user_id(), AuditAction::Delete, "product", &product_id,
        "Deleted product and its parameters", &http_request,
    ).await;

    Ok(HttpResponse::Ok().json(ApiResponse::message("Product deleted")))
}

// ==================== PARAMETERS ====================

pub async fn get_parameters(
    app_state: web::Data<Arc<AppState>>,
    ctx: SessionContext,
    query: web::Query<ParameterQuery>,
) -> ApiResult<HttpResponse> {
    ctx.require(Action::ViewCatalog)?;
    let parameters = match query.product_id.as_deref() {
        Some(product_id) => ProductParameter::list_for_product(&app_state.db_pool, product_id).await?,
        None => ProductParameter::list_all(&app_state.db_pool).await?,
    };
    Ok(HttpResponse::Ok().json(ApiResponse::success(parameters)))
}

pub async fn create_parameter(
    app_state: web::Data<Arc<AppState>>,
    ctx: SessionContext,
    request: web::Json<CreateParameterRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    ctx.require(Action::ManageCatalog)?;

    let parameter = ProductParameter::create(&app_state.db_pool, request.into_inner()).await?;
    audit(
        &app_state.db_pool, ctx.user_id(), AuditAction::Create, "product_parameter", &parameter.id,
        &format!("Added {} parameter {}", parameter.param_type, parameter.name), &http_request,
    ).await;

    Ok(HttpResponse::Created().json(ApiResponse::success(parameter)))
}

pub async fn update_parameter(
    app_state: web::Data<Arc<AppState>>,
    ctx: SessionContext,
    path: web::Path<String>,
    request: web::Json<UpdateParameterRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    ctx.require(Action::ManageCatalog)?;
    let parameter_id = path.into_inner();

    let parameter = ProductParameter::update(&app_state.db_pool, &parameter_id, request.into_inner()).await?;
    audit(
        &app_state.db_pool, ctx.user_id(), AuditAction::Update, "product_parameter", &parameter.id,
        &format!("Updated parameter {}", parameter.name), &http_request,
    ).await;

    Ok(HttpResponse::Ok().json(ApiResponse::success(parameter)))
}

pub async fn delete_parameter(
    app_state: web::Data<Arc<AppState>>,
    ctx: SessionContext,
    path: web::Path<String>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    ctx.require(Action::ManageCatalog)?;
    let parameter_id = path.into_inner();

    ProductParameter::delete(&app_state.db_pool, &parameter_id).await?;
    audit(
        &app_state.db_pool, ctx.user_id(), AuditAction::Delete, "product_parameter", &parameter_id,
        "Deleted parameter", &http_request,
    ).await;

    Ok(HttpResponse::Ok().json(ApiResponse::message("Parameter deleted")))
}
