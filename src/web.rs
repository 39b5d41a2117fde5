//! HTTP surface: login, users, products and the stock report, plus the
//! group/permission routes from [`crate::authz::web`]. Everything except
//! `/login` and `/healthz` passes through `authenticate` and then
//! `authorize`.
use crate::authz::{self, Enforcer};
use crate::errors::AppError;
use crate::settings::Settings;
use crate::storage::{self, NewProduct, ProductPatch};
use crate::token::{Claims, TokenIssuer};
use axum::extract::{Path, Request, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, patch, post};
use axum::{Extension, Json, Router};
use miette::IntoDiagnostic;
use sea_orm::DatabaseConnection;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

const BEARER_PREFIX: &str = "Bearer ";

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub db: DatabaseConnection,
    pub enforcer: Enforcer,
    pub tokens: TokenIssuer,
}

impl AppState {
    pub fn new(settings: Settings, db: DatabaseConnection, enforcer: Enforcer) -> Self {
        let tokens = TokenIssuer::new(&settings.auth);
        Self {
            settings: Arc::new(settings),
            db,
            enforcer,
            tokens,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TokenResponse {
    pub token: String,
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UserResponse {
    pub id: i32,
    pub username: String,
    pub groups: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UserGroupsResponse {
    pub username: String,
    pub groups: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct StockRequest {
    pub quantity: i32,
    pub reason: Option<String>,
}

pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/users", post(register_user))
        .route("/users/me", get(current_user))
        .route("/users/{username}", get(get_user).delete(delete_user))
        .route("/users/{username}/groups", get(user_groups))
        .route("/products", get(list_products).post(create_product))
        .route(
            "/products/{product_id}",
            get(get_product).patch(update_product).delete(delete_product),
        )
        .route("/products/{product_id}/stocks/in", patch(add_stock))
        .route("/products/{product_id}/stocks/out", patch(remove_stock))
        .route("/reports/products", get(products_report))
        .merge(authz::web::router(state.enforcer.clone()))
        // layers run outermost-last: authenticate, then authorize
        .route_layer(middleware::from_fn_with_state(state.clone(), authorize))
        .route_layer(middleware::from_fn_with_state(state.clone(), authenticate));

    Router::new()
        .route("/login", post(login))
        .route("/healthz", get(health))
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(state: AppState) -> miette::Result<()> {
    let addr: SocketAddr = state
        .settings
        .listen_addr()
        .parse()
        .map_err(|e| miette::miette!("bad listen addr: {e}"))?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .into_diagnostic()?;
    tracing::info!(%addr, "Inventory API listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .into_diagnostic()?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}

/// Token from the `Authorization` header, with or without the `Bearer ` prefix.
fn extract_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?.trim();
    let token = value.strip_prefix(BEARER_PREFIX).unwrap_or(value).trim();
    (!token.is_empty()).then_some(token)
}

async fn authenticate(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = extract_token(request.headers())
        .ok_or_else(|| AppError::Unauthorized("No token provided".into()))?;
    let claims = state.tokens.verify(token).map_err(|e| {
        tracing::debug!(error = %e, "Rejected token");
        AppError::Unauthorized("Invalid token".into())
    })?;

    request.extensions_mut().insert(claims);
    Ok(next.run(request).await)
}

async fn authorize(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let claims = request
        .extensions()
        .get::<Claims>()
        .ok_or_else(|| AppError::Unauthorized("Unauthorized".into()))?;
    let path = request.uri().path();
    let method = request.method().as_str();

    if !state.enforcer.enforce(claims.username(), path, method) {
        tracing::info!(user = claims.username(), path, method, "Permission denied");
        return Err(AppError::Forbidden("Permission denied".into()));
    }
    Ok(next.run(request).await)
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<TokenResponse>, AppError> {
    let user = storage::verify_user_password(&state.db, &req.username, &req.password)
        .await?
        .ok_or_else(|| AppError::Unauthorized("Invalid username or password".into()))?;

    let token = state.tokens.issue(&user.username, user.id)?;
    tracing::info!(username = %user.username, "User logged in");
    Ok(Json(TokenResponse { token }))
}

// ---------- users ----------

async fn register_user(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, AppError> {
    let user = storage::create_user(&state.db, &req.username, &req.password).await?;
    tracing::info!(username = %user.username, "Registered user");
    Ok((
        StatusCode::CREATED,
        Json(UserResponse {
            id: user.id,
            username: user.username,
            groups: Vec::new(),
        }),
    ))
}

async fn user_info(state: &AppState, username: &str) -> Result<UserResponse, AppError> {
    let user = storage::get_user_by_username(&state.db, username)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".into()))?;
    let groups = state.enforcer.roles_of(&user.username);
    Ok(UserResponse {
        id: user.id,
        username: user.username,
        groups,
    })
}

async fn current_user(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<UserResponse>, AppError> {
    Ok(Json(user_info(&state, claims.username()).await?))
}

async fn get_user(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> Result<Json<UserResponse>, AppError> {
    Ok(Json(user_info(&state, &username).await?))
}

async fn delete_user(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> Result<StatusCode, AppError> {
    if storage::get_user_by_username(&state.db, &username)
        .await?
        .is_none()
    {
        return Err(AppError::NotFound("User not found".into()));
    }

    // revoke access before the account row goes
    state.enforcer.mutator().delete_principal(&username)?;
    storage::soft_delete_user(&state.db, &username).await?;

    tracing::info!(username = %username, "Deleted user");
    Ok(StatusCode::NO_CONTENT)
}

async fn user_groups(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> Json<UserGroupsResponse> {
    let groups = state.enforcer.implicit_roles_of(&username);
    Json(UserGroupsResponse { username, groups })
}

// ---------- products ----------

async fn list_products(
    State(state): State<AppState>,
) -> Result<Json<Vec<storage::Product>>, AppError> {
    Ok(Json(storage::list_products(&state.db).await?))
}

async fn create_product(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<NewProduct>,
) -> Result<impl IntoResponse, AppError> {
    let product = storage::create_product(&state.db, req, claims.uid).await?;
    Ok((StatusCode::CREATED, Json(product)))
}

async fn get_product(
    State(state): State<AppState>,
    Path(product_id): Path<i32>,
) -> Result<Json<storage::Product>, AppError> {
    let product = storage::get_product(&state.db, product_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Product not found".into()))?;
    Ok(Json(product))
}

async fn update_product(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(product_id): Path<i32>,
    Json(req): Json<ProductPatch>,
) -> Result<Json<storage::Product>, AppError> {
    Ok(Json(
        storage::update_product(&state.db, product_id, req, claims.uid).await?,
    ))
}

async fn delete_product(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(product_id): Path<i32>,
) -> Result<StatusCode, AppError> {
    storage::delete_product(&state.db, product_id, claims.uid).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn add_stock(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(product_id): Path<i32>,
    Json(req): Json<StockRequest>,
) -> Result<Json<storage::Product>, AppError> {
    let quantity = positive_quantity(&req)?;
    Ok(Json(
        storage::adjust_stock(&state.db, product_id, quantity, req.reason, claims.uid).await?,
    ))
}

async fn remove_stock(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(product_id): Path<i32>,
    Json(req): Json<StockRequest>,
) -> Result<Json<storage::Product>, AppError> {
    let quantity = positive_quantity(&req)?;
    Ok(Json(
        storage::adjust_stock(&state.db, product_id, -quantity, req.reason, claims.uid).await?,
    ))
}

fn positive_quantity(req: &StockRequest) -> Result<i32, AppError> {
    if req.quantity <= 0 {
        return Err(AppError::BadRequest("Quantity must be positive".into()));
    }
    Ok(req.quantity)
}

async fn products_report(
    State(state): State<AppState>,
) -> Result<Json<Vec<storage::OperationReport>>, AppError> {
    Ok(Json(storage::products_report(&state.db).await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_extract_token() {
        let mut headers = HeaderMap::new();
        assert_eq!(extract_token(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc.def"));
        assert_eq!(extract_token(&headers), Some("abc.def"));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("abc.def"));
        assert_eq!(extract_token(&headers), Some("abc.def"));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert_eq!(extract_token(&headers), None);
    }
}
