use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router};

use crate::authz::types::{CheckRequest, MessageResponse, PermissionRequest, PolicyView};
use crate::authz::Enforcer;
use crate::errors::AppError;

/// Group and permission administration. Callers layer authentication and
/// authorization on top.
pub fn router<S>(enforcer: Enforcer) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    Router::new()
        .route(
            "/groups/{group}/users/{user}",
            post(add_user_to_group).delete(remove_user_from_group),
        )
        .route("/groups/{group}/users", get(group_users))
        .route("/groups/{group}", delete(delete_group))
        .route("/permissions", get(list_permissions).post(grant_permission))
        .route("/permissions/check", post(check_permission))
        .route("/permissions/reload", post(reload_policies))
        .route("/permissions/{name}", delete(delete_permissions))
        .with_state(enforcer)
}

async fn add_user_to_group(
    State(enforcer): State<Enforcer>,
    Path((group, user)): Path<(String, String)>,
) -> Result<impl IntoResponse, AppError> {
    enforcer.mutator().add_grouping(&user, &group)?;
    tracing::info!(user = %user, group = %group, "Added user to group");
    Ok((
        StatusCode::CREATED,
        Json(MessageResponse::new("User successfully added to group")),
    ))
}

async fn remove_user_from_group(
    State(enforcer): State<Enforcer>,
    Path((group, user)): Path<(String, String)>,
) -> Result<impl IntoResponse, AppError> {
    if !enforcer.mutator().remove_grouping(&user, &group)? {
        return Err(AppError::NotFound(
            "User is not in the specified group".into(),
        ));
    }
    tracing::info!(user = %user, group = %group, "Removed user from group");
    Ok(Json(MessageResponse::new(
        "User successfully removed from group",
    )))
}

async fn group_users(
    State(enforcer): State<Enforcer>,
    Path(group): Path<String>,
) -> Json<Vec<String>> {
    Json(enforcer.users_in_role(&group))
}

async fn delete_group(
    State(enforcer): State<Enforcer>,
    Path(group): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    if !enforcer.mutator().delete_role(&group)? {
        return Err(AppError::NotFound("Group not found".into()));
    }
    tracing::info!(group = %group, "Deleted group");
    Ok(Json(MessageResponse::new("Group successfully deleted")))
}

async fn list_permissions(State(enforcer): State<Enforcer>) -> Json<Vec<PolicyView>> {
    Json(enforcer.policies().iter().map(PolicyView::from).collect())
}

async fn grant_permission(
    State(enforcer): State<Enforcer>,
    Json(req): Json<PermissionRequest>,
) -> Result<impl IntoResponse, AppError> {
    enforcer
        .mutator()
        .add_policy(&req.subject, &req.object, &req.action, &req.effect)?;
    tracing::info!(
        subject = %req.subject,
        object = %req.object,
        action = %req.action,
        effect = %req.effect,
        "Granted permission"
    );
    Ok((
        StatusCode::CREATED,
        Json(MessageResponse::new("Permission successfully granted")),
    ))
}

async fn delete_permissions(
    State(enforcer): State<Enforcer>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    if !enforcer.mutator().remove_policies_for(&name)? {
        return Err(AppError::NotFound(
            "No permissions found for the specified name".into(),
        ));
    }
    tracing::info!(subject = %name, "Deleted permissions");
    Ok(Json(MessageResponse::new("Permissions successfully deleted")))
}

async fn check_permission(
    State(enforcer): State<Enforcer>,
    Json(req): Json<CheckRequest>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(enforcer.explain(&req.subject, &req.object, &req.action)?))
}

async fn reload_policies(State(enforcer): State<Enforcer>) -> Result<impl IntoResponse, AppError> {
    enforcer.reload()?;
    Ok(Json(MessageResponse::new("Policies reloaded")))
}
