use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde_json::{json, Value};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::auth::dto::PublicUser;
use crate::auth::handlers::is_valid_email;
use crate::auth::repo::USERS;
use crate::auth::user::Role;
use crate::auth::extractors::CurrentUser;
use crate::error::{ApiError, ApiResult};
use crate::query::{Filter, QuerySpec};
use crate::resource::Resource;
use crate::state::AppState;
use crate::store::Document;

const USERS_RES: Resource = Resource::new(USERS);

#[instrument(skip(user))]
pub async fn me(user: CurrentUser) -> Json<PublicUser> {
    Json(PublicUser::from(&user.0))
}

/// Profile updates only; password changes go through their own route.
#[instrument(skip(state, user, body))]
pub async fn update_me(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(body): Json<Value>,
) -> ApiResult<Json<Document>> {
    let Value::Object(body) = body else {
        return Err(ApiError::validation("Request body must be a JSON object"));
    };
    if body.contains_key("password") || body.contains_key("password_confirm") {
        return Err(ApiError::validation(
            "This route is not for password changes. Please use /api/v1/auth/change-password",
        ));
    }

    let mut patch = Document::new();
    for key in ["name", "email", "photo"] {
        if let Some(value) = body.get(key) {
            patch.insert(key.to_string(), value.clone());
        }
    }
    if let Some(email) = patch.get("email").cloned() {
        let normalized = email
            .as_str()
            .map(|e| e.trim().to_lowercase())
            .filter(|e| is_valid_email(e))
            .ok_or_else(|| ApiError::validation("Invalid email"))?;
        patch.insert("email".into(), Value::String(normalized));
    }
    if patch.is_empty() {
        return Err(ApiError::validation("Nothing to update"));
    }

    let updated = USERS_RES
        .update(state.store.as_ref(), user.0.id, Value::Object(patch))
        .await?;
    info!(user_id = %user.0.id, "profile updated");
    Ok(Json(updated))
}

/// Soft delete: the account stays on record but stops resolving.
#[instrument(skip(state, user))]
pub async fn deactivate(
    State(state): State<AppState>,
    user: CurrentUser,
) -> ApiResult<StatusCode> {
    state
        .store
        .update_by_id(
            USERS,
            user.0.id,
            json!({"active": false})
                .as_object()
                .cloned()
                .unwrap_or_default(),
        )
        .await
        .map_err(ApiError::Internal)?;
    info!(user_id = %user.0.id, "account deactivated");
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(state, user))]
pub async fn list(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(pairs): Query<Vec<(String, String)>>,
) -> ApiResult<Json<Vec<Document>>> {
    user.require_role(&[Role::Admin])?;
    let spec = QuerySpec::from_pairs(pairs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .with_filter(Filter::eq("active", true));
    let docs = USERS_RES.list(state.store.as_ref(), &spec, &[]).await?;
    Ok(Json(docs))
}

#[instrument(skip(state, user))]
pub async fn get_one(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Document>> {
    user.require_role(&[Role::Admin])?;
    let doc = USERS_RES.get(state.store.as_ref(), id, &[]).await?;
    Ok(Json(doc))
}

#[instrument(skip(state, user))]
pub async fn delete_one(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    user.require_role(&[Role::Admin])?;
    USERS_RES.delete(state.store.as_ref(), id).await?;
    warn!(target_id = %id, admin_id = %user.0.id, "user deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// Accounts are created through signup, never here.
#[instrument]
pub async fn create() -> ApiError {
    ApiError::validation("This route is not defined. Please use /api/v1/auth/signup")
}
