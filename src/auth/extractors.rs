use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

use super::jwt::JwtKeys;
use super::repo::UserRepo;
use super::user::{Role, User};

/// The protect gate as an extractor: bearer token to live, still-valid
/// identity. Handlers taking `CurrentUser` only run for authenticated
/// requests.
pub struct CurrentUser(pub User);

impl CurrentUser {
    /// The restrict-to gate; call it after extraction (extraction is what
    /// guarantees `protect` already ran).
    pub fn require_role(&self, allowed: &[Role]) -> ApiResult<()> {
        restrict_to(&self.0, allowed)
    }
}

pub fn restrict_to(user: &User, allowed: &[Role]) -> ApiResult<()> {
    if !allowed.contains(&user.role) {
        return Err(ApiError::authorization(
            "You do not have permission to perform this action",
        ));
    }
    Ok(())
}

/// Full protect flow, factored out of the extractor so tests can drive it
/// without assembling HTTP requests.
pub async fn authenticate(state: &AppState, auth_header: Option<&str>) -> ApiResult<User> {
    let header =
        auth_header.ok_or_else(|| ApiError::authentication("You are not logged in. Please log in"))?;
    let token = header
        .strip_prefix("Bearer ")
        .ok_or_else(|| ApiError::authentication("You are not logged in. Please log in"))?;

    let keys = JwtKeys::from_ref(state);
    let claims = keys.verify(token)?;

    let repo = UserRepo::new(state.store.as_ref());
    let user = repo
        .find_by_id(claims.sub)
        .await
        .map_err(ApiError::Internal)?
        .filter(|u| u.active)
        .ok_or_else(|| {
            ApiError::authentication("The user belonging to this token no longer exists")
        })?;

    if user.changed_password_after(claims.iat as i64) {
        return Err(ApiError::authentication(
            "User recently changed the password. Please log in again",
        ));
    }
    Ok(user)
}

#[async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok());
        let user = authenticate(state, header).await?;
        Ok(CurrentUser(user))
    }
}
