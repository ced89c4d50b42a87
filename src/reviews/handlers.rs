use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde_json::Value;
use tracing::instrument;
use uuid::Uuid;

use crate::auth::extractors::CurrentUser;
use crate::auth::user::Role;
use crate::error::{ApiError, ApiResult};
use crate::query::{Filter, QuerySpec};
use crate::resource::{Join, Resource};
use crate::state::AppState;
use crate::store::Document;

pub const REVIEWS: Resource = Resource::new("reviews");

/// Show who wrote the review without pulling the whole user document.
const AUTHOR_JOIN: Join = Join::Ref {
    field: "user",
    collection: "users",
    select: Some(&["name", "email"]),
};

fn query_spec(pairs: &[(String, String)]) -> QuerySpec {
    QuerySpec::from_pairs(pairs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
}

/// Review + rating are required; the rating must be 1..=5; the tour must be
/// set (from the body or the nested route).
fn validate_review(doc: &Document) -> ApiResult<()> {
    if !doc.get("review").is_some_and(Value::is_string) {
        return Err(ApiError::validation("Please provide a review"));
    }
    let rating_ok = doc
        .get("rating")
        .and_then(Value::as_f64)
        .is_some_and(|r| (1.0..=5.0).contains(&r));
    if !rating_ok {
        return Err(ApiError::validation(
            "Please provide a rating between 1 and 5",
        ));
    }
    if !doc.get("tour").is_some_and(Value::is_string) {
        return Err(ApiError::validation("Review must belong to a tour"));
    }
    Ok(())
}

async fn create_review(
    state: &AppState,
    user: &CurrentUser,
    body: Value,
    tour_id: Option<Uuid>,
) -> ApiResult<(StatusCode, Json<Document>)> {
    user.require_role(&[Role::User])?;
    let mut doc = match body {
        Value::Object(map) => map,
        _ => return Err(ApiError::validation("Request body must be a JSON object")),
    };
    // the nested route supplies the tour, the session supplies the author
    if !doc.contains_key("tour") {
        if let Some(tour_id) = tour_id {
            doc.insert("tour".into(), Value::String(tour_id.to_string()));
        }
    }
    doc.insert("user".into(), Value::String(user.0.id.to_string()));
    validate_review(&doc)?;

    let created = REVIEWS
        .create(state.store.as_ref(), Value::Object(doc))
        .await?;
    Ok((StatusCode::CREATED, Json(created)))
}

#[instrument(skip(state, _user))]
pub async fn list(
    State(state): State<AppState>,
    _user: CurrentUser,
    Query(pairs): Query<Vec<(String, String)>>,
) -> ApiResult<Json<Vec<Document>>> {
    let spec = query_spec(&pairs);
    let docs = REVIEWS
        .list(state.store.as_ref(), &spec, &[AUTHOR_JOIN])
        .await?;
    Ok(Json(docs))
}

#[instrument(skip(state, _user))]
pub async fn list_for_tour(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(tour_id): Path<Uuid>,
    Query(pairs): Query<Vec<(String, String)>>,
) -> ApiResult<Json<Vec<Document>>> {
    let spec = query_spec(&pairs).with_filter(Filter::eq("tour", tour_id.to_string()));
    let docs = REVIEWS
        .list(state.store.as_ref(), &spec, &[AUTHOR_JOIN])
        .await?;
    Ok(Json(docs))
}

#[instrument(skip(state, user, body))]
pub async fn create(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(body): Json<Value>,
) -> ApiResult<(StatusCode, Json<Document>)> {
    create_review(&state, &user, body, None).await
}

#[instrument(skip(state, user, body))]
pub async fn create_for_tour(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(tour_id): Path<Uuid>,
    Json(body): Json<Value>,
) -> ApiResult<(StatusCode, Json<Document>)> {
    create_review(&state, &user, body, Some(tour_id)).await
}

#[instrument(skip(state, _user))]
pub async fn get_one(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Document>> {
    let doc = REVIEWS
        .get(state.store.as_ref(), id, &[AUTHOR_JOIN])
        .await?;
    Ok(Json(doc))
}

#[instrument(skip(state, _user, body))]
pub async fn update(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(id): Path<Uuid>,
    Json(body): Json<Value>,
) -> ApiResult<Json<Document>> {
    let Value::Object(patch) = body else {
        return Err(ApiError::validation("Request body must be a JSON object"));
    };
    if let Some(rating) = patch.get("rating") {
        let ok = rating.as_f64().is_some_and(|r| (1.0..=5.0).contains(&r));
        if !ok {
            return Err(ApiError::validation(
                "Please provide a rating between 1 and 5",
            ));
        }
    }
    let updated = REVIEWS
        .update(state.store.as_ref(), id, Value::Object(patch))
        .await?;
    Ok(Json(updated))
}

#[instrument(skip(state, user))]
pub async fn delete_one(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    user.require_role(&[Role::Admin, Role::User])?;
    REVIEWS.delete(state.store.as_ref(), id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::dto::SignupRequest;
    use crate::auth::handlers::signup;
    use crate::auth::repo::UserRepo;
    use crate::auth::user::User;
    use serde_json::json;

    async fn signup_user(state: &AppState, email: &str, role: Option<Role>) -> User {
        signup(
            State(state.clone()),
            Json(SignupRequest {
                name: Some("Jonas".into()),
                email: Some(email.into()),
                password: Some("Tr3kking!Pass".into()),
                password_confirm: Some("Tr3kking!Pass".into()),
                role,
            }),
        )
        .await
        .expect("signup");
        UserRepo::new(state.store.as_ref())
            .find_by_email(email)
            .await
            .unwrap()
            .unwrap()
    }

    async fn seed_tour(state: &AppState) -> Uuid {
        let tour = crate::tours::handlers::TOURS
            .create(
                state.store.as_ref(),
                json!({"name": "The Forest Hiker", "price": 397}),
            )
            .await
            .unwrap();
        tour["id"].as_str().unwrap().parse().unwrap()
    }

    #[tokio::test]
    async fn nested_create_fills_tour_and_user_ids() {
        let state = AppState::fake();
        let user = signup_user(&state, "jonas@example.com", None).await;
        let tour_id = seed_tour(&state).await;

        let (status, Json(created)) = create_for_tour(
            State(state.clone()),
            CurrentUser(user.clone()),
            Path(tour_id),
            Json(json!({"review": "Loved it", "rating": 5})),
        )
        .await
        .unwrap();
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["tour"], json!(tour_id.to_string()));
        assert_eq!(created["user"], json!(user.id.to_string()));

        // and the nested listing is scoped to that tour
        let Json(scoped) = list_for_tour(
            State(state.clone()),
            CurrentUser(user.clone()),
            Path(tour_id),
            Query(Vec::new()),
        )
        .await
        .unwrap();
        assert_eq!(scoped.len(), 1);

        let Json(other) = list_for_tour(
            State(state),
            CurrentUser(user),
            Path(Uuid::new_v4()),
            Query(Vec::new()),
        )
        .await
        .unwrap();
        assert!(other.is_empty());
    }

    #[tokio::test]
    async fn only_the_user_role_may_post_reviews() {
        let state = AppState::fake();
        let guide = signup_user(&state, "guide@example.com", Some(Role::Guide)).await;
        let tour_id = seed_tour(&state).await;

        let err = create_for_tour(
            State(state),
            CurrentUser(guide),
            Path(tour_id),
            Json(json!({"review": "self-promotion", "rating": 5})),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::Authorization(_)));
    }

    #[tokio::test]
    async fn ratings_must_be_in_range() {
        let state = AppState::fake();
        let user = signup_user(&state, "jonas@example.com", None).await;
        let tour_id = seed_tour(&state).await;

        let err = create_for_tour(
            State(state),
            CurrentUser(user),
            Path(tour_id),
            Json(json!({"review": "meh", "rating": 11})),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
    }
}
