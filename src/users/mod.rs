use crate::state::AppState;
use axum::{routing::get, Router};

pub mod handlers;

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/users/me",
            get(handlers::me)
                .patch(handlers::update_me)
                .delete(handlers::deactivate),
        )
        .route("/users", get(handlers::list).post(handlers::create))
        .route("/users/:id", get(handlers::get_one).delete(handlers::delete_one))
}
