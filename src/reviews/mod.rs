use crate::state::AppState;
use axum::{routing::get, Router};

pub mod handlers;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/reviews", get(handlers::list).post(handlers::create))
        .route(
            "/reviews/:id",
            get(handlers::get_one)
                .patch(handlers::update)
                .delete(handlers::delete_one),
        )
        .route(
            "/tours/:id/reviews",
            get(handlers::list_for_tour).post(handlers::create_for_tour),
        )
}
