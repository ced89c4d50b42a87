use crate::state::AppState;
use axum::{routing::get, Router};

pub mod handlers;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/tours/top-5-cheap", get(handlers::top_five_cheap))
        .route("/tours/stats", get(handlers::stats))
        .route("/tours/monthly-plan/:year", get(handlers::monthly_plan))
        .route(
            "/tours/within/:distance/center/:latlng/unit/:unit",
            get(handlers::tours_within),
        )
        .route("/tours/distances/:latlng/unit/:unit", get(handlers::distances))
        .route("/tours", get(handlers::list).post(handlers::create))
        .route(
            "/tours/:id",
            get(handlers::get_one)
                .patch(handlers::update)
                .delete(handlers::delete_one),
        )
}
