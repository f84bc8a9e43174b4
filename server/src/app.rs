use axum::Router;
use axum::routing::{delete, get, post};
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;

use crate::routes;
use crate::state::AppState;

pub(crate) fn build_app(state: AppState) -> Router {
    let app = Router::new()
        .route("/ws", get(routes::ws::game_stream))
        .route("/api/events", get(routes::sse::territory_events))
        .route("/api/territories", get(routes::api::get_territories))
        .route("/api/health", get(routes::api::health))
        .route("/api/metrics", get(routes::api::metrics))
        .route(
            "/api/admin/zones",
            get(routes::api::list_zones).post(routes::api::create_zone),
        )
        .route("/api/admin/zones/{id}", delete(routes::api::delete_zone))
        .route("/api/admin/chests", post(routes::api::spawn_chest))
        .route("/api/admin/quests", post(routes::api::create_quest))
        .route("/api/admin/ban", post(routes::api::ban_player))
        .route("/api/sponsor/checkin", post(routes::api::sponsor_checkin))
        .route("/api/clans", post(routes::api::create_clan))
        .route(
            "/api/clans/{id}/members",
            post(routes::api::add_clan_member),
        )
        .route("/api/powers/order", post(routes::api::power_order))
        .route("/api/powers/grant", post(routes::api::power_grant));

    app.layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
