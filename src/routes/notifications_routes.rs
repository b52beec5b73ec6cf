use axum::{Router, routing::{get, post}};
use crate::{AppState, controllers::notifications_controller};

pub fn add_routes(router: Router<AppState>) -> Router<AppState> {
    router
        .route("/api/notifications", get(notifications_controller::get_notifications))
        .route(
            "/api/notifications/preferences",
            get(notifications_controller::get_preferences)
                .put(notifications_controller::put_preferences),
        )
        .route(
            "/api/notifications/unread-count",
            get(notifications_controller::get_unread_count),
        )
        .route(
            "/api/notifications/read-all",
            post(notifications_controller::post_read_all),
        )
        .route(
            "/api/notifications/:id/read",
            post(notifications_controller::post_notification_read),
        )
        .route(
            "/api/notifications/:id/dismiss",
            post(notifications_controller::post_notification_dismiss),
        )
}
