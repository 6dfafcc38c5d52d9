use axum::{
    routing::{get, patch, post},
    Router,
};

use crate::{handlers::*, AppState};

pub fn create_api_routes() -> Router<AppState> {
    Router::new()
        .route("/intake", post(intake_document))
        .route("/proforma/parse", post(parse_proforma))
        .route("/classify", post(classify_image))
        .nest("/sessions", session_routes())
}

fn session_routes() -> Router<AppState> {
    Router::new()
        .route("/:id", get(get_session).delete(discard_session))
        .route("/:id/publish", post(publish_session))
        .route("/:id/items/:item_id", patch(update_item).delete(delete_item))
        .route("/:id/items/:item_id/reclassify", post(reclassify_item))
}
