use salvo::prelude::*;
use serde_json::json;
use tracing::{error, info};

use super::render_error;
use crate::web::web_state;

/// Current routing snapshot as JSON.
#[handler]
pub async fn list_routes(res: &mut Response) {
    match web_state() {
        Some(state) => res.render(Json(state.routing.snapshot().as_ref().clone())),
        None => render_error(res, StatusCode::SERVICE_UNAVAILABLE, "relay is starting"),
    }
}

/// Reloads bindings and roles from the store, replacing the table on success.
#[handler]
pub async fn reload_routes(res: &mut Response) {
    let Some(state) = web_state() else {
        render_error(res, StatusCode::SERVICE_UNAVAILABLE, "relay is starting");
        return;
    };

    match state
        .routing
        .load_from_store(state.store.as_ref(), &state.reload_policy)
        .await
    {
        Ok(()) => {
            let snapshot = state.routing.snapshot();
            info!(bindings = snapshot.bindings().len(), "routing reloaded via admin api");
            res.render(Json(json!({
                "reloaded": true,
                "bindings": snapshot.bindings().len(),
                "roles": snapshot.roles().len(),
                "loaded_at": snapshot.loaded_at(),
            })));
        }
        Err(err) => {
            error!("admin routing reload failed: {}", err);
            render_error(
                res,
                StatusCode::INTERNAL_SERVER_ERROR,
                &format!("reload failed: {err}"),
            );
        }
    }
}
