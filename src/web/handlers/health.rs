use salvo::prelude::*;
use serde_json::json;

use super::render_error;
use crate::web::metrics::Metrics;
use crate::web::web_state;

#[handler]
pub async fn health_check(res: &mut Response) {
    let Some(state) = web_state() else {
        render_error(res, StatusCode::SERVICE_UNAVAILABLE, "relay is starting");
        return;
    };

    let snapshot = state.routing.snapshot();
    let loaded = snapshot.loaded_at().is_some();
    if !loaded {
        res.status_code(StatusCode::SERVICE_UNAVAILABLE);
    }

    res.render(Json(json!({
        "status": if loaded { "ok" } else { "degraded" },
        "uptime_seconds": Metrics::uptime_seconds(),
        "version": env!("CARGO_PKG_VERSION"),
        "routing": {
            "loaded": loaded,
            "loaded_at": snapshot.loaded_at(),
            "bindings": snapshot.bindings().len(),
            "roles": snapshot.roles().len(),
        },
    })));
}
