pub mod admin;
pub mod health;

use salvo::prelude::*;
use serde_json::json;

pub(crate) fn render_error(res: &mut Response, status: StatusCode, message: &str) {
    res.status_code(status);
    res.render(Json(json!({ "error": message })));
}
