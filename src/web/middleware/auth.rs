use salvo::http::header::AUTHORIZATION;
use salvo::prelude::*;
use secrecy::{ExposeSecret, SecretString};

use crate::web::handlers::{
    admin::{list_routes, reload_routes},
    health::health_check,
    render_error,
};
use crate::web::metrics::metrics_endpoint;
use crate::web::web_state;

pub fn create_router() -> Router {
    Router::new()
        .push(Router::with_path("health").get(health_check))
        .push(Router::with_path("metrics").get(metrics_endpoint))
        .push(
            Router::with_path("admin")
                .hoop(require_admin_token)
                .push(Router::with_path("routes").get(list_routes))
                .push(Router::with_path("reload").post(reload_routes)),
        )
}

/// Guards admin routes with `Authorization: Bearer <token>` when a token is
/// configured.
#[handler]
pub async fn require_admin_token(req: &mut Request, res: &mut Response, ctrl: &mut FlowCtrl) {
    let Some(expected) = web_state().and_then(|state| state.admin_token.as_ref()) else {
        return;
    };

    let header = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok());

    if !bearer_matches(header, expected) {
        render_error(res, StatusCode::UNAUTHORIZED, "missing or invalid admin token");
        ctrl.skip_rest();
    }
}

fn bearer_matches(header: Option<&str>, expected: &SecretString) -> bool {
    header
        .and_then(|value| value.strip_prefix("Bearer "))
        .is_some_and(|token| token.trim() == expected.expose_secret())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_token_must_match_exactly() {
        let expected = SecretString::from("s3cret".to_string());

        assert!(bearer_matches(Some("Bearer s3cret"), &expected));
        assert!(!bearer_matches(Some("Bearer wrong"), &expected));
        assert!(!bearer_matches(Some("s3cret"), &expected));
        assert!(!bearer_matches(None, &expected));
    }
}
