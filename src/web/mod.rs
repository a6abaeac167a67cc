use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use once_cell::sync::OnceCell;
use salvo::prelude::*;
use secrecy::SecretString;
use tracing::info;

use crate::config::WebConfig;
use crate::db::BindingStore;
use crate::relay::RoutingTable;
use crate::utils::retry::RetryPolicy;

pub mod handlers;
pub mod metrics;
pub mod middleware;

use self::middleware::auth::create_router;

#[derive(Clone)]
pub struct WebState {
    pub routing: Arc<RoutingTable>,
    pub store: Arc<dyn BindingStore>,
    pub reload_policy: RetryPolicy,
    pub admin_token: Option<SecretString>,
    pub started_at: Instant,
}

static WEB_STATE: OnceCell<WebState> = OnceCell::new();

pub fn web_state() -> Option<&'static WebState> {
    WEB_STATE.get()
}

#[derive(Clone)]
pub struct WebServer {
    config: WebConfig,
}

impl WebServer {
    pub fn new(config: &WebConfig, state: WebState) -> Self {
        let _ = WEB_STATE.set(state);
        Self {
            config: config.clone(),
        }
    }

    pub async fn start(&self) -> Result<()> {
        let bind_addr = format!("{}:{}", self.config.bind_address, self.config.port);
        info!("Starting web server on {}", bind_addr);

        let acceptor = TcpListener::new(bind_addr).bind().await;
        Server::new(acceptor).serve(create_router()).await;

        Ok(())
    }
}
