#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use clap::Parser;
use tracing::{error, info, warn};

mod cli;
mod config;
mod db;
mod discord;
mod parsers;
mod relay;
mod utils;
mod web;

use config::Config;
use db::BindingStore;
use relay::{DeliveryClient, RelayCore, RoutingTable};
use utils::retry::RetryPolicy;
use web::metrics::Metrics;
use web::{WebServer, WebState};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = cli::Cli::parse();
    let config = Arc::new(Config::load(cli.config.as_deref())?);

    if cli.check_config {
        println!("configuration is valid");
        return Ok(());
    }

    utils::logging::init_tracing(&config.logging);
    Metrics::init();
    info!("discord link relay starting up");

    let db_manager = db::DatabaseManager::new(&config.database).await?;
    db_manager.migrate().await?;
    info!("using {:?} binding store", db_manager.db_type());
    let store = db_manager.binding_store();

    let reload_policy = config.delivery.retry_policy();
    let routing = Arc::new(RoutingTable::new());
    if let Err(err) = routing.load_from_store(store.as_ref(), &reload_policy).await {
        error!("failed to load routing table: {err}");
        return Err(err.into());
    }

    let discord_client = discord::DiscordClient::new(config.clone());
    let delivery = Arc::new(DeliveryClient::new(discord_client.api(), &config.delivery));
    let core = Arc::new(RelayCore::new(
        routing.clone(),
        discord_client.gateway(),
        delivery,
    ));
    discord_client.set_core(core).await;

    let web_handle = config.web.enabled.then(|| {
        let web_server = WebServer::new(
            &config.web,
            WebState {
                routing: routing.clone(),
                store: store.clone(),
                reload_policy: reload_policy.clone(),
                admin_token: config.web.admin_token.clone(),
                started_at: Instant::now(),
            },
        );
        tokio::spawn(async move {
            if let Err(e) = web_server.start().await {
                error!("web server error: {}", e);
            }
        })
    });

    let reload_handle = config.routing.reload_interval().map(|period| {
        tokio::spawn(refresh_routing(
            routing.clone(),
            store.clone(),
            reload_policy.clone(),
            period,
        ))
    });

    let started = tokio::select! {
        result = discord_client.start() => {
            result?;
            true
        }
        _ = shutdown_signal() => false,
    };
    if started {
        shutdown_signal().await;
    }

    info!("discord link relay shutting down");
    for handle in [reload_handle, web_handle].into_iter().flatten() {
        handle.abort();
    }
    discord_client.stop().await?;
    Ok(())
}

/// Reloads the whole routing table every `period`. A failed reload keeps the
/// previous table.
async fn refresh_routing(
    routing: Arc<RoutingTable>,
    store: Arc<dyn BindingStore>,
    policy: RetryPolicy,
    period: Duration,
) {
    let mut interval = tokio::time::interval(period);
    interval.tick().await;

    loop {
        interval.tick().await;
        if let Err(err) = routing.load_from_store(store.as_ref(), &policy).await {
            warn!("routing refresh failed, keeping previous table: {err}");
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!("failed to listen for ctrl-c: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!("failed to listen for SIGTERM: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received ctrl-c"),
        _ = terminate => info!("received SIGTERM"),
    }
}
