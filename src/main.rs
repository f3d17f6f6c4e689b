// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::{net::SocketAddr, process, sync::Arc};

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use renpay_server::{
    api::router,
    config::{AppConfig, RECOMMENDED_SECRET_LEN},
    logging,
    remote::{MemoryStore, RemoteStore, RestStore},
    state::AppState,
};

fn main() {
    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid configuration: {e}");
            process::exit(1);
        }
    };

    logging::init(config.log_format);

    if config.has_weak_secret() {
        warn!(
            recommended = RECOMMENDED_SECRET_LEN,
            "SECRET_KEY is shorter than recommended"
        );
    }

    // The blocking HTTP client must be built outside the async runtime.
    let store: Arc<dyn RemoteStore> = match &config.store {
        Some(store) => match RestStore::new(&store.url, &store.api_key, config.retry.attempt_timeout) {
            Ok(rest) => {
                info!(url = %store.url, "Using hosted store");
                Arc::new(rest)
            }
            Err(e) => {
                error!(error = %e, "Failed to build store client");
                process::exit(1);
            }
        },
        None => {
            warn!("STORE_URL not set, using in-memory store (development mode)");
            Arc::new(MemoryStore::new())
        }
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("Failed to build tokio runtime");

    runtime.block_on(serve(config, store));
}

async fn serve(config: AppConfig, store: Arc<dyn RemoteStore>) {
    let state = AppState::new(&config, store);
    let reconciler = state.reconciler.clone();
    let app = router(state);

    let addr: SocketAddr = config
        .bind_addr()
        .parse()
        .expect("Failed to parse bind address");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind listener");

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for shutdown signal");
            return;
        }
        info!("Shutdown signal received");
        signal.cancel();
    });

    info!(
        %addr,
        ledger_mode = ?reconciler.mode(),
        "RenPay server listening (docs at /docs)"
    );

    if let Err(e) = axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
    {
        error!(error = %e, "Server error");
    }

    reconciler.shutdown().await;
    info!("Server stopped");
}
