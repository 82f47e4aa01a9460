use anyhow::Result;
use std::{env, net::SocketAddr, path::PathBuf, sync::Arc};
use tokengate::{config::Config, gateway, state::AppState, watch::watch_config_and_apply};
use tokio::net::TcpListener;
use tracing::{error, info};

static DEFAULT_CONFIG_PATH: &str = "tokengate.yaml";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()))
        .with_target(true)
        .compact()
        .init();

    // Load config
    let cfg_path = env::var("TG_CONFIG_PATH").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let cfg_path = PathBuf::from(cfg_path);
    let cfg = Config::load_from_path(&cfg_path)?;
    info!(routes = cfg.routes.len(), "loaded config from {}", cfg_path.display());

    let app_state = Arc::new(AppState::new(cfg));

    // Config watcher
    {
        let app_state = app_state.clone();
        let cfg_path = cfg_path.clone();
        tokio::spawn(async move {
            if let Err(e) = watch_config_and_apply(cfg_path, app_state).await {
                error!("config watcher error: {:?}", e);
            }
        });
    }

    let addr: SocketAddr = {
        let cfg = app_state.cfg.read().await;
        format!("{}:{}", cfg.server.bind_addr, cfg.server.port).parse()?
    };
    let router = gateway::router(app_state);

    info!("listening on http://{}", addr);
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down");
        })
        .await?;
    Ok(())
}
