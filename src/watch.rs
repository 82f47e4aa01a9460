use crate::config::Config;
use crate::state::{reconcile_registry, AppState};
use anyhow::Result;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::{path::PathBuf, sync::Arc};
use tracing::{error, info};

/// Watch the config file and apply every successful re-read to the live
/// limiters. Parse failures keep the previous config.
pub async fn watch_config_and_apply(cfg_path: PathBuf, app: Arc<AppState>) -> Result<()> {
    use tokio::sync::mpsc;
    let (tx, mut rx) = mpsc::channel::<()>(8);

    let mut watcher: RecommendedWatcher = Watcher::new(
        move |res: Result<Event, notify::Error>| {
            if let Ok(ev) = res {
                match ev.kind {
                    EventKind::Modify(_) | EventKind::Create(_) | EventKind::Remove(_) => {
                        let _ = tx.try_send(());
                    }
                    _ => {}
                }
            }
        },
        notify::Config::default(),
    )?;

    let watch_dir = cfg_path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| std::path::Path::new("."));
    watcher.watch(watch_dir, RecursiveMode::NonRecursive)?;

    while rx.recv().await.is_some() {
        match Config::load_from_path(&cfg_path) {
            Ok(new_cfg) => {
                apply_config(&app, new_cfg).await;
                info!("applied new config (hot reload)");
            }
            Err(e) => {
                error!("failed to reload config: {:?}", e);
            }
        }
    }
    Ok(())
}

pub async fn apply_config(app: &AppState, new_cfg: Config) {
    {
        let mut reg = app.registry.write().await;
        reconcile_registry(&mut reg, &new_cfg);
    }
    *app.cfg.write().await = new_cfg;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn apply_swaps_config_and_limits() {
        let app = AppState::new(Config::from_yaml_str("server: {bind_addr: 127.0.0.1, port: 1}").unwrap());
        assert!(app.registry.read().await.default.limiter.limit().is_unlimited());

        let next = Config::from_yaml_str(
            "server: {bind_addr: 127.0.0.1, port: 2}\ndefault_limit: {rate_per_sec: 3, burst: 7}",
        )
        .unwrap();
        apply_config(&app, next).await;

        assert_eq!(app.cfg.read().await.server.port, 2);
        let reg = app.registry.read().await;
        assert_eq!(reg.default.limiter.burst(), 7);
        assert!(!reg.default.limiter.limit().is_unlimited());
    }
}
