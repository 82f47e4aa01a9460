use crate::config::{Config, LimitConfig};
use crate::token_bucket::Limiter;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use std::time::Duration;
use tokio::sync::RwLock;

/// Route key used for requests no configured prefix matches.
pub const DEFAULT_ROUTE: &str = "*";

#[derive(Debug)]
pub struct RouteState {
    pub route: String,
    pub limiter: Limiter,
    pub max_wait_ms: AtomicU64, // 0 => drop when exhausted
    pub admitted: AtomicU64,
    pub rejected: AtomicU64,
}

impl RouteState {
    pub fn from_config(route: &str, lc: &LimitConfig) -> Arc<Self> {
        Arc::new(Self {
            route: route.to_string(),
            limiter: Limiter::new(lc.limit(), lc.burst),
            max_wait_ms: AtomicU64::new(lc.max_wait_ms),
            admitted: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        })
    }

    /// Update the limiter in place. Only changed fields are replaced, so an
    /// unchanged route keeps its balance across reloads.
    pub fn apply(&self, lc: &LimitConfig) {
        let new_limit = lc.limit();
        if self.limiter.limit() != new_limit {
            self.limiter.set_limit(new_limit);
        }
        if self.limiter.burst() != lc.burst {
            self.limiter.set_burst(lc.burst);
        }
        self.max_wait_ms.store(lc.max_wait_ms, Ordering::Relaxed);
    }

    pub fn max_wait(&self) -> Duration { Duration::from_millis(self.max_wait_ms.load(Ordering::Relaxed)) }

    pub fn on_admit(&self) { self.admitted.fetch_add(1, Ordering::Relaxed); }
    pub fn on_reject(&self) { self.rejected.fetch_add(1, Ordering::Relaxed); }

    pub fn get_admitted(&self) -> u64 { self.admitted.load(Ordering::Relaxed) }
    pub fn get_rejected(&self) -> u64 { self.rejected.load(Ordering::Relaxed) }
}

pub struct RouteRegistry {
    pub default: Arc<RouteState>,
    pub routes: Vec<Arc<RouteState>>,
}

impl RouteRegistry {
    pub fn all(&self) -> Vec<Arc<RouteState>> {
        let mut v = Vec::with_capacity(self.routes.len() + 1);
        v.extend(self.routes.iter().cloned());
        v.push(self.default.clone());
        v
    }

    /// Longest configured prefix owning `path`, else the default route.
    pub fn resolve(&self, path: &str) -> Arc<RouteState> {
        self.routes
            .iter()
            .filter(|r| prefix_matches(&r.route, path))
            .max_by_key(|r| r.route.len())
            .cloned()
            .unwrap_or_else(|| self.default.clone())
    }
}

fn prefix_matches(prefix: &str, path: &str) -> bool {
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || prefix.ends_with('/') || rest.starts_with('/'),
        None => false,
    }
}

pub struct AppState {
    pub cfg: Arc<RwLock<Config>>,
    pub registry: Arc<RwLock<RouteRegistry>>,

    pub total_requests: AtomicU64, // everything that reached the admission layer
}

impl AppState {
    pub fn new(cfg: Config) -> Self {
        let registry = build_registry(&cfg);
        Self {
            cfg: Arc::new(RwLock::new(cfg)),
            registry: Arc::new(RwLock::new(registry)),
            total_requests: AtomicU64::new(0),
        }
    }
}

pub fn build_registry(cfg: &Config) -> RouteRegistry {
    RouteRegistry {
        default: RouteState::from_config(DEFAULT_ROUTE, &cfg.default_limit),
        routes: cfg.routes.iter().map(|(route, lc)| RouteState::from_config(route, lc)).collect(),
    }
}

/// Reconcile the registry with a reloaded config. Surviving routes keep
/// their limiter and counters; new routes start fresh; dropped routes go away.
pub fn reconcile_registry(reg: &mut RouteRegistry, cfg: &Config) {
    use std::collections::HashMap;
    let mut existing: HashMap<String, Arc<RouteState>> =
        reg.routes.drain(..).map(|r| (r.route.clone(), r)).collect();

    reg.default.apply(&cfg.default_limit);

    for (route, lc) in &cfg.routes {
        if let Some(r) = existing.remove(route) {
            r.apply(lc);
            reg.routes.push(r);
        } else {
            reg.routes.push(RouteState::from_config(route, lc));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn cfg(yaml: &str) -> Config {
        Config::from_yaml_str(yaml).unwrap()
    }

    const BASE: &str = r#"
server: {bind_addr: 127.0.0.1, port: 0}
default_limit: {rate_per_sec: 10, burst: 5}
routes:
  /api: {rate_per_sec: 1, burst: 1}
  /api/bulk: {rate_per_sec: 2, burst: 4}
"#;

    #[test]
    fn resolves_longest_prefix() {
        let reg = build_registry(&cfg(BASE));
        assert_eq!(reg.resolve("/api").route, "/api");
        assert_eq!(reg.resolve("/api/users").route, "/api");
        assert_eq!(reg.resolve("/api/bulk/load").route, "/api/bulk");
        assert_eq!(reg.resolve("/apiary").route, DEFAULT_ROUTE);
        assert_eq!(reg.resolve("/").route, DEFAULT_ROUTE);
        assert_eq!(reg.all().len(), 3);
    }

    #[test]
    fn reconcile_updates_in_place() {
        let mut reg = build_registry(&cfg(BASE));
        let api = reg.resolve("/api");
        let now = Instant::now();
        assert!(api.limiter.allow_n(now, 1));
        api.on_admit();

        let reloaded = cfg(r#"
server: {bind_addr: 127.0.0.1, port: 0}
default_limit: {rate_per_sec: 10, burst: 2, max_wait_ms: 250}
routes:
  /api: {rate_per_sec: 1, burst: 3}
  /new: {interval_ms: 0}
"#);
        reconcile_registry(&mut reg, &reloaded);

        let api_after = reg.resolve("/api/x");
        assert!(Arc::ptr_eq(&api, &api_after));
        assert_eq!(api_after.get_admitted(), 1);
        assert_eq!(api_after.limiter.burst(), 3);
        assert_eq!(reg.default.limiter.burst(), 2);
        assert_eq!(reg.default.max_wait(), Duration::from_millis(250));
        assert_eq!(reg.resolve("/api/bulk").route, "/api");
        assert!(reg.resolve("/new").limiter.limit().is_unlimited());
    }
}
