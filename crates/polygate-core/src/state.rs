use std::sync::Arc;
use std::time::Duration;

use polygate_common::{CredentialCipher, GatewayConfig, UpstreamGuard};
use polygate_storage::{GatewayStore, UsageSink};

use crate::auth::ApiKeyAuthenticator;
use crate::dispatch::Dispatcher;
use crate::health::HealthTracker;
use crate::ratelimit::RateLimiter;
use crate::refresh::TokenRefresher;
use crate::route::RouteResolver;
use crate::select::AccountSelector;
use crate::upstream::UpstreamClient;

const USAGE_QUEUE_CAPACITY: usize = 4096;

/// The wired request-plane: everything a handler needs, dependency-injected
/// once at bootstrap. No hidden globals.
pub struct Gateway {
    pub config: Arc<GatewayConfig>,
    pub store: GatewayStore,
    pub authenticator: ApiKeyAuthenticator,
    pub limiter: Arc<RateLimiter>,
    pub health: Arc<HealthTracker>,
    pub resolver: RouteResolver,
    pub dispatcher: Dispatcher,
    pub usage: UsageSink,
}

impl Gateway {
    /// Wires components and spawns the janitor and usage-sink tasks.
    /// Must run inside a tokio runtime.
    pub fn build(
        config: GatewayConfig,
        store: GatewayStore,
        upstream: Arc<dyn UpstreamClient>,
    ) -> anyhow::Result<Arc<Self>> {
        let cipher = CredentialCipher::from_hex(&config.encryption_key)?;
        let guard = UpstreamGuard::from_config(&config);

        let limiter = Arc::new(RateLimiter::new());
        limiter.spawn_janitor();

        let health = Arc::new(HealthTracker::new());
        let selector = AccountSelector::new(store.clone(), Arc::clone(&health));
        let refresher = TokenRefresher::new(store.clone(), cipher.clone(), &config)?;
        let resolver = RouteResolver::new(store.clone(), guard, cipher, selector, refresher);
        let dispatcher = Dispatcher::new(upstream, Arc::clone(&health));
        let authenticator = ApiKeyAuthenticator::new(store.clone());
        let (usage, _usage_task) = UsageSink::spawn(store.clone(), USAGE_QUEUE_CAPACITY);

        Ok(Arc::new(Self {
            config: Arc::new(config),
            store,
            authenticator,
            limiter,
            health,
            resolver,
            dispatcher,
            usage,
        }))
    }

    pub fn rate_window(&self) -> Duration {
        Duration::from_millis(self.config.rate_limit_window_ms)
    }
}
