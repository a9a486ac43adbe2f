pub mod auth;
pub mod bootstrap;
pub mod dispatch;
pub mod health;
pub mod ratelimit;
pub mod refresh;
pub mod route;
pub mod select;
pub mod state;
pub mod upstream;

pub use auth::{ApiKeyAuthenticator, ApiKeyMaterial, extract_bearer, sha256_hex};
pub use bootstrap::{CliArgs, bootstrap, bootstrap_from_env};
pub use dispatch::Dispatcher;
pub use health::{HealthTracker, MIN_USABLE_SCORE};
pub use ratelimit::{RateDecision, RateLimiter};
pub use refresh::TokenRefresher;
pub use route::{OAuthGrant, ResolvedRoute, RouteResolver};
pub use select::AccountSelector;
pub use state::Gateway;
pub use upstream::{
    UpstreamBody, UpstreamClient, UpstreamFailure, UpstreamRequest, UpstreamResponse,
    WreqUpstreamClient,
};
