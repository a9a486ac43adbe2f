use serde::{Deserialize, Serialize};

/// Upstream hosts accepted when no explicit allowlist is configured.
pub const DEFAULT_ALLOWED_HOSTS: &[&str] = &[
    "api.openai.com",
    "api.anthropic.com",
    "generativelanguage.googleapis.com",
    "oauth2.googleapis.com",
    "auth.openai.com",
];

pub const DEFAULT_GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
pub const DEFAULT_OPENAI_TOKEN_URL: &str = "https://auth.openai.com/oauth/token";

/// Runtime posture. Production enforces HTTPS upstreams and suppresses
/// raw internal error messages on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Posture {
    Development,
    Production,
}

impl Posture {
    pub fn parse(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("production") {
            Posture::Production
        } else {
            Posture::Development
        }
    }

    pub fn is_production(self) -> bool {
        matches!(self, Posture::Production)
    }
}

/// Final, merged process configuration.
///
/// Built once at bootstrap from CLI flags and environment; required fields
/// (`database_url`, `encryption_key`) are validated there.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    /// 64 hex chars; parsed into the AES-256-GCM key at bootstrap.
    pub encryption_key: String,
    pub base_url: String,
    pub posture: Posture,

    pub google_client_id: Option<String>,
    pub google_client_secret: Option<String>,
    pub openai_client_id: Option<String>,
    pub google_token_url: String,
    pub openai_token_url: String,

    pub allowed_upstream_hosts: Vec<String>,
    pub disable_ssrf_protection: bool,

    pub rate_limit_window_ms: u64,
    pub rate_limit_max_requests: u32,
    pub global_rate_limit_max: u32,
}

impl GatewayConfig {
    pub fn defaults(database_url: String, encryption_key: String) -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 4000,
            database_url,
            encryption_key,
            base_url: "http://localhost:4000".to_string(),
            posture: Posture::Development,
            google_client_id: None,
            google_client_secret: None,
            openai_client_id: None,
            google_token_url: DEFAULT_GOOGLE_TOKEN_URL.to_string(),
            openai_token_url: DEFAULT_OPENAI_TOKEN_URL.to_string(),
            allowed_upstream_hosts: DEFAULT_ALLOWED_HOSTS
                .iter()
                .map(|host| host.to_string())
                .collect(),
            disable_ssrf_protection: false,
            rate_limit_window_ms: 60_000,
            rate_limit_max_requests: 60,
            global_rate_limit_max: 1000,
        }
    }
}
