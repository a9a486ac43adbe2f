use url::{Host, Url};

use crate::config::GatewayConfig;

/// Validates upstream base URLs before any socket is opened.
///
/// Rules, in order: disabled ⇒ allow; production posture requires https;
/// private/loopback/link-local hosts are always rejected; a non-empty
/// allowlist requires an exact (case-insensitive) host match.
#[derive(Debug, Clone)]
pub struct UpstreamGuard {
    disabled: bool,
    require_https: bool,
    allowlist: Vec<String>,
}

impl UpstreamGuard {
    pub fn new(disabled: bool, require_https: bool, allowlist: Vec<String>) -> Self {
        let allowlist = allowlist
            .into_iter()
            .map(|host| host.trim().to_ascii_lowercase())
            .filter(|host| !host.is_empty())
            .collect();
        Self {
            disabled,
            require_https,
            allowlist,
        }
    }

    pub fn from_config(config: &GatewayConfig) -> Self {
        Self::new(
            config.disable_ssrf_protection,
            config.posture.is_production(),
            config.allowed_upstream_hosts.clone(),
        )
    }

    /// An always-allow guard, for tests and explicitly trusted setups.
    pub fn permissive() -> Self {
        Self::new(true, false, Vec::new())
    }

    pub fn check(&self, raw: &str) -> Result<(), String> {
        if self.disabled {
            return Ok(());
        }

        let url = Url::parse(raw).map_err(|err| format!("unparseable url: {err}"))?;

        if self.require_https && url.scheme() != "https" {
            return Err(format!("scheme {} not allowed", url.scheme()));
        }
        if !matches!(url.scheme(), "http" | "https") {
            return Err(format!("scheme {} not allowed", url.scheme()));
        }

        let host = match url.host() {
            Some(Host::Domain(domain)) => domain.to_ascii_lowercase(),
            Some(Host::Ipv4(addr)) => addr.to_string(),
            Some(Host::Ipv6(addr)) => addr.to_string(),
            None => return Err("missing host".to_string()),
        };

        if is_private_host(&host) {
            return Err(format!("host {host} is in a private range"));
        }

        if !self.allowlist.is_empty() && !self.allowlist.iter().any(|allowed| *allowed == host) {
            return Err(format!("host {host} not in allowlist"));
        }

        Ok(())
    }
}

fn is_private_host(host: &str) -> bool {
    if host == "localhost" || host == "::1" {
        return true;
    }
    if host.starts_with("127.")
        || host.starts_with("10.")
        || host.starts_with("192.168.")
        || host.starts_with("0.")
        || host.starts_with("169.254.")
    {
        return true;
    }
    for block in 16..=31 {
        if host.starts_with(&format!("172.{block}.")) {
            return true;
        }
    }
    let lower = host.to_ascii_lowercase();
    lower.starts_with("fc00:") || lower.starts_with("fe80:") || lower.starts_with("fd")
}
