use std::sync::Arc;
use std::time::Duration;

use polygate_common::GatewayError;
use polygate_translate::PreparedRequest;

use crate::health::HealthTracker;
use crate::route::ResolvedRoute;
use crate::upstream::{UpstreamClient, UpstreamFailure, UpstreamRequest, UpstreamResponse};

/// Upstream error bodies are truncated to this many bytes on the wire.
const ERROR_BODY_PREFIX: usize = 500;

/// Issues the prepared upstream call and feeds the outcome back into the
/// health engine when an OAuth account served it. Once a call has been
/// issued the outcome is final; there is no cross-candidate retry.
pub struct Dispatcher {
    upstream: Arc<dyn UpstreamClient>,
    health: Arc<HealthTracker>,
}

impl Dispatcher {
    pub fn new(upstream: Arc<dyn UpstreamClient>, health: Arc<HealthTracker>) -> Self {
        Self { upstream, health }
    }

    pub async fn dispatch(
        &self,
        route: &ResolvedRoute,
        prepared: PreparedRequest,
        want_stream: bool,
    ) -> Result<UpstreamResponse, GatewayError> {
        let timeout = Duration::from_millis(route.provider.timeout_ms.max(1) as u64);
        let request = UpstreamRequest {
            url: prepared.url,
            headers: prepared.headers,
            body: Some(prepared.body),
            timeout,
            want_stream,
        };

        let account_id = route.oauth.as_ref().map(|grant| grant.account_id);

        let response = match self.upstream.send(request).await {
            Ok(response) => response,
            Err(UpstreamFailure::Timeout) => {
                if let Some(id) = account_id {
                    self.health.record_failure(id).await;
                }
                return Err(GatewayError::timeout(format!(
                    "upstream {} timed out after {}ms",
                    route.provider.name, route.provider.timeout_ms
                )));
            }
            Err(UpstreamFailure::Transport(message)) => {
                if let Some(id) = account_id {
                    self.health.record_failure(id).await;
                }
                return Err(GatewayError::provider(format!(
                    "upstream {} unreachable: {message}",
                    route.provider.name
                )));
            }
        };

        if (200..300).contains(&response.status) {
            if let Some(id) = account_id {
                self.health.record_success(id).await;
            }
            return Ok(response);
        }

        if let Some(id) = account_id {
            if response.status == 429 {
                self.health.record_rate_limit(id).await;
            } else {
                self.health.record_failure(id).await;
            }
        }

        let prefix = match &response.body {
            crate::upstream::UpstreamBody::Bytes(body) => {
                let cut = body.len().min(ERROR_BODY_PREFIX);
                String::from_utf8_lossy(&body[..cut]).into_owned()
            }
            crate::upstream::UpstreamBody::Stream(_) => String::new(),
        };
        Err(GatewayError::provider(format!(
            "upstream {} returned {}: {prefix}",
            route.provider.name, response.status
        )))
    }
}
