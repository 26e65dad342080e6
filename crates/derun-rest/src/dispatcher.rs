//! REST dispatcher
//!
//! Serializes one HTTP call through the rate limiter, refreshes bucket state
//! from the response headers and maps the response to a `RestResult`.

use crate::error::{RestError, RestResult};
use crate::models::{ApiErrorBody, GatewayBotInfo, RateLimitBody};
use crate::ratelimit::{route_key, RateLimiter, HEADER_GLOBAL};
use crate::transport::{HttpTransport, RawResponse, RequestMethod, ReqwestTransport, RestRequest};
use derun_common::{RestConfig, Token};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Rate-limited REST client
pub struct RestDispatcher {
    config: RestConfig,
    token: Token,
    limiter: Arc<RateLimiter>,
    transport: Arc<dyn HttpTransport>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl RestDispatcher {
    /// Create a dispatcher backed by `reqwest`
    pub fn new(token: Token, config: RestConfig) -> RestResult<Self> {
        let config = config.normalized();
        let transport = Arc::new(ReqwestTransport::new(&config)?);
        Ok(Self::with_transport(token, config, transport))
    }

    /// Create a dispatcher over a custom transport
    pub fn with_transport(
        token: Token,
        config: RestConfig,
        transport: Arc<dyn HttpTransport>,
    ) -> Self {
        let config = config.normalized();
        Self {
            limiter: RateLimiter::new_shared(&config),
            config,
            token,
            transport,
            sweeper: Mutex::new(None),
        }
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn config(&self) -> &RestConfig {
        &self.config
    }

    /// Start the periodic bucket sweep; later calls are no-ops
    ///
    /// Must be called from within a tokio runtime.
    pub fn start_sweeper(&self) {
        let mut sweeper = self.sweeper.lock();
        if sweeper.is_none() {
            *sweeper = Some(self.limiter.spawn_sweeper());
            tracing::debug!(
                interval_ms = self.config.clean_interval_ms,
                "Route bucket sweeper started"
            );
        }
    }

    /// Stop the bucket sweep started by `start_sweeper`
    pub fn stop_sweeper(&self) {
        if let Some(handle) = self.sweeper.lock().take() {
            handle.abort();
        }
    }

    /// Perform one API call
    ///
    /// `path` is relative to the API base URL unless it is already absolute.
    /// A successful response with an empty body yields `Ok(None)`.
    pub async fn request(
        &self,
        method: RequestMethod,
        path: &str,
        authenticate: bool,
        body: Option<&Value>,
    ) -> RestResult<Option<Value>> {
        let route = route_key(method, path);
        let request = self.build_request(method, path, authenticate, body)?;

        self.limiter.acquire(&route).await;

        let response = match self.transport.execute(request).await {
            Ok(response) => response,
            Err(err) => {
                tracing::warn!(method = %method, route = %route, error = %err, "REST request failed");
                return Err(err);
            }
        };

        self.limiter.update(&route, &response.headers);

        tracing::debug!(
            method = %method,
            route = %route,
            status = response.status,
            "REST request completed"
        );

        self.handle_response(&route, response)
    }

    /// Fetch gateway connection metadata (`GET /gateway/bot`)
    pub async fn gateway_bot(&self) -> RestResult<GatewayBotInfo> {
        let value = self
            .request(RequestMethod::Get, "/gateway/bot", true, None)
            .await?
            .ok_or_else(|| RestError::Transport("empty /gateway/bot response".to_string()))?;
        Ok(serde_json::from_value(value)?)
    }

    fn build_request(
        &self,
        method: RequestMethod,
        path: &str,
        authenticate: bool,
        body: Option<&Value>,
    ) -> RestResult<RestRequest> {
        let url = if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!(
                "{}/{}",
                self.config.api_base_url.trim_end_matches('/'),
                path.trim_start_matches('/')
            )
        };

        let mut headers = vec![
            ("user-agent".to_string(), self.config.user_agent.clone()),
            ("content-type".to_string(), "application/json".to_string()),
        ];
        if authenticate {
            headers.push(("authorization".to_string(), self.token.authorization_header()));
        }

        let body = body.map(serde_json::to_vec).transpose()?;

        Ok(RestRequest {
            method,
            url,
            headers,
            body,
        })
    }

    fn handle_response(&self, route: &str, response: RawResponse) -> RestResult<Option<Value>> {
        if response.is_success() {
            if response.status == 204 || response.body.iter().all(u8::is_ascii_whitespace) {
                return Ok(None);
            }
            return Ok(Some(serde_json::from_slice(&response.body)?));
        }

        match response.status {
            401 => Err(RestError::Unauthorized),
            429 => {
                let body: Option<RateLimitBody> = serde_json::from_slice(&response.body).ok();
                let global = body.as_ref().is_some_and(|b| b.global)
                    || response.header(HEADER_GLOBAL).is_some_and(|v| v == "true");
                let retry_after = body
                    .and_then(|b| Duration::try_from_secs_f64(b.retry_after).ok())
                    .or_else(|| {
                        response
                            .header("retry-after")
                            .and_then(|v| v.trim().parse::<f64>().ok())
                            .and_then(|s| Duration::try_from_secs_f64(s).ok())
                    })
                    .unwrap_or(Duration::from_secs(1));

                if global {
                    self.limiter.global().pause(retry_after);
                }
                tracing::warn!(
                    route = %route,
                    retry_after_ms = retry_after.as_millis() as u64,
                    global,
                    "Rate limited by server"
                );
                Err(RestError::RateLimited {
                    retry_after,
                    global,
                })
            }
            status => {
                let body: ApiErrorBody = serde_json::from_slice(&response.body).unwrap_or_default();
                let message = if body.message.is_empty() {
                    String::from_utf8_lossy(&response.body).trim().to_string()
                } else {
                    body.message
                };
                Err(RestError::Api {
                    status,
                    code: body.code,
                    message,
                })
            }
        }
    }
}

impl Drop for RestDispatcher {
    fn drop(&mut self) {
        if let Some(handle) = self.sweeper.get_mut().take() {
            handle.abort();
        }
    }
}

impl std::fmt::Debug for RestDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestDispatcher")
            .field("api_base_url", &self.config.api_base_url)
            .field("buckets", &self.limiter.bucket_count())
            .finish()
    }
}
