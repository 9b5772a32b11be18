//! HTTP client for the coordinator API.
//!
//! `RetryingClient` owns the per-request retry loop and the bearer token.
//! `CoordinatorClient` maps the `Coordinator` port onto concrete endpoints.

mod coordinator;
mod retry;

pub use coordinator::CoordinatorClient;
pub use retry::{RetryPolicy, parse_retry_after};

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use reqwest::{Method, StatusCode, Url};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::config::ApiConfig;
use crate::domain::EdgeEvent;
use crate::error::ClientError;
use crate::ports::EventSink;

/// What a single attempt ended with, before retry policy is applied.
enum Attempt {
    Done(Value),
    Transient(String),
    RateLimited(Option<u64>),
}

pub struct RetryingClient {
    http: reqwest::Client,
    base_url: String,
    login_path: String,
    policy: RetryPolicy,
    token: RwLock<Option<String>>,
    needs_reauth: AtomicBool,
    sink: Arc<dyn EventSink>,
}

impl RetryingClient {
    pub fn new(api: &ApiConfig, sink: Arc<dyn EventSink>) -> Result<Self, ClientError> {
        Url::parse(&api.base_url).map_err(|e| ClientError::InvalidUrl(format!("{}: {e}", api.base_url)))?;
        let http = reqwest::Client::builder()
            .timeout(api.timeout())
            .build()
            .map_err(|e| ClientError::Build(e.to_string()))?;

        Ok(Self {
            http,
            base_url: api.base_url.trim_end_matches('/').to_string(),
            login_path: api.endpoints.login.clone(),
            policy: RetryPolicy::from_config(api),
            token: RwLock::new(api.token.clone()),
            needs_reauth: AtomicBool::new(false),
            sink,
        })
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn set_token(&self, token: impl Into<String>) {
        *self.token.write() = Some(token.into());
        self.needs_reauth.store(false, Ordering::SeqCst);
    }

    pub fn token(&self) -> Option<String> {
        self.token.read().clone()
    }

    pub fn clear_token(&self) {
        *self.token.write() = None;
    }

    /// True after a 401 cleared the token; reset by `set_token`/`login`.
    pub fn needs_reauth(&self) -> bool {
        self.needs_reauth.load(Ordering::SeqCst)
    }

    /// Exchange credentials for a bearer token and keep it.
    pub async fn login(&self, email: &str, password: &str) -> Result<String, ClientError> {
        let body = json!({ "email": email, "password": password });
        let response: Value = self.post(&self.login_path, &body).await?;
        let token = response
            .pointer("/data/token")
            .or_else(|| response.get("token"))
            .and_then(Value::as_str)
            .ok_or_else(|| ClientError::Decode("login response carries no token".into()))?
            .to_string();
        self.set_token(token.clone());
        info!("logged in as {email}");
        Ok(token)
    }

    pub async fn post<B, R>(&self, path: &str, body: &B) -> Result<R, ClientError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let value = self.request(Method::POST, path, Some(body)).await?;
        decode(value)
    }

    pub async fn get<R: DeserializeOwned>(&self, path: &str) -> Result<R, ClientError> {
        let value = self.request::<Value>(Method::GET, path, None).await?;
        decode(value)
    }

    /// One logical request with retries.
    ///
    /// - 401: token cleared, `Auth` returned, no retry.
    /// - 429: wait `Retry-After` (or the default) and try again without
    ///   counting it as a retry; too many in a row is `RateLimited`.
    /// - network error, timeout, 5xx: linear backoff up to `max_retries`.
    /// - `{"success": false}` or a JSON error body on another status:
    ///   `Business`, no retry.
    pub async fn request<B>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<Value, ClientError>
    where
        B: Serialize + ?Sized,
    {
        let url = self.url(path)?;
        let mut retries = 0u32;
        let mut rate_limit_waits = 0u32;

        loop {
            match self.attempt(&method, &url, path, body).await? {
                Attempt::Done(value) => return Ok(value),
                Attempt::RateLimited(retry_after) => {
                    if rate_limit_waits >= self.policy.max_rate_limit_waits {
                        return Err(ClientError::RateLimited {
                            waits: rate_limit_waits,
                        });
                    }
                    rate_limit_waits += 1;
                    let wait = self.policy.rate_limit_wait(retry_after);
                    self.sink.emit(EdgeEvent::RateLimited {
                        path: path.to_string(),
                        wait,
                    });
                    tokio::time::sleep(wait).await;
                }
                Attempt::Transient(reason) => {
                    rate_limit_waits = 0;
                    if retries >= self.policy.max_retries {
                        return Err(ClientError::Transport {
                            attempts: retries + 1,
                            message: reason,
                        });
                    }
                    let delay = self.policy.backoff(retries);
                    retries += 1;
                    self.sink.emit(EdgeEvent::RequestRetry {
                        path: path.to_string(),
                        attempt: retries,
                        delay,
                        reason,
                    });
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn attempt<B>(
        &self,
        method: &Method,
        url: &Url,
        path: &str,
        body: Option<&B>,
    ) -> Result<Attempt, ClientError>
    where
        B: Serialize + ?Sized,
    {
        let mut req = self.http.request(method.clone(), url.clone());
        if let Some(token) = self.token() {
            req = req.bearer_auth(token);
        }
        if let Some(body) = body {
            req = req.json(body);
        }

        let response = match req.send().await {
            Ok(response) => response,
            Err(err) => return Ok(Attempt::Transient(describe(&err))),
        };

        let status = response.status();
        debug!(%status, path, "coordinator response");

        if status == StatusCode::UNAUTHORIZED {
            self.clear_token();
            self.needs_reauth.store(true, Ordering::SeqCst);
            self.sink.emit(EdgeEvent::AuthRequired {
                path: path.to_string(),
            });
            return Err(ClientError::Auth);
        }
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Ok(Attempt::RateLimited(parse_retry_after(&response)));
        }
        if status.is_server_error() {
            return Ok(Attempt::Transient(format!("server returned {status}")));
        }

        let bytes = match response.bytes().await {
            Ok(bytes) => bytes,
            Err(err) => return Ok(Attempt::Transient(describe(&err))),
        };
        let value: Option<Value> = if bytes.is_empty() {
            Some(Value::Null)
        } else {
            serde_json::from_slice(&bytes).ok()
        };

        if status.is_success() {
            let value = value.ok_or_else(|| {
                ClientError::Decode(format!("non-JSON body from {path} ({} bytes)", bytes.len()))
            })?;
            if value.get("success") == Some(&Value::Bool(false)) {
                return Err(ClientError::Business {
                    status: status.as_u16(),
                    message: error_message(&value, status),
                });
            }
            return Ok(Attempt::Done(value));
        }

        let message = match &value {
            Some(value) => error_message(value, status),
            None => String::from_utf8_lossy(&bytes).chars().take(512).collect(),
        };
        Err(ClientError::Business {
            status: status.as_u16(),
            message,
        })
    }

    fn url(&self, path: &str) -> Result<Url, ClientError> {
        let joined = if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        };
        Url::parse(&joined).map_err(|e| ClientError::InvalidUrl(format!("{joined}: {e}")))
    }
}

fn decode<R: DeserializeOwned>(value: Value) -> Result<R, ClientError> {
    serde_json::from_value(value).map_err(|e| ClientError::Decode(e.to_string()))
}

fn describe(err: &reqwest::Error) -> String {
    if err.is_timeout() {
        format!("request timed out: {err}")
    } else if err.is_connect() {
        format!("connection failed: {err}")
    } else {
        err.to_string()
    }
}

fn error_message(body: &Value, status: StatusCode) -> String {
    body.get("message")
        .or_else(|| body.get("error"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| {
            status
                .canonical_reason()
                .unwrap_or("request failed")
                .to_string()
        })
}
