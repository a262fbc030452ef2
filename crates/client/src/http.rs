// crates/client/src/http.rs
//! Blocking HTTP transport: URL building, API-key signing, status mapping.

use std::time::Instant;

use geoapi_core::TransportError;
use reqwest::blocking::{multipart::Form, Client, RequestBuilder, Response};
use reqwest::StatusCode;
use serde_json::Value;

use crate::config::ClientConfig;

/// One configured connection to the platform.
///
/// Every call is exactly one round trip; nothing here retries.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: String,
    username: Option<String>,
    api_key: Option<String>,
}

impl HttpTransport {
    pub fn new(config: &ClientConfig) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(config.timeout())
            .user_agent(concat!("geoapi/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(network)?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            username: config.username.clone(),
            api_key: config.api_key.clone(),
        })
    }

    /// `{base_url}[/user/{username}]{path}`
    pub fn url(&self, path: &str) -> String {
        match &self.username {
            Some(user) => format!("{}/user/{}{}", self.base_url, user, path),
            None => format!("{}{}", self.base_url, path),
        }
    }

    pub fn get(&self, path: &str) -> Result<Value, TransportError> {
        self.send("GET", path, self.client.get(self.url(path)))
    }

    pub fn post_json(&self, path: &str, body: &Value) -> Result<Value, TransportError> {
        self.send("POST", path, self.client.post(self.url(path)).json(body))
    }

    pub fn post_multipart(&self, path: &str, form: Form) -> Result<Value, TransportError> {
        self.send("POST", path, self.client.post(self.url(path)).multipart(form))
    }

    pub fn put(&self, path: &str, body: Option<&Value>) -> Result<Value, TransportError> {
        let request = self.client.put(self.url(path));
        let request = match body {
            Some(body) => request.json(body),
            None => request,
        };
        self.send("PUT", path, request)
    }

    pub fn delete(&self, path: &str) -> Result<Value, TransportError> {
        self.send("DELETE", path, self.client.delete(self.url(path)))
    }

    fn send(&self, method: &str, path: &str, request: RequestBuilder) -> Result<Value, TransportError> {
        let request = match &self.api_key {
            Some(key) => request.query(&[("api_key", key)]),
            None => request,
        };
        let started = Instant::now();
        let response = request.send().map_err(network)?;
        let status = response.status();
        tracing::debug!(
            method,
            path,
            status = status.as_u16(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "http request"
        );
        decode(status, response)
    }
}

fn decode(status: StatusCode, response: Response) -> Result<Value, TransportError> {
    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after_secs = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(0);
        return Err(TransportError::RateLimited { retry_after_secs });
    }

    let body = response.text().map_err(network)?;
    if !status.is_success() {
        return Err(TransportError::from_status(status.as_u16(), &body));
    }
    if body.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(&body).map_err(|e| TransportError::Decode(e.to_string()))
}

/// The URL carries the api key, so it never reaches the message.
fn network(err: reqwest::Error) -> TransportError {
    let timed_out = err.is_timeout();
    let err = err.without_url();
    if timed_out {
        TransportError::Network(format!("request timed out: {err}"))
    } else {
        TransportError::Network(err.to_string())
    }
}
