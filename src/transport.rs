use std::time::Duration;

use async_trait::async_trait;
use log::warn;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;

use crate::error::{CoreError, Result};

pub const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded; charset=UTF-8";
pub const JSON_CONTENT_TYPE: &str = "application/json";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
}

/// One HTTP exchange with the service manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRequest {
    pub method: Method,
    pub url: String,
    pub body: Option<String>,
    pub content_type: Option<&'static str>,
    pub timeout: Duration,
}

impl ServiceRequest {
    pub fn get(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            body: None,
            content_type: None,
            timeout,
        }
    }

    /// Form-encoded POST; `query` is sent as the body.
    pub fn post_form(url: impl Into<String>, query: impl Into<String>, timeout: Duration) -> Self {
        Self {
            method: Method::Post,
            url: url.into(),
            body: Some(query.into()),
            content_type: Some(FORM_CONTENT_TYPE),
            timeout,
        }
    }

    pub fn put_json(url: impl Into<String>, body: impl Into<String>, timeout: Duration) -> Self {
        Self {
            method: Method::Put,
            url: url.into(),
            body: Some(body.into()),
            content_type: Some(JSON_CONTENT_TYPE),
            timeout,
        }
    }
}

/// Whatever the server answered, error statuses included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

impl TransportResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Status 0: the request never got an answer.
    pub fn is_unreachable(&self) -> bool {
        self.status == 0
    }
}

/// Exchanges that produced no HTTP status at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    Unreachable(String),
    Timeout,
    Aborted(String),
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: ServiceRequest) -> std::result::Result<TransportResponse, TransportError>;
}

/// [`Transport`] backed by a shared `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .build()
            .map_err(|e| CoreError::Transport(format!("build http client: {e}")))?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

fn classify(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout
    } else if err.is_connect() || err.is_request() {
        TransportError::Unreachable(err.to_string())
    } else {
        TransportError::Aborted(err.to_string())
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: ServiceRequest) -> std::result::Result<TransportResponse, TransportError> {
        let mut builder = match request.method {
            Method::Get => self.client.get(&request.url),
            Method::Post => self.client.post(&request.url),
            Method::Put => self.client.put(&request.url),
        }
        .timeout(request.timeout);

        if let Some(content_type) = request.content_type {
            builder = builder.header(CONTENT_TYPE, content_type);
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(|e| {
            warn!("Request to {} failed: {e}", request.url);
            classify(e)
        })?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(classify)?;

        Ok(TransportResponse { status, body })
    }
}
