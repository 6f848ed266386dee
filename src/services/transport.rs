//! HTTP transport seam.
//!
//! Every remote call goes through [`Transport::execute`] with a freshly built,
//! immutable [`HttpRequest`]. Implementations must be safe to share between
//! concurrent uploads and job runners; no state is carried across calls.

use crate::errors::{TransferError, TransferResult};
use crate::models::credential::Credential;
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{
    Client, Method, StatusCode, Url,
    header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue},
};
use serde::{Serialize, de::DeserializeOwned};
use std::time::Duration;

/// A request value, built per call and never mutated after being handed off.
#[derive(Clone, Debug)]
pub struct HttpRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

impl HttpRequest {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: None,
        }
    }

    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn put(url: Url) -> Self {
        Self::new(Method::PUT, url)
    }

    pub fn post(url: Url) -> Self {
        Self::new(Method::POST, url)
    }

    pub fn delete(url: Url) -> Self {
        Self::new(Method::DELETE, url)
    }

    pub fn header(mut self, name: HeaderName, value: &str) -> TransferResult<Self> {
        let value = HeaderValue::from_str(value).map_err(|err| {
            TransferError::config(format!("invalid value for header `{}`: {}", name, err))
        })?;
        self.headers.insert(name, value);
        Ok(self)
    }

    pub fn authorized(self, credential: &Credential) -> TransferResult<Self> {
        self.header(AUTHORIZATION, &credential.authorization())
    }

    pub fn body(mut self, body: Bytes) -> Self {
        self.body = Some(body);
        self
    }

    pub fn json<T: Serialize>(self, payload: &T) -> TransferResult<Self> {
        let body = serde_json::to_vec(payload)?;
        Ok(self
            .header(CONTENT_TYPE, "application/json")?
            .body(Bytes::from(body)))
    }

    /// Header value as text, if present and valid UTF-8.
    pub fn header_str(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// Status code, headers and the fully read body.
#[derive(Clone, Debug)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl HttpResponse {
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn header_str(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: DeserializeOwned>(&self) -> TransferResult<T> {
        serde_json::from_slice(&self.body).map_err(|err| {
            TransferError::protocol(format!("decoding {} response body: {}", self.status, err))
        })
    }

    /// Turns any non-2xx response into [`TransferError::Status`].
    pub fn error_for_status(self) -> TransferResult<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(TransferError::status(self.status, &self.text()))
        }
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(&self, request: HttpRequest) -> TransferResult<HttpResponse>;
}

/// [`Transport`] backed by a shared `reqwest::Client`.
#[derive(Clone, Debug)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> TransferResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| TransferError::config(format!("building HTTP client: {}", err)))?;
        Ok(Self { client })
    }

    pub fn from_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn execute(&self, request: HttpRequest) -> TransferResult<HttpResponse> {
        let HttpRequest {
            method,
            url,
            headers,
            body,
        } = request;

        let mut builder = self.client.request(method, url).headers(headers);
        if let Some(body) = body {
            builder = builder.body(body);
        }

        let response = builder.send().await?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?;
        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}
