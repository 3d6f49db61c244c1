// ABOUTME: ApiBackend trait - the HTTP layer a worker issues requests through.
// ABOUTME: HttpBackend implements it with reqwest against a base URL.

use async_trait::async_trait;

use crate::bucket::HeaderSet;
use crate::error::FleetError;

/// An outgoing API call.
///
/// `route` is the bucket key (a path template such as
/// `/channels/:id/messages`); `path` is the concrete path sent.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: reqwest::Method,
    pub route: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
}

impl ApiRequest {
    /// Create a request whose route is its path.
    pub fn new(method: reqwest::Method, path: impl Into<String>) -> Self {
        let path = path.into();
        Self {
            method,
            route: path.clone(),
            path,
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(reqwest::Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(reqwest::Method::POST, path)
    }

    /// Set the bucket route separately from the path.
    pub fn route(mut self, route: impl Into<String>) -> Self {
        self.route = route.into();
        self
    }

    /// Add a request header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Set a JSON body.
    pub fn json(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }
}

/// What came back from the API.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub headers: HeaderSet,
    pub body: String,
}

impl ApiResponse {
    pub fn is_rate_limited(&self) -> bool {
        self.status == 429
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Trait for the HTTP layer beneath a worker.
#[async_trait]
pub trait ApiBackend: Send + Sync {
    /// Send one request and return its response, whatever the status.
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, FleetError>;
}

/// Backend that sends requests with reqwest.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    base_url: String,
    http: reqwest::Client,
}

impl HttpBackend {
    /// Create a backend for `base_url` with a default client.
    pub fn new(base_url: &str) -> Result<Self, FleetError> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .user_agent(format!("fleetgate/{}", env!("CARGO_PKG_VERSION")))
            .build()?;
        Self::with_client(base_url, http)
    }

    /// Create a backend that reuses an existing client.
    pub fn with_client(base_url: &str, http: reqwest::Client) -> Result<Self, FleetError> {
        reqwest::Url::parse(base_url).map_err(|e| FleetError::Backend(e.into()))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl ApiBackend for HttpBackend {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, FleetError> {
        let url = format!("{}{}", self.base_url, request.path);
        let mut builder = self.http.request(request.method.clone(), &url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let headers = HeaderSet::from_header_map(response.headers());
        let body = response.text().await?;

        Ok(ApiResponse {
            status,
            headers,
            body,
        })
    }
}
