//! HTTP client for the storage node's bag API
//!
//! Three endpoints are used:
//!
//! - `GET  {api}/api/v1/details?bag_id=..` bag status
//! - `POST {api}/api/v1/add`               start or widen a download
//! - `POST {api}/api/v1/create`            register a local path as a bag
//!
//! # Example
//!
//! ```rust,no_run
//! use bagtree_client::StorageNodeClient;
//! use bagtree_core::{PoolConfig, WorkerPool};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = StorageNodeClient::new("http://127.0.0.1:8192");
//!     let pool = WorkerPool::new(Arc::new(client), PoolConfig::default());
//!
//!     let root = pool.merkle_root("ab12...").await?;
//!     println!("root: {}", bagtree_core::to_hex(&root));
//!     Ok(())
//! }
//! ```

use async_trait::async_trait;
use bagtree_core::{AddBagRequest, BagDetails, BagSource, SourceError};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Default per-request timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Bag not found: {0}")]
    NotFound(String),

    #[error("Storage node returned {status}: {body}")]
    Status { status: u16, body: String },
}

impl From<ClientError> for SourceError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::NotFound(bag_id) => SourceError::NotFound(bag_id),
            other => SourceError::Http(other.to_string()),
        }
    }
}

#[derive(Serialize)]
struct CreateBagBody<'a> {
    path: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<&'a str>,
}

#[derive(Deserialize)]
struct CreateBagResponse {
    bag_id: String,
}

/// Storage node API client
#[derive(Clone)]
pub struct StorageNodeClient {
    base_url: String,
    http: reqwest::Client,
    timeout: Duration,
}

impl StorageNodeClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Set request timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Register a local file or directory as a bag, returning its id
    pub async fn create(&self, path: &str, description: Option<&str>) -> Result<String, ClientError> {
        let resp = self
            .http
            .post(self.url("/api/v1/create"))
            .timeout(self.timeout)
            .json(&CreateBagBody { path, description })
            .send()
            .await?;
        let resp = check_status(resp, None).await?;
        let created: CreateBagResponse = resp.json().await?;
        debug!("Created bag {} from {}", created.bag_id, path);
        Ok(created.bag_id)
    }

    /// Current status of a bag
    pub async fn details(&self, bag_id: &str) -> Result<BagDetails, ClientError> {
        let resp = self
            .http
            .get(self.url("/api/v1/details"))
            .query(&[("bag_id", bag_id)])
            .timeout(self.timeout)
            .send()
            .await?;
        let resp = check_status(resp, Some(bag_id)).await?;
        Ok(resp.json().await?)
    }

    /// Start or extend a download
    pub async fn add(&self, request: &AddBagRequest) -> Result<(), ClientError> {
        debug!(
            "Adding bag {} ({} files, download_all={})",
            request.bag_id,
            request.files.len(),
            request.download_all
        );
        let resp = self
            .http
            .post(self.url("/api/v1/add"))
            .timeout(self.timeout)
            .json(request)
            .send()
            .await?;
        check_status(resp, Some(&request.bag_id)).await?;
        Ok(())
    }
}

async fn check_status(resp: reqwest::Response, bag_id: Option<&str>) -> Result<reqwest::Response, ClientError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    if status.as_u16() == 404 {
        if let Some(bag_id) = bag_id {
            return Err(ClientError::NotFound(bag_id.to_string()));
        }
    }
    let body = resp.text().await.unwrap_or_default();
    warn!("Storage node returned {}: {}", status, body);
    Err(ClientError::Status {
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl BagSource for StorageNodeClient {
    async fn create_bag(&self, path: &str, description: Option<&str>) -> Result<String, SourceError> {
        Ok(self.create(path, description).await?)
    }

    async fn bag_details(&self, bag_id: &str) -> Result<BagDetails, SourceError> {
        Ok(self.details(bag_id).await?)
    }

    async fn add_bag(&self, request: &AddBagRequest) -> Result<(), SourceError> {
        Ok(self.add(request).await?)
    }
}
