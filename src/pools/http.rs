//! HTTP client for pools hosted on other nodes
//!
//! `GET {base}/strings/{id}` resolves a record, `POST {base}/strings` stores
//! content. Both exchange JSON.

use super::PoolService;
use crate::error::{Result, TnuError};
use crate::record::{PoolKind, PooledRecord, Upload};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

pub struct HttpPool {
    kind: PoolKind,
    base_url: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct WriteRequest<'a> {
    #[serde(flatten)]
    upload: &'a Upload,
    user: &'a str,
}

impl HttpPool {
    pub fn new(kind: PoolKind, base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TnuError::Pool(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            kind,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn record_url(&self, id: &str) -> String {
        format!("{}/strings/{}", self.base_url, id)
    }

    pub fn write_url(&self) -> String {
        format!("{}/strings", self.base_url)
    }
}

#[async_trait]
impl PoolService for HttpPool {
    fn kind(&self) -> PoolKind {
        self.kind
    }

    async fn resolve(&self, id: &str) -> Result<Option<PooledRecord>> {
        let url = self.record_url(id);
        debug!(pool = %self.kind, url = %url, "Resolving remote record");

        let response = self
            .client
            .get(&url)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| TnuError::Pool(format!("{} pool request failed: {}", self.kind, e)))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(TnuError::Pool(format!(
                "{} pool answered {} for '{}'",
                self.kind,
                response.status(),
                id
            )));
        }

        let record: PooledRecord = response
            .json()
            .await
            .map_err(|e| TnuError::Pool(format!("Failed to parse {} record: {}", self.kind, e)))?;
        Ok(Some(record))
    }

    async fn write(&self, upload: &Upload, user: &str) -> Result<PooledRecord> {
        let response = self
            .client
            .post(self.write_url())
            .header("Content-Type", "application/json")
            .json(&WriteRequest { upload, user })
            .send()
            .await
            .map_err(|e| TnuError::Pool(format!("{} pool request failed: {}", self.kind, e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TnuError::Pool(format!(
                "{} pool rejected upload ({}): {}",
                self.kind, status, body
            )));
        }

        response
            .json()
            .await
            .map_err(|e| TnuError::Pool(format!("Failed to parse {} record: {}", self.kind, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_urls() {
        let pool = HttpPool::new(PoolKind::Reference, "http://refs.example.org/api/", Duration::from_secs(1)).unwrap();
        assert_eq!(pool.base_url(), "http://refs.example.org/api");
        assert_eq!(pool.record_url("ABC"), "http://refs.example.org/api/strings/ABC");
        assert_eq!(pool.write_url(), "http://refs.example.org/api/strings");
    }

    #[test]
    fn test_write_request_shape() {
        let upload = Upload::plain("Carabus");
        let body = serde_json::to_value(WriteRequest { upload: &upload, user: "alice" }).unwrap();
        assert_eq!(body["content"], "Carabus");
        assert_eq!(body["user"], "alice");
    }

    #[tokio::test]
    async fn test_unreachable_pool_is_pool_error() {
        // port 9 (discard) on localhost is not expected to serve HTTP
        let pool = HttpPool::new(PoolKind::NameString, "http://127.0.0.1:9", Duration::from_millis(500)).unwrap();
        let err = pool.resolve(&"A".repeat(32)).await.unwrap_err();
        assert!(matches!(err, TnuError::Pool(_)));
    }
}
