//! HTTP object store client.
//!
//! Talks to any store exposing `PUT`/`DELETE {endpoint}/{bucket}/{key}` with
//! bearer authentication (S3-compatible gateways, MinIO behind a proxy).

use async_trait::async_trait;
use domain::services::{CloudStorage, CloudStorageError};
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::debug;

use crate::config::CloudStorageConfig;

pub struct HttpObjectStore {
    client: Client,
    endpoint: String,
    access_token: String,
}

impl HttpObjectStore {
    pub fn new(config: &CloudStorageConfig) -> Result<Self, CloudStorageError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| CloudStorageError::Request(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            access_token: config.access_token.clone(),
        })
    }

    fn object_url(&self, bucket: &str, key: &str) -> String {
        format!("{}/{}/{}", self.endpoint, bucket, key)
    }

    fn request(&self, method: reqwest::Method, bucket: &str, key: &str) -> reqwest::RequestBuilder {
        let builder = self.client.request(method, self.object_url(bucket, key));
        if self.access_token.is_empty() {
            builder
        } else {
            builder.bearer_auth(&self.access_token)
        }
    }
}

fn status_error(status: StatusCode, bucket: &str) -> CloudStorageError {
    match status {
        StatusCode::NOT_FOUND => CloudStorageError::BucketNotFound(bucket.to_string()),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            CloudStorageError::AccessDenied(bucket.to_string())
        }
        other => CloudStorageError::Request(format!("object store returned {}", other)),
    }
}

#[async_trait]
impl CloudStorage for HttpObjectStore {
    async fn put_object(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<(), CloudStorageError> {
        debug!(bucket = %bucket, key = %key, size = body.len(), "Uploading object");

        let response = self
            .request(reqwest::Method::PUT, bucket, key)
            .header(reqwest::header::CONTENT_TYPE, "text/csv")
            .body(body)
            .send()
            .await
            .map_err(|e| CloudStorageError::Request(e.to_string()))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(status_error(response.status(), bucket))
        }
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), CloudStorageError> {
        let response = self
            .request(reqwest::Method::DELETE, bucket, key)
            .send()
            .await
            .map_err(|e| CloudStorageError::Request(e.to_string()))?;

        let status = response.status();
        if status.is_success() || status == StatusCode::NOT_FOUND {
            Ok(())
        } else {
            Err(status_error(status, bucket))
        }
    }
}
