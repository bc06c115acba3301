//! WebDAV client for the remote file store

use super::{clean_path, slice_range, FileStat, StorageBackend, StorageError};
use crate::config::StorageConfig;
use anyhow::{Context, Result};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::{header, Method, StatusCode};
use std::time::Duration;

static CONTENT_LENGTH_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<(?:[a-z0-9_-]+:)?getcontentlength(?:\s[^>]*)?>\s*(\d+)\s*</")
        .expect("getcontentlength pattern is valid")
});

const PROPFIND_BODY: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<d:propfind xmlns:d="DAV:"><d:prop><d:getcontentlength/></d:prop></d:propfind>"#;

pub struct WebDavStorage {
    client: reqwest::Client,
    base_url: String,
    root: Vec<String>,
    username: String,
    password: String,
}

impl WebDavStorage {
    pub fn new(config: &StorageConfig) -> Result<Self> {
        let timeout = config.timeout_seconds.max(config.audio_timeout_seconds);
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(timeout))
            .build()
            .context("Failed to create WebDAV client")?;

        let root = config
            .root
            .split('/')
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string())
            .collect();

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            root,
            username: config.username.clone(),
            password: config.password.clone(),
        })
    }

    /// Absolute URL for a list of segments below the root
    fn url_for(&self, segments: &[&str]) -> String {
        let encoded: Vec<String> = self
            .root
            .iter()
            .map(|s| s.as_str())
            .chain(segments.iter().copied())
            .map(|s| urlencoding::encode(s).into_owned())
            .collect();
        format!("{}/{}", self.base_url, encoded.join("/"))
    }

    fn file_url(&self, path: &str) -> String {
        let segments: Vec<&str> = path.split('/').collect();
        self.url_for(&segments)
    }

    fn request(&self, method: Method, url: &str) -> reqwest::RequestBuilder {
        let builder = self.client.request(method, url);
        if self.username.is_empty() {
            builder
        } else {
            builder.basic_auth(&self.username, Some(&self.password))
        }
    }

    /// Create every missing parent collection of `path`
    async fn ensure_parents(&self, path: &str) -> Result<(), StorageError> {
        let segments: Vec<&str> = path.split('/').collect();
        let mkcol = Method::from_bytes(b"MKCOL")
            .map_err(|e| StorageError::Other(e.to_string()))?;

        for depth in 1..segments.len() {
            let url = format!("{}/", self.url_for(&segments[..depth]));
            let response = self.request(mkcol.clone(), &url).send().await?;
            match response.status() {
                // 405: collection already exists
                s if s.is_success() || s == StatusCode::METHOD_NOT_ALLOWED => {}
                s => {
                    return Err(StorageError::Status {
                        status: s.as_u16(),
                        path: segments[..depth].join("/"),
                    })
                }
            }
        }
        Ok(())
    }
}

fn status_error(status: StatusCode, path: &str) -> StorageError {
    if status == StatusCode::NOT_FOUND {
        StorageError::NotFound(path.to_string())
    } else if status == StatusCode::RANGE_NOT_SATISFIABLE {
        StorageError::RangeNotSatisfiable {
            path: path.to_string(),
        }
    } else {
        StorageError::Status {
            status: status.as_u16(),
            path: path.to_string(),
        }
    }
}

/// Extract the first `getcontentlength` from a PROPFIND multistatus body
pub fn parse_content_length(body: &str) -> Option<u64> {
    CONTENT_LENGTH_RE
        .captures(body)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

#[async_trait]
impl StorageBackend for WebDavStorage {
    async fn stat(&self, path: &str) -> Result<FileStat, StorageError> {
        let path = clean_path(path)?;
        let propfind = Method::from_bytes(b"PROPFIND")
            .map_err(|e| StorageError::Other(e.to_string()))?;

        let response = self
            .request(propfind, &self.file_url(&path))
            .header("Depth", "0")
            .header(header::CONTENT_TYPE, "application/xml; charset=utf-8")
            .body(PROPFIND_BODY)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(status_error(status, &path));
        }
        let body = response.text().await?;
        let size = parse_content_length(&body).ok_or_else(|| {
            StorageError::Other(format!("No content length in PROPFIND response for {}", path))
        })?;
        Ok(FileStat { size })
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        let path = clean_path(path)?;
        let response = self.request(Method::GET, &self.file_url(&path)).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(status_error(status, &path));
        }
        Ok(response.bytes().await?.to_vec())
    }

    async fn read_range(
        &self,
        path: &str,
        start: u64,
        end: u64,
    ) -> Result<Vec<u8>, StorageError> {
        let path = clean_path(path)?;
        let response = self
            .request(Method::GET, &self.file_url(&path))
            .header(header::RANGE, format!("bytes={}-{}", start, end))
            .send()
            .await?;

        match response.status() {
            StatusCode::PARTIAL_CONTENT => Ok(response.bytes().await?.to_vec()),
            StatusCode::OK => {
                tracing::debug!(path = %path, "Remote store ignored Range, slicing locally");
                let data = response.bytes().await?;
                slice_range(&data, &path, start, end)
            }
            status => Err(status_error(status, &path)),
        }
    }

    async fn write(
        &self,
        path: &str,
        data: Vec<u8>,
        content_type: &str,
    ) -> Result<(), StorageError> {
        let path = clean_path(path)?;
        self.ensure_parents(&path).await?;

        let response = self
            .request(Method::PUT, &self.file_url(&path))
            .header(header::CONTENT_TYPE, content_type)
            .body(data)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(status_error(status, &path));
        }
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<(), StorageError> {
        let path = clean_path(path)?;
        let response = self
            .request(Method::DELETE, &self.file_url(&path))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(status_error(status, &path));
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "webdav"
    }
}
