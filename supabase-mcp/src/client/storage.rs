//! Object storage.

use super::{BackendCause, BackendError, BackendResult, SupabaseClient};
use reqwest::Method;
use serde::Deserialize;
use tracing::{debug, instrument};

/// Content type used when the caller gives none.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Page size for object listings.
const LIST_LIMIT: u32 = 100;

/// An object entry in a bucket listing.
#[derive(Debug, Clone, Deserialize)]
pub struct FileObject {
    /// Object name relative to the listed prefix.
    pub name: String,

    /// Object id (absent for folders).
    #[serde(default)]
    pub id: Option<String>,

    /// Object metadata (size, mimetype, ...).
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

/// A storage bucket.
#[derive(Debug, Clone, Deserialize)]
pub struct Bucket {
    /// Bucket id.
    pub id: String,

    /// Bucket name.
    pub name: String,

    /// Whether objects are publicly readable.
    #[serde(default)]
    pub public: bool,
}

fn object_path(bucket: &str, path: &str) -> String {
    format!("/storage/v1/object/{}/{}", bucket, path.trim_start_matches('/'))
}

fn target(bucket: &str, path: &str) -> String {
    format!("{}/{}", bucket, path.trim_start_matches('/'))
}

impl SupabaseClient {
    /// Upload bytes to `bucket/path`.
    #[instrument(skip(self, bytes), fields(bucket = %bucket, path = %path, size = bytes.len()))]
    pub async fn upload_file(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: Option<&str>,
    ) -> BackendResult<serde_json::Value> {
        debug!("Uploading {} bytes", bytes.len());

        let result: Result<serde_json::Value, BackendCause> = async {
            let response = self
                .request(Method::POST, &object_path(bucket, path))
                .await
                .header("Content-Type", content_type.unwrap_or(DEFAULT_CONTENT_TYPE))
                .body(bytes)
                .send()
                .await?;
            Self::handle_optional_json(response).await
        }
        .await;

        result.map_err(|cause| BackendError::new("upload file", Some(&target(bucket, path)), cause))
    }

    /// Download the object at `bucket/path`.
    #[instrument(skip(self), fields(bucket = %bucket, path = %path))]
    pub async fn download_file(&self, bucket: &str, path: &str) -> BackendResult<Vec<u8>> {
        let result: Result<Vec<u8>, BackendCause> = async {
            let response = self
                .request(Method::GET, &object_path(bucket, path))
                .await
                .send()
                .await?;
            let bytes = Self::check_status(response).await?.bytes().await?;
            Ok(bytes.to_vec())
        }
        .await;

        result.map_err(|cause| BackendError::new("download file", Some(&target(bucket, path)), cause))
    }

    /// List objects under an optional prefix.
    #[instrument(skip(self), fields(bucket = %bucket))]
    pub async fn list_files(&self, bucket: &str, path: Option<&str>) -> BackendResult<Vec<FileObject>> {
        let result: Result<Vec<FileObject>, BackendCause> = async {
            let response = self
                .request(Method::POST, &format!("/storage/v1/object/list/{}", bucket))
                .await
                .json(&serde_json::json!({
                    "prefix": path.unwrap_or(""),
                    "limit": LIST_LIMIT,
                    "offset": 0,
                    "sortBy": {"column": "name", "order": "asc"},
                }))
                .send()
                .await?;
            Self::handle_response(response).await
        }
        .await;

        result.map_err(|cause| BackendError::new("list files", Some(bucket), cause))
    }

    /// Delete the object at `bucket/path`. Returns whether an object was removed.
    #[instrument(skip(self), fields(bucket = %bucket, path = %path))]
    pub async fn delete_file(&self, bucket: &str, path: &str) -> BackendResult<bool> {
        let result: Result<Vec<serde_json::Value>, BackendCause> = async {
            let response = self
                .request(Method::DELETE, &format!("/storage/v1/object/{}", bucket))
                .await
                .json(&serde_json::json!({ "prefixes": [path.trim_start_matches('/')] }))
                .send()
                .await?;
            Self::handle_response(response).await
        }
        .await;

        result
            .map(|removed| !removed.is_empty())
            .map_err(|cause| BackendError::new("delete file", Some(&target(bucket, path)), cause))
    }

    /// Public URL of an object. Only meaningful for public buckets.
    pub fn get_public_url(&self, bucket: &str, path: &str) -> String {
        self.config().url(&format!(
            "/storage/v1/object/public/{}/{}",
            bucket,
            path.trim_start_matches('/')
        ))
    }

    /// List all buckets of the project.
    #[instrument(skip(self))]
    pub async fn list_buckets(&self) -> BackendResult<Vec<Bucket>> {
        let result: Result<Vec<Bucket>, BackendCause> = async {
            let response = self
                .request(Method::GET, "/storage/v1/bucket")
                .await
                .send()
                .await?;
            Self::handle_response(response).await
        }
        .await;

        result.map_err(|cause| BackendError::new("list buckets", None, cause))
    }
}
