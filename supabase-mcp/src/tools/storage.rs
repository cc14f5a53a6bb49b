//! Storage MCP tools
//!
//! File payloads cross the protocol as base64 text.

use super::parse_args;
use crate::server::{McpServerError, McpServerResult, Tool, ToolContext};
use crate::types::{ToolCategory, ToolDefinition, ToolResult};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, error, instrument};

fn object_schema(extra: serde_json::Value, required: &[&str]) -> serde_json::Value {
    let mut properties = serde_json::json!({
        "bucket": {
            "type": "string",
            "description": "Bucket name"
        },
        "path": {
            "type": "string",
            "description": "Object path inside the bucket"
        }
    });
    if let (Some(properties), Some(extra)) = (properties.as_object_mut(), extra.as_object()) {
        properties.extend(extra.clone());
    }

    serde_json::json!({
        "type": "object",
        "properties": properties,
        "required": required
    })
}

#[derive(Deserialize)]
struct ObjectParams {
    bucket: String,
    path: String,
}

/// Tool to upload a file.
pub struct StorageUploadTool;

#[async_trait]
impl Tool for StorageUploadTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new("storage_upload", "Upload a file to a bucket")
            .with_category(ToolCategory::Storage)
            .with_schema(object_schema(
                serde_json::json!({
                    "file_data": {
                        "type": "string",
                        "description": "File content, base64 encoded"
                    },
                    "content_type": {
                        "type": "string",
                        "description": "MIME type (default: application/octet-stream)"
                    }
                }),
                &["bucket", "path", "file_data"],
            ))
            .with_tenant_arguments()
    }

    #[instrument(skip(self, args, context), fields(tool = "storage_upload"))]
    async fn execute(
        &self,
        args: serde_json::Value,
        context: &ToolContext,
    ) -> McpServerResult<ToolResult> {
        let params: UploadParams = parse_args(&self.definition(), args)?;

        let bytes = STANDARD
            .decode(params.file_data.trim())
            .map_err(|e| McpServerError::InvalidParams(format!("file_data is not valid base64: {}", e)))?;
        let size = bytes.len();

        match context
            .client()
            .upload_file(&params.bucket, &params.path, bytes, params.content_type.as_deref())
            .await
        {
            Ok(_) => Ok(ToolResult::text(format!(
                "Uploaded {} bytes to {}/{}",
                size, params.bucket, params.path
            ))),
            Err(e) => {
                error!("Failed to upload file: {}", e);
                Ok(ToolResult::error(format!("Failed to upload file: {}", e)))
            }
        }
    }
}

#[derive(Deserialize)]
struct UploadParams {
    bucket: String,
    path: String,
    file_data: String,
    #[serde(default)]
    content_type: Option<String>,
}

/// Tool to download a file as base64.
pub struct StorageDownloadTool;

#[async_trait]
impl Tool for StorageDownloadTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new("storage_download", "Download a file as base64")
            .with_category(ToolCategory::Storage)
            .with_schema(object_schema(serde_json::json!({}), &["bucket", "path"]))
            .with_tenant_arguments()
    }

    #[instrument(skip(self, args, context), fields(tool = "storage_download"))]
    async fn execute(
        &self,
        args: serde_json::Value,
        context: &ToolContext,
    ) -> McpServerResult<ToolResult> {
        let params: ObjectParams = parse_args(&self.definition(), args)?;

        match context.client().download_file(&params.bucket, &params.path).await {
            Ok(bytes) => {
                debug!("Downloaded {} bytes", bytes.len());
                Ok(ToolResult::text(format!(
                    "Downloaded {}/{} ({} bytes). Base64 content:\n{}",
                    params.bucket,
                    params.path,
                    bytes.len(),
                    STANDARD.encode(&bytes)
                )))
            }
            Err(e) => {
                error!("Failed to download file: {}", e);
                Ok(ToolResult::error(format!("Failed to download file: {}", e)))
            }
        }
    }
}

/// Tool to list the files of a bucket.
pub struct StorageListFilesTool;

#[async_trait]
impl Tool for StorageListFilesTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new("storage_list_files", "List the files of a bucket")
            .with_category(ToolCategory::Storage)
            .with_schema(object_schema(serde_json::json!({}), &["bucket"]))
            .with_tenant_arguments()
    }

    #[instrument(skip(self, args, context), fields(tool = "storage_list_files"))]
    async fn execute(
        &self,
        args: serde_json::Value,
        context: &ToolContext,
    ) -> McpServerResult<ToolResult> {
        let params: ListFilesParams = parse_args(&self.definition(), args)?;
        let location = match params.path.as_deref() {
            Some(path) if !path.is_empty() => format!("{}/{}", params.bucket, path),
            _ => params.bucket.clone(),
        };

        match context
            .client()
            .list_files(&params.bucket, params.path.as_deref())
            .await
        {
            Ok(files) if files.is_empty() => Ok(ToolResult::text(format!("No files in {}", location))),
            Ok(files) => {
                let names: Vec<_> = files.into_iter().map(|f| f.name).collect();
                Ok(ToolResult::text(format!("Files in {}:\n{}", location, names.join(", "))))
            }
            Err(e) => {
                error!("Failed to list files: {}", e);
                Ok(ToolResult::error(format!("Failed to list files: {}", e)))
            }
        }
    }
}

#[derive(Deserialize)]
struct ListFilesParams {
    bucket: String,
    #[serde(default)]
    path: Option<String>,
}

/// Tool to delete a file.
pub struct StorageDeleteFileTool;

#[async_trait]
impl Tool for StorageDeleteFileTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new("storage_delete_file", "Delete a file from a bucket")
            .with_category(ToolCategory::Storage)
            .with_schema(object_schema(serde_json::json!({}), &["bucket", "path"]))
            .with_tenant_arguments()
    }

    #[instrument(skip(self, args, context), fields(tool = "storage_delete_file"))]
    async fn execute(
        &self,
        args: serde_json::Value,
        context: &ToolContext,
    ) -> McpServerResult<ToolResult> {
        let params: ObjectParams = parse_args(&self.definition(), args)?;

        match context.client().delete_file(&params.bucket, &params.path).await {
            Ok(true) => Ok(ToolResult::text(format!(
                "Deleted {}/{}",
                params.bucket, params.path
            ))),
            Ok(false) => Ok(ToolResult::error(format!(
                "File {}/{} not found",
                params.bucket, params.path
            ))),
            Err(e) => {
                error!("Failed to delete file: {}", e);
                Ok(ToolResult::error(format!("Failed to delete file: {}", e)))
            }
        }
    }
}

/// Tool to compose the public URL of a file.
pub struct StorageGetUrlTool;

#[async_trait]
impl Tool for StorageGetUrlTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new("storage_get_url", "Get the public URL of a file")
            .with_category(ToolCategory::Storage)
            .with_schema(object_schema(serde_json::json!({}), &["bucket", "path"]))
            .with_tenant_arguments()
    }

    async fn execute(
        &self,
        args: serde_json::Value,
        context: &ToolContext,
    ) -> McpServerResult<ToolResult> {
        let params: ObjectParams = parse_args(&self.definition(), args)?;
        let url = context.client().get_public_url(&params.bucket, &params.path);
        Ok(ToolResult::text(format!("Public URL: {}", url)))
    }
}

/// Tool to list the buckets of the project.
pub struct StorageListBucketsTool;

#[async_trait]
impl Tool for StorageListBucketsTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new("storage_list_buckets", "List the storage buckets")
            .with_category(ToolCategory::Storage)
            .with_tenant_arguments()
    }

    #[instrument(skip(self, _args, context), fields(tool = "storage_list_buckets"))]
    async fn execute(
        &self,
        _args: serde_json::Value,
        context: &ToolContext,
    ) -> McpServerResult<ToolResult> {
        match context.client().list_buckets().await {
            Ok(buckets) if buckets.is_empty() => Ok(ToolResult::text("No buckets found")),
            Ok(buckets) => {
                let names: Vec<_> = buckets
                    .into_iter()
                    .map(|b| if b.public { format!("{} (public)", b.name) } else { b.name })
                    .collect();
                Ok(ToolResult::text(format!("Buckets:\n{}", names.join(", "))))
            }
            Err(e) => {
                error!("Failed to list buckets: {}", e);
                Ok(ToolResult::error(format!("Failed to list buckets: {}", e)))
            }
        }
    }
}

/// Get all storage tools.
pub fn storage_tools() -> Vec<Arc<dyn Tool>> {
    vec![
        Arc::new(StorageUploadTool),
        Arc::new(StorageDownloadTool),
        Arc::new(StorageListFilesTool),
        Arc::new(StorageDeleteFileTool),
        Arc::new(StorageGetUrlTool),
        Arc::new(StorageListBucketsTool),
    ]
}
