//! Stdio transport.

use super::TransportError;
use crate::metadata::{CallMetadata, SESSION_HEADER};
use crate::server::McpServer;
use crate::types::{McpError, McpRequest, McpResponse, RequestId};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{info, warn};
use uuid::Uuid;

/// Serve JSON-RPC on the process's stdin and stdout until stdin closes.
pub async fn serve_stdio(server: Arc<McpServer>) -> Result<(), TransportError> {
    info!("Starting MCP server with stdio transport");
    serve_lines(server, tokio::io::stdin(), tokio::io::stdout()).await
}

/// Serve newline-delimited JSON-RPC from `reader`, writing responses to `writer`.
///
/// Requests are handled in order. The connection is one caller with its own
/// session id; tenant credentials must travel in the tool arguments.
pub async fn serve_lines<R, W>(
    server: Arc<McpServer>,
    reader: R,
    mut writer: W,
) -> Result<(), TransportError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let metadata = CallMetadata::new().with(SESSION_HEADER, Uuid::new_v4().to_string());
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<McpRequest>(line) {
            Ok(request) => server.handle_request(request, &metadata).await,
            Err(e) => {
                warn!("Discarding malformed request: {}", e);
                Some(McpResponse::error(RequestId::Null, McpError::parse_error(e)))
            }
        };

        if let Some(response) = response {
            let mut json = serde_json::to_string(&response)?;
            json.push('\n');
            writer.write_all(json.as_bytes()).await?;
            writer.flush().await?;
        }
    }

    info!("Input closed, stopping stdio transport");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ProjectDefaults, Settings, DEFAULT_PROJECT_URL_TEMPLATE};
    use crate::middleware::DynamicConfigMiddleware;

    async fn server() -> Arc<McpServer> {
        let settings = Settings {
            defaults: ProjectDefaults {
                base_url: Some("https://default.supabase.co".to_string()),
                api_key: Some("anon-key".to_string()),
                privileged_key: None,
                tenant_url_template: DEFAULT_PROJECT_URL_TEMPLATE.to_string(),
            },
            ..Settings::default()
        };
        let middleware = Arc::new(DynamicConfigMiddleware::new(&settings).unwrap());
        Arc::new(McpServer::supabase(middleware).await)
    }

    async fn run(input: &str) -> Vec<serde_json::Value> {
        let mut output = Vec::new();
        serve_lines(server().await, input.as_bytes(), &mut output)
            .await
            .unwrap();

        String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_request_response() {
        let responses = run(concat!(
            r#"{"jsonrpc":"2.0","id":1,"method":"initialize"}"#,
            "\n\n",
            r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
            "\n",
            r#"{"jsonrpc":"2.0","id":2,"method":"tools/list"}"#,
            "\n",
        ))
        .await;

        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0]["id"], 1);
        assert_eq!(responses[0]["result"]["serverInfo"]["name"], "supabase-mcp");
        assert_eq!(responses[1]["result"]["tools"].as_array().unwrap().len(), 24);
    }

    #[tokio::test]
    async fn test_parse_error() {
        let responses = run("{not json}\n").await;
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0]["error"]["code"], McpError::PARSE_ERROR);
        assert!(responses[0]["id"].is_null());
    }

    #[tokio::test]
    async fn test_in_band_credentials() {
        let responses = run(concat!(
            r#"{"jsonrpc":"2.0","id":"a","method":"tools/call","params":{"name":"database_get_project_info","arguments":{"headers":{"x-supabase-project":"acme","x-supabase-token":"tok"}}}}"#,
            "\n",
        ))
        .await;

        let text = responses[0]["result"]["content"][0]["text"].as_str().unwrap();
        assert!(text.contains("https://acme.supabase.co"));
        assert!(!text.contains("tok\""));
    }
}
