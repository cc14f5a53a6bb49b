//! Database MCP tools
//!
//! Table CRUD through PostgREST, raw SQL through the `exec_sql` RPC, and a
//! summary of the project a call is bound to.

use super::{id_text, parse_args};
use crate::client::QueryParams;
use crate::server::{McpServerResult, Tool, ToolContext};
use crate::types::{ToolCategory, ToolDefinition, ToolResult};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, error, instrument};

/// Lists the tables of the `public` schema.
const LIST_TABLES_SQL: &str = "SELECT table_name FROM information_schema.tables \
     WHERE table_schema = 'public' ORDER BY table_name";

/// Tool to run arbitrary SQL.
///
/// Runs through the `exec_sql` remote procedure with the privileged key, so
/// the function must exist in the target project.
pub struct DatabaseQueryTool;

#[async_trait]
impl Tool for DatabaseQueryTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new("database_query", "Execute a custom SQL query")
            .with_category(ToolCategory::Database)
            .with_schema(serde_json::json!({
                "type": "object",
                "properties": {
                    "sql": {
                        "type": "string",
                        "description": "SQL statement to execute"
                    }
                },
                "required": ["sql"]
            }))
            .with_tenant_arguments()
    }

    #[instrument(skip(self, args, context), fields(tool = "database_query"))]
    async fn execute(
        &self,
        args: serde_json::Value,
        context: &ToolContext,
    ) -> McpServerResult<ToolResult> {
        let params: QuerySqlParams = parse_args(&self.definition(), args)?;

        match context.client().exec_raw(&params.sql).await {
            Ok(result) => Ok(ToolResult::json("Query executed successfully. Result:", &result)),
            Err(e) => {
                error!("Failed to execute query: {}", e);
                Ok(ToolResult::error(format!("Failed to execute query: {}", e)))
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct QuerySqlParams {
    sql: String,
}

/// Tool to read rows from a table.
pub struct DatabaseSelectTool;

#[async_trait]
impl Tool for DatabaseSelectTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new("database_select", "Select rows from a table")
            .with_category(ToolCategory::Database)
            .with_schema(serde_json::json!({
                "type": "object",
                "properties": {
                    "table": {
                        "type": "string",
                        "description": "Table name"
                    },
                    "columns": {
                        "type": "array",
                        "items": {"type": "string"},
                        "description": "Columns to return (default: all)"
                    },
                    "filters": {
                        "type": "array",
                        "description": "Filters applied in order, all must match",
                        "items": {
                            "type": "object",
                            "properties": {
                                "column": {"type": "string"},
                                "operator": {
                                    "type": "string",
                                    "description": "eq, neq, gt, gte, lt, lte, like, ilike, in, is"
                                },
                                "value": {}
                            },
                            "required": ["column", "operator", "value"]
                        }
                    },
                    "order_by": {
                        "type": "object",
                        "properties": {
                            "column": {"type": "string"},
                            "desc": {"type": "boolean", "default": false}
                        },
                        "required": ["column"]
                    },
                    "limit": {
                        "type": "integer",
                        "description": "Maximum number of rows",
                        "minimum": 1,
                        "default": 100
                    },
                    "offset": {
                        "type": "integer",
                        "description": "Index of the first row"
                    }
                },
                "required": ["table"]
            }))
            .with_tenant_arguments()
    }

    #[instrument(skip(self, args, context), fields(tool = "database_select"))]
    async fn execute(
        &self,
        args: serde_json::Value,
        context: &ToolContext,
    ) -> McpServerResult<ToolResult> {
        let params: SelectParams = parse_args(&self.definition(), args)?;

        match context.client().query_table(&params.table, &params.query).await {
            Ok(rows) => Ok(ToolResult::json(
                format!("Found {} records in {}:", rows.len(), params.table),
                &serde_json::Value::Array(rows.into_iter().map(serde_json::Value::Object).collect()),
            )),
            Err(e) => {
                error!("Failed to query table: {}", e);
                Ok(ToolResult::error(format!(
                    "Failed to query table {}: {}",
                    params.table, e
                )))
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct SelectParams {
    table: String,
    #[serde(flatten)]
    query: QueryParams,
}

/// Tool to insert one row.
pub struct DatabaseInsertTool;

#[async_trait]
impl Tool for DatabaseInsertTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new("database_insert", "Insert a record into a table")
            .with_category(ToolCategory::Database)
            .with_schema(serde_json::json!({
                "type": "object",
                "properties": {
                    "table": {
                        "type": "string",
                        "description": "Table name"
                    },
                    "data": {
                        "type": "object",
                        "description": "Column values of the new record"
                    }
                },
                "required": ["table", "data"]
            }))
            .with_tenant_arguments()
    }

    #[instrument(skip(self, args, context), fields(tool = "database_insert"))]
    async fn execute(
        &self,
        args: serde_json::Value,
        context: &ToolContext,
    ) -> McpServerResult<ToolResult> {
        let params: WriteParams = parse_args(&self.definition(), args)?;

        match context.client().insert_record(&params.table, &params.data).await {
            Ok(record) => Ok(ToolResult::json(
                format!("Record inserted into {}:", params.table),
                &serde_json::Value::Object(record),
            )),
            Err(e) => {
                error!("Failed to insert record: {}", e);
                Ok(ToolResult::error(format!(
                    "Failed to insert record into {}: {}",
                    params.table, e
                )))
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct WriteParams {
    table: String,
    #[serde(default)]
    id: serde_json::Value,
    data: serde_json::Value,
}

/// Tool to update a row by id.
pub struct DatabaseUpdateTool;

#[async_trait]
impl Tool for DatabaseUpdateTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new("database_update", "Update a record in a table")
            .with_category(ToolCategory::Database)
            .with_schema(serde_json::json!({
                "type": "object",
                "properties": {
                    "table": {
                        "type": "string",
                        "description": "Table name"
                    },
                    "id": {
                        "type": ["string", "integer"],
                        "description": "Value of the record's id column"
                    },
                    "data": {
                        "type": "object",
                        "description": "Column values to change"
                    }
                },
                "required": ["table", "id", "data"]
            }))
            .with_tenant_arguments()
    }

    #[instrument(skip(self, args, context), fields(tool = "database_update"))]
    async fn execute(
        &self,
        args: serde_json::Value,
        context: &ToolContext,
    ) -> McpServerResult<ToolResult> {
        let params: WriteParams = parse_args(&self.definition(), args)?;
        let id = id_text(&params.id);

        match context
            .client()
            .update_record(&params.table, &id, &params.data)
            .await
        {
            Ok(record) if record.is_empty() => Ok(ToolResult::error(format!(
                "Record {} not found in {}",
                id, params.table
            ))),
            Ok(record) => Ok(ToolResult::json(
                format!("Record {} updated in {}:", id, params.table),
                &serde_json::Value::Object(record),
            )),
            Err(e) => {
                error!("Failed to update record: {}", e);
                Ok(ToolResult::error(format!(
                    "Failed to update record in {}: {}",
                    params.table, e
                )))
            }
        }
    }
}

/// Tool to delete a row by id.
pub struct DatabaseDeleteTool;

#[async_trait]
impl Tool for DatabaseDeleteTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new("database_delete", "Delete a record from a table")
            .with_category(ToolCategory::Database)
            .with_schema(serde_json::json!({
                "type": "object",
                "properties": {
                    "table": {
                        "type": "string",
                        "description": "Table name"
                    },
                    "id": {
                        "type": ["string", "integer"],
                        "description": "Value of the record's id column"
                    }
                },
                "required": ["table", "id"]
            }))
            .with_tenant_arguments()
    }

    #[instrument(skip(self, args, context), fields(tool = "database_delete"))]
    async fn execute(
        &self,
        args: serde_json::Value,
        context: &ToolContext,
    ) -> McpServerResult<ToolResult> {
        let params: DeleteParams = parse_args(&self.definition(), args)?;
        let id = id_text(&params.id);

        match context.client().delete_record(&params.table, &id).await {
            Ok(true) => Ok(ToolResult::text(format!(
                "Record {} deleted from {}",
                id, params.table
            ))),
            Ok(false) => Ok(ToolResult::error(format!(
                "Record {} not found in {}",
                id, params.table
            ))),
            Err(e) => {
                error!("Failed to delete record: {}", e);
                Ok(ToolResult::error(format!(
                    "Failed to delete record from {}: {}",
                    params.table, e
                )))
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct DeleteParams {
    table: String,
    id: serde_json::Value,
}

/// Tool to list the tables of the public schema.
pub struct DatabaseListTablesTool;

#[async_trait]
impl Tool for DatabaseListTablesTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new("database_list_tables", "List the tables of the public schema")
            .with_category(ToolCategory::Database)
            .with_tenant_arguments()
    }

    #[instrument(skip(self, _args, context), fields(tool = "database_list_tables"))]
    async fn execute(
        &self,
        _args: serde_json::Value,
        context: &ToolContext,
    ) -> McpServerResult<ToolResult> {
        match context.client().exec_raw(LIST_TABLES_SQL).await {
            Ok(result) => {
                let tables = table_names(&result);
                debug!("Found {} tables", tables.len());
                if tables.is_empty() {
                    Ok(ToolResult::text("No tables found"))
                } else {
                    Ok(ToolResult::text(format!("Tables:\n{}", tables.join(", "))))
                }
            }
            Err(e) => {
                error!("Failed to list tables: {}", e);
                Ok(ToolResult::error(format!("Failed to list tables: {}", e)))
            }
        }
    }
}

/// Pull `table_name` out of the rows returned by `exec_sql`.
fn table_names(result: &serde_json::Value) -> Vec<String> {
    result
        .as_array()
        .map(|rows| {
            rows.iter()
                .filter_map(|row| row.get("table_name").and_then(|n| n.as_str()))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Tool to describe the project the call is bound to.
pub struct DatabaseGetProjectInfoTool;

#[async_trait]
impl Tool for DatabaseGetProjectInfoTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(
            "database_get_project_info",
            "Show which Supabase project this call runs against",
        )
        .with_category(ToolCategory::Database)
        .with_tenant_arguments()
    }

    async fn execute(
        &self,
        _args: serde_json::Value,
        context: &ToolContext,
    ) -> McpServerResult<ToolResult> {
        Ok(ToolResult::json("Project info:", &context.client().project_info()))
    }
}

/// Get all database tools.
pub fn database_tools() -> Vec<Arc<dyn Tool>> {
    vec![
        Arc::new(DatabaseQueryTool),
        Arc::new(DatabaseSelectTool),
        Arc::new(DatabaseInsertTool),
        Arc::new(DatabaseUpdateTool),
        Arc::new(DatabaseDeleteTool),
        Arc::new(DatabaseListTablesTool),
        Arc::new(DatabaseGetProjectInfoTool),
    ]
}
