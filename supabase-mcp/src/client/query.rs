//! Table access through PostgREST, plus raw SQL through the `exec_sql` RPC.

use super::{BackendCause, BackendError, BackendResult, Record, SupabaseClient};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

/// Row cap applied when the caller gives none.
pub const DEFAULT_LIMIT: u32 = 100;

/// Remote procedure used for raw SQL.
pub const EXEC_SQL_FUNCTION: &str = "exec_sql";

/// Read parameters for [`SupabaseClient::query_table`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryParams {
    /// Columns to select (empty selects all).
    #[serde(default)]
    pub columns: Vec<String>,

    /// Conjunctive filters, applied in order.
    #[serde(default)]
    pub filters: Vec<Filter>,

    /// Optional ordering.
    #[serde(default)]
    pub order_by: Option<OrderBy>,

    /// Maximum number of rows.
    #[serde(default)]
    pub limit: Option<u32>,

    /// Index of the first row.
    #[serde(default)]
    pub offset: Option<u32>,
}

/// A `(column, operator, value)` filter. Operator semantics belong to PostgREST.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Filter {
    /// Column name.
    pub column: String,

    /// PostgREST operator (eq, neq, gt, lt, like, ilike, in, is, ...).
    pub operator: String,

    /// Comparison value.
    pub value: serde_json::Value,
}

impl Filter {
    /// Render as a PostgREST query pair, e.g. `("age", "gt.18")`.
    pub fn to_query_pair(&self) -> (String, String) {
        let value = match &self.value {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Null => "null".to_string(),
            serde_json::Value::Array(items) => {
                let items: Vec<String> = items
                    .iter()
                    .map(|item| match item {
                        serde_json::Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .collect();
                format!("({})", items.join(","))
            }
            other => other.to_string(),
        };
        (
            self.column.clone(),
            format!("{}.{}", self.operator.trim().to_lowercase(), value),
        )
    }
}

/// Ordering on one column.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderBy {
    /// Column name.
    pub column: String,

    /// Descending when true.
    #[serde(default)]
    pub desc: bool,
}

/// How a read is bounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pagination {
    /// Plain row cap.
    Limit(u32),
    /// Inclusive row window.
    Range { start: u32, end: u32 },
}

impl QueryParams {
    /// Reject bounds that cannot be expressed as a row window.
    pub fn validate(&self) -> Result<(), BackendCause> {
        if self.limit == Some(0) {
            return Err(BackendCause::InvalidInput("limit must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Compute the row bound. An offset always produces an inclusive window
    /// `[offset, offset + limit - 1]`, taking precedence over the plain cap.
    pub fn pagination(&self) -> Pagination {
        let limit = self.limit.unwrap_or(DEFAULT_LIMIT);
        match self.offset {
            Some(offset) => Pagination::Range {
                start: offset,
                end: offset.saturating_add(limit.saturating_sub(1)),
            },
            None => Pagination::Limit(limit),
        }
    }

    /// PostgREST query pairs for select, filters and ordering.
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        let select = if self.columns.is_empty() {
            "*".to_string()
        } else {
            self.columns.join(",")
        };

        let mut pairs = vec![("select".to_string(), select)];
        pairs.extend(self.filters.iter().map(Filter::to_query_pair));

        if let Some(order) = &self.order_by {
            let direction = if order.desc { "desc" } else { "asc" };
            pairs.push(("order".to_string(), format!("{}.{}", order.column, direction)));
        }

        if let Pagination::Limit(limit) = self.pagination() {
            pairs.push(("limit".to_string(), limit.to_string()));
        }

        pairs
    }
}

fn table_path(table: &str) -> String {
    format!("/rest/v1/{}", table)
}

fn id_filter(id: &str) -> [(&'static str, String); 1] {
    [("id", format!("eq.{}", id))]
}

impl SupabaseClient {
    /// Read rows from a table.
    #[instrument(skip(self, params), fields(table = %table))]
    pub async fn query_table(&self, table: &str, params: &QueryParams) -> BackendResult<Vec<Record>> {
        debug!("Querying table {} with {} filters", table, params.filters.len());

        let result: Result<Vec<Record>, BackendCause> = async {
            params.validate()?;

            let mut request = self
                .request(Method::GET, &table_path(table))
                .await
                .query(&params.query_pairs());

            if let Pagination::Range { start, end } = params.pagination() {
                request = request
                    .header("Range-Unit", "items")
                    .header("Range", format!("{}-{}", start, end));
            }

            let response = request.send().await?;
            Self::handle_response(response).await
        }
        .await;

        result.map_err(|cause| BackendError::new("query table", Some(table), cause))
    }

    /// Insert one row. Returns the stored row, or an empty record.
    #[instrument(skip(self, data), fields(table = %table))]
    pub async fn insert_record(&self, table: &str, data: &serde_json::Value) -> BackendResult<Record> {
        debug!("Inserting record into {}", table);

        let result: Result<Vec<Record>, BackendCause> = async {
            let response = self
                .request(Method::POST, &table_path(table))
                .await
                .header("Prefer", "return=representation")
                .json(data)
                .send()
                .await?;
            Self::handle_response(response).await
        }
        .await;

        result
            .map(first_or_empty)
            .map_err(|cause| BackendError::new("insert record", Some(table), cause))
    }

    /// Update the row whose `id` equals `id`. Returns the updated row, or an empty record.
    #[instrument(skip(self, data), fields(table = %table, id = %id))]
    pub async fn update_record(
        &self,
        table: &str,
        id: &str,
        data: &serde_json::Value,
    ) -> BackendResult<Record> {
        debug!("Updating record {} in {}", id, table);

        let result: Result<Vec<Record>, BackendCause> = async {
            let response = self
                .request(Method::PATCH, &table_path(table))
                .await
                .query(&id_filter(id))
                .header("Prefer", "return=representation")
                .json(data)
                .send()
                .await?;
            Self::handle_response(response).await
        }
        .await;

        result
            .map(first_or_empty)
            .map_err(|cause| BackendError::new("update record", Some(table), cause))
    }

    /// Delete the row whose `id` equals `id`. Returns whether a row was removed.
    #[instrument(skip(self), fields(table = %table, id = %id))]
    pub async fn delete_record(&self, table: &str, id: &str) -> BackendResult<bool> {
        debug!("Deleting record {} from {}", id, table);

        let result: Result<Vec<Record>, BackendCause> = async {
            let response = self
                .request(Method::DELETE, &table_path(table))
                .await
                .query(&id_filter(id))
                .header("Prefer", "return=representation")
                .send()
                .await?;
            Self::handle_response(response).await
        }
        .await;

        result
            .map(|rows| !rows.is_empty())
            .map_err(|cause| BackendError::new("delete record", Some(table), cause))
    }

    /// Run arbitrary SQL through the `exec_sql` RPC with the privileged key.
    #[instrument(skip(self, sql))]
    pub async fn exec_raw(&self, sql: &str) -> BackendResult<serde_json::Value> {
        debug!("Executing raw SQL ({} chars)", sql.len());

        let result: Result<serde_json::Value, BackendCause> = async {
            let response = self
                .privileged_request(Method::POST, &format!("/rest/v1/rpc/{}", EXEC_SQL_FUNCTION))
                .json(&serde_json::json!({ "sql_query": sql }))
                .send()
                .await?;
            Self::handle_optional_json(response).await
        }
        .await;

        result.map_err(|cause| BackendError::new("execute SQL", None, cause))
    }
}

fn first_or_empty(rows: Vec<Record>) -> Record {
    rows.into_iter().next().unwrap_or_default()
}
