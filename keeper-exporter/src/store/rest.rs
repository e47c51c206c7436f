//! REST client for the database's `/rest/sql` endpoint.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, trace};

use super::{Cell, ColumnInfo, DataType, QueryResult, StoreClient, StoreError, quote_ident};
use crate::config::StoreConfig;

/// Error codes the database uses for a missing table.
const TABLE_NOT_EXIST_CODES: &[i64] = &[0x2603, 0x2662, 0x0603, 0x0362];

/// Response envelope returned by the REST endpoint.
#[derive(Debug, Deserialize)]
struct RestResponse {
    code: i64,
    #[serde(default)]
    desc: Option<String>,
    #[serde(default)]
    column_meta: Vec<Vec<serde_json::Value>>,
    #[serde(default)]
    data: Vec<Vec<serde_json::Value>>,
}

impl RestResponse {
    fn into_result(self) -> QueryResult {
        let columns = self
            .column_meta
            .iter()
            .map(|meta| {
                meta.first()
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string()
            })
            .collect();

        let rows = self
            .data
            .iter()
            .map(|row| row.iter().map(Cell::from_json).collect())
            .collect();

        QueryResult { columns, rows }
    }
}

/// [`StoreClient`] backed by the database REST API.
pub struct RestStoreClient {
    client: reqwest::Client,
    endpoint: String,
    username: String,
    password: String,
}

impl RestStoreClient {
    /// Create a client from the store configuration.
    pub fn new(config: &StoreConfig) -> Result<Self, StoreError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| StoreError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: format!("{}/rest/sql", config.url.trim_end_matches('/')),
            username: config.username.clone(),
            password: config.password.clone(),
        })
    }

    async fn request(&self, sql: &str) -> Result<RestResponse, StoreError> {
        let started = Instant::now();

        let response = self
            .client
            .post(&self.endpoint)
            .basic_auth(&self.username, Some(&self.password))
            .body(sql.to_string())
            .send()
            .await
            .map_err(|e| StoreError::Transport(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| StoreError::Transport(e.to_string()))?;

        let parsed: RestResponse = serde_json::from_str(&body).map_err(|e| {
            StoreError::Decode(format!("HTTP {}: {} ({})", status, e, truncate(&body)))
        })?;

        debug!(
            latency_ms = started.elapsed().as_millis() as u64,
            code = parsed.code,
            sql,
            "Executed statement"
        );

        if parsed.code != 0 {
            return Err(StoreError::Backend {
                code: parsed.code,
                message: parsed.desc.unwrap_or_default(),
            });
        }

        Ok(parsed)
    }
}

#[async_trait]
impl StoreClient for RestStoreClient {
    async fn describe_table(
        &self,
        database: &str,
        table: &str,
    ) -> Result<Vec<ColumnInfo>, StoreError> {
        let sql = format!("DESCRIBE {}.{}", quote_ident(database), quote_ident(table));
        let result = match self.request(&sql).await {
            Ok(response) => response.into_result(),
            Err(StoreError::Backend { code, message }) if is_table_missing(code, &message) => {
                return Err(StoreError::NotFound {
                    table: table.to_string(),
                });
            }
            Err(e) => return Err(e),
        };

        // field | type | length | note
        let columns = result
            .rows
            .into_iter()
            .filter_map(|row| {
                let name = match row.first() {
                    Some(Cell::Text(name)) => name.clone(),
                    _ => return None,
                };
                let declared = row.get(1).map(Cell::to_string).unwrap_or_default();
                let is_tag = matches!(row.get(3), Some(Cell::Text(note)) if note == "TAG");
                Some(ColumnInfo {
                    name,
                    data_type: declared.parse::<DataType>().unwrap_or(DataType::Other(declared)),
                    is_tag,
                })
            })
            .collect();

        Ok(columns)
    }

    async fn query(&self, sql: &str) -> Result<QueryResult, StoreError> {
        let result = self.request(sql).await?.into_result();
        trace!(rows = result.rows.len(), "Query returned");
        Ok(result)
    }

    async fn exec(&self, sql: &str) -> Result<u64, StoreError> {
        let result = self.request(sql).await?.into_result();
        let affected = result
            .rows
            .first()
            .and_then(|row| row.first())
            .and_then(Cell::as_f64)
            .map(|v| v as u64)
            .unwrap_or(0);
        Ok(affected)
    }

    async fn list_stables(&self, database: &str) -> Result<Vec<String>, StoreError> {
        let sql = format!("SHOW {}.STABLES", quote_ident(database));
        let result = self.request(&sql).await?.into_result();

        Ok(result
            .rows
            .into_iter()
            .filter_map(|row| match row.into_iter().next() {
                Some(Cell::Text(name)) => Some(name),
                _ => None,
            })
            .collect())
    }
}

fn is_table_missing(code: i64, message: &str) -> bool {
    TABLE_NOT_EXIST_CODES.contains(&code)
        || message.to_ascii_lowercase().contains("not exist")
}

fn truncate(body: &str) -> &str {
    match body.char_indices().nth(200) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn client_for(server: &MockServer) -> RestStoreClient {
        let config = StoreConfig {
            url: server.uri(),
            ..Default::default()
        };
        RestStoreClient::new(&config).unwrap()
    }

    #[tokio::test]
    async fn test_describe_table_classifies_tags() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rest/sql"))
            .and(header_exists("authorization"))
            .and(body_string("DESCRIBE `log`.`taosd_dnodes_info`"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "code": 0,
                "column_meta": [["field", "VARCHAR", 64], ["type", "VARCHAR", 32],
                                ["length", "INT", 4], ["note", "VARCHAR", 8]],
                "data": [
                    ["ts", "TIMESTAMP", 8, ""],
                    ["uptime", "FLOAT", 4, ""],
                    ["dnode_ep", "NCHAR", 135, "TAG"]
                ],
                "rows": 3
            })))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let columns = client
            .describe_table("log", "taosd_dnodes_info")
            .await
            .unwrap();

        assert_eq!(columns.len(), 3);
        assert_eq!(columns[0].data_type, DataType::Timestamp);
        assert_eq!(columns[1], ColumnInfo::column("uptime", DataType::Float));
        assert_eq!(columns[2], ColumnInfo::tag("dnode_ep", DataType::NChar));
    }

    #[tokio::test]
    async fn test_describe_missing_table() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rest/sql"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "code": 0x2603,
                "desc": "Table does not exist"
            })))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let err = client.describe_table("log", "nope").await.unwrap_err();

        assert_eq!(
            err,
            StoreError::NotFound {
                table: "nope".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_query_decodes_rows() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rest/sql"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "code": 0,
                "column_meta": [["cpu", "DOUBLE", 8], ["host", "VARCHAR", 16]],
                "data": [[1.5, "a"], [null, "b"]],
                "rows": 2
            })))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let result = client.query("SELECT 1").await.unwrap();

        assert_eq!(result.columns, vec!["cpu", "host"]);
        assert_eq!(result.rows[0], vec![Cell::Float(1.5), Cell::Text("a".into())]);
        assert_eq!(result.rows[1][0], Cell::Null);
    }

    #[tokio::test]
    async fn test_backend_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rest/sql"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "code": 0x0216,
                "desc": "syntax error near 'SELEC'"
            })))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let err = client.query("SELEC 1").await.unwrap_err();

        assert!(matches!(err, StoreError::Backend { code: 0x0216, .. }));
    }

    #[tokio::test]
    async fn test_list_stables() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rest/sql"))
            .and(body_string("SHOW `log`.STABLES"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "code": 0,
                "column_meta": [["stable_name", "VARCHAR", 192]],
                "data": [["taosd_dnodes_info"], ["adapter_requests"]],
                "rows": 2
            })))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let names = client.list_stables("log").await.unwrap();

        assert_eq!(names, vec!["taosd_dnodes_info", "adapter_requests"]);
    }

    #[tokio::test]
    async fn test_undecodable_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rest/sql"))
            .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let err = client.exec("CREATE DATABASE IF NOT EXISTS `log`").await;

        assert!(matches!(err, Err(StoreError::Decode(_))));
    }

    #[test]
    fn test_is_table_missing() {
        assert!(is_table_missing(0x2603, ""));
        assert!(is_table_missing(1, "Table does not exist"));
        assert!(!is_table_missing(0x0216, "syntax error"));
    }
}
