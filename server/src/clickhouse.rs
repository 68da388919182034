//! Minimal ClickHouse HTTP client.
//!
//! Statements are posted as the request body. Bulk inserts put the
//! statement in the `query` parameter and stream the data as the body.
//! Rows are read back in the `JSONEachRow` format.

use std::time::Duration;

use anyhow::{anyhow, Result};
use reqwest::{Body, Client as HttpClient, RequestBuilder, Url};
use serde::de::DeserializeOwned;

use crate::config::ClickHouseConfig;
use crate::error::{ServerError, ServerResult};

const HEADER_USER: &str = "X-ClickHouse-User";
const HEADER_KEY: &str = "X-ClickHouse-Key";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// A ClickHouse HTTP client.
#[derive(Debug, Clone)]
pub struct ClickHouseClient {
    http: HttpClient,
    endpoint: Url,
    database: String,
    username: String,
    password: Option<String>,
}

impl ClickHouseClient {
    pub fn new(config: &ClickHouseConfig) -> ServerResult<Self> {
        let endpoint = Url::parse(&config.endpoint()).map_err(ServerError::configuration_error)?;
        let http = HttpClient::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(ServerError::configuration_error)?;

        Ok(Self {
            http,
            endpoint,
            database: config.database.clone(),
            username: config.username.clone(),
            password: config.password.clone(),
        })
    }

    /// Runs a statement and returns the raw response.
    pub async fn execute(&self, query: &str) -> Result<String> {
        self.execute_with_settings(query, &[]).await
    }

    /// Runs a statement with extra settings passed as URL parameters.
    pub async fn execute_with_settings(
        &self,
        query: &str,
        settings: &[(&str, &str)],
    ) -> Result<String> {
        tracing::debug!(query, "Running ClickHouse query");
        send(self.request(settings).body(query.to_owned())).await
    }

    /// Runs a `SELECT` and decodes each returned row.
    pub async fn select<T: DeserializeOwned>(&self, query: &str) -> Result<Vec<T>> {
        let body = self
            .execute(&format!("{} FORMAT JSONEachRow", query))
            .await?;

        parse_rows(&body)
    }

    /// Runs an `INSERT … FORMAT …` statement with the data streamed as the body.
    pub async fn insert_stream(&self, query: &str, data: Body) -> Result<()> {
        tracing::debug!(query, "Running ClickHouse bulk insert");
        send(self.request(&[("query", query)]).body(data)).await?;
        Ok(())
    }

    fn request(&self, settings: &[(&str, &str)]) -> RequestBuilder {
        let mut req = self
            .http
            .post(self.endpoint.clone())
            .query(&[("database", self.database.as_str())])
            .query(settings)
            .header(HEADER_USER, &self.username);

        if let Some(password) = &self.password {
            req = req.header(HEADER_KEY, password);
        }

        req
    }
}

async fn send(req: RequestBuilder) -> Result<String> {
    let res = req.send().await?;
    let status = res.status();
    let text = res.text().await?;

    if !status.is_success() {
        return Err(anyhow!("ClickHouse returned HTTP {}: {}", status, text.trim()));
    }

    Ok(text)
}

/// Decodes a `JSONEachRow` response.
pub fn parse_rows<T: DeserializeOwned>(body: &str) -> Result<Vec<T>> {
    body.lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).map_err(|e| anyhow!("Bad row {:?}: {}", line, e)))
        .collect()
}

/// Quotes a string literal.
pub fn quote_string(s: &str) -> String {
    quote(s, '\'')
}

/// Quotes an identifier.
pub fn quote_identifier(s: &str) -> String {
    quote(s, '`')
}

/// Formats an `Array(String)` literal.
pub fn string_array(items: &[String]) -> String {
    let items: Vec<String> = items.iter().map(|s| quote_string(s)).collect();
    format!("[{}]", items.join(", "))
}

fn quote(s: &str, delimiter: char) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push(delimiter);

    for c in s.chars() {
        if c == '\\' || c == delimiter {
            out.push('\\');
        }
        out.push(c);
    }

    out.push(delimiter);
    out
}
