//! Typed helpers over [`ForceClient::request`] for the common REST resources.
//!
//! Every helper goes through the dispatcher, so each one gets the same
//! expiry recovery as a hand-built request. That includes every page of a
//! paginated query.

use std::pin::pin;

use futures::{Stream, TryStreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::client::ForceClient;
use crate::dispatch::{ApiRequest, DATA_ROOT};
use crate::error::{Result, SessionError};

/// Header controlling the page size of query results.
pub const QUERY_OPTIONS_HEADER: &str = "Sforce-Query-Options";

/// One page of query results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryPage {
    pub total_size: u64,
    pub done: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_records_url: Option<String>,
    #[serde(default)]
    pub records: Vec<Value>,
}

/// Response to a record creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateResult {
    pub id: String,
    pub success: bool,
    #[serde(default)]
    pub errors: Vec<Value>,
}

enum Cursor {
    Start(String),
    Next(String),
    Done,
}

impl ForceClient {
    fn versioned(&self, rest: &str) -> String {
        format!("{}/{rest}", self.config().api_version)
    }

    /// Run a SOQL query and return the first page.
    ///
    /// # Errors
    ///
    /// Any dispatch error, e.g. `MALFORMED_QUERY` as
    /// [`SessionError::Api`](crate::SessionError::Api).
    pub async fn query(&self, soql: &str) -> Result<QueryPage> {
        let encoded: String = url::form_urlencoded::byte_serialize(soql.as_bytes()).collect();
        let request = self.with_query_options(ApiRequest::get(self.versioned(&format!("query?q={encoded}"))));
        self.request(&request).await?.deserialize()
    }

    /// Fetch the page at a `nextRecordsUrl`.
    ///
    /// # Errors
    ///
    /// Any dispatch error.
    pub async fn query_more(&self, next_records_url: &str) -> Result<QueryPage> {
        let path = next_records_url
            .strip_prefix(DATA_ROOT)
            .unwrap_or(next_records_url);
        let request = self.with_query_options(ApiRequest::get(path));
        self.request(&request).await?.deserialize()
    }

    /// Pages of a query, fetched lazily as the stream is polled.
    pub fn query_stream<'a>(&'a self, soql: &str) -> impl Stream<Item = Result<QueryPage>> + use<'a> {
        futures::stream::try_unfold(Cursor::Start(soql.to_string()), move |cursor| async move {
            let page = match cursor {
                Cursor::Start(soql) => self.query(&soql).await?,
                Cursor::Next(url) => self.query_more(&url).await?,
                Cursor::Done => return Ok(None),
            };
            let next = match (page.done, page.next_records_url.as_deref()) {
                (false, Some(url)) => Cursor::Next(url.to_string()),
                _ => Cursor::Done,
            };
            Ok::<_, SessionError>(Some((page, next)))
        })
    }

    /// Run a query and follow every `nextRecordsUrl`.
    ///
    /// # Errors
    ///
    /// The first page error encountered; records fetched so far are dropped.
    pub async fn query_all(&self, soql: &str) -> Result<Vec<Value>> {
        let mut pages = pin!(self.query_stream(soql));
        let mut records = Vec::new();
        while let Some(page) = pages.try_next().await? {
            records.extend(page.records);
        }
        tracing::debug!(count = records.len(), "query_all complete");
        Ok(records)
    }

    /// Fetch a record, optionally limited to `fields`.
    ///
    /// # Errors
    ///
    /// Any dispatch error, e.g. `NOT_FOUND`.
    pub async fn retrieve(&self, sobject: &str, id: &str, fields: Option<&[&str]>) -> Result<Value> {
        let mut path = self.versioned(&format!("sobjects/{sobject}/{id}"));
        if let Some(fields) = fields.filter(|f| !f.is_empty()) {
            path.push_str("?fields=");
            path.push_str(&fields.join(","));
        }
        self.request(&ApiRequest::get(path)).await?.into_json()
    }

    /// Create a record.
    ///
    /// # Errors
    ///
    /// Any dispatch error, e.g. `REQUIRED_FIELD_MISSING`.
    pub async fn create(&self, sobject: &str, record: Value) -> Result<CreateResult> {
        let path = self.versioned(&format!("sobjects/{sobject}"));
        self.request(&ApiRequest::post(path, record))
            .await?
            .deserialize()
    }

    /// Update fields on a record.
    ///
    /// # Errors
    ///
    /// Any dispatch error, e.g. `ENTITY_IS_DELETED`.
    pub async fn update(&self, sobject: &str, id: &str, record: Value) -> Result<()> {
        let path = self.versioned(&format!("sobjects/{sobject}/{id}"));
        self.request(&ApiRequest::patch(path, record)).await?;
        Ok(())
    }

    /// Delete a record.
    ///
    /// # Errors
    ///
    /// Any dispatch error, e.g. `DELETE_FAILED`.
    pub async fn delete(&self, sobject: &str, id: &str) -> Result<()> {
        let path = self.versioned(&format!("sobjects/{sobject}/{id}"));
        self.request(&ApiRequest::delete(path)).await?;
        Ok(())
    }

    /// API versions the instance supports.
    ///
    /// # Errors
    ///
    /// Any dispatch error.
    pub async fn versions(&self) -> Result<Value> {
        self.request(&ApiRequest::get("")).await?.into_json()
    }

    /// The org's limits.
    ///
    /// # Errors
    ///
    /// Any dispatch error.
    pub async fn limits(&self) -> Result<Value> {
        self.request(&ApiRequest::get(self.versioned("limits")))
            .await?
            .into_json()
    }

    fn with_query_options(&self, request: ApiRequest) -> ApiRequest {
        match self.config().query_batch_size {
            Some(size) => request.with_header(QUERY_OPTIONS_HEADER, format!("batchSize={size}")),
            None => request,
        }
    }
}
