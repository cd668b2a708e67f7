use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::model::QueryValue;

const QUERY_PATH: &str = "/api/v1/query";

#[derive(thiserror::Error, Debug)]
pub enum QueryError {
    #[error("invalid thanos query url {address:?}: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error("{kind}: {message}")]
    Api { kind: String, message: String },

    #[error("server returned HTTP status {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("failed to decode query response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("query response has no data")]
    MissingData,
}

#[derive(Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
enum ApiStatus {
    Success,
    Error,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiResponse {
    status: ApiStatus,
    #[serde(default)]
    data: Option<QueryValue>,
    #[serde(default)]
    error_type: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    warnings: Vec<String>,
}

/// Instant-query client for a Prometheus compatible API such as Thanos query.
#[derive(Debug, Clone)]
pub struct QueryClient {
    address: Url,
    http: Client,
}

impl QueryClient {
    pub fn new(address: &str) -> Result<Self, QueryError> {
        let invalid = |reason: String| QueryError::InvalidAddress {
            address: address.to_string(),
            reason,
        };
        let address = Url::parse(address).map_err(|e| invalid(e.to_string()))?;
        if !matches!(address.scheme(), "http" | "https") {
            return Err(invalid(format!(
                "unsupported scheme {:?}",
                address.scheme()
            )));
        }
        if address.host_str().is_none() {
            return Err(invalid("missing host".to_string()));
        }
        Ok(QueryClient {
            address,
            http: create_client()?,
        })
    }

    fn endpoint(&self, path: &str) -> Url {
        let mut url = self.address.clone();
        let prefix = url.path().trim_end_matches('/').to_string();
        url.set_path(&format!("{prefix}{path}"));
        url
    }

    /// Evaluates `query` at `time`.
    ///
    /// The query is POSTed as a form; backends that refuse POST get the same
    /// parameters again as a GET.
    pub async fn query(&self, query: &str, time: DateTime<Utc>) -> Result<QueryValue, QueryError> {
        let url = self.endpoint(QUERY_PATH);
        let params = [("query", query.to_string()), ("time", format_time(time))];

        let mut response = self.http.post(url.clone()).form(&params).send().await?;
        if matches!(
            response.status(),
            StatusCode::METHOD_NOT_ALLOWED | StatusCode::NOT_IMPLEMENTED
        ) {
            debug!(status = %response.status(), "POST refused, retrying query with GET");
            response = self.http.get(url).query(&params).send().await?;
        }

        let status = response.status();
        let body = response.bytes().await?;
        let decoded = serde_json::from_slice::<ApiResponse>(&body);
        let envelope = match decoded {
            Ok(envelope) if status.is_success() || envelope.status == ApiStatus::Error => envelope,
            Err(e) if status.is_success() => return Err(e.into()),
            _ => {
                return Err(QueryError::Status {
                    status,
                    body: String::from_utf8_lossy(&body).trim().to_string(),
                })
            }
        };

        for warning in &envelope.warnings {
            warn!(%warning, query, "thanos query returned a warning");
        }

        match envelope.status {
            ApiStatus::Success => envelope.data.ok_or(QueryError::MissingData),
            ApiStatus::Error => Err(QueryError::Api {
                kind: envelope.error_type.unwrap_or_default(),
                message: envelope.error.unwrap_or_default(),
            }),
        }
    }
}

/// Unix seconds with a fractional part, as the query API expects for `time`.
fn format_time(time: DateTime<Utc>) -> String {
    let nanos = time.timestamp_subsec_nanos();
    if nanos == 0 {
        return time.timestamp().to_string();
    }
    let fraction = format!("{nanos:09}");
    format!("{}.{}", time.timestamp(), fraction.trim_end_matches('0'))
}

pub fn create_client() -> Result<Client, reqwest::Error> {
    let mut headers = reqwest::header::HeaderMap::new();
    headers.append(
        reqwest::header::ACCEPT,
        reqwest::header::HeaderValue::from_static("application/json"),
    );
    let client = reqwest::ClientBuilder::new();
    client
        .default_headers(headers)
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .build()
}
