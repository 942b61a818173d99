//! HTTP client for the job-queue API.

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;

use jobq_core::{Error, Queue, Result, Task, TaskFilter, TaskId, TaskStats, TaskStatus};

use crate::filters::query_params;

/// Header carrying the consumer identity; recorded verbatim in
/// `assigned_to` on lease.
pub const CLIENT_ID_HEADER: &str = "X-Client-ID";

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Service health report from `GET /health`.
#[derive(Debug, Clone, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub version: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

/// API client.
///
/// Cheap to clone and safe to share across workers: the underlying
/// `reqwest::Client` pools connections and is `Send + Sync`.
#[derive(Debug, Clone)]
pub struct Client {
    http: reqwest::Client,
    base_url: String,
    client_id: String,
}

/// Builder for [`Client`].
#[derive(Debug)]
pub struct ClientBuilder {
    base_url: String,
    timeout: Duration,
    client_id: Option<String>,
    http: Option<reqwest::Client>,
}

impl ClientBuilder {
    /// Request timeout for every call (default 30 s).
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Consumer identity. Defaults to `hostname-pid`.
    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    /// Use a preconfigured `reqwest::Client` (ignores [`Self::timeout`]).
    pub fn http_client(mut self, http: reqwest::Client) -> Self {
        self.http = Some(http);
        self
    }

    pub fn build(self) -> Result<Client> {
        let http = match self.http {
            Some(http) => http,
            None => reqwest::Client::builder()
                .timeout(self.timeout)
                .build()
                .map_err(|e| Error::internal(format!("failed to build http client: {e}")))?,
        };

        Ok(Client {
            http,
            base_url: self.base_url.trim_end_matches('/').to_string(),
            client_id: self.client_id.unwrap_or_else(default_client_id),
        })
    }
}

impl Client {
    pub fn builder(base_url: impl Into<String>) -> ClientBuilder {
        ClientBuilder {
            base_url: base_url.into(),
            timeout: DEFAULT_REQUEST_TIMEOUT,
            client_id: None,
            http: None,
        }
    }

    /// Client with default settings.
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        Self::builder(base_url).build()
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn dashboard_url(&self) -> String {
        format!("{}/dashboard/", self.base_url)
    }

    pub async fn health(&self) -> Result<HealthStatus> {
        self.execute(self.http.get(self.url("/health"))).await
    }

    /// Create or update a queue. The timeout travels as integer seconds.
    pub async fn upsert_queue(&self, name: &str, task_timeout: Duration) -> Result<Queue> {
        if name.is_empty() {
            return Err(Error::validation("queue name is required"));
        }
        let body = serde_json::json!({ "task_timeout": task_timeout.as_secs() });
        self.execute(
            self.http
                .put(self.url(&format!("/api/v1/queues/{name}")))
                .json(&body),
        )
        .await
    }

    /// `None` when the queue does not exist.
    pub async fn get_queue(&self, name: &str) -> Result<Option<Queue>> {
        if name.is_empty() {
            return Err(Error::validation("queue name is required"));
        }
        optional(
            self.execute(self.http.get(self.url(&format!("/api/v1/queues/{name}"))))
                .await,
        )
    }

    pub async fn list_queues(&self) -> Result<Vec<Queue>> {
        self.execute(self.http.get(self.url("/api/v1/queues"))).await
    }

    /// Submit a task. The payload is opaque JSON; the server assigns the id.
    pub async fn create_task(&self, queue_name: &str, data: Value) -> Result<Task> {
        let body = serde_json::json!({ "queue_name": queue_name, "data": data });
        self.execute(self.http.post(self.url("/api/v1/tasks")).json(&body))
            .await
    }

    pub async fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>> {
        self.execute(
            self.http
                .get(self.url("/api/v1/tasks"))
                .query(&query_params(filter)),
        )
        .await
    }

    pub async fn task_stats(&self, filter: &TaskFilter) -> Result<TaskStats> {
        let mut params = query_params(filter);
        params.push(("summary", "true".to_string()));
        self.execute(self.http.get(self.url("/api/v1/tasks")).query(&params))
            .await
    }

    /// Report a task's terminal (or re-enqueued) state.
    pub async fn update_task(&self, id: TaskId, status: TaskStatus, data: Value) -> Result<Task> {
        let body = serde_json::json!({ "status": status, "data": data });
        self.execute(
            self.http
                .put(self.url(&format!("/api/v1/tasks/{id}")))
                .json(&body),
        )
        .await
    }

    pub async fn delete_task(&self, id: TaskId) -> Result<()> {
        self.execute_empty(self.http.delete(self.url(&format!("/api/v1/tasks/{id}"))))
            .await
    }

    /// Lease the next pending task. `None` when the queue is empty.
    pub async fn get_next_task(&self, queue_name: &str) -> Result<Option<Task>> {
        optional(
            self.execute(
                self.http
                    .get(self.url("/api/v1/tasks/next"))
                    .query(&[("queue", queue_name)]),
            )
            .await,
        )
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn execute<T: serde::de::DeserializeOwned>(
        &self,
        req: reqwest::RequestBuilder,
    ) -> Result<T> {
        let response = req
            .header(CLIENT_ID_HEADER, &self.client_id)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if status.is_success() {
            response
                .json()
                .await
                .map_err(|e| Error::internal(format!("failed to decode response: {e}")))
        } else {
            Err(api_error(status, response).await)
        }
    }

    async fn execute_empty(&self, req: reqwest::RequestBuilder) -> Result<()> {
        let response = req
            .header(CLIENT_ID_HEADER, &self.client_id)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(api_error(status, response).await)
        }
    }
}

/// Map a NotFound result to `Ok(None)`.
fn optional<T>(result: Result<T>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(Error::NotFound(_)) => Ok(None),
        Err(err) => Err(err),
    }
}

async fn api_error(status: StatusCode, response: reqwest::Response) -> Error {
    let message = match response.json::<ErrorBody>().await {
        Ok(body) => body.error,
        Err(_) => status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string(),
    };

    match status {
        StatusCode::BAD_REQUEST => Error::Validation(message),
        StatusCode::NOT_FOUND => Error::NotFound(message),
        StatusCode::CONFLICT => Error::Conflict(message),
        s if s.is_server_error() => Error::Transient(message),
        _ => Error::Internal(message),
    }
}

fn transport_error(err: reqwest::Error) -> Error {
    Error::transient(format!("request failed: {err}"))
}

fn default_client_id() -> String {
    let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string());
    format!("{hostname}-{}", std::process::id())
}
