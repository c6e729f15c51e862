//! HTTP clients for the RPC surfaces
//!
//! `SchedulerClient` is used by workers and the CLI to talk to the
//! scheduler; `WorkerClient` is used by the scheduler to push tasks to
//! workers. Both are thin typed wrappers over one shared `reqwest` client.

use async_trait::async_trait;
use reqwest::StatusCode;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::protocol::{
    CancelTaskRequest, ErrorResponse, ExecuteMapRequest, ExecuteReduceRequest, HeartbeatRequest,
    HeartbeatResponse, JobStatusResponse, RegisterWorkerRequest, RegisterWorkerResponse,
    ResultsResponse, SubmitJobRequest, SubmitJobResponse, TaskCompletedRequest,
    TaskCompletedResponse, UploadBlobRequest,
};
use crate::scheduler::dispatch::TaskTransport;
use crate::scheduler::job::JobId;
use crate::scheduler::task::AttemptId;
use crate::scheduler::worker_registry::WorkerId;

const RPC_TIMEOUT: Duration = Duration::from_secs(30);

fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(RPC_TIMEOUT)
        .build()
        .expect("reqwest client construction cannot fail with static options")
}

/// Map a non-success HTTP reply onto the error kinds callers match on
async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let message = match response.json::<ErrorResponse>().await {
        Ok(body) => body.error,
        Err(_) => format!("HTTP {}", status),
    };

    Err(match status {
        StatusCode::BAD_REQUEST => Error::bad_request(message),
        StatusCode::NOT_FOUND => Error::not_found(message),
        StatusCode::CONFLICT => Error::worker_unavailable(message),
        _ => Error::network(message),
    })
}

/// Client for the scheduler's RPC surface
#[derive(Clone)]
pub struct SchedulerClient {
    base_url: String,
    http: reqwest::Client,
}

impl SchedulerClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http: http_client(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn submit_job(&self, request: &SubmitJobRequest) -> Result<JobId> {
        let response = self
            .http
            .post(self.url("/api/v1/jobs"))
            .json(request)
            .send()
            .await?;
        let body: SubmitJobResponse = check(response).await?.json().await?;
        Ok(body.job_id)
    }

    pub async fn job_status(&self, job_id: JobId) -> Result<JobStatusResponse> {
        let response = self
            .http
            .get(self.url(&format!("/api/v1/jobs/{}", job_id)))
            .send()
            .await?;
        Ok(check(response).await?.json().await?)
    }

    pub async fn results(&self, output_path: &str, limit: Option<usize>) -> Result<Vec<String>> {
        let mut request = self
            .http
            .get(self.url("/api/v1/results"))
            .query(&[("path", output_path)]);
        if let Some(limit) = limit {
            request = request.query(&[("limit", limit.to_string())]);
        }
        let body: ResultsResponse = check(request.send().await?).await?.json().await?;
        Ok(body.lines)
    }

    pub async fn upload_blob(&self, request: &UploadBlobRequest) -> Result<()> {
        let response = self
            .http
            .post(self.url("/api/v1/blobs"))
            .json(request)
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }

    pub async fn register_worker(&self, request: &RegisterWorkerRequest) -> Result<WorkerId> {
        let response = self
            .http
            .post(self.url("/api/v1/workers/register"))
            .json(request)
            .send()
            .await?;
        let body: RegisterWorkerResponse = check(response).await?.json().await?;
        Ok(body.worker_id)
    }

    pub async fn heartbeat(&self, request: &HeartbeatRequest) -> Result<HeartbeatResponse> {
        let response = self
            .http
            .post(self.url("/api/v1/workers/heartbeat"))
            .json(request)
            .send()
            .await?;
        Ok(check(response).await?.json().await?)
    }

    pub async fn task_completed(
        &self,
        request: &TaskCompletedRequest,
    ) -> Result<TaskCompletedResponse> {
        let response = self
            .http
            .post(self.url("/api/v1/workers/completions"))
            .json(request)
            .send()
            .await?;
        Ok(check(response).await?.json().await?)
    }
}

/// Client for a worker's task surface
#[derive(Clone, Default)]
pub struct WorkerClient {
    http: reqwest::Client,
}

impl WorkerClient {
    pub fn new() -> Self {
        Self {
            http: http_client(),
        }
    }

    pub async fn execute_map(&self, endpoint: &str, request: &ExecuteMapRequest) -> Result<()> {
        let url = format!("{}/api/v1/tasks/map", endpoint.trim_end_matches('/'));
        check(self.http.post(url).json(request).send().await?).await?;
        Ok(())
    }

    pub async fn execute_reduce(
        &self,
        endpoint: &str,
        request: &ExecuteReduceRequest,
    ) -> Result<()> {
        let url = format!("{}/api/v1/tasks/reduce", endpoint.trim_end_matches('/'));
        check(self.http.post(url).json(request).send().await?).await?;
        Ok(())
    }

    pub async fn cancel(&self, endpoint: &str, attempt_id: AttemptId) -> Result<()> {
        let url = format!("{}/api/v1/tasks/cancel", endpoint.trim_end_matches('/'));
        let request = CancelTaskRequest { attempt_id };
        check(self.http.post(url).json(&request).send().await?).await?;
        Ok(())
    }
}

/// Production transport: pushes tasks to workers over HTTP
#[derive(Clone, Default)]
pub struct HttpTransport {
    client: WorkerClient,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self {
            client: WorkerClient::new(),
        }
    }
}

#[async_trait]
impl TaskTransport for HttpTransport {
    async fn execute_map(&self, endpoint: &str, request: ExecuteMapRequest) -> Result<()> {
        self.client.execute_map(endpoint, &request).await
    }

    async fn execute_reduce(&self, endpoint: &str, request: ExecuteReduceRequest) -> Result<()> {
        self.client.execute_reduce(endpoint, &request).await
    }

    async fn cancel(&self, endpoint: &str, attempt_id: AttemptId) -> Result<()> {
        self.client.cancel(endpoint, attempt_id).await
    }
}
