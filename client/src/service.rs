use crate::endpoint::{Endpoint, EndpointStatus};
use crate::types::{ConvertDocumentResponse, ConvertOptions, ConvertSourceRequest, FileUpload, Task};
use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("Unexpected status {status} from {url}")]
    UnexpectedStatus { url: String, status: u16 },

    #[error("Service unavailable: {message}")]
    ServiceUnavailable { message: String },

    #[error("Conversion task {task_id} failed with status {status}")]
    TaskFailed { task_id: String, status: String },

    #[error("Conversion task {task_id} did not finish after {polls} polls")]
    PollLimitExceeded { task_id: String, polls: u32 },
}

pub type ClientResult<T> = Result<T, ClientError>;

/// Operations the deployment tooling needs from a running docling-serve
#[async_trait]
pub trait DocumentService: Send + Sync {
    /// Succeeds only when `/health` answers with a 2xx status
    async fn health_check(&self) -> ClientResult<()>;

    async fn check_endpoint(&self, endpoint: Endpoint) -> EndpointStatus;

    async fn submit_async(&self, request: &ConvertSourceRequest) -> ClientResult<Task>;

    /// Multipart upload to `/v1/convert/file/async`
    async fn upload_async(
        &self,
        upload: &FileUpload,
        options: &ConvertOptions,
    ) -> ClientResult<Task>;

    async fn poll(&self, task_id: &str) -> ClientResult<Task>;

    async fn result(&self, task_id: &str) -> ClientResult<ConvertDocumentResponse>;

    fn base_url(&self) -> &str;
}
