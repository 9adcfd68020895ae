use crate::config::ServeConfig;
use crate::endpoint::{Endpoint, EndpointReport, EndpointStatus};
use crate::service::{ClientError, ClientResult, DocumentService};
use crate::types::{
    ConvertDocumentResponse, ConvertOptions, ConvertSourceRequest, FileUpload, Task, TaskStatus,
};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::multipart::{Form, Part};
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

const API_KEY_HEADER: &str = "x-api-key";

pub struct DoclingClient {
    http_client: reqwest::Client,
    config: ServeConfig,
}

impl DoclingClient {
    pub fn new(config: ServeConfig) -> ClientResult<Self> {
        config
            .validate()
            .map_err(|message| ClientError::InvalidConfig { message })?;

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        if let Some(key) = &config.api_key {
            let value = HeaderValue::from_str(key).map_err(|e| ClientError::InvalidConfig {
                message: format!("API key is not a valid header value: {}", e),
            })?;
            headers.insert(API_KEY_HEADER, value);
        }

        let http_client = reqwest::Client::builder()
            .timeout(config.timeout)
            .default_headers(headers)
            .build()?;

        Ok(Self {
            http_client,
            config,
        })
    }

    pub fn with_default_config() -> ClientResult<Self> {
        Self::new(ServeConfig::default())
    }

    pub fn config(&self) -> &ServeConfig {
        &self.config
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> ClientResult<T> {
        let url = self.config.url(path);
        debug!("GET {}", url);

        let response = self.http_client.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::UnexpectedStatus {
                url,
                status: status.as_u16(),
            });
        }

        let body = response.text().await?;
        Ok(serde_json::from_str(&body)?)
    }

    async fn post_form<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        upload: &FileUpload,
        options: &ConvertOptions,
    ) -> ClientResult<T> {
        let url = self.config.url(path);
        debug!("POST {} ({}, {} bytes)", url, upload.filename, upload.bytes.len());

        let response = self
            .http_client
            .post(&url)
            .multipart(multipart_form(upload, options)?)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::UnexpectedStatus {
                url,
                status: status.as_u16(),
            });
        }

        Ok(serde_json::from_str(&response.text().await?)?)
    }

    /// Synchronous multipart conversion through `/v1/convert/file`
    pub async fn convert_file(
        &self,
        upload: &FileUpload,
        options: &ConvertOptions,
    ) -> ClientResult<ConvertDocumentResponse> {
        self.post_form("/v1/convert/file", upload, options).await
    }
}

fn multipart_form(upload: &FileUpload, options: &ConvertOptions) -> ClientResult<Form> {
    let part = Part::bytes(upload.bytes.clone())
        .file_name(upload.filename.clone())
        .mime_str(&upload.mime)?;

    let mut form = Form::new().part("files", part);
    for (name, value) in options.form_fields()? {
        form = form.text(name, value);
    }
    Ok(form)
}

#[async_trait]
impl DocumentService for DoclingClient {
    async fn health_check(&self) -> ClientResult<()> {
        let url = self.config.url(Endpoint::Health.path());
        debug!("Performing health check against {}", url);

        let response = self.http_client.get(&url).send().await.map_err(|e| {
            if e.is_connect() || e.is_timeout() {
                ClientError::ServiceUnavailable {
                    message: format!("{} is not reachable: {}", url, e),
                }
            } else {
                ClientError::Network(e)
            }
        })?;

        let status = response.status().as_u16();
        if Endpoint::Health.accepts(status) {
            info!("Health check passed");
            Ok(())
        } else {
            error!("Health check failed with status {}", status);
            Err(ClientError::UnexpectedStatus { url, status })
        }
    }

    async fn check_endpoint(&self, endpoint: Endpoint) -> EndpointStatus {
        let url = self.config.url(endpoint.path());
        let start = Instant::now();

        match self.http_client.get(&url).send().await {
            Ok(response) => {
                let status = response.status().as_u16();
                debug!("{} -> {}", url, status);
                EndpointStatus::from_status(endpoint, status, start.elapsed())
            }
            Err(e) => {
                debug!("{} unreachable: {}", url, e);
                EndpointStatus::unreachable(endpoint, e.to_string(), start.elapsed())
            }
        }
    }

    async fn submit_async(&self, request: &ConvertSourceRequest) -> ClientResult<Task> {
        if request.sources.is_empty() {
            return Err(ClientError::InvalidRequest {
                message: "At least one source is required".to_string(),
            });
        }

        let url = self.config.url("/v1/convert/source/async");
        debug!("POST {} ({} sources)", url, request.sources.len());

        let response = self.http_client.post(&url).json(request).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::UnexpectedStatus {
                url,
                status: status.as_u16(),
            });
        }

        let task: Task = serde_json::from_str(&response.text().await?)?;
        info!("Submitted conversion task {}", task.task_id);
        Ok(task)
    }

    async fn upload_async(
        &self,
        upload: &FileUpload,
        options: &ConvertOptions,
    ) -> ClientResult<Task> {
        let task: Task = self
            .post_form("/v1/convert/file/async", upload, options)
            .await?;
        info!("Uploaded {} as task {}", upload.filename, task.task_id);
        Ok(task)
    }

    async fn poll(&self, task_id: &str) -> ClientResult<Task> {
        self.get_json(&format!("/v1/status/poll/{}", task_id)).await
    }

    async fn result(&self, task_id: &str) -> ClientResult<ConvertDocumentResponse> {
        self.get_json(&format!("/v1/result/{}", task_id)).await
    }

    fn base_url(&self) -> &str {
        self.config.base()
    }
}

/// Check every endpoint concurrently
pub async fn check_endpoints(service: &dyn DocumentService) -> EndpointReport {
    let statuses =
        futures::future::join_all(Endpoint::ALL.iter().map(|endpoint| service.check_endpoint(*endpoint)))
            .await;
    EndpointReport { statuses }
}

/// Submit a conversion and poll until it reaches a terminal status
pub async fn convert_and_wait(
    service: &dyn DocumentService,
    request: &ConvertSourceRequest,
    poll_interval: Duration,
    max_polls: u32,
) -> ClientResult<ConvertDocumentResponse> {
    let task = service.submit_async(request).await?;
    wait_for_result(service, task, poll_interval, max_polls).await
}

/// Upload a file and poll until it reaches a terminal status
pub async fn upload_and_wait(
    service: &dyn DocumentService,
    upload: &FileUpload,
    options: &ConvertOptions,
    poll_interval: Duration,
    max_polls: u32,
) -> ClientResult<ConvertDocumentResponse> {
    let task = service.upload_async(upload, options).await?;
    wait_for_result(service, task, poll_interval, max_polls).await
}

/// Poll `task` until it is terminal, then fetch the result
pub async fn wait_for_result(
    service: &dyn DocumentService,
    mut task: Task,
    poll_interval: Duration,
    max_polls: u32,
) -> ClientResult<ConvertDocumentResponse> {
    let mut polls = 0;

    while !task.task_status.is_terminal() {
        if polls >= max_polls {
            warn!("Giving up on task {} after {} polls", task.task_id, polls);
            return Err(ClientError::PollLimitExceeded {
                task_id: task.task_id,
                polls,
            });
        }

        sleep(poll_interval).await;
        task = service.poll(&task.task_id).await?;
        polls += 1;
        info!(
            "Task {} status: {} (position: {})",
            task.task_id,
            task.task_status,
            task.task_position
                .map(|p| p.to_string())
                .unwrap_or_else(|| "-".to_string())
        );
    }

    if task.task_status != TaskStatus::Success {
        return Err(ClientError::TaskFailed {
            task_id: task.task_id,
            status: task.task_status.to_string(),
        });
    }

    service.result(&task.task_id).await
}
