use serve_client::{
    check_endpoints, convert_and_wait, upload_and_wait, ClientError, ConvertOptions,
    ConvertSourceRequest, DoclingClient, DocumentService, Endpoint, FileUpload, ServeConfig,
    Source, TaskStatus,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

const TIMEOUT: Duration = Duration::from_secs(10);

/// One request as seen by the stub server
struct StubRequest {
    method: String,
    path: String,
    headers: Vec<(String, String)>,
    body: String,
}

impl StubRequest {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    fn route(&self) -> (&str, &str) {
        (self.method.as_str(), self.path.as_str())
    }
}

/// Minimal HTTP/1.1 server answering every request through `handler`
async fn spawn_stub<F>(handler: F) -> String
where
    F: Fn(&StubRequest) -> (u16, String) + Send + Sync + 'static,
{
    let handler = Arc::new(handler);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            let handler = handler.clone();
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let mut chunk = [0u8; 4096];
                let header_end = loop {
                    let n = socket.read(&mut chunk).await.unwrap_or(0);
                    if n == 0 {
                        return;
                    }
                    buf.extend_from_slice(&chunk[..n]);
                    if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                        break pos + 4;
                    }
                };

                let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
                let mut lines = head.lines();
                let mut request_line = lines.next().unwrap_or("").split_whitespace();
                let method = request_line.next().unwrap_or("").to_string();
                let path = request_line.next().unwrap_or("").to_string();
                let headers: Vec<(String, String)> = lines
                    .filter_map(|l| {
                        let (name, value) = l.split_once(':')?;
                        Some((name.trim().to_ascii_lowercase(), value.trim().to_string()))
                    })
                    .collect();

                let content_length = headers
                    .iter()
                    .find(|(n, _)| n == "content-length")
                    .and_then(|(_, v)| v.parse::<usize>().ok())
                    .unwrap_or(0);
                while buf.len() < header_end + content_length {
                    let n = socket.read(&mut chunk).await.unwrap_or(0);
                    if n == 0 {
                        break;
                    }
                    buf.extend_from_slice(&chunk[..n]);
                }

                let request = StubRequest {
                    method,
                    path,
                    headers,
                    body: String::from_utf8_lossy(&buf[header_end..]).to_string(),
                };
                let (status, body) = handler(&request);

                let response = format!(
                    "HTTP/1.1 {} Stub\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    format!("http://{}", addr)
}

fn client_for(base_url: &str) -> DoclingClient {
    DoclingClient::new(
        ServeConfig::default()
            .with_base_url(base_url)
            .with_timeout(TIMEOUT),
    )
    .expect("client creation")
}

#[tokio::test]
async fn test_health_check_passes_on_ok() {
    let url = spawn_stub(|req| match req.path.as_str() {
        "/health" => (200, r#"{"status":"ok"}"#.to_string()),
        _ => (404, "{}".to_string()),
    })
    .await;

    client_for(&url).health_check().await.expect("health check");
}

#[tokio::test]
async fn test_api_key_header_is_sent() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let recorder = seen.clone();
    let url = spawn_stub(move |req| {
        recorder
            .lock()
            .unwrap()
            .push(req.header("x-api-key").map(str::to_string));
        match req.header("x-api-key") {
            Some("s3cret") => (200, "{}".to_string()),
            _ => (401, "{}".to_string()),
        }
    })
    .await;

    let client = DoclingClient::new(
        ServeConfig::default()
            .with_base_url(&url)
            .with_timeout(TIMEOUT)
            .with_api_key("s3cret"),
    )
    .unwrap();
    client.health_check().await.expect("health check with key");

    let anonymous = client_for(&url).health_check().await;
    assert!(matches!(
        anonymous,
        Err(ClientError::UnexpectedStatus { status: 401, .. })
    ));

    let seen = seen.lock().unwrap();
    assert_eq!(*seen, vec![Some("s3cret".to_string()), None]);
}

#[tokio::test]
async fn test_health_check_fails_on_server_error() {
    let url = spawn_stub(|_| (503, "{}".to_string())).await;

    let result = client_for(&url).health_check().await;
    assert!(matches!(
        result,
        Err(ClientError::UnexpectedStatus { status: 503, .. })
    ));
}

#[tokio::test]
async fn test_check_all_endpoints() {
    let url = spawn_stub(|req| {
        assert_eq!(req.method, "GET");
        match req.path.as_str() {
            "/health" | "/docs" => (200, "{}".to_string()),
            "/v1/convert/source" | "/v1/convert/upload" => (405, "{}".to_string()),
            _ => (404, "{}".to_string()),
        }
    })
    .await;

    let client = client_for(&url);
    let report = check_endpoints(&client).await;

    assert_eq!(report.statuses.len(), 5);
    assert!(report.healthy());
    let failed: Vec<_> = report.failed().map(|s| s.endpoint).collect();
    assert_eq!(failed, vec![Endpoint::Ui]);
}

#[tokio::test]
async fn test_convert_and_wait_polls_until_success() {
    let polls = Arc::new(AtomicUsize::new(0));
    let counter = polls.clone();
    let url = spawn_stub(move |req| match req.route() {
        ("POST", "/v1/convert/source/async") => (
            200,
            r#"{"task_id":"t-42","task_status":"pending","task_position":3}"#.to_string(),
        ),
        ("GET", "/v1/status/poll/t-42") => {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            let status = if n < 2 { "started" } else { "success" };
            (
                200,
                format!(r#"{{"task_id":"t-42","task_status":"{}"}}"#, status),
            )
        }
        ("GET", "/v1/result/t-42") => (
            200,
            r##"{"document":{"md_content":"# Converted document body","json_content":{"k":1}},"status":"success","processing_time":2.5}"##
                .to_string(),
        ),
        _ => (404, "{}".to_string()),
    })
    .await;

    let client = client_for(&url);
    let request = ConvertSourceRequest::new(vec![Source::from_bytes("n2.pdf", b"%PDF-1.7")]);
    let response = convert_and_wait(&client, &request, Duration::from_millis(10), 10)
        .await
        .expect("conversion");

    assert_eq!(polls.load(Ordering::SeqCst), 3);
    assert_eq!(response.status.as_deref(), Some("success"));

    let dir = tempfile::tempdir().unwrap();
    let saved = response.save_outputs(dir.path()).unwrap();
    assert!(saved.markdown.is_some());
    assert!(saved.json.is_some());
}

#[tokio::test]
async fn test_convert_and_wait_reports_failure() {
    let url = spawn_stub(|req| match req.path.as_str() {
        "/v1/convert/source/async" => (
            200,
            r#"{"task_id":"bad","task_status":"failure"}"#.to_string(),
        ),
        _ => (404, "{}".to_string()),
    })
    .await;

    let client = client_for(&url);
    let request = ConvertSourceRequest::new(vec![Source::url("https://example.com/x.pdf")]);
    let result = convert_and_wait(&client, &request, Duration::from_millis(10), 5).await;
    assert!(matches!(result, Err(ClientError::TaskFailed { .. })));
}

#[tokio::test]
async fn test_convert_and_wait_poll_limit() {
    let url = spawn_stub(|req| {
        let path = req.path.as_str();
        if path.starts_with("/v1/status/poll/") || path == "/v1/convert/source/async" {
            (
                200,
                r#"{"task_id":"slow","task_status":"started"}"#.to_string(),
            )
        } else {
            (404, "{}".to_string())
        }
    })
    .await;

    let client = client_for(&url);
    let request = ConvertSourceRequest::new(vec![Source::url("https://example.com/x.pdf")]);
    let result = convert_and_wait(&client, &request, Duration::from_millis(5), 2).await;
    assert!(matches!(
        result,
        Err(ClientError::PollLimitExceeded { polls: 2, .. })
    ));
}

#[tokio::test]
async fn test_url_source_is_submitted() {
    let url = spawn_stub(|req| match req.route() {
        ("POST", "/v1/convert/source/async") => {
            let body: serde_json::Value = serde_json::from_str(&req.body).unwrap();
            assert_eq!(
                body["sources"],
                serde_json::json!([{"kind": "http", "url": "https://arxiv.org/pdf/2501.17887"}])
            );
            (200, r#"{"task_id":"u1","task_status":"success"}"#.to_string())
        }
        ("GET", "/v1/result/u1") => (
            200,
            r##"{"document":{"md_content":"# Remote paper converted"}}"##.to_string(),
        ),
        _ => (404, "{}".to_string()),
    })
    .await;

    let source = Source::parse_url("https://arxiv.org/pdf/2501.17887").unwrap();
    let request = ConvertSourceRequest::new(vec![source]);
    let response = convert_and_wait(&client_for(&url), &request, Duration::from_millis(5), 3)
        .await
        .expect("url conversion");
    assert_eq!(
        response.document.md_content.as_deref(),
        Some("# Remote paper converted")
    );
}

#[tokio::test]
async fn test_upload_and_wait_sends_multipart() {
    let url = spawn_stub(|req| match req.route() {
        ("POST", "/v1/convert/file/async") => {
            let content_type = req.header("content-type").unwrap_or("");
            assert!(content_type.starts_with("multipart/form-data; boundary="));
            assert!(req.body.contains(r#"name="files"; filename="n2.pdf""#));
            assert!(req.body.contains("Content-Type: application/pdf"));
            assert!(req.body.contains("%PDF-1.7"));
            assert!(req.body.contains("name=\"ocr_engine\"\r\n\r\neasyocr"));
            assert_eq!(req.body.matches("name=\"to_formats\"").count(), 2);
            (
                200,
                r#"{"task_id":"up-1","task_status":"pending"}"#.to_string(),
            )
        }
        ("GET", "/v1/status/poll/up-1") => (
            200,
            r#"{"task_id":"up-1","task_status":"success"}"#.to_string(),
        ),
        ("GET", "/v1/result/up-1") => (
            200,
            r##"{"document":{"md_content":"# Uploaded document body"}}"##.to_string(),
        ),
        _ => (404, "{}".to_string()),
    })
    .await;

    let upload = FileUpload::new("n2.pdf", b"%PDF-1.7".to_vec());
    let response = upload_and_wait(
        &client_for(&url),
        &upload,
        &ConvertOptions::default(),
        Duration::from_millis(5),
        3,
    )
    .await
    .expect("upload conversion");
    assert_eq!(
        response.document.md_content.as_deref(),
        Some("# Uploaded document body")
    );
}

#[tokio::test]
async fn test_convert_file_is_synchronous() {
    let url = spawn_stub(|req| match req.route() {
        ("POST", "/v1/convert/file") => (
            200,
            r###"{"document":{"md_content":"## DocLayNet: dataset","json_content":{"schema_name":"DoclingDocument"}},"status":"success"}"###
                .to_string(),
        ),
        _ => (404, "{}".to_string()),
    })
    .await;

    let upload = FileUpload::new("n2.pdf", b"%PDF-1.7".to_vec());
    let response = client_for(&url)
        .convert_file(&upload, &ConvertOptions::default())
        .await
        .expect("sync conversion");
    assert_eq!(
        response.document.json_content.unwrap()["schema_name"],
        "DoclingDocument"
    );
}

#[tokio::test]
#[ignore]
async fn test_live_service_health() {
    let client = DoclingClient::with_default_config().expect("client creation");

    tokio::time::timeout(TIMEOUT, client.health_check())
        .await
        .expect("health_check timed out")
        .expect("health_check failed");

    let report = check_endpoints(&client).await;
    assert!(report.healthy());
    assert_eq!(TaskStatus::Success.to_string(), "success");
}
