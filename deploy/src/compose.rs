//! Compose file and reverse-proxy config rendering.
//!
//! The base service always runs. Optional services are grouped into compose
//! profiles and only start when their profile is activated.

use crate::config::DeployConfig;
use image_builder::SERVICE_PORT;

pub const SERVICE_NAME: &str = "docling-serve";
const CONTAINER_HF_HOME: &str = "/opt/app-root/src/.cache/huggingface";
const CONTAINER_LOGS: &str = "/opt/app-root/src/logs";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComposeProfile {
    /// nginx reverse proxy on 80/443
    Production,
    /// prometheus + grafana
    Monitoring,
}

impl ComposeProfile {
    pub fn name(&self) -> &'static str {
        match self {
            ComposeProfile::Production => "production",
            ComposeProfile::Monitoring => "monitoring",
        }
    }

    pub fn services(&self) -> &'static [&'static str] {
        match self {
            ComposeProfile::Production => &["nginx"],
            ComposeProfile::Monitoring => &["prometheus", "grafana"],
        }
    }
}

impl std::fmt::Display for ComposeProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

const GPU_RESERVATION: &str = r#"
    deploy:
      resources:
        reservations:
          devices:
            - driver: nvidia
              count: all
              capabilities: [gpu]"#;

/// YAML double-quoted scalar
fn quoted(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Quoted scalar that compose must not interpolate
fn literal(value: &str) -> String {
    quoted(&value.replace('$', "$$"))
}

fn relative_mount(path: &std::path::Path) -> String {
    let display = path.display().to_string();
    if path.is_absolute() || display.starts_with("./") || display.starts_with("../") {
        display
    } else {
        format!("./{}", display)
    }
}

/// Render `docker-compose.yml` for `config`
pub fn render_compose(config: &DeployConfig) -> String {
    let mut environment = vec![
        literal(&format!("DOCLING_SERVE_ENABLE_UI={}", config.enable_ui)),
        literal(&format!("HF_HOME={}", CONTAINER_HF_HOME)),
        literal(&format!(
            "DOCLING_SERVE_ARTIFACTS_PATH={}",
            config.artifacts_path
        )),
        literal(&format!("OMP_NUM_THREADS={}", config.omp_num_threads)),
        literal(&format!("MKL_NUM_THREADS={}", config.mkl_num_threads)),
    ];
    if config.api_key.is_some() {
        environment.push(quoted("DOCLING_SERVE_API_KEY=${DOCLING_SERVE_API_KEY}"));
    }
    let environment: String = environment
        .iter()
        .map(|entry| format!("\n      - {}", entry))
        .collect();

    let image = quoted(&format!(
        "${{DOCLING_IMAGE:-{}}}",
        config.local_image().replace('$', "$$")
    ));
    let cache_mount = literal(&format!(
        "{}:{}",
        relative_mount(&config.cache_dir),
        CONTAINER_HF_HOME
    ));
    let logs_mount = literal(&format!(
        "{}:{}",
        relative_mount(&config.logs_dir),
        CONTAINER_LOGS
    ));
    let gpu = if config.variant.is_gpu() {
        GPU_RESERVATION
    } else {
        ""
    };

    format!(
        r#"name: {project}
services:
  {service}:
    image: {image}
    container_name: {service}
    restart: unless-stopped
    ports:
      - "{port}:{service_port}"
    environment:{environment}
    volumes:
      - {cache_mount}
      - {logs_mount}
    healthcheck:
      test: ["CMD", "curl", "-f", "http://localhost:{service_port}/health"]
      interval: 30s
      timeout: 10s
      retries: 3
      start_period: 60s{gpu}

  nginx:
    image: nginx:alpine
    profiles: ["{production}"]
    restart: unless-stopped
    ports:
      - "80:80"
      - "443:443"
    volumes:
      - ./nginx/nginx.conf:/etc/nginx/nginx.conf:ro
      - ./nginx/ssl:/etc/nginx/ssl:ro
    depends_on:
      - {service}

  prometheus:
    image: prom/prometheus:latest
    profiles: ["{monitoring}"]
    ports:
      - "9090:9090"

  grafana:
    image: grafana/grafana:latest
    profiles: ["{monitoring}"]
    ports:
      - "3000:3000"
    depends_on:
      - prometheus
"#,
        project = literal(&config.project_name),
        service = SERVICE_NAME,
        image = image,
        port = config.port,
        service_port = SERVICE_PORT,
        environment = environment,
        cache_mount = cache_mount,
        logs_mount = logs_mount,
        gpu = gpu,
        production = ComposeProfile::Production.name(),
        monitoring = ComposeProfile::Monitoring.name(),
    )
}

/// nginx config proxying 80/443 to the service
pub fn render_nginx_conf() -> String {
    format!(
        r#"events {{
    worker_connections 1024;
}}

http {{
    client_max_body_size 100M;

    upstream docling {{
        server {service}:{port};
    }}

    server {{
        listen 80;
        server_name _;

        location / {{
            proxy_pass http://docling;
            proxy_set_header Host $host;
            proxy_set_header X-Real-IP $remote_addr;
            proxy_set_header X-Forwarded-For $proxy_add_x_forwarded_for;
            proxy_set_header X-Forwarded-Proto $scheme;
            proxy_read_timeout 600s;
            proxy_send_timeout 600s;
        }}
    }}

    server {{
        listen 443 ssl;
        server_name _;

        ssl_certificate /etc/nginx/ssl/cert.pem;
        ssl_certificate_key /etc/nginx/ssl/key.pem;

        location / {{
            proxy_pass http://docling;
            proxy_set_header Host $host;
            proxy_set_header X-Forwarded-Proto https;
            proxy_read_timeout 600s;
        }}
    }}
}}
"#,
        service = SERVICE_NAME,
        port = SERVICE_PORT
    )
}
