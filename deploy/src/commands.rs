//! Deployment operations behind each CLI subcommand.
//!
//! Every operation is a linear sequence of external invocations through a
//! [`CommandRunner`]; the first failing step aborts the sequence.

use crate::compose::{render_compose, render_nginx_conf, ComposeProfile, SERVICE_NAME};
use crate::config::{ConfigError, DeployConfig};
use crate::container::{
    detect_compose, detect_runtime_with, display_command, gpu_available, run_checked,
    stream_checked, to_args, ComposeCommand, CommandRunner, ContainerError, ContainerRuntime,
};
use crate::health::wait_for_healthy;
use chrono::{DateTime, Utc};
use image_builder::{mirror_chain, ContainerfileSpec, ImageBuilderError, RegistryMirror};
use serve_client::{
    check_endpoints, convert_and_wait, upload_and_wait, ClientError, ConvertOptions,
    ConvertSourceRequest, DocumentService, EndpointReport, FileUpload, SavedOutputs, Source,
};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum DeployError {
    #[error(transparent)]
    Container(#[from] ContainerError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Client(#[from] ClientError),

    #[error(transparent)]
    Image(#[from] ImageBuilderError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type DeployResult<T> = Result<T, DeployError>;

/// Result of `check`
#[derive(Debug, Clone)]
pub struct CheckReport {
    pub runtime: ContainerRuntime,
    pub compose: ComposeCommand,
    pub gpu: bool,
}

/// Files and directories touched by `setup`
#[derive(Debug, Clone, Default)]
pub struct SetupReport {
    pub created_dirs: Vec<PathBuf>,
    pub written_files: Vec<PathBuf>,
    pub kept_files: Vec<PathBuf>,
}

/// How `pull` obtained the image
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PullOutcome {
    Pulled { mirror: RegistryMirror, reference: String },
    Built { tag: String },
}

/// Result of `status`
#[derive(Debug, Clone)]
pub struct StatusReport {
    pub checked_at: DateTime<Utc>,
    pub containers: String,
    pub endpoints: EndpointReport,
}

/// Options for `logs`
#[derive(Debug, Clone, Default)]
pub struct LogsOptions {
    pub service: Option<String>,
    pub tail: Option<u32>,
    pub follow: bool,
}

/// What `convert` sends to the service
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConvertInput {
    /// Local file sent inline as base64
    File(PathBuf),
    /// Local file sent as a multipart upload
    Upload(PathBuf),
    /// Remote document fetched by the service
    Url(String),
}

impl std::fmt::Display for ConvertInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConvertInput::File(path) | ConvertInput::Upload(path) => {
                write!(f, "{}", path.display())
            }
            ConvertInput::Url(url) => write!(f, "{}", url),
        }
    }
}

pub struct Deployer<'a> {
    config: DeployConfig,
    runner: &'a dyn CommandRunner,
    runtime: ContainerRuntime,
}

impl<'a> Deployer<'a> {
    /// Detects the container runtime through `runner`
    pub fn new(config: DeployConfig, runner: &'a dyn CommandRunner) -> Self {
        let runtime = detect_runtime_with(runner);
        debug!("Detected container runtime: {}", runtime);
        Self {
            config,
            runner,
            runtime,
        }
    }

    pub fn with_runtime(
        config: DeployConfig,
        runner: &'a dyn CommandRunner,
        runtime: ContainerRuntime,
    ) -> Self {
        Self {
            config,
            runner,
            runtime,
        }
    }

    pub fn config(&self) -> &DeployConfig {
        &self.config
    }

    pub fn runtime(&self) -> ContainerRuntime {
        self.runtime
    }

    fn require_runtime(&self) -> Result<ContainerRuntime, ContainerError> {
        if self.runtime.is_available() {
            Ok(self.runtime)
        } else {
            Err(ContainerError::NoRuntimeAvailable)
        }
    }

    fn compose(&self) -> Result<ComposeCommand, ContainerError> {
        detect_compose(self.runner, self.require_runtime()?)
    }

    fn compose_globals(&self) -> Vec<String> {
        vec![
            "-f".to_string(),
            self.config.compose_path().display().to_string(),
            "-p".to_string(),
            self.config.project_name.clone(),
        ]
    }

    fn require_compose_file(&self) -> Result<(), ContainerError> {
        let path = self.config.compose_path();
        if !path.exists() {
            return Err(ContainerError::ComposeFileMissing {
                path: path.display().to_string(),
            });
        }
        Ok(())
    }

    fn run_compose(
        &self,
        profiles: &[ComposeProfile],
        subcommand: &[String],
    ) -> Result<(), ContainerError> {
        let compose = self.compose()?;
        let mut globals = self.compose_globals();
        if !profiles.is_empty() && !compose.supports_profiles() {
            warn!(
                "compose {} does not support profiles; optional services will not start",
                compose.version.as_deref().unwrap_or("unknown")
            );
        }
        for profile in profiles {
            globals.push("--profile".to_string());
            globals.push(profile.name().to_string());
        }
        let args = compose.args(&globals, subcommand);
        info!("Running {}", display_command(&compose.program, &args));
        stream_checked(self.runner, &compose.program, &args)
    }

    /// Verify the host has what a deployment needs
    pub fn check(&self) -> DeployResult<CheckReport> {
        println!("Checking requirements...");

        if !self.runtime.is_available() {
            println!("✗ No container runtime found (docker or podman)");
            return Err(ContainerError::NoRuntimeAvailable.into());
        }
        println!("✓ Container runtime: {}", self.runtime);

        let compose = match self.compose() {
            Ok(compose) => {
                println!(
                    "✓ Compose: {} (version {})",
                    display_command(&compose.program, &compose.prefix),
                    compose.version.as_deref().unwrap_or("unknown")
                );
                if !compose.supports_profiles() {
                    println!("⚠ Compose is too old for profiles; `prod` needs compose >= 1.28");
                }
                compose
            }
            Err(e) => {
                println!("✗ {}", e);
                return Err(e.into());
            }
        };

        let gpu = gpu_available(self.runner);
        match (gpu, self.config.variant.is_gpu()) {
            (true, _) => println!("✓ NVIDIA GPU detected"),
            (false, true) => println!(
                "⚠ No NVIDIA GPU detected; the {} image will fall back to CPU",
                self.config.variant
            ),
            (false, false) => println!("- GPU not required for the {} image", self.config.variant),
        }

        Ok(CheckReport {
            runtime: self.runtime,
            compose,
            gpu,
        })
    }

    /// Create directories and write deployment files
    pub fn setup(&self) -> DeployResult<SetupReport> {
        let mut report = SetupReport::default();
        let project = &self.config.project_dir;

        let dirs = [
            self.config.resolve(&self.config.cache_dir),
            self.config.resolve(&self.config.logs_dir),
            project.join("nginx").join("ssl"),
        ];
        for dir in dirs {
            if !dir.exists() {
                std::fs::create_dir_all(&dir)?;
                println!("✓ Created {}", dir.display());
                report.created_dirs.push(dir);
            }
        }

        let compose_path = self.config.compose_path();
        write_if_absent(&compose_path, &render_compose(&self.config), &mut report)?;
        write_if_absent(
            &project.join("nginx").join("nginx.conf"),
            &render_nginx_conf(),
            &mut report,
        )?;

        let containerfile = self.config.resolve(Path::new(&self.config.containerfile_name()));
        if containerfile.exists() {
            report.kept_files.push(containerfile);
        } else {
            ContainerfileSpec::new(self.config.variant)
                .with_threads(self.config.omp_num_threads)
                .write_to(&containerfile)?;
            println!("✓ Wrote {}", containerfile.display());
            report.written_files.push(containerfile);
        }

        // .env always reflects the current configuration
        let env_path = project.join(".env");
        std::fs::write(&env_path, self.config.env_file())?;
        println!("✓ Wrote {}", env_path.display());
        report.written_files.push(env_path);

        Ok(report)
    }

    /// Pull from the first mirror that works, building locally if none does
    pub fn pull(&self) -> DeployResult<PullOutcome> {
        let runtime = self.require_runtime()?;
        let local = self.config.local_image();
        let mirrors = mirror_chain(
            self.config.docker_hub_username.as_deref(),
            self.config.variant,
        );
        let mut attempted = Vec::new();

        for mirror in mirrors {
            let reference = mirror.reference(&self.config.image_tag);
            println!("📥 Pulling {} ({} mirror)", reference, mirror.tier);

            match stream_checked(self.runner, runtime.command(), &to_args(["pull", reference.as_str()])) {
                Ok(()) => {
                    run_checked(
                        self.runner,
                        runtime.command(),
                        &to_args(["tag", reference.as_str(), local.as_str()]),
                    )?;
                    println!("✓ Pulled {} and tagged as {}", reference, local);
                    return Ok(PullOutcome::Pulled { mirror, reference });
                }
                Err(e) => {
                    warn!("Pull from {} failed: {}", reference, e);
                    println!("⚠ Pull from {} mirror failed", mirror.tier);
                    attempted.push(reference);
                }
            }
        }

        println!(
            "⚠ {}; building locally instead",
            ContainerError::PullFailed { attempted }
        );
        let tag = self.build()?;
        Ok(PullOutcome::Built { tag })
    }

    /// Build the image for the configured variant
    pub fn build(&self) -> DeployResult<String> {
        let runtime = self.require_runtime()?;
        let build = self.config.image_build_config();
        build.validate()?;

        if !build.containerfile.exists() {
            ContainerfileSpec::new(self.config.variant)
                .with_threads(self.config.omp_num_threads)
                .write_to(&build.containerfile)?;
            info!("Rendered {}", build.containerfile.display());
        }

        println!(
            "🔨 Building {} ({}={})",
            build.tag,
            image_builder::UV_SYNC_EXTRA_ARGS,
            build.uv_sync_extra_args()
        );
        let args = build.build_command();
        let code = self.runner.stream(runtime.command(), &args)?;
        if code != Some(0) {
            return Err(ContainerError::BuildFailed {
                tag: build.tag,
                code,
            }
            .into());
        }

        println!("✓ Built {}", build.tag);
        Ok(build.tag)
    }

    /// Start the service alone and wait for it
    pub async fn dev(&self, service: &dyn DocumentService) -> DeployResult<u32> {
        self.require_compose_file()?;
        println!("🚀 Starting {} (development)", SERVICE_NAME);
        self.run_compose(&[], &to_args(["up", "-d", SERVICE_NAME]))?;
        self.wait_healthy(service).await
    }

    /// Start the service behind the reverse proxy and wait for it
    pub async fn prod(
        &self,
        service: &dyn DocumentService,
        with_monitoring: bool,
    ) -> DeployResult<u32> {
        self.require_compose_file()?;
        let mut profiles = vec![ComposeProfile::Production];
        if with_monitoring {
            profiles.push(ComposeProfile::Monitoring);
        }
        let names: Vec<&str> = profiles.iter().map(|p| p.name()).collect();
        println!(
            "🚀 Starting {} with profiles: {}",
            SERVICE_NAME,
            names.join(", ")
        );
        self.run_compose(&profiles, &to_args(["up", "-d"]))?;
        self.wait_healthy(service).await
    }

    async fn wait_healthy(&self, service: &dyn DocumentService) -> DeployResult<u32> {
        println!(
            "⏳ Waiting for {} to become healthy...",
            service.base_url()
        );
        let attempt = wait_for_healthy(
            service,
            self.config.health_attempts,
            self.config.health_delay(),
        )
        .await?;
        println!("✓ Service is healthy at {}", service.base_url());
        Ok(attempt)
    }

    /// Container listing plus endpoint checks
    pub async fn status(&self, service: &dyn DocumentService) -> DeployResult<StatusReport> {
        self.require_compose_file()?;
        let compose = self.compose()?;
        let args = compose.args(&self.compose_globals(), &to_args(["ps"]));
        let output = run_checked(self.runner, &compose.program, &args)?;
        println!("{}", output.stdout.trim_end());

        let endpoints = check_endpoints(service).await;
        print_endpoint_table(&endpoints);

        Ok(StatusReport {
            checked_at: Utc::now(),
            containers: output.stdout,
            endpoints,
        })
    }

    /// Check every endpoint; fails unless `/health` answers 2xx
    pub async fn test(&self, service: &dyn DocumentService) -> DeployResult<EndpointReport> {
        println!("Testing endpoints at {}", service.base_url());
        let report = check_endpoints(service).await;
        print_endpoint_table(&report);

        if !report.healthy() {
            return Err(ContainerError::HealthCheckFailed {
                reason: format!("{}/health did not return a success status", service.base_url()),
            }
            .into());
        }

        println!(
            "✓ {}/{} endpoints reachable",
            report.reachable_count(),
            report.statuses.len()
        );
        Ok(report)
    }

    pub fn logs(&self, options: &LogsOptions) -> DeployResult<()> {
        let mut sub = vec!["logs".to_string()];
        if options.follow {
            sub.push("-f".to_string());
        }
        if let Some(tail) = options.tail {
            sub.push("--tail".to_string());
            sub.push(tail.to_string());
        }
        if let Some(service) = &options.service {
            sub.push(service.clone());
        }
        self.run_compose(&[], &sub)?;
        Ok(())
    }

    pub async fn restart(
        &self,
        service_name: Option<&str>,
        service: &dyn DocumentService,
    ) -> DeployResult<u32> {
        let mut sub = vec!["restart".to_string()];
        if let Some(name) = service_name {
            sub.push(name.to_string());
        }
        println!("🔄 Restarting {}", service_name.unwrap_or("all services"));
        self.run_compose(&[], &sub)?;
        self.wait_healthy(service).await
    }

    /// Stop everything and remove volumes
    pub fn cleanup(&self, prune_images: bool) -> DeployResult<()> {
        println!("🧹 Stopping services and removing volumes");
        self.run_compose(
            &[ComposeProfile::Production, ComposeProfile::Monitoring],
            &to_args(["down", "-v", "--remove-orphans"]),
        )?;

        if prune_images {
            let runtime = self.require_runtime()?;
            run_checked(self.runner, runtime.command(), &to_args(["image", "prune", "-f"]))?;
            println!("✓ Pruned dangling images");
        }

        println!("✓ Cleanup complete");
        Ok(())
    }

    /// Convert a document through the running service
    pub async fn convert(
        &self,
        service: &dyn DocumentService,
        input: &ConvertInput,
        output_dir: &Path,
        poll_interval: Duration,
        max_polls: u32,
    ) -> DeployResult<SavedOutputs> {
        println!("📄 Converting {}", input);

        let response = match input {
            ConvertInput::File(path) => {
                let request = ConvertSourceRequest::new(vec![Source::from_path(path)?]);
                convert_and_wait(service, &request, poll_interval, max_polls).await?
            }
            ConvertInput::Url(url) => {
                let request = ConvertSourceRequest::new(vec![Source::parse_url(url)?]);
                convert_and_wait(service, &request, poll_interval, max_polls).await?
            }
            ConvertInput::Upload(path) => {
                let upload = FileUpload::from_path(path)?;
                upload_and_wait(
                    service,
                    &upload,
                    &ConvertOptions::default(),
                    poll_interval,
                    max_polls,
                )
                .await?
            }
        };
        std::fs::create_dir_all(output_dir)?;
        let saved = response.save_outputs(output_dir)?;

        if let Some(path) = &saved.json {
            println!("✓ JSON content saved to {}", path.display());
        }
        match &saved.markdown {
            Some(path) => println!("✓ Markdown content saved to {}", path.display()),
            None => println!("⚠ Markdown content is empty or too short"),
        }
        Ok(saved)
    }
}

fn write_if_absent(path: &Path, content: &str, report: &mut SetupReport) -> DeployResult<()> {
    if path.exists() {
        println!("- Keeping existing {}", path.display());
        report.kept_files.push(path.to_path_buf());
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, content)?;
    println!("✓ Wrote {}", path.display());
    report.written_files.push(path.to_path_buf());
    Ok(())
}

fn print_endpoint_table(report: &EndpointReport) {
    for status in &report.statuses {
        let marker = if status.reachable { "✓" } else { "✗" };
        let detail = match (status.status_code, &status.error) {
            (Some(code), _) => code.to_string(),
            (None, Some(err)) => err.clone(),
            (None, None) => "no response".to_string(),
        };
        println!(
            "  {} {:<22} {} ({} ms)",
            marker,
            status.endpoint.path(),
            detail,
            status.latency.as_millis()
        );
    }
}
