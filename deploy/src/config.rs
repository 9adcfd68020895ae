//! Deployment configuration.
//!
//! Values come from an optional `docling-deploy.toml` and are then overridden
//! by environment variables, matching what the compose file and image expect.

use image_builder::{ImageBuildConfig, ImageVariant, SERVICE_PORT};
use serde::{Deserialize, Serialize};
use serve_client::ServeConfig;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_CONFIG_FILE: &str = "docling-deploy.toml";

/// Container-side path the image downloads models into
pub const CONTAINER_ARTIFACTS_PATH: &str = "/opt/app-root/src/.cache/docling/models";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file '{path}': {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeployConfig {
    /// Docker Hub namespace used as the primary mirror
    pub docker_hub_username: Option<String>,
    pub variant: ImageVariant,
    /// Host port published for the service
    pub port: u16,
    pub image_tag: String,
    pub project_dir: PathBuf,
    pub project_name: String,
    pub compose_file: PathBuf,
    /// Host directory mounted as the Hugging Face cache
    pub cache_dir: PathBuf,
    pub logs_dir: PathBuf,
    /// Model artifacts path inside the container
    pub artifacts_path: String,
    pub omp_num_threads: u32,
    pub mkl_num_threads: u32,
    pub health_attempts: u32,
    pub health_delay_secs: u64,
    pub api_key: Option<String>,
    pub enable_ui: bool,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            docker_hub_username: None,
            variant: ImageVariant::Gpu,
            port: SERVICE_PORT,
            image_tag: "latest".to_string(),
            project_dir: PathBuf::from("."),
            project_name: "docling".to_string(),
            compose_file: PathBuf::from("docker-compose.yml"),
            cache_dir: PathBuf::from("cache/huggingface"),
            logs_dir: PathBuf::from("logs"),
            artifacts_path: CONTAINER_ARTIFACTS_PATH.to_string(),
            omp_num_threads: 4,
            mkl_num_threads: 4,
            health_attempts: 30,
            health_delay_secs: 5,
            api_key: None,
            enable_ui: true,
        }
    }
}

fn parse_env<T: std::str::FromStr>(
    field: &'static str,
    value: &str,
) -> ConfigResult<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| ConfigError::InvalidValue {
            field,
            reason: format!("'{}': {}", value, e),
        })
}

/// Quote a `.env` value so compose reads it literally.
///
/// Values containing a single quote fall back to escaped double quotes.
fn env_quote(value: &str) -> String {
    if !value.contains('\'') {
        return format!("'{}'", value);
    }
    let escaped = value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('$', "$$");
    format!("\"{}\"", escaped)
}

impl DeployConfig {
    /// Load from `path` (if it exists) and the process environment
    pub fn load(path: Option<&Path>) -> ConfigResult<Self> {
        Self::load_with(path, |key| std::env::var(key).ok())
    }

    pub fn load_with<F>(path: Option<&Path>, lookup: F) -> ConfigResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let default_path = PathBuf::from(DEFAULT_CONFIG_FILE);
        let (path, required) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (default_path, false),
        };

        let base = if path.exists() {
            Self::from_file(&path)?
        } else if required {
            return Err(ConfigError::ReadFile {
                path: path.display().to_string(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "file not found"),
            });
        } else {
            Self::default()
        };

        let config = base.apply_env(lookup)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
            path: path.display().to_string(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Override fields from environment variables
    pub fn apply_env<F>(mut self, lookup: F) -> ConfigResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(user) = get("DOCKER_HUB_USERNAME") {
            self.docker_hub_username = Some(user.trim().to_string());
        }
        if let Some(variant) = get("DOCLING_VARIANT") {
            self.variant = variant.parse().map_err(|e: image_builder::ImageBuilderError| {
                ConfigError::InvalidValue {
                    field: "DOCLING_VARIANT",
                    reason: e.to_string(),
                }
            })?;
        }
        if let Some(port) = get("DOCLING_PORT") {
            self.port = parse_env("DOCLING_PORT", &port)?;
        }
        if let Some(tag) = get("DOCLING_IMAGE_TAG") {
            self.image_tag = tag;
        }
        if let Some(file) = get("COMPOSE_FILE") {
            self.compose_file = PathBuf::from(file);
        }
        if let Some(name) = get("COMPOSE_PROJECT_NAME") {
            self.project_name = name;
        }
        if let Some(dir) = get("HF_HOME") {
            self.cache_dir = PathBuf::from(dir);
        }
        if let Some(path) = get("DOCLING_SERVE_ARTIFACTS_PATH") {
            self.artifacts_path = path;
        }
        if let Some(threads) = get("OMP_NUM_THREADS") {
            self.omp_num_threads = parse_env("OMP_NUM_THREADS", &threads)?;
        }
        if let Some(threads) = get("MKL_NUM_THREADS") {
            self.mkl_num_threads = parse_env("MKL_NUM_THREADS", &threads)?;
        }
        if let Some(attempts) = get("DOCLING_HEALTH_ATTEMPTS") {
            self.health_attempts = parse_env("DOCLING_HEALTH_ATTEMPTS", &attempts)?;
        }
        if let Some(delay) = get("DOCLING_HEALTH_DELAY") {
            self.health_delay_secs = parse_env("DOCLING_HEALTH_DELAY", &delay)?;
        }
        if let Some(key) = get("DOCLING_SERVE_API_KEY") {
            self.api_key = Some(key);
        }
        if let Some(ui) = get("DOCLING_SERVE_ENABLE_UI") {
            self.enable_ui = parse_env("DOCLING_SERVE_ENABLE_UI", &ui.to_ascii_lowercase())?;
        }

        Ok(self)
    }

    pub fn with_variant(mut self, variant: ImageVariant) -> Self {
        self.variant = variant;
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_project_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.project_dir = dir.into();
        self
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.port == 0 {
            return Err(ConfigError::InvalidValue {
                field: "port",
                reason: "must be greater than 0".to_string(),
            });
        }
        if self.omp_num_threads == 0 || self.mkl_num_threads == 0 {
            return Err(ConfigError::InvalidValue {
                field: "threads",
                reason: "thread counts must be at least 1".to_string(),
            });
        }
        if self.health_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "health_attempts",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.project_name.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "project_name",
                reason: "cannot be empty".to_string(),
            });
        }
        Ok(())
    }

    /// Resolve a path relative to the project directory
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.project_dir.join(path)
        }
    }

    pub fn compose_path(&self) -> PathBuf {
        self.resolve(&self.compose_file)
    }

    pub fn containerfile_name(&self) -> String {
        format!("Containerfile.{}", self.variant)
    }

    /// Local tag the compose file runs
    pub fn local_image(&self) -> String {
        format!(
            "docling-serve{}:{}",
            self.variant.image_suffix(),
            self.image_tag
        )
    }

    pub fn image_build_config(&self) -> ImageBuildConfig {
        ImageBuildConfig::new(self.variant)
            .with_tag(self.local_image())
            .with_context_dir(self.project_dir.clone())
            .with_containerfile(self.resolve(Path::new(&self.containerfile_name())))
    }

    pub fn health_delay(&self) -> Duration {
        Duration::from_secs(self.health_delay_secs)
    }

    pub fn serve_config(&self) -> ServeConfig {
        let config = ServeConfig::for_port(self.port);
        match &self.api_key {
            Some(key) => config.with_api_key(key.clone()),
            None => config,
        }
    }

    /// Contents of the `.env` file compose reads
    pub fn env_file(&self) -> String {
        let mut entries = vec![
            ("COMPOSE_PROJECT_NAME", self.project_name.clone()),
            ("DOCLING_VARIANT", self.variant.to_string()),
            ("DOCLING_PORT", self.port.to_string()),
            ("DOCLING_IMAGE", self.local_image()),
            ("DOCLING_SERVE_ARTIFACTS_PATH", self.artifacts_path.clone()),
            ("DOCLING_SERVE_ENABLE_UI", self.enable_ui.to_string()),
            ("OMP_NUM_THREADS", self.omp_num_threads.to_string()),
            ("MKL_NUM_THREADS", self.mkl_num_threads.to_string()),
        ];
        if let Some(user) = &self.docker_hub_username {
            entries.push(("DOCKER_HUB_USERNAME", user.clone()));
        }
        if let Some(key) = &self.api_key {
            entries.push(("DOCLING_SERVE_API_KEY", key.clone()));
        }

        entries
            .into_iter()
            .map(|(key, value)| format!("{}={}\n", key, env_quote(&value)))
            .collect()
    }
}
