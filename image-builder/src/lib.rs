//! Container image definitions for docling-serve
//!
//! This crate describes the CPU and GPU image variants, the build arguments
//! each one passes to the container build, and the registries the prebuilt
//! images are mirrored to.

pub mod containerfile;
pub mod registry;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

pub use containerfile::ContainerfileSpec;
pub use registry::{mirror_chain, RegistryMirror, RegistryTier};

/// Build argument consumed by the `uv sync` step of the image definition
pub const UV_SYNC_EXTRA_ARGS: &str = "UV_SYNC_EXTRA_ARGS";

/// Port the service listens on inside the container
pub const SERVICE_PORT: u16 = 5001;

/// Errors related to image definitions
#[derive(Error, Debug)]
pub enum ImageBuilderError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Unknown image variant '{0}', expected 'cpu' or 'gpu'")]
    UnknownVariant(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type ImageBuilderResult<T> = Result<T, ImageBuilderError>;

/// Hardware target of an image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageVariant {
    /// CPU-only torch wheels
    Cpu,
    /// CUDA 12.8 torch wheels
    Gpu,
}

impl ImageVariant {
    /// Dependency group selected with `uv sync --group`
    pub fn dependency_group(&self) -> &'static str {
        match self {
            ImageVariant::Cpu => "cpu",
            ImageVariant::Gpu => "cu128",
        }
    }

    /// Suffix appended to published image names
    pub fn image_suffix(&self) -> &'static str {
        match self {
            ImageVariant::Cpu => "-cpu",
            ImageVariant::Gpu => "-cu128",
        }
    }

    pub fn is_gpu(&self) -> bool {
        matches!(self, ImageVariant::Gpu)
    }
}

impl std::fmt::Display for ImageVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImageVariant::Cpu => write!(f, "cpu"),
            ImageVariant::Gpu => write!(f, "gpu"),
        }
    }
}

impl FromStr for ImageVariant {
    type Err = ImageBuilderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cpu" => Ok(ImageVariant::Cpu),
            "gpu" | "cuda" | "cu128" => Ok(ImageVariant::Gpu),
            other => Err(ImageBuilderError::UnknownVariant(other.to_string())),
        }
    }
}

/// Configuration for building a docling-serve image
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageBuildConfig {
    /// Hardware target
    pub variant: ImageVariant,
    /// Build context directory
    pub context_dir: PathBuf,
    /// Containerfile path, relative to the working directory
    pub containerfile: PathBuf,
    /// Tag for the resulting image
    pub tag: String,
    /// Optional extras passed as `--extra <name>`
    pub extras: Vec<String>,
    /// Build arguments appended after `UV_SYNC_EXTRA_ARGS`
    pub extra_build_args: Vec<(String, String)>,
}

impl ImageBuildConfig {
    pub fn new(variant: ImageVariant) -> Self {
        Self {
            variant,
            context_dir: PathBuf::from("."),
            containerfile: PathBuf::from(format!("Containerfile.{}", variant)),
            tag: format!("docling-serve{}:latest", variant.image_suffix()),
            extras: vec!["ui".to_string(), "easyocr".to_string()],
            extra_build_args: Vec::new(),
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = tag.into();
        self
    }

    pub fn with_context_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.context_dir = dir.into();
        self
    }

    pub fn with_containerfile(mut self, path: impl Into<PathBuf>) -> Self {
        self.containerfile = path.into();
        self
    }

    pub fn with_extras<I, S>(mut self, extras: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extras = extras.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_build_arg(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_build_args.push((key.into(), value.into()));
        self
    }

    /// Value of `UV_SYNC_EXTRA_ARGS`, e.g. `--group cu128 --extra ui --extra easyocr`
    pub fn uv_sync_extra_args(&self) -> String {
        let mut parts = vec![
            "--group".to_string(),
            self.variant.dependency_group().to_string(),
        ];
        for extra in &self.extras {
            parts.push("--extra".to_string());
            parts.push(extra.clone());
        }
        parts.join(" ")
    }

    pub fn build_args(&self) -> Vec<(String, String)> {
        let mut args = vec![(UV_SYNC_EXTRA_ARGS.to_string(), self.uv_sync_extra_args())];
        args.extend(self.extra_build_args.iter().cloned());
        args
    }

    /// Arguments for `<runtime> build ...`, without the program name
    pub fn build_command(&self) -> Vec<String> {
        let mut cmd = vec![
            "build".to_string(),
            "-f".to_string(),
            self.containerfile.display().to_string(),
            "-t".to_string(),
            self.tag.clone(),
        ];
        for (key, value) in self.build_args() {
            cmd.push("--build-arg".to_string());
            cmd.push(format!("{}={}", key, value));
        }
        cmd.push(self.context_dir.display().to_string());
        cmd
    }

    pub fn validate(&self) -> ImageBuilderResult<()> {
        if self.tag.trim().is_empty() {
            return Err(ImageBuilderError::InvalidConfig(
                "Image tag cannot be empty".to_string(),
            ));
        }

        if let Some(extra) = self
            .extras
            .iter()
            .find(|e| e.is_empty() || e.chars().any(char::is_whitespace))
        {
            return Err(ImageBuilderError::InvalidConfig(format!(
                "Invalid extra name '{}'",
                extra
            )));
        }

        if self
            .extra_build_args
            .iter()
            .any(|(key, _)| key == UV_SYNC_EXTRA_ARGS)
        {
            return Err(ImageBuilderError::InvalidConfig(format!(
                "{} is derived from the variant and extras",
                UV_SYNC_EXTRA_ARGS
            )));
        }

        Ok(())
    }
}

impl Default for ImageBuildConfig {
    fn default() -> Self {
        Self::new(ImageVariant::Gpu)
    }
}
