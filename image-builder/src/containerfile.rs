//! Containerfile rendering for the CPU and GPU images.
//!
//! Both variants share one layout: OS packages, the `uv` dependency manager,
//! a frozen `uv sync` driven by `UV_SYNC_EXTRA_ARGS`, a model download layer
//! and finally the application code. The GPU variant only differs in the
//! NVIDIA runtime environment it declares.

use crate::{ImageBuilderResult, ImageVariant, SERVICE_PORT, UV_SYNC_EXTRA_ARGS};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

const DEFAULT_BASE_IMAGE: &str = "quay.io/sclorg/python-312-c9s:c9s";
const UV_IMAGE: &str = "ghcr.io/astral-sh/uv:0.7.19";
const APP_ROOT: &str = "/opt/app-root/src";
const ARTIFACTS_PATH: &str = "/opt/app-root/src/.cache/docling/models";
const HF_HOME: &str = "/opt/app-root/src/.cache/huggingface";

/// Models fetched into the image at build time
pub const DEFAULT_MODELS: &[&str] = &["layout", "tableformer", "picture_classifier", "easyocr"];

/// OS packages required by the OCR and rendering backends
pub const OS_PACKAGES: &[&str] = &[
    "tesseract",
    "tesseract-devel",
    "tesseract-langpack-eng",
    "tesseract-osd",
    "leptonica-devel",
    "libglvnd-glx",
    "glib2",
    "wget",
    "git",
];

/// A single Containerfile instruction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Instruction {
    Arg { name: String, default: Option<String> },
    From(String),
    User(String),
    Workdir(String),
    Env(Vec<(String, String)>),
    Run(Vec<String>),
    Copy { from: Option<String>, chown: Option<String>, src: String, dest: String },
    Expose(u16),
    Cmd(Vec<String>),
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::Arg { name, default } => match default {
                Some(value) => write!(f, "ARG {}=\"{}\"", name, value),
                None => write!(f, "ARG {}", name),
            },
            Instruction::From(image) => write!(f, "FROM {}", image),
            Instruction::User(user) => write!(f, "USER {}", user),
            Instruction::Workdir(dir) => write!(f, "WORKDIR {}", dir),
            Instruction::Env(vars) => {
                write!(f, "ENV")?;
                for (i, (key, value)) in vars.iter().enumerate() {
                    if i == 0 {
                        write!(f, " {}={}", key, value)?;
                    } else {
                        write!(f, " \\\n    {}={}", key, value)?;
                    }
                }
                Ok(())
            }
            Instruction::Run(steps) => write!(f, "RUN {}", steps.join(" && \\\n    ")),
            Instruction::Copy {
                from,
                chown,
                src,
                dest,
            } => {
                write!(f, "COPY")?;
                if let Some(from) = from {
                    write!(f, " --from={}", from)?;
                }
                if let Some(chown) = chown {
                    write!(f, " --chown={}", chown)?;
                }
                write!(f, " {} {}", src, dest)
            }
            Instruction::Expose(port) => write!(f, "EXPOSE {}", port),
            Instruction::Cmd(argv) => {
                let quoted: Vec<String> = argv.iter().map(|a| format!("\"{}\"", a)).collect();
                write!(f, "CMD [{}]", quoted.join(", "))
            }
        }
    }
}

/// Declarative description of one image variant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerfileSpec {
    pub variant: ImageVariant,
    pub base_image: String,
    pub os_packages: Vec<String>,
    pub models: Vec<String>,
    pub threads: u32,
}

impl ContainerfileSpec {
    pub fn new(variant: ImageVariant) -> Self {
        Self {
            variant,
            base_image: DEFAULT_BASE_IMAGE.to_string(),
            os_packages: OS_PACKAGES.iter().map(|p| p.to_string()).collect(),
            models: DEFAULT_MODELS.iter().map(|m| m.to_string()).collect(),
            threads: 4,
        }
    }

    pub fn with_base_image(mut self, image: impl Into<String>) -> Self {
        self.base_image = image.into();
        self
    }

    pub fn with_models<I, S>(mut self, models: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.models = models.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_threads(mut self, threads: u32) -> Self {
        self.threads = threads;
        self
    }

    fn environment(&self) -> Vec<(String, String)> {
        let mut env = vec![
            ("OMP_NUM_THREADS".to_string(), self.threads.to_string()),
            ("MKL_NUM_THREADS".to_string(), self.threads.to_string()),
            ("LANG".to_string(), "en_US.UTF-8".to_string()),
            ("LC_ALL".to_string(), "en_US.UTF-8".to_string()),
            ("PYTHONIOENCODING".to_string(), "utf-8".to_string()),
            ("UV_COMPILE_BYTECODE".to_string(), "1".to_string()),
            ("UV_LINK_MODE".to_string(), "copy".to_string()),
            (
                "UV_PROJECT_ENVIRONMENT".to_string(),
                "/opt/app-root".to_string(),
            ),
            ("HF_HOME".to_string(), HF_HOME.to_string()),
            (
                "DOCLING_SERVE_ARTIFACTS_PATH".to_string(),
                ARTIFACTS_PATH.to_string(),
            ),
        ];
        if self.variant.is_gpu() {
            env.push(("NVIDIA_VISIBLE_DEVICES".to_string(), "all".to_string()));
            env.push((
                "NVIDIA_DRIVER_CAPABILITIES".to_string(),
                "compute,utility".to_string(),
            ));
        }
        env
    }

    /// Ordered instruction list for this variant
    pub fn instructions(&self) -> Vec<Instruction> {
        vec![
            Instruction::Arg {
                name: "BASE_IMAGE".to_string(),
                default: Some(self.base_image.clone()),
            },
            Instruction::From("${BASE_IMAGE}".to_string()),
            Instruction::User("0".to_string()),
            Instruction::Run(vec![
                "dnf -y install --best --nodocs --setopt=install_weak_deps=False dnf-plugins-core"
                    .to_string(),
                "dnf config-manager --enable crb".to_string(),
                "dnf -y update".to_string(),
                format!("dnf install -y {}", self.os_packages.join(" ")),
                "dnf -y clean all".to_string(),
                "rm -rf /var/cache/dnf".to_string(),
            ]),
            Instruction::Env(vec![(
                "TESSDATA_PREFIX".to_string(),
                "/usr/share/tesseract/tessdata/".to_string(),
            )]),
            Instruction::Copy {
                from: Some(UV_IMAGE.to_string()),
                chown: None,
                src: "/uv /uvx".to_string(),
                dest: "/bin/".to_string(),
            },
            Instruction::User("1001".to_string()),
            Instruction::Workdir(APP_ROOT.to_string()),
            Instruction::Env(self.environment()),
            Instruction::Arg {
                name: UV_SYNC_EXTRA_ARGS.to_string(),
                default: Some(String::new()),
            },
            Instruction::Copy {
                from: None,
                chown: Some("1001:0".to_string()),
                src: "pyproject.toml uv.lock".to_string(),
                dest: "./".to_string(),
            },
            Instruction::Run(vec![
                "umask 002".to_string(),
                format!(
                    "uv sync --frozen --no-install-project --no-dev --all-extras ${{{}}} --no-extra flash-attn",
                    UV_SYNC_EXTRA_ARGS
                ),
            ]),
            Instruction::Arg {
                name: "MODELS_LIST".to_string(),
                default: Some(self.models.join(" ")),
            },
            Instruction::Run(vec![
                "echo \"Downloading models...\"".to_string(),
                "HF_HUB_DOWNLOAD_TIMEOUT=\"90\" HF_HUB_ETAG_TIMEOUT=\"90\" docling-tools models download -o \"${DOCLING_SERVE_ARTIFACTS_PATH}\" ${MODELS_LIST}".to_string(),
                "chown -R 1001:0 /opt/app-root/src/.cache".to_string(),
                "chmod -R g=u /opt/app-root/src/.cache".to_string(),
            ]),
            Instruction::Copy {
                from: None,
                chown: Some("1001:0".to_string()),
                src: "./docling_serve".to_string(),
                dest: "./docling_serve".to_string(),
            },
            Instruction::Run(vec![format!(
                "uv sync --frozen --no-dev --all-extras ${{{}}} --no-extra flash-attn",
                UV_SYNC_EXTRA_ARGS
            )]),
            Instruction::Expose(SERVICE_PORT),
            Instruction::Cmd(vec!["docling-serve".to_string(), "run".to_string()]),
        ]
    }

    /// Render the Containerfile text
    pub fn render(&self) -> String {
        let mut out = format!(
            "# docling-serve image ({} variant, uv group {})\n",
            self.variant,
            self.variant.dependency_group()
        );
        for instruction in self.instructions() {
            out.push_str(&instruction.to_string());
            out.push('\n');
        }
        out
    }

    pub fn write_to(&self, path: &Path) -> ImageBuilderResult<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, self.render())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gpu_declares_nvidia_env() {
        let rendered = ContainerfileSpec::new(ImageVariant::Gpu).render();
        assert!(rendered.contains("NVIDIA_VISIBLE_DEVICES=all"));
        assert!(rendered.contains("NVIDIA_DRIVER_CAPABILITIES=compute,utility"));
    }

    #[test]
    fn test_cpu_has_no_nvidia_env() {
        let rendered = ContainerfileSpec::new(ImageVariant::Cpu).render();
        assert!(!rendered.contains("NVIDIA_VISIBLE_DEVICES"));
        assert!(rendered.contains("uv group cpu"));
    }

    #[test]
    fn test_render_structure() {
        let rendered = ContainerfileSpec::new(ImageVariant::Gpu).render();
        assert!(rendered.contains("ARG UV_SYNC_EXTRA_ARGS=\"\""));
        assert!(rendered.contains("${UV_SYNC_EXTRA_ARGS}"));
        assert!(rendered.contains("docling-tools models download"));
        assert!(rendered.contains("EXPOSE 5001"));
        assert!(rendered.trim_end().ends_with("CMD [\"docling-serve\", \"run\"]"));

        let sync = rendered.find("uv sync --frozen --no-install-project").unwrap();
        let models = rendered.find("docling-tools models download").unwrap();
        let code = rendered.find("COPY --chown=1001:0 ./docling_serve").unwrap();
        assert!(sync < models && models < code);
    }

    #[test]
    fn test_custom_models_and_threads() {
        let rendered = ContainerfileSpec::new(ImageVariant::Cpu)
            .with_models(["layout", "tableformer"])
            .with_threads(8)
            .render();
        assert!(rendered.contains("ARG MODELS_LIST=\"layout tableformer\""));
        assert!(rendered.contains("OMP_NUM_THREADS=8"));
        assert!(rendered.contains("MKL_NUM_THREADS=8"));
    }

    #[test]
    fn test_instruction_display() {
        let copy = Instruction::Copy {
            from: Some("img".to_string()),
            chown: None,
            src: "a".to_string(),
            dest: "b".to_string(),
        };
        assert_eq!(copy.to_string(), "COPY --from=img a b");
        assert_eq!(
            Instruction::Arg {
                name: "X".to_string(),
                default: None
            }
            .to_string(),
            "ARG X"
        );
    }

    #[test]
    fn test_write_to() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("build").join("Containerfile.gpu");
        ContainerfileSpec::new(ImageVariant::Gpu)
            .write_to(&path)
            .unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("# docling-serve image (gpu variant, uv group cu128)"));
    }
}
