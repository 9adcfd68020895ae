use regex::Regex;
use std::process::{Command, Stdio};
use std::sync::OnceLock;
use thiserror::Error;
use tracing::debug;

/// Container runtime types supported
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerRuntime {
    /// Docker container runtime
    Docker,
    /// Podman container runtime
    Podman,
    /// No container runtime available
    None,
}

impl ContainerRuntime {
    /// Get the command name for this runtime
    pub fn command(&self) -> &'static str {
        match self {
            ContainerRuntime::Docker => "docker",
            ContainerRuntime::Podman => "podman",
            ContainerRuntime::None => "",
        }
    }

    /// Check if this runtime is available
    pub fn is_available(&self) -> bool {
        matches!(self, ContainerRuntime::Podman | ContainerRuntime::Docker)
    }
}

impl std::fmt::Display for ContainerRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContainerRuntime::None => write!(f, "none"),
            other => write!(f, "{}", other.command()),
        }
    }
}

/// Container operation errors
#[derive(Error, Debug)]
pub enum ContainerError {
    /// No container runtime is available
    #[error("No container runtime available. Please install Docker (or Podman) to deploy docling-serve.")]
    NoRuntimeAvailable,

    /// Neither the compose plugin nor docker-compose was found
    #[error("No compose implementation found. Install the docker compose plugin or docker-compose.")]
    NoComposeAvailable,

    /// Pull failed on every mirror
    #[error("Failed to pull image from any mirror: {}", attempted.join(", "))]
    PullFailed { attempted: Vec<String> },

    /// Image build failed
    #[error("Failed to build image '{tag}' (exit code {code:?})")]
    BuildFailed { tag: String, code: Option<i32> },

    /// Health check failed
    #[error("Service health check failed: {reason}. Check the logs with `docling-deploy logs`.")]
    HealthCheckFailed { reason: String },

    /// Command exited non-zero
    #[error("Command failed ({code:?}): {command}{}", if stderr.is_empty() { String::new() } else { format!(": {}", stderr.trim()) })]
    CommandFailed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    /// Compose file missing
    #[error("Compose file '{path}' not found. Run `docling-deploy setup` first.")]
    ComposeFileMissing { path: String },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type ContainerResult<T> = Result<T, ContainerError>;

/// Captured result of a finished command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Executes external programs. Every docker, compose and tool-detection invocation goes
/// through this so the exact argv can be asserted on.
pub trait CommandRunner: Send + Sync {
    /// Run to completion capturing stdout and stderr
    fn output(&self, program: &str, args: &[String]) -> std::io::Result<CommandOutput>;

    /// Run with inherited stdio, returning the exit code
    fn stream(&self, program: &str, args: &[String]) -> std::io::Result<Option<i32>>;
}

/// Runs commands on the host
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn output(&self, program: &str, args: &[String]) -> std::io::Result<CommandOutput> {
        debug!("exec: {} {}", program, args.join(" "));
        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .output()?;
        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }

    fn stream(&self, program: &str, args: &[String]) -> std::io::Result<Option<i32>> {
        debug!("exec (streaming): {} {}", program, args.join(" "));
        let status = Command::new(program).args(args).status()?;
        Ok(status.code())
    }
}

/// Render a command line for messages
pub fn display_command(program: &str, args: &[String]) -> String {
    if args.is_empty() {
        program.to_string()
    } else {
        format!("{} {}", program, args.join(" "))
    }
}

pub(crate) fn to_args<I, S>(args: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    args.into_iter().map(Into::into).collect()
}

/// Run and require a zero exit code
pub fn run_checked(
    runner: &dyn CommandRunner,
    program: &str,
    args: &[String],
) -> ContainerResult<CommandOutput> {
    let output = runner.output(program, args)?;
    if !output.success() {
        return Err(ContainerError::CommandFailed {
            command: display_command(program, args),
            code: output.code,
            stderr: output.stderr,
        });
    }
    Ok(output)
}

/// Stream and require a zero exit code
pub fn stream_checked(
    runner: &dyn CommandRunner,
    program: &str,
    args: &[String],
) -> ContainerResult<()> {
    let code = runner.stream(program, args)?;
    if code != Some(0) {
        return Err(ContainerError::CommandFailed {
            command: display_command(program, args),
            code,
            stderr: String::new(),
        });
    }
    Ok(())
}

fn runs_ok(runner: &dyn CommandRunner, program: &str, args: &[&str]) -> bool {
    runner
        .output(program, &to_args(args.iter().copied()))
        .is_ok_and(|output| output.success())
}

/// Detect available container runtime in order of preference
pub fn detect_runtime_with(runner: &dyn CommandRunner) -> ContainerRuntime {
    // Docker first: compose profiles and GPU reservations are docker features
    if runs_ok(runner, "docker", &["--version"]) {
        return ContainerRuntime::Docker;
    }

    if runs_ok(runner, "podman", &["--version"]) {
        return ContainerRuntime::Podman;
    }

    ContainerRuntime::None
}

pub fn detect_runtime() -> ContainerRuntime {
    detect_runtime_with(&SystemRunner)
}

/// How compose is invoked: `docker compose ...` or `docker-compose ...`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposeCommand {
    pub program: String,
    pub prefix: Vec<String>,
    pub version: Option<String>,
}

impl ComposeCommand {
    pub fn plugin(runtime: ContainerRuntime) -> Self {
        Self {
            program: runtime.command().to_string(),
            prefix: vec!["compose".to_string()],
            version: None,
        }
    }

    pub fn standalone(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            prefix: Vec::new(),
            version: None,
        }
    }

    fn with_version(mut self, output: &str) -> Self {
        self.version = parse_version(output);
        self
    }

    /// Full argument list for a compose subcommand
    pub fn args(&self, global: &[String], subcommand: &[String]) -> Vec<String> {
        let mut args = self.prefix.clone();
        args.extend(global.iter().cloned());
        args.extend(subcommand.iter().cloned());
        args
    }

    /// Whether the detected version understands `--profile` (compose >= 1.28)
    pub fn supports_profiles(&self) -> bool {
        match self.version.as_deref().and_then(parse_semver) {
            Some((major, minor, _)) => major > 1 || (major == 1 && minor >= 28),
            None => true,
        }
    }
}

fn version_regex() -> &'static Regex {
    static VERSION: OnceLock<Regex> = OnceLock::new();
    VERSION.get_or_init(|| {
        Regex::new(r"v?(\d+)\.(\d+)\.(\d+)").expect("version regex is valid")
    })
}

/// Extract `x.y.z` from tool version output
pub fn parse_version(output: &str) -> Option<String> {
    version_regex().captures(output).map(|caps| {
        format!("{}.{}.{}", &caps[1], &caps[2], &caps[3])
    })
}

fn parse_semver(version: &str) -> Option<(u32, u32, u32)> {
    let caps = version_regex().captures(version)?;
    Some((
        caps[1].parse().ok()?,
        caps[2].parse().ok()?,
        caps[3].parse().ok()?,
    ))
}

/// Find a compose implementation for `runtime`
pub fn detect_compose(
    runner: &dyn CommandRunner,
    runtime: ContainerRuntime,
) -> ContainerResult<ComposeCommand> {
    if !runtime.is_available() {
        return Err(ContainerError::NoRuntimeAvailable);
    }

    let plugin = ComposeCommand::plugin(runtime);
    let plugin_version = runner.output(
        &plugin.program,
        &plugin.args(&[], &to_args(["version"])),
    );
    if let Ok(output) = plugin_version {
        if output.success() {
            return Ok(plugin.with_version(&output.stdout));
        }
    }

    let standalone_name = match runtime {
        ContainerRuntime::Podman => "podman-compose",
        _ => "docker-compose",
    };
    let standalone = ComposeCommand::standalone(standalone_name);
    match runner.output(&standalone.program, &to_args(["version"])) {
        Ok(output) if output.success() => Ok(standalone.with_version(&output.stdout)),
        _ => Err(ContainerError::NoComposeAvailable),
    }
}

/// Whether an image is present locally
pub fn image_exists(
    runner: &dyn CommandRunner,
    runtime: ContainerRuntime,
    image: &str,
) -> ContainerResult<bool> {
    if !runtime.is_available() {
        return Err(ContainerError::NoRuntimeAvailable);
    }

    let output = runner.output(runtime.command(), &to_args(["image", "inspect", image]))?;
    Ok(output.success())
}

/// Whether an NVIDIA GPU is visible on the host
pub fn gpu_available(runner: &dyn CommandRunner) -> bool {
    runs_ok(runner, "nvidia-smi", &["-L"])
}
