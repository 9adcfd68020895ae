pub mod commands;
pub mod compose;
pub mod config;
pub mod container;
pub mod health;

pub use commands::{
    CheckReport, ConvertInput, DeployError, DeployResult, Deployer, LogsOptions, PullOutcome,
    SetupReport, StatusReport,
};
pub use compose::{render_compose, render_nginx_conf, ComposeProfile, SERVICE_NAME};
pub use config::{ConfigError, DeployConfig};
pub use container::{
    detect_compose, detect_runtime, detect_runtime_with, CommandOutput, CommandRunner,
    ComposeCommand, ContainerError, ContainerRuntime, SystemRunner,
};
pub use health::wait_for_healthy;
