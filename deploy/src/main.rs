use clap::{Parser, Subcommand, ValueEnum};
use deploy::{ConvertInput, DeployConfig, Deployer, LogsOptions, PullOutcome, SystemRunner};
use image_builder::{ContainerfileSpec, ImageVariant};
use serve_client::DoclingClient;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "docling-deploy")]
#[command(about = "Build, run and check docling-serve deployments")]
#[command(after_help = "\
QUICK START:
  docling-deploy check       # Verify docker, compose and GPU
  docling-deploy setup       # Create directories and compose files
  docling-deploy pull        # Pull the image (builds if no mirror answers)
  docling-deploy dev         # Start and wait for /health
  docling-deploy test        # Check /health, /ui, /docs and the convert routes")]
struct Cli {
    /// Config file (defaults to ./docling-deploy.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Image variant, overrides DOCLING_VARIANT
    #[arg(long, global = true)]
    variant: Option<Variant>,

    /// Host port, overrides DOCLING_PORT
    #[arg(long, global = true)]
    port: Option<u16>,

    /// Project directory holding the compose file
    #[arg(long, global = true)]
    project_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Variant {
    Cpu,
    Gpu,
}

impl From<Variant> for ImageVariant {
    fn from(v: Variant) -> Self {
        match v {
            Variant::Cpu => ImageVariant::Cpu,
            Variant::Gpu => ImageVariant::Gpu,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum RenderTarget {
    Containerfile,
    Compose,
    Nginx,
}

#[derive(Subcommand)]
enum Commands {
    /// Check container runtime, compose and GPU requirements
    Check,
    /// Create directories, compose file, nginx config and .env
    Setup,
    /// Pull the prebuilt image from the mirrors, building on failure
    Pull,
    /// Build the image locally
    Build,
    /// Start the service for development
    Dev,
    /// Start the service behind the nginx reverse proxy
    Prod {
        /// Also start prometheus and grafana
        #[arg(long)]
        monitoring: bool,
    },
    /// Show containers and endpoint status
    Status,
    /// Check the service endpoints
    Test,
    /// Show service logs
    Logs {
        /// Service to show (all services when omitted)
        service: Option<String>,
        /// Number of lines from the end
        #[arg(long, default_value = "100")]
        tail: u32,
        /// Follow the log output
        #[arg(short, long)]
        follow: bool,
    },
    /// Restart services and wait for health
    Restart {
        /// Service to restart (all services when omitted)
        service: Option<String>,
    },
    /// Stop services and remove volumes
    Cleanup {
        /// Also prune dangling images
        #[arg(long)]
        prune: bool,
    },
    /// Print a generated deployment file
    Render {
        #[arg(value_enum)]
        target: RenderTarget,
        /// Write to this path instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Convert a document through the running service
    Convert {
        /// File to convert
        #[arg(required_unless_present = "url", conflicts_with = "url")]
        file: Option<PathBuf>,
        /// Convert a remote document instead of a local file
        #[arg(long)]
        url: Option<String>,
        /// Send the file as a multipart upload instead of inline base64
        #[arg(long, requires = "file")]
        upload: bool,
        /// Directory for output.md and output.json
        #[arg(short, long, default_value = ".")]
        output_dir: PathBuf,
        /// Seconds between status polls
        #[arg(long, default_value = "5")]
        poll_interval: u64,
        /// Give up after this many polls
        #[arg(long, default_value = "720")]
        max_polls: u32,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let mut config = DeployConfig::load(cli.config.as_deref())?;
    if let Some(variant) = cli.variant {
        config = config.with_variant(variant.into());
    }
    if let Some(port) = cli.port {
        config = config.with_port(port);
    }
    if let Some(dir) = cli.project_dir {
        config = config.with_project_dir(dir);
    }
    config.validate()?;
    info!(
        "Using {} variant on port {} (project {})",
        config.variant, config.port, config.project_name
    );

    if let Err(e) = run(cli.command, config).await {
        println!("✗ {}", e);
        error!("Command failed: {}", e);
        std::process::exit(1);
    }

    Ok(())
}

fn client_for(config: &DeployConfig) -> Result<DoclingClient, Box<dyn std::error::Error>> {
    Ok(DoclingClient::new(config.serve_config())?)
}

async fn run(command: Commands, config: DeployConfig) -> Result<(), Box<dyn std::error::Error>> {
    let runner = SystemRunner;

    let deployer = Deployer::new(config, &runner);

    match command {
        Commands::Check => {
            deployer.check()?;
        }
        Commands::Setup => {
            let report = deployer.setup()?;
            println!(
                "✓ Setup complete ({} directories created, {} files written)",
                report.created_dirs.len(),
                report.written_files.len()
            );
        }
        Commands::Pull => match deployer.pull()? {
            PullOutcome::Pulled { reference, .. } => info!("Pulled {}", reference),
            PullOutcome::Built { tag } => info!("Built {}", tag),
        },
        Commands::Build => {
            deployer.build()?;
        }
        Commands::Dev => {
            let client = client_for(deployer.config())?;
            deployer.dev(&client).await?;
            print_urls(deployer.config());
        }
        Commands::Prod { monitoring } => {
            let client = client_for(deployer.config())?;
            deployer.prod(&client, monitoring).await?;
            print_urls(deployer.config());
        }
        Commands::Status => {
            let client = client_for(deployer.config())?;
            let report = deployer.status(&client).await?;
            println!("Checked at {}", report.checked_at.to_rfc3339());
        }
        Commands::Test => {
            let client = client_for(deployer.config())?;
            deployer.test(&client).await?;
        }
        Commands::Logs {
            service,
            tail,
            follow,
        } => {
            deployer.logs(&LogsOptions {
                service,
                tail: Some(tail),
                follow,
            })?;
        }
        Commands::Restart { service } => {
            let client = client_for(deployer.config())?;
            deployer.restart(service.as_deref(), &client).await?;
        }
        Commands::Cleanup { prune } => {
            deployer.cleanup(prune)?;
        }
        Commands::Convert {
            file,
            url,
            upload,
            output_dir,
            poll_interval,
            max_polls,
        } => {
            let input = match (file, url) {
                (Some(path), _) if upload => ConvertInput::Upload(path),
                (Some(path), _) => ConvertInput::File(path),
                (None, Some(url)) => ConvertInput::Url(url),
                (None, None) => return Err("convert needs a FILE or --url".into()),
            };
            let interval = Duration::from_secs(poll_interval.max(1));
            let client = DoclingClient::new(
                deployer
                    .config()
                    .serve_config()
                    .with_timeout(Duration::from_secs(300)),
            )?;
            deployer
                .convert(&client, &input, &output_dir, interval, max_polls)
                .await?;
        }
        Commands::Render { target, output } => {
            render(target, output, deployer.config())?;
        }
    }

    Ok(())
}

fn render(
    target: RenderTarget,
    output: Option<PathBuf>,
    config: &DeployConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    let content = match target {
        RenderTarget::Containerfile => ContainerfileSpec::new(config.variant)
            .with_threads(config.omp_num_threads)
            .render(),
        RenderTarget::Compose => deploy::render_compose(config),
        RenderTarget::Nginx => deploy::render_nginx_conf(),
    };

    match output {
        Some(path) => {
            std::fs::write(&path, content)?;
            println!("✓ Wrote {}", path.display());
        }
        None => print!("{}", content),
    }
    Ok(())
}

fn print_urls(config: &DeployConfig) {
    let base = format!("http://localhost:{}", config.port);
    println!("  API:    {}", base);
    println!("  Docs:   {}/docs", base);
    if config.enable_ui {
        println!("  UI:     {}/ui", base);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_convert_accepts_url() {
        let cli = Cli::try_parse_from([
            "docling-deploy",
            "convert",
            "--url",
            "https://arxiv.org/pdf/2501.17887",
        ])
        .unwrap();
        match cli.command {
            Commands::Convert {
                file, url, upload, ..
            } => {
                assert!(file.is_none());
                assert_eq!(url.as_deref(), Some("https://arxiv.org/pdf/2501.17887"));
                assert!(!upload);
            }
            _ => panic!("expected convert"),
        }
    }

    #[test]
    fn test_convert_input_rules() {
        assert!(Cli::try_parse_from(["docling-deploy", "convert"]).is_err());
        assert!(Cli::try_parse_from([
            "docling-deploy",
            "convert",
            "n2.pdf",
            "--url",
            "https://example.com/a.pdf"
        ])
        .is_err());
        assert!(Cli::try_parse_from(["docling-deploy", "convert", "--upload", "--url", "x"]).is_err());

        let cli = Cli::try_parse_from(["docling-deploy", "convert", "n2.pdf", "--upload"]).unwrap();
        assert!(matches!(cli.command, Commands::Convert { upload: true, .. }));
    }
}
