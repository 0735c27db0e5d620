use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use cursor_runner::container::RunOptions;
use cursor_runner::{
    ConfigDiscovery, ContainerExecutor, CursorCommands, DockerEngine, RunRequest, RunResult,
    RunnerConfig, RunnerError,
};
use secrecy::SecretString;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// Exit code for a container that could not be created or started
const EXIT_CREATION_FAILED: u8 = 21;
/// Exit code for a run that hit its deadline
const EXIT_TIMEOUT: u8 = 12;
const EXIT_INTERRUPTED: u8 = 130;
const EXIT_FAILURE: u8 = 1;

/// How often an interrupted CLI re-sweeps the registry while the run winds down
const DRAIN_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Parser)]
#[command(name = "cursor-runner")]
#[command(about = "Run the Cursor CLI against a project inside a throwaway container")]
#[command(version)]
struct Args {
    /// Configuration file (skips discovery)
    #[arg(short = 'c', long = "config", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run `cursor analyze` against a project
    Analyze(TaskArgs),
    /// Run `cursor review` against a project
    Review(TaskArgs),
    /// Run an arbitrary command against a project
    Run {
        #[command(flatten)]
        task: TaskArgs,
        /// Command to run inside the container
        #[arg(last = true, required = true)]
        command: Vec<String>,
    },
    /// Show configuration discovery information
    ShowConfig,
}

#[derive(Debug, clap::Args)]
struct TaskArgs {
    /// Project directory, mounted read-only at /workspace
    #[arg(default_value = ".")]
    project: PathBuf,
    /// Output directory, mounted read-write at /output
    #[arg(short = 'o', long = "output", default_value = "./cursor-output")]
    output: PathBuf,
    /// Cursor configuration directory, mounted read-write at /config
    #[arg(long = "config-dir", default_value = "./.cursor")]
    config_dir: PathBuf,
    /// Image to run (overrides configuration)
    #[arg(long = "image")]
    image: Option<String>,
    /// Container name
    #[arg(long = "name")]
    name: Option<String>,
    /// Run deadline in seconds
    #[arg(long = "timeout", value_name = "SECS")]
    timeout: Option<u64>,
    /// Memory limit, e.g. 512m or 2g
    #[arg(long = "memory")]
    memory: Option<String>,
    /// CPU limit
    #[arg(long = "cpus")]
    cpus: Option<f64>,
    /// Cursor authentication token
    #[arg(long = "token", env = "CURSOR_TOKEN", hide_env_values = true)]
    token: String,
    /// Print the result as JSON
    #[arg(long = "json")]
    json: bool,
}

/// What a task subcommand asks the container to do.
enum Job {
    Analyze,
    Review,
    Run(Vec<String>),
}

impl TaskArgs {
    fn image(&self, config: &RunnerConfig) -> String {
        self.image.clone().unwrap_or_else(|| config.image.clone())
    }

    fn token(&self) -> SecretString {
        SecretString::from(self.token.clone())
    }

    /// Options from configuration, overridden by flags. The container is
    /// always named so an interrupt can find it in the registry.
    fn run_options(&self, config: &RunnerConfig) -> RunOptions {
        let mut options = config
            .run_options()
            .name(self.name.clone().unwrap_or_else(generated_name));
        if let Some(secs) = self.timeout {
            options = options.timeout(Duration::from_secs(secs));
        }
        if let Some(memory) = &self.memory {
            options = options.memory_limit(memory.clone());
        }
        if let Some(cpus) = self.cpus {
            options = options.cpu_limit(cpus);
        }
        options
    }
}

fn generated_name() -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("cursor-run-{}", &id[..8])
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("cursor_runner=info")),
        )
        .init();

    let args = Args::parse();

    match run(args).await {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::from(error_status(&e))
        }
    }
}

async fn run(args: Args) -> Result<ExitCode> {
    let config = match &args.config {
        Some(path) => {
            info!("Loading configuration override from: {:?}", path);
            RunnerConfig::from_toml_file(path)?
        }
        None => ConfigDiscovery::discover_config()?,
    };

    let (task, job) = match &args.command {
        Commands::ShowConfig => {
            ConfigDiscovery::show_discovery_info();
            return Ok(ExitCode::SUCCESS);
        }
        Commands::Analyze(task) => (task, Job::Analyze),
        Commands::Review(task) => (task, Job::Review),
        Commands::Run { task, command } => (task, Job::Run(command.clone())),
    };

    let engine = DockerEngine::connect(config.engine_config())
        .await
        .context("Failed to connect to the container engine")?;
    let commands = CursorCommands::new(ContainerExecutor::new(Arc::new(engine)), &config);
    let registry = commands.executor().registry().clone();

    let image = task.image(&config);
    let options = task.run_options(&config);
    info!(
        "Starting {} on {}",
        options.name.as_deref().unwrap_or("container"),
        image
    );

    let project = task.project.clone();
    let output = task.output.clone();
    let config_dir = task.config_dir.clone();
    let token = task.token();
    let mut run = tokio::spawn(async move {
        match job {
            Job::Analyze => {
                commands
                    .analyze_async(&image, &project, &output, &config_dir, token, options)
                    .await
            }
            Job::Review => {
                commands
                    .review_async(&image, &project, &output, &config_dir, token, options)
                    .await
            }
            Job::Run(command) => {
                let request =
                    RunRequest::new(image, command, project, output, config_dir, token)
                        .with_options(options);
                commands.run_command_async(request).await
            }
        }
    });

    let result = tokio::select! {
        joined = &mut run => joined??,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, cleaning up running containers");
            // The run must finish before the runtime goes away, or its own
            // cleanup has no runtime left to talk to the engine with.
            match registry.drain(run, DRAIN_INTERVAL).await {
                Ok(Ok(result)) => info!("Interrupted run ended with exit code {}", result.exit_code),
                Ok(Err(e)) => warn!("Interrupted run failed: {}", e),
                Err(e) => warn!("Interrupted run did not finish cleanly: {}", e),
            }
            return Ok(ExitCode::from(EXIT_INTERRUPTED));
        }
    };

    report(&result, task.json)?;
    Ok(ExitCode::from(exit_status(&result)))
}

fn report(result: &RunResult, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(result)?);
        return Ok(());
    }

    print!("{}", result.output);
    if !result.success() && !result.error.is_empty() && result.error != result.output {
        eprintln!("{}", result.error);
    }
    Ok(())
}

/// Process exit status for a finished run.
fn exit_status(result: &RunResult) -> u8 {
    if result.timed_out {
        return EXIT_TIMEOUT;
    }
    if !result.observed() {
        return EXIT_FAILURE;
    }
    // Process exit statuses are truncated to 8 bits, as a shell would see them.
    (result.exit_code & 0xff) as u8
}

/// Process exit status for a run that produced no result.
fn error_status(error: &anyhow::Error) -> u8 {
    match error.downcast_ref::<RunnerError>() {
        Some(RunnerError::Creation(_)) => EXIT_CREATION_FAILED,
        _ => EXIT_FAILURE,
    }
}
