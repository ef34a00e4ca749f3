//! xenvm CLI entrypoint.
//!
//! This is the main entrypoint for the xenvm command-line tool.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use xenvm::cli::{Cli, Commands, ConnectionArgs, OutputFormatter, StateCommands};
use xenvm::config::{ConfigParser, ConfigValidator, VmDeployConfig, find_config_file};
use xenvm::error::Result;
use xenvm::reconciler::{ApplyReport, Reconciler};
use xenvm::state::{LocalStateStore, StateStore, generate_holder_id};
use xenvm::xenapi::{XenApiClient, XenSession};

use clap::Parser;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Initializes the logging system.
fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Main async entry point.
async fn run(cli: Cli) -> Result<()> {
    let formatter = OutputFormatter::new(cli.output);
    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Init { path, force } => cmd_init(&path, force),
        Commands::Validate { warnings } => cmd_validate(config_path, warnings, &formatter),
        Commands::Plan => cmd_plan(config_path, &cli.connection, &formatter).await,
        Commands::Apply { yes } => cmd_apply(config_path, &cli.connection, yes, &formatter).await,
        Commands::Status => cmd_status(config_path, &cli.connection, &formatter).await,
        Commands::Destroy { yes } => {
            cmd_destroy(config_path, &cli.connection, yes, &formatter).await
        }
        Commands::State { command } => cmd_state(config_path, command, &formatter).await,
    }
}

/// Writes a starter configuration.
fn cmd_init(path: &Path, force: bool) -> Result<()> {
    info!("Initializing xenvm configuration in: {}", path.display());

    let config_path = path.join("xenvm.yaml");
    let env_path = path.join(".env.example");
    let gitignore_path = path.join(".gitignore");

    if !force && config_path.exists() {
        eprintln!("Configuration file already exists: {}", config_path.display());
        eprintln!("Use --force to overwrite.");
        return Ok(());
    }

    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }

    std::fs::write(&config_path, include_str!("../templates/xenvm.yaml"))?;
    eprintln!("Created: {}", config_path.display());

    std::fs::write(&env_path, include_str!("../templates/.env.example"))?;
    eprintln!("Created: {}", env_path.display());

    if gitignore_path.exists() {
        let existing = std::fs::read_to_string(&gitignore_path)?;
        let missing: Vec<&str> = [".env", ".xenvm/"]
            .into_iter()
            .filter(|entry| !existing.lines().any(|line| line.trim() == *entry))
            .collect();
        if !missing.is_empty() {
            let mut file = std::fs::OpenOptions::new().append(true).open(&gitignore_path)?;
            writeln!(file, "\n# xenvm")?;
            for entry in missing {
                writeln!(file, "{entry}")?;
            }
            eprintln!("Updated: {}", gitignore_path.display());
        }
    } else {
        std::fs::write(&gitignore_path, ".env\n.xenvm/\n")?;
        eprintln!("Created: {}", gitignore_path.display());
    }

    eprintln!("\nNext steps:");
    eprintln!("  1. Copy .env.example to .env and fill in the host credentials");
    eprintln!("  2. Edit xenvm.yaml with your VM description");
    eprintln!("  3. Run 'xenvm validate', then 'xenvm plan'");
    eprintln!("  4. Run 'xenvm apply' to create or converge the VM");

    Ok(())
}

/// Loads and validates the configuration.
fn load_config(config_path: Option<&Path>) -> Result<VmDeployConfig> {
    let path = match config_path {
        Some(path) => path.to_path_buf(),
        None => find_config_file(std::env::current_dir()?)?,
    };
    debug!("Using configuration file: {}", path.display());

    let parser = match path.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(dir) => ConfigParser::new().with_base_path(dir),
        None => ConfigParser::new(),
    };
    parser.load_dotenv()?;
    parser.load_with_env(&path)
}

/// Opens a XenAPI session.
async fn connect(args: &ConnectionArgs) -> Result<XenSession> {
    let connection = args.resolve()?;
    debug!("Connecting to {connection:?}");
    let session = XenApiClient::with_timeout(&connection.url, args.timeout)?
        .login(&connection.username, &connection.password)
        .await?;
    Ok(session)
}

fn state_store(config: &VmDeployConfig) -> LocalStateStore {
    LocalStateStore::with_state_path(PathBuf::from(config.state_path()))
}

/// Asks for confirmation on stderr. Returns true if the answer matches.
fn confirm(prompt: &str, expected: &str) -> Result<bool> {
    eprint!("{prompt}");
    std::io::stderr().flush()?;

    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;
    Ok(input.trim().eq_ignore_ascii_case(expected))
}

/// Validate configuration.
fn cmd_validate(
    config_path: Option<&Path>,
    show_warnings: bool,
    formatter: &OutputFormatter,
) -> Result<()> {
    let config = load_config(config_path)?;
    let result = ConfigValidator::new().check(&config);
    println!("{}", formatter.format_validation(&result, show_warnings));

    if result.is_valid() {
        Ok(())
    } else {
        ConfigValidator::new().validate(&config).map(|_| ())
    }
}

/// Show what apply would do.
async fn cmd_plan(
    config_path: Option<&Path>,
    connection: &ConnectionArgs,
    formatter: &OutputFormatter,
) -> Result<()> {
    let config = load_config(config_path)?;
    ConfigValidator::new().validate(&config)?;
    let store = state_store(&config);
    let session = connect(connection).await?;

    let result = Reconciler::new(&config, &store, &session).plan().await;
    session.logout().await;

    println!("{}", formatter.format_plan(&result?));
    Ok(())
}

/// Create or converge the VM.
async fn cmd_apply(
    config_path: Option<&Path>,
    connection: &ConnectionArgs,
    auto_approve: bool,
    formatter: &OutputFormatter,
) -> Result<()> {
    let config = load_config(config_path)?;
    ConfigValidator::new().validate(&config)?;
    let store = state_store(&config);
    let session = connect(connection).await?;
    let reconciler = Reconciler::new(&config, &store, &session);

    let result = plan_then_apply(&reconciler, auto_approve, formatter).await;
    session.logout().await;

    let Some(report) = result? else {
        return Ok(());
    };
    println!("{}", formatter.format_apply(&report));

    match report.failure {
        Some(failure) => Err(failure.into()),
        None => Ok(()),
    }
}

/// Shows the plan, asks for confirmation, then applies it.
async fn plan_then_apply(
    reconciler: &Reconciler<'_, LocalStateStore, XenSession>,
    auto_approve: bool,
    formatter: &OutputFormatter,
) -> Result<Option<ApplyReport>> {
    let plan = reconciler.plan().await?;
    if plan.vm_ref.is_some() && plan.plan.is_empty() {
        eprintln!("{}", formatter.success("No changes to apply."));
        return Ok(None);
    }
    eprintln!("{}", formatter.format_plan(&plan));

    if !auto_approve && !confirm("Do you want to apply this plan? [y/N]: ", "y")? {
        eprintln!("Apply cancelled.");
        return Ok(None);
    }
    reconciler.apply().await.map(Some)
}

/// Show VM status.
async fn cmd_status(
    config_path: Option<&Path>,
    connection: &ConnectionArgs,
    formatter: &OutputFormatter,
) -> Result<()> {
    let config = load_config(config_path)?;
    let store = state_store(&config);
    let session = connect(connection).await?;

    let result = Reconciler::new(&config, &store, &session).status().await;
    session.logout().await;

    println!("{}", formatter.format_status(&result?));
    Ok(())
}

/// Destroy the VM.
async fn cmd_destroy(
    config_path: Option<&Path>,
    connection: &ConnectionArgs,
    auto_approve: bool,
    formatter: &OutputFormatter,
) -> Result<()> {
    let config = load_config(config_path)?;
    let store = state_store(&config);

    if !auto_approve {
        eprintln!(
            "{}",
            formatter.warning(&format!(
                "This will destroy VM '{}' with its VBDs and VIFs. Disk images are kept.",
                config.vm.name_label
            ))
        );
        if !confirm("Type 'destroy' to confirm: ", "destroy")? {
            eprintln!("Destroy cancelled.");
            return Ok(());
        }
    }

    let session = connect(connection).await?;
    let result = Reconciler::new(&config, &store, &session).destroy().await;
    session.logout().await;

    println!("{}", formatter.format_destroy(&result?));
    Ok(())
}

/// Manage the local state cache.
async fn cmd_state(
    config_path: Option<&Path>,
    command: StateCommands,
    formatter: &OutputFormatter,
) -> Result<()> {
    let config = load_config(config_path)?;
    let store = state_store(&config);

    match command {
        StateCommands::Show => {
            let record = store.load().await?;
            let lock = store.get_lock_info().await?;
            println!("{}", formatter.format_state(record.as_ref()));
            println!("{}", formatter.format_lock(lock.as_ref()));
        }
        StateCommands::Lock { holder } => {
            let holder = holder.unwrap_or_else(generate_holder_id);
            let lock = store.acquire_lock(&holder, "manual").await?;
            println!("{}", formatter.format_lock(Some(&lock)));
        }
        StateCommands::Unlock { lock_id, force } => {
            if force {
                store.force_unlock().await?;
                eprintln!("{}", formatter.warning("Lock removed."));
            } else if let Some(lock_id) = lock_id {
                store.release_lock(&lock_id).await?;
                eprintln!("{}", formatter.success("Lock released."));
            }
        }
    }

    Ok(())
}
