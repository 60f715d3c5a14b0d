//! hcloud-reconcile CLI entrypoint.
//!
//! This is the main entrypoint for the hcloud-reconcile command-line tool.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use hcloud_reconcile::cli::{Cli, Commands, MessageLevel, OutputFormatter, StateCommands};
use hcloud_reconcile::config::{
    ConfigParser, ConfigValidator, ResourceAddress, StateBackend, ValidatedConfig,
    find_config_file,
};
use hcloud_reconcile::error::{ConfigError, HcloudError, ReconcileError, Result};
use hcloud_reconcile::hcloud::{CloudApi, HcloudClient};
use hcloud_reconcile::reconciler::{ApplyReport, Reconciler};
use hcloud_reconcile::state::{LocalStateStore, MemoryStateStore, STATE_DIR, StateStore};

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(cli.verbose);

    // Run async runtime
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
        EnvFilter::new("info")
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
        Commands::Validate { strict } => cmd_validate(config_path, strict, &formatter),
        Commands::Plan { detailed } => cmd_plan(config_path, detailed, &formatter).await,
        Commands::Apply { yes, concurrency } => {
            cmd_apply(config_path, yes, concurrency, &formatter).await
        }
        Commands::Import { address, id } => cmd_import(config_path, &address, id, &formatter).await,
        Commands::Drift => cmd_drift(config_path, &formatter).await,
        Commands::Destroy { yes } => cmd_destroy(config_path, yes, &formatter).await,
        Commands::State { command } => cmd_state(config_path, command, &formatter).await,
    }
}

/// Initialize a new project.
fn cmd_init(path: &Path, force: bool) -> Result<()> {
    info!("Initializing new project in: {}", path.display());

    let config_path = path.join("hcloud.yaml");
    let env_path = path.join(".env.example");
    let gitignore_path = path.join(".gitignore");

    if !force && config_path.exists() {
        eprintln!("Declaration file already exists: {}", config_path.display());
        eprintln!("Use --force to overwrite.");
        return Ok(());
    }

    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }

    std::fs::write(&config_path, include_str!("../templates/hcloud.yaml"))?;
    eprintln!("Created: {}", config_path.display());

    std::fs::write(&env_path, include_str!("../templates/.env.example"))?;
    eprintln!("Created: {}", env_path.display());

    let state_entry = format!("{STATE_DIR}/");
    if gitignore_path.exists() {
        let existing = std::fs::read_to_string(&gitignore_path)?;
        if !existing.contains(".env") || !existing.contains(STATE_DIR) {
            let mut file = std::fs::OpenOptions::new()
                .append(true)
                .open(&gitignore_path)?;
            writeln!(file, "\n# hcloud-reconcile")?;
            if !existing.contains(".env") {
                writeln!(file, ".env")?;
            }
            if !existing.contains(STATE_DIR) {
                writeln!(file, "{state_entry}")?;
            }
            eprintln!("Updated: {}", gitignore_path.display());
        }
    } else {
        std::fs::write(&gitignore_path, format!(".env\n{state_entry}\n"))?;
        eprintln!("Created: {}", gitignore_path.display());
    }

    eprintln!("\nProject initialized successfully!");
    eprintln!("Next steps:");
    eprintln!("  1. Copy .env.example to .env and set HCLOUD_TOKEN");
    eprintln!("  2. Edit hcloud.yaml with your firewalls and networks");
    eprintln!("  3. Run 'hcloud-reconcile validate' to check the document");
    eprintln!("  4. Run 'hcloud-reconcile plan' to see what will change");
    eprintln!("  5. Run 'hcloud-reconcile apply' to converge");

    Ok(())
}

/// Validate the declaration file.
fn cmd_validate(config_path: Option<&Path>, strict: bool, formatter: &OutputFormatter) -> Result<()> {
    let config_file = resolve_config_path(config_path)?;
    info!("Validating configuration: {}", config_file.display());

    let parser = ConfigParser::new().with_base_path(parent_dir(&config_file));
    parser.load_dotenv()?;
    let file = parser.load_with_env(&config_file)?;

    let validator = ConfigValidator::new().with_strict_rules(strict);
    let (_, result) = validator.check(&file);

    if !result.is_valid() {
        for error in &result.errors {
            eprintln!("{}", formatter.message(MessageLevel::Error, &error.to_string()));
        }
        return Err(HcloudError::Reconcile(ReconcileError::Aborted {
            reason: format!("{} validation errors", result.error_count()),
        }));
    }

    let config = validator.validate(&file)?;
    println!("{}", formatter.format_validation(&config));
    Ok(())
}

/// Show the plan.
async fn cmd_plan(config_path: Option<&Path>, detailed: bool, formatter: &OutputFormatter) -> Result<()> {
    let (config, store) = load_config_and_state(config_path)?;
    let reconciler = Reconciler::with_settings(create_client()?, store, &config.settings);

    let diff = reconciler.diff(&config).await?;
    let plan = reconciler.plan(&config).await?;

    println!(
        "{}",
        formatter.format_plan(&plan, detailed.then_some(&diff))
    );
    Ok(())
}

/// Apply the plan.
async fn cmd_apply(
    config_path: Option<&Path>,
    auto_approve: bool,
    concurrency: Option<usize>,
    formatter: &OutputFormatter,
) -> Result<()> {
    let (config, store) = load_config_and_state(config_path)?;
    let mut reconciler = Reconciler::with_settings(create_client()?, store, &config.settings);
    if let Some(concurrency) = concurrency {
        reconciler = reconciler.with_concurrency(concurrency);
    }

    let plan = reconciler.plan(&config).await?;
    if plan.is_empty() {
        eprintln!("No changes to apply.");
        return Ok(());
    }

    eprintln!("{}", formatter.format_plan(&plan, None));

    if !auto_approve && !confirm("Do you want to apply this plan? [y/N]: ", "y")? {
        eprintln!("Apply cancelled.");
        return Ok(());
    }

    let cancel = cancel_on_ctrl_c();
    let report = reconciler.apply(&plan, &cancel).await?;

    println!("{}", formatter.format_apply(&report));
    report_failures(&report)
}

/// Import an existing object.
async fn cmd_import(
    config_path: Option<&Path>,
    address: &str,
    id: u64,
    formatter: &OutputFormatter,
) -> Result<()> {
    let address = parse_address(address)?;

    let (config, store) = load_config_and_state(config_path)?;
    if config.resource(&address).is_none() {
        warn!("{address} is not declared; the next apply will delete it");
    }

    let reconciler = Reconciler::with_settings(create_client()?, store, &config.settings);
    let state = reconciler.import(&address, id).await?;

    println!("{}", formatter.format_import(&address, &state));
    Ok(())
}

/// Check for drift.
async fn cmd_drift(config_path: Option<&Path>, formatter: &OutputFormatter) -> Result<()> {
    let (config, store) = load_config_and_state(config_path)?;
    let reconciler = Reconciler::with_settings(create_client()?, store, &config.settings);

    let report = reconciler.check_drift(&config).await?;

    println!("{}", formatter.format_drift(&report));
    Ok(())
}

/// Destroy everything recorded in state.
async fn cmd_destroy(config_path: Option<&Path>, auto_approve: bool, formatter: &OutputFormatter) -> Result<()> {
    let (config, store) = load_config_and_state(config_path)?;

    let entries = store.list().await?;
    if entries.is_empty() {
        eprintln!("No resources to destroy.");
        return Ok(());
    }

    eprintln!("The following resources will be destroyed:");
    for (address, state) in &entries {
        eprintln!("  - {address} (id {})", state.id);
    }

    if !auto_approve
        && !confirm("\nThis action is IRREVERSIBLE. Type 'destroy' to confirm: ", "destroy")?
    {
        eprintln!("Destruction cancelled.");
        return Ok(());
    }

    let reconciler = Reconciler::with_settings(create_client()?, store, &config.settings);
    let cancel = cancel_on_ctrl_c();
    let report = reconciler.destroy(&cancel).await?;

    println!("{}", formatter.format_apply(&report));
    report_failures(&report)
}

/// State management commands.
async fn cmd_state(
    config_path: Option<&Path>,
    command: StateCommands,
    formatter: &OutputFormatter,
) -> Result<()> {
    let (_config, store) = load_config_and_state(config_path)?;

    match command {
        StateCommands::Show => {
            let entries = store.list().await?;
            let lock = store.get_lock_info().await?;
            println!(
                "{}",
                formatter.format_state(store.backend_type(), &entries, lock.as_ref())
            );
        }
        StateCommands::List => {
            let entries = store.list().await?;
            println!("{}", formatter.format_state_list(&entries));
        }
        StateCommands::Rm { address } => {
            let address = parse_address(&address)?;
            let lock = store.acquire_lock("").await?;
            let removed = store.delete(&address).await;
            store.release_lock(&lock.lock_id).await?;

            let message = match removed? {
                Some(state) => format!("Removed {address} (id {}) from state", state.id),
                None => format!("{address} is not in state"),
            };
            eprintln!("{}", formatter.message(MessageLevel::Success, &message));
        }
        StateCommands::Lock { holder } => {
            let lock = store.acquire_lock(holder.as_deref().unwrap_or("")).await?;
            eprintln!("State locked: {}", lock.lock_id);
        }
        StateCommands::Unlock { lock_id, force } => {
            if force {
                if let Some(lock_info) = store.get_lock_info().await? {
                    store.release_lock(&lock_info.lock_id).await?;
                    eprintln!("State forcefully unlocked.");
                }
            } else if let Some(id) = lock_id {
                store.release_lock(&id).await?;
                eprintln!("State unlocked.");
            } else {
                eprintln!("Please provide --lock-id or use --force");
            }
        }
    }

    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Resolves the configuration file path.
fn resolve_config_path(config_path: Option<&Path>) -> Result<PathBuf> {
    config_path.map_or_else(|| find_config_file("."), |path| Ok(path.to_path_buf()))
}

fn parse_address(address: &str) -> Result<ResourceAddress> {
    address
        .parse()
        .map_err(|e: String| HcloudError::Config(ConfigError::validation(e, "address")))
}

fn parent_dir(path: &Path) -> PathBuf {
    path.parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
        .to_path_buf()
}

/// Loads and validates the document and creates the configured state store.
fn load_config_and_state(config_path: Option<&Path>) -> Result<(ValidatedConfig, Arc<dyn StateStore>)> {
    let config_file = resolve_config_path(config_path)?;
    debug!("Loading configuration from: {}", config_file.display());

    let base = parent_dir(&config_file);
    let parser = ConfigParser::new().with_base_path(&base);
    parser.load_dotenv()?;

    let file = parser.load_with_env(&config_file)?;
    let config = ConfigValidator::new().validate(&file)?;

    let store: Arc<dyn StateStore> = match config.state.backend {
        StateBackend::Local => {
            let path = config
                .state
                .path
                .as_ref()
                .map_or_else(|| base.join(STATE_DIR), |p| base.join(p));
            Arc::new(LocalStateStore::with_base_dir(path))
        }
        StateBackend::Memory => {
            warn!("Using in-memory state; nothing will be persisted");
            Arc::new(MemoryStateStore::new())
        }
    };

    Ok((config, store))
}

/// Creates the Hetzner Cloud API client.
fn create_client() -> Result<Arc<dyn CloudApi>> {
    let token = ConfigParser::get_hcloud_token()?;
    let client = match ConfigParser::get_endpoint() {
        Some(endpoint) => HcloudClient::with_endpoint(&token, &endpoint)?,
        None => HcloudClient::new(&token)?,
    };
    Ok(Arc::new(client))
}

/// Returns a token cancelled on Ctrl-C.
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing in-flight calls");
            token.cancel();
        }
    });
    cancel
}

/// Prompts on stderr and compares the answer.
fn confirm(prompt: &str, expected: &str) -> Result<bool> {
    eprint!("{prompt}");
    std::io::stderr().flush()?;

    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;
    Ok(input.trim().eq_ignore_ascii_case(expected))
}

fn report_failures(report: &ApplyReport) -> Result<()> {
    if report.is_success() {
        return Ok(());
    }
    let reason = if report.was_cancelled() {
        String::from("interrupted")
    } else {
        format!("{} resources failed", report.failures().len() + report.worker_errors.len())
    };
    Err(HcloudError::Reconcile(ReconcileError::Aborted { reason }))
}
