//! Command-line surface and session wiring.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{CommandFactory, Parser};
use tracing::{info, warn};

use cdp_driver::{CdpDriver, LaunchOptions};
use decision_policy::{
    DecisionPolicy, HeuristicPolicy, HttpOracleClient, OraclePolicy, PolicyKind,
};
use explore_engine::{ExploreStatus, Explorer, ExplorerConfig, RunStore};
use learning_store::LearningState;

#[derive(Debug, Parser)]
#[command(
    name = "sitescout",
    version,
    about = "Autonomous feature-surface mapper for authenticated web applications"
)]
pub struct Cli {
    /// Base URL of the application under exploration; doubles as the
    /// known-good anchor page for stuck recovery.
    #[arg(long)]
    pub base_url: String,

    /// Exploration goal handed to the decision policy.
    #[arg(long, default_value = "Map the application's feature surface")]
    pub goal: String,

    /// Decision strategy: heuristic | oracle.
    #[arg(long, default_value = "heuristic")]
    pub policy: String,

    /// Advisory service endpoint (required with --policy oracle).
    #[arg(long)]
    pub oracle_url: Option<String>,

    /// Bearer token for the advisory service.
    #[arg(long)]
    pub oracle_token: Option<String>,

    /// Iteration cap.
    #[arg(long, default_value_t = 40)]
    pub max_iterations: u32,

    /// Coverage threshold (0-100) that ends the run.
    #[arg(long, default_value_t = 95)]
    pub coverage: u8,

    /// Run the browser with a visible window.
    #[arg(long)]
    pub headful: bool,

    /// Directory that receives per-run artifact directories.
    #[arg(long, default_value = "runs")]
    pub run_dir: PathBuf,

    /// Resume from the learning state checkpoint inside --run-dir.
    #[arg(long)]
    pub resume: bool,

    /// Account identifier; falls back to $SITESCOUT_USER.
    #[arg(long)]
    pub username: Option<String>,

    /// Account secret; falls back to $SITESCOUT_PASS.
    #[arg(long)]
    pub password: Option<String>,

    /// Log filter when RUST_LOG is unset.
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level)?;

    let username = cli
        .username
        .clone()
        .or_else(|| std::env::var("SITESCOUT_USER").ok());
    let password = cli
        .password
        .clone()
        .or_else(|| std::env::var("SITESCOUT_PASS").ok());
    let (username, password) = match (username, password) {
        (Some(username), Some(password)) => (username, password),
        _ => {
            let mut command = Cli::command();
            let _ = command.print_help();
            eprintln!(
                "\nerror: missing credentials; pass --username/--password \
                 or set SITESCOUT_USER / SITESCOUT_PASS"
            );
            std::process::exit(2);
        }
    };

    let policy_kind: PolicyKind = cli
        .policy
        .parse()
        .map_err(|err: String| anyhow::anyhow!(err))?;
    let policy: Box<dyn DecisionPolicy> = match policy_kind {
        PolicyKind::Heuristic => Box::new(HeuristicPolicy::new()),
        PolicyKind::Oracle => {
            let endpoint = cli
                .oracle_url
                .clone()
                .context("--oracle-url is required with --policy oracle")?;
            let mut client = HttpOracleClient::new(endpoint);
            if let Some(token) = &cli.oracle_token {
                client = client.with_bearer(token);
            }
            Box::new(OraclePolicy::new(client))
        }
    };

    info!("Starting SiteScout v{}", env!("CARGO_PKG_VERSION"));

    let driver = Arc::new(
        CdpDriver::launch(LaunchOptions {
            headless: !cli.headful,
            ..Default::default()
        })
        .await
        .context("launching browser")?,
    );

    crate::auth::login(driver.as_ref(), &cli.base_url, &username, &password).await?;

    let (store, resumed) = prepare_run_dir(&cli)?;
    info!(dir = %store.dir().display(), "run artifacts directory ready");

    let config = ExplorerConfig::new(cli.base_url.clone())
        .with_max_iterations(cli.max_iterations)
        .with_coverage_threshold(cli.coverage);
    let mut explorer = Explorer::new(driver.clone(), policy, store, config, cli.goal.clone());
    if let Some(state) = resumed {
        explorer = explorer.with_state(state);
    }

    let outcome = explorer.run().await;

    println!("\nExploration finished: {}", outcome.status.as_str());
    println!("  iterations:       {}", outcome.iterations);
    println!(
        "  pages:            {} discovered, {} explored",
        outcome.pages_discovered, outcome.pages_explored
    );
    println!("  features:         {}", outcome.features_discovered);
    println!("  coverage:         {}%", outcome.coverage);
    if let Some(path) = &outcome.report_path {
        println!("  report:           {}", path.display());
    }

    if let Ok(cdp) = Arc::try_unwrap(driver) {
        cdp.close().await;
    } else {
        warn!("browser handle still shared at shutdown, leaving it running");
    }

    if outcome.status == ExploreStatus::Aborted {
        bail!(
            "run aborted: {}",
            outcome.error.unwrap_or_else(|| "unknown driver failure".to_string())
        );
    }
    Ok(())
}

fn prepare_run_dir(cli: &Cli) -> Result<(RunStore, Option<LearningState>)> {
    if cli.resume {
        let store = RunStore::create(cli.run_dir.clone())?;
        let state = LearningState::load(&store.state_path())
            .with_context(|| format!("resuming from {}", store.state_path().display()))?;
        return Ok((store, Some(state)));
    }
    let stamp = Utc::now().format("%Y%m%d-%H%M%S");
    let dir = cli.run_dir.join(format!("run-{stamp}"));
    Ok((RunStore::create(dir)?, None))
}

fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("invalid log filter")?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
    Ok(())
}
