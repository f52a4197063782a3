use std::process;
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use jurisync::config::Config;
use jurisync::credits::{CreditGate, Unmetered};
use jurisync::db::{self, Database};
use jurisync::monitor::{MonitoringScheduler, StaleOnboardingSweep, trigger};
use jurisync::onboarding::{OnboardingMode, Orchestrator, RetryService};
use jurisync::provider::{HttpGateway, ProviderGateway};
use jurisync::web::{self, AppState};
use jurisync::webhook::Reconciler;

#[derive(Debug, Parser)]
#[command(name = "jurisync", version, about = "CNJ process onboarding and monitoring")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the HTTP server and the daily monitoring trigger.
    Serve,
    /// Run one monitoring pass over every active subscription.
    Check,
    /// Onboard a single CNJ.
    Onboard(OnboardArgs),
    /// Re-drive cases stuck in ONBOARDING.
    Sweep,
}

#[derive(Debug, Args)]
struct OnboardArgs {
    /// CNJ number, formatted or digits only.
    #[arg(long)]
    cnj: String,
    #[arg(long)]
    workspace: String,
    /// Case to move to ACTIVE when onboarding completes.
    #[arg(long)]
    case: Option<Uuid>,
    /// Register an update request and wait for the provider webhook.
    #[arg(long = "async")]
    async_mode: bool,
    /// Ask the provider to re-collect instead of serving cached data.
    #[arg(long)]
    force_update: bool,
}

struct Services {
    config: Config,
    db: Arc<dyn Database>,
    gateway: Arc<dyn ProviderGateway>,
    orchestrator: Arc<Orchestrator>,
}

impl Services {
    async fn build() -> anyhow::Result<Self> {
        let config = Config::from_env().context("failed to load configuration")?;
        let db = db::connect_from_config(&config.database)
            .await
            .context("failed to open database")?;
        let gateway: Arc<dyn ProviderGateway> = Arc::new(
            HttpGateway::new(&config.provider).context("failed to build provider client")?,
        );
        let orchestrator = Arc::new(Orchestrator::new(
            Arc::clone(&db),
            Arc::clone(&gateway),
            config.provider.clone(),
            config.onboarding.clone(),
        ));
        Ok(Self {
            config,
            db,
            gateway,
            orchestrator,
        })
    }

    fn scheduler(&self) -> Arc<MonitoringScheduler> {
        Arc::new(MonitoringScheduler::new(
            Arc::clone(&self.db),
            Arc::clone(&self.gateway),
        ))
    }

    fn sweep(&self) -> Arc<StaleOnboardingSweep> {
        Arc::new(StaleOnboardingSweep::new(
            Arc::clone(&self.db),
            Arc::clone(&self.orchestrator),
        ))
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing();

    if let Err(err) = run(cli).await {
        tracing::error!("{:#}", err);
        eprintln!("error: {err:#}");
        process::exit(1);
    }
}

/// `RUST_LOG` selects levels; `LOG_FORMAT=json` switches to JSON lines.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let result = if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .try_init()
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .try_init()
    };
    if result.is_err() {
        tracing::warn!("Tracing subscriber already set; skipping re-initialization.");
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let services = Services::build().await?;
    match cli.command {
        Commands::Serve => serve(services).await,
        Commands::Check => {
            let report = services
                .scheduler()
                .run_daily_check(&services.config.monitoring.batch)
                .await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Commands::Onboard(args) => {
            let mut request = services
                .orchestrator
                .request(args.cnj, args.workspace);
            request.target_case_id = args.case;
            request.force_update = args.force_update;
            if args.async_mode {
                request.mode = OnboardingMode::Async;
            }
            let result = services.orchestrator.onboard(request).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
        Commands::Sweep => {
            let report = services
                .sweep()
                .run(services.config.monitoring.stale_onboarding_after)
                .await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
    }
}

async fn serve(services: Services) -> anyhow::Result<()> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let config = &services.config;

    let credits: Arc<dyn CreditGate> = Arc::new(Unmetered);
    if config.onboarding.retry_credit_cost > 0 {
        tracing::warn!("No credit service configured; retries are not metered");
    }

    let scheduler = services.scheduler();
    let state = Arc::new(AppState {
        reconciler: Arc::new(Reconciler::new(
            Arc::clone(&services.db),
            Arc::clone(&services.orchestrator),
            &config.webhook,
        )),
        retry: Arc::new(RetryService::new(
            Arc::clone(&services.db),
            credits,
            Arc::clone(&services.orchestrator),
            config.onboarding.clone(),
        )),
        scheduler: Arc::clone(&scheduler),
        batch: config.monitoring.batch.clone(),
        secret: config.webhook.secret.clone(),
    });

    let addr = config.server.socket_addr()?;
    web::start_server(addr, state, shutdown_rx.clone()).await?;

    let trigger = if config.monitoring.enabled {
        Some(trigger::spawn_daily_check(
            scheduler,
            services.sweep(),
            config.monitoring.clone(),
            shutdown_rx,
        )?)
    } else {
        tracing::info!("Daily monitoring disabled");
        None
    };

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("Shutdown requested");
    let _ = shutdown_tx.send(true);

    if let Some(handle) = trigger
        && let Err(e) = handle.await
    {
        tracing::warn!("Monitoring trigger ended abnormally: {}", e);
    }
    Ok(())
}
