use clap::{Parser, Subcommand};
use sqlx::migrate::Migrator;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ledger_core::clients::alerts::AlertClient;
use ledger_core::clients::notifier::{HttpNotifier, NoopNotifier, Notifier};
use ledger_core::clients::users::{HttpUserDirectory, UserDirectory};
use ledger_core::config::Config;
use ledger_core::providers::donation::{DonationNetworkAdapter, DonationNetworkClient};
use ledger_core::providers::internal::InternalAdapter;
use ledger_core::providers::processor::{PgDestinationDirectory, ProcessorAdapter, ProcessorClient};
use ledger_core::providers::vault::{VaultAdapter, VaultClient};
use ledger_core::providers::AdapterRegistry;
use ledger_core::services::{
    BadgeService, BalanceService, ChainSynchronizer, LedgerService, PaymentService, PayoutService,
    WebhookReconciler,
};
use ledger_core::{create_app, AppState};

#[derive(Parser)]
#[command(name = "ledger-core")]
#[command(about = "Payment & Settlement Ledger", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server and background jobs (default)
    Serve,

    /// Run the blockchain event synchronizer
    Sync {
        /// Sync one block range and exit instead of looping
        #[arg(long)]
        once: bool,
    },

    /// Run the donation-threshold badge aggregation
    Badges {
        /// Donation count required for the badge
        #[arg(long)]
        threshold: Option<i64>,
    },

    /// Database management commands
    #[command(subcommand)]
    Db(DbCommands),

    /// Configuration validation
    Config,
}

#[derive(Subcommand)]
enum DbCommands {
    /// Run database migrations
    Migrate,
}

struct Runtime {
    state: AppState,
    synchronizer: ChainSynchronizer,
    badges: BadgeService,
    config: Config,
}

async fn build_runtime(config: Config) -> anyhow::Result<Runtime> {
    let pool = ledger_core::db::create_pool(&config).await?;

    let users: Arc<dyn UserDirectory> =
        Arc::new(HttpUserDirectory::new(config.user_service_url.clone()));
    let notifier: Arc<dyn Notifier> = match &config.notifier_url {
        Some(url) => Arc::new(HttpNotifier::new(url.clone())),
        None => Arc::new(NoopNotifier),
    };
    let alerts = AlertClient::new(config.alert_webhook_url.clone());

    let processor = ProcessorClient::new(
        config.processor_api_url.clone(),
        config.processor_api_key.clone(),
    );
    let donation = DonationNetworkClient::new(
        config.donation_api_url.clone(),
        config.donation_api_key.clone(),
    );
    let vault = VaultClient::new(
        config.vault_rpc_url.clone(),
        config.vault_operator_url.clone(),
        config.vault_contract_address.clone(),
    );

    let adapters = AdapterRegistry::new()
        .register(Arc::new(InternalAdapter::new()))
        .register(Arc::new(ProcessorAdapter::new(
            processor.clone(),
            Arc::new(PgDestinationDirectory::new(pool.clone())),
        )))
        .register(Arc::new(DonationNetworkAdapter::new(
            donation,
            users.clone(),
        )))
        .register(Arc::new(VaultAdapter::new(vault.clone(), users.clone())));

    let ledger = LedgerService::new(pool.clone(), users.clone());
    let balance = BalanceService::new(pool.clone());
    let payments = PaymentService::new(
        ledger.clone(),
        adapters.clone(),
        notifier.clone(),
        alerts.clone(),
    );
    let payouts = PayoutService::new(
        pool.clone(),
        ledger.clone(),
        balance.clone(),
        processor,
        adapters,
        users.clone(),
        notifier.clone(),
        alerts.clone(),
        config.payout_minimum.clone(),
        config.payout_fee.clone(),
    );
    let reconciler = WebhookReconciler::new(
        ledger.clone(),
        notifier,
        alerts.clone(),
        config.webhook_unknown_ref_alert,
    );
    let synchronizer = ChainSynchronizer::new(
        pool.clone(),
        ledger.clone(),
        vault,
        users,
        alerts,
        config.vault_chain.clone(),
        config.vault_confirmations,
        config.vault_max_blocks_per_sync,
    );
    let badges = BadgeService::new(pool.clone());

    Ok(Runtime {
        state: AppState {
            db: pool,
            ledger,
            balance,
            payments,
            payouts,
            reconciler,
            webhook_secret: config.processor_webhook_secret.clone(),
        },
        synchronizer,
        badges,
        config,
    })
}

async fn run_migrations(pool: &sqlx::PgPool) -> anyhow::Result<()> {
    let migrator = Migrator::new(Path::new("./migrations")).await?;
    migrator.run(pool).await?;
    tracing::info!("database migrations completed");
    Ok(())
}

async fn serve(runtime: Runtime) -> anyhow::Result<()> {
    run_migrations(&runtime.state.db).await?;

    let sync = runtime.synchronizer.clone();
    let poll_interval = runtime.config.vault_poll_interval_secs;
    tokio::spawn(sync.run(poll_interval));

    let payouts = runtime.state.payouts.clone();
    let stale_after = runtime.config.payout_stale_after_hours;
    tokio::spawn(async move {
        loop {
            if let Err(e) = payouts.sweep_stale_payouts(stale_after).await {
                tracing::error!("stale payout sweep failed: {}", e);
            }
            tokio::time::sleep(tokio::time::Duration::from_secs(3600)).await;
        }
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], runtime.config.server_port));
    tracing::info!("listening on {}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, create_app(runtime.state)).await?;
    Ok(())
}

fn mask_password(url: &str) -> String {
    if let Some(at_pos) = url.rfind('@') {
        if let Some(colon_pos) = url[..at_pos].rfind(':') {
            if let Some(slash_pos) = url[..colon_pos].rfind("//") {
                let prefix = &url[..slash_pos + 2];
                let user = &url[slash_pos + 2..colon_pos];
                let suffix = &url[at_pos..];
                return format!("{}{}:****{}", prefix, user, suffix);
            }
        }
    }
    url.to_string()
}

fn print_config(config: &Config) {
    println!("Configuration:");
    println!("  Server Port: {}", config.server_port);
    println!("  Database URL: {}", mask_password(&config.database_url));
    println!("  Processor API: {}", config.processor_api_url);
    println!("  Donation API: {}", config.donation_api_url);
    println!("  Vault RPC: {}", config.vault_rpc_url);
    println!(
        "  Vault Chain: {} ({} confirmations)",
        config.vault_chain, config.vault_confirmations
    );
    println!("  User Service: {}", config.user_service_url);
    println!("  Payout Minimum: {}", config.payout_minimum);
    println!("✓ Configuration is valid");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => {
            let runtime = build_runtime(config).await?;
            serve(runtime).await?;
        }
        Commands::Sync { once } => {
            let runtime = build_runtime(config).await?;
            if once {
                let report = runtime.synchronizer.sync_once().await?;
                println!(
                    "✓ Synced blocks {}..={}: {} ingested, {} existing, {} unmapped",
                    report.from_block,
                    report.to_block,
                    report.ingested,
                    report.skipped_existing,
                    report.skipped_unmapped
                );
            } else {
                runtime
                    .synchronizer
                    .run(runtime.config.vault_poll_interval_secs)
                    .await;
            }
        }
        Commands::Badges { threshold } => {
            let threshold = threshold.unwrap_or(config.badge_donation_threshold);
            let runtime = build_runtime(config).await?;
            let granted = runtime.badges.check_threshold_badge(threshold).await?;
            println!("✓ Granted {} badge(s)", granted.len());
        }
        Commands::Db(DbCommands::Migrate) => {
            let pool = ledger_core::db::create_pool(&config).await?;
            run_migrations(&pool).await?;
            println!("✓ Database migrations completed");
        }
        Commands::Config => {
            print_config(&config);
        }
    }

    Ok(())
}
