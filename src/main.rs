use clap::Parser;
use reconcile_core::{
    adapters::PostgresTransactionStore,
    cli::{self, Cli, Commands, DbCommands, TxCommands},
    config::{Config, LogFormat},
    create_app, db,
    health::{GatewayChecker, HealthRegistry, PostgresChecker},
    middleware::{cors_layer, request_logger::RequestLogConfig},
    secrets::SecretsManager,
    startup, AppState,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut config = Config::from_env()?;

    let filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    match config.log_format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Text => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init(),
    }

    if SecretsManager::is_configured() {
        let secrets = SecretsManager::new().await?;
        config.apply_secrets(&secrets).await?;
        tracing::info!("Loaded webhook secret and gateway token from Vault");
    }

    let cli = Cli::parse();
    match cli.command {
        None | Some(Commands::Serve) => serve(config).await,
        Some(Commands::Tx(TxCommands::Show { tx_id })) => cli::handle_tx_show(&config, tx_id).await,
        Some(Commands::Tx(TxCommands::Reconcile { payment_id })) => {
            cli::handle_tx_reconcile(&config, &payment_id).await
        }
        Some(Commands::Db(DbCommands::Migrate)) => cli::handle_db_migrate(&config).await,
        Some(Commands::Config) => cli::handle_config_validate(&config).await,
        Some(Commands::Earnings { seller_id }) => cli::handle_earnings(&config, seller_id).await,
    }
}

async fn serve(config: Config) -> anyhow::Result<()> {
    let pool = db::create_pool(&config).await?;
    db::run_migrations(&pool).await?;

    let gateway = startup::build_gateway(&config);
    tracing::info!(url = %config.gateway_base_url, "Payment gateway client initialized");

    let health = HealthRegistry::new()
        .register("postgres", true, PostgresChecker::new(pool.clone()))
        .register("payment_gateway", false, GatewayChecker::new(gateway.clone()));

    let state = AppState::new(
        Arc::new(PostgresTransactionStore::new(pool)),
        Arc::new(gateway),
        startup::build_notifier(&config),
        config.webhook_secret.clone(),
        health,
    )
    .with_request_log(RequestLogConfig {
        log_body: config.log_request_body,
    });

    let app = create_app(state).layer(cors_layer(&config.cors_allowed_origins));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    tracing::info!("listening on {}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
