use clap::{Args, Parser, Subcommand};

use crate::app::{self, AppState};
use crate::auth::{generate_jwt, Claims, TenantClaims};
use crate::config::AppConfig;
use crate::services::TenantLookup;

#[derive(Parser)]
#[command(name = "asset-tenancy")]
#[command(about = "Tenant database routing for the asset management API")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Run the HTTP API (default)")]
    Serve,

    #[command(about = "Fetch, probe and register one tenant alias, then exit")]
    Register {
        #[command(flatten)]
        client: ClientArgs,
    },

    #[command(about = "Mint a development JWT for a tenant")]
    Token {
        #[command(flatten)]
        client: ClientArgs,

        #[arg(long, help = "Pre-resolved tenant alias")]
        alias: Option<String>,

        #[arg(long, default_value = "cli", help = "Token subject")]
        sub: String,
    },
}

#[derive(Args)]
pub struct ClientArgs {
    #[arg(long, help = "Client id in the accounts directory")]
    pub client_id: Option<i64>,

    #[arg(long, help = "Client username in the accounts directory")]
    pub username: Option<String>,
}

pub async fn run(cli: Cli, config: &AppConfig) -> anyhow::Result<()> {
    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(config).await,
        Commands::Register { client } => {
            let state = AppState::from_config(config)?;
            let lookup = TenantLookup::from_parts(client.client_id, client.username)?;

            let tenant = state.resolver.ensure_lookup(&lookup).await?;
            println!("{}", tenant.alias);

            state.registry().close_all().await;
            Ok(())
        }
        Commands::Token { client, alias, sub } => {
            let tenant = TenantClaims {
                alias,
                client_id: client.client_id,
                client_username: client.username,
            };
            let claims = Claims::new(sub, Some(tenant), config.security.jwt_expiry_hours);
            println!("{}", generate_jwt(&claims, &config.security.jwt_secret)?);
            Ok(())
        }
    }
}

async fn serve(config: &AppConfig) -> anyhow::Result<()> {
    // Key and directory URL are checked here so a bad deployment never starts
    let state = AppState::from_config(config)?;
    let registry = state.registry().clone();
    let router = app::router(state, config);

    let bind_addr = format!("0.0.0.0:{}", config.server.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("Asset tenancy API listening on http://{}", bind_addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    registry.close_all().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}
