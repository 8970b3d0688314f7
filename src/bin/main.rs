use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::info;

use keyhole::{
    CaptureServer, DatabaseConfig, ServerConfig, create_connection, create_router,
    create_services, ensure_schema, fingerprint, load_host_key, log_filter,
};

#[derive(Parser)]
#[command(name = "keyhole")]
#[command(about = "Passwordless browser signin with SSH keys")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the SSH capture server and the HTTP API
    Serve(ServerConfig),
    /// Initialize the database
    Init {
        #[arg(long, env = "KEYHOLE_DB_URL", default_value = "memory")]
        db_url: String,
    },
    /// Print the fingerprint of a host key
    HostKey {
        #[arg(long, env = "KEYHOLE_SSH_KEY", default_value = "ssh-identity")]
        ssh_key: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(std::env::var("RUST_LOG").ok().as_deref()))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve(config) => serve(config).await?,
        Commands::Init { db_url } => {
            let db_config = DatabaseConfig {
                url: db_url,
                ..Default::default()
            };
            info!("Initializing database at {}", db_config.url);
            let db = create_connection(db_config).await?;
            ensure_schema(&db).await?;
            info!("Database initialized");
        }
        Commands::HostKey { ssh_key } => {
            let key = load_host_key(&ssh_key)?;
            let public = key.public_key().to_bytes().context("encoding host public key")?;
            println!("{}", fingerprint(&public));
        }
    }

    Ok(())
}

async fn serve(config: ServerConfig) -> Result<()> {
    // Every startup failure below aborts before anything is served.
    let host_key = load_host_key(&config.ssh_key)?;
    let host_public = host_key
        .public_key()
        .to_bytes()
        .context("encoding host public key")?;
    let host_fingerprint = fingerprint(&host_public);
    info!(fingerprint = %host_fingerprint, "loaded SSH host key");

    let db = create_connection(config.database()).await?;
    ensure_schema(&db).await?;
    info!("Using database url: {}", config.db_url);

    let ssh_listener = tokio::net::TcpListener::bind(config.ssh_listen)
        .await
        .with_context(|| format!("binding SSH listener on {}", config.ssh_listen))?;
    let http_listener = tokio::net::TcpListener::bind(config.http_listen)
        .await
        .with_context(|| format!("binding HTTP listener on {}", config.http_listen))?;

    let services = create_services(db, &config, host_fingerprint);
    let shutdown = CancellationToken::new();

    let sweeper = services.sweeper.spawn(shutdown.clone());
    let ssh = tokio::spawn(
        CaptureServer::new(host_key, services.issuer).run(ssh_listener, shutdown.clone()),
    );

    let app = create_router(services.state);
    info!(addr = %config.http_listen, advertise = %config.http_advertise, "HTTP server listening");

    let http_shutdown = shutdown.clone();
    axum::serve(http_listener, app)
        .with_graceful_shutdown(async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %err, "listening for Ctrl-C");
            }
            info!("shutting down");
            http_shutdown.cancel();
        })
        .await
        .context("running HTTP server")?;

    shutdown.cancel();
    sweeper.await.context("joining sweeper")?;
    ssh.await.context("joining SSH server")??;

    Ok(())
}
