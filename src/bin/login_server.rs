use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use tokio::sync::watch;

use aden::config::ServerConfig;
use aden::servers::login::{bind_and_run, LoginState};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_ansi(std::io::IsTerminal::is_terminal(&std::io::stderr()))
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut conf_file = "conf/login.yaml".to_string();

    let args: Vec<String> = std::env::args().collect();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "--h" | "--?" | "/?" => {
                println!("Usage: login_server [--conf FILE]");
                return Ok(());
            }
            "--conf" => {
                if i + 1 < args.len() {
                    i += 1;
                    conf_file = args[i].clone();
                } else {
                    eprintln!("Error: --conf requires a FILE argument");
                    return Ok(());
                }
            }
            _ => {}
        }
        i += 1;
    }

    let config = if std::path::Path::new(&conf_file).exists() {
        ServerConfig::from_file(&conf_file)?
    } else {
        tracing::warn!("[login] [config_missing] file={} using defaults", conf_file);
        ServerConfig::default()
    };

    let pool = match &config.database_url {
        Some(url) => Some(
            PgPoolOptions::new()
                .max_connections(5)
                .connect(url)
                .await
                .with_context(|| format!("Cannot connect to DB: {}", url))?,
        ),
        None => {
            tracing::warn!("[login] [no_database] accounts are in-memory only");
            None
        }
    };

    let state: Arc<LoginState> = LoginState::new(config, pool);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("[login] [signal] shutting down");
            let _ = shutdown_tx.send(true);
        }
    });

    tracing::info!("[login] [started] Login Server Started");
    bind_and_run(state, shutdown_rx).await?;
    tracing::info!("[login] [stopped]");
    Ok(())
}
