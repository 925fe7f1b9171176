mod cli;
mod config;
mod error;
mod store;

use std::sync::Arc;

use clap::Parser;
use realtime_session::{
    ConnectionEvent, Credential, CredentialStore, RealtimeSession, SessionSignal,
};
use serde::Serialize;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::{Args, Commands};
use crate::config::AppConfig;
use crate::error::{CliError, Result};
use crate::store::FileCredentialStore;

const DEFAULT_LOG_FILTER: &str = "realtime_session=info,rtsession=info";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let args = Args::parse();
    init_logging(args.verbose, args.quiet, args.log_json);

    run(args).await?;
    Ok(())
}

fn init_logging(verbose: bool, quiet: bool, json: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("realtime_session=debug,rtsession=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_LOG_FILTER.into())
    };

    // Events go to stdout; logs stay on stderr.
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(verbose)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

async fn run(args: Args) -> Result<()> {
    let mut config = AppConfig::load(args.config.as_deref())?.apply_env()?;
    args.apply_overrides(&mut config.session);
    let store = Arc::new(FileCredentialStore::new(config.credentials_path()));

    match args.command {
        Commands::Config { show } => {
            if show {
                println!("{}", config.show()?);
            } else {
                println!("Use --show to display the effective configuration");
            }
        }

        Commands::Login {
            refresh_token,
            access_token,
        } => {
            let credential = Credential::new(access_token.unwrap_or_default(), refresh_token);
            store.save(&credential).await?;
            println!("Credentials saved to {}", store.path().display());
        }

        Commands::Logout => {
            store.clear().await?;
            println!("Credentials removed from {}", store.path().display());
        }

        Commands::Refresh => {
            let session = RealtimeSession::new(config.session, store).await?;
            let credential = session.force_refresh().await?;
            match credential.expiry {
                Some(expiry) => println!("Access token refreshed, expires at {expiry}"),
                None => println!("Access token refreshed"),
            }
        }

        Commands::Listen { raw } => {
            let session = RealtimeSession::new(config.session, store).await?;
            listen(&session, raw).await?;
        }
    }

    Ok(())
}

async fn listen(session: &RealtimeSession, raw: bool) -> Result<()> {
    let mut connection = session.subscribe_connection();
    let mut signals = session.subscribe_signals();
    let mut typed = (!raw).then(|| session.channels().subscribe_typed());
    let mut documents = raw.then(|| session.channels().subscribe_raw());

    if let Err(e) = session.connect().await {
        if e.requires_relogin() {
            return Err(CliError::Reauthorization(e.to_string()));
        }
        warn!(error = %e, "Initial connect failed; retrying in the background");
    }

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let outcome = loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Interrupted");
                break Ok(());
            }
            Some(event) = next(&mut typed) => match event {
                Ok(event) => print_json(&event),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Event output lagged"),
                Err(RecvError::Closed) => break Ok(()),
            },
            Some(document) = next(&mut documents) => match document {
                Ok(document) => print_json(&document),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Event output lagged"),
                Err(RecvError::Closed) => break Ok(()),
            },
            event = connection.recv() => match event {
                Ok(ConnectionEvent::Connected) => info!("Connected"),
                Ok(ConnectionEvent::Disconnected { reason }) => {
                    info!(reason = ?reason, "Disconnected")
                }
                Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break Ok(()),
            },
            signal = signals.recv() => match signal {
                Ok(SessionSignal::ReauthorizationRequired { reason, .. }) => {
                    error!(reason = %reason, "Reauthorization required");
                    break Err(CliError::Reauthorization(reason));
                }
                Ok(SessionSignal::RefreshFailed { error, .. }) => {
                    warn!(error = %error, "Token refresh failed")
                }
                Ok(SessionSignal::Refreshed { expiry, .. }) => {
                    info!(expiry = ?expiry, "Token refreshed")
                }
                Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break Ok(()),
            },
        }
    };

    session.shutdown().await;
    outcome
}

async fn next<T: Clone>(
    receiver: &mut Option<broadcast::Receiver<T>>,
) -> Option<std::result::Result<T, RecvError>> {
    match receiver {
        Some(receiver) => Some(receiver.recv().await),
        None => std::future::pending().await,
    }
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string(value) {
        Ok(line) => println!("{line}"),
        Err(e) => warn!(error = %e, "Failed to encode event"),
    }
}
