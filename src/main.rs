#[macro_use]
extern crate tracing;

use std::net::{Ipv4Addr, SocketAddr};
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use eyre::{Context, Result, eyre};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[macro_use]
mod display;

mod api;
mod cli;
mod config;
mod controller;
mod mapping;
mod pool;
mod relay;
mod signal;
mod table;

use self::api::{ApiState, AuthCode};
use self::cli::Cli;
use self::config::Store;
use self::controller::Controller;
use self::signal::Signals;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    tracing_subscriber::fmt()
        .compact()
        .with_target(false)
        .with_env_filter(filter)
        .init();

    match try_main(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn try_main(cli: Cli) -> Result<()> {
    info!("starting...");

    let auth = AuthCode::new(cli.code.as_str())
        .ok_or_else(|| eyre!("the authorization code must not be empty"))?;

    let mut signals = Signals::new()?;

    let connect_timeout = cli.connect_timeout();
    let store = cli.config.as_deref().map(Store::new);
    let controller = Arc::new(Controller::new(connect_timeout, store.clone()));

    if let Some(store) = &store {
        let config = store.load().await?;

        info!(
            "restoring {} mappings from {}",
            config.forward.len(),
            store.path().display()
        );
        controller.restore(config).await;
    }

    let api_addr = SocketAddr::from((Ipv4Addr::LOCALHOST, cli.port));
    let listener = TcpListener::bind(api_addr)
        .await
        .with_context(|| format!("failed to bind control API on {api_addr}"))?;

    info!("control API listening on {}", display!(api_addr));
    debug!("connect timeout is {}", display!(connect_timeout));

    let state = ApiState {
        controller: Arc::clone(&controller),
        auth: Arc::new(auth),
    };

    let shutdown = async move {
        let signal = signals.wait_terminate().await;
        info!("received {signal}, exiting...");
    };

    api::serve(listener, state, shutdown)
        .await
        .context("control API failed")?;

    controller.shutdown().await;
    Ok(())
}
