// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::io::Read;
use std::process::ExitCode;

use relational_custody::api::router;
use relational_custody::bootstrap::{build_state, seal_operator_key};
use relational_custody::config::{LogFormat, ServiceConfig};
use relational_custody::ledger::AccountId;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use zeroize::Zeroizing;

const USAGE: &str = "usage: relational-custody [serve | seal-operator-key <account-id>]";

fn init_logging(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let config = match ServiceConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {e}");
            return ExitCode::FAILURE;
        }
    };
    init_logging(config.log_format);

    let args: Vec<String> = std::env::args().skip(1).collect();
    let result = match args.iter().map(String::as_str).collect::<Vec<_>>().as_slice() {
        [] | ["serve"] => serve(config).await,
        ["seal-operator-key", account] => seal(config, account).await,
        _ => {
            eprintln!("{USAGE}");
            return ExitCode::from(2);
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "fatal");
            ExitCode::FAILURE
        }
    }
}

async fn serve(config: ServiceConfig) -> Result<(), Box<dyn std::error::Error>> {
    let shutdown = CancellationToken::new();
    let state = build_state(&config)?.with_shutdown(shutdown.clone());
    let app = router(state);

    let listener = TcpListener::bind(config.bind_addr).await?;
    info!(
        addr = %config.bind_addr,
        network = config.network.name,
        "Relational Custody listening (docs at /docs)"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if tokio::signal::ctrl_c().await.is_err() {
                error!("failed to listen for shutdown signal");
            }
            info!("shutdown requested");
            shutdown.cancel();
        })
        .await?;
    Ok(())
}

/// Read an operator private key from stdin and print its envelope ciphertext.
async fn seal(config: ServiceConfig, account: &str) -> Result<(), Box<dyn std::error::Error>> {
    let account: AccountId = account.parse()?;
    let mut secret = Zeroizing::new(String::new());
    std::io::stdin().read_to_string(&mut secret)?;
    let ciphertext = seal_operator_key(&config, account, &secret).await?;
    println!("{ciphertext}");
    Ok(())
}
