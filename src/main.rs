use std::{path::PathBuf, process::ExitCode};

use clap::Parser;
use tracing::{error, info};

use certkeeper::{
    client::AcmeClient,
    config::Configuration,
    dns_updater::DnsUpdater,
    http,
    orchestrator::{Orchestrator, RunOutcome},
    server_handler::ServerHandler,
};

/// 檢查並在需要時續約 TLS 憑證。
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// JSON 設定檔路徑
    config: PathBuf,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "starting {}",
        env!("CARGO_PKG_NAME")
    );

    match run(&args) {
        Ok(outcome) => {
            info!(?outcome, "done.");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<RunOutcome, Box<dyn std::error::Error>> {
    let config = Configuration::load(&args.config)?;
    let client = http::build_client()?;

    let server = ServerHandler::from_type(config.server_handler());
    let dns = DnsUpdater::from_configuration(&config, &client);
    let mut ca = AcmeClient::new(client.clone(), config.directory_url(), config.key_type());

    let outcome = Orchestrator::new(&config, client, &server, &dns, &mut ca).run()?;
    Ok(outcome)
}
