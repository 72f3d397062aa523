use packet_relay::config::ProxyConfig;
use packet_relay::service::ProxyService;
use packet_relay::utils::logging::init_logging;
use packet_relay::utils::metrics::init_metrics;
use std::process::ExitCode;
use tracing::{error, info};

const USAGE: &str = "usage: packet-relay <config.toml>\n       packet-relay --example-config";

async fn run(path: &str) -> packet_relay::Result<()> {
    let mut config = ProxyConfig::from_file(path)?;
    config.apply_env();
    config.validate_strict()?;

    init_logging(&config.logging)?;
    init_metrics();
    info!(config = %path, listeners = config.listeners.len(), "Starting packet relay");

    ProxyService::new(config)?.run().await
}

#[tokio::main]
async fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let path = match args.as_slice() {
        [flag] if flag == "--example-config" => {
            println!("{}", ProxyConfig::example_config());
            return ExitCode::SUCCESS;
        }
        [path] => path.clone(),
        _ => {
            eprintln!("{USAGE}");
            return ExitCode::from(2);
        }
    };

    match run(&path).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            // logging may not be up yet
            error!(error = %e, "Relay failed");
            eprintln!("packet-relay: {e}");
            ExitCode::FAILURE
        }
    }
}
